//! Label scanning: text extraction and analysis.
//!
//! The service calls two external collaborators and turns whatever they
//! report into display text. History side records are best-effort: a
//! failed write is logged and the scan result is still returned.

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::history::{HistoryLedger, NOTHING_DETECTED};
use nutrivault_common::{Error, Result, UserId};

/// Display text when no image bytes were supplied.
pub const NO_FILE: &str = "❌ No file uploaded";

/// Display text when the analyzer returns nothing.
pub const NO_ANALYSIS: &str = "⚠️ No analysis returned";

/// Display text when the analyzer itself fails.
pub const ANALYSIS_FAILED: &str = "❌ AI analysis failed.";

/// What a text extractor found in an image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    /// Recognized text.
    Text(String),
    /// The image holds no recognizable text.
    NothingDetected,
    /// The remote service reported an error.
    Failed(String),
}

/// Turns image bytes into text.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract text from an image.
    ///
    /// # Errors
    /// - The extractor could not be reached or crashed
    async fn extract(&self, image: &[u8]) -> Result<Extraction>;
}

/// Input to a text analyzer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisRequest {
    pub text: String,
    pub health_issues: Vec<String>,
    pub age: Option<u32>,
}

/// Produces a narrative analysis of label text.
#[async_trait]
pub trait TextAnalyzer: Send + Sync {
    /// Analyze label text. `None` means the analyzer had nothing to say.
    ///
    /// # Errors
    /// - The analyzer could not be reached or crashed
    async fn analyze(&self, request: &AnalysisRequest) -> Result<Option<String>>;
}

/// Result of an analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisOutcome {
    pub success: bool,
    pub analysis: String,
}

/// Whole years between `dob` and `today`, or `None` if `dob` lies ahead.
pub fn age_on(dob: NaiveDate, today: NaiveDate) -> Option<u32> {
    let mut years = today.year() - dob.year();
    if (today.month(), today.day()) < (dob.month(), dob.day()) {
        years -= 1;
    }
    u32::try_from(years).ok()
}

/// Age today from a `YYYY-MM-DD` string. Unparseable input gives `None`.
pub fn parse_age(dob: &str) -> Option<u32> {
    let dob = NaiveDate::parse_from_str(dob.trim(), "%Y-%m-%d").ok()?;
    age_on(dob, Utc::now().date_naive())
}

/// Bridges the collaborators to the history ledger.
pub struct ScanService {
    extractor: Box<dyn TextExtractor>,
    analyzer: Box<dyn TextAnalyzer>,
    history: HistoryLedger,
}

impl ScanService {
    /// Create a service.
    pub fn new(
        extractor: Box<dyn TextExtractor>,
        analyzer: Box<dyn TextAnalyzer>,
        history: HistoryLedger,
    ) -> Self {
        Self {
            extractor,
            analyzer,
            history,
        }
    }

    /// Extract display text from an image, recording it for `user_id`.
    ///
    /// Never fails: collaborator errors become display text.
    pub async fn extract(&self, user_id: Option<UserId>, image: &[u8]) -> String {
        if image.is_empty() {
            return NO_FILE.to_string();
        }

        let text = match self.extractor.extract(image).await {
            Ok(Extraction::Text(text)) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(Extraction::Text(_)) | Ok(Extraction::NothingDetected) => {
                NOTHING_DETECTED.to_string()
            }
            Ok(Extraction::Failed(msg)) => return format!("❌ API Error: {}", msg),
            Err(e) => {
                warn!(error = %e, "Text extraction failed");
                return format!("❌ OCR failed: {}", e);
            }
        };

        if let Some(user_id) = user_id {
            match self.history.record_extraction(user_id, &text).await {
                Ok(recorded) => debug!(user_id = %user_id, recorded, "Extraction handled"),
                Err(e) => warn!(user_id = %user_id, error = %e, "Could not record extraction"),
            }
        }
        text
    }

    /// Analyze label text against a user's health context.
    ///
    /// # Errors
    /// - `Validation` if `text` is empty
    pub async fn analyze(
        &self,
        user_id: Option<UserId>,
        text: &str,
        health_issues: &[String],
        dob: Option<&str>,
    ) -> Result<AnalysisOutcome> {
        if text.trim().is_empty() {
            return Err(Error::Validation("No text provided".to_string()));
        }

        let request = AnalysisRequest {
            text: text.to_string(),
            health_issues: health_issues.to_vec(),
            age: dob.and_then(parse_age),
        };

        let analysis = match self.analyzer.analyze(&request).await {
            Ok(Some(analysis)) if !analysis.trim().is_empty() => analysis,
            Ok(_) => {
                return Ok(AnalysisOutcome {
                    success: true,
                    analysis: NO_ANALYSIS.to_string(),
                })
            }
            Err(e) => {
                warn!(error = %e, "Text analysis failed");
                return Ok(AnalysisOutcome {
                    success: false,
                    analysis: ANALYSIS_FAILED.to_string(),
                });
            }
        };

        if let Some(user_id) = user_id {
            if let Err(e) = self.history.record_analysis(user_id, text, &analysis).await {
                warn!(user_id = %user_id, error = %e, "Could not record analysis");
            }
        }

        Ok(AnalysisOutcome {
            success: true,
            analysis,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutrivault_crypto::{FieldCipher, SymmetricKey};
    use nutrivault_storage::{MemoryStore, RecordStore};
    use std::sync::{Arc, Mutex};

    /// Replies with a fixed extraction, or fails with an upstream error.
    struct FixedExtractor(std::result::Result<Extraction, String>);

    #[async_trait]
    impl TextExtractor for FixedExtractor {
        async fn extract(&self, _image: &[u8]) -> Result<Extraction> {
            self.0.clone().map_err(Error::Upstream)
        }
    }

    #[derive(Default)]
    struct RecordingAnalyzer {
        reply: Option<String>,
        fail: bool,
        seen: Arc<Mutex<Vec<AnalysisRequest>>>,
    }

    #[async_trait]
    impl TextAnalyzer for RecordingAnalyzer {
        async fn analyze(&self, request: &AnalysisRequest) -> Result<Option<String>> {
            self.seen.lock().unwrap().push(request.clone());
            if self.fail {
                return Err(Error::Upstream("timeout".to_string()));
            }
            Ok(self.reply.clone())
        }
    }

    fn history() -> HistoryLedger {
        let cipher = Arc::new(FieldCipher::new(SymmetricKey::from_bytes([5u8; 16])));
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        HistoryLedger::new(cipher, store)
    }

    fn service(
        extraction: std::result::Result<Extraction, String>,
        analyzer: RecordingAnalyzer,
    ) -> ScanService {
        ScanService::new(
            Box::new(FixedExtractor(extraction)),
            Box::new(analyzer),
            history(),
        )
    }

    fn user(id: u64) -> UserId {
        UserId::new(id).unwrap()
    }

    #[test]
    fn test_age_on_birthday_boundary() {
        let dob = NaiveDate::from_ymd_opt(1990, 5, 1).unwrap();
        let before = NaiveDate::from_ymd_opt(2020, 4, 30).unwrap();
        let on = NaiveDate::from_ymd_opt(2020, 5, 1).unwrap();
        assert_eq!(age_on(dob, before), Some(29));
        assert_eq!(age_on(dob, on), Some(30));
        assert_eq!(age_on(on, dob), None);
    }

    #[test]
    fn test_parse_age_rejects_garbage() {
        assert_eq!(parse_age("not a date"), None);
        assert_eq!(parse_age("1990-13-40"), None);
        assert!(parse_age("1990-05-01").is_some());
    }

    #[tokio::test]
    async fn test_extract_records_trimmed_text() {
        let scans = service(
            Ok(Extraction::Text("  sugar, salt \n".to_string())),
            RecordingAnalyzer::default(),
        );
        assert_eq!(scans.extract(Some(user(1)), b"img").await, "sugar, salt");

        let items = scans.history.list(user(1)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].extracted_text.as_deref(), Some("sugar, salt"));
    }

    #[tokio::test]
    async fn test_extract_sentinels_are_not_recorded() {
        let cases = [
            (Ok(Extraction::NothingDetected), NOTHING_DETECTED.to_string()),
            (Ok(Extraction::Text("   ".to_string())), NOTHING_DETECTED.to_string()),
            (
                Ok(Extraction::Failed("quota".to_string())),
                "❌ API Error: quota".to_string(),
            ),
            (
                Err("down".to_string()),
                "❌ OCR failed: Upstream error: down".to_string(),
            ),
        ];
        for (extraction, expected) in cases {
            let scans = service(extraction, RecordingAnalyzer::default());
            assert_eq!(scans.extract(Some(user(1)), b"img").await, expected);
            assert!(scans.history.list(user(1)).await.unwrap().is_empty());
        }
    }

    #[tokio::test]
    async fn test_extract_without_image() {
        let scans = service(Ok(Extraction::NothingDetected), RecordingAnalyzer::default());
        assert_eq!(scans.extract(None, &[]).await, NO_FILE);
    }

    #[tokio::test]
    async fn test_analyze_records_and_passes_context() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let scans = service(
            Ok(Extraction::NothingDetected),
            RecordingAnalyzer {
                reply: Some("High sodium".to_string()),
                fail: false,
                seen: seen.clone(),
            },
        );

        let issues = vec!["hypertension".to_string()];
        let outcome = scans
            .analyze(Some(user(2)), "salt", &issues, Some("bogus"))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(outcome.analysis, "High sodium");

        let request = seen.lock().unwrap()[0].clone();
        assert_eq!(request.health_issues, issues);
        assert_eq!(request.age, None);

        let items = scans.history.list(user(2)).await.unwrap();
        assert_eq!(items[0].input_text.as_deref(), Some("salt"));
        assert_eq!(items[0].analysis_text.as_deref(), Some("High sodium"));
    }

    #[tokio::test]
    async fn test_analyze_failures() {
        let scans = service(Ok(Extraction::NothingDetected), RecordingAnalyzer::default());
        assert!(matches!(
            scans.analyze(None, " ", &[], None).await,
            Err(Error::Validation(_))
        ));

        let empty = scans.analyze(Some(user(1)), "salt", &[], None).await.unwrap();
        assert_eq!(empty, AnalysisOutcome { success: true, analysis: NO_ANALYSIS.to_string() });

        let failing = service(
            Ok(Extraction::NothingDetected),
            RecordingAnalyzer {
                fail: true,
                ..Default::default()
            },
        );
        let failed = failing.analyze(Some(user(1)), "salt", &[], None).await.unwrap();
        assert!(!failed.success);
        assert_eq!(failed.analysis, ANALYSIS_FAILED);
        assert!(failing.history.list(user(1)).await.unwrap().is_empty());
    }
}
