//! Request boundary.
//!
//! Typed payloads come in as camelCase JSON; every handler answers with a
//! [`Response`]. Errors are reduced to their public message here, so nothing
//! internal reaches a caller.

use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::context::CoreContext;
use crate::history::{HistoryItem, HistoryLedger};
use crate::scan::ScanService;
use crate::users::{NewUser, UserDirectory, UserProfile};
use nutrivault_common::{Error, ErrorKind, Result, UserId};

/// Uniform response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> Response<T> {
    /// Successful response carrying `data`.
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
        }
    }

    /// Failed response carrying the public message of `err`.
    pub fn fail(err: &Error) -> Self {
        match err.kind() {
            ErrorKind::Integrity | ErrorKind::Storage | ErrorKind::Configuration => {
                error!(error = %err, "Request failed")
            }
            ErrorKind::Upstream => warn!(error = %err, "Request failed"),
            _ => {}
        }
        Self {
            success: false,
            data: None,
            message: Some(err.public_message()),
        }
    }

    fn from_result(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::ok(data),
            Err(e) => Self::fail(&e),
        }
    }
}

/// Registration payload.
pub type RegisterRequest = NewUser;

/// Login payload.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateHealthIssuesRequest {
    pub user_id: Option<u64>,
    pub health_issues: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct UpdateDobRequest {
    pub user_id: Option<u64>,
    pub dob: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DeleteHistoryRequest {
    pub user_id: Option<u64>,
    pub index: Option<i64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalyzeRequest {
    pub user_id: Option<u64>,
    pub text: String,
    pub health_issues: Vec<String>,
    pub dob: Option<String>,
}

/// Registration result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registered {
    pub user_id: UserId,
}

fn require_user(raw: Option<u64>, missing: &str) -> Result<UserId> {
    UserId::new(raw.ok_or_else(|| Error::Validation(missing.to_string()))?)
}

/// Dispatches requests to the components.
pub struct Gateway {
    users: UserDirectory,
    history: HistoryLedger,
    scans: Option<ScanService>,
}

impl Gateway {
    /// Gateway over `ctx`, without scanning.
    pub fn new(ctx: &CoreContext) -> Self {
        Self {
            users: ctx.users(),
            history: ctx.history(),
            scans: None,
        }
    }

    /// Attach the scan service.
    pub fn with_scans(mut self, scans: ScanService) -> Self {
        self.scans = Some(scans);
        self
    }

    pub async fn register(&self, req: RegisterRequest) -> Response<Registered> {
        Response::from_result(
            self.users
                .register(req)
                .await
                .map(|user_id| Registered { user_id }),
        )
    }

    pub async fn login(&self, req: LoginRequest) -> Response<UserProfile> {
        Response::from_result(self.users.authenticate(&req.email, &req.password).await)
    }

    pub async fn update_health_issues(&self, req: UpdateHealthIssuesRequest) -> Response<()> {
        let result = async {
            let user_id = require_user(req.user_id, "Missing fields")?;
            let issues = req
                .health_issues
                .ok_or_else(|| Error::Validation("Missing fields".to_string()))?;
            self.users.update_health_issues(user_id, &issues).await
        };
        Response::from_result(result.await)
    }

    pub async fn update_dob(&self, req: UpdateDobRequest) -> Response<()> {
        let result = async {
            let user_id = require_user(req.user_id, "User ID required")?;
            self.users.update_dob(user_id, req.dob.as_deref()).await
        };
        Response::from_result(result.await)
    }

    /// The user's history. A missing id lists nothing.
    pub async fn history(&self, user_id: Option<u64>) -> Response<Vec<HistoryItem>> {
        let Some(raw) = user_id else {
            return Response::ok(Vec::new());
        };
        let result = async {
            let user_id = UserId::new(raw)?;
            self.history.list(user_id).await
        };
        Response::from_result(result.await)
    }

    pub async fn delete_history(&self, req: DeleteHistoryRequest) -> Response<()> {
        let result = async {
            let user_id = require_user(req.user_id, "Missing fields")?;
            let index = req
                .index
                .ok_or_else(|| Error::Validation("Missing fields".to_string()))?;
            self.history.delete_at(user_id, index).await
        };
        Response::from_result(result.await)
    }

    /// Extract text from an image. The display text is always returned.
    pub async fn extract(&self, user_id: Option<u64>, image: &[u8]) -> Response<String> {
        let Some(scans) = &self.scans else {
            return Response::fail(&Error::Upstream("no text extractor configured".to_string()));
        };
        let user_id = user_id.and_then(|id| UserId::new(id).ok());
        Response::ok(scans.extract(user_id, image).await)
    }

    pub async fn analyze(&self, req: AnalyzeRequest) -> Response<String> {
        let Some(scans) = &self.scans else {
            return Response::fail(&Error::Upstream("no text analyzer configured".to_string()));
        };
        let user_id = req.user_id.and_then(|id| UserId::new(id).ok());
        match scans
            .analyze(user_id, &req.text, &req.health_issues, req.dob.as_deref())
            .await
        {
            Ok(outcome) => Response {
                success: outcome.success,
                data: Some(outcome.analysis),
                message: None,
            },
            Err(e) => Response::fail(&e),
        }
    }
}
