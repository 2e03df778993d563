//! NutriVault records: users and scan history over encrypted storage.
//!
//! This crate wires the field cipher and a record store into the
//! user-facing components. Every component is built from a
//! [`CoreContext`], which only exists once the key has been validated.
//!
//! # Design Principles
//! - No plaintext PII at rest: protected fields are encrypted, searchable
//!   ones are also digested
//! - Owner scoping: history is always filtered by user
//! - Best-effort history: a failed side record never fails a scan

pub mod config;
pub mod context;
pub mod gateway;
pub mod history;
pub mod keys;
pub mod scan;
pub mod users;

pub use config::{CoreConfig, CONFIG_FILENAME, HISTORY_COLLECTION, KEY_ENV, USERS_COLLECTION};
pub use context::CoreContext;
pub use gateway::{
    AnalyzeRequest, DeleteHistoryRequest, Gateway, LoginRequest, Registered, RegisterRequest,
    Response, UpdateDobRequest, UpdateHealthIssuesRequest,
};
pub use history::{HistoryEntry, HistoryItem, HistoryLedger, NOTHING_DETECTED};
pub use keys::KeyManager;
pub use scan::{
    AnalysisOutcome, AnalysisRequest, Extraction, ScanService, TextAnalyzer, TextExtractor,
};
pub use users::{NewUser, UserDirectory, UserProfile, UserRecord};
