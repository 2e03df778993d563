//! Common error types for NutriVault.

use thiserror::Error;

/// Top-level error type for NutriVault operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The process key is not exactly 16 bytes.
    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    /// The process key cannot decrypt data already persisted.
    #[error("Key mismatch: unable to decrypt persisted data")]
    KeyMismatch,

    /// Required input is missing or malformed.
    #[error("Invalid input: {0}")]
    Validation(String),

    /// An account with this email already exists.
    #[error("Email already registered")]
    DuplicateEmail,

    /// A unique index rejected the write.
    #[error("Unique constraint violated on field '{field}'")]
    UniqueViolation { field: String },

    /// Email/password pair did not match any account.
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// No user has the requested id.
    #[error("User not found: {0}")]
    UserNotFound(u64),

    /// Owner-scoped history position outside `0..count`.
    #[error("Position {position} out of range ({count} entries)")]
    PositionOutOfRange { position: i64, count: usize },

    /// A stored value could not be decrypted.
    #[error("Decryption failed: {0}")]
    DecryptionFailure(String),

    /// An external collaborator failed.
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// I/O operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization or deserialization failed.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Coarse classification used at the request boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad key length or mismatch; fatal at startup.
    Configuration,
    /// Missing or malformed request input.
    Validation,
    /// Uniqueness conflict.
    Conflict,
    /// Credentials rejected.
    Unauthorized,
    /// Unknown user or history position.
    NotFound,
    /// Undecryptable stored value.
    Integrity,
    /// Collaborator failure.
    Upstream,
    /// Backend, I/O or encoding failure.
    Storage,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidKeyLength { .. } | Error::KeyMismatch => ErrorKind::Configuration,
            Error::Validation(_) => ErrorKind::Validation,
            Error::DuplicateEmail | Error::UniqueViolation { .. } => ErrorKind::Conflict,
            Error::InvalidCredentials => ErrorKind::Unauthorized,
            Error::UserNotFound(_) | Error::PositionOutOfRange { .. } => ErrorKind::NotFound,
            Error::DecryptionFailure(_) => ErrorKind::Integrity,
            Error::Upstream(_) => ErrorKind::Upstream,
            Error::Storage(_) | Error::Io(_) | Error::Serialization(_) => ErrorKind::Storage,
        }
    }

    /// Whether the process must refuse to start on this error.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Configuration
    }

    /// Message safe to hand back to a caller.
    ///
    /// Internal detail (paths, SQL, cipher state) never leaks through here.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation => match self {
                Error::Validation(msg) => msg.clone(),
                _ => self.to_string(),
            },
            ErrorKind::Conflict => match self {
                Error::DuplicateEmail => "Email already registered".to_string(),
                _ => "Record already exists".to_string(),
            },
            ErrorKind::Unauthorized => "Invalid credentials".to_string(),
            ErrorKind::NotFound => match self {
                Error::UserNotFound(_) => "User not found".to_string(),
                _ => "History entry not found".to_string(),
            },
            ErrorKind::Integrity => "Stored data could not be decrypted".to_string(),
            ErrorKind::Upstream => "External service failed".to_string(),
            ErrorKind::Storage | ErrorKind::Configuration => "Internal error".to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;
