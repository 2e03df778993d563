//! Common utilities and types shared across NutriVault modules.
//!
//! This module provides the error taxonomy and identifier types used by
//! every other crate in the workspace.

pub mod error;
pub mod types;

pub use error::{Error, ErrorKind, Result};
pub use types::UserId;
