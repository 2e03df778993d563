//! Common types used throughout NutriVault.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric identifier of a registered user.
///
/// Always positive. Ids are assigned as `max(existing) + 1` and are not
/// guaranteed to be gap-free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u64", into = "u64")]
pub struct UserId(u64);

impl UserId {
    /// The id handed to the first user of an empty directory.
    pub const FIRST: Self = Self(1);

    /// Create a UserId.
    ///
    /// # Errors
    /// - Returns error if `id` is zero
    pub fn new(id: u64) -> crate::Result<Self> {
        if id == 0 {
            return Err(crate::Error::Validation(
                "User ID must be positive".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl TryFrom<u64> for UserId {
    type Error = crate::Error;

    fn try_from(id: u64) -> crate::Result<Self> {
        Self::new(id)
    }
}

impl From<UserId> for u64 {
    fn from(id: UserId) -> u64 {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_zero_fails() {
        assert!(UserId::new(0).is_err());
        assert_eq!(UserId::new(3).unwrap().get(), 3);
    }

    #[test]
    fn test_user_id_serde() {
        let id = UserId::new(42).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "42");
        let back: UserId = serde_json::from_str("42").unwrap();
        assert_eq!(back, id);
        assert!(serde_json::from_str::<UserId>("0").is_err());
    }
}
