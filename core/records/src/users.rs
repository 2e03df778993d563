//! User directory: registration, login, and profile updates.
//!
//! Each PII value is stored as two projections. The encrypted field is what
//! gets decrypted for the caller; the lookup digest is what equality search
//! runs against. Email and password are kept only as digests.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::USERS_COLLECTION;
use nutrivault_common::{Error, Result, UserId};
use nutrivault_crypto::{EncryptedField, FieldCipher, LookupDigest};
use nutrivault_storage::{Filter, Mutation, RecordStore};

/// A user as persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub user_id: UserId,
    pub full_name: EncryptedField,
    pub email_digest: LookupDigest,
    pub password_digest: LookupDigest,
    #[serde(default)]
    pub health_issues: Vec<EncryptedField>,
    #[serde(default)]
    pub dob: Option<EncryptedField>,
}

impl UserRecord {
    fn from_document(doc: serde_json::Value) -> Result<Self> {
        serde_json::from_value(doc).map_err(|e| Error::Serialization(e.to_string()))
    }
}

/// Registration input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub password: String,
    pub health_issues: Vec<String>,
    pub dob: Option<String>,
}

/// A fully decrypted user, as handed to callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub user_id: UserId,
    pub full_name: String,
    /// Present only after login; the stored digest cannot be reversed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub health_issues: Vec<String>,
    pub dob: Option<String>,
}

/// Identity records on top of a record store.
#[derive(Clone)]
pub struct UserDirectory {
    cipher: Arc<FieldCipher>,
    store: Arc<dyn RecordStore>,
}

impl UserDirectory {
    /// Create a directory over `store`, encrypting with `cipher`.
    pub fn new(cipher: Arc<FieldCipher>, store: Arc<dyn RecordStore>) -> Self {
        Self { cipher, store }
    }

    fn email_filter(&self, email: &str) -> Filter {
        Filter::eq("emailDigest", self.cipher.digest(email).to_hex())
    }

    fn id_filter(user_id: UserId) -> Filter {
        Filter::eq("userId", user_id.get())
    }

    /// Register a new user.
    ///
    /// # Postconditions
    /// - The new id is `max(existing) + 1`, or 1 for an empty directory,
    ///   assigned atomically with the insert
    ///
    /// # Errors
    /// - `Validation` if full name, email or password is empty
    /// - `DuplicateEmail` if the email digest is already present
    pub async fn register(&self, new_user: NewUser) -> Result<UserId> {
        if new_user.full_name.trim().is_empty()
            || new_user.email.trim().is_empty()
            || new_user.password.is_empty()
        {
            return Err(Error::Validation("Missing fields".to_string()));
        }

        if self
            .store
            .find_one(USERS_COLLECTION, &self.email_filter(&new_user.email))
            .await?
            .is_some()
        {
            return Err(Error::DuplicateEmail);
        }

        // The store overwrites userId with the next free number.
        let record = UserRecord {
            user_id: UserId::FIRST,
            full_name: self.cipher.encrypt(&new_user.full_name),
            email_digest: self.cipher.digest(&new_user.email),
            password_digest: self.cipher.digest(&new_user.password),
            health_issues: self.cipher.encrypt_all(&new_user.health_issues),
            dob: new_user
                .dob
                .as_deref()
                .filter(|d| !d.is_empty())
                .map(|d| self.cipher.encrypt(d)),
        };

        let assigned = self
            .store
            .append_numbered(USERS_COLLECTION, "userId", serde_json::to_value(&record)?)
            .await
            .map_err(|e| match e {
                Error::UniqueViolation { field } if field == "emailDigest" => Error::DuplicateEmail,
                other => other,
            })?;

        let user_id = u64::try_from(assigned)
            .map_err(|_| Error::Storage(format!("Invalid user id assigned: {}", assigned)))
            .and_then(UserId::new)?;
        info!(user_id = %user_id, "User registered");
        Ok(user_id)
    }

    /// Check credentials and return the decrypted profile.
    ///
    /// # Errors
    /// - `Validation` if email or password is empty
    /// - `InvalidCredentials` for an unknown email and for a wrong password
    ///   alike
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<UserProfile> {
        if email.is_empty() || password.is_empty() {
            return Err(Error::Validation("Missing fields".to_string()));
        }

        let password_digest = self.cipher.digest(password);
        let record = self
            .store
            .find_one(USERS_COLLECTION, &self.email_filter(email))
            .await?
            .map(UserRecord::from_document)
            .transpose()?;

        match record {
            Some(record) if record.password_digest == password_digest => {
                let mut profile = self.decrypt_profile(&record)?;
                profile.email = Some(email.to_string());
                debug!(user_id = %record.user_id, "User authenticated");
                Ok(profile)
            }
            _ => Err(Error::InvalidCredentials),
        }
    }

    /// Decrypted profile by id, without the email.
    ///
    /// # Errors
    /// - `UserNotFound` if the id is absent
    pub async fn profile(&self, user_id: UserId) -> Result<UserProfile> {
        let record = self
            .store
            .find_one(USERS_COLLECTION, &Self::id_filter(user_id))
            .await?
            .ok_or(Error::UserNotFound(user_id.get()))?;
        self.decrypt_profile(&UserRecord::from_document(record)?)
    }

    /// Replace the user's health issues.
    ///
    /// # Errors
    /// - `UserNotFound` if the id is absent
    pub async fn update_health_issues(&self, user_id: UserId, issues: &[String]) -> Result<()> {
        let encrypted = serde_json::to_value(self.cipher.encrypt_all(issues))?;
        self.update(user_id, Mutation::set("healthIssues", encrypted))
            .await?;
        info!(user_id = %user_id, count = issues.len(), "Health issues updated");
        Ok(())
    }

    /// Set or clear the user's date of birth.
    ///
    /// `None` and the empty string both clear it.
    ///
    /// # Errors
    /// - `UserNotFound` if the id is absent
    pub async fn update_dob(&self, user_id: UserId, dob: Option<&str>) -> Result<()> {
        let value = match dob.filter(|d| !d.is_empty()) {
            Some(d) => serde_json::to_value(self.cipher.encrypt(d))?,
            None => serde_json::Value::Null,
        };
        self.update(user_id, Mutation::set("dob", value)).await?;
        info!(user_id = %user_id, "Date of birth updated");
        Ok(())
    }

    async fn update(&self, user_id: UserId, mutation: Mutation) -> Result<()> {
        let matched = self
            .store
            .update_one(USERS_COLLECTION, &Self::id_filter(user_id), &mutation)
            .await?;
        if !matched {
            return Err(Error::UserNotFound(user_id.get()));
        }
        Ok(())
    }

    fn decrypt_profile(&self, record: &UserRecord) -> Result<UserProfile> {
        let decrypt = || -> Result<UserProfile> {
            Ok(UserProfile {
                user_id: record.user_id,
                full_name: self.cipher.decrypt(&record.full_name)?,
                email: None,
                health_issues: self.cipher.decrypt_all(&record.health_issues)?,
                dob: self.cipher.decrypt_opt(record.dob.as_ref())?,
            })
        };
        decrypt().inspect_err(|e| {
            error!(user_id = %record.user_id, error = %e, "Stored user data could not be decrypted");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nutrivault_crypto::SymmetricKey;
    use nutrivault_storage::MemoryStore;

    fn directory() -> (UserDirectory, Arc<dyn RecordStore>) {
        let cipher = Arc::new(FieldCipher::new(SymmetricKey::from_bytes([9u8; 16])));
        let store: Arc<dyn RecordStore> = Arc::new(MemoryStore::new());
        (UserDirectory::new(cipher, store.clone()), store)
    }

    fn alice() -> NewUser {
        NewUser {
            full_name: "Alice".to_string(),
            email: "a@x.com".to_string(),
            password: "pw1".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_register_assigns_sequential_ids() {
        let (users, _) = directory();
        assert_eq!(users.register(alice()).await.unwrap().get(), 1);

        let bob = NewUser {
            email: "b@x.com".to_string(),
            ..alice()
        };
        assert_eq!(users.register(bob).await.unwrap().get(), 2);
    }

    #[tokio::test]
    async fn test_register_duplicate_email() {
        let (users, _) = directory();
        users.register(alice()).await.unwrap();
        assert!(matches!(
            users.register(alice()).await,
            Err(Error::DuplicateEmail)
        ));
    }

    #[tokio::test]
    async fn test_register_missing_fields() {
        let (users, _) = directory();
        let missing = NewUser {
            password: String::new(),
            ..alice()
        };
        match users.register(missing).await {
            Err(Error::Validation(msg)) => assert_eq!(msg, "Missing fields"),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stored_record_has_no_plaintext() {
        let (users, store) = directory();
        users
            .register(NewUser {
                health_issues: vec!["asthma".to_string()],
                dob: Some("1990-05-01".to_string()),
                ..alice()
            })
            .await
            .unwrap();

        let raw = store
            .find_one(USERS_COLLECTION, &Filter::all())
            .await
            .unwrap()
            .unwrap()
            .to_string();
        for secret in ["Alice", "a@x.com", "pw1", "asthma", "1990-05-01"] {
            assert!(!raw.contains(secret), "{} leaked", secret);
        }
    }

    #[tokio::test]
    async fn test_authenticate_does_not_distinguish_failures() {
        let (users, _) = directory();
        users.register(alice()).await.unwrap();

        let wrong_password = users.authenticate("a@x.com", "nope").await.unwrap_err();
        let unknown_email = users.authenticate("z@x.com", "pw1").await.unwrap_err();

        assert!(matches!(wrong_password, Error::InvalidCredentials));
        assert!(matches!(unknown_email, Error::InvalidCredentials));
        assert_eq!(wrong_password.to_string(), unknown_email.to_string());
        assert_eq!(wrong_password.public_message(), unknown_email.public_message());
    }

    #[tokio::test]
    async fn test_authenticate_returns_decrypted_profile() {
        let (users, _) = directory();
        users
            .register(NewUser {
                health_issues: vec!["gout".to_string(), "asthma".to_string()],
                dob: Some("1990-05-01".to_string()),
                ..alice()
            })
            .await
            .unwrap();

        let profile = users.authenticate("a@x.com", "pw1").await.unwrap();
        assert_eq!(profile.user_id.get(), 1);
        assert_eq!(profile.full_name, "Alice");
        assert_eq!(profile.email.as_deref(), Some("a@x.com"));
        assert_eq!(profile.health_issues, ["gout", "asthma"]);
        assert_eq!(profile.dob.as_deref(), Some("1990-05-01"));
    }

    #[tokio::test]
    async fn test_updates() {
        let (users, _) = directory();
        let id = users.register(alice()).await.unwrap();

        users
            .update_health_issues(id, &["asthma".to_string()])
            .await
            .unwrap();
        users.update_dob(id, Some("2001-01-31")).await.unwrap();

        let profile = users.profile(id).await.unwrap();
        assert_eq!(profile.health_issues, ["asthma"]);
        assert_eq!(profile.dob.as_deref(), Some("2001-01-31"));
        assert_eq!(profile.email, None);

        users.update_dob(id, Some("")).await.unwrap();
        assert_eq!(users.profile(id).await.unwrap().dob, None);
    }

    #[tokio::test]
    async fn test_updates_unknown_user() {
        let (users, _) = directory();
        let ghost = UserId::new(42).unwrap();
        assert!(matches!(
            users.update_health_issues(ghost, &[]).await,
            Err(Error::UserNotFound(42))
        ));
        assert!(matches!(
            users.update_dob(ghost, None).await,
            Err(Error::UserNotFound(42))
        ));
        assert!(matches!(
            users.profile(ghost).await,
            Err(Error::UserNotFound(42))
        ));
    }

    #[tokio::test]
    async fn test_undecryptable_profile_surfaces_integrity_error() {
        let (users, store) = directory();
        let id = users.register(alice()).await.unwrap();

        // "Alice" fits one block padded with 0x0b; flipping the last IV byte
        // by 0x0b turns the final pad byte into 0x00, which never unpads.
        let doc = store
            .find_one(USERS_COLLECTION, &Filter::eq("userId", id.get()))
            .await
            .unwrap()
            .unwrap();
        let encoded = doc["fullName"].as_str().unwrap().to_string();
        let (iv_hex, ct_hex) = encoded.split_once(':').unwrap();
        let mut iv = hex::decode(iv_hex).unwrap();
        iv[15] ^= 0x0b;
        let tampered = format!("{}:{}", hex::encode(iv), ct_hex);

        store
            .update_one(
                USERS_COLLECTION,
                &Filter::eq("userId", id.get()),
                &Mutation::set("fullName", tampered),
            )
            .await
            .unwrap();

        let err = users.profile(id).await.unwrap_err();
        assert_eq!(err.kind(), nutrivault_common::ErrorKind::Integrity);
        assert_eq!(err.public_message(), "Stored data could not be decrypted");
    }
}
