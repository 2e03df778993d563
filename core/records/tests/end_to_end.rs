//! Full flows over the persistent backends.

use std::sync::Arc;
use tempfile::TempDir;

use nutrivault_common::{Error, UserId};
use nutrivault_records::{CoreContext, NewUser, USERS_COLLECTION};
use nutrivault_storage::{DocumentStore, FileStore, RecordStore};

const KEY: &[u8] = b"0123456789abcdef";

fn file_store(dir: &TempDir) -> Arc<dyn RecordStore> {
    Arc::new(FileStore::new(dir.path()).unwrap())
}

fn document_store(dir: &TempDir) -> Arc<dyn RecordStore> {
    Arc::new(DocumentStore::open(dir.path().join("records.db")).unwrap())
}

/// Each persistent backend, opened fresh on a directory.
fn openers() -> Vec<(&'static str, fn(&TempDir) -> Arc<dyn RecordStore>)> {
    vec![("file", file_store), ("document", document_store)]
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
async fn register_login_update() {
    for (name, open) in openers() {
        let dir = TempDir::new().unwrap();
        let ctx = CoreContext::open(KEY, open(&dir)).await.unwrap();
        let users = ctx.users();

        let id = users.register(alice()).await.unwrap();
        assert_eq!(id.get(), 1, "backend {}", name);

        let profile = users.authenticate("a@x.com", "pw1").await.unwrap();
        assert_eq!(profile.full_name, "Alice");
        assert!(profile.health_issues.is_empty());

        users
            .update_health_issues(id, &["asthma".to_string()])
            .await
            .unwrap();
        let profile = users.authenticate("a@x.com", "pw1").await.unwrap();
        assert_eq!(profile.health_issues, ["asthma"], "backend {}", name);

        assert!(matches!(
            users.register(alice()).await,
            Err(Error::DuplicateEmail)
        ));
        let bob = NewUser {
            email: "b@x.com".to_string(),
            ..alice()
        };
        assert_eq!(users.register(bob).await.unwrap().get(), 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_registrations_all_succeed() {
    for (name, open) in openers() {
        let dir = TempDir::new().unwrap();
        let ctx = CoreContext::open(KEY, open(&dir)).await.unwrap();

        let mut handles = Vec::new();
        for i in 0..30 {
            let users = ctx.users();
            handles.push(tokio::spawn(async move {
                users
                    .register(NewUser {
                        email: format!("user{}@x.com", i),
                        ..alice()
                    })
                    .await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().get());
        }
        ids.sort_unstable();
        assert_eq!(ids, (1..=30).collect::<Vec<u64>>(), "backend {}", name);

        let profile = ctx.users().authenticate("user17@x.com", "pw1").await.unwrap();
        assert_eq!(profile.full_name, "Alice", "backend {}", name);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_duplicate_email_registers_once() {
    for (name, open) in openers() {
        let dir = TempDir::new().unwrap();
        let ctx = CoreContext::open(KEY, open(&dir)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..10 {
            let users = ctx.users();
            handles.push(tokio::spawn(async move { users.register(alice()).await }));
        }

        let mut registered = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => registered += 1,
                Err(e) => assert!(matches!(e, Error::DuplicateEmail), "backend {}: {:?}", name, e),
            }
        }
        assert_eq!(registered, 1, "backend {}", name);
    }
}

#[tokio::test]
async fn data_survives_reopen() {
    for (name, open) in openers() {
        let dir = TempDir::new().unwrap();
        {
            let ctx = CoreContext::open(KEY, open(&dir)).await.unwrap();
            let id = ctx.users().register(alice()).await.unwrap();
            ctx.history().record_extraction(id, "sugar").await.unwrap();
        }

        let ctx = CoreContext::open(KEY, open(&dir)).await.unwrap();
        let profile = ctx.users().authenticate("a@x.com", "pw1").await.unwrap();
        let items = ctx.history().list(profile.user_id).await.unwrap();
        assert_eq!(
            items[0].extracted_text.as_deref(),
            Some("sugar"),
            "backend {}",
            name
        );
    }
}

#[tokio::test]
async fn history_positional_delete() {
    for (name, open) in openers() {
        let dir = TempDir::new().unwrap();
        let ctx = CoreContext::open(KEY, open(&dir)).await.unwrap();
        let history = ctx.history();
        let u = UserId::new(1).unwrap();
        let other = UserId::new(2).unwrap();

        history.record_extraction(u, "A").await.unwrap();
        history.record_extraction(other, "x").await.unwrap();
        history.record_extraction(u, "B").await.unwrap();
        history.record_extraction(u, "C").await.unwrap();

        history.delete_at(u, 1).await.unwrap();
        let texts: Vec<_> = history
            .list(u)
            .await
            .unwrap()
            .into_iter()
            .filter_map(|i| i.extracted_text)
            .collect();
        assert_eq!(texts, ["A", "C"], "backend {}", name);

        assert!(matches!(
            history.delete_at(u, 5).await,
            Err(Error::PositionOutOfRange { position: 5, count: 2 })
        ));
        assert_eq!(history.list(other).await.unwrap().len(), 1);
    }
}

#[tokio::test]
async fn corrupted_user_file_loads_empty() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("users.json"), "[{\"userId\": 1,").unwrap();

    let ctx = CoreContext::open(KEY, file_store(&dir)).await.unwrap();
    assert!(ctx.store().find_all(USERS_COLLECTION, &Default::default()).await.unwrap().is_empty());
    assert_eq!(ctx.users().register(alice()).await.unwrap().get(), 1);
}

#[tokio::test]
async fn wrong_key_refuses_to_start() {
    for (name, open) in openers() {
        let dir = TempDir::new().unwrap();
        {
            let ctx = CoreContext::open(KEY, open(&dir)).await.unwrap();
            ctx.users().register(alice()).await.unwrap();
        }

        // Without an auth tag a wrong key can decrypt to valid text by
        // chance; across several keys at least one must be refused.
        let mut refused = 0;
        for k in b'a'..b'i' {
            match CoreContext::open(&[k; 16], open(&dir)).await {
                Err(e) => {
                    assert!(matches!(e, Error::KeyMismatch), "backend {}", name);
                    assert!(e.is_fatal());
                    refused += 1;
                }
                Ok(_) => {}
            }
        }
        assert!(refused > 0, "backend {}", name);
    }
}
