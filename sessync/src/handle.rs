//! Scoped storage handles and bounded suspension points.

use sessync_storage::{Database, StorageError};
use std::future::Future;
use std::ops::Deref;
use std::time::Duration;
use tracing::trace;

/// Owns an open database connection and closes it when dropped, on every
/// exit path of the export or import that opened it.
pub(crate) struct DatabaseGuard {
    db: Box<dyn Database>,
}

impl DatabaseGuard {
    pub(crate) fn new(db: Box<dyn Database>) -> Self {
        Self { db }
    }
}

impl Deref for DatabaseGuard {
    type Target = dyn Database;

    fn deref(&self) -> &Self::Target {
        self.db.as_ref()
    }
}

impl Drop for DatabaseGuard {
    fn drop(&mut self) {
        self.db.close();
        trace!(db = self.db.name(), "Closed database");
    }
}

/// Await a storage call, failing with `StorageError::Timeout` once `limit`
/// elapses. Without a limit the call may wait indefinitely.
pub(crate) async fn bounded<T, F>(
    limit: Option<Duration>,
    operation: &str,
    fut: F,
) -> Result<T, StorageError>
where
    F: Future<Output = Result<T, StorageError>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            StorageError::Timeout(format!("{} did not finish within {:?}", operation, limit))
        })?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sessync_storage::{MemoryProvider, StorageProvider, TransactionMode};

    #[tokio::test]
    async fn test_guard_closes_on_drop() {
        let provider = MemoryProvider::new();
        provider.insert_records("notes", "items", vec![]);
        let scope = vec!["items".to_string()];

        let guard = DatabaseGuard::new(provider.open("notes", None, None).await.unwrap());
        assert!(guard
            .transaction(&scope, TransactionMode::ReadOnly)
            .await
            .is_ok());
        drop(guard);

        // A fresh connection is unaffected
        let db = provider.open("notes", None, None).await.unwrap();
        assert!(db.transaction(&scope, TransactionMode::ReadOnly).await.is_ok());
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, StorageError>(())
        };
        let err = bounded(Some(Duration::from_millis(10)), "slow call", slow)
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("slow call"));
    }

    #[tokio::test]
    async fn test_bounded_passes_through() {
        let value = bounded(None, "fast", async { Ok::<_, StorageError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }
}
