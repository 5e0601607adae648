//! Lifecycle cancellation signal shared by every database operation of a server.

use crate::error::{DbError, DbResult};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// A cloneable, one-shot cancellation signal.
///
/// All clones observe the same state. Once cancelled a token stays cancelled;
/// a restarted server issues a fresh token.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Fire the signal. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the signal fires.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // The sender lives as long as any clone of this token, so this only
        // returns Err if the token itself is gone.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Run `fut`, failing with `Cancelled` when the signal fires first and with
    /// `Timeout` when `limit` elapses first.
    pub async fn run<T, F>(&self, operation: &str, limit: Duration, fut: F) -> DbResult<T>
    where
        F: Future<Output = DbResult<T>>,
    {
        if self.is_cancelled() {
            return Err(DbError::cancelled(operation));
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(DbError::cancelled(operation)),
            result = tokio::time::timeout(limit, fut) => match result {
                Ok(result) => result,
                Err(_) => Err(DbError::timeout(operation, limit.as_secs())),
            },
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await;
    }

    #[tokio::test]
    async fn test_run_completes() {
        let token = CancelToken::new();
        let value = token
            .run("op", Duration::from_secs(5), async { Ok::<_, DbError>(7) })
            .await
            .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn test_run_fails_fast_when_already_cancelled() {
        let token = CancelToken::new();
        token.cancel();
        let err = token
            .run("list tables", Duration::from_secs(5), async { Ok::<_, DbError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_run_interrupted_by_cancel() {
        let token = CancelToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = token
            .run("query", Duration::from_secs(30), async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok::<_, DbError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Cancelled { .. }));
    }

    #[tokio::test]
    async fn test_run_times_out() {
        let token = CancelToken::new();
        let err = token
            .run("query", Duration::from_millis(10), async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, DbError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Timeout { .. }));
    }
}
