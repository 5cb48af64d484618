//! Retry executor
//!
//! Every ledger operation is a [`UnitOfWork`] run by [`TxRunner`] inside its
//! own transaction. Connection failures are retried on a fixed schedule
//! (immediately, then after 1s, 3s and 5s); any other error is returned on
//! the spot. Pauses between attempts race the shared shutdown token and end
//! the call with [`LedgerError::Cancelled`].

use async_trait::async_trait;
use sqlx::{PgConnection, PgPool};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::error::LedgerError;

/// One transactional operation against the ledger
///
/// `run` may be invoked several times, each time on a fresh transaction.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    type Output: Send;

    /// Operation name for logs
    const NAME: &'static str;

    async fn run(&self, conn: &mut PgConnection) -> Result<Self::Output, LedgerError>;
}

/// Pauses between attempts; `backoff.len() + 1` attempts in total
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub backoff: Vec<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            backoff: vec![
                Duration::from_secs(1),
                Duration::from_secs(3),
                Duration::from_secs(5),
            ],
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> usize {
        self.backoff.len() + 1
    }
}

/// Drive `attempt` until it succeeds, fails fatally or the schedule runs out
///
/// After the last pause the final transient error is returned as is.
pub async fn with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    shutdown: &CancellationToken,
    op: &'static str,
    mut attempt: F,
) -> Result<T, LedgerError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LedgerError>>,
{
    let mut pauses = policy.backoff.iter();
    let mut tries = 0usize;

    loop {
        tries += 1;
        let err = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_transient() => e,
            Err(e) => return Err(e),
        };

        let Some(pause) = pauses.next() else {
            tracing::error!(op, attempts = tries, error = %err, "Giving up after transient failures");
            return Err(err);
        };

        tracing::warn!(
            op,
            attempt = tries,
            retry_in = ?pause,
            error = %err,
            "Transient database failure, retrying"
        );

        tokio::select! {
            _ = shutdown.cancelled() => {
                tracing::debug!(op, "Retry abandoned on shutdown");
                return Err(LedgerError::Cancelled);
            }
            _ = tokio::time::sleep(*pause) => {}
        }
    }
}

/// Runs units of work in transactions under a [`RetryPolicy`]
#[derive(Clone)]
pub struct TxRunner {
    pool: PgPool,
    policy: RetryPolicy,
    shutdown: CancellationToken,
}

impl TxRunner {
    pub fn new(pool: PgPool, shutdown: CancellationToken) -> Self {
        Self::with_policy(pool, RetryPolicy::default(), shutdown)
    }

    pub fn with_policy(pool: PgPool, policy: RetryPolicy, shutdown: CancellationToken) -> Self {
        Self {
            pool,
            policy,
            shutdown,
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn run<W: UnitOfWork>(&self, work: &W) -> Result<W::Output, LedgerError> {
        with_backoff(&self.policy, &self.shutdown, W::NAME, || self.attempt(work)).await
    }

    /// One attempt: begin, run, then commit or roll back
    async fn attempt<W: UnitOfWork>(&self, work: &W) -> Result<W::Output, LedgerError> {
        let mut tx = self.pool.begin().await?;

        match work.run(&mut *tx).await {
            Ok(output) => {
                tx.commit().await?;
                Ok(output)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    tracing::warn!(op = W::NAME, error = %rollback, "Rollback failed");
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::ErrorKind;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::time::Instant;

    fn refused() -> LedgerError {
        LedgerError::Database(sqlx::Error::Io(std::io::Error::from(
            ErrorKind::ConnectionRefused,
        )))
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_is_immediate() {
        let start = Instant::now();
        let calls = &AtomicUsize::new(0);

        let out = with_backoff(&RetryPolicy::default(), &CancellationToken::new(), "t", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok::<_, LedgerError>(7)
        })
        .await;

        assert_eq!(out.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let start = Instant::now();
        let calls = &AtomicUsize::new(0);

        let out = with_backoff(&RetryPolicy::default(), &CancellationToken::new(), "t", || async move {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(refused())
            } else {
                Ok("done")
            }
        })
        .await;

        assert_eq!(out.unwrap(), "done");
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(start.elapsed(), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_is_not_retried() {
        let calls = &AtomicUsize::new(0);

        let out = with_backoff(&RetryPolicy::default(), &CancellationToken::new(), "t", || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(LedgerError::InsufficientFunds)
        })
        .await;

        assert!(matches!(out, Err(LedgerError::InsufficientFunds)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_returns_last_transient_error() {
        let start = Instant::now();
        let calls = &AtomicUsize::new(0);

        let out = with_backoff(&RetryPolicy::default(), &CancellationToken::new(), "t", || async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            let kind = if n == 3 {
                ErrorKind::ConnectionReset
            } else {
                ErrorKind::ConnectionRefused
            };
            Err::<(), _>(LedgerError::Database(sqlx::Error::Io(kind.into())))
        })
        .await;

        match out {
            Err(LedgerError::Database(sqlx::Error::Io(e))) => {
                assert_eq!(e.kind(), ErrorKind::ConnectionReset)
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_pause() {
        let shutdown = CancellationToken::new();
        let calls = Arc::new(AtomicUsize::new(0));

        let canceller = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(500)).await;
            canceller.cancel();
        });

        let counter = calls.clone();
        let out = with_backoff(&RetryPolicy::default(), &shutdown, "t", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(refused())
            }
        })
        .await;

        assert!(matches!(out, Err(LedgerError::Cancelled)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_policy_attempts() {
        assert_eq!(RetryPolicy::default().max_attempts(), 4);
        assert_eq!(RetryPolicy { backoff: Vec::new() }.max_attempts(), 1);
    }
}
