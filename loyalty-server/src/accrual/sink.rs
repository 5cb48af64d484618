//! Batch sink
//!
//! A drain task appends incoming status updates to an accumulator; a flush
//! task swaps the accumulator for an empty one on every tick and writes the
//! captured batch in one upsert. A batch that fails to persist is dropped;
//! its orders are still non-terminal and get polled again.

use parking_lot::Mutex;
use shared::models::StatusUpdate;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::AccrualStore;
use crate::error::LedgerError;

pub struct BatchSink<S> {
    store: Arc<S>,
    pending: Arc<Mutex<Vec<StatusUpdate>>>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl<S> Clone for BatchSink<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            pending: self.pending.clone(),
            interval: self.interval,
            shutdown: self.shutdown.clone(),
        }
    }
}

impl<S: AccrualStore> BatchSink<S> {
    pub fn new(store: Arc<S>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            store,
            pending: Arc::new(Mutex::new(Vec::new())),
            interval,
            shutdown,
        }
    }

    /// Number of updates waiting for the next flush
    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Append incoming updates until the workers are gone or shutdown;
    /// the receiver is dropped on return.
    pub async fn drain(self, rx: flume::Receiver<StatusUpdate>) {
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = rx.recv_async() => match next {
                    Ok(update) => self.pending.lock().push(update),
                    Err(_) => break,
                },
            }
        }
        tracing::debug!("Status drain stopped");
    }

    /// Flush on every tick until shutdown. Unflushed updates are dropped.
    pub async fn run(self) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    self.flush().await;
                }
            }
        }

        let dropped = self.pending_len();
        if dropped > 0 {
            tracing::warn!(dropped, "Batch sink stopped with unflushed status updates");
        } else {
            tracing::debug!("Batch sink stopped");
        }
    }

    /// Swap out the accumulator and persist it; returns the captured batch size
    pub async fn flush(&self) -> usize {
        let batch = std::mem::take(&mut *self.pending.lock());
        if batch.is_empty() {
            return 0;
        }

        let size = batch.len();
        match self.store.apply_statuses(batch).await {
            Ok(rows) => {
                tracing::debug!(batch = size, rows, "Accrual batch persisted");
            }
            Err(LedgerError::Cancelled) => {
                tracing::info!(batch = size, "Accrual batch dropped on shutdown");
            }
            Err(e) => {
                tracing::error!(batch = size, error = %e, "Failed to persist accrual batch, dropping it");
            }
        }
        size
    }
}
