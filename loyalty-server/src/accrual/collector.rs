//! Order discovery
//!
//! Every tick, asks the store for orders that are not terminal yet and feeds
//! them to the worker pool. A full queue blocks the collector; a failed
//! lookup is logged and the next tick tries again.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use super::AccrualStore;
use crate::error::LedgerError;

pub struct Collector<S> {
    store: Arc<S>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl<S: AccrualStore> Collector<S> {
    pub fn new(store: Arc<S>, interval: Duration, shutdown: CancellationToken) -> Self {
        Self {
            store,
            interval,
            shutdown,
        }
    }

    /// Runs until shutdown or until every worker is gone; dropping `tx` on
    /// return closes the order queue.
    pub async fn run(self, tx: flume::Sender<String>) {
        tracing::info!(interval = ?self.interval, "Accrual collector started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'ticks: loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let orders = match self.store.pending_orders().await {
                Ok(orders) => orders,
                Err(LedgerError::Cancelled) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Failed to load orders needing refresh");
                    continue;
                }
            };

            if !orders.is_empty() {
                tracing::debug!(count = orders.len(), "Queueing orders for accrual lookup");
            }

            for number in orders {
                tokio::select! {
                    _ = self.shutdown.cancelled() => break 'ticks,
                    sent = tx.send_async(number) => {
                        if sent.is_err() {
                            tracing::warn!("Order queue closed, collector stopping");
                            break 'ticks;
                        }
                    }
                }
            }
        }

        tracing::info!("Accrual collector stopped");
    }
}
