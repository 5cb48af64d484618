//! Status worker
//!
//! Pulls order numbers off the shared queue, asks the oracle for each one and
//! forwards well-formed answers to the batch sink. Anything else is logged
//! and the order is left for the next discovery cycle.

use shared::models::StatusUpdate;
use shared::util::now_millis;
use tokio_util::sync::CancellationToken;

use super::client::{AccrualClient, OracleError};

pub struct StatusWorker {
    id: usize,
    client: AccrualClient,
    shutdown: CancellationToken,
}

impl StatusWorker {
    pub fn new(id: usize, client: AccrualClient, shutdown: CancellationToken) -> Self {
        Self {
            id,
            client,
            shutdown,
        }
    }

    /// Runs until the order queue is closed and drained, the sink is gone, or shutdown
    pub async fn run(self, rx: flume::Receiver<String>, tx: flume::Sender<StatusUpdate>) {
        tracing::debug!(worker = self.id, "Accrual worker started");

        loop {
            let number = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                next = rx.recv_async() => match next {
                    Ok(number) => number,
                    Err(_) => break,
                },
            };

            // In-flight lookups are abandoned on shutdown.
            let result = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                result = self.client.fetch(&number) => result,
            };

            match result {
                Ok(record) => {
                    tracing::debug!(
                        worker = self.id,
                        order = %number,
                        status = ?record.status,
                        "Accrual status received"
                    );
                    let update = StatusUpdate::from_record(record, now_millis());
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        sent = tx.send_async(update) => {
                            if sent.is_err() {
                                tracing::warn!(worker = self.id, "Status queue closed, worker stopping");
                                break;
                            }
                        }
                    }
                }
                Err(OracleError::RateLimited { retry_after }) => {
                    tracing::warn!(
                        worker = self.id,
                        order = %number,
                        retry_after = ?retry_after,
                        "Accrual system rate limit hit, pausing"
                    );
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = tokio::time::sleep(retry_after) => {}
                    }
                }
                Err(OracleError::NotRegistered) => {
                    tracing::debug!(worker = self.id, order = %number, "Order not registered in accrual system");
                }
                Err(e) => {
                    tracing::warn!(worker = self.id, order = %number, error = %e, "Accrual lookup failed");
                }
            }
        }

        tracing::debug!(worker = self.id, "Accrual worker stopped");
    }
}
