//! Accrual polling pipeline
//!
//! ```text
//! Collector --(order numbers)--> StatusWorker x N --(status updates)--> BatchSink --> ledger
//! ```
//!
//! Each arrow is a bounded flume channel, so a slow stage pushes back on the
//! one before it. All stages share the `BackgroundTasks` shutdown token; in
//! flight work is dropped on shutdown and rediscovered by the next collector
//! tick after restart.

pub mod client;
pub mod collector;
pub mod sink;
pub mod worker;

pub use client::{AccrualClient, OracleError};
pub use collector::Collector;
pub use sink::BatchSink;
pub use worker::StatusWorker;

use async_trait::async_trait;
use shared::models::StatusUpdate;
use std::sync::Arc;

use crate::config::AccrualConfig;
use crate::core::{BackgroundTasks, TaskKind};
use crate::error::LedgerError;

/// Ledger operations the pipeline depends on
#[async_trait]
pub trait AccrualStore: Send + Sync + 'static {
    /// Orders whose current status is not terminal
    async fn pending_orders(&self) -> Result<Vec<String>, LedgerError>;

    /// Persist a batch of results; returns rows written
    async fn apply_statuses(&self, batch: Vec<StatusUpdate>) -> Result<u64, LedgerError>;
}

/// Wire the collector, worker pool and batch sink onto `tasks`
pub fn start_pipeline<S: AccrualStore>(
    store: Arc<S>,
    client: AccrualClient,
    config: &AccrualConfig,
    tasks: &mut BackgroundTasks,
) {
    let shutdown = tasks.shutdown_token();
    let (order_tx, order_rx) = flume::bounded::<String>(config.queue_capacity);
    let (status_tx, status_rx) = flume::bounded::<StatusUpdate>(config.queue_capacity);

    let collector = Collector::new(store.clone(), config.poll_interval, shutdown.clone());
    tasks.spawn("accrual_collector", TaskKind::Periodic, collector.run(order_tx));

    for id in 0..config.workers.max(1) {
        let worker = StatusWorker::new(id, client.clone(), shutdown.clone());
        tasks.spawn(
            "accrual_worker",
            TaskKind::Worker,
            worker.run(order_rx.clone(), status_tx.clone()),
        );
    }
    // Workers own the remaining handles; channels close when they exit.
    drop(order_rx);
    drop(status_tx);

    let sink = BatchSink::new(store, config.flush_interval, shutdown);
    tasks.spawn("accrual_sink_drain", TaskKind::Listener, sink.clone().drain(status_rx));
    tasks.spawn("accrual_sink_flush", TaskKind::Periodic, sink.run());

    tracing::info!(
        workers = config.workers,
        oracle = %client.base_url(),
        poll_interval = ?config.poll_interval,
        flush_interval = ?config.flush_interval,
        "Accrual pipeline started"
    );
}
