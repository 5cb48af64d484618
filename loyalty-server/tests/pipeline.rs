//! Accrual pipeline against a fake oracle
//!
//! The oracle is a small axum app on an ephemeral port; the ledger is an
//! in-memory `AccrualStore` that follows the same upsert rules as Postgres.

use async_trait::async_trait;
use axum::Router;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::http::header::RETRY_AFTER;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use parking_lot::Mutex;
use serde_json::json;
use shared::models::{OrderStatus, StatusUpdate};
use shared::money::Points;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use loyalty_server::AccrualConfig;
use loyalty_server::accrual::{AccrualClient, AccrualStore, StatusWorker, start_pipeline};
use loyalty_server::core::BackgroundTasks;
use loyalty_server::db::ledger::prepare_batch;
use loyalty_server::error::LedgerError;

// ========== Fake oracle ==========

#[derive(Clone)]
enum Reply {
    Json(serde_json::Value),
    Status(u16),
    RateLimited(u64),
    Raw(&'static str),
}

#[derive(Clone, Default)]
struct Oracle {
    replies: Arc<Mutex<HashMap<String, Reply>>>,
    hits: Arc<Mutex<Vec<String>>>,
}

impl Oracle {
    fn reply(&self, number: &str, reply: Reply) {
        self.replies.lock().insert(number.to_string(), reply);
    }

    fn processed(&self, number: &str, accrual: f64) {
        self.reply(
            number,
            Reply::Json(json!({ "order": number, "status": "PROCESSED", "accrual": accrual })),
        );
    }

    fn hits_for(&self, number: &str) -> usize {
        self.hits.lock().iter().filter(|n| *n == number).count()
    }

    async fn serve(&self) -> String {
        let app = Router::new()
            .route("/api/orders/{number}", get(answer))
            .with_state(self.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }
}

async fn answer(State(oracle): State<Oracle>, Path(number): Path<String>) -> Response {
    oracle.hits.lock().push(number.clone());
    let reply = oracle
        .replies
        .lock()
        .get(&number)
        .cloned()
        .unwrap_or(Reply::Status(204));

    match reply {
        Reply::Json(body) => axum::Json(body).into_response(),
        Reply::Status(code) => StatusCode::from_u16(code).unwrap().into_response(),
        Reply::RateLimited(secs) => {
            (StatusCode::TOO_MANY_REQUESTS, [(RETRY_AFTER, secs.to_string())]).into_response()
        }
        Reply::Raw(body) => (StatusCode::OK, body).into_response(),
    }
}

// ========== In-memory ledger ==========

#[derive(Default)]
struct MemoryStore {
    /// order -> (status, amount, seq)
    entries: Mutex<HashMap<String, Vec<(OrderStatus, Points, u64)>>>,
    seq: Mutex<u64>,
}

impl MemoryStore {
    fn with_orders(numbers: &[&str]) -> Self {
        let store = Self::default();
        for number in numbers {
            let seq = store.next_seq();
            store
                .entries
                .lock()
                .insert(number.to_string(), vec![(OrderStatus::New, Points::ZERO, seq)]);
        }
        store
    }

    fn next_seq(&self) -> u64 {
        let mut seq = self.seq.lock();
        *seq += 1;
        *seq
    }

    fn current(&self, number: &str) -> Option<(OrderStatus, Points)> {
        self.entries.lock().get(number).and_then(|rows| {
            rows.iter()
                .max_by_key(|(_, _, seq)| *seq)
                .map(|(status, amount, _)| (*status, *amount))
        })
    }
}

#[async_trait]
impl AccrualStore for MemoryStore {
    async fn pending_orders(&self) -> Result<Vec<String>, LedgerError> {
        let numbers: Vec<String> = self.entries.lock().keys().cloned().collect();
        Ok(numbers
            .into_iter()
            .filter(|n| matches!(self.current(n), Some((status, _)) if status.needs_refresh()))
            .collect())
    }

    async fn apply_statuses(&self, batch: Vec<StatusUpdate>) -> Result<u64, LedgerError> {
        let mut written = 0;
        for update in prepare_batch(batch) {
            let seq = self.next_seq();
            let mut entries = self.entries.lock();
            let Some(rows) = entries.get_mut(&update.order) else {
                continue;
            };
            let blocked = rows
                .iter()
                .any(|(status, _, _)| status.is_terminal() && *status != update.status);
            if blocked {
                continue;
            }
            match rows.iter_mut().find(|(status, _, _)| *status == update.status) {
                Some(row) => row.1 = update.accrual,
                None => rows.push((update.status, update.accrual, seq)),
            }
            written += 1;
        }
        Ok(written)
    }
}

// ========== Helpers ==========

fn client(base_url: &str) -> AccrualClient {
    AccrualClient::new(base_url, Duration::from_secs(2)).unwrap()
}

/// Feed `numbers` to a single worker and collect what it forwards
async fn run_worker(base_url: &str, numbers: &[&str]) -> Vec<StatusUpdate> {
    let (order_tx, order_rx) = flume::bounded(16);
    let (status_tx, status_rx) = flume::bounded(16);
    for number in numbers {
        order_tx.send_async(number.to_string()).await.unwrap();
    }
    drop(order_tx);

    let worker = StatusWorker::new(0, client(base_url), CancellationToken::new());
    tokio::time::timeout(Duration::from_secs(10), worker.run(order_rx, status_tx))
        .await
        .expect("worker did not stop after the queue closed");

    status_rx.drain().collect()
}

async fn wait_until(mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

// ========== Worker ==========

#[tokio::test]
async fn test_worker_forwards_well_formed_answer() {
    let oracle = Oracle::default();
    oracle.processed("79927398713", 729.98);
    let base = oracle.serve().await;

    let updates = run_worker(&base, &["79927398713"]).await;

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].order, "79927398713");
    assert_eq!(updates[0].status, OrderStatus::Processed);
    assert_eq!(updates[0].accrual, Points::from_minor(729_980));
    assert!(updates[0].at > 0);
}

#[tokio::test]
async fn test_worker_skips_unusable_answers() {
    let oracle = Oracle::default();
    oracle.reply("1001", Reply::Status(500));
    // "1002" is unknown: 204
    oracle.reply("1003", Reply::Raw("not json"));
    oracle.reply(
        "1004",
        Reply::Json(json!({ "order": "9999", "status": "PROCESSED", "accrual": 10 })),
    );
    oracle.reply(
        "1005",
        Reply::Json(json!({ "order": "1005", "status": "REGISTERED" })),
    );
    oracle.reply(
        "1006",
        Reply::Json(json!({ "order": "1006", "status": "PROCESSED", "accrual": -5 })),
    );
    let base = oracle.serve().await;

    let updates = run_worker(&base, &["1001", "1002", "1003", "1004", "1005", "1006"]).await;

    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].order, "1005");
    assert_eq!(updates[0].status, OrderStatus::New);
    assert_eq!(updates[0].accrual, Points::ZERO);
    assert_eq!(oracle.hits.lock().len(), 6);
}

#[tokio::test]
async fn test_worker_pauses_on_rate_limit() {
    let oracle = Oracle::default();
    oracle.reply("2001", Reply::RateLimited(1));
    oracle.processed("2002", 5.0);
    let base = oracle.serve().await;

    let started = Instant::now();
    let updates = run_worker(&base, &["2001", "2002"]).await;

    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].order, "2002");
    // The limited order is not retried by the worker itself
    assert_eq!(oracle.hits_for("2001"), 1);
}

#[tokio::test]
async fn test_worker_stops_on_shutdown() {
    let oracle = Oracle::default();
    let base = oracle.serve().await;

    let (_order_tx, order_rx) = flume::bounded::<String>(1);
    let (status_tx, _status_rx) = flume::bounded(1);
    let shutdown = CancellationToken::new();
    let worker = StatusWorker::new(0, client(&base), shutdown.clone());
    let handle = tokio::spawn(worker.run(order_rx, status_tx));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("worker ignored cancellation")
        .unwrap();
}

// ========== Full pipeline ==========

fn fast_config(base_url: &str) -> AccrualConfig {
    AccrualConfig {
        base_url: base_url.to_string(),
        poll_interval: Duration::from_millis(50),
        flush_interval: Duration::from_millis(50),
        workers: 2,
        queue_capacity: 16,
        request_timeout: Duration::from_secs(2),
    }
}

#[tokio::test]
async fn test_processed_order_reaches_ledger() {
    let oracle = Oracle::default();
    oracle.processed("79927398713", 500.0);
    oracle.reply("12345678903", Reply::Status(500));
    let base = oracle.serve().await;

    let store = Arc::new(MemoryStore::with_orders(&["79927398713", "12345678903"]));
    let config = fast_config(&base);
    let mut tasks = BackgroundTasks::new();
    start_pipeline(store.clone(), client(&base), &config, &mut tasks);

    assert!(
        wait_until(|| store.current("79927398713") == Some((OrderStatus::Processed, Points::from(500))))
            .await
    );

    // The failing order stays refreshable and keeps being rediscovered
    assert!(wait_until(|| oracle.hits_for("12345678903") >= 2).await);
    assert_eq!(
        store.current("12345678903"),
        Some((OrderStatus::New, Points::ZERO))
    );
    let pending = store.pending_orders().await.unwrap();
    assert_eq!(pending, vec!["12345678903".to_string()]);

    // Terminal orders are no longer polled
    let settled = oracle.hits_for("79927398713");
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(oracle.hits_for("79927398713") <= settled + 2);

    tokio::time::timeout(Duration::from_secs(5), tasks.shutdown())
        .await
        .expect("pipeline did not stop");
}

#[tokio::test]
async fn test_terminal_status_is_not_overwritten() {
    let oracle = Oracle::default();
    oracle.processed("4001", 10.0);
    let base = oracle.serve().await;

    let store = Arc::new(MemoryStore::with_orders(&["4001"]));
    let mut tasks = BackgroundTasks::new();
    start_pipeline(store.clone(), client(&base), &fast_config(&base), &mut tasks);

    assert!(wait_until(|| store.current("4001") == Some((OrderStatus::Processed, Points::from(10)))).await);
    tasks.shutdown().await;

    // A late, stale answer for the same order changes nothing
    let stale = StatusUpdate {
        order: "4001".into(),
        status: OrderStatus::Processing,
        accrual: Points::ZERO,
        at: 0,
    };
    assert_eq!(store.apply_statuses(vec![stale]).await.unwrap(), 0);
    assert_eq!(store.current("4001"), Some((OrderStatus::Processed, Points::from(10))));
}
