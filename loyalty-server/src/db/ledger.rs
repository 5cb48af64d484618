//! Ledger units of work
//!
//! Append-only ledger of balance-affecting entries per order. Balances and
//! current statuses are derived here, never stored:
//!
//! - current status: latest non-`WITHDRAWN` entry of an order (by `seq`)
//! - current balance: `PROCESSED` sum minus `WITHDRAWN` sum
//!
//! Each operation is a command struct implementing [`UnitOfWork`]; the
//! [`Ledger`] facade runs them through the [`TxRunner`].

use async_trait::async_trait;
use shared::models::{Balance, OrderStatus, OrderView, StatusUpdate, User, Withdrawal};
use shared::money::Points;
use shared::util::now_millis;
use sqlx::PgConnection;
use std::collections::HashMap;

use super::retry::{TxRunner, UnitOfWork};
use crate::accrual::AccrualStore;
use crate::error::LedgerError;

/// Owner of an order after [`AddOrder`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderOwner {
    pub owner: String,
    /// `true` when this call inserted the order
    pub created: bool,
}

fn parse_status(raw: &str) -> Result<OrderStatus, LedgerError> {
    OrderStatus::from_db(raw).ok_or_else(|| LedgerError::corrupt(format!("unknown ledger status {raw:?}")))
}

// ========== Shared statements ==========

/// Insert the order unless it exists; returns the owner if this call inserted it
async fn insert_order(
    conn: &mut PgConnection,
    number: &str,
    owner: &str,
    now: i64,
) -> Result<Option<String>, LedgerError> {
    let inserted = sqlx::query_scalar::<_, String>(
        "INSERT INTO orders (number, user_login, uploaded_at) VALUES ($1, $2, $3)
         ON CONFLICT (number) DO NOTHING
         RETURNING user_login",
    )
    .bind(number)
    .bind(owner)
    .bind(now)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(inserted)
}

async fn order_owner(conn: &mut PgConnection, number: &str) -> Result<String, LedgerError> {
    sqlx::query_scalar::<_, String>("SELECT user_login FROM orders WHERE number = $1")
        .bind(number)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::NotFound("order"))
}

async fn balance_of(conn: &mut PgConnection, owner: &str) -> Result<Balance, LedgerError> {
    let (processed, withdrawn): (i64, i64) = sqlx::query_as(
        "SELECT COALESCE(SUM(l.amount) FILTER (WHERE l.status = 'PROCESSED'), 0)::BIGINT,
                COALESCE(SUM(l.amount) FILTER (WHERE l.status = 'WITHDRAWN'), 0)::BIGINT
         FROM ledger l
         JOIN orders o ON o.number = l.order_number
         WHERE o.user_login = $1",
    )
    .bind(owner)
    .fetch_one(&mut *conn)
    .await?;

    Ok(Balance {
        current: Points::from_minor(processed - withdrawn),
        withdrawn: Points::from_minor(withdrawn),
    })
}

// ========== Users ==========

pub struct GetUser {
    pub login: String,
}

#[async_trait]
impl UnitOfWork for GetUser {
    type Output = User;
    const NAME: &'static str = "get_user";

    async fn run(&self, conn: &mut PgConnection) -> Result<User, LedgerError> {
        sqlx::query_as::<_, User>(
            "SELECT login, password_hash, created_at FROM users WHERE login = $1",
        )
        .bind(&self.login)
        .fetch_optional(&mut *conn)
        .await?
        .ok_or(LedgerError::NotFound("user"))
    }
}

pub struct AddUser {
    pub login: String,
    pub password_hash: String,
}

#[async_trait]
impl UnitOfWork for AddUser {
    type Output = ();
    const NAME: &'static str = "add_user";

    async fn run(&self, conn: &mut PgConnection) -> Result<(), LedgerError> {
        sqlx::query("INSERT INTO users (login, password_hash, created_at) VALUES ($1, $2, $3)")
            .bind(&self.login)
            .bind(&self.password_hash)
            .bind(now_millis())
            .execute(&mut *conn)
            .await
            .map_err(LedgerError::on_unique("user"))?;
        Ok(())
    }
}

// ========== Orders ==========

/// Idempotent upload: new orders also get their initial `NEW` entry
pub struct AddOrder {
    pub number: String,
    pub owner: String,
}

#[async_trait]
impl UnitOfWork for AddOrder {
    type Output = OrderOwner;
    const NAME: &'static str = "add_order";

    async fn run(&self, conn: &mut PgConnection) -> Result<OrderOwner, LedgerError> {
        let now = now_millis();
        if let Some(owner) = insert_order(conn, &self.number, &self.owner, now).await? {
            sqlx::query(
                "INSERT INTO ledger (order_number, status, amount, created_at)
                 VALUES ($1, 'NEW', 0, $2)",
            )
            .bind(&self.number)
            .bind(now)
            .execute(&mut *conn)
            .await?;
            return Ok(OrderOwner {
                owner,
                created: true,
            });
        }

        Ok(OrderOwner {
            owner: order_owner(conn, &self.number).await?,
            created: false,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    number: String,
    status: String,
    amount: i64,
    uploaded_at: i64,
}

/// Orders of one user with their current status, oldest upload first
pub struct GetOrders {
    pub owner: String,
}

#[async_trait]
impl UnitOfWork for GetOrders {
    type Output = Vec<OrderView>;
    const NAME: &'static str = "get_orders";

    async fn run(&self, conn: &mut PgConnection) -> Result<Vec<OrderView>, LedgerError> {
        let rows = sqlx::query_as::<_, OrderRow>(
            "SELECT o.number, cur.status, cur.amount, o.uploaded_at
             FROM orders o
             JOIN LATERAL (
                 SELECT l.status, l.amount
                 FROM ledger l
                 WHERE l.order_number = o.number AND l.status <> 'WITHDRAWN'
                 ORDER BY l.seq DESC
                 LIMIT 1
             ) cur ON TRUE
             WHERE o.user_login = $1
             ORDER BY o.uploaded_at ASC, o.number ASC",
        )
        .bind(&self.owner)
        .fetch_all(&mut *conn)
        .await?;

        rows.into_iter()
            .map(|row| {
                let status = parse_status(&row.status)?;
                Ok(OrderView {
                    number: row.number,
                    status,
                    accrual: (status == OrderStatus::Processed)
                        .then(|| Points::from_minor(row.amount)),
                    uploaded_at: row.uploaded_at,
                })
            })
            .collect()
    }
}

/// Orders whose current status is `NEW` or `PROCESSING`
pub struct GetOrdersNeedingRefresh;

#[async_trait]
impl UnitOfWork for GetOrdersNeedingRefresh {
    type Output = Vec<String>;
    const NAME: &'static str = "get_orders_needing_refresh";

    async fn run(&self, conn: &mut PgConnection) -> Result<Vec<String>, LedgerError> {
        let numbers = sqlx::query_scalar::<_, String>(
            "SELECT cur.order_number
             FROM (
                 SELECT DISTINCT ON (order_number) order_number, status
                 FROM ledger
                 WHERE status <> 'WITHDRAWN'
                 ORDER BY order_number, seq DESC
             ) cur
             WHERE cur.status IN ('NEW', 'PROCESSING')",
        )
        .fetch_all(&mut *conn)
        .await?;
        Ok(numbers)
    }
}

// ========== Balance ==========

pub struct GetBalance {
    pub owner: String,
}

#[async_trait]
impl UnitOfWork for GetBalance {
    type Output = Balance;
    const NAME: &'static str = "get_balance";

    async fn run(&self, conn: &mut PgConnection) -> Result<Balance, LedgerError> {
        balance_of(conn, &self.owner).await
    }
}

/// Spend points against an order
///
/// The user row is locked first so concurrent withdrawals of one user run
/// one after another and each sees the balance left by the previous one.
/// `NO KEY UPDATE` still admits the `KEY SHARE` lock taken by the
/// `orders.user_login` foreign key, so uploads are not blocked.
pub struct WithdrawBalance {
    pub owner: String,
    pub order: String,
    pub amount: Points,
}

#[async_trait]
impl UnitOfWork for WithdrawBalance {
    type Output = ();
    const NAME: &'static str = "withdraw_balance";

    async fn run(&self, conn: &mut PgConnection) -> Result<(), LedgerError> {
        if !self.amount.is_positive() {
            return Err(LedgerError::InvalidAmount);
        }

        sqlx::query_scalar::<_, String>("SELECT login FROM users WHERE login = $1 FOR NO KEY UPDATE")
            .bind(&self.owner)
            .fetch_optional(&mut *conn)
            .await?
            .ok_or(LedgerError::NotFound("user"))?;

        let balance = balance_of(conn, &self.owner).await?;
        if balance.current < self.amount {
            return Err(LedgerError::InsufficientFunds);
        }

        let now = now_millis();
        if insert_order(conn, &self.order, &self.owner, now).await?.is_none() {
            let owner = order_owner(conn, &self.order).await?;
            if owner != self.owner {
                return Err(LedgerError::OwnershipConflict { owner });
            }
        }

        sqlx::query(
            "INSERT INTO ledger (order_number, status, amount, created_at)
             VALUES ($1, 'WITHDRAWN', $2, $3)",
        )
        .bind(&self.order)
        .bind(self.amount.minor())
        .bind(now)
        .execute(&mut *conn)
        .await?;

        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct WithdrawalRow {
    order_number: String,
    amount: i64,
    created_at: i64,
}

pub struct GetWithdrawals {
    pub owner: String,
}

#[async_trait]
impl UnitOfWork for GetWithdrawals {
    type Output = Vec<Withdrawal>;
    const NAME: &'static str = "get_withdrawals";

    async fn run(&self, conn: &mut PgConnection) -> Result<Vec<Withdrawal>, LedgerError> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            "SELECT l.order_number, l.amount, l.created_at
             FROM ledger l
             JOIN orders o ON o.number = l.order_number
             WHERE o.user_login = $1 AND l.status = 'WITHDRAWN'
             ORDER BY l.created_at ASC, l.seq ASC",
        )
        .bind(&self.owner)
        .fetch_all(&mut *conn)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Withdrawal {
                order: row.order_number,
                sum: Points::from_minor(row.amount),
                processed_at: row.created_at,
            })
            .collect())
    }
}

// ========== Accrual results ==========

/// Collapse a captured batch before it is written
///
/// Keeps the last record per (order, status), drops anything that is not an
/// accrual status, and orders the rest by status rank so the most advanced
/// status of an order gets the highest sequence number.
pub fn prepare_batch(batch: Vec<StatusUpdate>) -> Vec<StatusUpdate> {
    let mut slots: HashMap<(String, OrderStatus), usize> = HashMap::new();
    let mut kept: Vec<Option<StatusUpdate>> = Vec::with_capacity(batch.len());

    for update in batch {
        if update.status == OrderStatus::Withdrawn {
            continue;
        }
        let key = (update.order.clone(), update.status);
        if let Some(&idx) = slots.get(&key) {
            kept[idx] = None;
        }
        slots.insert(key, kept.len());
        kept.push(Some(update));
    }

    let mut out: Vec<StatusUpdate> = kept.into_iter().flatten().collect();
    out.sort_by_key(|u| u.status.rank());
    out
}

/// Multi-row idempotent upsert of accrual results
///
/// Rows for unknown orders and rows that would move an order away from a
/// terminal status it already holds are skipped. Returns rows written.
pub struct ApplyStatuses {
    pub batch: Vec<StatusUpdate>,
}

#[async_trait]
impl UnitOfWork for ApplyStatuses {
    type Output = u64;
    const NAME: &'static str = "apply_statuses";

    async fn run(&self, conn: &mut PgConnection) -> Result<u64, LedgerError> {
        if self.batch.is_empty() {
            return Ok(0);
        }

        let orders: Vec<&str> = self.batch.iter().map(|u| u.order.as_str()).collect();
        let statuses: Vec<&str> = self.batch.iter().map(|u| u.status.as_db()).collect();
        let amounts: Vec<i64> = self.batch.iter().map(|u| u.accrual.minor()).collect();
        let times: Vec<i64> = self.batch.iter().map(|u| u.at).collect();

        let result = sqlx::query(
            "INSERT INTO ledger (order_number, status, amount, created_at)
             SELECT b.order_number, b.status, b.amount, b.created_at
             FROM UNNEST($1::TEXT[], $2::TEXT[], $3::BIGINT[], $4::BIGINT[])
                  WITH ORDINALITY AS b(order_number, status, amount, created_at, ord)
             WHERE EXISTS (SELECT 1 FROM orders o WHERE o.number = b.order_number)
               AND NOT EXISTS (
                   SELECT 1 FROM ledger t
                   WHERE t.order_number = b.order_number
                     AND t.status IN ('PROCESSED', 'INVALID')
                     AND t.status <> b.status
               )
             ORDER BY b.ord
             ON CONFLICT (order_number, status) WHERE status <> 'WITHDRAWN'
             DO UPDATE SET amount = EXCLUDED.amount, created_at = EXCLUDED.created_at",
        )
        .bind(&orders)
        .bind(&statuses)
        .bind(&amounts)
        .bind(&times)
        .execute(&mut *conn)
        .await?;

        Ok(result.rows_affected())
    }
}

// ========== Facade ==========

/// Ledger store: one method per operation, each through the retry executor
#[derive(Clone)]
pub struct Ledger {
    runner: TxRunner,
}

impl Ledger {
    pub fn new(runner: TxRunner) -> Self {
        Self { runner }
    }

    pub fn runner(&self) -> &TxRunner {
        &self.runner
    }

    pub async fn get_user(&self, login: &str) -> Result<User, LedgerError> {
        self.runner
            .run(&GetUser {
                login: login.to_string(),
            })
            .await
    }

    pub async fn add_user(&self, login: &str, password_hash: &str) -> Result<(), LedgerError> {
        self.runner
            .run(&AddUser {
                login: login.to_string(),
                password_hash: password_hash.to_string(),
            })
            .await
    }

    pub async fn add_order(&self, number: &str, owner: &str) -> Result<OrderOwner, LedgerError> {
        self.runner
            .run(&AddOrder {
                number: number.to_string(),
                owner: owner.to_string(),
            })
            .await
    }

    pub async fn get_orders(&self, owner: &str) -> Result<Vec<OrderView>, LedgerError> {
        self.runner
            .run(&GetOrders {
                owner: owner.to_string(),
            })
            .await
    }

    pub async fn get_balance(&self, owner: &str) -> Result<Balance, LedgerError> {
        self.runner
            .run(&GetBalance {
                owner: owner.to_string(),
            })
            .await
    }

    pub async fn withdraw(&self, owner: &str, order: &str, amount: Points) -> Result<(), LedgerError> {
        self.runner
            .run(&WithdrawBalance {
                owner: owner.to_string(),
                order: order.to_string(),
                amount,
            })
            .await
    }

    pub async fn get_withdrawals(&self, owner: &str) -> Result<Vec<Withdrawal>, LedgerError> {
        self.runner
            .run(&GetWithdrawals {
                owner: owner.to_string(),
            })
            .await
    }

    pub async fn orders_needing_refresh(&self) -> Result<Vec<String>, LedgerError> {
        self.runner.run(&GetOrdersNeedingRefresh).await
    }

    pub async fn apply_statuses(&self, batch: Vec<StatusUpdate>) -> Result<u64, LedgerError> {
        self.runner
            .run(&ApplyStatuses {
                batch: prepare_batch(batch),
            })
            .await
    }
}

#[async_trait]
impl AccrualStore for Ledger {
    async fn pending_orders(&self) -> Result<Vec<String>, LedgerError> {
        self.orders_needing_refresh().await
    }

    async fn apply_statuses(&self, batch: Vec<StatusUpdate>) -> Result<u64, LedgerError> {
        Ledger::apply_statuses(self, batch).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn update(order: &str, status: OrderStatus, accrual: i64, at: i64) -> StatusUpdate {
        StatusUpdate {
            order: order.to_string(),
            status,
            accrual: Points::from(accrual),
            at,
        }
    }

    #[test]
    fn test_prepare_batch_keeps_last_duplicate() {
        let batch = vec![
            update("1", OrderStatus::Processed, 100, 1),
            update("2", OrderStatus::New, 0, 2),
            update("1", OrderStatus::Processed, 150, 3),
        ];

        let out = prepare_batch(batch);
        assert_eq!(out.len(), 2);
        let processed = out.iter().find(|u| u.order == "1").unwrap();
        assert_eq!(processed.accrual, Points::from(150));
        assert_eq!(processed.at, 3);
    }

    #[test]
    fn test_prepare_batch_orders_by_rank() {
        let batch = vec![
            update("1", OrderStatus::Processed, 10, 5),
            update("1", OrderStatus::Processing, 0, 6),
            update("2", OrderStatus::Invalid, 0, 7),
            update("1", OrderStatus::New, 0, 8),
        ];

        let statuses: Vec<_> = prepare_batch(batch).into_iter().map(|u| u.status).collect();
        assert_eq!(
            statuses,
            vec![
                OrderStatus::New,
                OrderStatus::Processing,
                OrderStatus::Processed,
                OrderStatus::Invalid,
            ]
        );
    }

    #[test]
    fn test_prepare_batch_drops_withdrawals() {
        let out = prepare_batch(vec![update("1", OrderStatus::Withdrawn, 5, 1)]);
        assert!(out.is_empty());
    }
}
