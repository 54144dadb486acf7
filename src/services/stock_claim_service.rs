//! Claiming one unsold code for a paid order.
//!
//! All mutual exclusion lives in the database transaction; this module holds
//! no locks and no shared state, so any number of tasks (or processes behind
//! a load balancer) may claim against the same product at once.
//!
//! Two strategies exist because the supported backends offer different
//! primitives:
//! - [`SkipLockedClaim`]: `SELECT ... FOR UPDATE SKIP LOCKED` then `UPDATE`
//!   (PostgreSQL, MySQL 8).
//! - [`AtomicUpdateClaim`]: a single conditional `UPDATE` on at most one row,
//!   then a read-back by `order_id` (SQLite, which serializes writers).

use crate::config::{ClaimConfig, ClaimStrategyKind};
use crate::entities::code_entity as codes;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::{Expr, LockBehavior, LockType, Query};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseBackend, DatabaseConnection,
    DatabaseTransaction, DbErr, EntityTrait, IntoActiveModel, QueryFilter, QuerySelect, Set,
    SqlErr, TransactionTrait,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug)]
pub enum ClaimError {
    #[error("no available codes in stock")]
    NoStock,

    #[error("order {0} already has a code bound to it")]
    OrderAlreadyBound(i64),

    #[error("claim cancelled before commit")]
    Cancelled,

    #[error("failed to claim code: {0}")]
    Storage(#[from] DbErr),
}

impl ClaimError {
    /// Maps a failed write; the unique index on `codes.order_id` turns a
    /// second claim for the same order into `OrderAlreadyBound`.
    fn from_write(err: DbErr, order_id: i64) -> Self {
        match err.sql_err() {
            Some(SqlErr::UniqueConstraintViolation(_)) => ClaimError::OrderAlreadyBound(order_id),
            _ => ClaimError::Storage(err),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedCode {
    pub code_id: i64,
    pub product_id: i64,
    pub order_id: i64,
    pub code: String,
}

/// What the backing store can do for concurrent claims.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageCapability {
    SkipLockedReads,
    AtomicUpdateOnly,
}

impl StorageCapability {
    pub fn detect(backend: DatabaseBackend) -> Self {
        match backend {
            DatabaseBackend::Postgres | DatabaseBackend::MySql => Self::SkipLockedReads,
            DatabaseBackend::Sqlite => Self::AtomicUpdateOnly,
        }
    }

    /// A configured strategy wins over detection, except that SQLite has no
    /// locking reads at all.
    pub fn resolve(kind: ClaimStrategyKind, backend: DatabaseBackend) -> Self {
        match (kind, backend) {
            (ClaimStrategyKind::Auto, _) => Self::detect(backend),
            (ClaimStrategyKind::SkipLocked, DatabaseBackend::Sqlite) => {
                log::warn!("SQLite has no SKIP LOCKED reads, using atomic update claims");
                Self::AtomicUpdateOnly
            }
            (ClaimStrategyKind::SkipLocked, _) => Self::SkipLockedReads,
            (ClaimStrategyKind::AtomicUpdate, _) => Self::AtomicUpdateOnly,
        }
    }

    pub fn strategy(self) -> Arc<dyn ClaimStrategy> {
        match self {
            Self::SkipLockedReads => Arc::new(SkipLockedClaim),
            Self::AtomicUpdateOnly => Arc::new(AtomicUpdateClaim),
        }
    }
}

/// Reserves one unsold code inside a caller-owned transaction.
///
/// Implementations must mutate at most one row and must leave commit and
/// rollback to the caller. On success the returned row is already marked
/// sold and bound to `order_id` within `txn`.
#[async_trait]
pub trait ClaimStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    async fn claim(
        &self,
        txn: &DatabaseTransaction,
        product_id: i64,
        order_id: i64,
    ) -> Result<codes::Model, ClaimError>;
}

pub struct SkipLockedClaim;

impl SkipLockedClaim {
    /// Locks one unsold row, skipping rows other transactions hold.
    /// `None` means no unsold row is reachable right now.
    pub async fn try_lock_one_unsold(
        txn: &DatabaseTransaction,
        product_id: i64,
    ) -> Result<Option<codes::Model>, DbErr> {
        codes::Entity::find()
            .filter(codes::Column::ProductId.eq(product_id))
            .filter(codes::Column::IsSold.eq(false))
            .limit(1)
            .lock_with_behavior(LockType::Update, LockBehavior::SkipLocked)
            .one(txn)
            .await
    }
}

#[async_trait]
impl ClaimStrategy for SkipLockedClaim {
    fn name(&self) -> &'static str {
        "skip_locked"
    }

    async fn claim(
        &self,
        txn: &DatabaseTransaction,
        product_id: i64,
        order_id: i64,
    ) -> Result<codes::Model, ClaimError> {
        let Some(row) = Self::try_lock_one_unsold(txn, product_id).await? else {
            return Err(ClaimError::NoStock);
        };

        let mut am = row.into_active_model();
        am.is_sold = Set(true);
        am.sold_at = Set(Some(Utc::now()));
        am.order_id = Set(Some(order_id));
        am.update(txn)
            .await
            .map_err(|e| ClaimError::from_write(e, order_id))
    }
}

pub struct AtomicUpdateClaim;

impl AtomicUpdateClaim {
    /// Marks at most one unsold row sold in a single statement and returns
    /// the number of rows changed (0 or 1).
    ///
    /// `is_sold = false` is repeated on the outer statement so that a
    /// backend re-evaluating a contended row after a concurrent commit sees
    /// it as no longer eligible.
    pub async fn atomic_claim_one_unsold(
        txn: &DatabaseTransaction,
        product_id: i64,
        order_id: i64,
        sold_at: DateTime<Utc>,
    ) -> Result<u64, DbErr> {
        let candidate = Query::select()
            .column(codes::Column::Id)
            .from(codes::Entity)
            .and_where(codes::Column::ProductId.eq(product_id))
            .and_where(codes::Column::IsSold.eq(false))
            .limit(1)
            .to_owned();

        let res = codes::Entity::update_many()
            .col_expr(codes::Column::IsSold, Expr::value(true))
            .col_expr(codes::Column::SoldAt, Expr::value(sold_at))
            .col_expr(codes::Column::OrderId, Expr::value(order_id))
            .filter(codes::Column::Id.in_subquery(candidate))
            .filter(codes::Column::IsSold.eq(false))
            .exec(txn)
            .await?;

        Ok(res.rows_affected)
    }
}

#[async_trait]
impl ClaimStrategy for AtomicUpdateClaim {
    fn name(&self) -> &'static str {
        "atomic_update"
    }

    async fn claim(
        &self,
        txn: &DatabaseTransaction,
        product_id: i64,
        order_id: i64,
    ) -> Result<codes::Model, ClaimError> {
        let affected = Self::atomic_claim_one_unsold(txn, product_id, order_id, Utc::now())
            .await
            .map_err(|e| ClaimError::from_write(e, order_id))?;

        if affected == 0 {
            return Err(ClaimError::NoStock);
        }

        // 通过刚写入的 order_id 读回卡密
        codes::Entity::find()
            .filter(codes::Column::OrderId.eq(order_id))
            .one(txn)
            .await?
            .ok_or_else(|| {
                ClaimError::Storage(DbErr::RecordNotFound(format!(
                    "claimed code for order {order_id}"
                )))
            })
    }
}

#[derive(Clone)]
pub struct StockClaimService {
    pool: DatabaseConnection,
    strategy: Arc<dyn ClaimStrategy>,
    timeout: Duration,
}

impl StockClaimService {
    pub fn new(pool: DatabaseConnection, config: &ClaimConfig) -> Self {
        let capability = StorageCapability::resolve(config.strategy, pool.get_database_backend());
        Self::with_strategy(
            pool,
            capability.strategy(),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn with_strategy(
        pool: DatabaseConnection,
        strategy: Arc<dyn ClaimStrategy>,
        timeout: Duration,
    ) -> Self {
        log::info!(
            "Stock claims use the {} strategy (timeout {}ms)",
            strategy.name(),
            timeout.as_millis()
        );
        Self {
            pool,
            strategy,
            timeout,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Reserves one unsold code of `product_id` and binds it to `order_id`.
    ///
    /// The row is committed as sold before this returns `Ok`. If `cancel`
    /// fires or the configured timeout elapses before commit, the transaction
    /// is rolled back and `ClaimError::Cancelled` is returned. Not retried.
    pub async fn claim_one_code(
        &self,
        cancel: &CancellationToken,
        product_id: i64,
        order_id: i64,
    ) -> Result<ClaimedCode, ClaimError> {
        let deadline = Instant::now() + self.timeout;

        let txn = match guarded(cancel, deadline, self.pool.begin()).await {
            Some(res) => res?,
            None => return Err(ClaimError::Cancelled),
        };

        let attempt = guarded(
            cancel,
            deadline,
            self.strategy.claim(&txn, product_id, order_id),
        )
        .await;
        let row = match attempt {
            Some(Ok(row)) => row,
            Some(Err(e)) => {
                abort(txn, order_id).await;
                return Err(e);
            }
            None => {
                abort(txn, order_id).await;
                return Err(ClaimError::Cancelled);
            }
        };

        // commit 一旦开始就不再中断，否则结果不确定
        if cancel.is_cancelled() || Instant::now() >= deadline {
            abort(txn, order_id).await;
            return Err(ClaimError::Cancelled);
        }
        txn.commit().await?;

        log::debug!(
            "Claimed code {} of product {product_id} for order {order_id}",
            row.id
        );
        Ok(ClaimedCode {
            code_id: row.id,
            product_id: row.product_id,
            order_id,
            code: row.code,
        })
    }
}

/// Runs `fut` unless `cancel` fires or `deadline` passes first.
async fn guarded<F: Future>(
    cancel: &CancellationToken,
    deadline: Instant,
    fut: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        _ = tokio::time::sleep_until(deadline) => None,
        out = fut => Some(out),
    }
}

async fn abort(txn: DatabaseTransaction, order_id: i64) {
    if let Err(e) = txn.rollback().await {
        // 回滚失败时连接被丢弃，事务同样不会提交
        log::warn!("Rollback of claim for order {order_id} failed: {e}");
    }
}
