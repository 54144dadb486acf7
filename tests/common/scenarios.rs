//! Claim scenarios shared by the SQLite and PostgreSQL test binaries.

use super::{seed_codes, seed_paid_orders, seed_product};
use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter};
use shop_stock::entities::code_entity as codes;
use shop_stock::services::{ClaimError, ClaimStrategy, ClaimedCode, StockClaimService};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Runs the inner strategy, then never returns, keeping its transaction open.
pub struct StallAfterClaim(pub Arc<dyn ClaimStrategy>);

#[async_trait]
impl ClaimStrategy for StallAfterClaim {
    fn name(&self) -> &'static str {
        "stall_after_claim"
    }

    async fn claim(
        &self,
        txn: &DatabaseTransaction,
        product_id: i64,
        order_id: i64,
    ) -> Result<codes::Model, ClaimError> {
        self.0.claim(txn, product_id, order_id).await?;
        std::future::pending::<Result<codes::Model, ClaimError>>().await
    }
}

pub async fn product_codes(db: &DatabaseConnection, product_id: i64) -> Vec<codes::Model> {
    codes::Entity::find()
        .filter(codes::Column::ProductId.eq(product_id))
        .all(db)
        .await
        .expect("load codes")
}

struct ConcurrentRun {
    product_id: i64,
    values: Vec<String>,
    claimed: Vec<ClaimedCode>,
    no_stock: usize,
}

/// `stock` codes, `stock + extra` concurrent claims with distinct orders.
async fn run_concurrent_claims(
    db: &DatabaseConnection,
    service: &StockClaimService,
    stock: usize,
    extra: usize,
) -> ConcurrentRun {
    let product = seed_product(db, "Concurrent Key", 500).await;
    let values: Vec<String> = (0..stock).map(|i| format!("KEY-{}-{i}", product.id)).collect();
    let refs: Vec<&str> = values.iter().map(String::as_str).collect();
    seed_codes(db, product.id, &refs).await;
    let orders = seed_paid_orders(db, product.id, stock + extra).await;

    let cancel = CancellationToken::new();
    let mut set = JoinSet::new();
    for order in &orders {
        let service = service.clone();
        let cancel = cancel.clone();
        let (product_id, order_id) = (product.id, order.id);
        set.spawn(async move {
            (
                order_id,
                service.claim_one_code(&cancel, product_id, order_id).await,
            )
        });
    }

    let mut claimed = Vec::new();
    let mut no_stock = 0;
    while let Some(joined) = set.join_next().await {
        let (order_id, result) = joined.expect("claim task panicked");
        match result {
            Ok(code) => {
                assert_eq!(code.order_id, order_id);
                assert_eq!(code.product_id, product.id);
                claimed.push(code);
            }
            Err(ClaimError::NoStock) => no_stock += 1,
            Err(e) => panic!("unexpected claim error for order {order_id}: {e}"),
        }
    }

    ConcurrentRun {
        product_id: product.id,
        values,
        claimed,
        no_stock,
    }
}

/// No code is handed out twice and every sold row is bound to exactly one
/// winning order.
async fn assert_exclusive(db: &DatabaseConnection, run: &ConcurrentRun) {
    let distinct: HashSet<&str> = run.claimed.iter().map(|c| c.code.as_str()).collect();
    assert_eq!(distinct.len(), run.claimed.len(), "a code was handed out twice");

    let winners: HashSet<i64> = run.claimed.iter().map(|c| c.order_id).collect();
    let mut bound = HashSet::new();
    for row in product_codes(db, run.product_id).await {
        let Some(order_id) = row.order_id else {
            assert!(!row.is_sold, "sold code without order");
            continue;
        };
        assert!(row.is_sold);
        assert!(row.sold_at.is_some());
        assert!(winners.contains(&order_id));
        assert!(bound.insert(order_id), "order {order_id} bound twice");
    }
    assert_eq!(bound.len(), run.claimed.len());
}

/// Exactly `stock` winners and `extra` `NoStock` results.
pub async fn concurrent_claims_never_share_a_code(
    db: &DatabaseConnection,
    service: &StockClaimService,
    stock: usize,
    extra: usize,
) {
    let run = run_concurrent_claims(db, service, stock, extra).await;

    assert_eq!(run.claimed.len(), stock);
    assert_eq!(run.no_stock, extra);
    assert_exclusive(db, &run).await;

    // 所有卡密都已售出
    let distinct: HashSet<&str> = run.claimed.iter().map(|c| c.code.as_str()).collect();
    let expected: HashSet<&str> = run.values.iter().map(String::as_str).collect();
    assert_eq!(distinct, expected);
    assert!(product_codes(db, run.product_id).await.iter().all(|r| r.is_sold));
}

/// Weaker form for strategies that may report `NoStock` to a claimant that
/// lost a race on a row while other rows were still free.
pub async fn concurrent_claims_are_exclusive(
    db: &DatabaseConnection,
    service: &StockClaimService,
    stock: usize,
    extra: usize,
) {
    let run = run_concurrent_claims(db, service, stock, extra).await;

    assert!(!run.claimed.is_empty());
    assert!(run.claimed.len() <= stock);
    assert_eq!(run.claimed.len() + run.no_stock, stock + extra);
    assert_exclusive(db, &run).await;
}

pub async fn zero_stock_is_no_stock(db: &DatabaseConnection, service: &StockClaimService) {
    let product = seed_product(db, "Empty Shelf", 100).await;
    let orders = seed_paid_orders(db, product.id, 2).await;
    let cancel = CancellationToken::new();

    for order in orders {
        let err = service
            .claim_one_code(&cancel, product.id, order.id)
            .await
            .unwrap_err();
        assert!(matches!(err, ClaimError::NoStock), "got {err:?}");
    }
}

pub async fn claim_binds_row_to_order(db: &DatabaseConnection, service: &StockClaimService) {
    let product = seed_product(db, "Bind Check", 100).await;
    let value = format!("BIND-{}", product.id);
    seed_codes(db, product.id, &[value.as_str()]).await;
    let order = seed_paid_orders(db, product.id, 1).await.remove(0);

    let claimed = service
        .claim_one_code(&CancellationToken::new(), product.id, order.id)
        .await
        .unwrap();
    assert_eq!(claimed.code, value);

    let row = codes::Entity::find()
        .filter(codes::Column::Code.eq(value.as_str()))
        .one(db)
        .await
        .unwrap()
        .unwrap();
    assert!(row.is_sold);
    assert_eq!(row.order_id, Some(order.id));
    assert!(row.sold_at.is_some());
    assert_eq!(row.id, claimed.code_id);
}

pub async fn second_claim_for_same_order_is_rejected(
    db: &DatabaseConnection,
    service: &StockClaimService,
) {
    let product = seed_product(db, "Retry Key", 100).await;
    let first = format!("RETRY-A-{}", product.id);
    let second = format!("RETRY-B-{}", product.id);
    seed_codes(db, product.id, &[first.as_str(), second.as_str()]).await;
    let order = seed_paid_orders(db, product.id, 1).await.remove(0);
    let cancel = CancellationToken::new();

    service
        .claim_one_code(&cancel, product.id, order.id)
        .await
        .unwrap();
    let err = service
        .claim_one_code(&cancel, product.id, order.id)
        .await
        .unwrap_err();
    assert!(
        matches!(err, ClaimError::OrderAlreadyBound(id) if id == order.id),
        "got {err:?}"
    );

    let rows = product_codes(db, product.id).await;
    let bound: Vec<_> = rows.iter().filter(|r| r.order_id == Some(order.id)).collect();
    assert_eq!(bound.len(), 1);
    let unsold: Vec<_> = rows.iter().filter(|r| !r.is_sold).collect();
    assert_eq!(unsold.len(), 1, "the rejected claim must roll back");
    assert!(unsold[0].order_id.is_none());
    assert!(unsold[0].sold_at.is_none());
}

pub async fn cancelled_before_start_changes_nothing(
    db: &DatabaseConnection,
    service: &StockClaimService,
) {
    let product = seed_product(db, "Cancel Early", 100).await;
    let value = format!("EARLY-{}", product.id);
    seed_codes(db, product.id, &[value.as_str()]).await;
    let order = seed_paid_orders(db, product.id, 1).await.remove(0);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = service
        .claim_one_code(&cancel, product.id, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ClaimError::Cancelled), "got {err:?}");

    let rows = product_codes(db, product.id).await;
    assert!(rows.iter().all(|r| !r.is_sold && r.order_id.is_none()));
}

/// Cancels while the row is already updated inside the open transaction.
pub async fn cancelled_mid_claim_rolls_back(db: &DatabaseConnection, inner: Arc<dyn ClaimStrategy>) {
    let product = seed_product(db, "Cancel Late", 100).await;
    let value = format!("LATE-{}", product.id);
    seed_codes(db, product.id, &[value.as_str()]).await;
    let order = seed_paid_orders(db, product.id, 1).await.remove(0);

    let service = StockClaimService::with_strategy(
        db.clone(),
        Arc::new(StallAfterClaim(inner)),
        Duration::from_secs(30),
    );
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let err = service
        .claim_one_code(&cancel, product.id, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ClaimError::Cancelled), "got {err:?}");

    let rows = product_codes(db, product.id).await;
    assert_eq!(rows.len(), 1);
    assert!(!rows[0].is_sold);
    assert!(rows[0].order_id.is_none());
    assert!(rows[0].sold_at.is_none());
}

pub async fn timeout_rolls_back(db: &DatabaseConnection, inner: Arc<dyn ClaimStrategy>) {
    let product = seed_product(db, "Slow Claim", 100).await;
    let value = format!("SLOW-{}", product.id);
    seed_codes(db, product.id, &[value.as_str()]).await;
    let order = seed_paid_orders(db, product.id, 1).await.remove(0);

    let service = StockClaimService::with_strategy(
        db.clone(),
        Arc::new(StallAfterClaim(inner)),
        Duration::from_millis(100),
    );
    let err = service
        .claim_one_code(&CancellationToken::new(), product.id, order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, ClaimError::Cancelled), "got {err:?}");

    let rows = product_codes(db, product.id).await;
    assert!(!rows[0].is_sold);
    assert!(rows[0].order_id.is_none());
}
