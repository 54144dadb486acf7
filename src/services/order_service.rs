use crate::entities::{
    BalanceTransactionKind, OrderStatus, balance_transaction_entity as ledger,
    order_entity as orders, user_entity as users,
};
use crate::error::{AppError, AppResult};
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};

#[derive(Clone)]
pub struct OrderService {
    pool: DatabaseConnection,
}

/// How much of an order the wallet balance covers.
///
/// Returns `(balance_used, payment_amount)`.
pub fn split_payment(amount_cents: i64, balance_cents: i64, use_balance: bool) -> (i64, i64) {
    if !use_balance || balance_cents <= 0 {
        return (0, amount_cents);
    }
    let used = balance_cents.min(amount_cents);
    (used, amount_cents - used)
}

impl OrderService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    pub async fn find_order(&self, order_id: i64) -> AppResult<orders::Model> {
        orders::Entity::find_by_id(order_id)
            .one(&self.pool)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Order {order_id} not found")))
    }

    /// Paid orders waiting for delivery, oldest first.
    pub async fn list_paid_orders(&self, limit: u64) -> AppResult<Vec<orders::Model>> {
        let list = orders::Entity::find()
            .filter(orders::Column::Status.eq(OrderStatus::Paid))
            .filter(orders::Column::ProductId.is_not_null())
            .order_by_asc(orders::Column::Id)
            .limit(limit)
            .all(&self.pool)
            .await?;
        Ok(list)
    }

    pub async fn create_order(
        &self,
        user_id: i64,
        product_id: i64,
        amount_cents: i64,
    ) -> AppResult<orders::Model> {
        self.create_order_with_balance(user_id, product_id, amount_cents, false)
            .await
    }

    /// 创建订单，可选用余额抵扣
    ///
    /// The balance debit, the ledger entry and the order row commit together.
    /// When the balance covers the whole amount the order is created `paid`
    /// and is ready for delivery.
    pub async fn create_order_with_balance(
        &self,
        user_id: i64,
        product_id: i64,
        amount_cents: i64,
        use_balance: bool,
    ) -> AppResult<orders::Model> {
        if amount_cents <= 0 {
            return Err(AppError::ValidationError(
                "Order amount must be positive".into(),
            ));
        }

        let txn = self.pool.begin().await?;

        let user = users::Entity::find_by_id(user_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

        let (balance_used, payment_amount) =
            split_payment(amount_cents, user.balance_cents, use_balance);
        let now = Utc::now();
        let fully_paid = payment_amount == 0;

        let order = orders::ActiveModel {
            user_id: Set(user_id),
            product_id: Set(Some(product_id)),
            amount_cents: Set(amount_cents),
            payment_amount: Set(payment_amount),
            balance_used: Set(balance_used),
            status: Set(if fully_paid {
                OrderStatus::Paid
            } else {
                OrderStatus::Pending
            }),
            paid_at: Set(fully_paid.then_some(now)),
            created_at: Set(Some(now)),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        if balance_used > 0 {
            debit_balance(&txn, user_id, balance_used, order.id).await?;
        }

        txn.commit().await?;

        log::info!(
            "Order {} created for user {user_id}, product {product_id}: amount {amount_cents}, balance used {balance_used}, status {}",
            order.id,
            order.status
        );
        Ok(order)
    }

    /// pending -> paid, called once the payment gateway confirms.
    pub async fn mark_paid(&self, order_id: i64) -> AppResult<orders::Model> {
        self.transition(order_id, OrderStatus::Paid).await
    }

    /// Not atomic with the claim; a crash in between leaves a bound code on a
    /// `paid` order, which the next delivery attempt picks up.
    pub async fn mark_delivered(&self, order_id: i64) -> AppResult<orders::Model> {
        self.transition(order_id, OrderStatus::Delivered).await
    }

    /// Records a failed claim. Payment and balance are left untouched.
    pub async fn mark_failed_delivery(&self, order_id: i64) -> AppResult<orders::Model> {
        self.transition(order_id, OrderStatus::FailedDelivery).await
    }

    /// Conditional status update: only rows currently in an allowed source
    /// state change, so two racing callers cannot both move the same order.
    async fn transition(&self, order_id: i64, next: OrderStatus) -> AppResult<orders::Model> {
        let now = Utc::now();
        let mut update = orders::Entity::update_many()
            .col_expr(orders::Column::Status, Expr::value(next))
            .filter(orders::Column::Id.eq(order_id))
            .filter(orders::Column::Status.is_in(next.allowed_sources().iter().copied()));

        match next {
            OrderStatus::Paid => {
                update = update.col_expr(orders::Column::PaidAt, Expr::value(now));
            }
            OrderStatus::Delivered => {
                update = update.col_expr(orders::Column::DeliveredAt, Expr::value(now));
            }
            _ => {}
        }

        let res = update.exec(&self.pool).await?;
        let order = self.find_order(order_id).await?;

        if res.rows_affected == 0 {
            return Err(AppError::ValidationError(format!(
                "Order {order_id} cannot move from {} to {next}",
                order.status
            )));
        }
        Ok(order)
    }
}

/// 扣减余额并记账；余额不足（并发扣减）时失败
async fn debit_balance<C: ConnectionTrait>(
    conn: &C,
    user_id: i64,
    amount: i64,
    order_id: i64,
) -> AppResult<()> {
    let res = users::Entity::update_many()
        .col_expr(
            users::Column::BalanceCents,
            Expr::col(users::Column::BalanceCents).sub(amount),
        )
        .filter(users::Column::Id.eq(user_id))
        .filter(users::Column::BalanceCents.gte(amount))
        .exec(conn)
        .await?;

    if res.rows_affected == 0 {
        return Err(AppError::ValidationError("Insufficient balance".into()));
    }

    let balance_after = users::Entity::find_by_id(user_id)
        .one(conn)
        .await?
        .map(|u| u.balance_cents)
        .ok_or_else(|| AppError::NotFound("User not found".to_string()))?;

    ledger::ActiveModel {
        user_id: Set(user_id),
        kind: Set(BalanceTransactionKind::Purchase),
        amount_cents: Set(-amount),
        balance_after: Set(balance_after),
        description: Set(Some(format!("Order #{order_id}"))),
        order_id: Set(Some(order_id)),
        created_at: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    Ok(())
}
