use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use sea_orm::{DeriveActiveEnum, EnumIter};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, DeriveActiveEnum, EnumIter)]
#[sea_orm(rs_type = "String", db_type = "String(Some(32))")]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "failed_delivery")]
    FailedDelivery,
}

impl OrderStatus {
    /// States an order may move into `self` from.
    ///
    /// `FailedDelivery -> Delivered` covers a manual redelivery after restock;
    /// `FailedDelivery -> FailedDelivery` keeps a repeated failure idempotent.
    pub fn allowed_sources(self) -> &'static [OrderStatus] {
        match self {
            OrderStatus::Pending => &[],
            OrderStatus::Paid => &[OrderStatus::Pending],
            OrderStatus::Delivered => &[OrderStatus::Paid, OrderStatus::FailedDelivery],
            OrderStatus::FailedDelivery => &[OrderStatus::Paid, OrderStatus::FailedDelivery],
        }
    }

    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        next.allowed_sources().contains(&self)
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Paid => write!(f, "paid"),
            OrderStatus::Delivered => write!(f, "delivered"),
            OrderStatus::FailedDelivery => write!(f, "failed_delivery"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub user_id: i64,
    // 充值订单没有商品
    pub product_id: Option<i64>,
    pub amount_cents: i64,
    pub payment_amount: i64,
    pub balance_used: i64,
    pub status: OrderStatus,
    pub paid_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
