use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;

/// One unit of sellable inventory. `code` is the secret payload handed to the
/// buyer; it is written once on import and bound to an order once on claim.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq)]
#[sea_orm(table_name = "codes")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub product_id: i64,
    pub code: String,
    pub is_sold: bool,
    pub sold_at: Option<DateTime<Utc>>,
    #[sea_orm(unique)]
    pub order_id: Option<i64>,
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
