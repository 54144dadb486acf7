use crate::entities::{code_entity as codes, product_entity as products};
use crate::error::{AppError, AppResult};
use crate::models::ImportSummary;
use crate::utils::parse_code_lines;
use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter, QuerySelect, Set,
    TransactionTrait,
};
use std::collections::HashSet;

// 每批 6 列 x 100 行，低于旧版 SQLite 的 999 个绑定参数上限
const INSERT_CHUNK: usize = 100;

#[derive(Clone)]
pub struct StockService {
    pool: DatabaseConnection,
}

impl StockService {
    pub fn new(pool: DatabaseConnection) -> Self {
        Self { pool }
    }

    /// Number of unsold codes for a product.
    pub async fn count_available(&self, product_id: i64) -> AppResult<u64> {
        let count = codes::Entity::find()
            .filter(codes::Column::ProductId.eq(product_id))
            .filter(codes::Column::IsSold.eq(false))
            .count(&self.pool)
            .await?;
        Ok(count)
    }

    /// The code bound to an order, if a claim for it has committed.
    pub async fn find_code_for_order(&self, order_id: i64) -> AppResult<Option<codes::Model>> {
        let code = codes::Entity::find()
            .filter(codes::Column::OrderId.eq(order_id))
            .one(&self.pool)
            .await?;
        Ok(code)
    }

    /// 批量导入卡密（每行一个），全部以未售出状态写入
    ///
    /// Blank lines are ignored; lines repeated within the upload or already
    /// stored for this product are skipped and counted in the summary.
    pub async fn import_codes(&self, product_id: i64, raw: &str) -> AppResult<ImportSummary> {
        let (parsed, duplicates_in_upload) = parse_code_lines(raw);
        if parsed.is_empty() {
            return Err(AppError::ValidationError("No codes found in upload".into()));
        }

        let txn = self.pool.begin().await?;

        products::Entity::find_by_id(product_id)
            .one(&txn)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Product {product_id} not found")))?;

        let mut existing: HashSet<String> = HashSet::new();
        for chunk in parsed.chunks(INSERT_CHUNK) {
            let found: Vec<String> = codes::Entity::find()
                .select_only()
                .column(codes::Column::Code)
                .filter(codes::Column::ProductId.eq(product_id))
                .filter(codes::Column::Code.is_in(chunk.iter().cloned()))
                .into_tuple()
                .all(&txn)
                .await?;
            existing.extend(found);
        }

        let fresh: Vec<String> = parsed
            .into_iter()
            .filter(|c| !existing.contains(c))
            .collect();
        let already_stored = existing.len() as u64;
        let inserted = fresh.len() as u64;

        let now = Utc::now();
        for chunk in fresh.chunks(INSERT_CHUNK) {
            let models = chunk.iter().map(|code| codes::ActiveModel {
                product_id: Set(product_id),
                code: Set(code.clone()),
                is_sold: Set(false),
                sold_at: Set(None),
                order_id: Set(None),
                created_at: Set(Some(now)),
                ..Default::default()
            });
            codes::Entity::insert_many(models).exec(&txn).await?;
        }

        txn.commit().await?;

        log::info!(
            "Imported {inserted} codes for product {product_id} ({duplicates_in_upload} repeated, {already_stored} already stored)"
        );
        Ok(ImportSummary {
            inserted,
            duplicates_in_upload,
            already_stored,
        })
    }
}
