use crate::entities::{OrderStatus, product_entity as products};
use crate::error::{AppError, AppResult};
use crate::models::{DeliveryOutcome, DeliveryStats};
use crate::services::{ClaimError, OrderService, StockClaimService, StockService};
use futures_util::StreamExt;
use futures_util::stream;
use sea_orm::{DatabaseConnection, EntityTrait};
use tokio_util::sync::CancellationToken;

/// Turns paid orders into delivered codes.
#[derive(Clone)]
pub struct FulfillmentService {
    pool: DatabaseConnection,
    claim_service: StockClaimService,
    order_service: OrderService,
    stock_service: StockService,
}

impl FulfillmentService {
    pub fn new(
        pool: DatabaseConnection,
        claim_service: StockClaimService,
        order_service: OrderService,
        stock_service: StockService,
    ) -> Self {
        Self {
            pool,
            claim_service,
            order_service,
            stock_service,
        }
    }

    /// Claims a code for a paid order and records the outcome on the order.
    ///
    /// - code already bound (earlier claim committed, status update lost):
    ///   the bound code is returned and the order marked `delivered`, even
    ///   when the product has since sold out
    /// - claimed: order -> `delivered`
    /// - no stock: order -> `failed_delivery`, payment kept, `OutOfStock`
    /// - cancelled: order untouched, error returned
    /// - storage failure: order -> `failed_delivery`, error returned
    ///
    /// Calling this again for a delivered order returns the same code.
    pub async fn deliver_order(
        &self,
        cancel: &CancellationToken,
        order_id: i64,
    ) -> AppResult<DeliveryOutcome> {
        let order = self.order_service.find_order(order_id).await?;
        if order.status == OrderStatus::Pending {
            return Err(AppError::ValidationError(format!(
                "Order {order_id} has not been paid"
            )));
        }
        let product_id = order.product_id.ok_or_else(|| {
            AppError::ValidationError(format!("Order {order_id} has no product to deliver"))
        })?;
        let product_name = products::Entity::find_by_id(product_id)
            .one(&self.pool)
            .await?
            .map(|p| p.name)
            .unwrap_or_else(|| format!("product #{product_id}"));

        if order.status == OrderStatus::Delivered {
            let code = self.bound_code(order_id).await?;
            return Ok(DeliveryOutcome::Delivered {
                order_id,
                product_name,
                code,
                redelivered: true,
            });
        }

        // 先查已绑定的卡密，售罄时也不能把已发出的订单判为缺货
        if let Some(bound) = self.stock_service.find_code_for_order(order_id).await? {
            self.ensure_delivered(order_id).await?;
            log::info!(
                "Order {order_id} already had code id {} bound, marked delivered",
                bound.id
            );
            return Ok(DeliveryOutcome::Delivered {
                order_id,
                product_name,
                code: bound.code,
                redelivered: true,
            });
        }

        match self
            .claim_service
            .claim_one_code(cancel, product_id, order_id)
            .await
        {
            Ok(claimed) => {
                self.ensure_delivered(order_id).await?;
                log::info!(
                    "Order {order_id} delivered (user {}, product {product_id}, code id {})",
                    order.user_id,
                    claimed.code_id
                );
                Ok(DeliveryOutcome::Delivered {
                    order_id,
                    product_name,
                    code: claimed.code,
                    redelivered: false,
                })
            }
            Err(ClaimError::NoStock) => {
                log::warn!("No stock for product {product_id}, order {order_id} failed delivery");
                self.order_service.mark_failed_delivery(order_id).await?;
                Ok(DeliveryOutcome::OutOfStock {
                    order_id,
                    product_name,
                })
            }
            Err(ClaimError::OrderAlreadyBound(_)) => {
                // 另一个 worker 抢先完成了同一订单
                let code = self.bound_code(order_id).await?;
                self.ensure_delivered(order_id).await?;
                log::info!("Order {order_id} was claimed concurrently, marked delivered");
                Ok(DeliveryOutcome::Delivered {
                    order_id,
                    product_name,
                    code,
                    redelivered: true,
                })
            }
            Err(ClaimError::Cancelled) => Err(ClaimError::Cancelled.into()),
            Err(e @ ClaimError::Storage(_)) => {
                log::error!("Failed to claim code for order {order_id}: {e}");
                if let Err(mark_err) = self.order_service.mark_failed_delivery(order_id).await {
                    log::error!("Failed to mark order {order_id} as failed_delivery: {mark_err}");
                }
                Err(e.into())
            }
        }
    }

    /// Delivers up to `limit` paid orders, `concurrency` at a time.
    pub async fn deliver_paid_orders(
        &self,
        cancel: &CancellationToken,
        limit: u64,
        concurrency: usize,
    ) -> AppResult<DeliveryStats> {
        let paid = self.order_service.list_paid_orders(limit).await?;
        if paid.is_empty() {
            return Ok(DeliveryStats::default());
        }

        let results: Vec<(i64, AppResult<DeliveryOutcome>)> = stream::iter(paid)
            .map(|order| async move { (order.id, self.deliver_order(cancel, order.id).await) })
            .buffer_unordered(concurrency.max(1))
            .collect()
            .await;

        let mut stats = DeliveryStats::default();
        for (order_id, result) in results {
            match result {
                Ok(outcome) if outcome.is_delivered() => stats.delivered += 1,
                Ok(_) => stats.out_of_stock += 1,
                Err(e) => {
                    e.log(&format!("Delivery of order {order_id}"));
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Marks the order delivered; an order another worker already moved to
    /// `delivered` counts as done.
    async fn ensure_delivered(&self, order_id: i64) -> AppResult<()> {
        match self.order_service.mark_delivered(order_id).await {
            Ok(_) => Ok(()),
            Err(AppError::ValidationError(msg)) => {
                let order = self.order_service.find_order(order_id).await?;
                if order.status == OrderStatus::Delivered {
                    Ok(())
                } else {
                    Err(AppError::ValidationError(msg))
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn bound_code(&self, order_id: i64) -> AppResult<String> {
        self.stock_service
            .find_code_for_order(order_id)
            .await?
            .map(|c| c.code)
            .ok_or_else(|| {
                AppError::InternalError(format!("Order {order_id} has no bound code"))
            })
    }
}
