use serde::Serialize;

/// Result of delivering one order, used to build the buyer-facing message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeliveryOutcome {
    Delivered {
        order_id: i64,
        product_name: String,
        code: String,
        /// The code had already been bound to this order before this call.
        redelivered: bool,
    },
    OutOfStock {
        order_id: i64,
        product_name: String,
    },
}

impl DeliveryOutcome {
    pub fn order_id(&self) -> i64 {
        match self {
            DeliveryOutcome::Delivered { order_id, .. }
            | DeliveryOutcome::OutOfStock { order_id, .. } => *order_id,
        }
    }

    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }

    pub fn user_message(&self) -> String {
        match self {
            DeliveryOutcome::Delivered {
                order_id,
                product_name,
                code,
                ..
            } => format!(
                "Order #{order_id} ({product_name}) has been delivered.\nYour code: {code}"
            ),
            DeliveryOutcome::OutOfStock {
                order_id,
                product_name,
            } => format!(
                "Sorry, {product_name} is out of stock. Your payment for order #{order_id} \
                 has been kept; please contact support."
            ),
        }
    }
}

/// Counters for one pass of the delivery worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeliveryStats {
    pub delivered: u64,
    pub out_of_stock: u64,
    pub failed: u64,
}

impl DeliveryStats {
    pub fn total(&self) -> u64 {
        self.delivered + self.out_of_stock + self.failed
    }
}
