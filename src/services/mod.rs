pub mod fulfillment_service;
pub mod order_service;
pub mod stock_claim_service;
pub mod stock_service;

pub use fulfillment_service::*;
pub use order_service::*;
pub use stock_claim_service::*;
pub use stock_service::*;
