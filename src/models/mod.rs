pub mod delivery;
pub mod stock;

pub use delivery::*;
pub use stock::*;
