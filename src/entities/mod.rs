pub mod balance_transactions;
pub mod codes;
pub mod orders;
pub mod products;
pub mod users;

pub use balance_transactions::BalanceTransactionKind;
pub use orders::OrderStatus;

pub use balance_transactions as balance_transaction_entity;
pub use codes as code_entity;
pub use orders as order_entity;
pub use products as product_entity;
pub use users as user_entity;
