#![allow(dead_code)]

use chrono::Utc;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use shop_stock::config::DatabaseConfig;
use shop_stock::database::{create_pool, run_migrations};
use shop_stock::entities::{
    OrderStatus, code_entity as codes, order_entity as orders, product_entity as products,
    user_entity as users,
};
use std::sync::atomic::{AtomicI64, Ordering};
use tempfile::TempDir;

pub mod scenarios;

static NEXT_TG_USER: AtomicI64 = AtomicI64::new(1);

/// Fresh migrated in-memory SQLite database.
pub async fn sqlite_db() -> DatabaseConnection {
    let config = DatabaseConfig {
        url: "sqlite::memory:".to_string(),
        max_connections: 1,
        sqlx_logging: false,
    };
    let db = create_pool(&config).await.expect("connect sqlite");
    run_migrations(&db).await.expect("migrate sqlite");
    db
}

/// Migrated file-backed SQLite database with a multi-connection pool, so
/// claim transactions really overlap. Keep the `TempDir` alive for the test.
pub async fn sqlite_file_db(max_connections: u32) -> (TempDir, DatabaseConnection) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let config = DatabaseConfig {
        url: format!("sqlite://{}?mode=rwc", dir.path().join("shop.db").display()),
        max_connections,
        sqlx_logging: false,
    };
    let db = create_pool(&config).await.expect("connect sqlite file");
    run_migrations(&db).await.expect("migrate sqlite file");
    (dir, db)
}

/// Migrated PostgreSQL database from `TEST_DATABASE_URL`, if set.
pub async fn postgres_db() -> Option<DatabaseConnection> {
    let url = std::env::var("TEST_DATABASE_URL").ok()?;
    let config = DatabaseConfig {
        url,
        max_connections: 16,
        sqlx_logging: false,
    };
    let db = create_pool(&config).await.expect("connect postgres");
    run_migrations(&db).await.expect("migrate postgres");
    Some(db)
}

pub async fn seed_product(db: &DatabaseConnection, name: &str, price_cents: i64) -> products::Model {
    products::ActiveModel {
        name: Set(name.to_string()),
        price_cents: Set(price_cents),
        is_active: Set(true),
        created_at: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert product")
}

pub async fn seed_user(db: &DatabaseConnection, balance_cents: i64) -> users::Model {
    // 与已有数据区分，Postgres 测试库可能被重复使用
    let tg_user_id =
        Utc::now().timestamp_micros() * 1000 + NEXT_TG_USER.fetch_add(1, Ordering::SeqCst);
    users::ActiveModel {
        tg_user_id: Set(tg_user_id),
        username: Set(Some(format!("buyer{tg_user_id}"))),
        balance_cents: Set(balance_cents),
        created_at: Set(Some(Utc::now())),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert user")
}

pub async fn seed_codes(db: &DatabaseConnection, product_id: i64, values: &[&str]) {
    for value in values {
        codes::ActiveModel {
            product_id: Set(product_id),
            code: Set(value.to_string()),
            is_sold: Set(false),
            sold_at: Set(None),
            order_id: Set(None),
            created_at: Set(Some(Utc::now())),
            ..Default::default()
        }
        .insert(db)
        .await
        .expect("insert code");
    }
}

pub async fn seed_order(
    db: &DatabaseConnection,
    user_id: i64,
    product_id: i64,
    status: OrderStatus,
) -> orders::Model {
    let now = Utc::now();
    orders::ActiveModel {
        user_id: Set(user_id),
        product_id: Set(Some(product_id)),
        amount_cents: Set(500),
        payment_amount: Set(500),
        balance_used: Set(0),
        status: Set(status),
        paid_at: Set((status != OrderStatus::Pending).then_some(now)),
        created_at: Set(Some(now)),
        ..Default::default()
    }
    .insert(db)
    .await
    .expect("insert order")
}

/// `count` paid orders for one fresh user.
pub async fn seed_paid_orders(
    db: &DatabaseConnection,
    product_id: i64,
    count: usize,
) -> Vec<orders::Model> {
    let user = seed_user(db, 0).await;
    let mut out = Vec::with_capacity(count);
    for _ in 0..count {
        out.push(seed_order(db, user.id, product_id, OrderStatus::Paid).await);
    }
    out
}
