use anyhow::Context;
use chrono::Local; // timestamp in log lines
use env_logger::{Env, Target};
use std::io::Write; // for env_logger custom formatter
use tokio_util::sync::CancellationToken;

use shop_stock::{
    config::Config,
    database::{create_pool, run_migrations},
    services::*,
    tasks,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z");
            let level = record.level().as_str().to_ascii_lowercase();
            let msg_json = serde_json::to_string(&format!("{}", record.args()))
                .unwrap_or_else(|_| "\"<invalid utf8>\"".to_string());
            writeln!(
                buf,
                "{{\"timestamp\":\"{}\",\"level\":\"{}\",\"message\":{},\"target\":\"{}\"}}",
                ts,
                level,
                msg_json,
                record.target(),
            )
        })
        .target(Target::Stdout)
        .init();

    // 加载配置
    let config = Config::from_toml().context("Failed to load configuration")?;

    // 创建数据库连接池
    let pool = create_pool(&config.database)
        .await
        .context("Failed to create database connection pool")?;

    // 运行数据库迁移
    run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    // 创建服务
    let claim_service = StockClaimService::new(pool.clone(), &config.claim);
    let order_service = OrderService::new(pool.clone());
    let stock_service = StockService::new(pool.clone());
    let fulfillment_service =
        FulfillmentService::new(pool.clone(), claim_service, order_service, stock_service);

    let shutdown = CancellationToken::new();
    let worker = tasks::spawn_all(fulfillment_service, config.worker.clone(), shutdown.clone());

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    log::info!("Shutdown requested");
    shutdown.cancel();

    worker.await.context("Delivery worker panicked")?;
    pool.close().await.context("Failed to close database pool")?;
    Ok(())
}
