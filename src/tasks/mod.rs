//! Background delivery worker.
//!
//! Payment confirmation (gateway callback or a balance purchase) leaves an
//! order `paid`; this worker polls for such orders and delivers them. Several
//! worker processes may run against the same database, since claims
//! coordinate through the storage transaction only.

use crate::config::WorkerConfig;
use crate::services::FulfillmentService;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Spawn the delivery loop. It stops when `shutdown` is cancelled; claims in
/// flight at that moment roll back and their orders stay `paid`.
pub fn spawn_all(
    fulfillment_service: FulfillmentService,
    config: WorkerConfig,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let interval = Duration::from_secs(config.poll_interval_secs.max(1));
        log::info!(
            "Delivery worker started (every {}s, batch {}, concurrency {})",
            interval.as_secs(),
            config.batch_size,
            config.concurrency
        );

        loop {
            match fulfillment_service
                .deliver_paid_orders(&shutdown, config.batch_size, config.concurrency)
                .await
            {
                Ok(stats) if stats.total() > 0 => log::info!(
                    "Delivery pass: {} delivered, {} out of stock, {} failed",
                    stats.delivered,
                    stats.out_of_stock,
                    stats.failed
                ),
                Ok(_) => {}
                Err(e) => e.log("Delivery pass"),
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }
        }

        log::info!("Delivery worker stopped");
    })
}
