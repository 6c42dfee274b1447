use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use order_tracker::config::ServiceConfig;
use order_tracker::domain::order::OrderError;
use order_tracker::metrics::{self, Metrics};
use order_tracker::payment::{PaymentGateway, PaystackClient};
use order_tracker::storage::{MemoryStorage, PgStorage, Storage};
use order_tracker::utils::{retry_on_transient, RetryConfig};
use order_tracker::OrderService;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default to INFO, overridable with RUST_LOG
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_thread_ids(true))
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,order_tracker=debug")),
        )
        .init();

    tracing::info!("🚀 Starting order tracker");

    let config = ServiceConfig::from_env().context("invalid configuration")?;

    // === 1. Storage ===
    let storage: Arc<dyn Storage> = match config.postgres() {
        Some(pg) => {
            tracing::info!("Connecting to PostgreSQL...");
            let pg = &pg;
            let storage = retry_on_transient(RetryConfig::startup(), move |_attempt| async move {
                PgStorage::connect(pg).await.map_err(OrderError::from)
            })
            .await
            .into_result()
            .context("could not connect to PostgreSQL")?;

            storage
                .ensure_schema()
                .await
                .context("could not create schema")?;
            Arc::new(storage)
        }
        None => {
            tracing::warn!("DATABASE_URL not set, orders are kept in memory and lost on exit");
            Arc::new(MemoryStorage::with_timeout(config.store_timeout))
        }
    };

    // === 2. Metrics ===
    let metrics = Arc::new(Metrics::new()?);
    tracing::info!(
        "📊 Metrics registry created with {} metrics",
        metrics.registry().gather().len()
    );

    // === 3. Payment gateway ===
    let paystack = match config.paystack.clone() {
        Some(paystack) => {
            Some(PaystackClient::new(paystack).context("could not build Paystack client")?)
        }
        None => {
            tracing::warn!("PAYSTACK_SECRET_KEY not set, payment initiation disabled");
            None
        }
    };

    let registry = metrics.registry().clone();
    let port = config.metrics_port;
    let gateway_breaker = paystack.as_ref().map(PaystackClient::breaker);
    std::thread::spawn(move || {
        let system = actix_web::rt::System::new();
        if let Err(e) =
            system.block_on(metrics::start_metrics_server(registry, port, gateway_breaker))
        {
            tracing::error!("Metrics server error: {}", e);
        }
    });

    let gateway = paystack.map(|client| Arc::new(client) as Arc<dyn PaymentGateway>);

    // === 4. Services ===
    let service = OrderService::new(storage, metrics, gateway);
    tracing::info!(engine = service.engine(), "✅ Order tracker ready");

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;

    tracing::info!("Shutting down");
    service.shutdown().await;

    Ok(())
}
