use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use diesel_migrations::MigrationHarness;
use rdkafka::config::ClientConfig;
use rdkafka::producer::FutureProducer;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use order_service::api::{self, AppState};
use order_service::config::{Args, DispatchMode};
use order_service::inventory::HttpInventoryGateway;
use order_service::orchestrator::{Dispatch, OrderOrchestrator};
use order_service::queue::KafkaTaskQueue;
use order_service::store::PgOrderStore;
use order_service::MIGRATIONS;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    args.check()?;

    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&args.database_url)?;
    conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
    let pool = Pool::builder().build(config).await?;

    let dispatch = match args.dispatch_mode {
        DispatchMode::Direct => Dispatch::Direct,
        DispatchMode::Queued => {
            let brokers = args
                .kafka_brokers
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("KAFKA_BROKERS is required when DISPATCH_MODE=queued"))?;
            let producer: FutureProducer = ClientConfig::new()
                .set("bootstrap.servers", brokers)
                .set("message.timeout.ms", "5000")
                .create()?;
            let timeout = Duration::from_millis(args.reserve_timeout_ms);
            Dispatch::Queued(Arc::new(KafkaTaskQueue::new(producer, &args.task_topic, timeout)))
        }
    };
    info!(mode = ?args.dispatch_mode, "reservation dispatch configured");

    if args.order_callback_secret.is_none() {
        warn!("ORDER_CALLBACK_SECRET unset, status callbacks will be rejected");
    }

    let orchestrator = Arc::new(OrderOrchestrator::new(
        Arc::new(PgOrderStore::new(pool)),
        Arc::new(HttpInventoryGateway::new(&args.inventory_http_url, args.retry_policy())),
        dispatch,
        args.orchestrator_config(),
    ));

    let cancel = CancellationToken::new();
    let reconciler = args.reconcile_interval().map(|every| {
        info!(every_ms = every.as_millis() as u64, "reconciliation sweep enabled");
        orchestrator.clone().spawn_reconciler(every, cancel.clone())
    });

    let app = api::create_router(AppState { orchestrator });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Order service web server started on port {}", args.port);

    let shutdown = cancel.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for shutdown signal");
                std::future::pending::<()>().await;
            }
            info!("shutting down");
            shutdown.cancel();
        })
        .await?;

    cancel.cancel();
    if let Some(handle) = reconciler {
        handle.await?;
    }

    Ok(())
}
