use anyhow::Result;
use clap::Parser;
use diesel::{Connection, PgConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{pooled_connection::bb8::Pool, AsyncPgConnection};
use diesel_migrations::MigrationHarness;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use inventory_service::api::{self, AppState};
use inventory_service::chaos::ChaosInjector;
use inventory_service::config::Args;
use inventory_service::engine::ReservationEngine;
use inventory_service::ingress::TaskIngress;
use inventory_service::outbox::{HttpCallbackSender, OutboxDispatcher};
use inventory_service::store::{InventoryStore, PgInventoryStore};
use inventory_service::task_consumer::TaskConsumer;
use inventory_service::MIGRATIONS;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    info!("Running database migrations...");
    let mut conn = PgConnection::establish(&args.database_url)?;
    conn.run_pending_migrations(MIGRATIONS).map_err(|e| anyhow::anyhow!("Migration error: {}", e))?;
    info!("Migrations completed successfully");

    let config = AsyncDieselConnectionManager::<AsyncPgConnection>::new(&args.database_url);
    let pool = Pool::builder().build(config).await?;
    let store: Arc<dyn InventoryStore> = Arc::new(PgInventoryStore::new(pool));

    let chaos = args.chaos_config();
    if chaos.enabled || chaos.post_commit_fail_enabled {
        warn!(?chaos, "chaos hooks enabled");
    }
    if chaos.enabled && chaos.delay >= args.task_retry_policy().deadline {
        warn!("CHAOS_DELAY_MS reaches TASK_DEADLINE_MS, delayed queued tasks will never be decided");
    }
    let engine = Arc::new(ReservationEngine::new(store.clone(), ChaosInjector::new(chaos)));

    let outbox_config = args.outbox_config();
    if args.order_service_url.is_none() || args.order_callback_secret.is_none() {
        warn!("ORDER_SERVICE_URL or ORDER_CALLBACK_SECRET unset, status callbacks will fail");
    }
    let sender = HttpCallbackSender::new(
        args.order_service_url.clone(),
        args.order_callback_secret.clone(),
        outbox_config.delivery_timeout,
    )?;
    let dispatcher = Arc::new(OutboxDispatcher::new(store.clone(), Arc::new(sender), outbox_config.clone()));

    let cancel = CancellationToken::new();
    let scheduler = dispatcher.clone().spawn(cancel.clone());
    let ingress = TaskIngress::new(engine, Some(dispatcher));

    if let Some(brokers) = &args.kafka_brokers {
        let consumer: StreamConsumer = ClientConfig::new()
            .set("group.id", &args.kafka_group_id)
            .set("bootstrap.servers", brokers)
            .set("enable.partition.eof", "false")
            .set("session.timeout.ms", "6000")
            .set("enable.auto.commit", "false")
            .create()?;
        consumer.subscribe(&[&args.task_topic])?;

        let task_consumer = TaskConsumer::new(
            ingress.clone(),
            args.task_retry_policy(),
            args.task_redelivery_delay(),
        );
        tokio::spawn(async move {
            task_consumer.run(consumer).await;
        });
        info!(topic = %args.task_topic, "consuming reservation tasks from Kafka");
    }

    let app_state = AppState {
        ingress,
        store,
        max_attempts: outbox_config.max_attempts,
    };

    let app = api::create_router(app_state);
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Inventory service listening on port {}", args.port);

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
    scheduler.await?;

    Ok(())
}
