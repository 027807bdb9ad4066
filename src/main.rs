//! Herald notification delivery service.
//!
//! Main entry point for the Herald server. Initializes all subsystems
//! and coordinates graceful startup and shutdown: database pool, queue
//! broker, delivery engine, and the HTTP API.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use herald_api::{AppState, Config, PostgresSubmissionStore};
use herald_core::{models::Channel, RealClock, Storage};
use herald_delivery::{DeliveryEngine, Dispatcher, GatewaySender, PostgresNotificationStore};
use herald_queue::{QueueBroker, RedisBroker};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    info!("Starting Herald notification service");

    let config = Config::load()?;
    info!(
        database_url = %config.database_url_masked(),
        redis_url = %config.redis_url,
        host = %config.host,
        port = config.port,
        worker_pool_size = config.worker_pool_size,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    run_migrations(&db_pool).await?;
    info!("Database migrations completed");

    let storage = Arc::new(Storage::new(db_pool.clone()));

    let broker =
        RedisBroker::connect(&config.redis_url, &config.queue_stream, &config.queue_group)
            .await
            .context("Failed to connect to queue broker")?;

    let engine = start_delivery_engine(&config, storage.clone(), &broker)?;
    info!("Delivery engine running");

    let state = AppState::new(
        Arc::new(PostgresSubmissionStore::new(storage)),
        Arc::new(broker) as Arc<dyn QueueBroker>,
    );
    let addr = config.parse_server_addr()?;
    let server_handle = tokio::spawn(async move {
        if let Err(e) = herald_api::start_server(state, addr).await {
            error!(error = %e, "Server failed");
        }
    });

    info!(addr = %addr, "Herald is ready to accept notifications");

    shutdown_signal().await;
    info!("Shutdown signal received, starting graceful shutdown");

    // Give in-flight requests time to complete
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(30)) => {
            info!("Shutdown grace period expired");
        }
        _ = server_handle => {
            info!("Server stopped");
        }
    }

    if let Err(e) = engine.shutdown().await {
        error!(error = %e, "Delivery engine shutdown failed");
    } else {
        info!("Delivery engine stopped");
    }

    db_pool.close().await;
    info!("Database connections closed");

    info!("Herald shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,herald=debug,tower_http=debug"))
        .expect("Invalid RUST_LOG environment variable");

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_thread_names(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
}

/// Builds and starts the delivery engine with one consumer per worker.
fn start_delivery_engine(
    config: &Config,
    storage: Arc<Storage>,
    broker: &RedisBroker,
) -> Result<DeliveryEngine> {
    let client = reqwest::Client::new();
    let delivery_config = config.to_delivery_config();

    let dispatcher = Arc::new(
        Dispatcher::new(delivery_config.attempt_timeout)
            .with_sender(Arc::new(GatewaySender::new(
                Channel::Email,
                client.clone(),
                config.email_gateway_url.clone(),
            )))
            .with_sender(Arc::new(GatewaySender::new(
                Channel::Sms,
                client.clone(),
                config.sms_gateway_url.clone(),
            )))
            .with_sender(Arc::new(GatewaySender::new(
                Channel::InApp,
                client,
                config.in_app_gateway_url.clone(),
            ))),
    );

    let brokers: Vec<Arc<dyn QueueBroker>> = (0..config.worker_pool_size)
        .map(|i| Arc::new(broker.with_consumer(format!("consumer-{i}"))) as Arc<dyn QueueBroker>)
        .collect();

    let store = Arc::new(PostgresNotificationStore::new(storage));
    let engine = DeliveryEngine::new(
        store,
        brokers,
        dispatcher,
        delivery_config,
        Arc::new(RealClock::new()),
    )
    .context("Failed to build delivery engine")?;

    engine.start();
    Ok(engine)
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    let mut retries = 0;
    const MAX_RETRIES: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => {
                // Verify connection works
                sqlx::query("SELECT 1")
                    .fetch_one(&pool)
                    .await
                    .context("Failed to verify database connection")?;

                return Ok(pool);
            },
            Err(_e) if retries < MAX_RETRIES => {
                retries += 1;
                info!(
                    attempt = retries,
                    max_retries = MAX_RETRIES,
                    "Database connection failed, retrying..."
                );
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}

/// Runs database migrations.
async fn run_migrations(pool: &sqlx::PgPool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS notifications (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            channel TEXT NOT NULL,
            content TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            next_attempt_at TIMESTAMPTZ,
            sent_at TIMESTAMPTZ,
            failed_at TIMESTAMPTZ
        )
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create notifications table")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_notifications_status
        ON notifications(status, next_attempt_at)
        WHERE status = 'pending'
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create notifications status index")?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_notifications_user
        ON notifications(user_id, created_at DESC)
        "#,
    )
    .execute(pool)
    .await
    .context("Failed to create notifications user index")?;

    Ok(())
}

/// Waits for shutdown signal (CTRL+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received CTRL+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}
