//! Turnstile server process.
//!
//! Loads configuration, connects and migrates `PostgreSQL`, starts the expiry sweeper and
//! serves HTTP until Ctrl+C.

use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use turnstile_core::environment::SystemClock;
use turnstile_postgres::{PostgresStaffDirectory, PostgresTicketingStore};
use turnstile_runtime::retry::{RetryPolicy, retry_with_backoff};
use turnstile_runtime::{BookingLedger, CheckInValidator, ExpirySweeper, metrics};
use turnstile_server::{AppState, Config, build_router};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,turnstile=debug,sqlx=warn,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("invalid configuration")?;
    tracing::info!(
        bind = %config.bind_address(),
        grace_minutes = config.check_in.grace_minutes,
        storage_timeout_ms = config.check_in.storage_timeout_ms,
        "Configuration loaded"
    );

    let metrics_handle = metrics::install_recorder()?;

    let connect_policy = RetryPolicy::builder()
        .max_retries(5)
        .initial_delay(Duration::from_millis(500))
        .max_delay(Duration::from_secs(10))
        .build();
    let store = retry_with_backoff(connect_policy, || {
        PostgresTicketingStore::connect(
            &config.postgres.url,
            config.postgres.max_connections,
            Duration::from_secs(config.postgres.connect_timeout),
        )
    })
    .await
    .context("could not connect to PostgreSQL")?;
    store.migrate().await.context("migrations failed")?;
    tracing::info!("Database ready");

    let store = Arc::new(store);
    let staff = Arc::new(PostgresStaffDirectory::new(store.pool().clone()));
    let signer = Arc::new(config.signer()?);
    let clock = Arc::new(SystemClock);

    let ledger = BookingLedger::new(
        store.clone(),
        Arc::clone(&signer),
        clock.clone(),
        config.booking_policy(),
    );
    let validator = CheckInValidator::new(
        store.clone(),
        staff,
        signer,
        clock.clone(),
        config.check_in_policy(),
    );
    let sweeper = ExpirySweeper::new(store.clone(), clock, config.check_in_policy());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper_task = tokio::spawn(sweeper.run(config.sweep_interval(), shutdown_rx));

    let state = AppState::new(ledger, validator, store, metrics_handle);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind_address())
        .await
        .with_context(|| format!("could not bind {}", config.bind_address()))?;
    tracing::info!(address = %config.bind_address(), "Turnstile listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %err, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutting down gracefully...");
        })
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(err) = sweeper_task.await {
        tracing::error!(error = %err, "Expiry sweeper task failed");
    }
    tracing::info!("Shutdown complete");
    Ok(())
}
