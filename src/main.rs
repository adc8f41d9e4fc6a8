//! vps-storefront server entry point.
//!
//! Opens and migrates the database, starts the background workers and
//! serves the REST API until Ctrl-C.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use vps_storefront::api;
use vps_storefront::app_state::AppState;
use vps_storefront::collaborator::{
    AutomationProvider, LogNotifier, ManualPaymentProvider, Notifier, PaymentProvider,
    SimulatedAutomation,
};
use vps_storefront::config::ShopConfig;
use vps_storefront::domain::EventBus;
use vps_storefront::persistence;
use vps_storefront::service::{Scheduler, VpsService};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration first so LOG_FORMAT from .env is visible
    let config = ShopConfig::from_env().context("loading configuration")?;
    init_tracing();
    tracing::info!(addr = %config.listen_addr, driver = ?config.db_driver, "starting vps-storefront");

    // Persistence
    let store = persistence::connect(&config)
        .await
        .context("connecting to database")?;
    store
        .migrate(config.money_migration_forced)
        .await
        .context("migrating schema")?;

    // Collaborators
    let automation: Arc<dyn AutomationProvider> = Arc::new(SimulatedAutomation::new());
    let payments: Arc<dyn PaymentProvider> = Arc::new(ManualPaymentProvider::new(
        std::env::var("PAYMENT_ACCOUNT").unwrap_or_else(|_| "storefront".to_string()),
    ));
    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier::new(Arc::clone(&store)));
    let event_bus = EventBus::new(config.event_bus_capacity);

    // Background workers
    let shutdown = CancellationToken::new();
    let mut workers = Vec::new();
    if config.scheduler_enabled {
        let vps = VpsService::new(Arc::clone(&store), Arc::clone(&automation), event_bus.clone());
        let scheduler = Arc::new(Scheduler::new(
            Arc::clone(&store),
            Arc::clone(&automation),
            notifier,
            vps,
            event_bus.clone(),
            &config,
        ));
        workers = scheduler.spawn(shutdown.clone());
        tracing::info!(workers = workers.len(), "scheduler started");
    } else {
        tracing::warn!("scheduler disabled; approved orders will not be fulfilled");
    }

    // HTTP
    let app_state = AppState::new(store, automation, payments, event_bus, &config);
    let app = Router::new()
        .merge(api::build_router())
        .layer(TimeoutLayer::new(Duration::from_secs(
            config.composite_timeout_secs.saturating_mul(2),
        )))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("binding {}", config.listen_addr))?;
    tracing::info!(addr = %config.listen_addr, "server listening");

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutdown requested");
            signal.cancel();
        })
        .await?;

    shutdown.cancel();
    for handle in workers {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "worker ended abnormally");
        }
    }
    tracing::info!("stopped");
    Ok(())
}
