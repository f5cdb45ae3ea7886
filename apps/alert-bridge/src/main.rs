//! Alert Bridge Binary
//!
//! Starts the alert-to-order bridge.
//!
//! # Usage
//!
//! ```bash
//! alert-bridge [config.yaml]
//! ```
//!
//! # Environment Variables
//!
//! - `CONFIG_PATH`: Config file path (default: config.yaml, overridden by
//!   the first CLI argument)
//! - `RUST_LOG`: Log level (default: info)
//!
//! Secrets referenced from the config file (`${DHAN_ACCESS_TOKEN}` and the
//! like) are read from the environment at load time.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::signal;

use alert_bridge::broker::dhan::DhanConfig;
use alert_bridge::broker::{BrokerApi, DhanClient};
use alert_bridge::catalog::InstrumentCatalog;
use alert_bridge::config::{Config, load_config};
use alert_bridge::execution::OrderExecutor;
use alert_bridge::expiry::{ExpiryResolver, default_cutoff};
use alert_bridge::notify::{NoopNotifier, OutcomeNotifier, TelegramNotifier};
use alert_bridge::pipeline::AlertPipeline;
use alert_bridge::risk::QuantitySizer;
use alert_bridge::server::{AppState, create_router};
use alert_bridge::state::StateStore;
use alert_bridge::symbols::SymbolNormalizer;
use alert_bridge::telemetry::init_telemetry;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_telemetry();

    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("CONFIG_PATH").ok());
    let config = load_config(config_path.as_deref()).context("loading configuration")?;

    tracing::info!(
        http_port = config.server.http_port,
        dataset = %config.catalog.dataset_path,
        state = %config.state.path,
        "Starting alert bridge"
    );

    let state = open_state(&config)?;
    let catalog = load_catalog(&config);
    let pipeline = build_pipeline(&config, Arc::clone(&state), Arc::clone(&catalog))?;

    let app_state = AppState {
        pipeline: Arc::new(pipeline),
        catalog,
        state,
        webhook_secret: Arc::from(config.server.webhook_secret.as_str()),
        dataset_path: Arc::from(config.catalog.dataset_path.as_str()),
    };
    let app = create_router(app_state);

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.http_port)
        .parse()
        .context("parsing bind address")?;
    let listener = TcpListener::bind(addr).await.context("binding listener")?;

    tracing::info!(%addr, "HTTP server starting");
    tracing::info!("Endpoints:");
    tracing::info!("  GET  /health");
    tracing::info!("  POST /webhook");
    tracing::info!("  GET  /v1/positions");
    tracing::info!("  POST /v1/refresh-catalog");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serving HTTP")?;

    tracing::info!("Alert bridge stopped");
    Ok(())
}

/// Open the durable state store. A corrupt state file is fatal: the process
/// must not trade on an empty state it did not choose.
fn open_state(config: &Config) -> anyhow::Result<Arc<StateStore>> {
    let store = StateStore::open(
        &config.state.path,
        chrono::Duration::days(config.state.processed_retention_days),
        config.state.processed_cap,
    )
    .context("opening state store")?;
    Ok(Arc::new(store))
}

/// Load the instrument catalog. A failed initial load starts the process
/// stale; the refresh endpoint can recover it without a restart.
fn load_catalog(config: &Config) -> Arc<InstrumentCatalog> {
    let catalog = InstrumentCatalog::new(&config.catalog.weekly_underlyings);
    if let Err(e) = catalog.refresh_from_path(std::path::Path::new(&config.catalog.dataset_path)) {
        tracing::warn!(error = %e, "Initial catalog load failed, starting stale");
    }
    Arc::new(catalog)
}

/// Wire the pipeline from configuration.
fn build_pipeline(
    config: &Config,
    state: Arc<StateStore>,
    catalog: Arc<InstrumentCatalog>,
) -> anyhow::Result<AlertPipeline> {
    let broker: Arc<dyn BrokerApi> = Arc::new(
        DhanClient::new(DhanConfig {
            base_url: config.broker.base_url.clone(),
            client_id: config.broker.client_id.clone(),
            access_token: config.broker.access_token.clone(),
            timeout: Duration::from_secs(config.broker.timeout_secs),
        })
        .context("building broker client")?,
    );

    let notifier: Arc<dyn OutcomeNotifier> = match &config.notify.telegram {
        Some(telegram) => Arc::new(TelegramNotifier::new(
            TelegramNotifier::DEFAULT_BASE_URL,
            &telegram.bot_token,
            &telegram.chat_id,
        )),
        None => Arc::new(NoopNotifier),
    };

    let executor = OrderExecutor::new(broker, Arc::clone(&state), notifier, config.broker.retry.clone());

    let resolver = ExpiryResolver::new(
        &config.trading.holidays,
        config.trading.cutoff_time().unwrap_or_else(default_cutoff),
    );

    Ok(AlertPipeline::new(
        SymbolNormalizer::new(&config.catalog.symbol_aliases),
        catalog,
        resolver,
        QuantitySizer::new(config.risk.clone()),
        state,
        executor,
    ))
}

/// Wait for SIGTERM or Ctrl+C.
///
/// # Panics
///
/// Panics when signal handlers cannot be installed; a process that cannot
/// respond to termination signals should fail at startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
