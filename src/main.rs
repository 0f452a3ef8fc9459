// ------------------------------------------------------------
// External dependencies
// ------------------------------------------------------------

use std::sync::Arc;

use anyhow::{Context, anyhow};
use clap::Parser;
use log::{info, warn};
use rustls::crypto::{CryptoProvider, ring};
use tokio::sync::watch;

use metadata_collector::{
    collector::Collector,
    config::{Config, Credentials, StoreConfig},
    exchanges::{AdapterContext, get_adapter},
    health::HealthMonitor,
    scheduler::Scheduler,
    store::{MemoryStore, RedisStore, Store},
};

/// Cross-exchange market metadata collector.
#[derive(Parser, Debug)]
#[command(name = "metadata-collector")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    /// Seconds between collection cycles (overrides the file)
    #[arg(long)]
    update_interval: Option<u64>,

    /// Seconds between health summaries (overrides the file)
    #[arg(long)]
    health_report_interval: Option<u64>,
}

// ------------------------------------------------------------
// Application entry point
// ------------------------------------------------------------
//
// Responsibilities:
// - Initialize cryptography backend (rustls)
// - Load configuration (file + CLI + environment)
// - Build health monitor, store and exchange collectors
// - Run the scheduler until ctrl-c / SIGTERM
//
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --------------------------------------------------------
    // IMPORTANT:
    // rustls >= 0.23 requires an explicit CryptoProvider
    // installation. This must be executed exactly once and
    // before reqwest builds its first client.
    // --------------------------------------------------------
    CryptoProvider::install_default(ring::default_provider())
        .map_err(|_| anyhow!("failed to install rustls CryptoProvider"))?;

    // API credentials and RUST_LOG may live in a local .env file,
    // so it is read before the logger parses the environment
    let _ = dotenvy::dotenv();

    env_logger::Builder::new()
        .filter_level(log::LevelFilter::Info)
        .filter_module("reqwest", log::LevelFilter::Warn)
        .filter_module("hyper", log::LevelFilter::Warn)
        .parse_default_env()
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    // --------------------------------------------------------
    // Shared services
    // --------------------------------------------------------
    let health = Arc::new(HealthMonitor::new());
    let store = open_store(&config.store).await?;

    let ctx = AdapterContext {
        policy: config.retry_policy(),
        timeout: config.request_timeout(),
        health: health.clone(),
    };

    // --------------------------------------------------------
    // One collector per enabled, supported exchange
    // --------------------------------------------------------
    let mut collectors = Vec::new();
    for exchange_cfg in config.exchanges.iter().filter(|e| e.enabled) {
        let credentials = Credentials::from_env(&exchange_cfg.name);
        let Some(adapter) = get_adapter(&exchange_cfg.name, &ctx, credentials)
            .with_context(|| format!("building adapter for {}", exchange_cfg.name))?
        else {
            warn!("exchange '{}' is not supported, skipping", exchange_cfg.name);
            continue;
        };

        info!("starting {} collector", exchange_cfg.name);
        collectors.push(Collector::new(adapter, store.clone(), health.clone(), exchange_cfg));
    }

    if collectors.is_empty() {
        warn!("no enabled exchanges, cycles will only reconcile");
    }

    // --------------------------------------------------------
    // Shutdown wiring
    // --------------------------------------------------------
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let reporter = health.spawn_reporter(config.health_report_interval(), shutdown_rx.clone());

    tokio::spawn(async move {
        wait_for_signal().await;
        info!("shutdown signal received, finishing current cycle");
        let _ = shutdown_tx.send(true);
    });

    let cycles = Scheduler::new(
        collectors,
        store,
        config.update_interval(),
        config.minimum_sleep(),
    )
    .with_reporter(reporter)
    .run(shutdown_rx)
    .await;

    info!("collector stopped after {} cycles", cycles);
    Ok(())
}

// ------------------------------------------------------------
// Configuration loader
// ------------------------------------------------------------
//
// Reads the JSON file, then applies CLI overrides and validates
// the merged result.
//
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    let mut config = Config::load(&cli.config)?;
    config.apply_overrides(cli.update_interval, cli.health_report_interval);
    config.validate()?;

    info!(
        "config loaded path={} exchanges={} update_interval_secs={}",
        cli.config,
        config.exchanges.len(),
        config.update_interval_secs
    );
    Ok(config)
}

async fn open_store(cfg: &StoreConfig) -> anyhow::Result<Arc<dyn Store>> {
    let store: Arc<dyn Store> = match cfg {
        StoreConfig::Memory => {
            warn!("using in-memory store, data is lost on exit");
            Arc::new(MemoryStore::new())
        }
        StoreConfig::Redis { url, prefix } => Arc::new(
            RedisStore::connect(url, prefix)
                .await
                .context("connecting to redis")?,
        ),
    };
    Ok(store)
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(err) => {
            warn!("cannot listen for SIGTERM: {}", err);
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
