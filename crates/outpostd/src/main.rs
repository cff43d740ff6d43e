//! outpostd — the Outpost placement daemon.
//!
//! Loads `outpost.toml`, restores the placement registry from its store,
//! and serves the REST API.
//!
//! # Usage
//!
//! ```text
//! outpostd serve --config /etc/outpost/outpost.toml --dry-run
//! outpostd check --config /etc/outpost/outpost.toml
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use outpost_core::config::DEFAULT_CONFIG_PATH;
use outpost_core::{OutpostConfig, StorageBackend};
use outpost_registry::{
    ContainerEngine, DryRunEngine, PlacementRegistry, StaticCatalog, WorkloadCatalog, vet_document,
};
use outpost_state::{ConfigStore, JsonFileStore, RedbStore};

#[derive(Parser)]
#[command(name = "outpostd", about = "Outpost placement daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Restore the registry and serve the REST API.
    Serve {
        /// Path to outpost.toml. Missing file means defaults.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,

        /// Override `daemon.listen`.
        #[arg(long)]
        listen: Option<SocketAddr>,

        /// Use the logging-only engine instead of a real container engine.
        #[arg(long)]
        dry_run: bool,
    },

    /// Validate the config and the persisted placement document.
    Check {
        /// Path to outpost.toml.
        #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Serve {
            config,
            listen,
            dry_run,
        } => serve(&config, listen, dry_run).await,
        Command::Check { config } => check(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,outpost=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn open_store(config: &OutpostConfig) -> anyhow::Result<Arc<dyn ConfigStore>> {
    let path = &config.storage.path;
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let store: Arc<dyn ConfigStore> = match config.storage.backend {
        StorageBackend::Json => Arc::new(JsonFileStore::new(path)),
        StorageBackend::Redb => Arc::new(
            RedbStore::open(path).with_context(|| format!("opening {}", path.display()))?,
        ),
    };
    info!(path = ?path, backend = ?config.storage.backend, "placement store opened");
    Ok(store)
}

fn catalog(config: &OutpostConfig) -> anyhow::Result<StaticCatalog> {
    let catalog = StaticCatalog::from_names(&config.catalog.workloads)
        .context("invalid workload name in [catalog]")?;
    if catalog.is_empty() {
        info!("no catalog configured, any workload id is placeable");
    } else {
        info!(workloads = catalog.len(), "workload catalog loaded");
    }
    Ok(catalog)
}

async fn serve(config_path: &Path, listen: Option<SocketAddr>, dry_run: bool) -> anyhow::Result<()> {
    if !dry_run {
        bail!("no container engine client is built in; rerun with --dry-run");
    }

    let config = OutpostConfig::from_file_or_default(config_path)?;
    info!(config = ?config_path, "outpost daemon starting");

    let addr = match listen {
        Some(addr) => addr,
        None => config
            .daemon
            .listen
            .parse()
            .with_context(|| format!("invalid daemon.listen: {}", config.daemon.listen))?,
    };

    let store = open_store(&config)?;
    let catalog: Arc<dyn WorkloadCatalog> = Arc::new(catalog(&config)?);
    let engine: Arc<dyn ContainerEngine> = Arc::new(DryRunEngine::new());
    warn!("dry-run engine selected, no workloads will actually start");

    let (registry, report) = PlacementRegistry::load(store, engine, catalog.as_ref()).await?;
    if !report.is_clean() {
        warn!(
            skipped = report.skipped.len(),
            unattached = report.unattached.len(),
            "placement document restored with issues"
        );
    }

    let router = outpost_api::build_router(registry.clone(), catalog);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "API server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "failed to listen for ctrl-c");
            }
            info!("shutdown signal received");
        })
        .await?;

    if registry.needs_reconcile() {
        warn!("placement document out of date, attempting final flush");
        if let Err(e) = registry.flush().await {
            error!(error = %e, "final flush failed");
        }
    }
    registry.shutdown().await;

    info!("outpost daemon stopped");
    Ok(())
}

fn check(config_path: &Path) -> anyhow::Result<()> {
    let config = OutpostConfig::from_file(config_path)?;
    let catalog = catalog(&config)?;

    let path = &config.storage.path;
    if !path.exists() {
        bail!("no placement document at {}", path.display());
    }
    let store: Box<dyn ConfigStore> = match config.storage.backend {
        StorageBackend::Json => Box::new(JsonFileStore::new(path)),
        StorageBackend::Redb => Box::new(
            RedbStore::open_existing(path).with_context(|| format!("opening {}", path.display()))?,
        ),
    };
    let (raw, shape) = store.load_document()?;

    let vetted = vet_document(&raw, &catalog);
    let workloads: usize = raw.hosts.values().map(Vec::len).sum();
    let issues: Vec<String> = vetted.skipped.iter().map(ToString::to_string).collect();

    let summary = serde_json::json!({
        "config": config_path.display().to_string(),
        "backend": config.storage.backend,
        "path": config.storage.path.display().to_string(),
        "shape": format!("{shape:?}").to_lowercase(),
        "hosts": raw.hosts.len(),
        "workloads": workloads,
        "restorable": vetted.workloads(),
        "issues": issues,
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if !issues.is_empty() {
        bail!("{} placement entries would be skipped on load", issues.len());
    }
    Ok(())
}
