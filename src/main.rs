use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::signal;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use floodgate::config::FloodgateConfig;
use floodgate::mesh::{Cluster, ClusterConfig, SettingsRelay};
use floodgate::ratelimit::{FloodDetector, Settings, SettingsBus, SettingsManager};
use floodgate::server::HttpServer;
use floodgate::store::{FileStore, MemoryStore, SettingsStore};

/// Per-route flood detection in front of an HTTP pipeline.
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!("Starting Floodgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config = FloodgateConfig::load(args.config.as_deref())?;
    info!(
        listen_addr = %config.server.listen_addr,
        admin_addr = %config.server.admin_addr,
        "Configuration loaded"
    );

    let store: Arc<dyn SettingsStore> = match &config.store.settings_path {
        Some(path) => Arc::new(FileStore::new(path)),
        None => Arc::new(MemoryStore::new()),
    };
    let seed = config
        .store
        .seed_path
        .as_ref()
        .map(Settings::from_yaml_file)
        .transpose()?;

    let bus = SettingsBus::default();
    let detector = Arc::new(FloodDetector::new());
    let manager = Arc::new(SettingsManager::new(detector.clone(), store, bus.clone()));
    manager.load_or_seed(seed).await?;

    tokio::spawn(manager.clone().run(bus.subscribe()));

    if config.mesh.enabled {
        let cluster = Arc::new(Cluster::start(ClusterConfig::from(&config.mesh)).await?);
        let relay = SettingsRelay::new(
            cluster,
            bus.clone(),
            Duration::from_millis(config.mesh.gossip_interval_ms),
        );
        tokio::spawn(relay.run(manager.current(), bus.subscribe()));
    }

    if config.admission.sweep_interval_secs > 0 {
        let detector = detector.clone();
        let period = Duration::from_secs(config.admission.sweep_interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let evicted = detector.sweep();
                debug!(evicted = evicted, "Swept expired client windows");
            }
        });
    }

    let server = HttpServer::new(config.server, config.admission, manager);
    server.serve_with_shutdown(shutdown_signal()).await?;

    info!("Floodgate stopped");
    Ok(())
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating graceful shutdown");
        }
    }
}
