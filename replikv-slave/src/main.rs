use anyhow::{Context, Result};
use clap::Parser;
use replikv_slave::replication::MasterConnector;
use replikv_slave::{
    AppState, KVStore, ReplicaStore, SlaveConfig, SlaveNode, TcpMasterConnector, create_router,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "replikv-slave")]
#[command(about = "Replication slave with failover control", long_about = None)]
#[command(version)]
struct Args {
    /// Path to YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Master host (overrides config)
    #[arg(long)]
    master_host: Option<String>,

    /// Master replication port (overrides config)
    #[arg(long)]
    master_port: Option<u16>,

    /// HTTP port for the admin and query API (overrides config)
    #[arg(short, long)]
    port: Option<u16>,
}

fn load_config(args: &Args) -> Result<SlaveConfig> {
    let mut config = match &args.config {
        Some(path) => SlaveConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => SlaveConfig::default(),
    };

    if let Some(host) = &args.master_host {
        config.replication.master_host = host.clone();
    }
    if let Some(port) = args.master_port {
        config.replication.master_port = port;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    config.validate()?;
    Ok(config)
}

fn init_tracing(config: &SlaveConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.logging.level));

    if config.logging.format == "json" {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;

    init_tracing(&config);

    info!("Starting ReplikV Slave v{}", env!("CARGO_PKG_VERSION"));

    // Local store fed by the master's write stream
    let kv_store = Arc::new(KVStore::new(config.kv_store.clone()));
    kv_store.start_ttl_cleanup();

    let connector = TcpMasterConnector::new(&config.replication);
    info!("Replica id: {}", connector.replica_id());

    let slave = SlaveNode::start(
        config.replication.clone(),
        config.failover.clone(),
        kv_store.clone() as Arc<dyn ReplicaStore>,
        Arc::new(connector) as Arc<dyn MasterConnector>,
    )?;

    let app = create_router(AppState {
        slave: slave.clone(),
        kv_store,
    });

    let addr = config.server_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
        })
        .await?;

    slave.shutdown().await;
    Ok(())
}
