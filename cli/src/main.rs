mod config;

use anyhow::{Context, Result};
use blockmesh_core::{ChainParams, NetworkType};
use blockmesh_network::protocol::{full_version, BUILD_DATE};
use blockmesh_network::{ControlMessage, Coordinator, NetworkContext, PeerListener, PeerRegistry};
use blockmesh_storage::{ChainStore, SledStore};
use clap::Parser;
use config::{NodeConfig, Overrides};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "blockmeshd")]
#[command(about = "blockmesh P2P node", version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the chain database
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Address to accept peers on
    #[arg(long, value_name = "ADDR")]
    listen: Option<SocketAddr>,

    /// Extra peer to discover at startup (repeatable)
    #[arg(long = "peer", value_name = "HOST[:PORT]")]
    peers: Vec<String>,

    /// Join the test network
    #[arg(long)]
    testnet: bool,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load(path)?,
        None => NodeConfig::default(),
    };
    config.apply(Overrides {
        data_dir: cli.data_dir,
        listen: cli.listen,
        peers: cli.peers,
        testnet: cli.testnet,
        log_level: cli.log_level,
    });
    init_logging(&config.logging.level);

    let network = if config.testnet {
        NetworkType::Testnet
    } else {
        NetworkType::Mainnet
    };
    let params = ChainParams::for_network(network);
    info!(
        version = %full_version(),
        built = BUILD_DATE,
        network = network.name(),
        "🚀 starting blockmeshd"
    );

    let data_dir = config.data_dir();
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;
    let store = SledStore::open(data_dir.join("chain"))
        .with_context(|| format!("opening chain database in {}", data_dir.display()))?;
    info!(
        path = %data_dir.display(),
        height = store.current_height()?,
        "chain database opened"
    );

    let seeds = std::mem::take(&mut config.network.seed_peers);
    let listen_addr = config.network.listen_addr;
    let (announce_tx, mut announcements) = mpsc::unbounded_channel();
    let (ctx, control) = NetworkContext::new(
        params,
        config.network,
        Arc::new(store),
        Arc::new(PeerRegistry::new()),
    );
    let ctx = Arc::new(ctx.with_announcements(announce_tx));

    let (shutdown_tx, shutdown) = watch::channel(false);

    if let Some(addr) = listen_addr {
        let listener = PeerListener::bind(ctx.clone(), addr)
            .await
            .with_context(|| format!("binding peer listener on {}", addr))?;
        tokio::spawn(listener.run(shutdown.clone()));
    }

    // No block layer is attached to this binary; just report what arrives
    tokio::spawn(async move {
        while let Some(announcement) = announcements.recv().await {
            info!(
                peer = %announcement.peer,
                count = announcement.hashes.len(),
                "📦 peer announced block hashes"
            );
        }
    });

    if !seeds.is_empty() {
        ctx.control
            .send(ControlMessage::DiscoverPeers { addresses: seeds })
            .context("queueing seed peers")?;
    }

    let coordinator = tokio::spawn(Coordinator::new(ctx.clone(), control).run(shutdown));

    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutting down");
    if shutdown_tx.send(true).is_err() {
        warn!("coordinator already stopped");
    }
    coordinator.await.context("coordinator task panicked")?;

    Ok(())
}
