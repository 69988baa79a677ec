//! `ark-gateway` binary entrypoint: loads configuration, wires up the
//! adapters (real `reqwest`-backed ones against Arkd/Lnd, or in-memory mocks
//! under `--ephemeral` for local smoke-testing), starts the background
//! loops, and serves the admin/health surface until `ctrl_c`.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use ark_gateway::adapters::chain::HttpChainAdapter;
use ark_gateway::adapters::lightning::{HttpLightningAdapter, MockLightningAdapter};
use ark_gateway::adapters::{ChainAdapter, MockChainAdapter};
use ark_gateway::admin::{self, Metrics};
use ark_gateway::bootstrap::GatewayHandles;
use ark_gateway::config::GatewayConfig;

#[derive(Parser, Debug)]
#[command(name = "ark-gateway", about = "Off-chain Ark gateway relay")]
struct Cli {
    /// Path to an optional config.toml overlay.
    #[arg(long)]
    config: Option<String>,

    /// Run entirely against in-memory mock adapters and a temporary store
    /// instead of the configured Arkd/Lnd endpoints.
    #[arg(long, default_value_t = false)]
    ephemeral: bool,

    /// Base URL of the chain-node (Arkd-equivalent) adapter.
    #[arg(long, env = "VISION_GW_CHAIN_URL", default_value = "http://127.0.0.1:7090")]
    chain_url: String,

    /// Base URL of the Lightning (Lnd-equivalent) adapter.
    #[arg(long, env = "VISION_GW_LIGHTNING_URL", default_value = "http://127.0.0.1:7091")]
    lightning_url: String,
}

fn init_tracing() {
    let filter = std::env::var("VISION_GW_LOG").unwrap_or_else(|_| std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let env_filter = EnvFilter::try_new(filter).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = GatewayConfig::load(cli.config.as_deref())?;

    tracing::info!(data_dir = %config.data_dir, ephemeral = cli.ephemeral, "ark-gateway starting up");

    let handles = if cli.ephemeral {
        let store = ark_gateway::store::LedgerStore::open_temporary()?;
        let chain: Arc<dyn ChainAdapter> = Arc::new(MockChainAdapter::new());
        let lightning = Arc::new(MockLightningAdapter::new());
        GatewayHandles::new_with_store(config.clone(), store, chain, lightning)
    } else {
        let chain: Arc<dyn ChainAdapter> = Arc::new(HttpChainAdapter::new(cli.chain_url.clone()));
        let lightning = Arc::new(HttpLightningAdapter::new(cli.lightning_url.clone()));
        GatewayHandles::new(config.clone(), chain, lightning)?
    };

    let cancel = CancellationToken::new();
    let loops = handles.start(cancel.clone());

    let metrics = Arc::new(Metrics::new());
    let app = admin::build_router(handles, metrics);

    let addr: SocketAddr = config
        .admin_bind_addr
        .parse()
        .unwrap_or_else(|_| SocketAddr::from(([127, 0, 0, 1], 7080)));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            tracing::error!(listen = %addr, error = ?e, "failed to bind admin surface");
            cancel.cancel();
            return Err(e.into());
        }
    };
    tracing::info!(listen = %addr, "admin surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutdown signal received, draining background loops");
            cancel.cancel();
        })
        .await?;

    for handle in loops {
        let _ = handle.await;
    }

    Ok(())
}
