//! Crash Engine Server Binary
//!
//! Runs the round engine with the bundled in-memory wallet and serves the
//! HTTP API and WebSocket feed.

use clap::Parser;
use crash_engine::{
    api::ApiServer,
    config::{ConfigLoader, CrashConfig},
    engine::CrashEngine,
};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "crash-engine")]
#[command(about = "Real-time crash game round engine", long_about = None)]
struct Args {
    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    /// API server host (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// API server port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Start from the development preset: short rounds and funded demo accounts
    #[arg(long)]
    dev: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "crash_engine=info,tower_http=info".into()),
        )
        .init();

    let args = Args::parse();

    let base = if args.dev {
        CrashConfig::development()
    } else {
        CrashConfig::default()
    };
    let mut loader = ConfigLoader::new().with_base(base);
    if let Some(path) = &args.config {
        info!("📂 Loading configuration from {}", path);
        loader = loader.with_path(path);
    }
    let mut config = loader.load()?;
    if let Some(host) = args.host {
        config.api.host = host;
    }
    if let Some(port) = args.port {
        config.api.port = port;
    }
    config.validate()?;

    let (engine, _wallet) = CrashEngine::in_memory(config.clone())?;
    let engine = Arc::new(engine);
    info!(
        accounts = config.wallet.accounts.len(),
        "💰 In-memory wallet ready"
    );

    let mut handle = engine.start();
    let server = ApiServer::new(config.api.clone(), engine.clone());

    let outcome: Result<(), Box<dyn std::error::Error>> = tokio::select! {
        served = server.run() => served,
        stopped = handle.clock_stopped() => match stopped {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(error = %e, "💥 Round clock failed, exiting");
                Err(e.into())
            }
        },
    };

    if let Err(e) = handle.shutdown().await {
        error!(error = %e, "Engine stopped with a fault");
    }
    outcome
}
