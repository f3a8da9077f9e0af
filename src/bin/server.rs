//! Fleet Router server binary.
//! Run with: cargo run --bin fleet-router -- --help

use clap::Parser;
use fleet_router::{RouterConfig, RouterProcess};
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = dotenv::dotenv() {
        eprintln!("no .env file loaded: {e}");
    }

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = RouterConfig::parse();

    info!("starting fleet router");
    info!(routing_logic = ?config.routing_logic, service_discovery = ?config.service_discovery, "configuration loaded");

    let process = match RouterProcess::start(config).await {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "failed to start router process");
            return Err(e.into());
        }
    };

    let process = std::sync::Arc::new(process);
    let mut serving = {
        let process = process.clone();
        tokio::spawn(async move { process.serve().await })
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("ctrl-c received, shutting down");
            process.trigger_shutdown();
            let _ = serving.await;
        }
        result = &mut serving => {
            if let Ok(Err(e)) = result {
                error!(error = %e, "server exited with error");
                return Err(e.into());
            }
        }
    }

    Ok(())
}
