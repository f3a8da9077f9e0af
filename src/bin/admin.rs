//! routerctl — operational CLI for inspecting a running fleet router over
//! its HTTP surface.

use clap::{Parser, Subcommand};
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "routerctl")]
#[command(about = "Operational CLI for a running fleet-router process")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Base URL of the router's HTTP API.
    #[arg(long, env = "ROUTER_URL", default_value = "http://localhost:8080")]
    router_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Show process health and readiness.
    Health,

    /// Show per-backend load stats and active workflow count.
    Stats,

    /// Show one workflow's pinning and request counters.
    Workflow {
        workflow_id: String,
    },

    /// List models currently served by the fleet.
    Models,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let result = match cli.command {
        Commands::Health => fetch_and_print(&client, &format!("{}/health", cli.router_url)).await,
        Commands::Stats => fetch_and_print(&client, &format!("{}/v1/workflows/stats", cli.router_url)).await,
        Commands::Workflow { workflow_id } => {
            fetch_and_print(&client, &format!("{}/v1/workflows/{}", cli.router_url, workflow_id)).await
        }
        Commands::Models => fetch_and_print(&client, &format!("{}/v1/models", cli.router_url)).await,
    };

    if let Err(e) = result {
        error!(error = %e, "command failed");
        return Err(e);
    }

    Ok(())
}

async fn fetch_and_print(client: &reqwest::Client, url: &str) -> Result<(), Box<dyn std::error::Error>> {
    info!(url, "querying router");
    let response = client.get(url).send().await?;
    let status = response.status();
    let body: serde_json::Value = response.json().await?;
    println!("{}", serde_json::to_string_pretty(&body)?);
    if !status.is_success() {
        return Err(format!("router returned {status}").into());
    }
    Ok(())
}
