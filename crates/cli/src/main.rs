//! Towerlink CLI - Main Entry Point
//!
//! Initialises nodes, manages networks and the allow-list on a tower, and
//! joins servers to tower-hosted networks.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use towerlink_common::NodePaths;

mod client;
mod commands;
mod output;

use commands::{identity, init, network};

/// Towerlink CLI - tower/server overlay network membership
#[derive(Parser)]
#[command(name = "towerlink")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Node configuration directory
    #[arg(long, env = "TOWERLINK_CONFIG_DIR", global = true)]
    config_dir: Option<PathBuf>,

    /// Daemon address
    #[arg(long, default_value = "http://127.0.0.1:8080", global = true)]
    daemon_addr: String,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialise this node as a tower or a server
    Init(init::InitArgs),

    /// Show this node's identity key and fingerprint
    Identity,

    /// Manage networks
    #[command(subcommand)]
    Network(network::NetworkCommands),

    /// Check daemon status
    Status,

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let paths = NodePaths::new(
        cli.config_dir
            .clone()
            .unwrap_or_else(towerlink_common::default_config_dir),
    );

    match cli.command {
        Commands::Init(args) => init::execute(args, &paths, cli.format)?,
        Commands::Identity => identity::execute(&paths, cli.format)?,
        Commands::Network(cmd) => network::execute(cmd, &paths, cli.format).await?,
        Commands::Status => {
            let client = client::NodeClient::new(&cli.daemon_addr)?;
            match client.health().await {
                Ok(health) => {
                    println!(
                        "✅ Daemon is running at {} ({} node, status {})",
                        cli.daemon_addr, health.node_type, health.status
                    );
                }
                Err(e) => {
                    println!("❌ Daemon is not responding at {}: {}", cli.daemon_addr, e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Version => {
            println!("Towerlink CLI v{}", towerlink_common::VERSION);
        }
    }

    Ok(())
}
