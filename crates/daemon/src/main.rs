//! Towerlink Daemon
//!
//! Serves the join protocol and health endpoint, and keeps tunnel interfaces
//! reconciled with the membership record.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use towerlink_common::{IdentityKeyPair, MembershipStore, NodeRole, TunnelKeys};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod api;
mod config;
mod driver;
mod interface;
mod join;
mod reconciler;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "towerlinkd")]
#[command(about = "Towerlink daemon - overlay network membership and reconciliation")]
#[command(version)]
struct Cli {
    /// Node configuration directory
    #[arg(long, env = "TOWERLINK_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Daemon configuration file (defaults to <config-dir>/daemon.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP listen address
    #[arg(short, long)]
    listen: Option<String>,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    info!("Towerlink daemon v{}", towerlink_common::VERSION);

    let config_dir = cli
        .config_dir
        .clone()
        .unwrap_or_else(towerlink_common::default_config_dir);
    let config_file = cli
        .config
        .clone()
        .unwrap_or_else(|| towerlink_common::NodePaths::new(&config_dir).daemon_config_file());

    let mut config = DaemonConfig::load(&config_file)
        .with_context(|| format!("failed to load {}", config_file.display()))?;
    config.config_dir = config_dir;
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }

    let paths = config.paths();
    let role = paths
        .load_node_config()
        .context("failed to load node configuration")?
        .role;
    let store = MembershipStore::new(paths.connections_file());

    let tower = match role {
        NodeRole::Tower => {
            let keys = TunnelKeys::load(&paths).context("failed to load WireGuard keys")?;
            let identity = IdentityKeyPair::load(paths.identity_private_key())
                .context("failed to load identity key")?;
            Some(join::TowerKeys {
                wg_public_key: keys.public_key,
                public_key: identity.public_key_hex(),
            })
        }
        NodeRole::Server => None,
    };

    let shutdown = CancellationToken::new();

    // Start reconciler
    let driver = Arc::new(driver::WgQuickDriver::new(
        config.wireguard.wg_quick_path.clone(),
        config.wireguard.wg_path.clone(),
    ));
    let reconciler = reconciler::Reconciler::new(
        role,
        paths.clone(),
        store.clone(),
        driver,
        interface::InterfaceOptions {
            listen_port: config.wireguard.listen_port,
            keepalive_secs: config.wireguard.keepalive_secs,
        },
    )
    .with_interval(config.reconcile_interval())
    .with_settle_delay(config.settle_delay());
    let reconciler_handle = tokio::spawn(reconciler.run(shutdown.clone()));

    // Start HTTP server
    let app = api::router(Arc::new(api::AppState { role, store, tower }));
    let listener = tokio::net::TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("failed to bind {}", config.listen))?;
    info!("Starting Towerlink {} server on {}", role, config.listen);

    let server = axum::serve(listener, app).with_graceful_shutdown({
        let shutdown = shutdown.clone();
        async move { shutdown.cancelled().await }
    });
    let mut server_handle = tokio::spawn(async move { server.await });

    // Wait for shutdown signal
    tokio::select! {
        _ = shutdown_signal() => {
            info!("Received shutdown signal");
        }
        result = &mut server_handle => {
            shutdown.cancel();
            let _ = reconciler_handle.await;
            return match result {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e).context("HTTP server error"),
                Err(e) => Err(e).context("HTTP server task failed"),
            };
        }
    }

    shutdown.cancel();

    match tokio::time::timeout(config.shutdown_grace(), &mut server_handle).await {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => error!("HTTP server shutdown error: {}", e),
        Ok(Err(e)) => error!("HTTP server task failed: {}", e),
        Err(_) => {
            warn!("In-flight requests did not drain in time, closing");
            server_handle.abort();
        }
    }

    if let Err(e) = reconciler_handle.await {
        error!("Reconciler error: {}", e);
    }

    info!("Daemon shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
