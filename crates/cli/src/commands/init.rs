//! Node initialisation

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use towerlink_common::{IdentityKeyPair, NodePaths, NodeRole, TunnelKeys};

use crate::output::{print_item, print_success, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct InitArgs {
    /// Node role (tower or server)
    pub role: NodeRole,
}

#[derive(Serialize)]
pub struct InitSummary {
    pub role: NodeRole,
    pub config_dir: String,
    pub fingerprint: String,
    pub wg_public_key: String,
    pub generated_identity: bool,
    pub generated_tunnel_keys: bool,
}

impl TableDisplay for InitSummary {
    fn headers() -> Vec<&'static str> {
        vec!["Role", "Config Dir", "Fingerprint", "WG Public Key", "New Identity", "New WG Keys"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.role.to_string(),
            self.config_dir.clone(),
            self.fingerprint.clone(),
            self.wg_public_key.clone(),
            self.generated_identity.to_string(),
            self.generated_tunnel_keys.to_string(),
        ]
    }
}

/// Create key material (only where absent) and record the node role
pub fn initialise(paths: &NodePaths, role: NodeRole) -> Result<InitSummary> {
    paths
        .ensure_root()
        .with_context(|| format!("failed to create {}", paths.root().display()))?;

    let (tunnel, generated_tunnel_keys) =
        TunnelKeys::load_or_generate(paths).context("failed to prepare WireGuard keys")?;
    let (identity, generated_identity) =
        IdentityKeyPair::load_or_generate(paths).context("failed to prepare identity key")?;
    paths.write_node_config(role)?;

    Ok(InitSummary {
        role,
        config_dir: paths.root().display().to_string(),
        fingerprint: identity.fingerprint(),
        wg_public_key: tunnel.public_key,
        generated_identity,
        generated_tunnel_keys,
    })
}

pub fn execute(args: InitArgs, paths: &NodePaths, format: OutputFormat) -> Result<()> {
    let summary = initialise(paths, args.role)?;
    print_success(&format!("Initialised {} node in {}", args.role, summary.config_dir));
    print_item(&summary, format);
    Ok(())
}
