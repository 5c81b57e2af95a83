//! Daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use towerlink_common::NodePaths;

/// Daemon configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Node configuration directory. The file itself lives there, so it is
    /// only ever set from `--config-dir` or the environment.
    #[serde(skip)]
    pub config_dir: PathBuf,

    /// HTTP listen address
    pub listen: String,

    /// Seconds between membership record checks
    pub reconcile_interval_secs: u64,

    /// Seconds to wait for in-flight requests on shutdown
    pub shutdown_grace_secs: u64,

    /// Tunnel driver configuration
    pub wireguard: WireguardConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            config_dir: towerlink_common::default_config_dir(),
            listen: "0.0.0.0:8080".to_string(),
            reconcile_interval_secs: 2,
            shutdown_grace_secs: 10,
            wireguard: WireguardConfig::default(),
        }
    }
}

/// WireGuard-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WireguardConfig {
    /// UDP listen port written into tower interfaces and server endpoints
    pub listen_port: u16,

    /// PersistentKeepalive for server-side peers
    pub keepalive_secs: u16,

    /// Pause between bringing an interface down and up again
    pub settle_millis: u64,

    /// Path to the wg-quick binary
    pub wg_quick_path: String,

    /// Path to the wg binary
    pub wg_path: String,
}

impl Default for WireguardConfig {
    fn default() -> Self {
        Self {
            listen_port: towerlink_common::DEFAULT_LISTEN_PORT,
            keepalive_secs: 25,
            settle_millis: 1000,
            wg_quick_path: "wg-quick".to_string(),
            wg_path: "wg".to_string(),
        }
    }
}

impl DaemonConfig {
    /// Load configuration from file
    pub fn load(path: &std::path::Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn paths(&self) -> NodePaths {
        NodePaths::new(&self.config_dir)
    }

    pub fn reconcile_interval(&self) -> Duration {
        Duration::from_secs(self.reconcile_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.wireguard.settle_millis)
    }
}
