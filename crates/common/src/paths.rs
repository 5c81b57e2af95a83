//! On-disk layout of a node's configuration directory

use crate::types::{NodeConfig, NodeRole};
use crate::{Error, Result};
use std::path::{Path, PathBuf};

/// Environment variable overriding the configuration directory
pub const CONFIG_DIR_ENV: &str = "TOWERLINK_CONFIG_DIR";

/// Default configuration directory
pub fn default_config_dir() -> PathBuf {
    std::env::var_os(CONFIG_DIR_ENV)
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("/etc/towerlink"))
}

/// Paths of every file a node keeps under its configuration directory
#[derive(Debug, Clone)]
pub struct NodePaths {
    root: PathBuf,
}

impl NodePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Membership record
    pub fn connections_file(&self) -> PathBuf {
        self.root.join("connections.json")
    }

    pub fn node_config_file(&self) -> PathBuf {
        self.root.join("config.json")
    }

    pub fn daemon_config_file(&self) -> PathBuf {
        self.root.join("daemon.toml")
    }

    pub fn tunnel_keys_file(&self) -> PathBuf {
        self.root.join("wireguard-keys.json")
    }

    pub fn identity_private_key(&self) -> PathBuf {
        self.root.join("identity.key")
    }

    pub fn identity_public_key(&self) -> PathBuf {
        self.root.join("identity.pub")
    }

    /// Directory holding generated interface definitions
    pub fn interface_dir(&self) -> PathBuf {
        self.root.join("wg-config")
    }

    pub fn ensure_root(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }

    /// Persist the node role
    pub fn write_node_config(&self, role: NodeRole) -> Result<()> {
        self.ensure_root()?;
        let data = serde_json::to_vec_pretty(&NodeConfig { role })?;
        write_private(&self.node_config_file(), &data)
    }

    /// Load the node role, `Error::NotConfigured` if `init` never ran
    pub fn load_node_config(&self) -> Result<NodeConfig> {
        let data = match std::fs::read(self.node_config_file()) {
            Ok(d) => d,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::NotConfigured)
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Load the node role and check it matches `expected`
    pub fn require_role(&self, expected: NodeRole) -> Result<NodeConfig> {
        let cfg = self.load_node_config()?;
        if cfg.role != expected {
            return Err(Error::WrongRole {
                expected: expected.to_string(),
                actual: cfg.role.to_string(),
            });
        }
        Ok(cfg)
    }
}

impl Default for NodePaths {
    fn default() -> Self {
        Self::new(default_config_dir())
    }
}

/// Write a file readable only by its owner
pub(crate) fn write_private(path: &Path, data: &[u8]) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    file.write_all(data)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_node_config_round_trip() {
        let tmp = TempDir::new().unwrap();
        let paths = NodePaths::new(tmp.path().join("etc"));

        assert!(matches!(paths.load_node_config(), Err(Error::NotConfigured)));

        paths.write_node_config(NodeRole::Tower).unwrap();
        assert_eq!(paths.load_node_config().unwrap().role, NodeRole::Tower);
    }

    #[test]
    fn test_require_role() {
        let tmp = TempDir::new().unwrap();
        let paths = NodePaths::new(tmp.path());
        paths.write_node_config(NodeRole::Server).unwrap();

        assert!(paths.require_role(NodeRole::Server).is_ok());
        assert!(matches!(
            paths.require_role(NodeRole::Tower),
            Err(Error::WrongRole { .. })
        ));
    }
}
