//! Tunnel driver
//!
//! The daemon never speaks the tunnel protocol itself. It hands generated
//! files to `wg-quick` and asks `wg` whether an interface exists.

use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use towerlink_common::{Error, Result};
use tracing::debug;

/// External program bringing tunnel interfaces up and down
#[async_trait]
pub trait TunnelDriver: Send + Sync {
    /// Whether the interface currently exists
    async fn is_up(&self, name: &str) -> Result<bool>;

    /// Bring an interface up from its definition file
    async fn up(&self, config: &Path) -> Result<()>;

    /// Tear an interface down using its definition file
    async fn down(&self, config: &Path) -> Result<()>;
}

/// Replace a running interface with the definition at `config`.
///
/// There is no partial update: an interface that is up is torn down first,
/// then brought up from the new file.
pub async fn apply_interface(
    driver: &dyn TunnelDriver,
    name: &str,
    config: &Path,
    settle: Duration,
) -> Result<()> {
    if driver.is_up(name).await? {
        debug!("Bringing down {}", name);
        driver.down(config).await?;
        if !settle.is_zero() {
            tokio::time::sleep(settle).await;
        }
    }

    debug!("Bringing up {}", name);
    driver.up(config).await?;

    if !driver.is_up(name).await? {
        return Err(Error::Driver(format!(
            "interface {} missing after bringing it up",
            name
        )));
    }
    Ok(())
}

/// `wg-quick` based driver
#[derive(Debug, Clone)]
pub struct WgQuickDriver {
    wg_quick: String,
    wg: String,
}

impl WgQuickDriver {
    pub fn new(wg_quick: impl Into<String>, wg: impl Into<String>) -> Self {
        Self {
            wg_quick: wg_quick.into(),
            wg: wg.into(),
        }
    }

    async fn wg_quick(&self, action: &str, config: &Path) -> Result<std::process::Output> {
        Command::new(&self.wg_quick)
            .arg(action)
            .arg(config)
            .output()
            .await
            .map_err(|e| Error::Driver(format!("failed to run {}: {}", self.wg_quick, e)))
    }
}

#[async_trait]
impl TunnelDriver for WgQuickDriver {
    async fn is_up(&self, name: &str) -> Result<bool> {
        let output = Command::new(&self.wg)
            .args(["show", name])
            .output()
            .await
            .map_err(|e| Error::Driver(format!("failed to run {}: {}", self.wg, e)))?;
        Ok(output.status.success())
    }

    async fn up(&self, config: &Path) -> Result<()> {
        let output = self.wg_quick("up", config).await?;
        if !output.status.success() {
            return Err(Error::Driver(format!(
                "failed to start wg interface: {} | {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }

    async fn down(&self, config: &Path) -> Result<()> {
        let output = self.wg_quick("down", config).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            // Already gone is what we wanted.
            if !stderr.contains("does not exist") && !stderr.contains("is not a WireGuard interface") {
                return Err(Error::Driver(format!(
                    "failed to stop wg interface: {} | {}",
                    output.status,
                    stderr.trim()
                )));
            }
        }
        Ok(())
    }
}
