//! Reconciliation loop
//!
//! Polls the membership record and, whenever its content hash changes,
//! regenerates and re-applies every tunnel interface. A failed pass leaves
//! the previous hash in place so the next tick retries from scratch.

use crate::driver::{apply_interface, TunnelDriver};
use crate::interface::{
    generate_interfaces, write_interface, InterfaceDefinition, InterfaceOptions,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use towerlink_common::{Error, MembershipStore, NodePaths, NodeRole, Result, TunnelKeys};
use tracing::{debug, error, info};

/// Lifecycle of one tunnel interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InterfaceState {
    Absent,
    /// Brought up from the record with this hash
    Applied { hash: String },
}

/// Result of a single tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// No membership record on disk yet
    NoRecord,
    Unchanged,
    /// Interfaces regenerated and applied
    Applied { interfaces: usize },
}

/// Reconciler keeping tunnel interfaces in line with the membership record
pub struct Reconciler {
    role: NodeRole,
    paths: NodePaths,
    store: MembershipStore,
    driver: Arc<dyn TunnelDriver>,
    options: InterfaceOptions,
    settle: Duration,
    interval: Duration,
    last_hash: Option<String>,
    interfaces: BTreeMap<String, InterfaceState>,
}

impl Reconciler {
    pub fn new(
        role: NodeRole,
        paths: NodePaths,
        store: MembershipStore,
        driver: Arc<dyn TunnelDriver>,
        options: InterfaceOptions,
    ) -> Self {
        Self {
            role,
            paths,
            store,
            driver,
            options,
            settle: Duration::from_secs(1),
            interval: Duration::from_secs(2),
            last_hash: None,
            interfaces: BTreeMap::new(),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_settle_delay(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    /// State of an interface by name
    pub fn interface_state(&self, name: &str) -> InterfaceState {
        self.interfaces
            .get(name)
            .cloned()
            .unwrap_or(InterfaceState::Absent)
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Reconciler started for {} node", self.role);

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    match self.tick().await {
                        Ok(TickOutcome::Applied { interfaces }) => {
                            info!("WireGuard interfaces updated successfully ({})", interfaces);
                        }
                        Ok(_) => {}
                        Err(e) => error!("Error writing WireGuard interfaces: {}", e),
                    }
                }
            }
        }

        info!("Reconciler stopped");
    }

    /// Check the record once and reconcile if it changed
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        let store = self.store.clone();
        let hash = match blocking(move || store.content_hash()).await? {
            Some(hash) => hash,
            None => return Ok(TickOutcome::NoRecord),
        };

        if self.last_hash.as_deref() == Some(hash.as_str()) {
            return Ok(TickOutcome::Unchanged);
        }

        info!("Membership record changed, reloading WireGuard interfaces");
        let interfaces = self.reconcile(&hash).await?;
        self.last_hash = Some(hash);
        Ok(TickOutcome::Applied { interfaces })
    }

    async fn reconcile(&mut self, hash: &str) -> Result<usize> {
        let (role, paths, store, options) = (
            self.role,
            self.paths.clone(),
            self.store.clone(),
            self.options,
        );
        let defs = blocking(move || write_all_interfaces(role, &paths, &store, options)).await?;

        for def in &defs {
            // Not running until the driver confirms it.
            self.interfaces.insert(def.name.clone(), InterfaceState::Absent);
            apply_interface(self.driver.as_ref(), &def.name, &def.path, self.settle).await?;
            self.interfaces.insert(
                def.name.clone(),
                InterfaceState::Applied {
                    hash: hash.to_string(),
                },
            );
        }

        Ok(defs.len())
    }
}

/// Render every interface from the current record and write them all
/// before the driver sees any of them
fn write_all_interfaces(
    role: NodeRole,
    paths: &NodePaths,
    store: &MembershipStore,
    options: InterfaceOptions,
) -> Result<Vec<InterfaceDefinition>> {
    let doc = store.load()?;
    let keys = TunnelKeys::load(paths)?;

    let defs = generate_interfaces(role, paths, options, &keys.private_key, &doc);
    for def in &defs {
        write_interface(def)?;
        debug!("Wrote {}", def.path.display());
    }
    Ok(defs)
}

/// Run file work off the async runtime
async fn blocking<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| Error::Internal(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{Call, RecordingDriver};
    use tempfile::TempDir;
    use towerlink_common::{Network, Peer};

    const OPTIONS: InterfaceOptions = InterfaceOptions {
        listen_port: 51820,
        keepalive_secs: 25,
    };

    struct Fixture {
        _tmp: TempDir,
        paths: NodePaths,
        store: MembershipStore,
        driver: Arc<RecordingDriver>,
    }

    fn fixture() -> Fixture {
        let tmp = TempDir::new().unwrap();
        let paths = NodePaths::new(tmp.path());
        TunnelKeys::generate().save(&paths).unwrap();
        let store = MembershipStore::new(paths.connections_file());
        Fixture {
            _tmp: tmp,
            paths,
            store,
            driver: Arc::new(RecordingDriver::default()),
        }
    }

    fn reconciler(f: &Fixture) -> Reconciler {
        reconciler_for(f, NodeRole::Tower)
    }

    fn reconciler_for(f: &Fixture, role: NodeRole) -> Reconciler {
        Reconciler::new(
            role,
            f.paths.clone(),
            f.store.clone(),
            f.driver.clone(),
            OPTIONS,
        )
        .with_settle_delay(Duration::ZERO)
    }

    fn add_network(store: &MembershipStore, block: &str) {
        store
            .update(|doc| {
                doc.networks.push(Network::new(block));
                Ok(())
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_no_record_is_noop() {
        let f = fixture();
        let mut r = reconciler(&f);

        assert_eq!(r.tick().await.unwrap(), TickOutcome::NoRecord);
        assert!(f.driver.calls().is_empty());
    }

    #[tokio::test]
    async fn test_change_applies_then_idles() {
        let f = fixture();
        add_network(&f.store, "10.5.0.0/24");
        let mut r = reconciler(&f);

        assert_eq!(r.tick().await.unwrap(), TickOutcome::Applied { interfaces: 1 });
        assert_eq!(f.driver.calls(), vec![Call::Up("tl-t0".to_string())]);
        assert!(f.paths.interface_dir().join("tl-t0.conf").exists());
        assert!(matches!(r.interface_state("tl-t0"), InterfaceState::Applied { .. }));

        assert_eq!(r.tick().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(r.tick().await.unwrap(), TickOutcome::Unchanged);
        assert_eq!(f.driver.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_membership_change_cycles_interface() {
        let f = fixture();
        add_network(&f.store, "10.5.0.0/24");
        let mut r = reconciler(&f);
        r.tick().await.unwrap();

        let net_id = f.store.load().unwrap().networks[0].id.clone();
        f.store
            .update(|doc| {
                doc.network_mut(&net_id).unwrap().peers.push(Peer {
                    id: "p1".to_string(),
                    public_key: "PEERKEY".to_string(),
                    address: "10.5.0.1/32".to_string(),
                    endpoint: None,
                });
                Ok(())
            })
            .unwrap();

        assert_eq!(r.tick().await.unwrap(), TickOutcome::Applied { interfaces: 1 });
        assert_eq!(
            f.driver.calls(),
            vec![
                Call::Up("tl-t0".to_string()),
                Call::Down("tl-t0".to_string()),
                Call::Up("tl-t0".to_string()),
            ]
        );

        let written =
            std::fs::read_to_string(f.paths.interface_dir().join("tl-t0.conf")).unwrap();
        assert!(written.contains("PublicKey = PEERKEY"));
    }

    #[tokio::test]
    async fn test_failed_pass_retries_next_tick() {
        let f = fixture();
        add_network(&f.store, "10.5.0.0/24");
        let mut r = reconciler(&f);

        *f.driver.fail_up.lock() = true;
        assert!(r.tick().await.is_err());
        assert_eq!(r.interface_state("tl-t0"), InterfaceState::Absent);

        *f.driver.fail_up.lock() = false;
        assert_eq!(r.tick().await.unwrap(), TickOutcome::Applied { interfaces: 1 });
    }

    #[tokio::test]
    async fn test_failed_up_after_down_marks_interface_absent() {
        let f = fixture();
        add_network(&f.store, "10.5.0.0/24");
        let mut r = reconciler(&f);
        r.tick().await.unwrap();
        assert!(matches!(r.interface_state("tl-t0"), InterfaceState::Applied { .. }));

        let net_id = f.store.load().unwrap().networks[0].id.clone();
        f.store
            .update(|doc| {
                doc.network_mut(&net_id).unwrap().peers.push(Peer {
                    id: "p1".to_string(),
                    public_key: "PEERKEY".to_string(),
                    address: "10.5.0.1/32".to_string(),
                    endpoint: None,
                });
                Ok(())
            })
            .unwrap();

        *f.driver.fail_up.lock() = true;
        assert!(r.tick().await.is_err());
        assert!(!f.driver.up.lock().contains("tl-t0"));
        assert_eq!(r.interface_state("tl-t0"), InterfaceState::Absent);

        *f.driver.fail_up.lock() = false;
        assert_eq!(r.tick().await.unwrap(), TickOutcome::Applied { interfaces: 1 });
        assert!(matches!(r.interface_state("tl-t0"), InterfaceState::Applied { .. }));
    }

    #[tokio::test]
    async fn test_server_role_dials_out() {
        let f = fixture();
        f.store
            .update(|doc| {
                let mut net = Network::new("10.5.3.7/32");
                net.peers.push(Peer {
                    id: "tower".to_string(),
                    public_key: "TOWERKEY".to_string(),
                    address: "10.5.3.0/24".to_string(),
                    endpoint: Some("tower.example.com".to_string()),
                });
                doc.networks.push(net);
                Ok(())
            })
            .unwrap();
        let mut r = reconciler_for(&f, NodeRole::Server);

        assert_eq!(r.tick().await.unwrap(), TickOutcome::Applied { interfaces: 1 });
        assert_eq!(f.driver.calls(), vec![Call::Up("tl-s0".to_string())]);

        let written =
            std::fs::read_to_string(f.paths.interface_dir().join("tl-s0.conf")).unwrap();
        assert!(written.contains("Endpoint = tower.example.com:51820"));
        assert!(written.contains("PersistentKeepalive = 25"));
        assert!(!written.contains("iptables"));
        assert!(!written.contains("ListenPort"));
    }

    #[tokio::test]
    async fn test_missing_tunnel_keys_keeps_old_hash() {
        let f = fixture();
        std::fs::remove_file(f.paths.tunnel_keys_file()).unwrap();
        add_network(&f.store, "10.5.0.0/24");
        let mut r = reconciler(&f);

        let err = r.tick().await.unwrap_err();
        assert!(err.is_persistence_failure());
        assert!(f.driver.calls().is_empty());

        TunnelKeys::generate().save(&f.paths).unwrap();
        assert_eq!(r.tick().await.unwrap(), TickOutcome::Applied { interfaces: 1 });
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let f = fixture();
        add_network(&f.store, "10.5.0.0/24");
        let token = CancellationToken::new();
        let r = reconciler(&f).with_interval(Duration::from_millis(10));

        let handle = tokio::spawn(r.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();

        assert_eq!(f.driver.calls(), vec![Call::Up("tl-t0".to_string())]);
    }
}
