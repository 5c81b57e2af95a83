//! Network Commands

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use serde::Serialize;
use towerlink_common::allocator::next_network_block;
use towerlink_common::identity::FINGERPRINT_LEN;
use towerlink_common::{
    IdentityKeyPair, JoinRequest, JoinResponse, MembershipDocument, MembershipStore, Network,
    NodePaths, NodeRole, Peer, TunnelKeys,
};
use tracing::{debug, info};

use crate::client::NodeClient;
use crate::output::{print_info, print_item, print_list, print_success, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum NetworkCommands {
    /// Create a new network and allocate its address block (tower only)
    Create,

    /// Allow an identity fingerprint to join this tower's networks (tower only)
    Allow {
        /// Fingerprint printed by `towerlink identity` on the joining node
        fingerprint: String,
    },

    /// Join a network hosted by a tower (server only)
    Connect {
        /// Tower API URL, e.g. http://tower.example.com:8080
        tower_url: String,

        /// Network ID on the tower
        network_id: String,

        /// Host the tower should dial back to
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// List networks, their peers, and the allowed identity fingerprints
    #[command(alias = "connections")]
    List,
}

/// Network display wrapper for serialization
#[derive(Serialize)]
pub struct NetworkDisplay {
    pub id: String,
    pub address: String,
    pub peers: usize,
}

impl From<&Network> for NetworkDisplay {
    fn from(net: &Network) -> Self {
        Self {
            id: net.id.clone(),
            address: net.address.clone(),
            peers: net.peers.len(),
        }
    }
}

impl TableDisplay for NetworkDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["ID", "Address", "Peers"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.id.clone(), self.address.clone(), self.peers.to_string()]
    }
}

/// One row per peer, flattened across networks
#[derive(Serialize)]
pub struct PeerDisplay {
    pub network_id: String,
    pub peer_id: String,
    pub address: String,
    pub public_key: String,
    pub endpoint: String,
}

impl TableDisplay for PeerDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Network", "Peer", "Address", "Public Key", "Endpoint"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.network_id.clone(),
            self.peer_id.clone(),
            self.address.clone(),
            self.public_key.clone(),
            self.endpoint.clone(),
        ]
    }
}

/// One allowed identity fingerprint
#[derive(Serialize)]
pub struct AllowedKeyDisplay {
    pub index: usize,
    pub fingerprint: String,
    /// Whether a joined peer's identity key carries this fingerprint
    pub joined: bool,
}

impl TableDisplay for AllowedKeyDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["#", "Fingerprint", "Joined"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.index.to_string(),
            self.fingerprint.clone(),
            self.joined.to_string(),
        ]
    }
}

fn allowed_rows(doc: &MembershipDocument) -> Vec<AllowedKeyDisplay> {
    doc.allowed_keys
        .iter()
        .enumerate()
        .map(|(i, fp)| AllowedKeyDisplay {
            index: i + 1,
            fingerprint: fp.clone(),
            joined: doc
                .encryption_keys
                .iter()
                .any(|k| &towerlink_common::fingerprint(&k.public_key) == fp),
        })
        .collect()
}

fn peer_rows(doc: &MembershipDocument) -> Vec<PeerDisplay> {
    doc.networks
        .iter()
        .flat_map(|net| {
            net.peers.iter().map(move |peer| PeerDisplay {
                network_id: net.id.clone(),
                peer_id: peer.id.clone(),
                address: peer.address.clone(),
                public_key: peer.public_key.clone(),
                endpoint: peer.endpoint.clone().unwrap_or_else(|| "-".to_string()),
            })
        })
        .collect()
}

pub async fn execute(cmd: NetworkCommands, paths: &NodePaths, format: OutputFormat) -> Result<()> {
    let store = MembershipStore::new(paths.connections_file());

    match cmd {
        NetworkCommands::Create => {
            paths.require_role(NodeRole::Tower)?;
            let network = create_network(&store)?;
            print_success(&format!("Created network {}", network.id));
            print_item(&NetworkDisplay::from(&network), format);
        }

        NetworkCommands::Allow { fingerprint } => {
            paths.require_role(NodeRole::Tower)?;
            if allow_fingerprint(&store, &fingerprint)? {
                print_success(&format!("Allowed {}", fingerprint.to_lowercase()));
            } else {
                print_info(&format!("{} is already allowed", fingerprint.to_lowercase()));
            }
        }

        NetworkCommands::Connect {
            tower_url,
            network_id,
            endpoint,
        } => {
            paths.require_role(NodeRole::Server)?;
            let network = connect(paths, &store, &tower_url, &network_id, endpoint).await?;
            print_success(&format!("Joined network {}", network.id));
            print_item(&NetworkDisplay::from(&network), format);
        }

        NetworkCommands::List => {
            if let Ok(identity) = IdentityKeyPair::load(paths.identity_private_key()) {
                print_info(&format!("This node's fingerprint: {}", identity.fingerprint()));
            }

            let doc = store.load()?;
            let networks: Vec<NetworkDisplay> = doc.networks.iter().map(NetworkDisplay::from).collect();
            print_list(&networks, format);

            let peers = peer_rows(&doc);
            if !peers.is_empty() {
                println!();
                print_list(&peers, format);
            }

            let allowed = allowed_rows(&doc);
            if !allowed.is_empty() {
                println!();
                print_list(&allowed, format);
            }
        }
    }

    Ok(())
}

/// Allocate the next free block and append an empty network for it
pub fn create_network(store: &MembershipStore) -> Result<Network> {
    let network = store.update(|doc| {
        let block = next_network_block(doc)?;
        let network = Network::new(block.to_string());
        doc.networks.push(network.clone());
        Ok(network)
    })?;
    info!("Created network {} with block {}", network.id, network.address);
    Ok(network)
}

/// Add a fingerprint to the allow-list; returns false when it was already present
pub fn allow_fingerprint(store: &MembershipStore, fingerprint: &str) -> Result<bool> {
    let fingerprint = fingerprint.trim().to_lowercase();
    if fingerprint.len() != FINGERPRINT_LEN || !fingerprint.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!(
            "invalid fingerprint {:?}: expected {} hex characters",
            fingerprint,
            FINGERPRINT_LEN
        );
    }
    Ok(store.update(|doc| Ok(doc.allow(&fingerprint)))?)
}

async fn connect(
    paths: &NodePaths,
    store: &MembershipStore,
    tower_url: &str,
    network_id: &str,
    endpoint: Option<String>,
) -> Result<Network> {
    let identity = IdentityKeyPair::load(paths.identity_private_key())
        .context("failed to load identity key")?;
    let keys = TunnelKeys::load(paths).context("failed to load WireGuard keys")?;

    let url = reqwest::Url::parse(tower_url).with_context(|| format!("invalid tower URL {}", tower_url))?;
    let tower_host = url
        .host_str()
        .with_context(|| format!("tower URL {} has no host", tower_url))?
        .to_string();

    let request = JoinRequest {
        public_key: identity.public_key_hex(),
        wg_public_key: keys.public_key,
        endpoint,
    };
    debug!("Sending join request for network {} to {}", network_id, tower_url);

    let client = NodeClient::new(tower_url)?;
    let response = client.join(network_id, &request).await?;
    info!(
        "Tower assigned {} in {} (peer {})",
        response.wg_address, response.wg_network_block, response.peer_id
    );

    let network = store.update(|doc| Ok(record_membership(doc, &response, &tower_host)))?;
    Ok(network)
}

/// Record the tower as this node's peer in the joined network.
///
/// The local network carries the id the tower uses and the host address the
/// tower assigned to us; its single peer is the tower itself, reachable at the
/// whole block.
pub fn record_membership(
    doc: &mut MembershipDocument,
    response: &JoinResponse,
    tower_host: &str,
) -> Network {
    let tower = Peer {
        id: response.peer_id.clone(),
        public_key: response.wg_public_key.clone(),
        address: response.wg_network_block.clone(),
        endpoint: Some(tower_host.to_string()),
    };

    let index = match doc.networks.iter().position(|n| n.id == response.network_id) {
        Some(index) => index,
        None => {
            doc.networks.push(Network {
                id: response.network_id.clone(),
                address: String::new(),
                peers: Vec::new(),
            });
            doc.networks.len() - 1
        }
    };
    let network = &mut doc.networks[index];

    network.address = response.wg_address.clone();
    network.peers.retain(|p| p.public_key != tower.public_key);
    network.peers.push(tower);
    network.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(network_id: &str) -> JoinResponse {
        JoinResponse {
            wg_public_key: "tower-wg".to_string(),
            wg_network_block: "10.5.0.0/24".to_string(),
            wg_address: "10.5.0.1/32".to_string(),
            public_key: "tower-identity".to_string(),
            network_id: network_id.to_string(),
            peer_id: "peer-1".to_string(),
        }
    }

    #[test]
    fn test_record_membership_adds_network() {
        let mut doc = MembershipDocument::default();
        let net = record_membership(&mut doc, &response("net-a"), "tower.example.com");

        assert_eq!(net.id, "net-a");
        assert_eq!(net.address, "10.5.0.1/32");
        assert_eq!(net.peers.len(), 1);
        assert_eq!(net.peers[0].address, "10.5.0.0/24");
        assert_eq!(net.peers[0].endpoint.as_deref(), Some("tower.example.com"));
        assert_eq!(doc.networks.len(), 1);
    }

    #[test]
    fn test_record_membership_rejoin_replaces_tower_peer() {
        let mut doc = MembershipDocument::default();
        record_membership(&mut doc, &response("net-a"), "tower.example.com");

        let mut again = response("net-a");
        again.wg_address = "10.5.0.2/32".to_string();
        again.peer_id = "peer-2".to_string();
        let net = record_membership(&mut doc, &again, "tower.example.com");

        assert_eq!(doc.networks.len(), 1);
        assert_eq!(net.address, "10.5.0.2/32");
        assert_eq!(net.peers.len(), 1);
        assert_eq!(net.peers[0].id, "peer-2");
    }

    #[test]
    fn test_create_network_allocates_sequential_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let store = MembershipStore::new(dir.path().join("connections.json"));

        let a = create_network(&store).unwrap();
        let b = create_network(&store).unwrap();
        assert_eq!(a.address, "10.5.0.0/24");
        assert_eq!(b.address, "10.5.1.0/24");
        assert_ne!(a.id, b.id);
        assert_eq!(store.load().unwrap().networks.len(), 2);
    }

    #[test]
    fn test_allow_fingerprint() {
        let dir = tempfile::tempdir().unwrap();
        let store = MembershipStore::new(dir.path().join("connections.json"));

        assert!(allow_fingerprint(&store, "0123456789ABCDEF").unwrap());
        assert!(!allow_fingerprint(&store, "0123456789abcdef").unwrap());
        assert_eq!(store.load().unwrap().allowed_keys, vec!["0123456789abcdef"]);

        assert!(allow_fingerprint(&store, "short").is_err());
        assert!(allow_fingerprint(&store, "zzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_allowed_rows_show_join_status() {
        let dir = tempfile::tempdir().unwrap();
        let store = MembershipStore::new(dir.path().join("connections.json"));
        let joined = IdentityKeyPair::generate();
        let pending = IdentityKeyPair::generate();

        allow_fingerprint(&store, &joined.fingerprint()).unwrap();
        allow_fingerprint(&store, &pending.fingerprint()).unwrap();
        store
            .update(|doc| {
                doc.encryption_keys.push(towerlink_common::EncryptionKey {
                    id: "peer-1".to_string(),
                    key_type: towerlink_common::EncryptionKey::NETWORK_PEER.to_string(),
                    public_key: joined.public_key_hex(),
                });
                Ok(())
            })
            .unwrap();

        let rows = allowed_rows(&store.load().unwrap());
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].index, 1);
        assert_eq!(rows[0].fingerprint, joined.fingerprint());
        assert!(rows[0].joined);
        assert_eq!(rows[1].fingerprint, pending.fingerprint());
        assert!(!rows[1].joined);
    }

    #[test]
    fn test_peer_rows_flatten_networks() {
        let mut doc = MembershipDocument::default();
        record_membership(&mut doc, &response("net-a"), "a.example.com");
        record_membership(&mut doc, &response("net-b"), "b.example.com");
        doc.networks.push(Network::new("10.5.9.0/24"));

        let rows = peer_rows(&doc);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].network_id, "net-a");
        assert_eq!(rows[1].endpoint, "b.example.com");
    }
}
