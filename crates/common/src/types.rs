//! Core types for Towerlink

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Generate a new time-ordered identifier.
///
/// UUIDv7 ids sort lexicographically by creation time, so networks and peers
/// keep their creation order without a separate timestamp field.
pub fn new_time_ordered_id() -> String {
    Uuid::now_v7().to_string()
}

/// Role of a node, fixed at `towerlink init`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    /// Authority: owns networks and the allow-list, accepts joins
    Tower,
    /// Joins networks it was invited to
    Server,
}

impl NodeRole {
    /// Short tag used in generated interface names
    pub fn tag(&self) -> char {
        match self {
            NodeRole::Tower => 't',
            NodeRole::Server => 's',
        }
    }
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeRole::Tower => write!(f, "tower"),
            NodeRole::Server => write!(f, "server"),
        }
    }
}

impl std::str::FromStr for NodeRole {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "tower" => Ok(NodeRole::Tower),
            "server" => Ok(NodeRole::Server),
            other => Err(crate::Error::InvalidConfig(format!(
                "invalid node type: {} (must be 'server' or 'tower')",
                other
            ))),
        }
    }
}

/// Persisted node settings (`config.json`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    #[serde(rename = "node_type")]
    pub role: NodeRole,
}

/// One joined member of a network
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
    pub id: String,
    /// Tunnel public key of the peer
    pub public_key: String,
    /// Host address (`/32`) inside the owning network's block
    #[serde(default)]
    pub address: String,
    /// Host the other side dials back to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// A private address block plus its member peers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Network {
    pub id: String,
    #[serde(default)]
    pub address: String,
    #[serde(default)]
    pub peers: Vec<Peer>,
}

impl Network {
    /// Create an empty network owning `address`
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            id: new_time_ordered_id(),
            address: address.into(),
            peers: Vec::new(),
        }
    }

    /// Find a peer by its tunnel public key
    pub fn peer_by_public_key(&self, public_key: &str) -> Option<&Peer> {
        self.peers.iter().find(|p| p.public_key == public_key)
    }
}

/// Identity key recorded for a joined peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionKey {
    pub id: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub public_key: String,
}

impl EncryptionKey {
    pub const NETWORK_PEER: &'static str = "network_peer";
}

/// The whole persisted membership record (`connections.json`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembershipDocument {
    #[serde(default)]
    pub networks: Vec<Network>,
    #[serde(default)]
    pub allowed_keys: Vec<String>,
    #[serde(default)]
    pub encryption_keys: Vec<EncryptionKey>,
}

impl MembershipDocument {
    pub fn network(&self, id: &str) -> Option<&Network> {
        self.networks.iter().find(|n| n.id == id)
    }

    pub fn network_mut(&mut self, id: &str) -> Option<&mut Network> {
        self.networks.iter_mut().find(|n| n.id == id)
    }

    pub fn is_allowed(&self, fingerprint: &str) -> bool {
        self.allowed_keys.iter().any(|k| k == fingerprint)
    }

    /// Add a fingerprint to the allow-list, returns false if it was already present
    pub fn allow(&mut self, fingerprint: &str) -> bool {
        if self.is_allowed(fingerprint) {
            return false;
        }
        self.allowed_keys.push(fingerprint.to_string());
        true
    }
}

/// Join request sent by a server to a tower
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRequest {
    /// Identity public key of the joining node
    pub public_key: String,
    pub wg_public_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// Tower reply to a successful join
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinResponse {
    /// Tunnel public key of the tower
    pub wg_public_key: String,
    pub wg_network_block: String,
    pub wg_address: String,
    /// Identity public key of the tower
    pub public_key: String,
    pub network_id: String,
    pub peer_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub node_type: NodeRole,
}
