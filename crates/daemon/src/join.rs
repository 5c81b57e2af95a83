//! Join protocol
//!
//! A server asks the tower to be admitted into a network. Each gate below
//! short-circuits; the whole sequence runs inside one store update so two
//! joins can never be handed the same address.

use towerlink_common::{
    allocator, fingerprint, new_time_ordered_id, EncryptionKey, Error, JoinRequest, JoinResponse,
    MembershipStore, Peer, Result,
};
use tracing::{info, warn};

/// Public keys the tower hands back to joining servers
#[derive(Debug, Clone)]
pub struct TowerKeys {
    /// Tunnel public key
    pub wg_public_key: String,
    /// Identity public key
    pub public_key: String,
}

/// Admit the requester into `network_id`
pub fn join_network(
    store: &MembershipStore,
    tower: &TowerKeys,
    network_id: &str,
    request: &JoinRequest,
) -> Result<JoinResponse> {
    let digest = fingerprint(&request.public_key);

    let response = store.update(|doc| {
        if !doc.is_allowed(&digest) {
            warn!("Unauthorized connection attempt from public key: {}", digest);
            return Err(Error::Unauthorized {
                fingerprint: digest.clone(),
            });
        }

        let network = doc.network_mut(network_id).ok_or_else(|| Error::NotFound {
            kind: "network".to_string(),
            id: network_id.to_string(),
        })?;

        if network.peer_by_public_key(&request.wg_public_key).is_some() {
            return Err(Error::Conflict(format!(
                "server already connected to network {}",
                network_id
            )));
        }

        let block = allocator::parse_block(&network.address)?;
        let address = allocator::next_host_address(network)?;

        let peer = Peer {
            id: new_time_ordered_id(),
            public_key: request.wg_public_key.clone(),
            address: address.to_string(),
            endpoint: request.endpoint.clone().filter(|e| !e.is_empty()),
        };
        let peer_id = peer.id.clone();
        network.peers.push(peer);

        doc.encryption_keys.push(EncryptionKey {
            id: peer_id.clone(),
            key_type: EncryptionKey::NETWORK_PEER.to_string(),
            public_key: request.public_key.clone(),
        });

        Ok(JoinResponse {
            wg_public_key: tower.wg_public_key.clone(),
            wg_network_block: block.to_string(),
            wg_address: address.to_string(),
            public_key: tower.public_key.clone(),
            network_id: network_id.to_string(),
            peer_id,
        })
    })?;

    info!(
        "Server {} connected to network {} at {}",
        digest, network_id, response.wg_address
    );
    Ok(response)
}
