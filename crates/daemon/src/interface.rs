//! Tunnel interface definitions
//!
//! One `wg-quick` file per network. Towers and servers share a single
//! renderer; the role only decides which optional blocks are emitted.

use std::fmt::Write as _;
use std::path::PathBuf;
use towerlink_common::{MembershipDocument, Network, NodePaths, NodeRole, Result};

/// Optional sections a role emits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleCapabilities {
    /// Listen for peers and firewall forwarded traffic to the block
    pub firewall: bool,
    /// Dial out to each peer's endpoint and keep the session alive
    pub dial_out: bool,
}

impl From<NodeRole> for RoleCapabilities {
    fn from(role: NodeRole) -> Self {
        match role {
            NodeRole::Tower => Self {
                firewall: true,
                dial_out: false,
            },
            NodeRole::Server => Self {
                firewall: false,
                dial_out: true,
            },
        }
    }
}

/// Driver parameters shared by every interface
#[derive(Debug, Clone, Copy)]
pub struct InterfaceOptions {
    pub listen_port: u16,
    pub keepalive_secs: u16,
}

/// A rendered interface, ready to be written and applied
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterfaceDefinition {
    pub name: String,
    pub path: PathBuf,
    pub contents: String,
}

/// Interface name for the network at `index`, e.g. `tl-t0`
pub fn interface_name(role: NodeRole, index: usize) -> String {
    format!("tl-{}{}", role.tag(), index)
}

/// Render the `wg-quick` definition of one network
pub fn render_interface(
    name: &str,
    caps: RoleCapabilities,
    options: InterfaceOptions,
    private_key: &str,
    network: &Network,
) -> String {
    let mut out = String::new();
    let address = &network.address;

    // Writing to a String cannot fail.
    let _ = writeln!(out, "[Interface]");
    let _ = writeln!(out, "PrivateKey = {}", private_key);
    if caps.firewall {
        let _ = writeln!(out, "ListenPort = {}", options.listen_port);
    }
    let _ = writeln!(out, "Address = {}", address);

    if caps.firewall {
        out.push('\n');
        let accept = format!("FORWARD -i \"{}\" -s {} -d {} -j ACCEPT", name, address, address);
        let drop = format!("FORWARD -i \"{}\" -s {} -j DROP", name, address);
        let _ = writeln!(out, "PostUp = iptables -A {}", accept);
        let _ = writeln!(out, "PreDown = iptables -D {}", accept);
        out.push('\n');
        let _ = writeln!(out, "PostUp = iptables -A {}", drop);
        let _ = writeln!(out, "PreDown = iptables -D {}", drop);
    }

    for peer in &network.peers {
        out.push('\n');
        let _ = writeln!(out, "[Peer]");
        let _ = writeln!(out, "PublicKey = {}", peer.public_key);
        let _ = writeln!(out, "AllowedIPs = {}", peer.address);
        if caps.dial_out {
            if let Some(endpoint) = peer.endpoint.as_deref().filter(|e| !e.is_empty()) {
                let _ = writeln!(out, "Endpoint = {}:{}", endpoint, options.listen_port);
            }
            let _ = writeln!(out, "PersistentKeepalive = {}", options.keepalive_secs);
        }
    }

    out
}

/// Render every network of the membership record for `role`
pub fn generate_interfaces(
    role: NodeRole,
    paths: &NodePaths,
    options: InterfaceOptions,
    private_key: &str,
    doc: &MembershipDocument,
) -> Vec<InterfaceDefinition> {
    let caps = RoleCapabilities::from(role);
    let dir = paths.interface_dir();

    doc.networks
        .iter()
        .enumerate()
        .map(|(index, network)| {
            let name = interface_name(role, index);
            InterfaceDefinition {
                path: dir.join(format!("{}.conf", name)),
                contents: render_interface(&name, caps, options, private_key, network),
                name,
            }
        })
        .collect()
}

/// Write a definition to disk, readable only by root
pub fn write_interface(def: &InterfaceDefinition) -> Result<()> {
    use std::io::Write;
    use std::os::unix::fs::OpenOptionsExt;

    if let Some(parent) = def.path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .mode(0o600)
        .open(&def.path)?;
    file.write_all(def.contents.as_bytes())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use towerlink_common::Peer;

    const OPTIONS: InterfaceOptions = InterfaceOptions {
        listen_port: 51820,
        keepalive_secs: 25,
    };

    fn network() -> Network {
        let mut net = Network::new("10.5.0.0/24");
        net.peers.push(Peer {
            id: "p1".to_string(),
            public_key: "PEERKEY1".to_string(),
            address: "10.5.0.1/32".to_string(),
            endpoint: Some("tower.example.com".to_string()),
        });
        net
    }

    #[test]
    fn test_tower_definition() {
        let text = render_interface(
            "tl-t0",
            NodeRole::Tower.into(),
            OPTIONS,
            "PRIVATE",
            &network(),
        );

        assert!(text.starts_with("[Interface]\nPrivateKey = PRIVATE\nListenPort = 51820\nAddress = 10.5.0.0/24\n"));
        assert!(text.contains(
            "PostUp = iptables -A FORWARD -i \"tl-t0\" -s 10.5.0.0/24 -d 10.5.0.0/24 -j ACCEPT"
        ));
        assert!(text.contains("PreDown = iptables -D FORWARD -i \"tl-t0\" -s 10.5.0.0/24 -j DROP"));
        assert!(text.contains("[Peer]\nPublicKey = PEERKEY1\nAllowedIPs = 10.5.0.1/32\n"));
        assert!(!text.contains("Endpoint"));
        assert!(!text.contains("PersistentKeepalive"));
    }

    #[test]
    fn test_server_definition() {
        let text = render_interface(
            "tl-s0",
            NodeRole::Server.into(),
            OPTIONS,
            "PRIVATE",
            &network(),
        );

        assert!(!text.contains("ListenPort"));
        assert!(!text.contains("iptables"));
        assert!(text.contains("Endpoint = tower.example.com:51820\nPersistentKeepalive = 25\n"));
    }

    #[test]
    fn test_generate_names_follow_network_order() {
        let paths = NodePaths::new("/etc/towerlink");
        let doc = MembershipDocument {
            networks: vec![network(), Network::new("10.5.1.0/24")],
            ..Default::default()
        };

        let defs = generate_interfaces(NodeRole::Tower, &paths, OPTIONS, "PRIVATE", &doc);
        let names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        assert_eq!(names, vec!["tl-t0", "tl-t1"]);
        assert_eq!(defs[1].path, PathBuf::from("/etc/towerlink/wg-config/tl-t1.conf"));
        assert!(defs[1].contents.contains("Address = 10.5.1.0/24"));
    }
}
