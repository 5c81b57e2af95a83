//! Towerlink Common Library
//!
//! Data model, membership store, address allocation and key material shared
//! by the daemon and the CLI.

pub mod allocator;
pub mod error;
pub mod identity;
pub mod paths;
pub mod store;
pub mod tunnel;
pub mod types;

// Re-export commonly used types
pub use error::{Error, Result};
pub use identity::{fingerprint, IdentityKeyPair};
pub use paths::{default_config_dir, NodePaths};
pub use store::MembershipStore;
pub use tunnel::TunnelKeys;
pub use types::*;

/// Towerlink version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// UDP port the tunnel driver listens on
pub const DEFAULT_LISTEN_PORT: u16 = 51820;

/// Join endpoint path for a network
pub fn join_path(network_id: &str) -> String {
    format!("/api/servers/network/{}/connect", network_id)
}
