//! WireGuard tunnel keys

use crate::paths::{write_private, NodePaths};
use crate::Result;
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::info;
use x25519_dalek::{PublicKey, StaticSecret};

/// WireGuard key pair, both halves base64 encoded
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelKeys {
    pub private_key: String,
    pub public_key: String,
}

impl TunnelKeys {
    /// Generate a WireGuard keypair using x25519
    pub fn generate() -> Self {
        let mut private_key_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut private_key_bytes);

        // WireGuard key clamping
        private_key_bytes[0] &= 248;
        private_key_bytes[31] &= 127;
        private_key_bytes[31] |= 64;

        let secret = StaticSecret::from(private_key_bytes);
        let public = PublicKey::from(&secret);

        Self {
            private_key: STANDARD.encode(private_key_bytes),
            public_key: STANDARD.encode(public.as_bytes()),
        }
    }

    pub fn load(paths: &NodePaths) -> Result<Self> {
        let data = std::fs::read(paths.tunnel_keys_file())?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn save(&self, paths: &NodePaths) -> Result<()> {
        paths.ensure_root()?;
        let data = serde_json::to_vec_pretty(self)?;
        write_private(&paths.tunnel_keys_file(), &data)
    }

    /// Load the node's tunnel keys, generating them on first use
    pub fn load_or_generate(paths: &NodePaths) -> Result<(Self, bool)> {
        if paths.tunnel_keys_file().exists() {
            return Ok((Self::load(paths)?, false));
        }
        let keys = Self::generate();
        keys.save(paths)?;
        info!("Generated WireGuard keys in {}", paths.tunnel_keys_file().display());
        Ok((keys, true))
    }
}

impl std::fmt::Debug for TunnelKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TunnelKeys")
            .field("public_key", &self.public_key)
            .finish()
    }
}
