//! Node identity
//!
//! Every node owns an Ed25519 keypair used for display and for the tower's
//! allow-list check. It has nothing to do with the tunnel keys.

use crate::paths::{write_private, NodePaths};
use crate::{Error, Result};
use ed25519_dalek::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use std::path::Path;
use tracing::info;

/// Number of hex characters kept from the key digest
pub const FINGERPRINT_LEN: usize = 16;

/// Short stable digest of an identity public key
pub fn fingerprint(public_key: &str) -> String {
    let mut hex = hex::encode(Sha256::digest(public_key.as_bytes()));
    hex.truncate(FINGERPRINT_LEN);
    hex
}

/// Ed25519 identity keypair
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing_key: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Load the private half from `path`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        let bytes: [u8; 32] = data
            .try_into()
            .map_err(|_| Error::Crypto("Invalid key length".to_string()))?;
        Ok(Self {
            signing_key: SigningKey::from_bytes(&bytes),
        })
    }

    /// Persist both halves
    pub fn save(&self, private_path: &Path, public_path: &Path) -> Result<()> {
        write_private(private_path, &self.signing_key.to_bytes())?;
        std::fs::write(public_path, self.public_key_hex())?;
        Ok(())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    /// Public key as sent on the wire
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().to_bytes())
    }

    pub fn fingerprint(&self) -> String {
        fingerprint(&self.public_key_hex())
    }

    /// Load the node's identity, generating it on first use.
    /// Returns the key pair and whether it was freshly created.
    pub fn load_or_generate(paths: &NodePaths) -> Result<(Self, bool)> {
        let private_path = paths.identity_private_key();
        if private_path.exists() {
            return Ok((Self::load(&private_path)?, false));
        }

        paths.ensure_root()?;
        let kp = Self::generate();
        kp.save(&private_path, &paths.identity_public_key())?;
        info!("Generated new identity key {}", kp.fingerprint());
        Ok((kp, true))
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Parse a hex identity public key, used to reject garbage early
pub fn verifying_key_from_hex(public_key: &str) -> Result<VerifyingKey> {
    let bytes = hex::decode(public_key.trim())
        .map_err(|e| Error::Crypto(format!("Invalid public key hex: {}", e)))?;
    let bytes: [u8; 32] = bytes
        .try_into()
        .map_err(|_| Error::Crypto("Invalid public key length".to_string()))?;
    Ok(VerifyingKey::from_bytes(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_fingerprint_is_short_and_stable() {
        let fp = fingerprint("some public key");
        assert_eq!(fp.len(), FINGERPRINT_LEN);
        assert_eq!(fp, fingerprint("some public key"));
        assert_ne!(fp, fingerprint("another public key"));
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_load_or_generate_persists() {
        let tmp = TempDir::new().unwrap();
        let paths = NodePaths::new(tmp.path());

        let (first, created) = IdentityKeyPair::load_or_generate(&paths).unwrap();
        assert!(created);
        let (second, created) = IdentityKeyPair::load_or_generate(&paths).unwrap();
        assert!(!created);

        assert_eq!(first.public_key_hex(), second.public_key_hex());
        let on_disk = std::fs::read_to_string(paths.identity_public_key()).unwrap();
        assert_eq!(on_disk, first.public_key_hex());
    }

    #[test]
    fn test_public_key_parses_back() {
        let kp = IdentityKeyPair::generate();
        let vk = verifying_key_from_hex(&kp.public_key_hex()).unwrap();
        assert_eq!(vk, kp.verifying_key());
        assert!(verifying_key_from_hex("zz").is_err());
    }
}
