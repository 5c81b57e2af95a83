//! Membership store
//!
//! The membership record is one JSON document on disk. It is the single
//! source of truth shared by the CLI, the join handler and the reconciler;
//! nobody keeps a cached copy. Every mutation is a whole-document
//! read-modify-write performed under [`MembershipStore::update`], which holds
//! an in-process mutex and an exclusive `flock` on a sibling lock file for the
//! full span, so concurrent joins and operator commands never lose updates.
//! Writes go through a temp file and rename, so readers only ever observe a
//! complete document.

use crate::types::MembershipDocument;
use crate::{Error, Result};
use nix::fcntl::{Flock, FlockArg};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Handle to the persisted membership record
#[derive(Clone)]
pub struct MembershipStore {
    path: PathBuf,
    guard: Arc<Mutex<()>>,
}

impl MembershipStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            guard: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn ensure_parent(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }

    /// Raw document bytes, `None` if the store was never written
    pub fn read_bytes(&self) -> Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(data) => Ok(Some(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// SHA-256 of the document as stored, `None` if it does not exist
    pub fn content_hash(&self) -> Result<Option<String>> {
        Ok(self
            .read_bytes()?
            .map(|data| hex::encode(Sha256::digest(&data))))
    }

    /// Read the current document; an absent store reads as empty
    pub fn load(&self) -> Result<MembershipDocument> {
        match self.read_bytes()? {
            Some(data) => Ok(serde_json::from_slice(&data)?),
            None => Ok(MembershipDocument::default()),
        }
    }

    /// Run `f` against the current document and persist the result.
    ///
    /// The document is only written when `f` succeeds. No other `update`
    /// (in this process or another) can interleave between the read and the
    /// write.
    pub fn update<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut MembershipDocument) -> Result<T>,
    {
        let _local = self.guard.lock();
        self.ensure_parent()?;

        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        let _file_lock = Flock::lock(lock_file, FlockArg::LockExclusive)
            .map_err(|(_, errno)| Error::Io(errno.into()))?;

        let mut doc = self.load()?;
        let out = f(&mut doc)?;
        self.save(&doc)?;
        Ok(out)
    }

    fn save(&self, doc: &MembershipDocument) -> Result<()> {
        let dir = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let data = serde_json::to_vec_pretty(doc)?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(&data)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| Error::Io(e.error))?;

        debug!(
            "Saved membership record: {} networks, {} allowed keys",
            doc.networks.len(),
            doc.allowed_keys.len()
        );
        Ok(())
    }
}

impl std::fmt::Debug for MembershipStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MembershipStore")
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::allocator;
    use crate::types::{Network, Peer};
    use std::collections::HashSet;
    use tempfile::TempDir;

    fn store(tmp: &TempDir) -> MembershipStore {
        MembershipStore::new(tmp.path().join("etc").join("connections.json"))
    }

    #[test]
    fn test_absent_store_reads_empty() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        assert_eq!(store.load().unwrap(), MembershipDocument::default());
        assert!(store.content_hash().unwrap().is_none());
    }

    #[test]
    fn test_update_persists() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        let id = store
            .update(|doc| {
                let net = Network::new("10.5.0.0/24");
                let id = net.id.clone();
                doc.networks.push(net);
                Ok(id)
            })
            .unwrap();

        let doc = store.load().unwrap();
        assert_eq!(doc.networks.len(), 1);
        assert_eq!(doc.networks[0].id, id);
        assert!(store.content_hash().unwrap().is_some());
    }

    #[test]
    fn test_failed_update_does_not_write() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        store.update(|doc| Ok(doc.allow("keep"))).unwrap();
        let before = store.content_hash().unwrap();

        let result: Result<()> = store.update(|doc| {
            doc.allow("discard");
            Err(Error::Conflict("nope".to_string()))
        });
        assert!(result.is_err());

        assert_eq!(store.content_hash().unwrap(), before);
        assert_eq!(store.load().unwrap().allowed_keys, vec!["keep".to_string()]);
    }

    #[test]
    fn test_hash_changes_with_content() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);

        store.update(|doc| Ok(doc.allow("a"))).unwrap();
        let first = store.content_hash().unwrap();
        assert_eq!(store.content_hash().unwrap(), first);

        store.update(|doc| Ok(doc.allow("b"))).unwrap();
        assert_ne!(store.content_hash().unwrap(), first);
    }

    #[test]
    fn test_concurrent_updates_do_not_lose_peers() {
        let tmp = TempDir::new().unwrap();
        let store = store(&tmp);
        let net_id = store
            .update(|doc| {
                let net = Network::new("10.5.0.0/24");
                let id = net.id.clone();
                doc.networks.push(net);
                Ok(id)
            })
            .unwrap();

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                let net_id = net_id.clone();
                std::thread::spawn(move || {
                    store
                        .update(|doc| {
                            let net = doc.network_mut(&net_id).unwrap();
                            let addr = allocator::next_host_address(net)?;
                            net.peers.push(Peer {
                                id: crate::new_time_ordered_id(),
                                public_key: format!("wg-{}", i),
                                address: addr.to_string(),
                                endpoint: None,
                            });
                            Ok(addr)
                        })
                        .unwrap()
                })
            })
            .collect();

        let addrs: HashSet<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(addrs.len(), 16);

        let doc = store.load().unwrap();
        assert_eq!(doc.network(&net_id).unwrap().peers.len(), 16);
    }
}
