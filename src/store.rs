//! Local content store
//!
//! Namespaced wrapper over an atomic key-value engine. Documents are kept as
//! raw ciphertext under `document/<documentHash>`, references as raw records
//! under `reference/<referenceId>`.
//!
//! Document keys are always recomputed from the bytes being written: callers
//! cannot choose where a blob lands, and reads re-verify the address.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::crypto::content_hash;
use crate::error::{MeshError, Result};

/// Address of an entity in the mesh
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKey {
    Document(String),
    Reference(String),
}

impl StoreKey {
    /// Bare identifier (document hash or reference id)
    pub fn id(&self) -> &str {
        match self {
            Self::Document(hash) => hash,
            Self::Reference(id) => id,
        }
    }

    /// Namespaced key used in the engine
    pub fn storage_key(&self) -> String {
        match self {
            Self::Document(hash) => format!("document/{}", hash),
            Self::Reference(id) => format!("reference/{}", id),
        }
    }

    /// Whether `data` is acceptable as the value stored under this key.
    ///
    /// Documents are content addressed and checked here; references are
    /// checked by signature on the read path instead.
    pub fn matches(&self, data: &[u8]) -> bool {
        match self {
            Self::Document(hash) => content_hash(data) == *hash,
            Self::Reference(_) => true,
        }
    }
}

impl std::fmt::Display for StoreKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.storage_key())
    }
}

/// Atomic, durable byte store consumed by [`LocalStore`]
pub trait KvEngine: Send + Sync {
    /// Write `value` under `key`; durable once this returns
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

impl KvEngine for sled::Db {
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.insert(key, value)?;
        self.flush()?;
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(sled::Tree::get(self, key)?.map(|v| v.to_vec()))
    }
}

/// Document and reference storage for one node
#[derive(Clone)]
pub struct LocalStore {
    engine: Arc<dyn KvEngine>,
}

impl LocalStore {
    /// Open or create a sled database at `path`
    pub fn open<P: AsRef<Path>>(path: P, cache_size: u64) -> Result<Self> {
        let db = sled::Config::new()
            .path(path.as_ref())
            .cache_capacity(cache_size)
            .open()?;
        info!(path = %path.as_ref().display(), cache_size, "Opened local store");
        Ok(Self::with_engine(Arc::new(db)))
    }

    /// Throwaway store backed by a temporary sled database (for tests)
    pub fn temporary() -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Ok(Self::with_engine(Arc::new(db)))
    }

    pub fn with_engine(engine: Arc<dyn KvEngine>) -> Self {
        Self { engine }
    }

    /// Store an encrypted blob, returning its content hash
    pub fn put_document(&self, blob: &[u8]) -> Result<String> {
        let hash = content_hash(blob);
        let key = StoreKey::Document(hash.clone());
        self.engine.put(key.storage_key().as_bytes(), blob)?;
        info!(hash = %hash, size = blob.len(), "Stored document");
        Ok(hash)
    }

    /// Fetch an encrypted blob, re-verifying its content address
    pub fn get_document(&self, hash: &str) -> Result<Option<Vec<u8>>> {
        let key = StoreKey::Document(hash.to_string());
        let Some(blob) = self.engine.get(key.storage_key().as_bytes())? else {
            return Ok(None);
        };

        let actual = content_hash(&blob);
        if actual != hash {
            warn!(expected = %hash, actual = %actual, "Stored document failed hash check");
            return Err(MeshError::HashMismatch {
                expected: hash.to_string(),
                actual,
            });
        }
        Ok(Some(blob))
    }

    /// Store a serialized reference, replacing any previous record
    pub fn put_reference(&self, reference_id: &str, record: &[u8]) -> Result<()> {
        let key = StoreKey::Reference(reference_id.to_string());
        self.engine.put(key.storage_key().as_bytes(), record)?;
        info!(reference_id = %reference_id, "Stored reference");
        Ok(())
    }

    pub fn get_reference(&self, reference_id: &str) -> Result<Option<Vec<u8>>> {
        let key = StoreKey::Reference(reference_id.to_string());
        self.engine.get(key.storage_key().as_bytes())
    }

    /// Look up either kind of entity
    pub fn get(&self, key: &StoreKey) -> Result<Option<Vec<u8>>> {
        let found = match key {
            StoreKey::Document(hash) => self.get_document(hash)?,
            StoreKey::Reference(id) => self.get_reference(id)?,
        };
        debug!(key = %key, hit = found.is_some(), "Local lookup");
        Ok(found)
    }
}
