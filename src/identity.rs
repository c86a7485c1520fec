//! Node identity
//!
//! Every node owns a long-lived ed25519 key. Its node id is the content hash
//! of the public key, the same binding references use, so peer ids and
//! reference ids share one address format.

use ed25519_dalek::SigningKey;
use std::path::Path;
use tracing::info;

use crate::crypto::{self, content_hash};
use crate::error::{MeshError, Result};

#[derive(Clone)]
pub struct NodeIdentity {
    signing_key: SigningKey,
    id: String,
}

impl NodeIdentity {
    /// Create a new identity with a fresh keypair
    pub fn generate() -> Self {
        Self::from_signing_key(crypto::generate_signing_key())
    }

    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let id = content_hash(&crypto::marshal_public(&signing_key.verifying_key()));
        Self { signing_key, id }
    }

    /// Load identity from a file (or generate and persist if missing)
    pub fn load_or_generate(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let identity = Self::generate();
            identity.save(path)?;
            info!(id = %identity.id, path = %path.display(), "Generated node identity");
            Ok(identity)
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let signing_key = crypto::unmarshal_private(&bytes)
            .map_err(|e| MeshError::Config(format!("Failed to decode identity key: {}", e)))?;
        Ok(Self::from_signing_key(signing_key))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, crypto::marshal_private(&self.signing_key))?;
        Ok(())
    }

    /// Node id (`sha256-<hex>` of the public key)
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key_bytes(&self) -> Vec<u8> {
        crypto::marshal_public(&self.signing_key.verifying_key())
    }
}

impl std::fmt::Debug for NodeIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeIdentity").field("id", &self.id).finish()
    }
}
