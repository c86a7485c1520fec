//! Signed, owner-mutable references
//!
//! A reference is addressed by the hash of its owner's public key. Whoever
//! holds the matching private key can overwrite the record under the same id;
//! nobody else can produce a record that verifies under it.
//!
//! The signature covers the serialization of the reference with its
//! `signature` field cleared, so verification clears the field again before
//! re-serializing.

use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::crypto::{self, content_hash, SignatureScheme};
use crate::error::{MeshError, Result};
use crate::peers::{now_secs, PeerTable};
use crate::routing::{HopBudget, Resolved, Router};
use crate::store::{LocalStore, StoreKey};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(with = "serde_bytes")]
    pub value: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub public_key: Vec<u8>,
    /// Creation time (unix seconds)
    pub timestamp: i64,
    #[serde(with = "serde_bytes")]
    pub signature: Vec<u8>,
}

impl Reference {
    /// Build and sign a reference for `value`
    pub fn create(key: &SigningKey, value: Vec<u8>, scheme: &SignatureScheme) -> Result<Self> {
        let mut reference = Self {
            value,
            public_key: crypto::marshal_public(&key.verifying_key()),
            timestamp: now_secs(),
            signature: Vec::new(),
        };
        let message = reference.signed_bytes()?;
        reference.signature = scheme.sign(&message, key);
        Ok(reference)
    }

    /// Reference id: content hash of the owner's public key
    pub fn id(&self) -> String {
        content_hash(&self.public_key)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }

    /// Serialization the signature is computed over
    pub fn signed_bytes(&self) -> Result<Vec<u8>> {
        let mut unsigned = self.clone();
        unsigned.signature.clear();
        unsigned.to_bytes()
    }

    /// Check the id binding and the signature; both are mandatory
    pub fn verify(&self, reference_id: &str, scheme: &SignatureScheme) -> Result<()> {
        let actual = self.id();
        if actual != reference_id {
            return Err(MeshError::InvalidReference(format!(
                "public key hashes to {}, not {}",
                actual, reference_id
            )));
        }

        let public_key = crypto::unmarshal_public(&self.public_key)
            .map_err(|e| MeshError::InvalidReference(e.to_string()))?;
        let message = self.signed_bytes()?;
        if !scheme.verify(&message, &public_key, &self.signature) {
            return Err(MeshError::InvalidReference("invalid signature".into()));
        }
        Ok(())
    }
}

/// Creates references locally and fetches verified references from the mesh
pub struct ReferenceProtocol {
    scheme: SignatureScheme,
    store: LocalStore,
    peers: Arc<PeerTable>,
    router: Arc<Router>,
}

impl ReferenceProtocol {
    pub fn new(
        scheme: SignatureScheme,
        store: LocalStore,
        peers: Arc<PeerTable>,
        router: Arc<Router>,
    ) -> Self {
        Self {
            scheme,
            store,
            peers,
            router,
        }
    }

    pub fn scheme(&self) -> &SignatureScheme {
        &self.scheme
    }

    /// Sign `value` with `private_key` and store it under the owner's reference id
    pub async fn add_reference(&self, private_key: &[u8], value: Vec<u8>) -> Result<String> {
        let key = crypto::unmarshal_private(private_key)?;
        let reference = Reference::create(&key, value, &self.scheme)?;
        let reference_id = reference.id();

        self.store.put_reference(&reference_id, &reference.to_bytes()?)?;
        self.peers
            .register_holder(&reference_id, self.peers.local_id())
            .await;

        info!(reference_id = %reference_id, timestamp = reference.timestamp, "Added reference");
        Ok(reference_id)
    }

    /// Decode a stored record and check it against `reference_id`
    pub fn validate_record(&self, reference_id: &str, data: &[u8]) -> Result<Reference> {
        let reference = Reference::from_bytes(data)
            .map_err(|e| MeshError::InvalidReference(format!("undecodable record: {}", e)))?;
        reference.verify(reference_id, &self.scheme)?;
        Ok(reference)
    }

    /// Resolve `reference_id`, skipping peers whose copy does not verify
    pub async fn resolve_verified(
        &self,
        reference_id: &str,
        budget: HopBudget,
        visited: Vec<String>,
    ) -> Result<Resolved> {
        let check = |data: &[u8]| self.validate_record(reference_id, data).map(|_| ());
        self.router
            .resolve_with(
                &StoreKey::Reference(reference_id.to_string()),
                budget,
                visited,
                &check,
            )
            .await
    }

    /// Resolve a reference anywhere in the mesh and verify it
    pub async fn get_reference(&self, reference_id: &str) -> Result<Reference> {
        if reference_id.is_empty() {
            return Err(MeshError::InvalidRequest("missing reference_id".into()));
        }

        let resolved = self
            .resolve_verified(reference_id, HopBudget::Infer, Vec::new())
            .await?;

        // Local hits skip the remote check
        self.validate_record(reference_id, &resolved.data)
            .map_err(|e| {
                warn!(reference_id = %reference_id, holder = %resolved.holder, error = %e, "Rejected reference");
                e
            })
    }
}
