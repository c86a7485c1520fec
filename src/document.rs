//! Documents and access ids
//!
//! A document has no identity of its own. Once encrypted it is stored under
//! the hash of its ciphertext, and the caller receives an [`AccessId`]
//! (`<documentHash>:<base64url(documentKey)>`) which is both the locator and
//! the decryption capability.

use base64::engine::general_purpose::URL_SAFE;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::crypto::KEY_LEN;
use crate::error::{MeshError, Result};

/// Opaque application record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// MIME type supplied by the application
    pub content_type: String,
    #[serde(with = "serde_bytes")]
    pub data: Vec<u8>,
}

impl Document {
    pub fn new(content_type: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            content_type: content_type.into(),
            data,
        }
    }

    /// Canonical serialization; the convergent key is derived from these bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// Capability to locate and decrypt one stored document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessId {
    pub document_hash: String,
    pub key: [u8; KEY_LEN],
}

impl AccessId {
    pub fn new(document_hash: String, key: [u8; KEY_LEN]) -> Self {
        Self { document_hash, key }
    }

    pub fn parse(s: &str) -> Result<Self> {
        let (hash, encoded_key) = s
            .split_once(':')
            .ok_or_else(|| MeshError::MalformedAccessId("access id should contain ':'".into()))?;

        if hash.is_empty() {
            return Err(MeshError::MalformedAccessId("empty document hash".into()));
        }

        let key = URL_SAFE
            .decode(encoded_key)
            .map_err(|e| MeshError::MalformedAccessId(format!("invalid key encoding: {}", e)))?;
        let key: [u8; KEY_LEN] = key.try_into().map_err(|k: Vec<u8>| {
            MeshError::MalformedAccessId(format!(
                "document key must be {} bytes, got {}",
                KEY_LEN,
                k.len()
            ))
        })?;

        Ok(Self {
            document_hash: hash.to_string(),
            key,
        })
    }
}

impl std::fmt::Display for AccessId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.document_hash, URL_SAFE.encode(self.key))
    }
}

impl std::str::FromStr for AccessId {
    type Err = MeshError;
    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_id_format() {
        let id = AccessId::new("sha256-abc".into(), [7u8; KEY_LEN]);
        let s = id.to_string();
        assert!(s.starts_with("sha256-abc:"));
        assert_eq!(AccessId::parse(&s).unwrap(), id);
    }

    #[test]
    fn test_missing_separator() {
        let err = AccessId::parse("no-colon-here").unwrap_err();
        assert!(matches!(err, MeshError::MalformedAccessId(_)));
    }

    #[test]
    fn test_bad_base64() {
        let err = AccessId::parse("sha256-abc:!!not base64!!").unwrap_err();
        assert!(matches!(err, MeshError::MalformedAccessId(_)));
    }

    #[test]
    fn test_wrong_key_length() {
        let short = URL_SAFE.encode([1u8; 8]);
        let err = AccessId::parse(&format!("sha256-abc:{}", short)).unwrap_err();
        assert!(matches!(err, MeshError::MalformedAccessId(_)));
    }

    #[test]
    fn test_empty_hash() {
        let key = URL_SAFE.encode([1u8; KEY_LEN]);
        let err = AccessId::parse(&format!(":{}", key)).unwrap_err();
        assert!(matches!(err, MeshError::MalformedAccessId(_)));
    }

    #[test]
    fn test_document_serialization_is_stable() {
        let doc = Document::new("application/json", br#"{"a":1}"#.to_vec());
        let bytes = doc.to_bytes().unwrap();
        assert_eq!(bytes, doc.clone().to_bytes().unwrap());
        assert_eq!(Document::from_bytes(&bytes).unwrap(), doc);
    }
}
