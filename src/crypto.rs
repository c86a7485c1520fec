//! Content addressing, convergent document encryption and reference signatures
//!
//! - **Content hash**: `sha256-<hex>` over raw bytes. The same function names
//!   stored blobs, references (hash of the owner's public key) and nodes.
//! - **Convergent encryption**: the document key is `SHA256(plaintext)`, the
//!   cipher is AES-256 in CFB mode with a fresh random IV prepended to the
//!   ciphertext.
//! - **Signatures**: ed25519 over a digest of the message. The digest is a
//!   pinned parameter of the [`SignatureScheme`], never negotiated per call.

use aes::Aes256;
use cfb_mode::cipher::{AsyncStreamCipher, KeyIvInit};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

use crate::document::Document;
use crate::error::{MeshError, Result};

/// IV length prepended to every encrypted blob (one AES block)
pub const IV_LEN: usize = 16;

/// Document key length (SHA256 output, AES-256 key)
pub const KEY_LEN: usize = 32;

/// ed25519 public and private key length
pub const ED25519_KEY_LEN: usize = 32;

type Aes256CfbEnc = cfb_mode::Encryptor<Aes256>;
type Aes256CfbDec = cfb_mode::Decryptor<Aes256>;

/// Compute the content address of raw bytes
pub fn content_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("sha256-{}", hex::encode(hasher.finalize()))
}

/// Encrypt a document, returning `IV ‖ ciphertext` and the convergent key
pub fn encrypt_document(doc: &Document) -> Result<(Vec<u8>, [u8; KEY_LEN])> {
    let plaintext = doc.to_bytes()?;
    encrypt_bytes(&plaintext)
}

/// Decrypt a blob produced by [`encrypt_document`]
pub fn decrypt_document(blob: &[u8], key: &[u8]) -> Result<Document> {
    let plaintext = decrypt_bytes(blob, key)?;
    Document::from_bytes(&plaintext)
        .map_err(|e| MeshError::DecryptionFailure(format!("undecodable plaintext: {}", e)))
}

/// Convergent encryption of raw bytes
pub fn encrypt_bytes(plaintext: &[u8]) -> Result<(Vec<u8>, [u8; KEY_LEN])> {
    let key: [u8; KEY_LEN] = Sha256::digest(plaintext).into();

    let mut blob = vec![0u8; IV_LEN + plaintext.len()];
    let (iv, body) = blob.split_at_mut(IV_LEN);
    OsRng.fill_bytes(iv);
    body.copy_from_slice(plaintext);

    Aes256CfbEnc::new_from_slices(&key, iv)
        .map_err(|e| MeshError::InvalidKey(e.to_string()))?
        .encrypt(body);

    Ok((blob, key))
}

/// Reverse of [`encrypt_bytes`].
///
/// The recovered plaintext must hash back to the key; a wrong key or any
/// altered byte of the blob is reported as `DecryptionFailure`.
pub fn decrypt_bytes(blob: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < IV_LEN {
        return Err(MeshError::DecryptionFailure(format!(
            "ciphertext too short: {} bytes",
            blob.len()
        )));
    }
    if key.len() != KEY_LEN {
        return Err(MeshError::DecryptionFailure(format!(
            "document key must be {} bytes, got {}",
            KEY_LEN,
            key.len()
        )));
    }

    let (iv, body) = blob.split_at(IV_LEN);
    let mut plaintext = body.to_vec();
    Aes256CfbDec::new_from_slices(key, iv)
        .map_err(|e| MeshError::DecryptionFailure(e.to_string()))?
        .decrypt(&mut plaintext);

    if Sha256::digest(&plaintext).as_slice() != key {
        return Err(MeshError::DecryptionFailure(
            "plaintext digest does not match document key".into(),
        ));
    }

    Ok(plaintext)
}

/// Digest applied to a message before it is signed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignatureDigest {
    #[default]
    Sha256,
    Sha512,
}

impl SignatureDigest {
    pub fn digest(&self, message: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(message).to_vec(),
            Self::Sha512 => Sha512::digest(message).to_vec(),
        }
    }
}

impl std::str::FromStr for SignatureDigest {
    type Err = MeshError;
    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            _ => Err(MeshError::Config(format!(
                "Invalid signature digest '{}': expected sha256 or sha512",
                s
            ))),
        }
    }
}

impl std::fmt::Display for SignatureDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sha256 => write!(f, "sha256"),
            Self::Sha512 => write!(f, "sha512"),
        }
    }
}

/// Sign a precomputed digest
pub fn sign_digest(digest: &[u8], key: &SigningKey) -> Signature {
    key.sign(digest)
}

/// Verify a signature over a precomputed digest
pub fn verify_digest(digest: &[u8], key: &VerifyingKey, signature: &Signature) -> bool {
    key.verify(digest, signature).is_ok()
}

/// Digest-then-sign scheme shared by every reference on a node
#[derive(Debug, Clone, Copy, Default)]
pub struct SignatureScheme {
    digest: SignatureDigest,
}

impl SignatureScheme {
    pub fn new(digest: SignatureDigest) -> Self {
        Self { digest }
    }

    pub fn digest_kind(&self) -> SignatureDigest {
        self.digest
    }

    /// Sign `message`, returning the raw 64-byte signature
    pub fn sign(&self, message: &[u8], key: &SigningKey) -> Vec<u8> {
        let digest = self.digest.digest(message);
        sign_digest(&digest, key).to_bytes().to_vec()
    }

    /// Check a raw signature produced by [`SignatureScheme::sign`]
    pub fn verify(&self, message: &[u8], key: &VerifyingKey, signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        let digest = self.digest.digest(message);
        verify_digest(&digest, key, &signature)
    }
}

/// Generate a fresh signing key
pub fn generate_signing_key() -> SigningKey {
    SigningKey::generate(&mut OsRng)
}

pub fn marshal_public(key: &VerifyingKey) -> Vec<u8> {
    key.to_bytes().to_vec()
}

pub fn unmarshal_public(bytes: &[u8]) -> Result<VerifyingKey> {
    let raw: [u8; ED25519_KEY_LEN] = bytes.try_into().map_err(|_| {
        MeshError::InvalidKey(format!(
            "public key must be {} bytes, got {}",
            ED25519_KEY_LEN,
            bytes.len()
        ))
    })?;
    VerifyingKey::from_bytes(&raw).map_err(|e| MeshError::InvalidKey(e.to_string()))
}

pub fn marshal_private(key: &SigningKey) -> Vec<u8> {
    key.to_bytes().to_vec()
}

pub fn unmarshal_private(bytes: &[u8]) -> Result<SigningKey> {
    let raw: [u8; ED25519_KEY_LEN] = bytes.try_into().map_err(|_| {
        MeshError::InvalidKey(format!(
            "private key must be {} bytes, got {}",
            ED25519_KEY_LEN,
            bytes.len()
        ))
    })?;
    Ok(SigningKey::from_bytes(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_doc() -> Document {
        Document::new("text/plain", b"Hello, Elohim!".to_vec())
    }

    #[test]
    fn test_content_hash_format() {
        let hash = content_hash(b"test");
        assert!(hash.starts_with("sha256-"));
        assert_eq!(hash.len(), 7 + 64);
        assert_eq!(hash, content_hash(b"test"));
        assert_ne!(hash, content_hash(b"test2"));
    }

    #[test]
    fn test_encrypt_decrypt_document() {
        let doc = sample_doc();
        let (blob, key) = encrypt_document(&doc).unwrap();
        assert_eq!(blob.len(), IV_LEN + doc.to_bytes().unwrap().len());

        let decrypted = decrypt_document(&blob, &key).unwrap();
        assert_eq!(decrypted, doc);
    }

    #[test]
    fn test_same_document_same_key_different_blob() {
        let doc = sample_doc();
        let (blob1, key1) = encrypt_document(&doc).unwrap();
        let (blob2, key2) = encrypt_document(&doc).unwrap();

        assert_eq!(key1, key2);
        assert_ne!(blob1, blob2);
        assert_ne!(content_hash(&blob1), content_hash(&blob2));
    }

    #[test]
    fn test_truncated_blob_is_recoverable_error() {
        let (_, key) = encrypt_document(&sample_doc()).unwrap();
        for len in 0..IV_LEN {
            let result = decrypt_bytes(&vec![0u8; len], &key);
            assert!(matches!(result, Err(MeshError::DecryptionFailure(_))));
        }
    }

    #[test]
    fn test_any_flipped_byte_is_detected() {
        let doc = sample_doc();
        let (blob, key) = encrypt_document(&doc).unwrap();

        for i in 0..blob.len() {
            let mut tampered = blob.clone();
            tampered[i] ^= 0x01;
            let result = decrypt_document(&tampered, &key);
            assert!(
                matches!(result, Err(MeshError::DecryptionFailure(_))),
                "flip at byte {} was not detected",
                i
            );
        }
    }

    #[test]
    fn test_wrong_key_fails() {
        let (blob, mut key) = encrypt_document(&sample_doc()).unwrap();
        key[0] ^= 0xff;
        assert!(matches!(
            decrypt_document(&blob, &key),
            Err(MeshError::DecryptionFailure(_))
        ));
        assert!(matches!(
            decrypt_document(&blob, &key[..16]),
            Err(MeshError::DecryptionFailure(_))
        ));
    }

    #[test]
    fn test_sign_and_verify() {
        let key = generate_signing_key();
        let public = key.verifying_key();

        for digest in [SignatureDigest::Sha256, SignatureDigest::Sha512] {
            let scheme = SignatureScheme::new(digest);
            let sig = scheme.sign(b"reference bytes", &key);
            assert_eq!(sig.len(), 64);
            assert!(scheme.verify(b"reference bytes", &public, &sig));
            assert!(!scheme.verify(b"reference bytez", &public, &sig));
        }
    }

    #[test]
    fn test_digest_is_pinned() {
        let key = generate_signing_key();
        let sig = SignatureScheme::new(SignatureDigest::Sha256).sign(b"msg", &key);
        let other = SignatureScheme::new(SignatureDigest::Sha512);
        assert!(!other.verify(b"msg", &key.verifying_key(), &sig));
    }

    #[test]
    fn test_verify_rejects_other_key_and_garbage() {
        let scheme = SignatureScheme::default();
        let key = generate_signing_key();
        let other = generate_signing_key();
        let sig = scheme.sign(b"msg", &key);

        assert!(!scheme.verify(b"msg", &other.verifying_key(), &sig));
        assert!(!scheme.verify(b"msg", &key.verifying_key(), &sig[..10]));
    }

    #[test]
    fn test_key_marshal_roundtrip() {
        let key = generate_signing_key();
        let restored = unmarshal_private(&marshal_private(&key)).unwrap();
        assert_eq!(restored.to_bytes(), key.to_bytes());

        let public = unmarshal_public(&marshal_public(&key.verifying_key())).unwrap();
        assert_eq!(public, key.verifying_key());

        assert!(matches!(unmarshal_private(&[1, 2, 3]), Err(MeshError::InvalidKey(_))));
        assert!(matches!(unmarshal_public(&[0u8; 31]), Err(MeshError::InvalidKey(_))));
    }

    #[test]
    fn test_digest_from_str() {
        assert_eq!("SHA256".parse::<SignatureDigest>().unwrap(), SignatureDigest::Sha256);
        assert_eq!("sha512".parse::<SignatureDigest>().unwrap(), SignatureDigest::Sha512);
        assert!("sha1".parse::<SignatureDigest>().is_err());
    }
}
