//! Error types for elohim-mesh

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MeshError {
    #[error("Malformed access id: {0}")]
    MalformedAccessId(String),

    #[error("Decryption failure: {0}")]
    DecryptionFailure(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("Bootstrap failed for {addr}: {reason}")]
    BootstrapFailure { addr: String, reason: String },

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Invalid hop budget: {0}")]
    InvalidHopBudget(i32),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timeout: {0}")]
    Timeout(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
}

pub type Result<T> = std::result::Result<T, MeshError>;

impl MeshError {
    /// Wire status carried in `MeshResponse::Error`.
    ///
    /// Codes follow HTTP where one fits; 406 is reserved for an access id the
    /// node could not parse.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::MalformedAccessId(_) => 406,
            Self::InvalidKey(_)
            | Self::InvalidHopBudget(_)
            | Self::InvalidRequest(_) => 400,
            Self::NotFound(_) => 404,
            Self::InvalidReference(_) => 409,
            Self::DecryptionFailure(_) | Self::HashMismatch { .. } => 422,
            Self::BootstrapFailure { .. } | Self::Transport(_) => 502,
            Self::Timeout(_) => 504,
            _ => 500,
        }
    }

    /// Rebuild an error received from a remote node.
    ///
    /// Only the taxonomy a caller can act on survives the trip; anything else
    /// comes back as a protocol error carrying the remote message.
    pub fn from_status(code: u16, message: String) -> Self {
        match code {
            400 => Self::InvalidRequest(message),
            406 => Self::MalformedAccessId(message),
            404 => Self::NotFound(message),
            409 => Self::InvalidReference(message),
            422 => Self::DecryptionFailure(message),
            502 => Self::Transport(message),
            504 => Self::Timeout(message),
            _ => Self::Protocol(message),
        }
    }
}

impl From<rmp_serde::encode::Error> for MeshError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for MeshError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
