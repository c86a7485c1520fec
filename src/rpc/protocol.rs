//! Mesh RPC protocol - msgpack request/response envelopes
//!
//! Every call is a single `POST /rpc` carrying one [`MeshRequest`] and
//! answered with one [`MeshResponse`]. Client-facing calls and node-to-node
//! calls (`Hello`, `Resolve`) share the envelope.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::document::Document;
use crate::error::{MeshError, Result};
use crate::peers::PeerMeta;
use crate::reference::Reference;
use crate::store::StoreKey;

/// HTTP path of the RPC endpoint
pub const RPC_PATH: &str = "/rpc";

/// Content type of encoded envelopes
pub const MSGPACK_CONTENT_TYPE: &str = "application/msgpack";

/// Remote lookup forwarded between nodes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveRequest {
    pub key: StoreKey,
    /// Remaining forwards; `-1` asks the receiver to infer a budget
    pub hops: i32,
    /// Node ids already asked during this lookup
    pub visited: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolveResponse {
    Found {
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
        /// Node id that held the bytes
        holder: String,
    },
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MeshRequest {
    Add {
        document: Document,
    },
    Get {
        access_id: String,
    },
    AddReference {
        #[serde(with = "serde_bytes")]
        private_key: Vec<u8>,
        #[serde(with = "serde_bytes")]
        value: Vec<u8>,
    },
    GetReference {
        reference_id: String,
    },
    AddPeer {
        addr: String,
    },
    GetPeers,
    AddDirectory,
    Hello {
        peer: PeerMeta,
    },
    Resolve(ResolveRequest),
}

impl MeshRequest {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Get { .. } => "get",
            Self::AddReference { .. } => "add_reference",
            Self::GetReference { .. } => "get_reference",
            Self::AddPeer { .. } => "add_peer",
            Self::GetPeers => "get_peers",
            Self::AddDirectory => "add_directory",
            Self::Hello { .. } => "hello",
            Self::Resolve(_) => "resolve",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum MeshResponse {
    Added { access_id: String },
    Document(Document),
    ReferenceAdded { reference_id: String },
    Reference(Reference),
    PeerAdded(PeerMeta),
    Peers(Vec<PeerMeta>),
    DirectoryAdded,
    Hello { peer: PeerMeta },
    Resolve(ResolveResponse),
    Error { code: u16, message: String },
}

impl MeshResponse {
    pub fn from_error(e: &MeshError) -> Self {
        Self::Error {
            code: e.status_code(),
            message: e.to_string(),
        }
    }

    /// Turn a remote `Error` envelope back into a `MeshError`
    pub fn into_result(self) -> Result<Self> {
        match self {
            Self::Error { code, message } => Err(MeshError::from_status(code, message)),
            other => Ok(other),
        }
    }
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>> {
    Ok(rmp_serde::to_vec(message)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    Ok(rmp_serde::from_slice(bytes)?)
}

/// Error for a response variant that does not answer the request sent
pub(crate) fn unexpected(request: &str, response: &MeshResponse) -> MeshError {
    MeshError::Protocol(format!("unexpected response to {}: {:?}", request, response))
}
