//! Outbound RPC over HTTP
//!
//! [`HttpTransport`] is what a node uses to reach its peers. [`MeshClient`]
//! wraps it with one typed method per client operation for the CLI.

use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use super::protocol::{self, MeshRequest, MeshResponse, MSGPACK_CONTENT_TYPE, RPC_PATH};
use super::PeerTransport;
use crate::document::{AccessId, Document};
use crate::error::{MeshError, Result};
use crate::peers::PeerMeta;
use crate::reference::Reference;

/// `host:port` or an `http://` URL to the node's RPC endpoint.
///
/// The client is built without a TLS backend, so `https://` is refused.
fn rpc_url(addr: &str) -> Result<String> {
    let base = addr.trim_end_matches('/');
    if base.starts_with("https://") {
        return Err(MeshError::Transport(format!("{}: https is not supported", addr)));
    }
    let host = base.strip_prefix("http://").unwrap_or(base);
    Ok(format!("http://{}{}", host, RPC_PATH))
}

#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| MeshError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PeerTransport for HttpTransport {
    async fn call(&self, addr: &str, request: MeshRequest) -> Result<MeshResponse> {
        let url = rpc_url(addr)?;
        debug!(url = %url, rpc = request.name(), "Sending RPC");

        let body = protocol::encode(&request)?;
        let response = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, MSGPACK_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MeshError::Timeout(format!("{}: {}", addr, e))
                } else {
                    MeshError::Transport(format!("{}: {}", addr, e))
                }
            })?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|e| MeshError::Transport(format!("{}: {}", addr, e)))?;

        // Error envelopes may ride on a non-2xx status
        match protocol::decode::<MeshResponse>(&bytes) {
            Ok(decoded) => decoded.into_result(),
            Err(e) if status.is_success() => Err(e),
            Err(_) => Err(MeshError::Transport(format!("{}: HTTP {}", addr, status))),
        }
    }
}

/// Typed client for one node's RPC endpoint
#[derive(Clone)]
pub struct MeshClient {
    addr: String,
    transport: Arc<dyn PeerTransport>,
}

impl MeshClient {
    pub fn new(addr: impl Into<String>, transport: Arc<dyn PeerTransport>) -> Self {
        Self {
            addr: addr.into(),
            transport,
        }
    }

    pub fn connect(addr: impl Into<String>, timeout: Duration) -> Result<Self> {
        Ok(Self::new(addr, Arc::new(HttpTransport::new(timeout)?)))
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    async fn call(&self, request: MeshRequest) -> Result<MeshResponse> {
        self.transport.call(&self.addr, request).await
    }

    pub async fn add(&self, document: Document) -> Result<AccessId> {
        match self.call(MeshRequest::Add { document }).await? {
            MeshResponse::Added { access_id } => AccessId::parse(&access_id),
            other => Err(protocol::unexpected("add", &other)),
        }
    }

    pub async fn get(&self, access_id: &str) -> Result<Document> {
        let request = MeshRequest::Get {
            access_id: access_id.to_string(),
        };
        match self.call(request).await? {
            MeshResponse::Document(document) => Ok(document),
            other => Err(protocol::unexpected("get", &other)),
        }
    }

    pub async fn add_reference(&self, private_key: Vec<u8>, value: Vec<u8>) -> Result<String> {
        match self.call(MeshRequest::AddReference { private_key, value }).await? {
            MeshResponse::ReferenceAdded { reference_id } => Ok(reference_id),
            other => Err(protocol::unexpected("add_reference", &other)),
        }
    }

    pub async fn get_reference(&self, reference_id: &str) -> Result<Reference> {
        let request = MeshRequest::GetReference {
            reference_id: reference_id.to_string(),
        };
        match self.call(request).await? {
            MeshResponse::Reference(reference) => Ok(reference),
            other => Err(protocol::unexpected("get_reference", &other)),
        }
    }

    pub async fn add_peer(&self, addr: &str) -> Result<PeerMeta> {
        let request = MeshRequest::AddPeer {
            addr: addr.to_string(),
        };
        match self.call(request).await? {
            MeshResponse::PeerAdded(peer) => Ok(peer),
            other => Err(protocol::unexpected("add_peer", &other)),
        }
    }

    pub async fn get_peers(&self) -> Result<Vec<PeerMeta>> {
        match self.call(MeshRequest::GetPeers).await? {
            MeshResponse::Peers(peers) => Ok(peers),
            other => Err(protocol::unexpected("get_peers", &other)),
        }
    }

    pub async fn add_directory(&self) -> Result<()> {
        match self.call(MeshRequest::AddDirectory).await? {
            MeshResponse::DirectoryAdded => Ok(()),
            other => Err(protocol::unexpected("add_directory", &other)),
        }
    }
}
