//! RPC layer - wire protocol, peer transport and the HTTP endpoint
//!
//! ```text
//!   caller ──POST /rpc──▶ HttpServer ──▶ Node::handle
//!                                          │
//!                                          └─ Router ──PeerTransport──▶ other nodes
//! ```
//!
//! [`PeerTransport`] is the seam between routing and the network. The daemon
//! uses [`HttpTransport`]; tests plug in [`crate::testing::SimNetwork`].

pub mod client;
pub mod protocol;
pub mod server;

use async_trait::async_trait;

use crate::error::Result;
use crate::peers::PeerMeta;

pub use client::{HttpTransport, MeshClient};
pub use protocol::{MeshRequest, MeshResponse, ResolveRequest, ResolveResponse};
pub use server::HttpServer;

/// Outbound calls a node makes to other nodes
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Send one request to the node at `addr`.
    ///
    /// Remote `Error` envelopes come back as `Err`.
    async fn call(&self, addr: &str, request: MeshRequest) -> Result<MeshResponse>;

    /// Handshake: announce `local`, learn the remote node's identity
    async fn hello(&self, addr: &str, local: PeerMeta) -> Result<PeerMeta> {
        match self.call(addr, MeshRequest::Hello { peer: local }).await? {
            MeshResponse::Hello { peer } => Ok(peer),
            other => Err(protocol::unexpected("hello", &other)),
        }
    }

    /// Forward a lookup to the node at `addr`
    async fn resolve(&self, addr: &str, request: ResolveRequest) -> Result<ResolveResponse> {
        match self.call(addr, MeshRequest::Resolve(request)).await? {
            MeshResponse::Resolve(response) => Ok(response),
            other => Err(protocol::unexpected("resolve", &other)),
        }
    }
}
