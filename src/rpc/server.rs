//! HTTP endpoint for the mesh RPC
//!
//! ## Endpoints
//!
//! - `POST /rpc` - msgpack [`MeshRequest`] in, msgpack [`MeshResponse`] out
//! - `GET /health` - node id, peer count (JSON)
//! - `GET /peers` - peer table (JSON)
//!
//! RPC failures travel inside the envelope as `MeshResponse::Error`, so
//! `/rpc` answers 200 whenever the body could be decoded.

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{self, HeaderValue};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info, warn};

use super::protocol::{self, MeshRequest, MeshResponse, MSGPACK_CONTENT_TYPE, RPC_PATH};
use crate::error::{MeshError, Result};
use crate::node::Node;

pub struct HttpServer {
    node: Arc<Node>,
}

impl HttpServer {
    pub fn new(node: Arc<Node>) -> Self {
        Self { node }
    }

    /// Serve connections from `listener` until the task is dropped
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, node = %self.node.id(), "Mesh RPC listening");

        loop {
            let (stream, remote_addr) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let server = self.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { server.handle_request(req).await }
                });

                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    warn!(addr = %remote_addr, error = %err, "Connection error");
                }
            });
        }
    }

    async fn handle_request(
        &self,
        req: Request<Incoming>,
    ) -> std::result::Result<Response<Full<Bytes>>, hyper::Error> {
        let path = req.uri().path().to_string();
        let method = req.method().clone();

        debug!(method = %method, path = %path, "Incoming request");

        let response = match (method, path.as_str()) {
            (Method::POST, RPC_PATH) => self.handle_rpc(req).await,
            (Method::GET, "/health") => self.handle_health().await,
            (Method::GET, "/peers") => self.handle_peers().await,
            _ => respond(StatusCode::NOT_FOUND, "text/plain", Bytes::from("Not Found")),
        };
        Ok(response)
    }

    /// POST /rpc
    async fn handle_rpc(&self, req: Request<Incoming>) -> Response<Full<Bytes>> {
        let body = match req.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => {
                warn!(error = %e, "Failed to read RPC body");
                return rpc_error(MeshError::InvalidRequest(format!("unreadable body: {}", e)));
            }
        };

        let request: MeshRequest = match protocol::decode(&body) {
            Ok(request) => request,
            Err(e) => {
                warn!(error = %e, bytes = body.len(), "Undecodable RPC request");
                return rpc_error(MeshError::InvalidRequest(e.to_string()));
            }
        };

        let response = self.node.handle(request).await;
        encode_response(&response)
    }

    /// GET /health
    async fn handle_health(&self) -> Response<Full<Bytes>> {
        let body = serde_json::json!({
            "status": "ok",
            "id": self.node.id(),
            "peers": self.node.peers().len().await,
        });
        respond(StatusCode::OK, "application/json", Bytes::from(body.to_string()))
    }

    /// GET /peers
    async fn handle_peers(&self) -> Response<Full<Bytes>> {
        let peers = self.node.get_peers().await;
        match serde_json::to_vec(&peers) {
            Ok(body) => respond(StatusCode::OK, "application/json", Bytes::from(body)),
            Err(e) => respond(
                StatusCode::INTERNAL_SERVER_ERROR,
                "text/plain",
                Bytes::from(format!("Error: {}", e)),
            ),
        }
    }
}

fn rpc_error(e: MeshError) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
    let mut response = encode_response(&MeshResponse::from_error(&e));
    *response.status_mut() = status;
    response
}

fn encode_response(response: &MeshResponse) -> Response<Full<Bytes>> {
    match protocol::encode(response) {
        Ok(body) => respond(StatusCode::OK, MSGPACK_CONTENT_TYPE, Bytes::from(body)),
        Err(e) => respond(
            StatusCode::INTERNAL_SERVER_ERROR,
            "text/plain",
            Bytes::from(format!("Error: {}", e)),
        ),
    }
}

fn respond(status: StatusCode, content_type: &'static str, body: Bytes) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}
