//! End-to-end RPC over localhost HTTP

use elohim_mesh::crypto::{self, generate_signing_key};
use elohim_mesh::{
    AccessId, Document, HttpServer, HttpTransport, LocalStore, MeshClient, MeshError, Node, NodeConfig,
    NodeIdentity,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Start a node serving on an ephemeral localhost port
async fn start_node() -> (Arc<Node>, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();

    let config = NodeConfig {
        advertise: Some(addr.clone()),
        request_timeout_secs: 5,
        ..NodeConfig::default()
    };
    let transport = Arc::new(HttpTransport::new(TIMEOUT).unwrap());
    let node = Arc::new(
        Node::with_parts(
            config,
            NodeIdentity::generate(),
            LocalStore::temporary().unwrap(),
            transport,
        )
        .unwrap(),
    );

    let server = Arc::new(HttpServer::new(Arc::clone(&node)));
    tokio::spawn(server.run(listener));
    (node, addr)
}

#[tokio::test]
async fn test_document_roundtrip_over_http() {
    let (_a, a_addr) = start_node().await;
    let (b, b_addr) = start_node().await;

    let client_a = MeshClient::connect(a_addr, TIMEOUT).unwrap();
    let peer = client_a.add_peer(&b_addr).await.unwrap();
    assert_eq!(peer.id, b.id());

    let document = Document::new("text/plain", b"over the wire".to_vec());
    let access = client_a.add(document.clone()).await.unwrap();

    let client_b = MeshClient::connect(b_addr, TIMEOUT).unwrap();
    assert_eq!(client_b.get(&access.to_string()).await.unwrap(), document);
    assert_eq!(client_b.get_peers().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_reference_over_http() {
    let (_a, a_addr) = start_node().await;
    let client = MeshClient::connect(a_addr, TIMEOUT).unwrap();

    let key = generate_signing_key();
    let id = client
        .add_reference(crypto::marshal_private(&key), b"pointer".to_vec())
        .await
        .unwrap();
    assert_eq!(id, crypto::content_hash(&key.verifying_key().to_bytes()));

    let reference = client.get_reference(&id).await.unwrap();
    assert_eq!(reference.value, b"pointer");
    client.add_directory().await.unwrap();
}

#[tokio::test]
async fn test_remote_errors_keep_their_kind() {
    let (_a, a_addr) = start_node().await;
    let client = MeshClient::connect(a_addr, TIMEOUT).unwrap();

    let missing = AccessId::new(crypto::content_hash(b"nothing"), [1u8; 32]).to_string();
    assert!(matches!(
        client.get(&missing).await,
        Err(MeshError::NotFound(_))
    ));
    assert!(matches!(
        client.get("no-colon-here").await,
        Err(MeshError::MalformedAccessId(_))
    ));
}

#[tokio::test]
async fn test_unreachable_node_is_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    drop(listener);

    let client = MeshClient::connect(addr, TIMEOUT).unwrap();
    assert!(matches!(
        client.get_peers().await,
        Err(MeshError::Transport(_))
    ));
}
