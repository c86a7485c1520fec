//! Mesh node - wires storage, peers, routing and references together
//!
//! ## Control flow
//!
//! ```text
//! add(doc)      ─▶ encrypt ─▶ LocalStore (under ciphertext hash) ─▶ register self as holder
//! get(access)   ─▶ Router::resolve (local, then peers) ─▶ decrypt with embedded key
//! add_reference ─▶ sign ─▶ LocalStore (under hash of public key) ─▶ register self as holder
//! get_reference ─▶ Router::resolve ─▶ check id binding + signature
//! ```

use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::config::NodeConfig;
use crate::crypto::{self, SignatureScheme};
use crate::document::{AccessId, Document};
use crate::error::{MeshError, Result};
use crate::identity::NodeIdentity;
use crate::peers::{now_secs, PeerMeta, PeerTable};
use crate::reference::{Reference, ReferenceProtocol};
use crate::routing::{HopBudget, Router};
use crate::rpc::{MeshRequest, MeshResponse, PeerTransport, ResolveRequest, ResolveResponse};
use crate::store::{LocalStore, StoreKey};

pub struct Node {
    identity: NodeIdentity,
    config: NodeConfig,
    advertise: String,
    store: LocalStore,
    peers: Arc<PeerTable>,
    router: Arc<Router>,
    references: ReferenceProtocol,
    transport: Arc<dyn PeerTransport>,
}

impl Node {
    /// Open the node's store and identity under `config.path`
    pub fn open(config: NodeConfig, transport: Arc<dyn PeerTransport>) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.path)?;

        let identity = NodeIdentity::load_or_generate(&config.identity_path())?;
        let store = LocalStore::open(config.db_path(), config.cache_size)?;
        Self::with_parts(config, identity, store, transport)
    }

    pub fn with_parts(
        config: NodeConfig,
        identity: NodeIdentity,
        store: LocalStore,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self> {
        config.validate()?;

        let peers = Arc::new(PeerTable::new(
            identity.id(),
            config.max_peers,
            config.max_width,
        ));
        let router = Arc::new(Router::new(
            store.clone(),
            Arc::clone(&peers),
            Arc::clone(&transport),
            config.request_timeout(),
        ));
        let references = ReferenceProtocol::new(
            SignatureScheme::new(config.signature_digest),
            store.clone(),
            Arc::clone(&peers),
            Arc::clone(&router),
        );
        let advertise = config.advertise.clone().unwrap_or_default();

        info!(
            id = %identity.id(),
            advertise = %advertise,
            max_peers = config.max_peers,
            max_width = config.max_width,
            "Created mesh node"
        );

        Ok(Self {
            identity,
            config,
            advertise,
            store,
            peers,
            router,
            references,
            transport,
        })
    }

    pub fn id(&self) -> &str {
        self.identity.id()
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn peers(&self) -> &Arc<PeerTable> {
        &self.peers
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// How this node describes itself to peers
    pub fn meta(&self) -> PeerMeta {
        PeerMeta {
            id: self.id().to_string(),
            address: self.advertise.clone(),
            last_seen: now_secs(),
        }
    }

    /// Encrypt and store a document, returning its access id
    pub async fn add(&self, document: Document) -> Result<AccessId> {
        let (blob, key) = crypto::encrypt_document(&document)?;
        let hash = self.store.put_document(&blob)?;
        self.peers.register_holder(&hash, self.id()).await;
        Ok(AccessId::new(hash, key))
    }

    /// Fetch (locally or from the mesh) and decrypt a document
    pub async fn get(&self, access_id: &str) -> Result<Document> {
        let access = AccessId::parse(access_id)?;
        let resolved = self
            .router
            .resolve(
                &StoreKey::Document(access.document_hash.clone()),
                HopBudget::Infer,
                Vec::new(),
            )
            .await
            .map_err(|e| match e {
                // every copy found was corrupt
                MeshError::HashMismatch { expected, actual } => MeshError::DecryptionFailure(
                    format!("blob {} hashes to {}", expected, actual),
                ),
                other => other,
            })?;

        crypto::decrypt_document(&resolved.data, &access.key).map_err(|e| {
            warn!(hash = %access.document_hash, error = %e, "Cannot decrypt document");
            e
        })
    }

    pub async fn add_reference(&self, private_key: &[u8], value: Vec<u8>) -> Result<String> {
        self.references.add_reference(private_key, value).await
    }

    pub async fn get_reference(&self, reference_id: &str) -> Result<Reference> {
        self.references.get_reference(reference_id).await
    }

    /// Handshake with the node at `addr` and add it to the peer table
    pub async fn add_peer(&self, addr: &str) -> Result<PeerMeta> {
        let failure = |reason: String| MeshError::BootstrapFailure {
            addr: addr.to_string(),
            reason,
        };

        let remote = tokio::time::timeout(
            self.config.request_timeout(),
            self.transport.hello(addr, self.meta()),
        )
        .await
        .map_err(|_| failure("handshake timed out".into()))?
        .map_err(|e| failure(e.to_string()))?;

        if remote.id == self.id() {
            return Err(failure("address belongs to this node".into()));
        }

        let peer = PeerMeta {
            id: remote.id,
            address: addr.to_string(),
            last_seen: now_secs(),
        };
        self.peers.add_peer(peer.clone()).await;
        Ok(peer)
    }

    pub async fn get_peers(&self) -> Vec<PeerMeta> {
        self.peers.list_peers().await
    }

    /// Directory support is not part of the mesh; acknowledged and ignored
    pub async fn add_directory(&self) -> Result<()> {
        debug!("AddDirectory is a passthrough");
        Ok(())
    }

    /// Inbound handshake: remember the caller if it can be dialed back
    pub async fn handle_hello(&self, caller: PeerMeta) -> PeerMeta {
        if caller.id != self.id() && !caller.address.is_empty() {
            self.peers
                .add_peer(PeerMeta {
                    last_seen: now_secs(),
                    ..caller
                })
                .await;
        }
        self.meta()
    }

    /// Inbound lookup forwarded by another node
    pub async fn handle_resolve(&self, request: ResolveRequest) -> Result<ResolveResponse> {
        let budget = HopBudget::from_wire(request.hops)?;
        let resolved = match &request.key {
            StoreKey::Reference(id) => {
                self.references
                    .resolve_verified(id, budget, request.visited)
                    .await
            }
            StoreKey::Document(_) => self.router.resolve(&request.key, budget, request.visited).await,
        };
        match resolved {
            Ok(found) => Ok(ResolveResponse::Found {
                data: found.data,
                holder: found.holder,
            }),
            Err(MeshError::NotFound(_)) => Ok(ResolveResponse::NotFound),
            Err(e) => Err(e),
        }
    }

    /// Dispatch one RPC envelope
    pub async fn handle(&self, request: MeshRequest) -> MeshResponse {
        let name = request.name();
        let result = match request {
            MeshRequest::Add { document } => self
                .add(document)
                .await
                .map(|access| MeshResponse::Added {
                    access_id: access.to_string(),
                }),
            MeshRequest::Get { access_id } => {
                self.get(&access_id).await.map(MeshResponse::Document)
            }
            MeshRequest::AddReference { private_key, value } => self
                .add_reference(&private_key, value)
                .await
                .map(|reference_id| MeshResponse::ReferenceAdded { reference_id }),
            MeshRequest::GetReference { reference_id } => self
                .get_reference(&reference_id)
                .await
                .map(MeshResponse::Reference),
            MeshRequest::AddPeer { addr } => {
                self.add_peer(&addr).await.map(MeshResponse::PeerAdded)
            }
            MeshRequest::GetPeers => Ok(MeshResponse::Peers(self.get_peers().await)),
            MeshRequest::AddDirectory => self
                .add_directory()
                .await
                .map(|_| MeshResponse::DirectoryAdded),
            MeshRequest::Hello { peer } => Ok(MeshResponse::Hello {
                peer: self.handle_hello(peer).await,
            }),
            MeshRequest::Resolve(request) => {
                self.handle_resolve(request).await.map(MeshResponse::Resolve)
            }
        };

        match result {
            Ok(response) => response,
            Err(e) => {
                match &e {
                    MeshError::NotFound(_)
                    | MeshError::MalformedAccessId(_)
                    | MeshError::InvalidReference(_)
                    | MeshError::BootstrapFailure { .. } => {
                        warn!(rpc = name, error = %e, "RPC failed")
                    }
                    _ => error!(rpc = name, error = %e, "RPC failed"),
                }
                MeshResponse::from_error(&e)
            }
        }
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id())
            .field("advertise", &self.advertise)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sim_node, SimNetwork};
    use async_trait::async_trait;

    /// Peer that answers every lookup with bytes that fit no key
    struct CorruptPeer;

    #[async_trait]
    impl PeerTransport for CorruptPeer {
        async fn call(&self, addr: &str, request: MeshRequest) -> Result<MeshResponse> {
            match request {
                MeshRequest::Hello { .. } => Ok(MeshResponse::Hello {
                    peer: PeerMeta::new("sha256-corrupt", addr),
                }),
                MeshRequest::Resolve(_) => Ok(MeshResponse::Resolve(ResolveResponse::Found {
                    data: b"bit rot".to_vec(),
                    holder: "sha256-corrupt".into(),
                })),
                other => Err(MeshError::InvalidRequest(other.name().to_string())),
            }
        }
    }

    #[tokio::test]
    async fn test_handle_reports_errors_in_envelope() {
        let net = SimNetwork::new();
        let node = sim_node(&net, "n", 10, 5).unwrap();

        let response = node
            .handle(MeshRequest::Get {
                access_id: "no-colon-here".into(),
            })
            .await;
        assert!(matches!(response, MeshResponse::Error { code: 406, .. }));

        let response = node
            .handle(MeshRequest::GetReference {
                reference_id: String::new(),
            })
            .await;
        assert!(matches!(response, MeshResponse::Error { code: 400, .. }));
    }

    #[tokio::test]
    async fn test_handle_add_then_get() {
        let net = SimNetwork::new();
        let node = sim_node(&net, "n", 10, 5).unwrap();
        let document = Document::new("text/plain", b"dispatch".to_vec());

        let access_id = match node.handle(MeshRequest::Add { document: document.clone() }).await {
            MeshResponse::Added { access_id } => access_id,
            other => panic!("unexpected response {:?}", other),
        };
        match node.handle(MeshRequest::Get { access_id }).await {
            MeshResponse::Document(fetched) => assert_eq!(fetched, document),
            other => panic!("unexpected response {:?}", other),
        }
        assert!(matches!(
            node.handle(MeshRequest::AddDirectory).await,
            MeshResponse::DirectoryAdded
        ));
    }

    #[tokio::test]
    async fn test_resolve_miss_is_not_an_error() {
        let net = SimNetwork::new();
        let node = sim_node(&net, "n", 10, 5).unwrap();

        let response = node
            .handle_resolve(ResolveRequest {
                key: StoreKey::Document(crypto::content_hash(b"absent")),
                hops: 3,
                visited: vec![],
            })
            .await
            .unwrap();
        assert_eq!(response, ResolveResponse::NotFound);

        let invalid = node
            .handle_resolve(ResolveRequest {
                key: StoreKey::Document(crypto::content_hash(b"absent")),
                hops: -5,
                visited: vec![],
            })
            .await;
        assert!(matches!(invalid, Err(MeshError::InvalidHopBudget(-5))));
    }

    #[tokio::test]
    async fn test_hello_ignores_unreachable_callers() {
        let net = SimNetwork::new();
        let node = sim_node(&net, "n", 10, 5).unwrap();

        let reply = node.handle_hello(PeerMeta::new("sha256-anon", "")).await;
        assert_eq!(reply.id, node.id());
        assert_eq!(reply.address, "n");
        assert!(node.peers().is_empty().await);

        node.handle_hello(PeerMeta::new("sha256-other", "other:1")).await;
        assert_eq!(node.peers().len().await, 1);
    }

    #[tokio::test]
    async fn test_corrupt_remote_copy_fails_decryption() {
        let node = Node::with_parts(
            NodeConfig::default(),
            NodeIdentity::generate(),
            LocalStore::temporary().unwrap(),
            Arc::new(CorruptPeer),
        )
        .unwrap();
        node.add_peer("corrupt").await.unwrap();

        let access = AccessId::new(crypto::content_hash(b"ciphertext"), [3u8; 32]);
        assert!(matches!(
            node.get(&access.to_string()).await,
            Err(MeshError::DecryptionFailure(_))
        ));
        // A peer that served bad bytes is not remembered as a holder
        assert!(node.peers().holders_of(&access.document_hash).await.is_empty());
    }
}
