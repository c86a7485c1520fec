//! Elohim Mesh - encrypted documents and signed references over a peer mesh
//!
//! Every node stores what it is given and answers lookups for what it holds.
//! Lookups that miss locally spread through the mesh under a hop budget.
//!
//! ## Entities
//!
//! | Entity | Addressed by | Integrity |
//! |--------|--------------|-----------|
//! | Document | hash of the encrypted blob | AES-256-CFB keyed by the plaintext hash |
//! | Reference | hash of the owner's public key | Ed25519 signature, owner may overwrite |
//!
//! A document is handed out as an access id, `<blob hash>:<base64url key>`.
//! Whoever holds the access id can fetch and decrypt; a node holding only the
//! blob cannot.
//!
//! ## Storage Layout
//!
//! ```text
//! tmp/node1/
//! ├── store.sled/      # document/<hash> and reference/<id> records
//! ├── identity.key     # Ed25519 node key (node id = hash of public key)
//! └── config.toml      # Configuration
//! ```
//!
//! ## Lookup
//!
//! Local store first, then known holders of the key, then a bounded flood of
//! up to `max_width` unvisited peers. See [`routing`].

pub mod bootstrap;
pub mod config;
pub mod crypto;
pub mod document;
pub mod error;
pub mod identity;
pub mod node;
pub mod peers;
pub mod reference;
pub mod routing;
pub mod rpc;
pub mod store;

// In-process network for integration tests
pub mod testing;

// Re-exports
pub use config::NodeConfig;
pub use crypto::{SignatureDigest, SignatureScheme};
pub use document::{AccessId, Document};
pub use error::{MeshError, Result};
pub use identity::NodeIdentity;
pub use node::Node;
pub use peers::{PeerMeta, PeerTable};
pub use reference::{Reference, ReferenceProtocol};
pub use routing::{HopBudget, Router};
pub use rpc::{HttpServer, HttpTransport, MeshClient, PeerTransport};
pub use store::{LocalStore, StoreKey};
