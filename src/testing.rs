//! In-process mesh for tests
//!
//! [`SimNetwork`] implements [`PeerTransport`] by dispatching requests
//! straight into registered [`Node`]s, so multi-node topologies run inside
//! one tokio runtime without sockets. Addresses can be taken offline or
//! slowed down, and calls are counted per address.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;

use crate::config::NodeConfig;
use crate::error::{MeshError, Result};
use crate::identity::NodeIdentity;
use crate::node::Node;
use crate::rpc::{MeshRequest, MeshResponse, PeerTransport};
use crate::store::LocalStore;

/// Initialise a tracing subscriber for tests.
///
/// Respects `RUST_LOG`, defaults to `debug`. Repeated calls are no-ops.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
pub struct SimNetwork {
    nodes: RwLock<HashMap<String, Weak<Node>>>,
    offline: Mutex<HashSet<String>>,
    calls: Mutex<HashMap<String, usize>>,
    delivered: Mutex<HashMap<String, usize>>,
    delays: Mutex<HashMap<String, Duration>>,
}

impl SimNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn register(&self, addr: &str, node: &Arc<Node>) {
        self.nodes
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(addr.to_string(), Arc::downgrade(node));
    }

    pub fn set_offline(&self, addr: &str, offline: bool) {
        let mut set = lock(&self.offline);
        if offline {
            set.insert(addr.to_string());
        } else {
            set.remove(addr);
        }
    }

    /// Hold every request to `addr` for `delay` before delivering it
    pub fn set_delay(&self, addr: &str, delay: Duration) {
        lock(&self.delays).insert(addr.to_string(), delay);
    }

    /// Requests sent to `addr`, whether or not they arrived
    pub fn calls_to(&self, addr: &str) -> usize {
        lock(&self.calls).get(addr).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        lock(&self.calls).values().sum()
    }

    /// Requests that actually reached the node at `addr`
    pub fn delivered_to(&self, addr: &str) -> usize {
        lock(&self.delivered).get(addr).copied().unwrap_or(0)
    }

    pub fn reset_calls(&self) {
        lock(&self.calls).clear();
        lock(&self.delivered).clear();
    }

    fn lookup(&self, addr: &str) -> Option<Arc<Node>> {
        if lock(&self.offline).contains(addr) {
            return None;
        }
        self.nodes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(addr)
            .and_then(Weak::upgrade)
    }
}

#[async_trait]
impl PeerTransport for SimNetwork {
    async fn call(&self, addr: &str, request: MeshRequest) -> Result<MeshResponse> {
        *lock(&self.calls).entry(addr.to_string()).or_default() += 1;

        let delay = lock(&self.delays).get(addr).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let node = self
            .lookup(addr)
            .ok_or_else(|| MeshError::Transport(format!("{}: unreachable", addr)))?;
        *lock(&self.delivered).entry(addr.to_string()).or_default() += 1;
        node.handle(request).await.into_result()
    }
}

/// Build a node on `net` reachable at `addr`, backed by a temporary store
pub fn sim_node(
    net: &Arc<SimNetwork>,
    addr: &str,
    max_peers: usize,
    max_width: usize,
) -> Result<Arc<Node>> {
    let config = NodeConfig {
        advertise: Some(addr.to_string()),
        max_peers,
        max_width,
        request_timeout_secs: 5,
        ..NodeConfig::default()
    };
    let transport: Arc<dyn PeerTransport> = net.clone();
    let node = Arc::new(Node::with_parts(
        config,
        NodeIdentity::generate(),
        LocalStore::temporary()?,
        transport,
    )?);
    net.register(addr, &node);
    Ok(node)
}
