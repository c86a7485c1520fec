//! Hop-limited lookup over an unstructured peer mesh
//!
//! `resolve(key, budget)` runs four stages:
//!
//! 1. **Local**: return straight from the [`LocalStore`], consuming no hops.
//! 2. **Budget**: an explicit remaining count, or one inferred from the peer
//!    table as `max(1, ceil(ln(peers) / ln(max(2, max_width))))` (zero with no
//!    peers). A zero budget stops here.
//! 3. **Known holders**: ask peers recorded as holding the key, one by one.
//! 4. **Bounded flood**: ask up to `max_width` unvisited peers concurrently;
//!    the first hit wins and the remaining requests are dropped.
//!
//! Every forwarded request carries `budget - 1` and the visited set (this
//! node plus every peer asked at this hop), so the budget strictly shrinks
//! and the visited set strictly grows along any path.
//!
//! Remote bytes must pass the key's content check and the caller's
//! [`Validator`] before the answering peer is trusted as a holder. A rejected
//! reply is skipped like a miss; if every reply was rejected the lookup fails
//! with the last rejection instead of `NotFound`.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::crypto::content_hash;
use crate::error::{MeshError, Result};
use crate::peers::{PeerMeta, PeerTable};
use crate::rpc::{PeerTransport, ResolveRequest, ResolveResponse};
use crate::store::{LocalStore, StoreKey};

/// Wire value asking the receiver to infer the budget
pub const INFER_HOPS: i32 = -1;

/// Extra acceptance check applied to bytes returned by peers
pub type Validator<'a> = &'a (dyn Fn(&[u8]) -> Result<()> + Send + Sync);

fn accept_any(_: &[u8]) -> Result<()> {
    Ok(())
}

/// Answers that prove a peer served bad bytes, as opposed to a miss
fn is_rejection(e: &MeshError) -> bool {
    matches!(e, MeshError::HashMismatch { .. } | MeshError::InvalidReference(_))
}

/// Number of peer-to-peer forwards a lookup may still make
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HopBudget {
    Infer,
    Remaining(u32),
}

impl HopBudget {
    pub fn from_wire(hops: i32) -> Result<Self> {
        match hops {
            INFER_HOPS => Ok(Self::Infer),
            h if h >= 0 => Ok(Self::Remaining(h as u32)),
            h => Err(MeshError::InvalidHopBudget(h)),
        }
    }

    pub fn to_wire(self) -> i32 {
        match self {
            Self::Infer => INFER_HOPS,
            Self::Remaining(h) => i32::try_from(h).unwrap_or(i32::MAX),
        }
    }
}

/// Budget that lets a lookup reach `peer_count` nodes at fan-out `max_width`
pub fn infer_hops(peer_count: usize, max_width: usize) -> u32 {
    if peer_count == 0 {
        return 0;
    }
    // ceil(log_width(peer_count)) without float rounding at exact powers
    let width = max_width.max(2) as u128;
    let mut reach: u128 = 1;
    let mut hops = 0u32;
    while reach < peer_count as u128 {
        reach = reach.saturating_mul(width);
        hops += 1;
    }
    hops.max(1)
}

/// Bytes found by a lookup
#[derive(Debug, Clone)]
pub struct Resolved {
    pub data: Vec<u8>,
    /// Node id that held the bytes
    pub holder: String,
}

pub struct Router {
    store: LocalStore,
    peers: Arc<PeerTable>,
    transport: Arc<dyn PeerTransport>,
    request_timeout: Duration,
}

impl Router {
    pub fn new(
        store: LocalStore,
        peers: Arc<PeerTable>,
        transport: Arc<dyn PeerTransport>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            store,
            peers,
            transport,
            request_timeout,
        }
    }

    pub async fn resolve(
        &self,
        key: &StoreKey,
        budget: HopBudget,
        visited: Vec<String>,
    ) -> Result<Resolved> {
        self.resolve_with(key, budget, visited, &accept_any).await
    }

    /// [`resolve`](Self::resolve), rejecting remote bytes `validate` refuses
    pub async fn resolve_with(
        &self,
        key: &StoreKey,
        budget: HopBudget,
        visited: Vec<String>,
        validate: Validator<'_>,
    ) -> Result<Resolved> {
        let local_id = self.peers.local_id().to_string();

        match self.store.get(key) {
            Ok(Some(data)) => {
                return Ok(Resolved {
                    data,
                    holder: local_id,
                })
            }
            Ok(None) => {}
            Err(e @ MeshError::HashMismatch { .. }) => {
                warn!(key = %key, error = %e, "Local copy is corrupt, resolving remotely")
            }
            Err(e) => return Err(e),
        }

        let hops = match budget {
            HopBudget::Remaining(h) => h,
            HopBudget::Infer => infer_hops(self.peers.len().await, self.peers.max_width()),
        };
        if hops == 0 {
            debug!(key = %key, "Hop budget exhausted");
            return Err(MeshError::NotFound(key.id().to_string()));
        }

        let width = self.peers.max_width();
        let mut visited: HashSet<String> = visited.into_iter().collect();
        visited.insert(local_id);

        let mut rejected: Option<MeshError> = None;

        let holders = self.peers.holder_peers(key.id(), &visited).await;
        for holder in holders.into_iter().take(width) {
            visited.insert(holder.id.clone());
            let request = self.forward_request(key, hops, &visited);
            match self.ask(&holder, request, validate).await {
                Ok(found) => return Ok(found),
                Err(MeshError::NotFound(_)) => {
                    debug!(key = %key, peer = %holder.id, "Known holder missed")
                }
                Err(e) if is_rejection(&e) => {
                    warn!(key = %key, peer = %holder.id, error = %e, "Known holder served invalid bytes");
                    self.peers.forget_holder(key.id(), &holder.id).await;
                    rejected = Some(e);
                }
                Err(e) => warn!(key = %key, peer = %holder.id, error = %e, "Known holder request failed"),
            }
        }

        let targets = self.peers.select_peers(&visited, width).await;
        if targets.is_empty() {
            debug!(key = %key, "No unvisited peers to flood");
            return Err(rejected.unwrap_or_else(|| MeshError::NotFound(key.id().to_string())));
        }
        visited.extend(targets.iter().map(|p| p.id.clone()));
        let request = self.forward_request(key, hops, &visited);

        debug!(key = %key, hops, fanout = targets.len(), "Flooding lookup");
        let mut in_flight: FuturesUnordered<_> = targets
            .into_iter()
            .map(|peer| {
                let request = request.clone();
                async move {
                    let result = self.ask(&peer, request, validate).await;
                    (peer, result)
                }
            })
            .collect();

        // Returning drops `in_flight`, cancelling the slower siblings.
        while let Some((peer, result)) = in_flight.next().await {
            match result {
                Ok(found) => return Ok(found),
                Err(MeshError::NotFound(_)) => {
                    debug!(key = %key, peer = %peer.id, "Peer did not find key")
                }
                Err(e) if is_rejection(&e) => {
                    warn!(key = %key, peer = %peer.id, error = %e, "Peer served invalid bytes");
                    self.peers.forget_holder(key.id(), &peer.id).await;
                    rejected = Some(e);
                }
                Err(e) => warn!(key = %key, peer = %peer.id, error = %e, "Flood request failed"),
            }
        }

        Err(rejected.unwrap_or_else(|| MeshError::NotFound(key.id().to_string())))
    }

    fn forward_request(&self, key: &StoreKey, hops: u32, visited: &HashSet<String>) -> ResolveRequest {
        let mut visited: Vec<String> = visited.iter().cloned().collect();
        visited.sort();
        ResolveRequest {
            key: key.clone(),
            hops: HopBudget::Remaining(hops - 1).to_wire(),
            visited,
        }
    }

    /// Send one lookup to `peer` and vet the answer
    async fn ask(
        &self,
        peer: &PeerMeta,
        request: ResolveRequest,
        validate: Validator<'_>,
    ) -> Result<Resolved> {
        let key = request.key.clone();
        let response = tokio::time::timeout(
            self.request_timeout,
            self.transport.resolve(&peer.address, request),
        )
        .await
        .map_err(|_| MeshError::Timeout(format!("resolve via {}", peer.address)))??;

        match response {
            ResolveResponse::Found { data, holder } => {
                if !key.matches(&data) {
                    let actual = content_hash(&data);
                    warn!(key = %key, peer = %peer.id, actual = %actual, "Peer returned bytes that do not match key");
                    return Err(MeshError::HashMismatch {
                        expected: key.id().to_string(),
                        actual,
                    });
                }
                validate(data.as_slice())?;

                self.peers.touch(&peer.id).await;
                self.peers.register_holder(key.id(), &peer.id).await;
                if holder != peer.id {
                    self.peers.register_known_holder(key.id(), &holder).await;
                }
                debug!(key = %key, via = %peer.id, holder = %holder, "Resolved remotely");
                Ok(Resolved { data, holder })
            }
            ResolveResponse::NotFound => Err(MeshError::NotFound(key.id().to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KvEngine;
    use crate::testing::{sim_node, SimNetwork};

    #[test]
    fn test_infer_hops() {
        assert_eq!(infer_hops(0, 20), 0);
        assert_eq!(infer_hops(1, 20), 1);
        assert_eq!(infer_hops(20, 20), 1);
        assert_eq!(infer_hops(21, 20), 2);
        assert_eq!(infer_hops(400, 20), 2);
        assert_eq!(infer_hops(401, 20), 3);
    }

    #[test]
    fn test_infer_hops_narrow_width() {
        // width below two is treated as two
        assert_eq!(infer_hops(8, 1), 3);
        assert_eq!(infer_hops(8, 2), 3);
        assert_eq!(infer_hops(9, 2), 4);
        assert_eq!(infer_hops(1000, 10), 3);
    }

    #[test]
    fn test_hop_budget_wire() {
        assert_eq!(HopBudget::from_wire(-1).unwrap(), HopBudget::Infer);
        assert_eq!(HopBudget::from_wire(0).unwrap(), HopBudget::Remaining(0));
        assert_eq!(HopBudget::from_wire(3).unwrap().to_wire(), 3);
        assert!(matches!(
            HopBudget::from_wire(-2),
            Err(MeshError::InvalidHopBudget(-2))
        ));
    }

    #[tokio::test]
    async fn test_corrupt_local_copy_is_a_miss() {
        let net = SimNetwork::new();
        let good = sim_node(&net, "good", 10, 5).unwrap();
        let hash = good.store().put_document(b"ciphertext").unwrap();
        let key = StoreKey::Document(hash);

        let db = sled::Config::new().temporary(true).open().unwrap();
        KvEngine::put(&db, key.storage_key().as_bytes(), b"bit rot").unwrap();
        let store = LocalStore::with_engine(Arc::new(db));
        assert!(matches!(store.get(&key), Err(MeshError::HashMismatch { .. })));

        let peers = Arc::new(PeerTable::new("sha256-local", 10, 5));
        let transport: Arc<dyn PeerTransport> = net.clone();
        let router = Router::new(store, Arc::clone(&peers), transport, Duration::from_secs(5));

        // Nobody else to ask
        assert!(matches!(
            router.resolve(&key, HopBudget::Infer, vec![]).await,
            Err(MeshError::NotFound(_))
        ));

        peers.add_peer(PeerMeta::new(good.id(), "good")).await;
        let found = router.resolve(&key, HopBudget::Infer, vec![]).await.unwrap();
        assert_eq!(found.data, b"ciphertext");
        assert_eq!(found.holder, good.id());
    }
}
