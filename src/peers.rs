//! Peer table and routing index
//!
//! Tracks the peers this node knows about and, per content id, which of them
//! are believed to hold it. Both maps live behind one lock so that evicting a
//! peer and registering it as a holder can never interleave.
//!
//! Bounds:
//! - at most `max_peers` peers; admitting a new one at capacity evicts the
//!   least recently seen
//! - at most `max_width` holders per content id; the least recently confirmed
//!   holder is dropped first
//! - at most `max_indexed` content ids in the holder index; the least recently
//!   touched id is forgotten first

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A known peer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerMeta {
    /// Node id (content hash of the node's public key)
    pub id: String,
    /// Address the peer's RPC endpoint can be dialed at
    pub address: String,
    /// Last successful contact (unix seconds)
    pub last_seen: i64,
}

impl PeerMeta {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            last_seen: now_secs(),
        }
    }
}

pub(crate) fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Content ids the holder index tracks unless configured otherwise
pub const DEFAULT_MAX_INDEXED: usize = 65_536;

#[derive(Default)]
struct HolderSet {
    /// Most recently confirmed first
    ids: VecDeque<String>,
    touched: u64,
}

#[derive(Default)]
struct TableState {
    peers: HashMap<String, PeerMeta>,
    holders: HashMap<String, HolderSet>,
    clock: u64,
}

impl TableState {
    fn evict_oldest(&mut self) -> Option<PeerMeta> {
        let oldest = self
            .peers
            .values()
            .min_by(|a, b| a.last_seen.cmp(&b.last_seen).then_with(|| a.id.cmp(&b.id)))?
            .id
            .clone();
        let evicted = self.peers.remove(&oldest)?;

        self.holders.retain(|_, set| {
            set.ids.retain(|h| *h != oldest);
            !set.ids.is_empty()
        });
        Some(evicted)
    }

    fn forget_stalest_content(&mut self) -> Option<String> {
        let stalest = self
            .holders
            .iter()
            .min_by(|a, b| a.1.touched.cmp(&b.1.touched).then_with(|| a.0.cmp(b.0)))?
            .0
            .clone();
        self.holders.remove(&stalest)?;
        Some(stalest)
    }

    fn push_holder(&mut self, content_id: &str, peer_id: &str, max_width: usize, max_indexed: usize) {
        self.clock += 1;
        let tick = self.clock;

        if !self.holders.contains_key(content_id) && self.holders.len() >= max_indexed {
            if let Some(forgotten) = self.forget_stalest_content() {
                debug!(content = %forgotten, "Holder index full, forgot stalest content");
            }
        }

        let set = self.holders.entry(content_id.to_string()).or_default();
        set.touched = tick;
        set.ids.retain(|h| h != peer_id);
        set.ids.push_front(peer_id.to_string());

        while set.ids.len() > max_width {
            if let Some(dropped) = set.ids.pop_back() {
                debug!(content = %content_id, dropped = %dropped, "Holder set full, dropped oldest");
            }
        }
    }
}

/// Bounded peer table shared by routing, bootstrap and the RPC surface
pub struct PeerTable {
    local_id: String,
    max_peers: usize,
    max_width: usize,
    max_indexed: usize,
    state: RwLock<TableState>,
}

impl PeerTable {
    pub fn new(local_id: impl Into<String>, max_peers: usize, max_width: usize) -> Self {
        Self {
            local_id: local_id.into(),
            max_peers,
            max_width,
            max_indexed: DEFAULT_MAX_INDEXED,
            state: RwLock::new(TableState::default()),
        }
    }

    /// Bound the number of content ids the holder index remembers
    pub fn with_max_indexed(mut self, max_indexed: usize) -> Self {
        self.max_indexed = max_indexed;
        self
    }

    pub fn local_id(&self) -> &str {
        &self.local_id
    }

    pub fn max_width(&self) -> usize {
        self.max_width
    }

    /// Insert or refresh a peer, returning whichever peer was evicted to make room
    pub async fn add_peer(&self, peer: PeerMeta) -> Option<PeerMeta> {
        if peer.id == self.local_id || self.max_peers == 0 {
            return None;
        }

        let mut state = self.state.write().await;

        if let Some(existing) = state.peers.get_mut(&peer.id) {
            existing.address = peer.address;
            existing.last_seen = existing.last_seen.max(peer.last_seen);
            return None;
        }

        let evicted = if state.peers.len() >= self.max_peers {
            state.evict_oldest()
        } else {
            None
        };
        if let Some(ref old) = evicted {
            debug!(evicted = %old.id, admitted = %peer.id, "Peer table full, evicted oldest");
        }

        info!(peer = %peer.id, address = %peer.address, "Added peer");
        state.peers.insert(peer.id.clone(), peer);
        evicted
    }

    /// Mark a peer as just contacted
    pub async fn touch(&self, peer_id: &str) {
        let mut state = self.state.write().await;
        if let Some(peer) = state.peers.get_mut(peer_id) {
            peer.last_seen = now_secs();
        }
    }

    pub async fn get(&self, peer_id: &str) -> Option<PeerMeta> {
        self.state.read().await.peers.get(peer_id).cloned()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.peers.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Snapshot of all peers, most recently seen first
    pub async fn list_peers(&self) -> Vec<PeerMeta> {
        let mut peers: Vec<PeerMeta> = self.state.read().await.peers.values().cloned().collect();
        peers.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.id.cmp(&b.id)));
        peers
    }

    /// Record that `peer_id` (possibly this node) holds `content_id`
    pub async fn register_holder(&self, content_id: &str, peer_id: &str) {
        if self.max_width == 0 || self.max_indexed == 0 {
            return;
        }
        let mut state = self.state.write().await;
        state.push_holder(content_id, peer_id, self.max_width, self.max_indexed);
    }

    /// Like [`register_holder`](Self::register_holder), but only for ids
    /// already in the peer table. Returns whether the holder was recorded.
    pub async fn register_known_holder(&self, content_id: &str, peer_id: &str) -> bool {
        if self.max_width == 0 || self.max_indexed == 0 {
            return false;
        }
        let mut state = self.state.write().await;
        if !state.peers.contains_key(peer_id) {
            return false;
        }
        state.push_holder(content_id, peer_id, self.max_width, self.max_indexed);
        true
    }

    /// Drop `peer_id` from the holders of `content_id`
    pub async fn forget_holder(&self, content_id: &str, peer_id: &str) {
        let mut state = self.state.write().await;
        if let Some(set) = state.holders.get_mut(content_id) {
            set.ids.retain(|h| h != peer_id);
            if set.ids.is_empty() {
                state.holders.remove(content_id);
            }
        }
    }

    /// Known holders of `content_id`, most recently confirmed first
    pub async fn holders_of(&self, content_id: &str) -> Vec<String> {
        self.state
            .read()
            .await
            .holders
            .get(content_id)
            .map(|set| set.ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Known holders that are reachable peers, skipping this node and `exclude`
    pub async fn holder_peers(&self, content_id: &str, exclude: &HashSet<String>) -> Vec<PeerMeta> {
        let state = self.state.read().await;
        let Some(set) = state.holders.get(content_id) else {
            return Vec::new();
        };
        set.ids
            .iter()
            .filter(|id| **id != self.local_id && !exclude.contains(*id))
            .filter_map(|id| state.peers.get(id).cloned())
            .collect()
    }

    /// Pick up to `limit` peers not in `exclude`, in random order
    pub async fn select_peers(&self, exclude: &HashSet<String>, limit: usize) -> Vec<PeerMeta> {
        let mut candidates: Vec<PeerMeta> = self
            .state
            .read()
            .await
            .peers
            .values()
            .filter(|p| !exclude.contains(&p.id))
            .cloned()
            .collect();
        candidates.shuffle(&mut rand::thread_rng());
        candidates.truncate(limit);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer(id: &str, last_seen: i64) -> PeerMeta {
        PeerMeta {
            id: id.to_string(),
            address: format!("{}.local:9000", id),
            last_seen,
        }
    }

    #[tokio::test]
    async fn test_table_stays_bounded() {
        let table = PeerTable::new("self", 3, 2);
        for i in 0..10 {
            table.add_peer(peer(&format!("p{}", i), i)).await;
        }
        assert_eq!(table.len().await, 3);

        let ids: HashSet<String> = table.list_peers().await.into_iter().map(|p| p.id).collect();
        assert_eq!(ids, ["p7", "p8", "p9"].iter().map(|s| s.to_string()).collect());
    }

    #[tokio::test]
    async fn test_evicts_least_recently_seen() {
        let table = PeerTable::new("self", 2, 2);
        table.add_peer(peer("a", 100)).await;
        table.add_peer(peer("b", 50)).await;

        let evicted = table.add_peer(peer("c", 200)).await.unwrap();
        assert_eq!(evicted.id, "b");
        assert!(table.get("a").await.is_some());
        assert!(table.get("c").await.is_some());
    }

    #[tokio::test]
    async fn test_refresh_does_not_evict() {
        let table = PeerTable::new("self", 2, 2);
        table.add_peer(peer("a", 1)).await;
        table.add_peer(peer("b", 2)).await;

        let evicted = table.add_peer(peer("a", 10)).await;
        assert!(evicted.is_none());
        assert_eq!(table.len().await, 2);
        assert_eq!(table.get("a").await.unwrap().last_seen, 10);
    }

    #[tokio::test]
    async fn test_self_never_added() {
        let table = PeerTable::new("self", 2, 2);
        table.add_peer(peer("self", 1)).await;
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn test_holder_set_bounded() {
        let table = PeerTable::new("self", 10, 3);
        for i in 0..8 {
            table.register_holder("sha256-x", &format!("h{}", i)).await;
        }
        let holders = table.holders_of("sha256-x").await;
        assert_eq!(holders, vec!["h7", "h6", "h5"]);
    }

    #[tokio::test]
    async fn test_reconfirmed_holder_moves_to_front() {
        let table = PeerTable::new("self", 10, 3);
        table.register_holder("c", "h1").await;
        table.register_holder("c", "h2").await;
        table.register_holder("c", "h3").await;
        table.register_holder("c", "h1").await;
        table.register_holder("c", "h4").await;

        assert_eq!(table.holders_of("c").await, vec!["h4", "h1", "h3"]);
    }

    #[tokio::test]
    async fn test_eviction_purges_holders() {
        let table = PeerTable::new("self", 1, 3);
        table.add_peer(peer("old", 1)).await;
        table.register_holder("c", "old").await;
        table.register_holder("c", "self").await;

        table.add_peer(peer("new", 2)).await;
        assert_eq!(table.holders_of("c").await, vec!["self"]);
    }

    #[tokio::test]
    async fn test_holder_index_forgets_stalest_content() {
        let table = PeerTable::new("self", 10, 3).with_max_indexed(2);
        table.register_holder("c1", "h").await;
        table.register_holder("c2", "h").await;
        // touching c1 again leaves c2 as the stalest
        table.register_holder("c1", "h2").await;
        table.register_holder("c3", "h").await;

        assert_eq!(table.holders_of("c1").await, vec!["h2", "h"]);
        assert!(table.holders_of("c2").await.is_empty());
        assert_eq!(table.holders_of("c3").await, vec!["h"]);
    }

    #[tokio::test]
    async fn test_unknown_holder_not_recorded() {
        let table = PeerTable::new("self", 10, 3);
        table.add_peer(peer("a", 1)).await;

        assert!(!table.register_known_holder("c", "stranger").await);
        assert!(table.register_known_holder("c", "a").await);
        assert_eq!(table.holders_of("c").await, vec!["a"]);
    }

    #[tokio::test]
    async fn test_forget_holder() {
        let table = PeerTable::new("self", 10, 3);
        table.register_holder("c", "a").await;
        table.register_holder("c", "b").await;

        table.forget_holder("c", "b").await;
        assert_eq!(table.holders_of("c").await, vec!["a"]);
        table.forget_holder("c", "a").await;
        assert!(table.holders_of("c").await.is_empty());
    }

    #[tokio::test]
    async fn test_holder_peers_skip_self_and_excluded() {
        let table = PeerTable::new("self", 10, 5);
        table.add_peer(peer("a", 1)).await;
        table.add_peer(peer("b", 2)).await;
        table.register_holder("c", "self").await;
        table.register_holder("c", "a").await;
        table.register_holder("c", "b").await;
        table.register_holder("c", "unknown").await;

        let exclude: HashSet<String> = ["b".to_string()].into_iter().collect();
        let peers = table.holder_peers("c", &exclude).await;
        assert_eq!(peers.len(), 1);
        assert_eq!(peers[0].id, "a");
    }

    #[tokio::test]
    async fn test_select_peers_respects_limit_and_exclusions() {
        let table = PeerTable::new("self", 10, 5);
        for i in 0..6 {
            table.add_peer(peer(&format!("p{}", i), i)).await;
        }
        let exclude: HashSet<String> = ["p0".to_string(), "p1".to_string()].into_iter().collect();

        let picked = table.select_peers(&exclude, 3).await;
        assert_eq!(picked.len(), 3);
        assert!(picked.iter().all(|p| !exclude.contains(&p.id)));

        let all = table.select_peers(&exclude, 10).await;
        assert_eq!(all.len(), 4);
    }
}
