//! Bootstrap - join the mesh through a list of known addresses
//!
//! Each address is dialed in its own task. A dead address never blocks or
//! fails the others; failures are logged and reported, never raised.

use std::sync::Arc;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{info, warn};

use crate::node::Node;
use crate::peers::PeerMeta;

/// Outcome of one bootstrap round
#[derive(Debug, Default, Clone)]
pub struct JoinReport {
    pub joined: Vec<PeerMeta>,
    /// `(address, reason)` for every address that could not be joined
    pub failed: Vec<(String, String)>,
}

/// Dial every address concurrently and wait for all of them
pub async fn join(node: Arc<Node>, addrs: Vec<String>) -> JoinReport {
    let mut tasks = JoinSet::new();
    for addr in addrs {
        let node = Arc::clone(&node);
        tasks.spawn(async move {
            let result = node.add_peer(&addr).await;
            (addr, result)
        });
    }

    let mut report = JoinReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((addr, Ok(peer))) => {
                info!(addr = %addr, peer = %peer.id, "Joined bootstrap peer");
                report.joined.push(peer);
            }
            Ok((addr, Err(e))) => {
                warn!(addr = %addr, error = %e, "Bootstrap peer unavailable");
                report.failed.push((addr, e.to_string()));
            }
            Err(e) => warn!(error = %e, "Bootstrap task aborted"),
        }
    }

    info!(
        joined = report.joined.len(),
        failed = report.failed.len(),
        "Bootstrap finished"
    );
    report
}

/// Background bootstrap started alongside the server
pub struct BootstrapHandle {
    handle: JoinHandle<JoinReport>,
}

impl BootstrapHandle {
    pub fn abort(&self) {
        self.handle.abort();
    }

    /// Wait for the round to finish; an aborted round reports nothing
    pub async fn wait(self) -> JoinReport {
        self.handle.await.unwrap_or_default()
    }
}

pub fn spawn(node: Arc<Node>, addrs: Vec<String>) -> BootstrapHandle {
    BootstrapHandle {
        handle: tokio::spawn(join(node, addrs)),
    }
}
