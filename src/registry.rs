//! Node registry: tracks every known node address and its cached
//! connections.
//!
//! Nodes are keyed by `host:port` and held behind `Arc` so the routing
//! table and in-flight dispatch calls can share a handle without owning the
//! registry entry outright — the arena-with-stable-keys pattern that avoids
//! a reference cycle between nodes and the table that points at them.

use std::collections::HashMap;
use std::sync::Arc;

use log::debug;
use parking_lot::RwLock;
use tokio::sync::Mutex as AsyncMutex;

use crate::config::{parse_host_port, ClusterConfig};
use crate::connection::tcp::NodeConnection;
use crate::error::{ClusterError, Result};

/// Which cached handle a dispatch call wants from a node: the blocking
/// context drives the blocking-mode handle through `runtime::block_on`, the
/// async façade drives the other directly. They are independent so a
/// blocking and an async context talking to the same node never contend on
/// one socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnMode {
    Sync,
    Async,
}

/// A known cluster node: an address plus its two lazily-initialized
/// connection slots.
pub struct Node {
    pub addr: Arc<str>,
    sync_conn: AsyncMutex<Option<NodeConnection>>,
    async_conn: AsyncMutex<Option<NodeConnection>>,
}

impl Node {
    fn new(addr: Arc<str>) -> Self {
        Self {
            addr,
            sync_conn: AsyncMutex::new(None),
            async_conn: AsyncMutex::new(None),
        }
    }

    fn slot(&self, mode: ConnMode) -> &AsyncMutex<Option<NodeConnection>> {
        match mode {
            ConnMode::Sync => &self.sync_conn,
            ConnMode::Async => &self.async_conn,
        }
    }

    /// Force the next `connection()` call for `mode` to reconnect. Used
    /// after a wire error: the connection's buffered state can no longer be
    /// trusted, so it's dropped rather than reused.
    pub async fn mark_errored(&self, mode: ConnMode) {
        *self.slot(mode).lock().await = None;
    }

    /// Whether `mode`'s connection slot is currently populated, without
    /// opening one. Used to detect a fresh connect for callback purposes.
    pub async fn is_connected(&self, mode: ConnMode) -> bool {
        self.slot(mode).lock().await.is_some()
    }

    /// Install an already-open connection as this node's cached handle for
    /// `mode`, without closing whatever was there before this call returns.
    /// Used by the topology updater to adopt the transient connection it
    /// used for discovery when a `CLUSTER NODES` line is flagged `myself`.
    pub async fn adopt_connection(&self, mode: ConnMode, conn: NodeConnection) {
        *self.slot(mode).lock().await = Some(conn);
    }
}

/// Registry of every node this context knows about.
pub struct NodeRegistry {
    nodes: RwLock<HashMap<Arc<str>, Arc<Node>>>,
    config: ClusterConfig,
}

impl NodeRegistry {
    pub fn new(config: ClusterConfig) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            config,
        }
    }

    /// Add a node by address, or return the existing entry if already
    /// present. Idempotent; rejects a malformed address with `BadAddress`.
    pub fn add(&self, addr: &str) -> Result<Arc<Node>> {
        parse_host_port(addr)?;
        if let Some(existing) = self.nodes.read().get(addr) {
            return Ok(Arc::clone(existing));
        }
        let addr: Arc<str> = Arc::from(addr);
        let mut nodes = self.nodes.write();
        let entry = nodes
            .entry(Arc::clone(&addr))
            .or_insert_with(|| Arc::new(Node::new(addr)));
        Ok(Arc::clone(entry))
    }

    pub fn lookup(&self, addr: &str) -> Option<Arc<Node>> {
        self.nodes.read().get(addr).cloned()
    }

    /// Snapshot of every known node, in registration order is not
    /// guaranteed — callers that need a stable probe order (the
    /// reachability ping) should sort or otherwise not depend on it.
    pub fn iter(&self) -> Vec<Arc<Node>> {
        self.nodes.read().values().cloned().collect()
    }

    pub fn remove(&self, addr: &str) {
        self.nodes.write().remove(addr);
    }

    /// Replace the registry's contents wholesale — used after a topology
    /// refresh discovers a fresh node set. Nodes present in both the old
    /// and new set keep their cached connections; only genuinely new nodes
    /// get fresh `Node` entries.
    pub fn reconcile(&self, addrs: &[Arc<str>]) {
        let mut nodes = self.nodes.write();
        nodes.retain(|addr, _| addrs.iter().any(|a| a == addr));
        for addr in addrs {
            nodes
                .entry(Arc::clone(addr))
                .or_insert_with(|| Arc::new(Node::new(Arc::clone(addr))));
        }
    }

    /// Get or lazily open the cached connection for `node` in `mode`,
    /// reconnecting if the cached handle was cleared (by `mark_errored` or
    /// because none was ever opened). Returns a guard so the caller can
    /// issue a request and read the reply while holding the node's lock for
    /// that mode.
    pub async fn connection<'a>(
        &self,
        node: &'a Node,
        mode: ConnMode,
    ) -> Result<tokio::sync::MappedMutexGuard<'a, NodeConnection>> {
        let mut guard = node.slot(mode).lock().await;
        if guard.is_none() {
            debug!("connecting to node {}", node.addr);
            let conn = match self.config.connect_timeout {
                Some(timeout) => {
                    NodeConnection::connect_timeout_with_max_buf(
                        &node.addr,
                        timeout,
                        self.config.max_buffer_size,
                    )
                    .await
                }
                None => {
                    NodeConnection::connect_with_max_buf(&node.addr, self.config.max_buffer_size)
                        .await
                }
            }
            .map_err(|_| ClusterError::BadNode(node.addr.to_string()))?;
            *guard = Some(conn);
        }
        Ok(tokio::sync::MutexGuard::map(guard, |c| c.as_mut().unwrap()))
    }

    /// Ping every known node in iteration order, returning the first one
    /// that answers. Used by the dispatcher when the currently-routed
    /// node's connection is unusable and a replacement must be found.
    pub async fn first_reachable(&self) -> Option<Arc<Node>> {
        for node in self.iter() {
            let Ok(mut conn) = self.connection(node.as_ref(), ConnMode::Sync).await else {
                continue;
            };
            if matches!(conn.ping().await, Ok(true)) {
                return Some(Arc::clone(&node));
            }
        }
        None
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> NodeRegistry {
        NodeRegistry::new(ClusterConfig::from_addrs("127.0.0.1:7000").unwrap())
    }

    #[test]
    fn add_is_idempotent() {
        let reg = registry();
        let a = reg.add("10.0.0.1:7000").unwrap();
        let b = reg.add("10.0.0.1:7000").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(reg.iter().len(), 1);
    }

    #[test]
    fn add_rejects_malformed_address() {
        let reg = registry();
        assert!(matches!(reg.add("not-an-address"), Err(ClusterError::BadAddress(_))));
    }

    #[test]
    fn lookup_missing_returns_none() {
        let reg = registry();
        assert!(reg.lookup("10.0.0.9:7000").is_none());
    }

    #[test]
    fn remove_drops_entry() {
        let reg = registry();
        reg.add("10.0.0.1:7000").unwrap();
        reg.remove("10.0.0.1:7000");
        assert!(reg.lookup("10.0.0.1:7000").is_none());
    }

    #[test]
    fn reconcile_keeps_surviving_nodes_and_drops_others() {
        let reg = registry();
        let kept = reg.add("10.0.0.1:7000").unwrap();
        reg.add("10.0.0.2:7000").unwrap();
        reg.reconcile(&[Arc::clone(&kept.addr), Arc::from("10.0.0.3:7000")]);
        assert!(reg.lookup("10.0.0.1:7000").is_some());
        assert!(reg.lookup("10.0.0.2:7000").is_none());
        assert!(reg.lookup("10.0.0.3:7000").is_some());
    }

    #[tokio::test]
    async fn connection_to_unreachable_node_is_bad_node() {
        let reg = registry();
        let node = reg.add("127.0.0.1:1").unwrap();
        let result = reg.connection(&node, ConnMode::Sync).await;
        assert!(matches!(result, Err(ClusterError::BadNode(_))));
    }
}
