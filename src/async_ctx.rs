//! The async façade: identical routing and fragmentation to the blocking
//! dispatcher, but a single attempt per command — no automatic MOVED/ASK
//! retry. A redirect error is handed to the caller just like any other
//! reply; following it (or not) is the caller's decision, since this
//! façade never drives its own event loop and can't assume it's safe to
//! block doing a topology refresh mid-callback.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::command::parse_request;
use crate::error::{ClusterError, Result};
use crate::fragment::{fragment_command, FragmentResult};
use crate::reassemble::reassemble;
use crate::registry::{ConnMode, NodeRegistry};
use crate::resp::types::RespValue;
use crate::routing::RoutingTable;
use crate::runtime;

type ConnectCallback = Box<dyn Fn(&str) + Send + Sync>;
type DisconnectCallback = Box<dyn Fn(&str, Option<&ClusterError>) + Send + Sync>;

/// Shared state behind the async context, cheap to clone into a spawned
/// task.
struct Shared {
    registry: NodeRegistry,
    table: RwLock<RoutingTable>,
    connect_cb: RwLock<Option<ConnectCallback>>,
    disconnect_cb: RwLock<Option<DisconnectCallback>>,
}

/// Callback-driven cluster context. Each `async_command` call performs one
/// routing decision and one round trip (or one per fragment), never a
/// retry loop.
#[derive(Clone)]
pub struct AsyncClusterContext {
    shared: Arc<Shared>,
}

impl AsyncClusterContext {
    pub fn new(registry: NodeRegistry, table: RoutingTable) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry,
                table: RwLock::new(table),
                connect_cb: RwLock::new(None),
                disconnect_cb: RwLock::new(None),
            }),
        }
    }

    /// Register a callback invoked whenever a new connection is opened.
    pub fn set_connect_callback(&self, cb: impl Fn(&str) + Send + Sync + 'static) {
        *self.shared.connect_cb.write() = Some(Box::new(cb));
    }

    /// Register a callback invoked whenever a connection is torn down,
    /// with the error that caused it (`None` for a caller-initiated
    /// disconnect).
    pub fn set_disconnect_callback(
        &self,
        cb: impl Fn(&str, Option<&ClusterError>) + Send + Sync + 'static,
    ) {
        *self.shared.disconnect_cb.write() = Some(Box::new(cb));
    }

    /// Issue one command, awaiting its single-attempt reply directly. This
    /// is the natural Rust shape of "register a callback for the next
    /// reply" — the await point *is* the registration.
    pub async fn command(&self, raw: Bytes) -> Result<RespValue> {
        dispatch_once(&self.shared, &raw).await
    }

    /// Issue one command and invoke `callback` on the shared runtime when
    /// its reply (or error) is ready, without blocking the caller. Mirrors
    /// the `async_command(ctx, callback, privdata, ...)` shape.
    pub fn command_with_callback<F>(&self, raw: Bytes, callback: F)
    where
        F: FnOnce(Result<RespValue>) + Send + 'static,
    {
        let shared = Arc::clone(&self.shared);
        runtime::spawn(async move {
            let result = dispatch_once(&shared, &raw).await;
            callback(result);
        });
    }

    /// Drop every cached connection without tearing down the routing
    /// table — the next command reconnects lazily. Named for parity with
    /// `async_disconnect`; Rust's `Drop` handles full teardown on scope
    /// exit, so this only needs to reset connection state, not free
    /// memory.
    pub fn disconnect(&self) {
        for node in self.shared.registry.iter() {
            let shared = Arc::clone(&self.shared);
            runtime::spawn(async move {
                node.mark_errored(ConnMode::Async).await;
                node.mark_errored(ConnMode::Sync).await;
                drop(shared);
            });
        }
    }
}

async fn dispatch_once(shared: &Shared, raw: &Bytes) -> Result<RespValue> {
    let parsed = parse_request(raw)?;

    match fragment_command(&parsed) {
        FragmentResult::Single { slot } => {
            let addr = shared
                .table
                .read()
                .node_for_slot(slot)
                .map(str::to_string)
                .ok_or(ClusterError::TopologyStale)?;
            send_once(shared, &addr, &parsed.to_bytes()).await
        }
        FragmentResult::Fragmented(fragments) => {
            let mut replies = Vec::with_capacity(fragments.len());
            for fragment in &fragments {
                let addr = shared
                    .table
                    .read()
                    .node_for_slot(fragment.slot)
                    .map(str::to_string)
                    .ok_or(ClusterError::TopologyStale)?;
                replies.push(send_once(shared, &addr, &fragment.command.to_bytes()).await?);
            }
            let total_keys = parsed.key_positions.len();
            reassemble(parsed.kind, &fragments, total_keys, replies)
        }
    }
}

async fn send_once(shared: &Shared, addr: &str, bytes: &[u8]) -> Result<RespValue> {
    let was_connected = match shared.registry.lookup(addr) {
        Some(node) => node.is_connected(ConnMode::Async).await,
        None => false,
    };
    let node = shared.registry.add(addr)?;
    let mut conn = shared.registry.connection(&node, ConnMode::Async).await?;
    if !was_connected {
        if let Some(cb) = shared.connect_cb.read().as_ref() {
            cb(addr);
        }
    }

    let result = async {
        conn.send_raw(bytes).await?;
        conn.read_response().await
    }
    .await;

    if let Err(e) = &result {
        drop(conn);
        node.mark_errored(ConnMode::Async).await;
        if let Some(cb) = shared.disconnect_cb.read().as_ref() {
            cb(addr, Some(e));
        }
    }
    result
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClusterConfig;

    #[tokio::test]
    async fn command_without_topology_is_stale() {
        let config = ClusterConfig::from_addrs("127.0.0.1:7000").unwrap();
        let ctx = AsyncClusterContext::new(NodeRegistry::new(config), RoutingTable::empty());
        let result = ctx.command(Bytes::from_static(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")).await;
        assert!(matches!(result, Err(ClusterError::TopologyStale)));
    }
}
