//! The synchronous dispatcher: routes one command to a node, follows
//! MOVED/ASK redirection, and reconnects around a dead node, all within a
//! bounded number of round trips.
//!
//! Reconnect attempts and MOVED/ASK redirects are tracked as two separate
//! budgets rather than one shared counter (see `DESIGN.md`, Open Question
//! 1): a node that keeps dropping the connection shouldn't burn through the
//! same budget a genuinely moving slot needs to settle into its new owner.
//! The reconnect budget is set to twice the redirect budget.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use parking_lot::RwLock;

use crate::command::ParsedCommand;
use crate::config::ClusterConfig;
use crate::error::{ClusterError, RedisErrorKind, Result};
use crate::registry::{ConnMode, NodeRegistry};
use crate::resp::types::RespValue;
use crate::routing::RoutingTable;
use crate::topology;

/// Candidate seed addresses to try when the routing table has no entry for
/// a slot yet, or every known node is unreachable: known nodes first (more
/// likely to still be up), then the original configured seeds.
fn candidate_addrs(registry: &NodeRegistry, config: &ClusterConfig) -> Vec<Arc<str>> {
    let mut addrs: Vec<Arc<str>> = registry.iter().into_iter().map(|n| n.addr.clone()).collect();
    for (host, port) in &config.addrs {
        let addr: Arc<str> = Arc::from(format!("{host}:{port}"));
        if !addrs.iter().any(|a| a == &addr) {
            addrs.push(addr);
        }
    }
    addrs
}

/// Discover (or rediscover) cluster topology from whatever seeds or known
/// nodes are available, and swap the result into `table`. Used both by the
/// dispatcher's own MOVED-driven refresh and by `ClusterContext::connect`
/// for the initial bootstrap.
pub(crate) async fn refresh_topology(
    registry: &NodeRegistry,
    table: &RwLock<RoutingTable>,
    config: &ClusterConfig,
) -> Result<()> {
    let candidates = candidate_addrs(registry, config);
    let result = topology::refresh(registry, &candidates).await?;
    registry.reconcile(&result.addrs);
    *table.write() = result.table;
    debug!("topology refreshed, {} ranges known", table.read().range_count());
    Ok(())
}

/// Dispatch a single (already slot-resolved) command, following redirects
/// until it succeeds, a non-redirect error is returned, or a budget is
/// exhausted.
pub async fn dispatch(
    registry: &NodeRegistry,
    table: &RwLock<RoutingTable>,
    config: &ClusterConfig,
    slot: u16,
    command: &ParsedCommand,
) -> Result<RespValue> {
    let redirect_budget = config.max_redirect_count;
    let reconnect_budget = config.max_redirect_count * 2;
    let mut redirects = 0usize;
    let mut reconnects = 0usize;
    let bytes = command.to_bytes();

    let mut current_addr = match table.read().node_for_slot(slot) {
        Some(addr) => addr.to_string(),
        None => {
            refresh_topology(registry, table, config).await?;
            table
                .read()
                .node_for_slot(slot)
                .map(str::to_string)
                .ok_or(ClusterError::TopologyStale)?
        }
    };

    loop {
        let node = registry.add(&current_addr)?;
        let conn_result = registry.connection(&node, ConnMode::Sync).await;

        let mut conn = match conn_result {
            Ok(conn) => conn,
            Err(_) => {
                reconnects += 1;
                if reconnects > reconnect_budget {
                    return Err(ClusterError::TooManyRedirects);
                }
                let replacement = registry
                    .first_reachable()
                    .await
                    .ok_or_else(|| ClusterError::Unreachable(current_addr.clone()))?;
                current_addr = replacement.addr.to_string();
                redirects += 1;
                if redirects > redirect_budget {
                    return Err(ClusterError::TooManyRedirects);
                }
                continue;
            }
        };

        let reply = async {
            conn.send_raw(&bytes).await?;
            conn.read_response().await
        }
        .await;

        let reply = match reply {
            Ok(reply) => reply,
            Err(e) => {
                drop(conn);
                node.mark_errored(ConnMode::Sync).await;
                reconnects += 1;
                if reconnects > reconnect_budget {
                    return Err(e);
                }
                continue;
            }
        };

        let RespValue::Error(msg) = &reply else {
            return Ok(reply);
        };

        let (kind, message) = RedisErrorKind::from_error_msg(msg);
        match kind {
            RedisErrorKind::Moved { addr, .. } => {
                redirects += 1;
                if redirects > redirect_budget {
                    return Err(ClusterError::TooManyRedirects);
                }
                if let Err(e) = refresh_topology(registry, table, config).await {
                    warn!("refresh after MOVED failed: {e}");
                }
                current_addr = addr;
                continue;
            }
            RedisErrorKind::Ask { addr, .. } => {
                redirects += 1;
                if redirects > redirect_budget {
                    return Err(ClusterError::TooManyRedirects);
                }
                let ask_node = registry.add(&addr)?;
                let mut ask_conn = registry.connection(&ask_node, ConnMode::Sync).await?;
                ask_conn.execute_str(&["ASKING"]).await?;
                ask_conn.send_raw(&bytes).await?;
                return ask_conn.read_response().await;
            }
            RedisErrorKind::ClusterDown => return Err(ClusterError::ClusterDown(message)),
            RedisErrorKind::TryAgain => {
                redirects += 1;
                if redirects > redirect_budget {
                    return Err(ClusterError::TooManyRedirects);
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
                continue;
            }
            _ => return Err(ClusterError::Redis { kind, message }),
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::classify;
    use crate::routing::SlotRange;
    use bytes::Bytes;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    async fn mock_server(responses: Vec<Vec<u8>>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            for response in responses {
                let mut buf = vec![0u8; 4096];
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                socket.write_all(&response).await.unwrap();
            }
            socket.shutdown().await.ok();
        });
        addr
    }

    fn get_foo() -> ParsedCommand {
        classify(vec![Bytes::from_static(b"GET"), Bytes::from_static(b"foo")]).unwrap()
    }

    fn single_node_setup(addr: &str) -> (NodeRegistry, RwLock<RoutingTable>, ClusterConfig) {
        let config = ClusterConfig::from_addrs(addr).unwrap();
        let registry = NodeRegistry::new(config.clone());
        let table = RwLock::new(
            RoutingTable::from_ranges(vec![SlotRange {
                start: 0,
                end: 16383,
                node_addr: Arc::from(addr),
            }])
            .unwrap(),
        );
        (registry, table, config)
    }

    #[tokio::test]
    async fn plain_reply_returns_immediately() {
        let addr = mock_server(vec![b"$3\r\nbar\r\n".to_vec()]).await;
        let (registry, table, config) = single_node_setup(&addr);
        let command = get_foo();
        let reply = dispatch(&registry, &table, &config, 0, &command).await.unwrap();
        assert_eq!(reply, RespValue::BulkString(Bytes::from_static(b"bar")));
    }

    #[tokio::test]
    async fn ask_redirect_sends_asking_then_resends_on_new_node() {
        let ask_addr = mock_server(vec![b"+OK\r\n".to_vec(), b"$3\r\nbar\r\n".to_vec()]).await;
        let moved_reply = format!("-ASK 0 {ask_addr}\r\n").into_bytes();
        let origin_addr = mock_server(vec![moved_reply]).await;

        let (registry, table, config) = single_node_setup(&origin_addr);
        let command = get_foo();
        let reply = dispatch(&registry, &table, &config, 0, &command).await.unwrap();
        assert_eq!(reply, RespValue::BulkString(Bytes::from_static(b"bar")));
    }

    #[tokio::test]
    async fn retry_ceiling_gives_too_many_redirects() {
        // Every reply is MOVED pointing back at the same node, forever —
        // the redirect budget must still bound the loop.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let accept_addr = addr.clone();
        tokio::spawn(async move {
            // The dispatcher's own retry loop reconnects to the same
            // address on every MOVED, and a topology refresh fired in
            // parallel opens its own transient connection — accept every
            // incoming connection, not just the first, and answer every
            // request on it with the same MOVED reply.
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    break;
                };
                let moved = format!("-MOVED 0 {accept_addr}\r\n").into_bytes();
                tokio::spawn(async move {
                    loop {
                        let mut buf = vec![0u8; 4096];
                        let n = socket.read(&mut buf).await.unwrap_or(0);
                        if n == 0 {
                            break;
                        }
                        if socket.write_all(&moved).await.is_err() {
                            break;
                        }
                    }
                });
            }
        });

        let config = ClusterConfig::from_addrs(&addr)
            .unwrap()
            .with_max_redirect_count(3)
            .unwrap();
        let registry = NodeRegistry::new(config.clone());
        let table = RwLock::new(
            RoutingTable::from_ranges(vec![SlotRange {
                start: 0,
                end: 16383,
                node_addr: Arc::from(addr.as_str()),
            }])
            .unwrap(),
        );

        let command = get_foo();
        let result = dispatch(&registry, &table, &config, 0, &command).await;
        assert!(matches!(result, Err(ClusterError::TooManyRedirects)));
    }

    #[tokio::test]
    async fn non_redirect_error_surfaces_as_redis_error() {
        let addr = mock_server(vec![b"-WRONGTYPE Operation against wrong type\r\n".to_vec()]).await;
        let (registry, table, config) = single_node_setup(&addr);
        let command = get_foo();
        let result = dispatch(&registry, &table, &config, 0, &command).await;
        assert!(matches!(
            result,
            Err(ClusterError::Redis {
                kind: RedisErrorKind::WrongType,
                ..
            })
        ));
    }
}
