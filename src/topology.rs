//! Topology discovery and refresh.
//!
//! Both `CLUSTER NODES` (text, required) and `CLUSTER SLOTS` (structured,
//! optional) replies are parsed into the same `Vec<SlotRange>` shape the
//! routing table consumes. A refresh connects to each candidate node in
//! turn until one answers; the first reply that parses cleanly and is
//! internally consistent becomes the new table via an atomic swap.

use std::sync::Arc;

use log::{debug, warn};

use crate::connection::tcp::NodeConnection;
use crate::error::{ClusterError, Result};
use crate::registry::{ConnMode, NodeRegistry};
use crate::resp::types::RespValue;
use crate::routing::{RoutingTable, SlotRange};

/// Parse a `CLUSTER SLOTS` reply: `[[start, end, [ip, port, id, ...], replica...], ...]`.
pub fn parse_cluster_slots(resp: &RespValue) -> Result<Vec<SlotRange>> {
    let entries = match resp {
        RespValue::Array(items) => items,
        other => {
            return Err(ClusterError::Protocol(format!(
                "CLUSTER SLOTS: expected array, got {:?}",
                other.type_name()
            )));
        }
    };

    let mut ranges = Vec::with_capacity(entries.len());
    for entry in entries {
        let RespValue::Array(items) = entry else {
            continue;
        };
        if items.len() < 3 {
            continue;
        }
        let start = items[0]
            .as_int()
            .ok_or_else(|| ClusterError::Protocol("CLUSTER SLOTS: invalid slot start".into()))?
            as u16;
        let end = items[1]
            .as_int()
            .ok_or_else(|| ClusterError::Protocol("CLUSTER SLOTS: invalid slot end".into()))?
            as u16;
        if start > end {
            return Err(ClusterError::InconsistentTopology(format!(
                "CLUSTER SLOTS: slot range start {start} > end {end}"
            )));
        }
        let master = parse_node_addr(&items[2])?;
        ranges.push(SlotRange {
            start,
            end,
            node_addr: Arc::from(master),
        });
    }
    Ok(ranges)
}

fn parse_node_addr(val: &RespValue) -> Result<String> {
    let RespValue::Array(items) = val else {
        return Err(ClusterError::Protocol(
            "CLUSTER SLOTS: expected node array".into(),
        ));
    };
    if items.len() < 2 {
        return Err(ClusterError::Protocol(
            "CLUSTER SLOTS: node array too short".into(),
        ));
    }
    let host = items[0]
        .as_str()
        .ok_or_else(|| ClusterError::Protocol("CLUSTER SLOTS: invalid host".into()))?;
    let port = items[1]
        .as_int()
        .ok_or_else(|| ClusterError::Protocol("CLUSTER SLOTS: invalid port".into()))?;
    Ok(format!("{host}:{port}"))
}

/// One line of a `CLUSTER NODES` reply, after field splitting.
struct NodeLine {
    addr: String,
    is_myself: bool,
    is_master: bool,
    slots: Vec<SlotRange>,
}

/// Parse a `CLUSTER NODES` text reply. Non-master lines (replicas, lines
/// without slot tokens) contribute no ranges but are still returned so the
/// caller can discover every node, including ones with an empty slot set.
fn parse_cluster_nodes(text: &str) -> Result<Vec<NodeLine>> {
    let mut lines = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(' ').collect();
        if fields.len() < 8 {
            continue;
        }
        // fields: id, ip:port[@cport], flags, master-id, ping-sent,
        // pong-recv, config-epoch, link-state, [slot...]
        let addr = fields[1].split('@').next().unwrap_or(fields[1]).to_string();
        let flags: Vec<&str> = fields[2].split(',').collect();
        let is_myself = flags.contains(&"myself");
        let is_master = flags.contains(&"master");

        let mut slots = Vec::new();
        for token in &fields[8..] {
            if token.starts_with('[') {
                // Slot migration marker ([123-><-...] / [123->-...]), not a
                // plain ownership range — skip it.
                continue;
            }
            let (start, end) = match token.split_once('-') {
                Some((s, e)) => (s.parse::<u16>(), e.parse::<u16>()),
                None => (token.parse::<u16>(), token.parse::<u16>()),
            };
            let (Ok(start), Ok(end)) = (start, end) else {
                continue;
            };
            if start > end {
                return Err(ClusterError::InconsistentTopology(format!(
                    "CLUSTER NODES: slot token {token} has start > end"
                )));
            }
            slots.push(SlotRange {
                start,
                end,
                node_addr: Arc::from(addr.as_str()),
            });
        }

        lines.push(NodeLine {
            addr,
            is_myself,
            is_master,
            slots,
        });
    }
    Ok(lines)
}

/// Outcome of a successful refresh: fresh routing table plus the full set
/// of node addresses it references, for reconciling the registry.
pub struct RefreshResult {
    pub table: RoutingTable,
    pub addrs: Vec<Arc<str>>,
}

/// Refresh topology by trying each candidate in order. Connects, issues
/// `CLUSTER NODES` first (required support), falling back to `CLUSTER
/// SLOTS` on the same connection if that command itself errors. The first
/// candidate that yields a consistent table wins; if all candidates fail,
/// the last error is surfaced and the caller's existing table is left
/// alone (this function never touches shared state itself).
pub async fn refresh(
    registry: &NodeRegistry,
    candidates: &[Arc<str>],
) -> Result<RefreshResult> {
    let mut last_err = None;
    for addr in candidates {
        match refresh_from(registry, addr).await {
            Ok(result) => return Ok(result),
            Err(e) => {
                warn!("topology refresh via {addr} failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or(ClusterError::TopologyStale))
}

async fn refresh_from(registry: &NodeRegistry, addr: &str) -> Result<RefreshResult> {
    let node = registry.add(addr)?;
    let mut conn = open_transient(registry, addr).await?;

    let (ranges, myself_addr) = match conn.execute_str(&["CLUSTER", "NODES"]).await {
        Ok(RespValue::BulkString(body)) => {
            let text = std::str::from_utf8(&body)
                .map_err(|e| ClusterError::Protocol(format!("CLUSTER NODES: {e}")))?;
            let lines = parse_cluster_nodes(text)?;
            let myself = lines.iter().find(|l| l.is_myself).map(|l| l.addr.clone());
            let ranges: Vec<SlotRange> = lines
                .into_iter()
                .filter(|l| l.is_master)
                .flat_map(|l| l.slots)
                .collect();
            (ranges, myself)
        }
        Ok(other) => {
            return Err(ClusterError::Protocol(format!(
                "CLUSTER NODES: unexpected reply {:?}",
                other.type_name()
            )));
        }
        Err(_) => {
            debug!("CLUSTER NODES unsupported by {addr}, falling back to CLUSTER SLOTS");
            let resp = conn.execute_str(&["CLUSTER", "SLOTS"]).await?;
            (parse_cluster_slots(&resp)?, None)
        }
    };

    let table = RoutingTable::from_ranges(ranges)?;
    let mut addrs: Vec<Arc<str>> = Vec::new();
    for slot in 0u32..crate::crc16::SLOT_COUNT as u32 {
        if let Some(owner) = table.node_for_slot(slot as u16) {
            if !addrs.iter().any(|a| &**a == owner) {
                addrs.push(Arc::from(owner));
            }
        }
    }
    if !addrs.iter().any(|a| &**a == addr) {
        addrs.push(Arc::from(addr));
    }

    if myself_addr.as_deref() == Some(addr) {
        node.adopt_connection(ConnMode::Sync, conn).await;
    }

    Ok(RefreshResult { table, addrs })
}

async fn open_transient(registry: &NodeRegistry, addr: &str) -> Result<NodeConnection> {
    let _ = registry; // kept for symmetry with connection timeouts configured on the registry
    NodeConnection::connect(addr).await
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cluster_nodes_basic() {
        let text = "\
07c3... 127.0.0.1:7000@17000 myself,master - 0 0 1 connected 0-8191\n\
a1b2... 127.0.0.1:7001@17001 master - 0 0 2 connected 8192-16383\n\
c3d4... 127.0.0.1:7002@17002 slave a1b2... 0 0 2 connected\n";
        let lines = parse_cluster_nodes(text).unwrap();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].is_myself);
        assert!(lines[0].is_master);
        assert_eq!(lines[0].slots.len(), 1);
        assert_eq!(lines[0].slots[0].start, 0);
        assert_eq!(lines[0].slots[0].end, 8191);
        assert!(!lines[2].is_master);
        assert!(lines[2].slots.is_empty());
    }

    #[test]
    fn parse_cluster_nodes_multiple_slot_tokens() {
        let text = "id1 10.0.0.1:7000@17000 master - 0 0 1 connected 0-100 200 300-400\n";
        let lines = parse_cluster_nodes(text).unwrap();
        assert_eq!(lines[0].slots.len(), 3);
        assert_eq!(lines[0].slots[1].start, 200);
        assert_eq!(lines[0].slots[1].end, 200);
    }

    #[test]
    fn parse_cluster_nodes_skips_migration_markers() {
        let text = "id1 10.0.0.1:7000@17000 master - 0 0 1 connected 0-100 [200-<-abcd]\n";
        let lines = parse_cluster_nodes(text).unwrap();
        assert_eq!(lines[0].slots.len(), 1);
    }

    #[test]
    fn parse_cluster_slots_basic() {
        let resp = RespValue::Array(vec![RespValue::Array(vec![
            RespValue::Integer(0),
            RespValue::Integer(8191),
            RespValue::Array(vec![
                RespValue::BulkString(bytes::Bytes::from_static(b"127.0.0.1")),
                RespValue::Integer(7000),
            ]),
        ])]);
        let ranges = parse_cluster_slots(&resp).unwrap();
        assert_eq!(ranges.len(), 1);
        assert_eq!(&*ranges[0].node_addr, "127.0.0.1:7000");
    }

    #[test]
    fn parse_cluster_slots_rejects_inverted_range() {
        let resp = RespValue::Array(vec![RespValue::Array(vec![
            RespValue::Integer(100),
            RespValue::Integer(50),
            RespValue::Array(vec![
                RespValue::BulkString(bytes::Bytes::from_static(b"127.0.0.1")),
                RespValue::Integer(7000),
            ]),
        ])]);
        assert!(parse_cluster_slots(&resp).is_err());
    }
}
