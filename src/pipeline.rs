//! The pipeline queue: `append_command` routes and sends without waiting
//! for a reply; `get_reply` pops the oldest pending entry and reads
//! whatever its fragments need, in append order.
//!
//! Unlike the single-command dispatcher, a queued command does not follow
//! MOVED/ASK redirects automatically — a redirect error reply is simply
//! handed back to the caller as the reply for that slot. Only genuine wire
//! (I/O) failures abort the rest of the pending pipeline, per the
//! error-handling table's IO row: the affected connection is marked errored
//! so its next acquisition reconnects rather than resuming mid-stream.
//!
//! The queue itself only owns where each entry's replies are coming from —
//! it takes the registry and routing table as parameters on every call
//! rather than borrowing them for its own lifetime, so a `ClusterContext`
//! can hold a `PipelineQueue` alongside its registry and table as sibling
//! fields instead of a self-referential one.

use std::collections::VecDeque;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::RwLock;

use crate::command::{parse_request, CommandKind};
use crate::error::{ClusterError, Result};
use crate::fragment::{fragment_command, Fragment, FragmentResult};
use crate::reassemble::reassemble;
use crate::registry::{ConnMode, NodeRegistry};
use crate::resp::types::RespValue;
use crate::routing::RoutingTable;

enum QueuedCommand {
    Single {
        node_addr: Arc<str>,
    },
    Fragmented {
        kind: CommandKind,
        total_keys: usize,
        fragments: Vec<Fragment>,
        targets: Vec<Arc<str>>,
    },
}

/// FIFO queue of commands appended but not yet read back.
#[derive(Default)]
pub struct PipelineQueue {
    queue: VecDeque<QueuedCommand>,
}

impl PipelineQueue {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    /// Number of entries appended but not yet read.
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Clear buffered routing state without reading any pending replies —
    /// used by `reset()` on the owning context.
    pub fn reset(&mut self) {
        self.queue.clear();
    }

    /// Route, send, and enqueue `raw` (one RESP-encoded command). Returns
    /// before any reply is read.
    pub async fn append_command(
        &mut self,
        registry: &NodeRegistry,
        table: &RwLock<RoutingTable>,
        raw: &Bytes,
    ) -> Result<()> {
        let parsed = parse_request(raw)?;

        match fragment_command(&parsed) {
            FragmentResult::Single { slot } => {
                let addr = route_addr(table, slot)?;
                if let Err(e) = send_to(registry, &addr, &parsed.to_bytes()).await {
                    self.queue.clear();
                    return Err(e);
                }
                self.queue.push_back(QueuedCommand::Single { node_addr: addr });
            }
            FragmentResult::Fragmented(fragments) => {
                let mut targets = Vec::with_capacity(fragments.len());
                for fragment in &fragments {
                    let addr = route_addr(table, fragment.slot)?;
                    if let Err(e) = send_to(registry, &addr, &fragment.command.to_bytes()).await {
                        // Partial append failure: the fragments already sent
                        // are now orphaned in-flight commands on their
                        // connections. Mark every one of them errored so the
                        // next acquisition discards the dangling reply bytes
                        // instead of desyncing the stream, abort the rest of
                        // the pending queue, and surface a protocol error
                        // rather than leaving the caller with a half-sent
                        // command.
                        for sent_addr in &targets {
                            if let Some(node) = registry.lookup(sent_addr) {
                                node.mark_errored(ConnMode::Sync).await;
                            }
                        }
                        self.queue.clear();
                        return Err(ClusterError::Protocol(format!(
                            "pipeline append failed partway through a fragmented command: {e}"
                        )));
                    }
                    targets.push(addr);
                }
                self.queue.push_back(QueuedCommand::Fragmented {
                    kind: parsed.kind,
                    total_keys: parsed.key_positions.len(),
                    fragments,
                    targets,
                });
            }
        }
        Ok(())
    }

    /// Pop and resolve the oldest pending entry's reply.
    pub async fn get_reply(&mut self, registry: &NodeRegistry) -> Result<RespValue> {
        let entry = self
            .queue
            .pop_front()
            .ok_or_else(|| ClusterError::Protocol("no pending pipeline entry".into()))?;

        match entry {
            QueuedCommand::Single { node_addr } => read_from(registry, &node_addr).await,
            QueuedCommand::Fragmented {
                kind,
                total_keys,
                fragments,
                targets,
            } => {
                let mut replies = Vec::with_capacity(fragments.len());
                for addr in &targets {
                    match read_from(registry, addr).await {
                        Ok(reply) => replies.push(reply),
                        Err(e) => {
                            self.queue.clear();
                            return Err(e);
                        }
                    }
                }
                reassemble(kind, &fragments, total_keys, replies)
            }
        }
    }
}

fn route_addr(table: &RwLock<RoutingTable>, slot: u16) -> Result<Arc<str>> {
    table
        .read()
        .node_for_slot(slot)
        .map(Arc::from)
        .ok_or(ClusterError::TopologyStale)
}

async fn send_to(registry: &NodeRegistry, addr: &str, bytes: &[u8]) -> Result<()> {
    let node = registry.add(addr)?;
    let mut conn = registry.connection(&node, ConnMode::Sync).await?;
    if let Err(e) = conn.send_raw(bytes).await {
        drop(conn);
        node.mark_errored(ConnMode::Sync).await;
        return Err(e);
    }
    Ok(())
}

async fn read_from(registry: &NodeRegistry, addr: &str) -> Result<RespValue> {
    let node = registry
        .lookup(addr)
        .ok_or_else(|| ClusterError::BadNode(addr.to_string()))?;
    let mut conn = registry.connection(&node, ConnMode::Sync).await?;
    match conn.read_response().await {
        Ok(reply) => Ok(reply),
        Err(e) => {
            drop(conn);
            node.mark_errored(ConnMode::Sync).await;
            Err(e)
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
