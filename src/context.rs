//! The public context façade: `ClusterContext` (blocking) and
//! `AsyncClusterContext` (cooperative), sharing one routing/fragmentation/
//! dispatch core per `runtime`'s block-on bridge.

use std::time::Duration;

use bytes::Bytes;
use log::debug;
use parking_lot::{Mutex, RwLock};

use crate::async_ctx;
use crate::command::{self, ParsedCommand};
use crate::config::ClusterConfig;
use crate::dispatch;
use crate::error::{ClusterError, Result};
use crate::fragment::{fragment_command, FragmentResult};
use crate::pipeline::PipelineQueue;
use crate::reassemble::reassemble;
use crate::registry::{ConnMode, NodeRegistry};
use crate::resp::types::RespValue;
use crate::routing::RoutingTable;
use crate::runtime;

pub use crate::async_ctx::AsyncClusterContext;

/// A blocking cluster client. Every call blocks the calling thread on the
/// shared tokio runtime; the context itself is `Send` but not meant to be
/// driven from more than one thread of control at a time (matches "owned by
/// a single thread" in the external interface).
pub struct ClusterContext {
    registry: NodeRegistry,
    table: RwLock<RoutingTable>,
    config: Mutex<ClusterConfig>,
    pipeline: Mutex<PipelineQueue>,
    last_error: Mutex<Option<ClusterError>>,
}

impl ClusterContext {
    /// Connect to the cluster via `addrs` (comma-separated `host:port`
    /// seeds), performing an initial topology discovery before returning.
    pub fn connect(addrs: &str) -> Result<Self> {
        Self::connect_with_config(ClusterConfig::from_addrs(addrs)?)
    }

    /// Like `connect`, but bounding the connect timeout applied to every
    /// node connection (including the initial discovery probe).
    pub fn connect_with_timeout(addrs: &str, timeout: Duration) -> Result<Self> {
        let config = ClusterConfig::from_addrs(addrs)?.with_connect_timeout(Some(timeout));
        Self::connect_with_config(config)
    }

    /// Construct a context without performing the initial topology
    /// discovery — the first command pays that cost instead. Useful when
    /// seeds may not all be up yet at construction time.
    pub fn connect_nonblock(addrs: &str) -> Result<Self> {
        let config = ClusterConfig::from_addrs(addrs)?;
        Ok(Self::new(config))
    }

    fn connect_with_config(config: ClusterConfig) -> Result<Self> {
        let ctx = Self::new(config);
        let bootstrap_config = ctx.config.lock().clone();
        runtime::block_on(dispatch::refresh_topology(
            &ctx.registry,
            &ctx.table,
            &bootstrap_config,
        ))?;
        Ok(ctx)
    }

    fn new(config: ClusterConfig) -> Self {
        Self {
            registry: NodeRegistry::new(config.clone()),
            table: RwLock::new(RoutingTable::empty()),
            config: Mutex::new(config),
            pipeline: Mutex::new(PipelineQueue::new()),
            last_error: Mutex::new(None),
        }
    }

    /// Issue one command synchronously, returning its fully reassembled
    /// reply.
    pub fn command(&self, args: &[&str]) -> Result<RespValue> {
        let byte_args = args.iter().map(|a| Bytes::from(a.as_bytes().to_vec())).collect();
        let parsed = command::classify(byte_args);
        let result = match parsed {
            Ok(parsed) => runtime::block_on(self.dispatch_parsed(&parsed)),
            Err(e) => Err(e),
        };
        self.record(result)
    }

    async fn dispatch_parsed(&self, parsed: &ParsedCommand) -> Result<RespValue> {
        let config = self.config.lock().clone();
        match fragment_command(parsed) {
            FragmentResult::Single { slot } => {
                dispatch::dispatch(&self.registry, &self.table, &config, slot, parsed).await
            }
            FragmentResult::Fragmented(fragments) => {
                let total_keys = parsed.key_positions.len();
                let mut replies = Vec::with_capacity(fragments.len());
                for fragment in &fragments {
                    let reply = dispatch::dispatch(
                        &self.registry,
                        &self.table,
                        &config,
                        fragment.slot,
                        &fragment.command,
                    )
                    .await?;
                    replies.push(reply);
                }
                reassemble(parsed.kind, &fragments, total_keys, replies)
            }
        }
    }

    /// Append one command to the pipeline: route and send without waiting
    /// for a reply.
    pub fn append_command(&self, args: &[&str]) -> Result<()> {
        let raw = Bytes::from(crate::resp::writer::encode_command_str(args));
        let result = runtime::block_on(
            self.pipeline
                .lock()
                .append_command(&self.registry, &self.table, &raw),
        );
        self.record(result)
    }

    /// Pop and resolve the oldest pending pipeline entry.
    pub fn get_reply(&self) -> Result<RespValue> {
        let result = runtime::block_on(self.pipeline.lock().get_reply(&self.registry));
        self.record(result)
    }

    /// Number of pipeline entries appended but not yet read.
    pub fn pipeline_pending(&self) -> usize {
        self.pipeline.lock().pending()
    }

    /// Override the per-command redirect/reconnect budget.
    pub fn set_max_redirect(&self, n: usize) -> Result<()> {
        let mut config = self.config.lock();
        *config = config.clone().with_max_redirect_count(n)?;
        Ok(())
    }

    /// Drop all buffered I/O state: clears the pipeline and forces every
    /// cached connection to reconnect on next use. The routing table is
    /// left intact since it reflects discovered cluster state, not
    /// per-connection buffering.
    pub fn reset(&self) {
        self.pipeline.lock().reset();
        runtime::block_on(async {
            for node in self.registry.iter() {
                node.mark_errored(ConnMode::Sync).await;
                node.mark_errored(ConnMode::Async).await;
            }
        });
        *self.last_error.lock() = None;
    }

    /// The error from the most recent operation, if any. Cleared on the
    /// next successful call.
    pub fn err(&self) -> Option<ClusterError> {
        self.last_error.lock().take()
    }

    /// `errstr` equivalent: a bounded-length message for the last error.
    pub fn errstr(&self) -> Option<String> {
        self.last_error.lock().as_ref().map(|e| {
            let s = e.to_string();
            if s.len() > 128 {
                s[..128].to_string()
            } else {
                s
            }
        })
    }

    /// Promote this context to an async façade sharing the same registry
    /// and routing table discovered so far. The sync context keeps working
    /// independently afterward — the two share no further state.
    pub fn into_async(self) -> AsyncClusterContext {
        AsyncClusterContext::new(self.registry, self.table.into_inner())
    }

    fn record<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(v) => {
                *self.last_error.lock() = None;
                Ok(v)
            }
            Err(e) => {
                debug!("command failed: {e}");
                let stored = match &e {
                    ClusterError::Io(io_err) => ClusterError::Io(std::io::Error::new(
                        io_err.kind(),
                        io_err.to_string(),
                    )),
                    other => clone_error(other),
                };
                *self.last_error.lock() = Some(stored);
                Err(e)
            }
        }
    }
}

/// `ClusterError` doesn't derive `Clone` (its `Io` variant wraps
/// `std::io::Error`, which isn't `Clone`), so `record` rebuilds an
/// equivalent value from its `Display` text for the `err`/`errstr` surface.
fn clone_error(e: &ClusterError) -> ClusterError {
    ClusterError::Protocol(e.to_string())
}

/// Connect an async façade to the cluster via `addrs`, performing the same
/// initial topology discovery as `ClusterContext::connect`.
pub async fn async_connect(addrs: &str) -> Result<AsyncClusterContext> {
    let config = ClusterConfig::from_addrs(addrs)?;
    let registry = NodeRegistry::new(config.clone());
    let table = RwLock::new(RoutingTable::empty());
    dispatch::refresh_topology(&registry, &table, &config).await?;
    Ok(async_ctx::AsyncClusterContext::new(registry, table.into_inner()))
}

// ── Tests ──────────────────────────────────────────────────────────
