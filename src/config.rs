//! Cluster client configuration.
//!
//! Seed addresses are a comma-separated `host:port` list, the same format
//! nodes themselves report back in `CLUSTER NODES`/`CLUSTER SLOTS` replies.
//! A `redis+cluster://host[:port][,host[:port]…]` URL form is accepted as
//! sugar over the same address list.

use std::time::Duration;

use crate::error::{ClusterError, Result};

/// Default node port, used when a seed address omits one.
pub const DEFAULT_PORT: u16 = 6379;

/// Default cap on MOVED + ASK + reconnect round-trips for one command.
pub const DEFAULT_MAX_REDIRECT_COUNT: usize = 5;

/// Minimal bitset for the `flags` surface named in the external interface.
///
/// Only one bit is defined today: whether the context blocks the calling
/// thread (sync) or hands control back to a caller-driven event loop
/// (async). Kept as a bitset rather than a bool so additional flags can be
/// added without breaking the constructor signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterFlags(u32);

impl ClusterFlags {
    /// Context runs in blocking mode: each command blocks the calling thread.
    pub const BLOCK: ClusterFlags = ClusterFlags(1 << 0);

    pub const fn empty() -> Self {
        ClusterFlags(0)
    }

    pub const fn contains(self, other: ClusterFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for ClusterFlags {
    type Output = ClusterFlags;
    fn bitor(self, rhs: ClusterFlags) -> ClusterFlags {
        ClusterFlags(self.0 | rhs.0)
    }
}

impl Default for ClusterFlags {
    fn default() -> Self {
        ClusterFlags::BLOCK
    }
}

/// Full cluster client configuration.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Seed node addresses, tried in order when connecting or refreshing
    /// topology with no better candidate available.
    pub addrs: Vec<(String, u16)>,
    /// Timeout for establishing a new node connection. `None` blocks
    /// indefinitely.
    pub connect_timeout: Option<Duration>,
    /// Timeout for a single blocking read of a reply. `None` blocks
    /// indefinitely.
    pub read_timeout: Option<Duration>,
    /// Cap on MOVED + ASK + reconnect round-trips for one command.
    pub max_redirect_count: usize,
    /// Sync/async mode bit and any future context flags.
    pub flags: ClusterFlags,
    /// Maximum read buffer size per connection in bytes, before a reply
    /// that hasn't terminated yet is treated as `OutOfMemory`.
    pub max_buffer_size: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            addrs: Vec::new(),
            connect_timeout: Some(Duration::from_secs(5)),
            read_timeout: Some(Duration::from_secs(30)),
            max_redirect_count: DEFAULT_MAX_REDIRECT_COUNT,
            flags: ClusterFlags::default(),
            max_buffer_size: crate::connection::tcp::DEFAULT_MAX_BUF_SIZE,
        }
    }
}

impl ClusterConfig {
    /// Build a config from a comma-separated seed list, e.g.
    /// `"10.0.0.1:6379,10.0.0.2:6379"`.
    pub fn from_addrs(addrs: &str) -> Result<Self> {
        let mut config = Self::default();
        config.addrs = parse_addr_list(addrs)?;
        Ok(config)
    }

    /// Build a config from a `redis+cluster://host[:port][,host[:port]…]`
    /// URL. Accepted as ergonomic sugar; authentication and TLS segments in
    /// the URL are rejected rather than silently ignored.
    pub fn from_url(url: &str) -> Result<Self> {
        let rest = url
            .strip_prefix("redis+cluster://")
            .ok_or_else(|| ClusterError::Protocol(format!("unsupported URL scheme: {url}")))?;

        if rest.contains('@') {
            return Err(ClusterError::Protocol(
                "redis+cluster:// URLs do not support embedded credentials".into(),
            ));
        }
        let hosts = rest.split('/').next().unwrap_or(rest);
        Self::from_addrs(hosts)
    }

    /// Override the connect timeout (builder style).
    pub fn with_connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Override the read timeout (builder style).
    pub fn with_read_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Override the redirect budget (builder style). `n` must be >= 1.
    pub fn with_max_redirect_count(mut self, n: usize) -> Result<Self> {
        if n < 1 {
            return Err(ClusterError::Protocol(
                "max_redirect_count must be at least 1".into(),
            ));
        }
        self.max_redirect_count = n;
        Ok(self)
    }

    /// Override the context mode flags (builder style).
    pub fn with_flags(mut self, flags: ClusterFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Whether this config describes a blocking (sync) context.
    pub fn is_blocking(&self) -> bool {
        self.flags.contains(ClusterFlags::BLOCK)
    }
}

/// Parse a comma-separated `host:port` list into seed addresses.
fn parse_addr_list(addrs: &str) -> Result<Vec<(String, u16)>> {
    let mut out = Vec::new();
    for addr in addrs.split(',') {
        let addr = addr.trim();
        if addr.is_empty() {
            continue;
        }
        out.push(parse_host_port(addr)?);
    }
    if out.is_empty() {
        return Err(ClusterError::BadAddress(addrs.to_string()));
    }
    Ok(out)
}

/// Parse `host:port` or `[ipv6]:port` into a `(host, port)` pair.
pub fn parse_host_port(s: &str) -> Result<(String, u16)> {
    if let Some(rest) = s.strip_prefix('[') {
        let close = rest
            .find(']')
            .ok_or_else(|| ClusterError::BadAddress(s.to_string()))?;
        let host = rest[..close].to_string();
        let after = &rest[close + 1..];
        let port = after
            .strip_prefix(':')
            .ok_or_else(|| ClusterError::BadAddress(s.to_string()))?
            .parse::<u16>()
            .map_err(|_| ClusterError::BadAddress(s.to_string()))?;
        return Ok((host, port));
    }

    let (host, port_str) = s
        .rsplit_once(':')
        .ok_or_else(|| ClusterError::BadAddress(s.to_string()))?;
    if host.is_empty() || host.contains(':') {
        return Err(ClusterError::BadAddress(s.to_string()));
    }
    let port = port_str
        .parse::<u16>()
        .map_err(|_| ClusterError::BadAddress(s.to_string()))?;
    Ok((host.to_string(), port))
}

// ── Tests ──────────────────────────────────────────────────────────
