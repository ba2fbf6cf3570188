use std::fmt;
use std::io;

/// Structured classification of a server error string, used to drive the
/// MOVED/ASK/CLUSTERDOWN state machine without re-parsing message text at
/// every call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisErrorKind {
    /// Generic ERR
    Err,
    /// WRONGTYPE Operation against a key holding the wrong kind of value
    WrongType,
    /// MOVED slot host:port  (cluster)
    Moved { slot: u16, addr: String },
    /// ASK slot host:port  (cluster)
    Ask { slot: u16, addr: String },
    /// CLUSTERDOWN
    ClusterDown,
    /// LOADING Redis is loading the dataset in memory
    Loading,
    /// READONLY You can't write against a read only replica
    ReadOnly,
    /// TRYAGAIN
    TryAgain,
    /// Any other Redis error prefix
    Other(String),
}

impl RedisErrorKind {
    /// Parse from a Redis error message string (e.g. "WRONGTYPE Operation against…").
    pub fn from_error_msg(msg: &str) -> (Self, String) {
        // MOVED and ASK have structured formats
        if let Some(rest) = msg.strip_prefix("MOVED ") {
            if let Some((slot_str, addr)) = rest.split_once(' ') {
                if let Ok(slot) = slot_str.parse::<u16>() {
                    return (
                        Self::Moved {
                            slot,
                            addr: addr.to_string(),
                        },
                        msg.to_string(),
                    );
                }
            }
            return (Self::Other("MOVED".to_string()), msg.to_string());
        }
        if let Some(rest) = msg.strip_prefix("ASK ") {
            if let Some((slot_str, addr)) = rest.split_once(' ') {
                if let Ok(slot) = slot_str.parse::<u16>() {
                    return (
                        Self::Ask {
                            slot,
                            addr: addr.to_string(),
                        },
                        msg.to_string(),
                    );
                }
            }
            return (Self::Other("ASK".to_string()), msg.to_string());
        }

        let kind = if msg.starts_with("WRONGTYPE") {
            Self::WrongType
        } else if msg.starts_with("CLUSTERDOWN") {
            Self::ClusterDown
        } else if msg.starts_with("LOADING") {
            Self::Loading
        } else if msg.starts_with("READONLY") {
            Self::ReadOnly
        } else if msg.starts_with("TRYAGAIN") {
            Self::TryAgain
        } else if msg.starts_with("ERR") {
            Self::Err
        } else {
            // Extract first word as error kind
            let prefix = msg.split_whitespace().next().unwrap_or("UNKNOWN");
            Self::Other(prefix.to_string())
        };
        (kind, msg.to_string())
    }
}

/// All error kinds the cluster client can surface.
///
/// The first ten variants correspond to the client's published error
/// taxonomy (see the error handling design table). `Redis` wraps a
/// server-side error that isn't one of the cluster-protocol signals (e.g.
/// `WRONGTYPE`); `Timeout` covers the per-node connect/read deadline.
#[derive(Debug)]
pub enum ClusterError {
    /// Underlying socket failure.
    Io(io::Error),
    /// Reply or request malformed.
    Protocol(String),
    /// RESP parser needs more data — not a real error, used as control flow.
    Incomplete,
    /// Allocation failed (buffer would exceed its configured cap).
    OutOfMemory,
    /// Seed or discovered address could not be parsed as `host:port`.
    BadAddress(String),
    /// Node entry lacks a usable host/port.
    BadNode(String),
    /// No route for a slot, even after a refresh.
    TopologyStale,
    /// Two masters claim the same slot during a refresh.
    InconsistentTopology(String),
    /// No node in the registry answered `PING`.
    Unreachable(String),
    /// Retry budget exhausted across MOVED + ASK + reconnect.
    TooManyRedirects,
    /// Server reported `CLUSTERDOWN`.
    ClusterDown(String),
    /// Connect or read deadline exceeded.
    Timeout(String),
    /// A non-redirect server error (e.g. `WRONGTYPE`, `READONLY`).
    Redis {
        kind: RedisErrorKind,
        message: String,
    },
}

impl ClusterError {
    /// Build a `Redis` error from a raw message, classifying its kind.
    pub fn redis(msg: impl Into<String>) -> Self {
        let msg = msg.into();
        let (kind, message) = RedisErrorKind::from_error_msg(&msg);
        Self::Redis { kind, message }
    }

    /// Check if this is a MOVED redirect.
    pub fn is_moved(&self) -> bool {
        matches!(
            self,
            Self::Redis {
                kind: RedisErrorKind::Moved { .. },
                ..
            }
        )
    }

    /// Check if this is an ASK redirect.
    pub fn is_ask(&self) -> bool {
        matches!(
            self,
            Self::Redis {
                kind: RedisErrorKind::Ask { .. },
                ..
            }
        )
    }

    /// Extract MOVED slot and address if this is a MOVED error.
    pub fn moved_info(&self) -> Option<(u16, &str)> {
        match self {
            Self::Redis {
                kind: RedisErrorKind::Moved { slot, addr },
                ..
            } => Some((*slot, addr)),
            _ => None,
        }
    }

    /// Extract ASK slot and address if this is an ASK error.
    pub fn ask_info(&self) -> Option<(u16, &str)> {
        match self {
            Self::Redis {
                kind: RedisErrorKind::Ask { slot, addr },
                ..
            } => Some((*slot, addr)),
            _ => None,
        }
    }
}

impl fmt::Display for ClusterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Protocol(msg) => write!(f, "protocol error: {msg}"),
            Self::Incomplete => write!(f, "incomplete RESP message"),
            Self::OutOfMemory => write!(f, "out of memory"),
            Self::BadAddress(addr) => write!(f, "bad address: {addr}"),
            Self::BadNode(addr) => write!(f, "bad node: {addr}"),
            Self::TopologyStale => write!(f, "no route for slot"),
            Self::InconsistentTopology(msg) => write!(f, "inconsistent topology: {msg}"),
            Self::Unreachable(msg) => write!(f, "no node reachable: {msg}"),
            Self::TooManyRedirects => write!(f, "too many redirects"),
            Self::ClusterDown(msg) => write!(f, "cluster down: {msg}"),
            Self::Timeout(msg) => write!(f, "timeout: {msg}"),
            Self::Redis { message, .. } => write!(f, "redis error: {message}"),
        }
    }
}

impl std::error::Error for ClusterError {}

impl From<io::Error> for ClusterError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

pub type Result<T> = std::result::Result<T, ClusterError>;

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_error_kind_err() {
        let (kind, msg) = RedisErrorKind::from_error_msg("ERR unknown command 'FOO'");
        assert_eq!(kind, RedisErrorKind::Err);
        assert_eq!(msg, "ERR unknown command 'FOO'");
    }

    #[test]
    fn test_redis_error_kind_wrongtype() {
        let (kind, _) =
            RedisErrorKind::from_error_msg("WRONGTYPE Operation against a key holding wrong type");
        assert_eq!(kind, RedisErrorKind::WrongType);
    }

    #[test]
    fn test_redis_error_kind_moved() {
        let (kind, _) = RedisErrorKind::from_error_msg("MOVED 3999 127.0.0.1:6381");
        assert_eq!(
            kind,
            RedisErrorKind::Moved {
                slot: 3999,
                addr: "127.0.0.1:6381".to_string()
            }
        );
    }

    #[test]
    fn test_redis_error_kind_ask() {
        let (kind, _) = RedisErrorKind::from_error_msg("ASK 3999 127.0.0.1:6381");
        assert_eq!(
            kind,
            RedisErrorKind::Ask {
                slot: 3999,
                addr: "127.0.0.1:6381".to_string()
            }
        );
    }

    #[test]
    fn test_redis_error_kind_clusterdown() {
        let (kind, _) = RedisErrorKind::from_error_msg("CLUSTERDOWN The cluster is down");
        assert_eq!(kind, RedisErrorKind::ClusterDown);
    }

    #[test]
    fn test_redis_error_kind_loading() {
        let (kind, _) =
            RedisErrorKind::from_error_msg("LOADING Redis is loading the dataset in memory");
        assert_eq!(kind, RedisErrorKind::Loading);
    }

    #[test]
    fn test_redis_error_kind_readonly() {
        let (kind, _) =
            RedisErrorKind::from_error_msg("READONLY You can't write against a read only replica");
        assert_eq!(kind, RedisErrorKind::ReadOnly);
    }

    #[test]
    fn test_redis_error_kind_tryagain() {
        let (kind, _) = RedisErrorKind::from_error_msg("TRYAGAIN Multiple keys request");
        assert_eq!(kind, RedisErrorKind::TryAgain);
    }

    #[test]
    fn test_redis_error_kind_other() {
        let (kind, _) = RedisErrorKind::from_error_msg("CUSTOMPREFIX something happened");
        assert_eq!(kind, RedisErrorKind::Other("CUSTOMPREFIX".to_string()));
    }

    #[test]
    fn test_redis_error_kind_moved_invalid_slot() {
        let (kind, _) = RedisErrorKind::from_error_msg("MOVED abc 127.0.0.1:6381");
        assert_eq!(kind, RedisErrorKind::Other("MOVED".to_string()));
    }

    #[test]
    fn test_cluster_error_display() {
        let err = ClusterError::Io(io::Error::new(io::ErrorKind::Other, "refused"));
        assert!(err.to_string().contains("io error"));

        let err = ClusterError::Protocol("bad input".into());
        assert_eq!(err.to_string(), "protocol error: bad input");

        let err = ClusterError::redis("ERR unknown command");
        assert!(err.to_string().contains("redis error"));

        let err = ClusterError::BadAddress("not-an-addr".into());
        assert_eq!(err.to_string(), "bad address: not-an-addr");

        let err = ClusterError::Timeout("3s exceeded".into());
        assert_eq!(err.to_string(), "timeout: 3s exceeded");

        let err = ClusterError::ClusterDown("hash slot not served".into());
        assert_eq!(err.to_string(), "cluster down: hash slot not served");

        let err = ClusterError::TooManyRedirects;
        assert_eq!(err.to_string(), "too many redirects");
    }

    #[test]
    fn test_cluster_error_is_moved() {
        let err = ClusterError::redis("MOVED 3999 127.0.0.1:6381");
        assert!(err.is_moved());
        assert!(!err.is_ask());
        assert_eq!(err.moved_info(), Some((3999, "127.0.0.1:6381")));
        assert_eq!(err.ask_info(), None);
    }

    #[test]
    fn test_cluster_error_is_ask() {
        let err = ClusterError::redis("ASK 3999 127.0.0.1:6381");
        assert!(!err.is_moved());
        assert!(err.is_ask());
        assert_eq!(err.ask_info(), Some((3999, "127.0.0.1:6381")));
        assert_eq!(err.moved_info(), None);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::Other, "refused");
        let err: ClusterError = io_err.into();
        assert!(matches!(err, ClusterError::Io(_)));
    }

    #[test]
    fn test_regular_redis_error_helpers() {
        let err = ClusterError::redis("WRONGTYPE Operation against wrong type");
        assert!(!err.is_moved());
        assert!(!err.is_ask());
        assert_eq!(err.moved_info(), None);
        assert_eq!(err.ask_info(), None);
    }
}
