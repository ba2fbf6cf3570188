//! Command parsing: classifying a raw RESP request and locating its keys.
//!
//! This realizes the `parse_request`/`format_command` half of the codec
//! interface the dispatch engine treats as fixed. `format_command` is a
//! thin re-export of [`crate::resp::writer::encode_command`]; the
//! interesting part is classification, which the fragmenter and dispatcher
//! both depend on to decide whether a command needs splitting across nodes.

use bytes::Bytes;

use crate::error::{ClusterError, Result};
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command;

/// How a command's keys map onto hash slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// Exactly one key, ordinary single-slot dispatch (`GET`, `SET`, `INCR`, …).
    SingleKey,
    /// `MGET k1 k2 …` — fan out, reassemble as a positional array.
    MultiGet,
    /// `MSET k1 v1 k2 v2 …` — fan out, reassemble as a single `OK`/error.
    MultiSet,
    /// `DEL k1 k2 …` — fan out, reassemble as a summed integer.
    Delete,
    /// No key, or a key shape this crate doesn't special-case. Routed
    /// without fragmentation using whatever single key (if any) is found.
    Uncategorised,
}

/// A parsed command: its raw argument vector, classification, and the
/// byte-argument positions of its keys.
#[derive(Debug, Clone)]
pub struct ParsedCommand {
    /// Every argument, including the verb at position 0.
    pub args: Vec<Bytes>,
    pub kind: CommandKind,
    /// Indices into `args` that hold keys.
    pub key_positions: Vec<usize>,
}

impl ParsedCommand {
    /// Verb in uppercase, e.g. `"MGET"`.
    pub fn verb(&self) -> String {
        String::from_utf8_lossy(&self.args[0]).to_ascii_uppercase()
    }

    /// Keys as byte slices, in argument order.
    pub fn keys(&self) -> Vec<&[u8]> {
        self.key_positions.iter().map(|&i| &self.args[i][..]).collect()
    }

    /// Re-encode this command's full argument vector back to wire bytes.
    pub fn to_bytes(&self) -> Vec<u8> {
        let refs: Vec<&[u8]> = self.args.iter().map(|b| &b[..]).collect();
        encode_command(&refs)
    }
}

/// Parse a RESP-encoded request (an array of bulk strings) into a
/// [`ParsedCommand`].
pub fn parse_request(raw: &Bytes) -> Result<ParsedCommand> {
    let (value, _) = crate::resp::parser::parse(raw)?;
    let items = match value {
        RespValue::Array(items) => items,
        other => {
            return Err(ClusterError::Protocol(format!(
                "command request must be an array, got {:?}",
                other.type_name()
            )));
        }
    };
    if items.is_empty() {
        return Err(ClusterError::Protocol("empty command request".into()));
    }

    let mut args = Vec::with_capacity(items.len());
    for item in items {
        match item {
            RespValue::BulkString(b) => args.push(b),
            RespValue::SimpleString(s) => args.push(Bytes::from(s.into_bytes())),
            other => {
                return Err(ClusterError::Protocol(format!(
                    "command argument must be a bulk string, got {:?}",
                    other.type_name()
                )));
            }
        }
    }

    classify(args)
}

/// Classify an already-split argument vector (used by the fragmenter, which
/// builds sub-commands directly without a RESP round trip).
pub fn classify(args: Vec<Bytes>) -> Result<ParsedCommand> {
    if args.is_empty() {
        return Err(ClusterError::Protocol("empty command request".into()));
    }
    let verb = String::from_utf8_lossy(&args[0]).to_ascii_uppercase();

    let (kind, key_positions) = match verb.as_str() {
        "MGET" => (CommandKind::MultiGet, (1..args.len()).collect()),
        "DEL" | "UNLINK" => (CommandKind::Delete, (1..args.len()).collect()),
        "MSET" => {
            let positions: Vec<usize> = (1..args.len()).step_by(2).collect();
            (CommandKind::MultiSet, positions)
        }
        _ => (CommandKind::Uncategorised, single_key_position(&verb, &args)),
    };

    let kind = if kind == CommandKind::Uncategorised && key_positions.len() == 1 {
        CommandKind::SingleKey
    } else {
        kind
    };

    Ok(ParsedCommand {
        args,
        kind,
        key_positions,
    })
}

/// Key position(s) for a command whose shape isn't one of MGET/MSET/DEL.
/// Returns zero or one position depending on the verb's argument layout.
fn single_key_position(verb: &str, args: &[Bytes]) -> Vec<usize> {
    match verb {
        // Keyless commands.
        "PING" | "INFO" | "DBSIZE" | "CLUSTER" | "CONFIG" | "CLIENT" | "COMMAND" | "TIME"
        | "RANDOMKEY" | "WAIT" | "ASKING" | "ECHO" | "SHUTDOWN" => vec![],
        // EVAL/EVALSHA: key starts at args[3] if numkeys > 0.
        "EVAL" | "EVALSHA" => {
            if args.len() >= 4 {
                if let Some(numkeys) = std::str::from_utf8(&args[2])
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                {
                    if numkeys > 0 {
                        return vec![3];
                    }
                }
            }
            vec![]
        }
        // XREAD/XREADGROUP: key follows the STREAMS keyword.
        "XREAD" | "XREADGROUP" => args
            .iter()
            .position(|a| a.eq_ignore_ascii_case(b"STREAMS"))
            .filter(|&i| i + 1 < args.len())
            .map(|i| vec![i + 1])
            .unwrap_or_default(),
        // Default: key at position 1, if present.
        _ => {
            if args.len() > 1 {
                vec![1]
            } else {
                vec![]
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────
