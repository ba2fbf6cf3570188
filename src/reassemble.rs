//! Reply reassembler: folds per-fragment replies back into the single
//! reply shape the caller expects for `MGET`/`MSET`/`DEL`.

use crate::command::CommandKind;
use crate::error::{ClusterError, Result};
use crate::fragment::Fragment;
use crate::resp::types::RespValue;

/// Reassemble fragment replies (in the same order as `fragments`) into one
/// reply, per `kind`. Any sub-reply that is itself an error short-circuits
/// the whole reassembly.
pub fn reassemble(
    kind: CommandKind,
    fragments: &[Fragment],
    total_keys: usize,
    mut replies: Vec<RespValue>,
) -> Result<RespValue> {
    for reply in &replies {
        if reply.is_error() {
            return Err(ClusterError::redis(
                reply.as_error_msg().unwrap_or("unknown error").to_string(),
            ));
        }
    }

    match kind {
        CommandKind::MultiGet => reassemble_mget(fragments, total_keys, replies),
        CommandKind::Delete => reassemble_del(&replies),
        CommandKind::MultiSet => reassemble_mset(replies.drain(..)),
        other => Err(ClusterError::Protocol(format!(
            "{other:?} is not a fragmentable command kind"
        ))),
    }
}

/// Positional reassembly: output position `i` takes the reply that would
/// have come from a single-shard `GET(keys[i])`. Sub-replies are consumed
/// from the tail of each fragment's array so the insertion order recorded
/// in `Fragment::original_key_indices` is preserved without needing to
/// re-borrow from the front repeatedly.
fn reassemble_mget(
    fragments: &[Fragment],
    total_keys: usize,
    mut replies: Vec<RespValue>,
) -> Result<RespValue> {
    let mut out: Vec<Option<RespValue>> = (0..total_keys).map(|_| None).collect();

    for (fragment, reply) in fragments.iter().zip(replies.drain(..)) {
        let RespValue::Array(mut values) = reply else {
            return Err(ClusterError::Protocol(
                "MGET sub-reply must be an array".into(),
            ));
        };
        for &original_idx in fragment.original_key_indices.iter().rev() {
            let value = values
                .pop()
                .ok_or_else(|| ClusterError::Protocol("MGET sub-reply missing element".into()))?;
            out[original_idx] = Some(value);
        }
    }

    let values = out
        .into_iter()
        .map(|v| v.ok_or_else(|| ClusterError::Protocol("MGET sub-reply missing element".into())))
        .collect::<Result<Vec<_>>>()?;
    Ok(RespValue::Array(values))
}

/// `DEL` reassembly: sum the integer reply from every fragment.
fn reassemble_del(replies: &[RespValue]) -> Result<RespValue> {
    let mut total = 0i64;
    for reply in replies {
        total += reply
            .as_int()
            .ok_or_else(|| ClusterError::Protocol("DEL sub-reply must be an integer".into()))?;
    }
    Ok(RespValue::Integer(total))
}

/// `MSET` reassembly: `OK` iff every sub-reply is `OK`, else the first
/// non-`OK` reply is surfaced.
fn reassemble_mset(replies: impl Iterator<Item = RespValue>) -> Result<RespValue> {
    for reply in replies {
        match &reply {
            RespValue::SimpleString(s) if s == "OK" => continue,
            _ => return Ok(reply),
        }
    }
    Ok(RespValue::SimpleString("OK".to_string()))
}

// ── Tests ──────────────────────────────────────────────────────────
