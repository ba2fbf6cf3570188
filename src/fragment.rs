//! The command fragmenter: splits a multi-key command into per-slot
//! sub-commands, one per node that must see a piece of it.
//!
//! A single-key command never reaches here — the dispatcher routes it
//! directly off `ParsedCommand::key_positions[0]`. This module only handles
//! `MGET`/`MSET`/`DEL` with more than one key.

use std::collections::BTreeMap;

use bytes::Bytes;

use crate::command::{CommandKind, ParsedCommand};
use crate::crc16::hash_slot;

/// One per-slot piece of a fragmented command.
#[derive(Debug, Clone)]
pub struct Fragment {
    pub slot: u16,
    pub command: ParsedCommand,
    /// Index of each key in this fragment back into the original command's
    /// key list, in the order they appear here — needed by the reassembler
    /// to place sub-reply elements at the right output position.
    pub original_key_indices: Vec<usize>,
}

/// Either a command needed no splitting, or it was split into fragments
/// grouped by slot.
pub enum FragmentResult {
    Single { slot: u16 },
    Fragmented(Vec<Fragment>),
}

/// Fragment `parsed` by the slot each of its keys hashes to. If every key
/// collapses onto the same slot the command degenerates into a single
/// dispatch rather than a one-fragment list.
pub fn fragment_command(parsed: &ParsedCommand) -> FragmentResult {
    if parsed.key_positions.len() <= 1 {
        let slot = parsed
            .key_positions
            .first()
            .map(|&i| hash_slot(&parsed.args[i]))
            .unwrap_or(0);
        return FragmentResult::Single { slot };
    }

    let keys = parsed.keys();
    let mut by_slot: BTreeMap<u16, Vec<usize>> = BTreeMap::new();
    for (key_idx, key) in keys.iter().enumerate() {
        by_slot.entry(hash_slot(key)).or_default().push(key_idx);
    }

    if by_slot.len() == 1 {
        let slot = *by_slot.keys().next().unwrap();
        return FragmentResult::Single { slot };
    }

    let verb = parsed.verb();
    let fragments = by_slot
        .into_iter()
        .map(|(slot, key_indices)| {
            let command = rebuild(parsed, &verb, &key_indices);
            Fragment {
                slot,
                command,
                original_key_indices: key_indices,
            }
        })
        .collect();

    FragmentResult::Fragmented(fragments)
}

/// Rebuild a sub-command carrying only the keys (and, for `MSET`, their
/// adjacent values) at `key_indices` into the original key list.
fn rebuild(parsed: &ParsedCommand, verb: &str, key_indices: &[usize]) -> ParsedCommand {
    let mut args: Vec<Bytes> = vec![Bytes::copy_from_slice(verb.as_bytes())];

    match parsed.kind {
        CommandKind::MultiSet => {
            for &idx in key_indices {
                let key_pos = parsed.key_positions[idx];
                args.push(parsed.args[key_pos].clone());
                args.push(parsed.args[key_pos + 1].clone());
            }
        }
        _ => {
            for &idx in key_indices {
                let key_pos = parsed.key_positions[idx];
                args.push(parsed.args[key_pos].clone());
            }
        }
    }

    crate::command::classify(args).expect("rebuilt sub-command is always well-formed")
}

// ── Tests ──────────────────────────────────────────────────────────
