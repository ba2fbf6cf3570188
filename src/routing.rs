//! The slot-to-node routing table.
//!
//! Two redundant views are kept in sync: an ordered range list (the source
//! of truth, produced by a topology refresh) and a direct `[Option<Arc<str>>;
//! 16384]` array re-materialized from it for O(1) lookup on the hot path.
//! Nodes are referenced by address (`Arc<str>`), never by an owning
//! pointer into the registry, so there is no reference cycle between the
//! routing table and the node registry to unwind.

use std::sync::Arc;

use crate::crc16::SLOT_COUNT;
use crate::error::{ClusterError, Result};

/// A contiguous range of slots owned by one node.
#[derive(Debug, Clone)]
pub struct SlotRange {
    pub start: u16,
    pub end: u16,
    pub node_addr: Arc<str>,
}

/// Slot-to-node routing table.
#[derive(Debug, Clone, Default)]
pub struct RoutingTable {
    /// Ranges sorted by `start`; the source of truth.
    ranges: Vec<SlotRange>,
    /// O(1) direct lookup, re-materialized from `ranges` on every refresh.
    direct: Vec<Option<Arc<str>>>,
}

impl RoutingTable {
    /// Empty table — every slot unrouted.
    pub fn empty() -> Self {
        Self {
            ranges: Vec::new(),
            direct: vec![None; SLOT_COUNT as usize],
        }
    }

    /// O(1) lookup via the direct array. This is the hot path used by the
    /// dispatcher for every command.
    pub fn node_for_slot(&self, slot: u16) -> Option<&str> {
        self.direct
            .get(slot as usize)
            .and_then(|o| o.as_deref())
    }

    /// Binary search through the ordered range list. Used for diagnostics
    /// and as a fallback when the direct array hasn't been (re)built —
    /// equivalent to `node_for_slot` whenever both are in sync.
    pub fn node_for_slot_ranged(&self, slot: u16) -> Option<&str> {
        self.ranges
            .binary_search_by(|r| {
                if slot < r.start {
                    std::cmp::Ordering::Greater
                } else if slot > r.end {
                    std::cmp::Ordering::Less
                } else {
                    std::cmp::Ordering::Equal
                }
            })
            .ok()
            .map(|i| &*self.ranges[i].node_addr)
    }

    /// Build a fresh table from a set of ranges discovered during a
    /// topology refresh, and return it — the caller performs the atomic
    /// swap into shared state. Ranges must not overlap; any slot claimed by
    /// two ranges (two masters agreeing on ownership differently) is an
    /// `InconsistentTopology` error, and the caller's existing table is left
    /// untouched because this function never mutates `self`.
    pub fn from_ranges(mut ranges: Vec<SlotRange>) -> Result<Self> {
        ranges.sort_by_key(|r| r.start);

        let mut direct: Vec<Option<Arc<str>>> = vec![None; SLOT_COUNT as usize];
        for range in &ranges {
            if range.start > range.end {
                return Err(ClusterError::InconsistentTopology(format!(
                    "slot range start {} > end {}",
                    range.start, range.end
                )));
            }
            for slot in range.start..=range.end {
                let slot = slot as usize;
                if let Some(existing) = &direct[slot] {
                    if **existing != *range.node_addr {
                        return Err(ClusterError::InconsistentTopology(format!(
                            "slot {slot} claimed by both {existing} and {}",
                            range.node_addr
                        )));
                    }
                }
                direct[slot] = Some(Arc::clone(&range.node_addr));
            }
        }

        Ok(Self { ranges, direct })
    }

    /// Number of distinct ranges currently known.
    pub fn range_count(&self) -> usize {
        self.ranges.len()
    }

    /// Fraction of the slot space (0..16384) with a known owner.
    pub fn coverage(&self) -> usize {
        self.direct.iter().filter(|o| o.is_some()).count()
    }

    /// Update a single slot's owner in place — used after a MOVED redirect
    /// is folded into a lighter-weight update than a full refresh. Only
    /// patches the direct array entry for `slot`; `ranges` is left as-is
    /// since a single-slot move doesn't change range boundaries in the
    /// common case of one key migrating, and the next full refresh will
    /// reconcile ranges properly.
    pub fn update_slot_owner(&mut self, slot: u16, node_addr: Arc<str>) {
        if let Some(entry) = self.direct.get_mut(slot as usize) {
            *entry = Some(node_addr);
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: u16, end: u16, addr: &str) -> SlotRange {
        SlotRange {
            start,
            end,
            node_addr: Arc::from(addr),
        }
    }

    #[test]
    fn empty_table_routes_nothing() {
        let table = RoutingTable::empty();
        assert_eq!(table.node_for_slot(0), None);
        assert_eq!(table.coverage(), 0);
    }

    #[test]
    fn full_coverage_after_valid_refresh() {
        let table = RoutingTable::from_ranges(vec![
            range(0, 8191, "10.0.0.1:7000"),
            range(8192, 16383, "10.0.0.2:7000"),
        ])
        .unwrap();
        assert_eq!(table.coverage(), SLOT_COUNT as usize);
        assert_eq!(table.node_for_slot(0), Some("10.0.0.1:7000"));
        assert_eq!(table.node_for_slot(16383), Some("10.0.0.2:7000"));
        assert_eq!(table.node_for_slot_ranged(100), table.node_for_slot(100));
    }

    #[test]
    fn overlapping_masters_is_inconsistent() {
        let result = RoutingTable::from_ranges(vec![
            range(0, 100, "10.0.0.1:7000"),
            range(50, 150, "10.0.0.2:7000"),
        ]);
        assert!(matches!(
            result,
            Err(ClusterError::InconsistentTopology(_))
        ));
    }

    #[test]
    fn inverted_range_is_inconsistent() {
        let result = RoutingTable::from_ranges(vec![range(100, 50, "10.0.0.1:7000")]);
        assert!(matches!(
            result,
            Err(ClusterError::InconsistentTopology(_))
        ));
    }

    #[test]
    fn failed_refresh_does_not_mutate_existing_table() {
        let good = RoutingTable::from_ranges(vec![range(0, 16383, "10.0.0.1:7000")]).unwrap();
        let attempt = RoutingTable::from_ranges(vec![
            range(0, 100, "10.0.0.1:7000"),
            range(50, 150, "10.0.0.2:7000"),
        ]);
        assert!(attempt.is_err());
        // `good` is a separate value — from_ranges never touches its input.
        assert_eq!(good.node_for_slot(0), Some("10.0.0.1:7000"));
    }

    #[test]
    fn update_slot_owner_patches_direct_array_only() {
        let mut table = RoutingTable::from_ranges(vec![range(0, 16383, "10.0.0.1:7000")]).unwrap();
        table.update_slot_owner(42, Arc::from("10.0.0.2:7000"));
        assert_eq!(table.node_for_slot(42), Some("10.0.0.2:7000"));
        assert_eq!(table.node_for_slot(41), Some("10.0.0.1:7000"));
    }
}
