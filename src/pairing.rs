//! Diff pairing between two independently built tables
//!
//! Matching walks the leader's collapsed index and looks each key up in
//! the other table by the collapse comparator, storing symmetric
//! non-owning `pair` handles. Linking then backfills the leader with
//! zero-stat dummy entries for keys only the other table has, so a
//! side-by-side view can show "0" rows. Both tables must have been built
//! with the same dimension list for the key spaces to line up.

use crate::entry::{Entry, EntryId};
use crate::table::Table;
use tracing::debug;

/// Pair up entries with matching collapse keys in `leader` and `other`.
///
/// Existing pair links on both sides are overwritten; leader entries
/// with no counterpart end up with `pair == None`.
pub fn match_tables(leader: &mut Table, other: &mut Table) {
    let leader_ids: Vec<EntryId> = leader.collapsed_ids().to_vec();
    let mut matched = 0usize;

    for id in leader_ids {
        let Some(key) = leader.entry(id).map(|e| e.key.clone()) else {
            continue;
        };
        match other.lookup_collapsed(&key) {
            Some(other_id) => {
                if let Some(entry) = leader.entry_mut(id) {
                    entry.pair = Some(other_id);
                }
                if let Some(entry) = other.entry_mut(other_id) {
                    entry.pair = Some(id);
                }
                matched += 1;
            }
            None => {
                if let Some(entry) = leader.entry_mut(id) {
                    entry.pair = None;
                }
            }
        }
    }

    debug!(matched, "table match complete");
}

/// Insert zero-stat dummy entries into `leader` for every key that only
/// `other` has, linking the new pairs both ways. Dummies count toward
/// `nr_entries` but never toward period totals. Run [`match_tables`]
/// first so existing counterparts are already linked.
pub fn link_tables(leader: &mut Table, other: &mut Table) {
    let other_ids: Vec<EntryId> = other.collapsed_ids().to_vec();
    let mut linked = 0usize;

    for other_id in other_ids {
        let Some(entry) = other.entry(other_id) else {
            continue;
        };
        if entry.pair.is_some() {
            continue;
        }
        let key = entry.key.clone();

        let dummy_id = leader.lookup_or_insert_dummy(key);
        if let Some(entry) = leader.entry_mut(dummy_id) {
            entry.pair = Some(other_id);
        }
        if let Some(entry) = other.entry_mut(other_id) {
            entry.pair = Some(dummy_id);
        }
        linked += 1;
    }

    debug!(linked, "table link complete");
}

/// Signed percentage-point delta between an entry's share of its table
/// and its baseline's share of the paired table
pub fn delta_percent(period: u64, total: u64, pair_period: u64, pair_total: u64) -> f64 {
    let new_percent = if total > 0 {
        period as f64 * 100.0 / total as f64
    } else {
        0.0
    };
    let old_percent = if pair_total > 0 {
        pair_period as f64 * 100.0 / pair_total as f64
    } else {
        0.0
    };
    new_percent - old_percent
}

/// Format a delta for display: deltas under 0.01 percentage points
/// render as blank
pub fn format_delta(delta: f64) -> String {
    if delta.abs() >= 0.01 {
        format!("{delta:+.2}%")
    } else {
        String::new()
    }
}

/// Rank displacement of `entry` against its pair in `other`:
/// positive means the pair sat further down the paired table.
///
/// Both tables need positions recorded (see
/// [`Table::record_positions`]) after their latest resort.
pub fn displacement(entry: &Entry, other: &Table) -> i64 {
    let Some(pair_id) = entry.pair else {
        return 0;
    };
    let Some(pair) = other.entry(pair_id) else {
        return 0;
    };
    if entry.position == 0 || pair.position == 0 {
        return 0;
    }
    pair.position as i64 - entry.position as i64
}
