//! Property-based tests for the aggregation invariants
//!
//! Covers the conservation, decay-monotonicity and filter round-trip
//! properties under randomized inputs, plus comparator total-order
//! checks that insertion correctness depends on.

use hotpath::column::ColumnRegistry;
use hotpath::config::EngineConfig;
use hotpath::sample::{CpuMode, SampleRecord, SymbolInfo, ThreadInfo};
use hotpath::table::Table;
use proptest::prelude::*;
use std::cmp::Ordering;
use std::sync::Arc;

fn build_table(samples: &[(u8, u64)]) -> Table {
    let registry = Arc::new(ColumnRegistry::from_list("symbol").unwrap());
    let table = Table::new(registry, EngineConfig::default());
    let thread = Arc::new(ThreadInfo::new(1, 1, "prop"));
    for &(sym_idx, period) in samples {
        let start = 0x1000 + sym_idx as u64 * 0x100;
        let sym = Arc::new(SymbolInfo::new(&format!("fn_{sym_idx}"), start, start + 0x100));
        let sample = SampleRecord::new(Arc::clone(&thread), start + 1, period, CpuMode::User)
            .with_symbol(sym);
        table.insert(&sample).unwrap();
    }
    table
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    #[test]
    fn prop_conservation_of_period(
        samples in prop::collection::vec((0u8..16, 1u64..1000), 1..100),
    ) {
        // Property: with no collapse/decay/filter interference, the sum
        // of entry periods equals the sum of inserted sample periods
        let expected: u64 = samples.iter().map(|&(_, p)| p).sum();
        let mut table = build_table(&samples);
        table.collapse();
        table.resort();

        let sum: u64 = table.iter_output().map(|(_, e)| e.stat.period).sum();
        prop_assert_eq!(sum, expected);
        prop_assert_eq!(table.total_period(), expected);
        prop_assert_eq!(table.nr_samples(), samples.len() as u64);
    }

    #[test]
    fn prop_collapse_is_idempotent(
        samples in prop::collection::vec((0u8..8, 1u64..100), 1..50),
    ) {
        let mut table = build_table(&samples);
        table.collapse();
        table.resort();
        let first: Vec<u64> = table.iter_output().map(|(_, e)| e.stat.period).collect();

        table.collapse();
        table.resort();
        let second: Vec<u64> = table.iter_output().map(|(_, e)| e.stat.period).collect();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn prop_decay_is_monotone_floor(
        samples in prop::collection::vec((0u8..8, 1u64..10_000), 1..50),
    ) {
        let mut table = build_table(&samples);
        table.collapse();
        table.resort();

        let before: Vec<(String, u64)> = table
            .iter_output()
            .map(|(_, e)| (e.key.symbol_name(), e.stat.period))
            .collect();
        let total_before: u64 = before.iter().map(|&(_, p)| p).sum();

        table.decay(false, false);

        // Every survivor holds exactly floor(old * 7 / 8)
        for (_, entry) in table.iter_output() {
            let name = entry.key.symbol_name();
            let old = before.iter().find(|(n, _)| *n == name).unwrap().1;
            prop_assert_eq!(entry.stat.period, old * 7 / 8);
        }

        // And the total strictly decreases unless it was already zero
        let total_after: u64 = table.iter_output().map(|(_, e)| e.stat.period).sum();
        if total_before > 0 {
            prop_assert!(total_after < total_before);
        }
        prop_assert_eq!(table.total_period(), total_after);
    }

    #[test]
    fn prop_filter_round_trip_restores_totals(
        samples in prop::collection::vec((0u8..8, 1u64..100), 1..50),
        filter_idx in 0u8..8,
    ) {
        let mut table = build_table(&samples);
        table.collapse();
        table.resort();
        let before = table.total_non_filtered_period();
        let entries_before = table.nr_non_filtered_entries();

        let needle = format!("fn_{filter_idx}");
        table.filter_by_symbol(Some(&needle));
        prop_assert!(table.total_non_filtered_period() <= before);

        table.filter_by_symbol(None);
        prop_assert_eq!(table.total_non_filtered_period(), before);
        prop_assert_eq!(table.nr_non_filtered_entries(), entries_before);
    }

    #[test]
    fn prop_merge_keeps_entry_count_bounded(
        samples in prop::collection::vec((0u8..8, 1u64..100), 1..100),
    ) {
        // At most one entry per distinct key survives aggregation
        let distinct = samples
            .iter()
            .map(|&(s, _)| s)
            .collect::<std::collections::HashSet<_>>()
            .len() as u64;
        let mut table = build_table(&samples);
        table.collapse();
        table.resort();
        prop_assert_eq!(table.nr_entries(), distinct);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_key_comparator_is_antisymmetric(
        a in (0u8..16, 0u64..64),
        b in (0u8..16, 0u64..64),
    ) {
        use hotpath::entry::EntryKey;

        let registry = ColumnRegistry::from_list("symbol,pid,address").unwrap();
        let key = |(sym_idx, ip_off): (u8, u64)| {
            let thread = Arc::new(ThreadInfo::new(1, sym_idx as i32 % 4, "t"));
            let start = 0x1000 + sym_idx as u64 * 0x100;
            let sym = Arc::new(SymbolInfo::new(&format!("fn_{sym_idx}"), start, start + 0x100));
            let sample = SampleRecord::new(thread, start + ip_off, 1, CpuMode::User)
                .with_symbol(sym);
            EntryKey::from_sample(&sample)
        };
        let (ka, kb) = (key(a), key(b));

        // Reflexive equality and antisymmetry, for both comparator families
        prop_assert_eq!(registry.compare_key(&ka, &ka), Ordering::Equal);
        prop_assert_eq!(
            registry.compare_key(&ka, &kb),
            registry.compare_key(&kb, &ka).reverse()
        );
        prop_assert_eq!(
            registry.compare_collapse(&ka, &kb),
            registry.compare_collapse(&kb, &ka).reverse()
        );
    }
}
