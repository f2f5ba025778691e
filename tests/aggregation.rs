//! End-to-end aggregation tests
//!
//! Drives the full pipeline the way a report/live view would:
//! insert -> collapse -> resort -> iterate, plus decay, filtering,
//! diff pairing and a threaded live-mode producer/consumer run.

use anyhow::Result;
use hotpath::column::ColumnRegistry;
use hotpath::config::{CallchainConfig, EngineConfig};
use hotpath::pairing;
use hotpath::sample::{
    CpuMode, DsoInfo, MapInfo, ResolvedFrame, SampleRecord, SymbolInfo, ThreadInfo,
};
use hotpath::table::{OutputSort, Table};
use std::sync::Arc;

fn init_tracing() {
    use std::sync::Once;
    static ONCE: Once = Once::new();
    ONCE.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

struct Fixture {
    thread: Arc<ThreadInfo>,
    libc: Arc<MapInfo>,
    app: Arc<MapInfo>,
}

impl Fixture {
    fn new() -> Self {
        Self {
            thread: Arc::new(ThreadInfo::new(100, 100, "app")),
            libc: Arc::new(MapInfo::new(
                Arc::new(DsoInfo::new("libc.so", "/usr/lib/libc.so")),
                0x7f00_0000,
                0x7f10_0000,
            )),
            app: Arc::new(MapInfo::new(
                Arc::new(DsoInfo::new("app", "/usr/bin/app")),
                0x40_0000,
                0x50_0000,
            )),
        }
    }

    fn sample(&self, sym: &str, start: u64, period: u64, map: &Arc<MapInfo>) -> SampleRecord {
        SampleRecord::new(Arc::clone(&self.thread), start + 0x10, period, CpuMode::User)
            .with_symbol(Arc::new(SymbolInfo::new(sym, start, start + 0x100)))
            .with_map(Arc::clone(map))
    }
}

fn symbol_table() -> Result<Table> {
    let registry = Arc::new(ColumnRegistry::from_list("symbol,dso")?);
    Ok(Table::new(registry, EngineConfig::default()))
}

#[test]
fn test_report_scenario_foo_before_bar() -> Result<()> {
    init_tracing();
    let fx = Fixture::new();
    let mut table = symbol_table()?;

    table.insert(&fx.sample("foo", 0x1000, 10, &fx.libc))?;
    table.insert(&fx.sample("foo", 0x1000, 5, &fx.libc))?;
    table.insert(&fx.sample("bar", 0x2000, 7, &fx.app))?;
    table.collapse();
    table.resort();

    assert_eq!(table.nr_entries(), 2);
    assert_eq!(table.total_period(), 22);

    let rows: Vec<(usize, String, u64)> = table
        .iter_output()
        .map(|(rank, e)| (rank, e.key.symbol_name(), e.stat.period))
        .collect();
    assert_eq!(
        rows,
        vec![
            (1, "foo".to_string(), 15),
            (2, "bar".to_string(), 7),
        ]
    );
    Ok(())
}

#[test]
fn test_dso_zoom_scenario() -> Result<()> {
    let fx = Fixture::new();
    let mut table = symbol_table()?;
    table.insert(&fx.sample("foo", 0x1000, 15, &fx.libc))?;
    table.insert(&fx.sample("bar", 0x2000, 7, &fx.app))?;
    table.collapse();
    table.resort();

    table.filter_by_dso(Some("app"));
    assert_eq!(table.total_non_filtered_period(), 7);
    assert_eq!(table.nr_non_filtered_entries(), 1);
    assert_eq!(table.nr_entries(), 2);

    // Percentages can be computed against all samples or visible ones
    let bar = table
        .iter_output()
        .map(|(_, e)| e)
        .find(|e| e.key.symbol_name() == "bar")
        .unwrap();
    assert!((bar.period_percent(table.total_period()) - 31.8181).abs() < 0.01);
    assert!((bar.period_percent(table.total_non_filtered_period()) - 100.0).abs() < f64::EPSILON);

    // Unfiltering is instant and lossless
    table.filter_by_dso(None);
    assert_eq!(table.total_non_filtered_period(), 22);
    assert_eq!(table.nr_non_filtered_entries(), 2);
    Ok(())
}

#[test]
fn test_live_view_decays_stale_hotspots() -> Result<()> {
    let fx = Fixture::new();
    let mut table = symbol_table()?;

    table.insert(&fx.sample("stale", 0x1000, 64, &fx.app))?;
    table.collapse();
    table.resort();

    // A handful of refresh cycles with no new samples for "stale"
    for _ in 0..4 {
        table.decay(false, false);
        table.insert(&fx.sample("fresh", 0x2000, 64, &fx.app))?;
        table.collapse();
        table.resort();
    }

    let rows: Vec<(String, u64)> = table
        .iter_output()
        .map(|(_, e)| (e.key.symbol_name(), e.stat.period))
        .collect();
    assert_eq!(rows[0].0, "fresh");
    // floor applied each cycle: 64 -> 56 -> 49 -> 42 -> 36
    let stale = rows.iter().find(|(name, _)| name == "stale").unwrap();
    assert_eq!(stale.1, 36);
    Ok(())
}

#[test]
fn test_diff_pairing_end_to_end() -> Result<()> {
    let fx = Fixture::new();
    let mut before = symbol_table()?;
    let mut after = symbol_table()?;

    before.insert(&fx.sample("shared", 0x1000, 40, &fx.app))?;
    before.insert(&fx.sample("removed", 0x2000, 10, &fx.app))?;
    after.insert(&fx.sample("shared", 0x1000, 10, &fx.app))?;
    after.insert(&fx.sample("added", 0x3000, 40, &fx.app))?;
    before.collapse();
    after.collapse();

    pairing::match_tables(&mut after, &mut before);
    pairing::link_tables(&mut after, &mut before);
    after.resort();
    before.resort();
    after.record_positions();
    before.record_positions();

    // Every key from either capture is visible in the leader
    let names: Vec<String> = after
        .iter_output()
        .map(|(_, e)| e.key.symbol_name())
        .collect();
    for name in ["shared", "added", "removed"] {
        assert!(names.contains(&name.to_string()), "missing {name}");
    }

    // "removed" shows up as a zero dummy and doesn't pollute totals
    let removed = after
        .iter_output()
        .map(|(_, e)| e)
        .find(|e| e.key.symbol_name() == "removed")
        .unwrap();
    assert!(removed.dummy);
    assert_eq!(removed.stat.period, 0);
    assert_eq!(after.total_period(), 50);

    // Delta for "shared": 20% of after vs 80% of before
    let shared = after
        .iter_output()
        .map(|(_, e)| e)
        .find(|e| e.key.symbol_name() == "shared")
        .unwrap();
    let pair = before.entry(shared.pair.unwrap()).unwrap();
    let delta = pairing::delta_percent(
        shared.stat.period,
        after.total_period(),
        pair.stat.period,
        before.total_period(),
    );
    assert_eq!(pairing::format_delta(delta), "-60.00%");
    Ok(())
}

#[test]
fn test_callchain_report() -> Result<()> {
    let fx = Fixture::new();
    let registry = Arc::new(ColumnRegistry::from_list("symbol")?);
    let config = EngineConfig {
        callchain: CallchainConfig {
            enabled: true,
            ..Default::default()
        },
        ..Default::default()
    };
    let mut table = Table::new(registry, config);

    let main_sym = Arc::new(SymbolInfo::new("main", 0x100, 0x200));
    let worker = Arc::new(SymbolInfo::new("worker", 0x300, 0x400));
    let chain = vec![
        ResolvedFrame::new(0x110).with_symbol(Arc::clone(&main_sym)),
        ResolvedFrame::new(0x310).with_symbol(Arc::clone(&worker)),
    ];
    for _ in 0..10 {
        table.insert(&fx.sample("hot", 0x1000, 10, &fx.app).with_callchain(chain.clone()))?;
    }
    table.collapse();
    table.resort();

    let (_, entry) = table.iter_output().next().unwrap();
    let display = entry.display_chain.as_ref().expect("pruned chain");
    assert_eq!(display.children_hits, 100);
    let top = display.children_sorted()[0];
    assert_eq!(top.frame.as_ref().unwrap().symbol.as_ref().unwrap().name, "main");
    Ok(())
}

#[test]
fn test_output_sort_can_use_any_column() -> Result<()> {
    let fx = Fixture::new();
    let mut table = symbol_table()?;
    table.insert(&fx.sample("zzz", 0x1000, 50, &fx.app))?;
    table.insert(&fx.sample("aaa", 0x2000, 1, &fx.app))?;
    table.collapse();
    table.resort();

    // Default: hottest first
    let first = table.iter_output().next().unwrap().1.key.symbol_name();
    assert_eq!(first, "zzz");

    // Column sort: key order of the first dimension (symbol anchor)
    table.set_output_sort(OutputSort::Column(0));
    table.resort();
    let first = table.iter_output().next().unwrap().1.key.symbol_name();
    assert_eq!(first, "zzz"); // anchor 0x1000 sorts before 0x2000
    Ok(())
}

#[test]
fn test_column_widths_track_formatted_values() -> Result<()> {
    let fx = Fixture::new();
    let mut table = symbol_table()?;
    table.insert(&fx.sample("short", 0x1000, 1, &fx.libc))?;
    table.collapse();
    table.resort();
    assert_eq!(table.col_width(0), "Symbol".len());
    assert_eq!(table.col_width(1), "Shared Object".len());

    table.insert(&fx.sample("extremely_long_symbol_name_here", 0x5000, 1, &fx.libc))?;
    table.collapse();
    table.resort();
    assert_eq!(table.col_width(0), "extremely_long_symbol_name_here".len());

    // The explicit recompute trigger agrees with resort
    table.recompute_col_widths();
    assert_eq!(table.col_width(0), "extremely_long_symbol_name_here".len());
    Ok(())
}

#[test]
fn test_live_mode_producer_consumer() -> Result<()> {
    init_tracing();
    let registry = Arc::new(ColumnRegistry::from_list("address")?);
    let mut table = Table::new(registry, EngineConfig::default());
    let collector = table.collector();

    const SAMPLES: u64 = 10_000;
    crossbeam::thread::scope(|s| {
        let producer = s.spawn(|_| {
            let thread = Arc::new(ThreadInfo::new(1, 1, "load"));
            for i in 0..SAMPLES {
                let sample =
                    SampleRecord::new(Arc::clone(&thread), 0x1000 + (i % 97), 3, CpuMode::User);
                collector.insert(&sample).unwrap();
            }
        });

        // Consumer refreshes concurrently; no sample may be lost across
        // the buffer swaps
        for _ in 0..20 {
            table.collapse();
            table.resort();
            std::thread::yield_now();
        }

        producer.join().unwrap();
    })
    .unwrap();

    // Final refresh publishes whatever arrived after the last swap
    table.collapse();
    table.resort();

    assert_eq!(table.nr_samples(), SAMPLES);
    assert_eq!(table.total_period(), SAMPLES * 3);
    let sum: u64 = table.iter_output().map(|(_, e)| e.stat.period).sum();
    assert_eq!(sum, SAMPLES * 3);
    assert_eq!(table.nr_entries(), 97);
    Ok(())
}

#[test]
fn test_missing_optional_fields_format_as_placeholders() -> Result<()> {
    let registry = Arc::new(ColumnRegistry::from_list("symbol,dso,dcacheline")?);
    let mut table = Table::new(registry, EngineConfig::default());
    let thread = Arc::new(ThreadInfo::new(1, 1, "bare"));
    table.insert(&SampleRecord::new(thread, 0xabcd, 1, CpuMode::Unknown))?;
    table.collapse();
    table.resort();

    let (_, entry) = table.iter_output().next().unwrap();
    assert_eq!(table.format_entry(0, entry), "0xabcd");
    assert_eq!(table.format_entry(1, entry), "[unknown]");
    assert_eq!(table.format_entry(2, entry), "[no data addr]");
    Ok(())
}

#[test]
fn test_unknown_column_surfaces_at_startup() {
    let err = ColumnRegistry::from_list("symbol,lines_of_poetry").unwrap_err();
    assert_eq!(
        err,
        hotpath::HistError::UnknownColumn("lines_of_poetry".to_string())
    );
}
