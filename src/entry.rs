//! Aggregated histogram entries
//!
//! An [`Entry`] is one bucket of samples sharing identical values for the
//! active dimensions. It owns its accumulated [`Stat`] and (optionally) a
//! callchain tree; the thread/map/symbol descriptors in its key are
//! shared `Arc`s whose lifetime belongs to the resolution collaborator.

use crate::callchain::CallchainNode;
use crate::sample::{CpuMode, MapInfo, SampleRecord, SymbolInfo, ThreadInfo};
use std::sync::Arc;

/// Entry was excluded by the active DSO filter
pub const FILTER_DSO: u8 = 1 << 0;
/// Entry was excluded by the active thread filter
pub const FILTER_THREAD: u8 = 1 << 1;
/// Entry was excluded by the active symbol-substring filter
pub const FILTER_SYMBOL: u8 = 1 << 2;

/// Stable handle to an entry within its owning table's arena.
///
/// Handles carry the slot's generation alongside its index: they are
/// non-owning, cheap to copy, and a handle into a torn-down,
/// decayed-away or since-recycled slot resolves to `None` on lookup
/// instead of aliasing the slot's new occupant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

impl EntryId {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

/// Accumulated statistics for one entry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Stat {
    /// Total event period attributed to this bucket
    pub period: u64,
    /// Period split by cpu mode
    pub period_sys: u64,
    pub period_us: u64,
    pub period_guest_sys: u64,
    pub period_guest_us: u64,
    /// Number of samples merged in
    pub nr_events: u64,
    /// Accumulated event weight (e.g. total access latency)
    pub weight: u64,
}

impl Stat {
    /// Fold one sample's contribution in, including the cpu-mode split
    pub fn add_sample(&mut self, period: u64, weight: u64, cpumode: CpuMode) {
        self.period += period;
        self.nr_events += 1;
        self.weight += weight;
        match cpumode {
            CpuMode::Kernel => self.period_sys += period,
            CpuMode::User => self.period_us += period,
            CpuMode::GuestKernel => self.period_guest_sys += period,
            CpuMode::GuestUser => self.period_guest_us += period,
            CpuMode::Unknown => {}
        }
    }

    /// Field-wise merge of another entry's statistics
    pub fn add(&mut self, other: &Stat) {
        self.period += other.period;
        self.period_sys += other.period_sys;
        self.period_us += other.period_us;
        self.period_guest_sys += other.period_guest_sys;
        self.period_guest_us += other.period_guest_us;
        self.nr_events += other.nr_events;
        self.weight += other.weight;
    }

    /// Age every accumulator by `numerator / denominator`, returning the
    /// amount of period removed
    pub fn decay(&mut self, numerator: u64, denominator: u64) -> u64 {
        let old_period = self.period;
        self.period = self.period * numerator / denominator;
        self.period_sys = self.period_sys * numerator / denominator;
        self.period_us = self.period_us * numerator / denominator;
        self.period_guest_sys = self.period_guest_sys * numerator / denominator;
        self.period_guest_us = self.period_guest_us * numerator / denominator;
        self.nr_events = self.nr_events * numerator / denominator;
        self.weight = self.weight * numerator / denominator;
        old_period - self.period
    }

    /// Zero all accumulators, returning the removed period (used when a
    /// zap flag force-decays an entry)
    pub fn zap(&mut self) -> u64 {
        let old_period = self.period;
        *self = Stat::default();
        old_period
    }
}

/// The dimension values that define an entry's identity.
///
/// Which of these fields actually participate in comparisons is decided
/// by the active column registry; the key always carries the full set so
/// formatting never loses information.
#[derive(Debug, Clone)]
pub struct EntryKey {
    pub thread: Arc<ThreadInfo>,
    pub symbol: Option<Arc<SymbolInfo>>,
    pub map: Option<Arc<MapInfo>>,
    pub ip: u64,
    pub data_addr: Option<u64>,
    pub cpumode: CpuMode,
    pub mem_latency: Option<u64>,
}

impl EntryKey {
    pub fn from_sample(sample: &SampleRecord) -> Self {
        Self {
            thread: Arc::clone(&sample.thread),
            symbol: sample.symbol.clone(),
            map: sample.map.clone(),
            ip: sample.ip,
            data_addr: sample.data_addr,
            cpumode: sample.cpumode,
            mem_latency: sample.mem_latency,
        }
    }

    /// Symbol name, or the raw address as a hex placeholder
    pub fn symbol_name(&self) -> String {
        match &self.symbol {
            Some(sym) => sym.name.clone(),
            None => format!("{:#x}", self.ip),
        }
    }

    /// DSO short name, or `[unknown]` when the sample had no map
    pub fn dso_name(&self) -> &str {
        match &self.map {
            Some(map) => &map.dso.short_name,
            None => "[unknown]",
        }
    }

    /// Comparison anchor for the symbol dimension: resolved start address
    /// when a symbol exists, raw ip otherwise
    pub fn symbol_anchor(&self) -> u64 {
        match &self.symbol {
            Some(sym) => sym.start,
            None => self.ip,
        }
    }
}

/// One aggregated bucket of samples
#[derive(Debug, Clone)]
pub struct Entry {
    pub key: EntryKey,
    pub stat: Stat,
    /// Raw accumulated call tree (only when callchains are enabled)
    pub callchain: Option<CallchainNode>,
    /// Pruned copy rebuilt by the output resort for presentation
    pub display_chain: Option<CallchainNode>,
    /// Bitset of `FILTER_*` reasons; non-zero means hidden
    pub filtered: u8,
    /// Created only as a diff placeholder; never counts toward periods
    pub dummy: bool,
    /// Pinned by a drill-down view; decays are skipped while set
    pub used: bool,
    /// Matching entry in the paired table, if any
    pub pair: Option<EntryId>,
    /// 1-based rank recorded by the last `record_positions` call
    pub position: u64,
}

impl Entry {
    /// Build a fresh entry from a sample's resolved key
    pub fn from_sample(sample: &SampleRecord, with_callchain: bool) -> Self {
        let mut stat = Stat::default();
        stat.add_sample(sample.period, sample.weight, sample.cpumode);

        let callchain = if with_callchain {
            let mut root = CallchainNode::root();
            if !sample.callchain.is_empty() {
                root.append(&sample.callchain, sample.period);
            }
            Some(root)
        } else {
            None
        };

        Self {
            key: EntryKey::from_sample(sample),
            stat,
            callchain,
            display_chain: None,
            filtered: 0,
            dummy: false,
            used: false,
            pair: None,
            position: 0,
        }
    }

    /// Build a zero-stat placeholder for a key only present in the
    /// paired table
    pub fn dummy(key: EntryKey) -> Self {
        Self {
            key,
            stat: Stat::default(),
            callchain: None,
            display_chain: None,
            filtered: 0,
            dummy: true,
            used: false,
            pair: None,
            position: 0,
        }
    }

    /// Visible to totals: neither filtered nor a diff placeholder
    pub fn counts_toward_totals(&self) -> bool {
        self.filtered == 0 && !self.dummy
    }

    /// This entry's share of `total`, in percent
    pub fn period_percent(&self, total: u64) -> f64 {
        if total == 0 {
            0.0
        } else {
            self.stat.period as f64 * 100.0 / total as f64
        }
    }
}
