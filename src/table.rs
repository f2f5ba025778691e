//! The histogram table
//!
//! A [`Table`] owns everything for one requested view: a double-buffered
//! producer-side input index, the consumer-side entry arena with its
//! collapsed and output indices, running totals, and the active filter
//! predicates.
//!
//! Concurrency model: one producer thread inserts through a
//! [`Collector`] handle while one consumer thread drives
//! `collapse`/`resort`/`decay`/filters with `&mut Table`. The only
//! contended state is which input buffer is current; `collapse` holds
//! that lock for a buffer swap only, so the producer never waits out a
//! whole collapse or resort pass. Batch (single-threaded) use calls
//! `insert` on the table directly.

use crate::column::ColumnRegistry;
use crate::config::EngineConfig;
use crate::entry::{Entry, EntryId, EntryKey, FILTER_DSO, FILTER_SYMBOL, FILTER_THREAD};
use crate::error::{HistError, Result};
use crate::sample::SampleRecord;
use std::cmp::Ordering;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

/// Display ordering for the output index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputSort {
    /// Accumulated period, descending (the classic overhead sort)
    #[default]
    Period,
    /// A registered column's key order, by registry index
    Column(usize),
}

/// Double-buffered input: the producer merges into `current` while the
/// consumer drains the previously swapped-out buffer
struct InputBuffers {
    current: Vec<Entry>,
    standby: Vec<Entry>,
}

/// Producer-facing half of a table
struct SampleInput {
    buffers: Mutex<InputBuffers>,
    total_period: AtomicU64,
    nr_samples: AtomicU64,
}

impl SampleInput {
    fn new() -> Self {
        Self {
            buffers: Mutex::new(InputBuffers {
                current: Vec::new(),
                standby: Vec::new(),
            }),
            total_period: AtomicU64::new(0),
            nr_samples: AtomicU64::new(0),
        }
    }

    /// Merge one sample under the input lock. The lock is held for a
    /// binary search plus at most one element splice.
    fn insert(&self, registry: &ColumnRegistry, sample: &SampleRecord, callchain: bool) -> Result<()> {
        let key = EntryKey::from_sample(sample);
        let mut buffers = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        let current = &mut buffers.current;
        match current.binary_search_by(|e| registry.compare_key(&e.key, &key)) {
            Ok(idx) => {
                let entry = &mut current[idx];
                entry.stat.add_sample(sample.period, sample.weight, sample.cpumode);
                if let Some(chain) = entry.callchain.as_mut() {
                    if !sample.callchain.is_empty() {
                        chain.append(&sample.callchain, sample.period);
                    }
                }
            }
            Err(idx) => {
                current
                    .try_reserve(1)
                    .map_err(|_| HistError::OutOfMemory)?;
                current.insert(idx, Entry::from_sample(sample, callchain));
            }
        }
        drop(buffers);

        self.total_period
            .fetch_add(sample.period, AtomicOrdering::Relaxed);
        self.nr_samples.fetch_add(1, AtomicOrdering::Relaxed);
        Ok(())
    }

    /// Swap buffers under the lock and hand the filled one to the
    /// consumer; the standby (drained last cycle) becomes current
    fn take(&self) -> Vec<Entry> {
        let mut buffers = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let standby = std::mem::take(&mut buffers.standby);
        std::mem::replace(&mut buffers.current, standby)
    }

    /// Return a drained buffer so its capacity is reused next cycle
    fn give_back(&self, mut drained: Vec<Entry>) {
        drained.clear();
        let mut buffers = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        buffers.standby = drained;
    }
}

/// Cloneable producer handle for live mode
#[derive(Clone)]
pub struct Collector {
    registry: Arc<ColumnRegistry>,
    input: Arc<SampleInput>,
    callchain: bool,
}

impl Collector {
    /// Merge one resolved sample into the owning table's current input
    /// buffer
    pub fn insert(&self, sample: &SampleRecord) -> Result<()> {
        self.input.insert(&self.registry, sample, self.callchain)
    }
}

/// One histogram view: keyed aggregation, collapse, ordered output,
/// decay, filtering and totals
pub struct Table {
    registry: Arc<ColumnRegistry>,
    config: EngineConfig,
    input: Arc<SampleInput>,

    /// Entry arena; indices below hold stable ids into it. Each slot's
    /// generation is bumped on release so recycled slots invalidate
    /// handles handed out before the reuse.
    entries: Vec<Option<Entry>>,
    generations: Vec<u32>,
    free: Vec<u32>,
    nr_entries: u64,

    /// Sorted by the registry's collapse comparator
    collapsed: Vec<EntryId>,
    /// Display order, rebuilt by `resort`
    output: Vec<EntryId>,
    output_sort: OutputSort,

    col_widths: Vec<usize>,

    non_filtered_period: u64,
    nr_non_filtered_entries: u64,

    dso_filter: Option<String>,
    thread_filter: Option<i32>,
    symbol_filter: Option<String>,
}

impl Table {
    pub fn new(registry: Arc<ColumnRegistry>, config: EngineConfig) -> Self {
        let col_widths = (0..registry.len())
            .map(|i| registry.header(i).len())
            .collect();
        Self {
            registry,
            config,
            input: Arc::new(SampleInput::new()),
            entries: Vec::new(),
            generations: Vec::new(),
            free: Vec::new(),
            nr_entries: 0,
            collapsed: Vec::new(),
            output: Vec::new(),
            output_sort: OutputSort::default(),
            col_widths,
            non_filtered_period: 0,
            nr_non_filtered_entries: 0,
            dso_filter: None,
            thread_filter: None,
            symbol_filter: None,
        }
    }

    /// Producer handle for live mode; clones share this table's input
    pub fn collector(&self) -> Collector {
        Collector {
            registry: Arc::clone(&self.registry),
            input: Arc::clone(&self.input),
            callchain: self.config.callchain.enabled,
        }
    }

    /// Merge one resolved sample (batch mode; live producers go through
    /// [`Table::collector`])
    pub fn insert(&self, sample: &SampleRecord) -> Result<()> {
        self.input
            .insert(&self.registry, sample, self.config.callchain.enabled)
    }

    pub fn registry(&self) -> &ColumnRegistry {
        &self.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Change the display ordering used by subsequent resorts. A column
    /// index past the registry falls back to period order.
    pub fn set_output_sort(&mut self, sort: OutputSort) {
        self.output_sort = match sort {
            OutputSort::Column(idx) if idx >= self.registry.len() => OutputSort::Period,
            other => other,
        };
    }

    // --- arena -----------------------------------------------------------

    fn alloc(&mut self, entry: Entry) -> EntryId {
        self.nr_entries += 1;
        match self.free.pop() {
            Some(index) => {
                self.entries[index as usize] = Some(entry);
                EntryId {
                    index,
                    generation: self.generations[index as usize],
                }
            }
            None => {
                let index = self.entries.len() as u32;
                self.entries.push(Some(entry));
                self.generations.push(0);
                EntryId {
                    index,
                    generation: 0,
                }
            }
        }
    }

    fn release(&mut self, id: EntryId) {
        if !self.is_live(id) {
            return;
        }
        if let Some(slot) = self.entries.get_mut(id.index()) {
            if slot.take().is_some() {
                self.nr_entries -= 1;
                self.generations[id.index()] += 1;
                self.free.push(id.index);
            }
        }
    }

    fn is_live(&self, id: EntryId) -> bool {
        self.generations.get(id.index()).copied() == Some(id.generation)
    }

    /// Resolve a handle; `None` when the entry has been decayed away or
    /// its slot has since been recycled for another entry
    pub fn entry(&self, id: EntryId) -> Option<&Entry> {
        if !self.is_live(id) {
            return None;
        }
        self.entries.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn entry_mut(&mut self, id: EntryId) -> Option<&mut Entry> {
        if !self.is_live(id) {
            return None;
        }
        self.entries.get_mut(id.index()).and_then(Option::as_mut)
    }

    /// Pin or unpin an entry (pinned entries are skipped by decay)
    pub fn set_used(&mut self, id: EntryId, used: bool) {
        if let Some(entry) = self.entry_mut(id) {
            entry.used = used;
        }
    }

    // --- collapse --------------------------------------------------------

    /// Drain the producer's input buffer into the collapsed index,
    /// re-keying with the collapse comparator and merging collisions.
    ///
    /// The input lock is held only for the buffer swap. When no active
    /// dimension groups more coarsely, the collapse comparator equals the
    /// key comparator and this pass degenerates to publishing the new
    /// entries to the consumer side.
    pub fn collapse(&mut self) {
        let drained = self.input.take();
        if drained.is_empty() {
            self.input.give_back(drained);
            return;
        }
        let nr_in = drained.len();

        let mut buffer = drained;
        for entry in buffer.drain(..) {
            self.collapse_insert(entry);
        }
        self.input.give_back(buffer);

        debug!(
            drained = nr_in,
            collapsed = self.collapsed.len(),
            "collapse pass complete"
        );
    }

    fn collapse_insert(&mut self, mut incoming: Entry) {
        let pos = self.lookup_collapsed_pos(&incoming.key);
        match pos {
            Ok(idx) => {
                let id = self.collapsed[idx];
                if let Some(survivor) = self.entry_mut(id) {
                    survivor.stat.add(&incoming.stat);
                    if let (Some(mine), Some(theirs)) =
                        (survivor.callchain.as_mut(), incoming.callchain.take())
                    {
                        mine.merge(theirs);
                    }
                }
            }
            Err(idx) => {
                // Collapsing may combine entries that individually passed
                // or failed a filter, so freshly keyed survivors get the
                // predicates re-applied here.
                incoming.filtered = self.compute_filtered(&incoming);
                let id = self.alloc(incoming);
                self.collapsed.insert(idx, id);
            }
        }
    }

    fn lookup_collapsed_pos(&self, key: &EntryKey) -> std::result::Result<usize, usize> {
        self.collapsed.binary_search_by(|&id| {
            match self.entry(id) {
                Some(e) => self.registry.compare_collapse(&e.key, key),
                // Dead ids are purged eagerly; treat as less-than so the
                // search stays total if one ever leaks through.
                None => Ordering::Less,
            }
        })
    }

    /// Collapse-index lookup by key (pairing uses this)
    pub(crate) fn lookup_collapsed(&self, key: &EntryKey) -> Option<EntryId> {
        self.lookup_collapsed_pos(key).ok().map(|idx| self.collapsed[idx])
    }

    pub(crate) fn collapsed_ids(&self) -> &[EntryId] {
        &self.collapsed
    }

    /// Insert a zero-stat placeholder at `key`, or return the existing
    /// entry when the key is already present
    pub(crate) fn lookup_or_insert_dummy(&mut self, key: EntryKey) -> EntryId {
        match self.lookup_collapsed_pos(&key) {
            Ok(idx) => self.collapsed[idx],
            Err(idx) => {
                let mut entry = Entry::dummy(key);
                entry.filtered = self.compute_filtered(&entry);
                let id = self.alloc(entry);
                self.collapsed.insert(idx, id);
                id
            }
        }
    }

    // --- output sort -----------------------------------------------------

    /// Rebuild the output index in display order, recomputing column
    /// widths, non-filtered totals and pruned display callchains
    pub fn resort(&mut self) {
        self.resort_with_stop(|| false);
    }

    /// Like [`Table::resort`], but `should_stop` is polled between
    /// entries; an abandoned pass leaves the output index holding the
    /// entries processed so far, each move atomic with respect to the
    /// index. Returns false when the pass was abandoned.
    pub fn resort_with_stop(&mut self, mut should_stop: impl FnMut() -> bool) -> bool {
        let total = self.total_period();
        let min_percent = self.config.callchain.min_percent;
        let graph_mode = self.config.callchain.mode;

        let mut out: Vec<EntryId> = Vec::with_capacity(self.collapsed.len());
        let mut widths: Vec<usize> = (0..self.registry.len())
            .map(|i| self.registry.header(i).len())
            .collect();
        let mut nf_period = 0u64;
        let mut nf_entries = 0u64;
        let mut completed = true;

        let ids: Vec<EntryId> = self.collapsed.clone();
        for id in ids {
            if should_stop() {
                completed = false;
                break;
            }
            if let Some(entry) = self.entry_mut(id) {
                if entry.callchain.is_some() && !entry.dummy {
                    entry.display_chain = entry
                        .callchain
                        .as_ref()
                        .map(|c| c.pruned(total, min_percent, graph_mode));
                }
            }

            let Some(entry) = self.entry(id) else { continue };
            for (idx, width) in widths.iter_mut().enumerate() {
                let len = self.registry.format(idx, entry).len();
                if len > *width {
                    *width = len;
                }
            }
            if entry.counts_toward_totals() {
                nf_period += entry.stat.period;
            }
            if entry.filtered == 0 {
                nf_entries += 1;
            }
            out.push(id);
        }

        // Stable sort keeps collapse order on ties
        let entries = &self.entries;
        let registry = &self.registry;
        let sort = self.output_sort;
        out.sort_by(|&a, &b| {
            let (Some(ea), Some(eb)) = (
                entries.get(a.index()).and_then(Option::as_ref),
                entries.get(b.index()).and_then(Option::as_ref),
            ) else {
                return Ordering::Equal;
            };
            match sort {
                OutputSort::Period => eb.stat.period.cmp(&ea.stat.period),
                OutputSort::Column(idx) => registry.compare_column(idx, &ea.key, &eb.key),
            }
        });

        self.output = out;
        self.col_widths = widths;
        self.non_filtered_period = nf_period;
        self.nr_non_filtered_entries = nf_entries;

        debug!(
            entries = self.output.len(),
            completed, "output resort complete"
        );
        completed
    }

    /// Record 1-based display positions on every output entry, used by
    /// the diff displacement helper
    pub fn record_positions(&mut self) {
        let ids: Vec<EntryId> = self.output.clone();
        for (rank, id) in ids.into_iter().enumerate() {
            if let Some(entry) = self.entry_mut(id) {
                entry.position = rank as u64 + 1;
            }
        }
    }

    // --- decay -----------------------------------------------------------

    /// Age every unpinned output entry by the configured decay fraction;
    /// entries matching a zap flag are zeroed outright. Entries whose
    /// period reaches zero are erased from the arena and every index.
    pub fn decay(&mut self, zap_user: bool, zap_kernel: bool) {
        self.decay_with_stop(zap_user, zap_kernel, || false);
    }

    /// Like [`Table::decay`], but `should_stop` is polled between
    /// entries; an abandoned pass leaves already-processed entries
    /// decayed and the rest untouched. Returns false when abandoned.
    pub fn decay_with_stop(
        &mut self,
        zap_user: bool,
        zap_kernel: bool,
        mut should_stop: impl FnMut() -> bool,
    ) -> bool {
        let (num, den) = (self.config.decay.numerator, self.config.decay.denominator);
        let mut removed_total = 0u64;
        let mut nf_removed = 0u64;
        let mut dead: Vec<EntryId> = Vec::new();
        let mut completed = true;

        let ids: Vec<EntryId> = self.output.clone();
        for id in ids {
            if should_stop() {
                completed = false;
                break;
            }
            let Some(entry) = self.entry_mut(id) else {
                continue;
            };
            if entry.used {
                continue;
            }

            let zap = (zap_user && entry.key.cpumode.is_user())
                || (zap_kernel && entry.key.cpumode.is_kernel());
            let removed = if zap {
                entry.stat.zap()
            } else {
                entry.stat.decay(num, den)
            };

            removed_total += removed;
            if entry.counts_toward_totals() {
                nf_removed += removed;
            }
            if entry.stat.period == 0 {
                dead.push(id);
            }
        }

        // The non-filtered total is a snapshot from the last resort and
        // can lag behind entries that grew via collapse since; saturate
        // rather than trust it. The next resort recomputes it exactly.
        self.non_filtered_period = self.non_filtered_period.saturating_sub(nf_removed);

        if !dead.is_empty() {
            for &id in &dead {
                if let Some(entry) = self.entry(id) {
                    if entry.filtered == 0 {
                        self.nr_non_filtered_entries -= 1;
                    }
                }
                self.release(id);
            }
            self.collapsed.retain(|id| !dead.contains(id));
            self.output.retain(|id| !dead.contains(id));
        }

        self.input
            .total_period
            .fetch_sub(removed_total, AtomicOrdering::Relaxed);

        debug!(
            removed_period = removed_total,
            erased = dead.len(),
            completed,
            "decay pass complete"
        );
        completed
    }

    // --- filters ---------------------------------------------------------

    /// Filter by DSO short name; `None` clears the filter
    pub fn filter_by_dso(&mut self, dso: Option<&str>) {
        self.dso_filter = dso.map(str::to_string);
        self.apply_filters();
    }

    /// Filter by thread id; `None` clears the filter
    pub fn filter_by_thread(&mut self, tid: Option<i32>) {
        self.thread_filter = tid;
        self.apply_filters();
    }

    /// Filter by symbol-name substring; `None` clears the filter
    pub fn filter_by_symbol(&mut self, substring: Option<&str>) {
        self.symbol_filter = substring.map(str::to_string);
        self.apply_filters();
    }

    fn compute_filtered(&self, entry: &Entry) -> u8 {
        let mut filtered = 0u8;
        if let Some(dso) = &self.dso_filter {
            let matches = entry
                .key
                .map
                .as_ref()
                .is_some_and(|m| m.dso.short_name == *dso);
            if !matches {
                filtered |= FILTER_DSO;
            }
        }
        if let Some(tid) = self.thread_filter {
            if entry.key.thread.tid != tid {
                filtered |= FILTER_THREAD;
            }
        }
        if let Some(needle) = &self.symbol_filter {
            let matches = entry
                .key
                .symbol
                .as_ref()
                .is_some_and(|s| s.name.contains(needle.as_str()));
            if !matches {
                filtered |= FILTER_SYMBOL;
            }
        }
        filtered
    }

    /// Re-evaluate every output entry against the active predicates and
    /// rebuild the non-filtered totals from scratch. Recomputing rather
    /// than adjusting makes re-applying the same filter state a no-op.
    fn apply_filters(&mut self) {
        let mut nf_period = 0u64;
        let mut nf_entries = 0u64;

        let ids: Vec<EntryId> = self.output.clone();
        for id in ids {
            let filtered = match self.entry(id) {
                Some(entry) => self.compute_filtered(entry),
                None => continue,
            };
            let Some(entry) = self.entry_mut(id) else {
                continue;
            };
            entry.filtered = filtered;
            if entry.counts_toward_totals() {
                nf_period += entry.stat.period;
            }
            if entry.filtered == 0 {
                nf_entries += 1;
            }
        }

        self.non_filtered_period = nf_period;
        self.nr_non_filtered_entries = nf_entries;
    }

    /// Re-derive display column widths without resorting, for the
    /// presentation layer's explicit recompute trigger
    pub fn recompute_col_widths(&mut self) {
        let mut widths: Vec<usize> = (0..self.registry.len())
            .map(|i| self.registry.header(i).len())
            .collect();
        for &id in &self.output {
            if let Some(entry) = self.entry(id) {
                for (idx, width) in widths.iter_mut().enumerate() {
                    let len = self.registry.format(idx, entry).len();
                    if len > *width {
                        *width = len;
                    }
                }
            }
        }
        self.col_widths = widths;
    }

    // --- accessors -------------------------------------------------------

    /// Total period of all samples ever inserted, less decayed amounts
    pub fn total_period(&self) -> u64 {
        self.input.total_period.load(AtomicOrdering::Relaxed)
    }

    /// Total period over visible (non-filtered, non-dummy) entries
    pub fn total_non_filtered_period(&self) -> u64 {
        self.non_filtered_period
    }

    /// Number of samples ever inserted
    pub fn nr_samples(&self) -> u64 {
        self.input.nr_samples.load(AtomicOrdering::Relaxed)
    }

    /// Live entries in the arena (dummies included)
    pub fn nr_entries(&self) -> u64 {
        self.nr_entries
    }

    pub fn nr_non_filtered_entries(&self) -> u64 {
        self.nr_non_filtered_entries
    }

    /// Display width for one column, at least the header width
    pub fn col_width(&self, idx: usize) -> usize {
        self.col_widths.get(idx).copied().unwrap_or(0)
    }

    /// Formatted text for one entry in one column
    pub fn format_entry(&self, idx: usize, entry: &Entry) -> String {
        self.registry.format(idx, entry)
    }

    /// Ordered iteration over the output index, yielding 1-based rank
    /// and entry
    pub fn iter_output(&self) -> impl Iterator<Item = (usize, &Entry)> {
        self.output
            .iter()
            .filter_map(|&id| self.entry(id))
            .enumerate()
            .map(|(i, e)| (i + 1, e))
    }

    /// Handles of the output index in display order
    pub fn output_ids(&self) -> &[EntryId] {
        &self.output
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Table")
            .field("columns", &self.registry.names())
            .field("nr_entries", &self.nr_entries)
            .field("total_period", &self.total_period())
            .finish()
    }
}
