//! Grouping dimensions and the ordered column registry
//!
//! A column is one named dimension (symbol, dso, thread, cache line, …)
//! that contributes a key comparator, an optional coarser collapse
//! comparator, and a formatter. A [`ColumnRegistry`] is built once per
//! session from an ordered list of names; entry comparisons fold over
//! the list lexicographically, short-circuiting on the first non-equal
//! dimension.

use crate::entry::{Entry, EntryKey};
use crate::error::{HistError, Result};
use std::cmp::Ordering;

/// Fixed cache line size used by the data-address dimensions
pub const CACHELINE_SIZE: u64 = 64;

/// Cache line base address for a data address
pub fn cacheline(addr: u64) -> u64 {
    addr & !(CACHELINE_SIZE - 1)
}

/// Byte offset of a data address within its cache line
pub fn cacheline_offset(addr: u64) -> u64 {
    addr & (CACHELINE_SIZE - 1)
}

/// One grouping/display dimension
pub trait Column: Send + Sync {
    /// Name used in configuration lists, e.g. `"symbol"`
    fn name(&self) -> &'static str;

    /// Header text for the presentation layer
    fn header(&self) -> &'static str;

    /// Key comparator used by the insertion index
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering;

    /// Collapse comparator; defaults to the key comparator
    fn collapse_compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        self.compare(a, b)
    }

    /// True when `collapse_compare` groups more coarsely than `compare`
    fn needs_collapse(&self) -> bool {
        false
    }

    /// Display text for one entry's value in this dimension
    fn format(&self, entry: &Entry) -> String;
}

/// Thread dimension: keys on tid
struct ThreadColumn;

impl Column for ThreadColumn {
    fn name(&self) -> &'static str {
        "pid"
    }
    fn header(&self) -> &'static str {
        "Pid:Command"
    }
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        a.thread.tid.cmp(&b.thread.tid)
    }
    fn format(&self, entry: &Entry) -> String {
        format!("{}:{}", entry.key.thread.tid, entry.key.thread.comm)
    }
}

/// Command-name dimension: keys on tid but collapses by comm, so two
/// threads of the same program fold together in the collapsed view
struct CommColumn;

impl Column for CommColumn {
    fn name(&self) -> &'static str {
        "comm"
    }
    fn header(&self) -> &'static str {
        "Command"
    }
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        a.thread.tid.cmp(&b.thread.tid)
    }
    fn collapse_compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        a.thread.comm.cmp(&b.thread.comm)
    }
    fn needs_collapse(&self) -> bool {
        true
    }
    fn format(&self, entry: &Entry) -> String {
        entry.key.thread.comm.clone()
    }
}

/// Shared-object dimension
struct DsoColumn;

impl Column for DsoColumn {
    fn name(&self) -> &'static str {
        "dso"
    }
    fn header(&self) -> &'static str {
        "Shared Object"
    }
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        a.dso_name().cmp(b.dso_name())
    }
    fn format(&self, entry: &Entry) -> String {
        entry.key.dso_name().to_string()
    }
}

/// Symbol dimension: keys on the resolved start address (cheap, stable
/// within one map) and collapses by name so the same function in
/// differently loaded maps folds together
struct SymbolColumn;

impl Column for SymbolColumn {
    fn name(&self) -> &'static str {
        "symbol"
    }
    fn header(&self) -> &'static str {
        "Symbol"
    }
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        a.symbol_anchor().cmp(&b.symbol_anchor())
    }
    fn collapse_compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        match (&a.symbol, &b.symbol) {
            (Some(x), Some(y)) => x.name.cmp(&y.name),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.ip.cmp(&b.ip),
        }
    }
    fn needs_collapse(&self) -> bool {
        true
    }
    fn format(&self, entry: &Entry) -> String {
        entry.key.symbol_name()
    }
}

/// Raw instruction address dimension
struct AddressColumn;

impl Column for AddressColumn {
    fn name(&self) -> &'static str {
        "address"
    }
    fn header(&self) -> &'static str {
        "Address"
    }
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        a.ip.cmp(&b.ip)
    }
    fn format(&self, entry: &Entry) -> String {
        format!("{:#018x}", entry.key.ip)
    }
}

/// Data cache line dimension (memory events)
struct CachelineColumn;

impl Column for CachelineColumn {
    fn name(&self) -> &'static str {
        "dcacheline"
    }
    fn header(&self) -> &'static str {
        "Cacheline"
    }
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        cacheline(a.data_addr.unwrap_or(0)).cmp(&cacheline(b.data_addr.unwrap_or(0)))
    }
    fn format(&self, entry: &Entry) -> String {
        match entry.key.data_addr {
            Some(addr) => format!("{:#018x}", cacheline(addr)),
            None => "[no data addr]".to_string(),
        }
    }
}

/// Offset-within-cacheline dimension (memory events)
struct OffsetColumn;

impl Column for OffsetColumn {
    fn name(&self) -> &'static str {
        "offset"
    }
    fn header(&self) -> &'static str {
        "Off"
    }
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        cacheline_offset(a.data_addr.unwrap_or(0)).cmp(&cacheline_offset(b.data_addr.unwrap_or(0)))
    }
    fn format(&self, entry: &Entry) -> String {
        match entry.key.data_addr {
            Some(addr) => format!("{}", cacheline_offset(addr)),
            None => "-".to_string(),
        }
    }
}

/// Memory access latency, bucketed so nearby latencies group together
struct MemLatColumn;

impl MemLatColumn {
    fn bucket(latency: Option<u64>) -> u8 {
        match latency {
            None => 0,
            Some(l) if l < 32 => 1,
            Some(l) if l < 128 => 2,
            Some(l) if l < 512 => 3,
            Some(l) if l < 2048 => 4,
            Some(_) => 5,
        }
    }

    fn bucket_label(bucket: u8) -> &'static str {
        match bucket {
            0 => "-",
            1 => "<32",
            2 => "32-127",
            3 => "128-511",
            4 => "512-2047",
            _ => ">=2048",
        }
    }
}

impl Column for MemLatColumn {
    fn name(&self) -> &'static str {
        "mem_lat"
    }
    fn header(&self) -> &'static str {
        "Latency"
    }
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        Self::bucket(a.mem_latency).cmp(&Self::bucket(b.mem_latency))
    }
    fn format(&self, entry: &Entry) -> String {
        Self::bucket_label(Self::bucket(entry.key.mem_latency)).to_string()
    }
}

/// Privilege level dimension
struct CpuModeColumn;

impl Column for CpuModeColumn {
    fn name(&self) -> &'static str {
        "cpumode"
    }
    fn header(&self) -> &'static str {
        "Mode"
    }
    fn compare(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        a.cpumode.cmp(&b.cpumode)
    }
    fn format(&self, entry: &Entry) -> String {
        entry.key.cpumode.label().to_string()
    }
}

fn resolve(name: &str) -> Option<Box<dyn Column>> {
    match name {
        "pid" => Some(Box::new(ThreadColumn)),
        "comm" => Some(Box::new(CommColumn)),
        "dso" => Some(Box::new(DsoColumn)),
        "symbol" => Some(Box::new(SymbolColumn)),
        "address" => Some(Box::new(AddressColumn)),
        "dcacheline" => Some(Box::new(CachelineColumn)),
        "offset" => Some(Box::new(OffsetColumn)),
        "mem_lat" => Some(Box::new(MemLatColumn)),
        "cpumode" => Some(Box::new(CpuModeColumn)),
        _ => None,
    }
}

/// Ordered set of active dimensions for one session.
///
/// The first dimension is the primary sort key; comparisons fold over
/// the list and short-circuit on the first non-equal result.
pub struct ColumnRegistry {
    columns: Vec<Box<dyn Column>>,
}

impl ColumnRegistry {
    /// Build from an ordered slice of dimension names
    pub fn from_names(names: &[&str]) -> Result<Self> {
        let mut columns = Vec::with_capacity(names.len());
        for name in names {
            match resolve(name) {
                Some(col) => columns.push(col),
                None => return Err(HistError::UnknownColumn((*name).to_string())),
            }
        }
        Ok(Self { columns })
    }

    /// Build from a comma-separated configuration string, e.g.
    /// `"symbol,dso"` (whitespace around names is tolerated)
    pub fn from_list(list: &str) -> Result<Self> {
        let names: Vec<&str> = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();
        Self::from_names(&names)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// True when any active dimension groups more coarsely on collapse
    pub fn needs_collapse(&self) -> bool {
        self.columns.iter().any(|c| c.needs_collapse())
    }

    /// Lexicographic key comparison over the active dimensions
    pub fn compare_key(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        for col in &self.columns {
            let ord = col.compare(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Lexicographic collapse comparison over the active dimensions
    pub fn compare_collapse(&self, a: &EntryKey, b: &EntryKey) -> Ordering {
        for col in &self.columns {
            let ord = col.collapse_compare(a, b);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }

    /// Key comparison restricted to one dimension (display sorts)
    pub fn compare_column(&self, idx: usize, a: &EntryKey, b: &EntryKey) -> Ordering {
        self.columns[idx].compare(a, b)
    }

    /// Format one entry's value in the given dimension
    pub fn format(&self, idx: usize, entry: &Entry) -> String {
        self.columns[idx].format(entry)
    }

    pub fn header(&self, idx: usize) -> &'static str {
        self.columns[idx].header()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.columns.iter().map(|c| c.name()).collect()
    }
}

impl std::fmt::Debug for ColumnRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColumnRegistry")
            .field("columns", &self.names())
            .finish()
    }
}
