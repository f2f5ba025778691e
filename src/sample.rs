//! Resolved sample records
//!
//! The unit of input to the engine. A sample arrives already resolved by
//! the address-resolution collaborator: the engine receives shared
//! thread/map/symbol descriptors as `Arc` clones and never mutates or
//! frees them. Samples with missing optional fields are still valid;
//! absent values simply format as raw hex placeholders downstream.

use std::sync::Arc;

/// Privilege level the sample was taken at
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum CpuMode {
    Kernel,
    User,
    GuestKernel,
    GuestUser,
    Unknown,
}

impl CpuMode {
    /// True for user-level modes (host or guest)
    pub fn is_user(self) -> bool {
        matches!(self, CpuMode::User | CpuMode::GuestUser)
    }

    /// True for kernel-level modes (host or guest)
    pub fn is_kernel(self) -> bool {
        matches!(self, CpuMode::Kernel | CpuMode::GuestKernel)
    }

    /// Short display label, mirroring the one-letter level column
    pub fn label(self) -> &'static str {
        match self {
            CpuMode::Kernel => "k",
            CpuMode::User => ".",
            CpuMode::GuestKernel => "g",
            CpuMode::GuestUser => "u",
            CpuMode::Unknown => "?",
        }
    }
}

/// A thread the resolution collaborator has seen samples from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadInfo {
    pub pid: i32,
    pub tid: i32,
    pub comm: String,
}

impl ThreadInfo {
    pub fn new(pid: i32, tid: i32, comm: &str) -> Self {
        Self {
            pid,
            tid,
            comm: comm.to_string(),
        }
    }
}

/// A loaded binary (DSO) samples can fall into
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsoInfo {
    /// Basename used for display and filtering, e.g. `libc.so`
    pub short_name: String,
    /// Full path on disk
    pub long_name: String,
}

impl DsoInfo {
    pub fn new(short_name: &str, long_name: &str) -> Self {
        Self {
            short_name: short_name.to_string(),
            long_name: long_name.to_string(),
        }
    }
}

/// One mapping of a DSO into an address space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapInfo {
    pub dso: Arc<DsoInfo>,
    pub start: u64,
    pub end: u64,
    pub pgoff: u64,
}

impl MapInfo {
    pub fn new(dso: Arc<DsoInfo>, start: u64, end: u64) -> Self {
        Self {
            dso,
            start,
            end,
            pgoff: 0,
        }
    }
}

/// A resolved symbol within a DSO
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolInfo {
    pub name: String,
    pub start: u64,
    pub end: u64,
}

impl SymbolInfo {
    pub fn new(name: &str, start: u64, end: u64) -> Self {
        Self {
            name: name.to_string(),
            start,
            end,
        }
    }
}

/// One resolved call-stack frame (or branch endpoint)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFrame {
    pub ip: u64,
    pub symbol: Option<Arc<SymbolInfo>>,
    pub map: Option<Arc<MapInfo>>,
}

impl ResolvedFrame {
    pub fn new(ip: u64) -> Self {
        Self {
            ip,
            symbol: None,
            map: None,
        }
    }

    pub fn with_symbol(mut self, symbol: Arc<SymbolInfo>) -> Self {
        self.symbol = Some(symbol);
        self
    }

    /// Stable merge key: symbol start when resolved, raw ip otherwise
    pub fn merge_key(&self) -> u64 {
        match &self.symbol {
            Some(sym) => sym.start,
            None => self.ip,
        }
    }
}

/// A taken branch annotation (from/to endpoints)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchInfo {
    pub from: ResolvedFrame,
    pub to: ResolvedFrame,
}

/// A fully resolved sample, ready for [`crate::table::Table`] insertion
#[derive(Debug, Clone)]
pub struct SampleRecord {
    pub thread: Arc<ThreadInfo>,
    /// Instruction address the counter overflowed at
    pub ip: u64,
    pub symbol: Option<Arc<SymbolInfo>>,
    pub map: Option<Arc<MapInfo>>,
    /// Data address for memory events (loads/stores)
    pub data_addr: Option<u64>,
    pub data_symbol: Option<Arc<SymbolInfo>>,
    pub data_map: Option<Arc<MapInfo>>,
    /// Event count this sample stands for
    pub period: u64,
    /// Event weight (e.g. memory access latency in cycles)
    pub weight: u64,
    pub cpumode: CpuMode,
    pub branch: Option<BranchInfo>,
    /// Memory access latency, used by the latency-bucket column
    pub mem_latency: Option<u64>,
    /// Resolved call stack, root (outermost caller) first
    pub callchain: Vec<ResolvedFrame>,
    pub txn_flags: Option<u64>,
}

impl SampleRecord {
    pub fn new(thread: Arc<ThreadInfo>, ip: u64, period: u64, cpumode: CpuMode) -> Self {
        Self {
            thread,
            ip,
            symbol: None,
            map: None,
            data_addr: None,
            data_symbol: None,
            data_map: None,
            period,
            weight: 0,
            cpumode,
            branch: None,
            mem_latency: None,
            callchain: Vec::new(),
            txn_flags: None,
        }
    }

    pub fn with_symbol(mut self, symbol: Arc<SymbolInfo>) -> Self {
        self.symbol = Some(symbol);
        self
    }

    pub fn with_map(mut self, map: Arc<MapInfo>) -> Self {
        self.map = Some(map);
        self
    }

    pub fn with_weight(mut self, weight: u64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_data_addr(mut self, addr: u64) -> Self {
        self.data_addr = Some(addr);
        self
    }

    pub fn with_mem_latency(mut self, latency: u64) -> Self {
        self.mem_latency = Some(latency);
        self
    }

    pub fn with_callchain(mut self, frames: Vec<ResolvedFrame>) -> Self {
        self.callchain = frames;
        self
    }

    pub fn with_branch(mut self, from: ResolvedFrame, to: ResolvedFrame) -> Self {
        self.branch = Some(BranchInfo { from, to });
        self
    }
}
