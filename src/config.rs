//! Engine configuration
//!
//! Tunables for the aggregation engine: the live-view decay fraction,
//! callchain collection and pruning, and the output sort. Defaults match
//! the classic profiler behavior: 7/8 decay per refresh and a 0.5%
//! minimum callchain percentage in parent-relative mode.

use serde::{Deserialize, Serialize};

/// Exponential decay applied to entry statistics on each live refresh.
///
/// Stored as a fraction so integer arithmetic stays exact:
/// `period = period * numerator / denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecayConfig {
    pub numerator: u64,
    pub denominator: u64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            numerator: 7,
            denominator: 8,
        }
    }
}

/// How callchain percentages are computed when pruning for display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GraphMode {
    /// Percentage of the table-wide total
    Absolute,
    /// Percentage of the parent node's cumulative child hits
    #[default]
    Relative,
}

/// Callchain collection and pruning settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallchainConfig {
    /// Collect per-entry call trees at all (off by default; collection
    /// costs memory proportional to stack diversity)
    pub enabled: bool,
    /// Minimum cumulative hit percentage a path must reach to survive
    /// display pruning
    pub min_percent: f64,
    /// Percentage base used by pruning
    pub mode: GraphMode,
}

impl Default for CallchainConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_percent: 0.5,
            mode: GraphMode::Relative,
        }
    }
}

/// Top-level engine configuration, one per [`crate::table::Table`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    pub decay: DecayConfig,
    pub callchain: CallchainConfig,
}
