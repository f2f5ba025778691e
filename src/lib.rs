//! Hotpath - histogram aggregation engine for sampling profilers
//!
//! This library turns a stream of resolved samples into ranked,
//! filterable, mergeable histograms. It accepts one sample at a time,
//! groups samples into entries keyed by a configurable list of
//! dimensions, collapses entries into coarser buckets, produces a
//! totally ordered output view, and supports live decay, lossless
//! filtering and diff pairing between two independently built tables.
//!
//! Sample acquisition, symbol resolution and presentation are external
//! collaborators: the engine consumes already-resolved
//! [`sample::SampleRecord`]s and exposes an ordered iteration and
//! formatting contract for renderers to drive.

pub mod callchain;
pub mod column;
pub mod config;
pub mod entry;
pub mod error;
pub mod pairing;
pub mod sample;
pub mod table;

pub use column::ColumnRegistry;
pub use config::EngineConfig;
pub use entry::{Entry, EntryId, Stat};
pub use error::{HistError, Result};
pub use sample::{CpuMode, SampleRecord};
pub use table::{Collector, OutputSort, Table};
