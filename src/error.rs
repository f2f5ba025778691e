//! Error taxonomy for the aggregation engine
//!
//! Only two conditions are actual errors: a bad column list at
//! configuration time and allocation exhaustion during insert/collapse.
//! Everything else (empty tables, decaying an already-empty table,
//! samples with missing optional fields) is a valid steady state.

use thiserror::Error;

/// Errors for histogram table operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HistError {
    /// A dimension name in the column list did not resolve to a known column
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// Allocation failed while growing an index; the caller may abort the
    /// current refresh cycle and retry on the next one
    #[error("out of memory while growing histogram index")]
    OutOfMemory,
}

pub type Result<T> = std::result::Result<T, HistError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_column_display() {
        let err = HistError::UnknownColumn("bogus".to_string());
        assert_eq!(err.to_string(), "unknown column: bogus");
    }

    #[test]
    fn test_out_of_memory_display() {
        let err = HistError::OutOfMemory;
        assert!(err.to_string().contains("out of memory"));
    }

    #[test]
    fn test_error_is_cloneable() {
        let err = HistError::UnknownColumn("x".to_string());
        assert_eq!(err.clone(), err);
    }
}
