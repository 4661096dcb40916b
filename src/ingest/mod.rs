//! Ingestion: lookup table and flow logs into the store
//!
//! ```text
//! lookup.csv ─ LookupRows ─ LookupLoader ─┐
//!                                          ├─ UpsertWriter
//! flow.log ─ FlowRecords ─ LogAggregator ─┘
//! ```

pub mod log_aggregator;
pub mod lookup_loader;
pub mod protocol;
pub mod record;

pub use log_aggregator::{AggregateError, AggregateStats, LogAggregator};
pub use lookup_loader::{LoadStats, LoaderError, LookupLoader};
pub use record::{FlowRecords, LookupColumns, LookupRows, RowError};

/// Malformed rows logged at warn level before dropping to debug
pub const MAX_ROW_WARNINGS: u64 = 10;

/// Upper bound on buffer preallocation; batch sizes beyond it grow on demand
pub const MAX_PREALLOCATED: usize = 4096;
