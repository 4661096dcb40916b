//! Flow tally store
//!
//! The store is the only synchronization point between ingestion and reporting:
//!
//! ```text
//! LookupLoader ──┐                         ┌── tag report
//!                ├─ UpsertWriter ─ flowlog ─ ReportSource ─┤
//! LogAggregator ─┘                         └── port/protocol report
//! ```
//!
//! Writers go through [`UpsertWriter`], readers through [`ReportSource`]. Both are
//! implemented by [`SqliteFlowStore`].

pub mod schema;
pub mod sqlite;

pub use sqlite::SqliteFlowStore;

use crate::model::{CountDelta, LookupRow, PortProtocolCount, TagCount};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Count for {key} does not fit in a signed 64-bit column: {value}")]
    CountOverflow { key: String, value: u64 },

    #[error("Invalid row in flowlog: {0}")]
    InvalidRow(String),
}

/// Batched write primitive used by both the lookup loader and the log aggregator
///
/// Every call is one transaction: either the whole batch is applied or none of it.
pub trait UpsertWriter {
    /// Merge-increment counts.
    ///
    /// Operation: INSERT ... ON CONFLICT(port, protocol) DO UPDATE SET count = count + delta
    /// - Existing key: `count += delta`, tag untouched
    /// - New key: inserted with `count = delta` and the untagged sentinel
    ///
    /// Returns the number of records applied.
    fn upsert_counts(&mut self, batch: &[CountDelta]) -> Result<usize, StoreError>;

    /// Insert-or-define tags.
    ///
    /// Operation: INSERT ... ON CONFLICT(port, protocol) DO UPDATE SET tag = excluded.tag
    /// - Existing key: tag overwritten (last write wins), count untouched
    /// - New key: inserted with `count = 0`
    fn upsert_tags(&mut self, batch: &[LookupRow]) -> Result<usize, StoreError>;

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}

/// Offset-based page request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub limit: usize,
    pub offset: usize,
}

impl Page {
    pub fn first(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }

    pub fn next(self) -> Self {
        Self {
            limit: self.limit,
            offset: self.offset.saturating_add(self.limit),
        }
    }
}

/// Paginated read access for the report generator
///
/// Both queries are totally ordered so consecutive pages never overlap or skip.
pub trait ReportSource {
    /// Tags with a positive total, grouped case-insensitively, ordered by tag
    fn tag_counts(&self, page: Page) -> Result<Vec<TagCount>, StoreError>;

    /// Keys with a positive count, ordered by port then protocol
    fn port_protocol_counts(&self, page: Page) -> Result<Vec<PortProtocolCount>, StoreError>;
}
