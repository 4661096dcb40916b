//! Lookup loader: streams the port/protocol → tag table into the store
//!
//! Rows are parsed lazily and written in fixed-size batches through
//! [`UpsertWriter::upsert_tags`]. A malformed row is skipped; a batch the store
//! rejects is rolled back, logged, and loading continues with the next batch.
//! Strict mode turns both into errors.

use super::record::{HeaderError, LookupColumns, LookupRows, RowError};
use super::{MAX_PREALLOCATED, MAX_ROW_WARNINGS};
use crate::model::LookupRow;
use crate::store::{StoreError, UpsertWriter};
use serde::Serialize;
use std::io::BufRead;
use std::path::Path;
use thiserror::Error;

/// Default lookup batch size
pub const DEFAULT_LOOKUP_BATCH_SIZE: usize = 3;

#[derive(Debug, Error)]
pub enum LoaderError {
    #[error("Lookup header error: {0}")]
    Header(#[from] HeaderError),

    #[error("Lookup read error: {0}")]
    Read(RowError),

    #[error("Strict lookup mode: malformed row: {0}")]
    StrictRow(RowError),

    #[error("Strict lookup mode: batch ending at row {row} failed: {source}")]
    StrictBatch {
        row: u64,
        #[source]
        source: StoreError,
    },
}

/// Counters reported after a lookup load
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    /// Data rows seen, including malformed rows and duplicate keys
    pub rows_observed: u64,
    /// Rows written in committed batches
    pub rows_loaded: u64,
    /// Malformed rows skipped
    pub rows_skipped: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
}

/// Batched lookup-table loader
#[derive(Debug, Clone)]
pub struct LookupLoader {
    batch_size: usize,
    delimiter: char,
    columns: LookupColumns,
    strict: bool,
    resolve_protocols: bool,
}

impl Default for LookupLoader {
    fn default() -> Self {
        Self::new(DEFAULT_LOOKUP_BATCH_SIZE)
    }
}

impl LookupLoader {
    /// `batch_size` is clamped to at least 1
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            delimiter: ',',
            columns: LookupColumns::default(),
            strict: false,
            resolve_protocols: false,
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_columns(mut self, columns: LookupColumns) -> Self {
        self.columns = columns;
        self
    }

    /// Abort on the first malformed row or failed batch
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Map numeric protocol columns to IANA keywords, matching the aggregator
    pub fn resolve_protocols(mut self, resolve: bool) -> Self {
        self.resolve_protocols = resolve;
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Load the lookup file at `path`
    pub fn load<W: UpsertWriter + ?Sized>(&self, path: impl AsRef<Path>, writer: &mut W) -> Result<LoadStats, LoaderError> {
        let path = path.as_ref();
        log::info!("Loading lookup table: {}", path.display());

        let rows = LookupRows::open(path, self.delimiter, &self.columns)?.resolve_protocols(self.resolve_protocols);
        self.load_rows(rows, writer)
    }

    /// Load from any buffered reader (header row first)
    pub fn load_reader<R: BufRead, W: UpsertWriter + ?Sized>(&self, reader: R, writer: &mut W) -> Result<LoadStats, LoaderError> {
        let rows = LookupRows::new(reader, self.delimiter, &self.columns)?.resolve_protocols(self.resolve_protocols);
        self.load_rows(rows, writer)
    }

    fn load_rows<R: BufRead, W: UpsertWriter + ?Sized>(
        &self,
        rows: LookupRows<R>,
        writer: &mut W,
    ) -> Result<LoadStats, LoaderError> {
        let mut stats = LoadStats::default();
        let mut batch: Vec<LookupRow> = Vec::with_capacity(self.batch_size.min(MAX_PREALLOCATED));

        for result in rows {
            let row = match result {
                Ok(row) => row,
                Err(e) if e.is_fatal() => {
                    // Keep what was already parsed before giving up on the file
                    self.flush(&mut batch, writer, &mut stats)?;
                    log::error!("Lookup load stopped early: {}", e);
                    return Err(LoaderError::Read(e));
                }
                Err(e) => {
                    stats.rows_observed += 1;
                    stats.rows_skipped += 1;
                    if self.strict {
                        return Err(LoaderError::StrictRow(e));
                    }
                    if stats.rows_skipped <= MAX_ROW_WARNINGS {
                        log::warn!("Skipping malformed lookup row: {}", e);
                    } else {
                        log::debug!("Skipping malformed lookup row: {}", e);
                    }
                    continue;
                }
            };

            stats.rows_observed += 1;
            batch.push(row);

            if batch.len() >= self.batch_size {
                self.flush(&mut batch, writer, &mut stats)?;
            }
        }

        self.flush(&mut batch, writer, &mut stats)?;

        log::info!(
            "Lookup table loaded: {} rows observed, {} loaded, {} skipped, {} failed batches",
            stats.rows_observed,
            stats.rows_loaded,
            stats.rows_skipped,
            stats.batches_failed
        );
        Ok(stats)
    }

    /// Write and clear the pending batch; failures are logged unless strict
    fn flush<W: UpsertWriter + ?Sized>(
        &self,
        batch: &mut Vec<LookupRow>,
        writer: &mut W,
        stats: &mut LoadStats,
    ) -> Result<(), LoaderError> {
        if batch.is_empty() {
            return Ok(());
        }

        match writer.upsert_tags(batch) {
            Ok(written) => {
                stats.rows_loaded += written as u64;
                stats.batches_written += 1;
            }
            Err(source) => {
                stats.batches_failed += 1;
                if self.strict {
                    return Err(LoaderError::StrictBatch {
                        row: stats.rows_observed,
                        source,
                    });
                }
                log::error!(
                    "Lookup batch of {} rows rolled back ({}): {}",
                    batch.len(),
                    writer.backend_type(),
                    source
                );
            }
        }

        batch.clear();
        Ok(())
    }
}
