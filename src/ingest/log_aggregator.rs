//! Log aggregator: streams a flow-log file into per-key counts
//!
//! Keys are tallied in an in-memory map. After each increment, if the map holds
//! more than `batch_threshold` distinct keys it is flushed through
//! [`UpsertWriter::upsert_counts`] and cleared. Whatever remains at end of input
//! is flushed once more. Where the flushes fall never changes the final counts,
//! only the write pattern.

use super::record::{FlowRecords, RowError};
use super::{MAX_PREALLOCATED, MAX_ROW_WARNINGS};
use crate::model::{CountDelta, FlowKey};
use crate::store::UpsertWriter;
use serde::Serialize;
use std::collections::HashMap;
use std::io::{self, BufRead};
use std::path::Path;
use thiserror::Error;

/// Default distinct-key threshold
pub const DEFAULT_AGGREGATE_BATCH_SIZE: usize = 2;

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("Failed to open flow log: {0}")]
    Open(#[from] io::Error),

    #[error("Flow log read error: {0}")]
    Read(RowError),
}

/// Counters reported after aggregation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateStats {
    /// Non-blank lines seen
    pub lines_read: u64,
    /// Lines that produced a key
    pub lines_parsed: u64,
    /// Malformed lines skipped
    pub lines_skipped: u64,
    /// Sum of deltas in committed batches
    pub counts_flushed: u64,
    /// Sum of deltas in batches the store rejected
    pub counts_lost: u64,
    pub batches_written: u64,
    pub batches_failed: u64,
}

/// Streaming (port, protocol) counter with bounded memory
#[derive(Debug, Clone)]
pub struct LogAggregator {
    batch_threshold: usize,
    resolve_protocols: bool,
}

impl Default for LogAggregator {
    fn default() -> Self {
        Self::new(DEFAULT_AGGREGATE_BATCH_SIZE)
    }
}

impl LogAggregator {
    /// `batch_threshold` is clamped to at least 1
    pub fn new(batch_threshold: usize) -> Self {
        Self {
            batch_threshold: batch_threshold.max(1),
            resolve_protocols: false,
        }
    }

    /// Map numeric protocol fields to IANA keywords before counting
    pub fn resolve_protocols(mut self, resolve: bool) -> Self {
        self.resolve_protocols = resolve;
        self
    }

    /// Aggregate the flow log at `path`
    pub fn aggregate<W: UpsertWriter + ?Sized>(&self, path: impl AsRef<Path>, writer: &mut W) -> Result<AggregateStats, AggregateError> {
        let path = path.as_ref();
        log::info!(
            "Aggregating flow log: {} (batch threshold: {} keys)",
            path.display(),
            self.batch_threshold
        );

        let records = FlowRecords::open(path, self.resolve_protocols)?;
        self.aggregate_records(records, writer)
    }

    /// Aggregate from any buffered reader
    pub fn aggregate_reader<R: BufRead, W: UpsertWriter + ?Sized>(&self, reader: R, writer: &mut W) -> Result<AggregateStats, AggregateError> {
        self.aggregate_records(FlowRecords::new(reader, self.resolve_protocols), writer)
    }

    fn aggregate_records<R: BufRead, W: UpsertWriter + ?Sized>(
        &self,
        records: FlowRecords<R>,
        writer: &mut W,
    ) -> Result<AggregateStats, AggregateError> {
        let mut stats = AggregateStats::default();
        let mut counts: HashMap<FlowKey, u64> = HashMap::with_capacity(self.batch_threshold.saturating_add(1).min(MAX_PREALLOCATED));

        for result in records {
            let key = match result {
                Ok(key) => key,
                Err(e) if e.is_fatal() => {
                    Self::flush(&mut counts, writer, &mut stats);
                    log::error!("Flow log aggregation stopped early: {}", e);
                    return Err(AggregateError::Read(e));
                }
                Err(e) => {
                    stats.lines_read += 1;
                    stats.lines_skipped += 1;
                    if stats.lines_skipped <= MAX_ROW_WARNINGS {
                        log::warn!("Skipping malformed flow log line: {}", e);
                    } else {
                        log::debug!("Skipping malformed flow log line: {}", e);
                    }
                    continue;
                }
            };

            stats.lines_read += 1;
            stats.lines_parsed += 1;
            *counts.entry(key).or_insert(0) += 1;

            // Increment first, then flush once the buffer exceeds the threshold
            if counts.len() > self.batch_threshold {
                Self::flush(&mut counts, writer, &mut stats);
            }
        }

        Self::flush(&mut counts, writer, &mut stats);

        log::info!(
            "Flow log aggregated: {} lines parsed, {} skipped, {} batches written, {} failed",
            stats.lines_parsed,
            stats.lines_skipped,
            stats.batches_written,
            stats.batches_failed
        );
        Ok(stats)
    }

    /// Write the buffered counts and reset the buffer, whatever the outcome
    fn flush<W: UpsertWriter + ?Sized>(counts: &mut HashMap<FlowKey, u64>, writer: &mut W, stats: &mut AggregateStats) {
        if counts.is_empty() {
            return;
        }

        let batch: Vec<CountDelta> = counts
            .drain()
            .map(|(key, delta)| CountDelta { key, delta })
            .collect();
        let total: u64 = batch.iter().map(|c| c.delta).sum();

        match writer.upsert_counts(&batch) {
            Ok(_) => {
                stats.batches_written += 1;
                stats.counts_flushed += total;
                log::debug!("Flushed {} keys ({} lines)", batch.len(), total);
            }
            Err(e) => {
                stats.batches_failed += 1;
                stats.counts_lost += total;
                log::error!(
                    "Count batch of {} keys ({} lines) rolled back ({}): {}",
                    batch.len(),
                    total,
                    writer.backend_type(),
                    e
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::LookupRow;
    use crate::store::{SqliteFlowStore, StoreError};
    use std::io::Cursor;

    fn flow_line(port: u16, protocol: &str) -> String {
        format!(
            "2 123456789010 eni-1235b8ca123456789 172.31.16.139 172.31.16.21 20641 {} {} 20 4249 1418530010 1418530070 ACCEPT OK\n",
            port, protocol
        )
    }

    fn stored_count(store: &SqliteFlowStore, port: u16, protocol: &str) -> i64 {
        store
            .connection()
            .query_row(
                "SELECT count FROM flowlog WHERE port = ?1 AND protocol = ?2",
                rusqlite::params![port, protocol],
                |row| row.get(0),
            )
            .unwrap()
    }

    /// Fails every batch containing the given port
    struct PoisonWriter {
        poison_port: u16,
        flushed: Vec<usize>,
    }

    impl UpsertWriter for PoisonWriter {
        fn upsert_counts(&mut self, batch: &[CountDelta]) -> Result<usize, StoreError> {
            if batch.iter().any(|c| c.key.port == self.poison_port) {
                return Err(StoreError::InvalidRow("poisoned".to_string()));
            }
            self.flushed.push(batch.len());
            Ok(batch.len())
        }

        fn upsert_tags(&mut self, _batch: &[LookupRow]) -> Result<usize, StoreError> {
            unreachable!("aggregator never writes tags")
        }

        fn backend_type(&self) -> &'static str {
            "Poison"
        }
    }

    #[test]
    fn test_counts_independent_of_batch_threshold() {
        let mut log = String::new();
        for i in 0..200u16 {
            log.push_str(&flow_line(i % 17, if i % 3 == 0 { "TCP" } else { "udp" }));
        }

        let mut expected: Option<Vec<(u16, String, i64)>> = None;
        for threshold in [1, 2, 3, 5, 16, 17, 100, 1000] {
            let mut store = SqliteFlowStore::open_in_memory().unwrap();
            let stats = LogAggregator::new(threshold)
                .aggregate_reader(Cursor::new(log.clone()), &mut store)
                .unwrap();
            assert_eq!(stats.lines_parsed, 200);
            assert_eq!(stats.counts_flushed, 200);
            assert_eq!(store.total_count().unwrap(), 200);

            let mut stmt = store
                .connection()
                .prepare("SELECT port, protocol, count FROM flowlog ORDER BY port, protocol")
                .unwrap();
            let rows: Vec<(u16, String, i64)> = stmt
                .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .unwrap()
                .map(|r| r.unwrap())
                .collect();

            match &expected {
                None => expected = Some(rows),
                Some(first) => assert_eq!(first, &rows, "threshold {} changed the tallies", threshold),
            }
        }
    }

    #[test]
    fn test_same_key_split_across_flushes() {
        // Alternating keys force a flush on nearly every line with threshold 1
        let mut log = String::new();
        for _ in 0..50 {
            log.push_str(&flow_line(80, "tcp"));
            log.push_str(&flow_line(443, "tcp"));
        }
        let mut store = SqliteFlowStore::open_in_memory().unwrap();

        let stats = LogAggregator::new(1)
            .aggregate_reader(Cursor::new(log), &mut store)
            .unwrap();

        assert!(stats.batches_written > 1);
        assert_eq!(stored_count(&store, 80, "tcp"), 50);
        assert_eq!(stored_count(&store, 443, "tcp"), 50);
    }

    #[test]
    fn test_protocol_case_collapses() {
        let log = format!("{}{}{}", flow_line(80, "TCP"), flow_line(80, "tcp"), flow_line(80, "Tcp"));
        let mut store = SqliteFlowStore::open_in_memory().unwrap();

        LogAggregator::new(2)
            .aggregate_reader(Cursor::new(log), &mut store)
            .unwrap();

        assert_eq!(store.row_count().unwrap(), 1);
        assert_eq!(stored_count(&store, 80, "tcp"), 3);
    }

    #[test]
    fn test_short_lines_skipped_and_counted() {
        let log = format!(
            "{}2 123 eni-1 10.0.0.1\n\n{}only seven fields here a b\n",
            flow_line(22, "tcp"),
            flow_line(22, "tcp")
        );
        let mut store = SqliteFlowStore::open_in_memory().unwrap();

        let stats = LogAggregator::default()
            .aggregate_reader(Cursor::new(log), &mut store)
            .unwrap();

        assert_eq!(stats.lines_read, 4);
        assert_eq!(stats.lines_parsed, 2);
        assert_eq!(stats.lines_skipped, 2);
        assert_eq!(stored_count(&store, 22, "tcp"), 2);
    }

    #[test]
    fn test_flush_happens_only_when_threshold_exceeded() {
        let log = format!("{}{}{}", flow_line(1, "tcp"), flow_line(2, "tcp"), flow_line(3, "tcp"));
        let mut writer = PoisonWriter {
            poison_port: 0,
            flushed: Vec::new(),
        };

        LogAggregator::new(2)
            .aggregate_reader(Cursor::new(log), &mut writer)
            .unwrap();

        // Third distinct key pushes the buffer past 2 → one flush of 3 keys, nothing left over
        assert_eq!(writer.flushed, vec![3]);
    }

    #[test]
    fn test_failed_batch_is_skipped_and_run_continues() {
        let log = format!(
            "{}{}{}{}",
            flow_line(1, "tcp"),
            flow_line(666, "tcp"),
            flow_line(2, "tcp"),
            flow_line(3, "tcp")
        );
        let mut writer = PoisonWriter {
            poison_port: 666,
            flushed: Vec::new(),
        };

        let stats = LogAggregator::new(1)
            .aggregate_reader(Cursor::new(log), &mut writer)
            .unwrap();

        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.counts_lost, 2);
        assert_eq!(stats.batches_written, 1);
        assert_eq!(stats.counts_flushed, 2);
        assert_eq!(stats.lines_parsed, 4);
    }

    #[test]
    fn test_counts_accumulate_on_existing_store() {
        let log = format!("{}{}", flow_line(80, "tcp"), flow_line(80, "tcp"));
        let mut store = SqliteFlowStore::open_in_memory().unwrap();
        let aggregator = LogAggregator::new(3);

        aggregator
            .aggregate_reader(Cursor::new(log.clone()), &mut store)
            .unwrap();
        aggregator.aggregate_reader(Cursor::new(log), &mut store).unwrap();

        assert_eq!(stored_count(&store, 80, "tcp"), 4);
    }

    #[test]
    fn test_resolve_protocol_numbers() {
        let log = format!("{}{}", flow_line(443, "6"), flow_line(443, "tcp"));
        let mut store = SqliteFlowStore::open_in_memory().unwrap();

        LogAggregator::default()
            .resolve_protocols(true)
            .aggregate_reader(Cursor::new(log), &mut store)
            .unwrap();

        assert_eq!(stored_count(&store, 443, "tcp"), 2);
    }

    #[test]
    fn test_missing_file() {
        let mut store = SqliteFlowStore::open_in_memory().unwrap();
        let result = LogAggregator::default().aggregate("/definitely/not/here.log", &mut store);
        assert!(matches!(result, Err(AggregateError::Open(_))));
    }

    #[test]
    fn test_huge_threshold_buffers_everything() {
        let log = [flow_line(80, "tcp"), flow_line(443, "tcp"), flow_line(80, "TCP")].concat();
        let mut store = SqliteFlowStore::open_in_memory().unwrap();

        let stats = LogAggregator::new(usize::MAX)
            .aggregate_reader(Cursor::new(log), &mut store)
            .unwrap();

        assert_eq!(stats.batches_written, 1);
        assert_eq!(stats.counts_flushed, 3);
        assert_eq!(stored_count(&store, 80, "tcp"), 2);
    }
}
