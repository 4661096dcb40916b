//! Run summary returned by [`super::FlowPipeline::run`]

use crate::ingest::{AggregateStats, LoadStats};
use crate::report::ReportOutcome;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub lookup_file: PathBuf,
    pub flow_log: PathBuf,
    pub db_path: PathBuf,

    /// `None` when the step did not complete
    pub lookup: Option<LoadStats>,
    pub aggregate: Option<AggregateStats>,
    pub tag_report: Option<ReportOutcome>,
    pub port_protocol_report: Option<ReportOutcome>,

    /// Non-fatal failures, in the order they happened
    pub errors: Vec<String>,
}

impl RunSummary {
    pub fn new(lookup_file: &Path, flow_log: &Path, db_path: &Path) -> Self {
        Self {
            started_at: Utc::now(),
            finished_at: None,
            lookup_file: lookup_file.to_path_buf(),
            flow_log: flow_log.to_path_buf(),
            db_path: db_path.to_path_buf(),
            lookup: None,
            aggregate: None,
            tag_report: None,
            port_protocol_report: None,
            errors: Vec::new(),
        }
    }

    pub fn record_error(&mut self, step: &str, error: impl std::fmt::Display) {
        self.errors.push(format!("{}: {}", step, error));
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// True when every step completed and no batch was rolled back
    pub fn is_clean(&self) -> bool {
        let lookup_ok = self.lookup.as_ref().is_some_and(|s| s.batches_failed == 0);
        let aggregate_ok = self.aggregate.as_ref().is_some_and(|s| s.batches_failed == 0);
        self.errors.is_empty()
            && lookup_ok
            && aggregate_ok
            && self.tag_report.is_some()
            && self.port_protocol_report.is_some()
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_milliseconds())
    }

    /// Write as pretty-printed JSON
    pub fn write_json(&self, path: impl AsRef<Path>) -> io::Result<()> {
        let mut writer = BufWriter::new(File::create(path.as_ref())?);
        serde_json::to_writer_pretty(&mut writer, self)?;
        writer.write_all(b"\n")?;
        writer.flush()
    }

    pub fn log(&self) {
        log::info!("📊 Run summary:");
        if let Some(lookup) = &self.lookup {
            log::info!(
                "   ├─ Lookup: {} rows loaded, {} skipped, {} failed batches",
                lookup.rows_loaded,
                lookup.rows_skipped,
                lookup.batches_failed
            );
        }
        if let Some(aggregate) = &self.aggregate {
            log::info!(
                "   ├─ Flow log: {} lines counted, {} skipped, {} failed batches",
                aggregate.lines_parsed,
                aggregate.lines_skipped,
                aggregate.batches_failed
            );
        }
        for (name, outcome) in [("Tag report", &self.tag_report), ("Port/protocol report", &self.port_protocol_report)] {
            match outcome {
                Some(ReportOutcome { path: Some(path), rows_written, .. }) => {
                    log::info!("   ├─ {}: {} rows → {}", name, rows_written, path.display())
                }
                Some(_) => log::info!("   ├─ {}: empty", name),
                None => log::info!("   ├─ {}: not written", name),
            }
        }
        match self.duration_ms() {
            Some(ms) => log::info!("   └─ Finished in {}ms with {} errors", ms, self.errors.len()),
            None => log::info!("   └─ {} errors", self.errors.len()),
        }
    }
}
