use super::summary::RunSummary;
use crate::config::FlowConfig;
use crate::ingest::{LoaderError, LogAggregator, LookupLoader};
use crate::report::ReportGenerator;
use crate::store::{ReportSource, SqliteFlowStore, StoreError, UpsertWriter};
use crate::workspace;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{kind} not found: {path}")]
    InputNotFound { kind: &'static str, path: PathBuf },

    #[error("Failed to open store: {0}")]
    Store(#[from] StoreError),

    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[from] std::io::Error),

    #[error("Lookup load aborted: {0}")]
    StrictLookup(#[source] LoaderError),
}

/// Sequences lookup load, log aggregation and both reports over one store
pub struct FlowPipeline {
    config: FlowConfig,
    fresh: bool,
}

impl FlowPipeline {
    pub fn new(config: FlowConfig) -> Self {
        Self { config, fresh: false }
    }

    /// Delete the existing store before running instead of resuming into it
    pub fn fresh(mut self, fresh: bool) -> Self {
        self.fresh = fresh;
        self
    }

    pub fn report_generator(&self) -> ReportGenerator {
        ReportGenerator::new(&self.config.output_dir, self.config.report_page_size)
            .with_delimiter(self.config.report_delimiter)
    }

    /// Run against the configured SQLite store
    ///
    /// Both inputs are checked before the store is touched. Only a missing
    /// input, a store that cannot be opened, or a strict-mode lookup failure
    /// is returned as an error; everything else is logged and recorded in
    /// the summary.
    pub fn run(&self, lookup_file: impl AsRef<Path>, flow_log: impl AsRef<Path>) -> Result<RunSummary, PipelineError> {
        let lookup_file = lookup_file.as_ref();
        let flow_log = flow_log.as_ref();

        check_input("Lookup file", lookup_file)?;
        check_input("Flow log", flow_log)?;

        if self.fresh {
            workspace::reset_store(&self.config.db_path)?;
        }

        let mut store = SqliteFlowStore::open(&self.config.db_path)?;
        self.run_with_store(&mut store, lookup_file, flow_log)
    }

    /// Run against any store; inputs must already exist
    pub fn run_with_store<S>(&self, store: &mut S, lookup_file: &Path, flow_log: &Path) -> Result<RunSummary, PipelineError>
    where
        S: UpsertWriter + ReportSource + ?Sized,
    {
        let mut summary = RunSummary::new(lookup_file, flow_log, &self.config.db_path);

        let loader = LookupLoader::new(self.config.lookup_batch_size)
            .with_delimiter(self.config.lookup_delimiter)
            .with_columns(self.config.lookup_columns.clone())
            .strict(self.config.strict_lookup)
            .resolve_protocols(self.config.resolve_protocols);
        match loader.load(lookup_file, store) {
            Ok(stats) => summary.lookup = Some(stats),
            Err(e @ (LoaderError::StrictRow(_) | LoaderError::StrictBatch { .. })) => {
                log::error!("❌ {}", e);
                return Err(PipelineError::StrictLookup(e));
            }
            Err(e) => {
                // Counts still accumulate; keys without a tag stay untagged
                log::error!("❌ Lookup load failed: {}", e);
                summary.record_error("lookup", &e);
            }
        }

        let aggregator = LogAggregator::new(self.config.aggregate_batch_size)
            .resolve_protocols(self.config.resolve_protocols);
        match aggregator.aggregate(flow_log, store) {
            Ok(stats) => summary.aggregate = Some(stats),
            Err(e) => {
                log::error!("❌ Flow log aggregation failed: {}", e);
                summary.record_error("aggregate", &e);
            }
        }

        let generator = self.report_generator();
        let stale = [generator.tag_report_path(), generator.port_protocol_report_path()];
        if let Err(e) = workspace::remove_stale_reports(&stale) {
            log::warn!("Could not remove previous reports: {}", e);
        }

        match generator.tag_report(&*store) {
            Ok(outcome) => summary.tag_report = Some(outcome),
            Err(e) => {
                log::error!("❌ Tag report failed: {}", e);
                summary.record_error("tag report", &e);
            }
        }
        match generator.port_protocol_report(&*store) {
            Ok(outcome) => summary.port_protocol_report = Some(outcome),
            Err(e) => {
                log::error!("❌ Port/protocol report failed: {}", e);
                summary.record_error("port/protocol report", &e);
            }
        }

        summary.finish();
        Ok(summary)
    }
}

fn check_input(kind: &'static str, path: &Path) -> Result<(), PipelineError> {
    if path.is_file() {
        Ok(())
    } else {
        log::error!("❌ {} not found: {}", kind, path.display());
        Err(PipelineError::InputNotFound {
            kind,
            path: path.to_path_buf(),
        })
    }
}
