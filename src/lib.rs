pub mod config;
pub mod ingest;
pub mod model;
pub mod pipeline;
pub mod report;
pub mod sqlite_pragma;
pub mod store;
pub mod workspace;

pub use config::FlowConfig;
pub use pipeline::{FlowPipeline, PipelineError, RunSummary};
