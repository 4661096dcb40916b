//! Pipeline orchestration
//!
//! ```text
//! lookup file ─ LookupLoader ─┐
//!                             ├─ store ─ ReportGenerator ─ tag report
//! flow log ─── LogAggregator ─┘                          └ port/protocol report
//! ```
//!
//! Steps run strictly in sequence over one store handle. A rerun against an
//! existing store adds to its counts.

pub mod orchestrator;
pub mod summary;

pub use orchestrator::{FlowPipeline, PipelineError};
pub use summary::RunSummary;
