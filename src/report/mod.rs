//! Reports: paged reads from the store into delimited files

pub mod generator;
pub mod writer;

pub use generator::{ReportError, ReportGenerator, ReportOutcome};
pub use writer::ReportFile;
