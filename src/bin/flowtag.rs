//! flowtag - tag and tally VPC flow logs
//!
//! Usage:
//!   flowtag -l lookup.csv -i flow.log [--output-dir reports] [--fresh]
//!
//! Defaults come from FLOWTAG_* environment variables (see `FlowConfig::from_env`),
//! which are read after loading `.env`. Flags override them.

use clap::Parser;
use flowtag::{FlowConfig, FlowPipeline, PipelineError};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "flowtag")]
#[command(about = "Map flow-log records to tags and report per-tag and per-port/protocol counts", long_about = None)]
struct Cli {
    /// Lookup table (dstport, protocol, tag)
    #[arg(short, long)]
    lookup_file: PathBuf,

    /// Flow log file
    #[arg(short, long)]
    input: PathBuf,

    /// Debug-level logging
    #[arg(short, long)]
    debug: bool,

    /// SQLite store path
    #[arg(long)]
    db: Option<PathBuf>,

    /// Directory for the report files
    #[arg(long)]
    output_dir: Option<PathBuf>,

    #[arg(long)]
    lookup_batch_size: Option<usize>,

    /// Distinct keys held in memory before a flush
    #[arg(long)]
    aggregate_batch_size: Option<usize>,

    /// Rows fetched per report page
    #[arg(long)]
    page_size: Option<usize>,

    /// Map numeric protocols (6, 17, ...) to names
    #[arg(long)]
    resolve_protocols: bool,

    /// Abort on the first malformed lookup row
    #[arg(long)]
    strict_lookup: bool,

    /// Delete the existing store before running
    #[arg(long)]
    fresh: bool,

    /// Write the run summary as JSON
    #[arg(long)]
    summary: Option<PathBuf>,
}

impl Cli {
    fn apply(&self, config: &mut FlowConfig) {
        if let Some(db) = &self.db {
            config.db_path = db.clone();
        }
        if let Some(dir) = &self.output_dir {
            config.output_dir = dir.clone();
        }
        if let Some(size) = self.lookup_batch_size {
            config.lookup_batch_size = size;
        }
        if let Some(size) = self.aggregate_batch_size {
            config.aggregate_batch_size = size;
        }
        if let Some(size) = self.page_size {
            config.report_page_size = size;
        }
        config.resolve_protocols |= self.resolve_protocols;
        config.strict_lookup |= self.strict_lookup;
    }
}

fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if debug {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    init_logging(cli.debug);

    let mut config = match FlowConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };
    cli.apply(&mut config);
    if let Err(e) = config.validate() {
        log::error!("❌ {}", e);
        return ExitCode::FAILURE;
    }

    log::info!("🚀 Starting flowtag");
    log::info!("   ├─ Lookup file: {}", cli.lookup_file.display());
    log::info!("   ├─ Flow log: {}", cli.input.display());
    log::info!("   ├─ Store: {}{}", config.db_path.display(), if cli.fresh { " (fresh)" } else { "" });
    log::info!("   ├─ Reports: {}", config.output_dir.display());
    log::info!(
        "   └─ Batches: lookup {}, aggregate {}, page {}",
        config.lookup_batch_size,
        config.aggregate_batch_size,
        config.report_page_size
    );

    let pipeline = FlowPipeline::new(config).fresh(cli.fresh);
    let summary = match pipeline.run(&cli.lookup_file, &cli.input) {
        Ok(summary) => summary,
        // Already logged where the input check failed
        Err(PipelineError::InputNotFound { .. }) => return ExitCode::FAILURE,
        Err(e) => {
            log::error!("❌ Pipeline failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    summary.log();
    if let Some(path) = &cli.summary {
        match summary.write_json(path) {
            Ok(()) => log::info!("Summary written to {}", path.display()),
            Err(e) => log::warn!("Failed to write summary to {}: {}", path.display(), e),
        }
    }

    if !summary.is_clean() {
        log::warn!("⚠️  Run completed with errors; reports may be partial");
    }
    ExitCode::SUCCESS
}
