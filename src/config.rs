//! Pipeline configuration from environment variables
//!
//! Every value has a default; the CLI overrides individual fields afterwards.

use crate::ingest::log_aggregator::DEFAULT_AGGREGATE_BATCH_SIZE;
use crate::ingest::lookup_loader::DEFAULT_LOOKUP_BATCH_SIZE;
use crate::ingest::LookupColumns;
use crate::report::generator::DEFAULT_PAGE_SIZE;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Configuration for one pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct FlowConfig {
    /// Path to SQLite database file
    pub db_path: PathBuf,

    /// Directory receiving the two report files
    pub output_dir: PathBuf,

    /// Rows per lookup insert batch
    pub lookup_batch_size: usize,

    /// Distinct keys buffered before the aggregator flushes
    pub aggregate_batch_size: usize,

    /// Rows per report page
    pub report_page_size: usize,

    pub lookup_delimiter: char,
    pub report_delimiter: char,
    pub lookup_columns: LookupColumns,

    /// Map numeric protocol fields (6, 17, ...) to names before counting
    pub resolve_protocols: bool,

    /// Abort lookup loading on the first bad row or batch
    pub strict_lookup: bool,
}

impl Default for FlowConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("flow_log.db"),
            output_dir: PathBuf::from("."),
            lookup_batch_size: DEFAULT_LOOKUP_BATCH_SIZE,
            aggregate_batch_size: DEFAULT_AGGREGATE_BATCH_SIZE,
            report_page_size: DEFAULT_PAGE_SIZE,
            lookup_delimiter: ',',
            report_delimiter: '\t',
            lookup_columns: LookupColumns::default(),
            resolve_protocols: false,
            strict_lookup: false,
        }
    }
}

impl FlowConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `FLOWTAG_DB_PATH` (default: flow_log.db)
    /// - `FLOWTAG_OUTPUT_DIR` (default: .)
    /// - `FLOWTAG_LOOKUP_BATCH_SIZE` (default: 3)
    /// - `FLOWTAG_AGGREGATE_BATCH_SIZE` (default: 2)
    /// - `FLOWTAG_REPORT_PAGE_SIZE` (default: 100)
    /// - `FLOWTAG_LOOKUP_DELIMITER` (default: ,)
    /// - `FLOWTAG_REPORT_DELIMITER` (default: tab; `\t` and `tab` accepted)
    /// - `FLOWTAG_LOOKUP_PORT_COLUMN` / `_PROTOCOL_COLUMN` / `_TAG_COLUMN`
    ///   (default: dstport / protocol / tag)
    /// - `FLOWTAG_RESOLVE_PROTOCOLS` (default: false)
    /// - `FLOWTAG_STRICT_LOOKUP` (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            db_path: env::var("FLOWTAG_DB_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.db_path),

            output_dir: env::var("FLOWTAG_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),

            lookup_batch_size: env_number("FLOWTAG_LOOKUP_BATCH_SIZE", defaults.lookup_batch_size),

            aggregate_batch_size: env_number("FLOWTAG_AGGREGATE_BATCH_SIZE", defaults.aggregate_batch_size),

            report_page_size: env_number("FLOWTAG_REPORT_PAGE_SIZE", defaults.report_page_size),

            lookup_delimiter: match env::var("FLOWTAG_LOOKUP_DELIMITER") {
                Ok(value) => parse_delimiter(&value)?,
                Err(_) => defaults.lookup_delimiter,
            },

            report_delimiter: match env::var("FLOWTAG_REPORT_DELIMITER") {
                Ok(value) => parse_delimiter(&value)?,
                Err(_) => defaults.report_delimiter,
            },

            lookup_columns: LookupColumns {
                port: env::var("FLOWTAG_LOOKUP_PORT_COLUMN").unwrap_or(defaults.lookup_columns.port),
                protocol: env::var("FLOWTAG_LOOKUP_PROTOCOL_COLUMN")
                    .unwrap_or(defaults.lookup_columns.protocol),
                tag: env::var("FLOWTAG_LOOKUP_TAG_COLUMN").unwrap_or(defaults.lookup_columns.tag),
            },

            resolve_protocols: env_flag("FLOWTAG_RESOLVE_PROTOCOLS"),

            strict_lookup: env_flag("FLOWTAG_STRICT_LOOKUP"),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let sizes = [
            ("lookup batch size", self.lookup_batch_size),
            ("aggregate batch size", self.aggregate_batch_size),
            ("report page size", self.report_page_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(ConfigError::InvalidValue(format!("{} must be at least 1", name)));
            }
        }

        if self.lookup_delimiter.is_whitespace() && self.lookup_delimiter != '\t' {
            return Err(ConfigError::InvalidValue(format!(
                "lookup delimiter {:?} is not usable",
                self.lookup_delimiter
            )));
        }

        let columns = [
            &self.lookup_columns.port,
            &self.lookup_columns.protocol,
            &self.lookup_columns.tag,
        ];
        if columns.iter().any(|name| name.trim().is_empty()) {
            return Err(ConfigError::InvalidValue("lookup column names cannot be empty".to_string()));
        }

        Ok(())
    }
}

/// Accepts a single character, or `\t` / `tab` for a tab
pub fn parse_delimiter(value: &str) -> Result<char, ConfigError> {
    match value {
        "\\t" | "tab" | "TAB" => return Ok('\t'),
        _ => {}
    }

    let mut chars = value.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c),
        _ => Err(ConfigError::InvalidValue(format!(
            "delimiter must be a single character, got {:?}",
            value
        ))),
    }
}

fn env_number(name: &str, default: usize) -> usize {
    match env::var(name) {
        Ok(value) => match value.trim().parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                log::warn!("Invalid {} '{}', defaulting to {}", name, value, default);
                default
            }
        },
        Err(_) => default,
    }
}

fn env_flag(name: &str) -> bool {
    env::var(name)
        .map(|value| matches!(value.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: &[&str] = &[
        "FLOWTAG_DB_PATH",
        "FLOWTAG_OUTPUT_DIR",
        "FLOWTAG_LOOKUP_BATCH_SIZE",
        "FLOWTAG_AGGREGATE_BATCH_SIZE",
        "FLOWTAG_REPORT_PAGE_SIZE",
        "FLOWTAG_LOOKUP_DELIMITER",
        "FLOWTAG_REPORT_DELIMITER",
        "FLOWTAG_LOOKUP_PORT_COLUMN",
        "FLOWTAG_LOOKUP_PROTOCOL_COLUMN",
        "FLOWTAG_LOOKUP_TAG_COLUMN",
        "FLOWTAG_RESOLVE_PROTOCOLS",
        "FLOWTAG_STRICT_LOOKUP",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    // Environment is process-wide, so default and custom cases share one test
    #[test]
    fn test_from_env() {
        clear_env();

        let config = FlowConfig::from_env().unwrap();
        assert_eq!(config, FlowConfig::default());
        assert_eq!(config.lookup_batch_size, 3);
        assert_eq!(config.aggregate_batch_size, 2);
        assert_eq!(config.report_delimiter, '\t');

        env::set_var("FLOWTAG_DB_PATH", "/tmp/flows.db");
        env::set_var("FLOWTAG_LOOKUP_BATCH_SIZE", "500");
        env::set_var("FLOWTAG_AGGREGATE_BATCH_SIZE", "not-a-number");
        env::set_var("FLOWTAG_REPORT_DELIMITER", ",");
        env::set_var("FLOWTAG_LOOKUP_PROTOCOL_COLUMN", "dstprotocol");
        env::set_var("FLOWTAG_RESOLVE_PROTOCOLS", "TRUE");

        let config = FlowConfig::from_env().unwrap();
        assert_eq!(config.db_path, PathBuf::from("/tmp/flows.db"));
        assert_eq!(config.lookup_batch_size, 500);
        assert_eq!(config.aggregate_batch_size, 2);
        assert_eq!(config.report_delimiter, ',');
        assert_eq!(config.lookup_columns.protocol, "dstprotocol");
        assert!(config.resolve_protocols);
        assert!(!config.strict_lookup);

        env::set_var("FLOWTAG_REPORT_PAGE_SIZE", "0");
        assert!(FlowConfig::from_env().is_err());

        clear_env();
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter(",").unwrap(), ',');
        assert_eq!(parse_delimiter("\\t").unwrap(), '\t');
        assert_eq!(parse_delimiter("tab").unwrap(), '\t');
        assert_eq!(parse_delimiter("|").unwrap(), '|');
        assert!(parse_delimiter("::").is_err());
        assert!(parse_delimiter("").is_err());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = FlowConfig::default();
        config.lookup_batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = FlowConfig::default();
        config.lookup_delimiter = ' ';
        assert!(config.validate().is_err());

        let mut config = FlowConfig::default();
        config.lookup_columns.tag = "  ".to_string();
        assert!(config.validate().is_err());
    }
}
