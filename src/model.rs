//! Core data structures shared by ingestion, storage and reporting
//!
//! All types mirror the `flowlog` table in `sql/00_flowlog.sql`:
//! - `FlowKey` → the `(port, protocol)` uniqueness key
//! - `LookupRow` → a row written by the lookup loader (tag only)
//! - `CountDelta` → an additive count written by the log aggregator
//! - `TagCount` / `PortProtocolCount` → rows read back for the reports

use serde::Serialize;
use std::fmt;

/// Tag assigned to any counted pair with no lookup entry
pub const UNTAGGED: &str = "untagged";

/// Natural key of a `flowlog` row
///
/// `protocol` is always stored lower-cased so "TCP" and "tcp" collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct FlowKey {
    pub port: u16,
    pub protocol: String,
}

impl FlowKey {
    pub fn new(port: u16, protocol: &str) -> Self {
        Self {
            port,
            protocol: protocol.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.port, self.protocol)
    }
}

/// One parsed row of the lookup table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRow {
    pub key: FlowKey,
    pub tag: String,
}

impl LookupRow {
    pub fn new(port: u16, protocol: &str, tag: &str) -> Self {
        Self {
            key: FlowKey::new(port, protocol),
            tag: tag.trim().to_lowercase(),
        }
    }
}

/// Additive count for one key, produced by a single aggregator flush
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CountDelta {
    pub key: FlowKey,
    pub delta: u64,
}

/// Tag report row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

/// Port/protocol report row
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortProtocolCount {
    pub port: u16,
    pub protocol: String,
    pub count: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flow_key_case_normalized() {
        assert_eq!(FlowKey::new(80, "TCP"), FlowKey::new(80, "tcp"));
        assert_eq!(FlowKey::new(80, " Udp ").protocol, "udp");
    }

    #[test]
    fn test_lookup_row_lowercases_tag() {
        let row = LookupRow::new(443, "TCP", "SV_P1");
        assert_eq!(row.tag, "sv_p1");
        assert_eq!(row.key.protocol, "tcp");
    }
}
