//! Lazy, single-pass readers over the two input files
//!
//! - [`FlowRecords`] yields one `FlowKey` per flow-log line
//! - [`LookupRows`] yields one `LookupRow` per lookup-table row
//!
//! Neither reader retains anything beyond the current line. Reopen the file to
//! start over.

use super::protocol;
use crate::model::{FlowKey, LookupRow};
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

/// Flow-log column holding the destination port (0-based)
pub const DST_PORT_FIELD: usize = 6;
/// Flow-log column holding the protocol (0-based)
pub const PROTOCOL_FIELD: usize = 7;
/// Minimum whitespace-separated fields per flow-log line
pub const MIN_FLOW_FIELDS: usize = PROTOCOL_FIELD + 1;

/// A single malformed line or row; never fatal on its own
#[derive(Debug, Error)]
pub enum RowError {
    #[error("line {line}: expected at least {expected} fields, found {found}")]
    TooFewFields {
        line: usize,
        expected: usize,
        found: usize,
    },

    #[error("line {line}: invalid port '{value}'")]
    InvalidPort { line: usize, value: String },

    #[error("line {line}: empty {column} field")]
    EmptyField { line: usize, column: &'static str },

    #[error("line {line}: read failed: {source}")]
    Read {
        line: usize,
        #[source]
        source: io::Error,
    },
}

impl RowError {
    /// Read failures end the stream; everything else is skippable
    pub fn is_fatal(&self) -> bool {
        matches!(self, RowError::Read { .. })
    }
}

fn parse_port(value: &str, line: usize) -> Result<u16, RowError> {
    value.trim().parse::<u16>().map_err(|_| RowError::InvalidPort {
        line,
        value: value.to_string(),
    })
}

/// Shared line pump: reads raw bytes so a stray non-UTF-8 byte only spoils one line
struct LineSource<R> {
    reader: R,
    buf: Vec<u8>,
    line: usize,
    done: bool,
}

impl<R: BufRead> LineSource<R> {
    fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(256),
            line: 0,
            done: false,
        }
    }

    /// Next line (without terminator) and its 1-based number
    fn next_line(&mut self) -> Option<io::Result<(usize, String)>> {
        if self.done {
            return None;
        }

        self.buf.clear();
        self.line += 1;
        match self.reader.read_until(b'\n', &mut self.buf) {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(_) => {
                let text = String::from_utf8_lossy(&self.buf);
                let text = text.trim_end_matches(['\n', '\r']).to_string();
                Some(Ok((self.line, text)))
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }

    /// Next line as a row result; read failures carry the line number
    fn next_row_line(&mut self) -> Option<Result<(usize, String), RowError>> {
        let line = self.line + 1;
        self.next_line()
            .map(|result| result.map_err(|source| RowError::Read { line, source }))
    }
}

/// Parse one flow-log line into its aggregation key
///
/// Fields are whitespace separated (spaces or tabs); `DST_PORT_FIELD` is the
/// port and `PROTOCOL_FIELD` the protocol, lower-cased.
pub fn parse_flow_line(text: &str, line: usize, resolve_protocols: bool) -> Result<FlowKey, RowError> {
    let mut fields = text.split_whitespace();
    let port_field = fields.nth(DST_PORT_FIELD);
    let protocol_field = fields.next();

    match (port_field, protocol_field) {
        (Some(port), Some(protocol)) => {
            let port = parse_port(port, line)?;
            let protocol = if resolve_protocols {
                protocol::resolve(protocol)
            } else {
                protocol.to_lowercase()
            };
            Ok(FlowKey { port, protocol })
        }
        _ => Err(RowError::TooFewFields {
            line,
            expected: MIN_FLOW_FIELDS,
            found: text.split_whitespace().count(),
        }),
    }
}

/// Lazy iterator of flow-log keys
///
/// Blank lines are skipped silently. Malformed lines are yielded as `Err` and
/// the scan continues; a read failure is yielded once and ends the stream.
pub struct FlowRecords<R> {
    source: LineSource<R>,
    resolve_protocols: bool,
}

impl FlowRecords<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, resolve_protocols: bool) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(Self::new(BufReader::new(file), resolve_protocols))
    }
}

impl<R: BufRead> FlowRecords<R> {
    pub fn new(reader: R, resolve_protocols: bool) -> Self {
        Self {
            source: LineSource::new(reader),
            resolve_protocols,
        }
    }
}

impl<R: BufRead> Iterator for FlowRecords<R> {
    type Item = Result<FlowKey, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line, text) = match self.source.next_row_line()? {
                Ok(next) => next,
                Err(e) => return Some(Err(e)),
            };
            if text.trim().is_empty() {
                continue;
            }
            return Some(parse_flow_line(&text, line, self.resolve_protocols));
        }
    }
}

/// Field text with surrounding whitespace and one pair of double quotes removed
fn unquote(field: &str) -> &str {
    let field = field.trim();
    field
        .strip_prefix('"')
        .and_then(|inner| inner.strip_suffix('"'))
        .map(str::trim)
        .unwrap_or(field)
}

/// Header names for the three lookup columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupColumns {
    pub port: String,
    pub protocol: String,
    pub tag: String,
}

impl Default for LookupColumns {
    fn default() -> Self {
        Self {
            port: "dstport".to_string(),
            protocol: "protocol".to_string(),
            tag: "tag".to_string(),
        }
    }
}

/// Header problems make the whole lookup file unusable
#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("lookup file is empty (no header row)")]
    Missing,

    #[error("lookup header has no '{0}' column")]
    MissingColumn(String),

    #[error("failed to read lookup header: {0}")]
    Read(#[from] io::Error),
}

/// Column positions resolved from the header row by name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LookupLayout {
    pub port: usize,
    pub protocol: usize,
    pub tag: usize,
    width: usize,
}

impl LookupLayout {
    /// Resolve column positions; names match case-insensitively, order is free
    pub fn from_header(header: &str, delimiter: char, columns: &LookupColumns) -> Result<Self, HeaderError> {
        let names: Vec<String> = header
            .trim_start_matches('\u{feff}')
            .split(delimiter)
            .map(|name| unquote(name).to_lowercase())
            .collect();

        let find = |wanted: &str| {
            let wanted = wanted.trim().to_lowercase();
            names
                .iter()
                .position(|name| *name == wanted)
                .ok_or(HeaderError::MissingColumn(wanted))
        };

        let port = find(&columns.port)?;
        let protocol = find(&columns.protocol)?;
        let tag = find(&columns.tag)?;

        Ok(Self {
            port,
            protocol,
            tag,
            width: port.max(protocol).max(tag) + 1,
        })
    }

    /// Parse one data row
    pub fn parse_row(&self, text: &str, delimiter: char, line: usize) -> Result<LookupRow, RowError> {
        let fields: Vec<&str> = text.split(delimiter).collect();
        if fields.len() < self.width {
            return Err(RowError::TooFewFields {
                line,
                expected: self.width,
                found: fields.len(),
            });
        }

        let port = parse_port(unquote(fields[self.port]), line)?;
        let protocol = unquote(fields[self.protocol]);
        if protocol.is_empty() {
            return Err(RowError::EmptyField {
                line,
                column: "protocol",
            });
        }
        let tag = unquote(fields[self.tag]);
        if tag.is_empty() {
            return Err(RowError::EmptyField { line, column: "tag" });
        }

        Ok(LookupRow::new(port, protocol, tag))
    }
}

/// Lazy iterator of lookup rows; the header is consumed by the constructor
pub struct LookupRows<R> {
    source: LineSource<R>,
    layout: LookupLayout,
    delimiter: char,
    resolve_protocols: bool,
}

impl LookupRows<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>, delimiter: char, columns: &LookupColumns) -> Result<Self, HeaderError> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file), delimiter, columns)
    }
}

impl<R: BufRead> LookupRows<R> {
    pub fn new(reader: R, delimiter: char, columns: &LookupColumns) -> Result<Self, HeaderError> {
        let mut source = LineSource::new(reader);

        let header = loop {
            match source.next_line() {
                None => return Err(HeaderError::Missing),
                Some(Err(e)) => return Err(HeaderError::Read(e)),
                Some(Ok((_, text))) if text.trim().is_empty() => continue,
                Some(Ok((_, text))) => break text,
            }
        };

        let layout = LookupLayout::from_header(&header, delimiter, columns)?;
        log::debug!(
            "Lookup columns resolved: port={}, protocol={}, tag={}",
            layout.port,
            layout.protocol,
            layout.tag
        );

        Ok(Self {
            source,
            layout,
            delimiter,
            resolve_protocols: false,
        })
    }

    /// Key rows the same way `FlowRecords` does with resolution enabled
    pub fn resolve_protocols(mut self, resolve: bool) -> Self {
        self.resolve_protocols = resolve;
        self
    }
}

impl<R: BufRead> Iterator for LookupRows<R> {
    type Item = Result<LookupRow, RowError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let (line, text) = match self.source.next_row_line()? {
                Ok(next) => next,
                Err(e) => return Some(Err(e)),
            };
            if text.trim().is_empty() {
                continue;
            }
            let row = self.layout.parse_row(&text, self.delimiter, line);
            if !self.resolve_protocols {
                return Some(row);
            }
            return Some(row.map(|mut row| {
                row.key.protocol = protocol::resolve(&row.key.protocol);
                row
            }));
        }
    }
}
