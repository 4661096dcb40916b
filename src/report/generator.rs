//! Report generator: pages counts out of the store into delimited files
//!
//! Both reports use offset paging over a totally ordered query and stop at the
//! first page that comes back empty. Each page is written and flushed before
//! the next is fetched, so memory stays bounded by one page.

use super::writer::ReportFile;
use crate::store::{Page, ReportSource, StoreError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const TAG_REPORT_HEADER: &[&str] = &["Tag", "Count"];
pub const PORT_PROTOCOL_REPORT_HEADER: &[&str] = &["Port", "Protocol", "Count"];

pub const DEFAULT_TAG_REPORT_FILE: &str = "tag_counts.tsv";
pub const DEFAULT_PORT_PROTOCOL_REPORT_FILE: &str = "port_protocol_counts.tsv";
pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Error)]
pub enum ReportError {
    #[error("Failed to read page at offset {offset} ({rows_written} rows already written): {source}")]
    Read {
        offset: usize,
        rows_written: u64,
        #[source]
        source: StoreError,
    },

    #[error("Failed to write report {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Result of one report
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReportOutcome {
    pub rows_written: u64,
    pub pages_read: u64,
    /// `None` when there was nothing to report
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ReportGenerator {
    page_size: usize,
    delimiter: char,
    output_dir: PathBuf,
    tag_file: String,
    port_protocol_file: String,
}

impl ReportGenerator {
    /// `page_size` is clamped to at least 1
    pub fn new(output_dir: impl AsRef<Path>, page_size: usize) -> Self {
        Self {
            page_size: page_size.max(1),
            delimiter: '\t',
            output_dir: output_dir.as_ref().to_path_buf(),
            tag_file: DEFAULT_TAG_REPORT_FILE.to_string(),
            port_protocol_file: DEFAULT_PORT_PROTOCOL_REPORT_FILE.to_string(),
        }
    }

    pub fn with_delimiter(mut self, delimiter: char) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_file_names(mut self, tag_file: &str, port_protocol_file: &str) -> Self {
        self.tag_file = tag_file.to_string();
        self.port_protocol_file = port_protocol_file.to_string();
        self
    }

    pub fn tag_report_path(&self) -> PathBuf {
        self.output_dir.join(&self.tag_file)
    }

    pub fn port_protocol_report_path(&self) -> PathBuf {
        self.output_dir.join(&self.port_protocol_file)
    }

    /// `Tag<delim>Count`, one row per tag with a positive total
    pub fn tag_report<S: ReportSource + ?Sized>(&self, source: &S) -> Result<ReportOutcome, ReportError> {
        let report = ReportFile::new(self.tag_report_path(), self.delimiter, TAG_REPORT_HEADER);
        self.write_pages(
            "tag",
            report,
            |page| source.tag_counts(page),
            |row| vec![row.tag.clone(), row.count.to_string()],
        )
    }

    /// `Port<delim>Protocol<delim>Count`, one row per key with a positive count
    pub fn port_protocol_report<S: ReportSource + ?Sized>(&self, source: &S) -> Result<ReportOutcome, ReportError> {
        let report = ReportFile::new(
            self.port_protocol_report_path(),
            self.delimiter,
            PORT_PROTOCOL_REPORT_HEADER,
        );
        self.write_pages(
            "port/protocol",
            report,
            |page| source.port_protocol_counts(page),
            |row| vec![row.port.to_string(), row.protocol.clone(), row.count.to_string()],
        )
    }

    fn write_pages<T, F, G>(&self, name: &str, mut report: ReportFile, mut fetch: F, fields: G) -> Result<ReportOutcome, ReportError>
    where
        F: FnMut(Page) -> Result<Vec<T>, StoreError>,
        G: Fn(&T) -> Vec<String>,
    {
        let mut outcome = ReportOutcome::default();
        let mut page = Page::first(self.page_size);

        loop {
            let rows = match fetch(page) {
                Ok(rows) => rows,
                Err(source) => {
                    let rows_written = report.rows_written();
                    // Keep the pages already written; the rest of this report is abandoned
                    if let Err(e) = report.finish() {
                        log::warn!("Failed to close partial {} report: {}", name, e);
                    }
                    log::error!(
                        "{} report abandoned at offset {} after {} rows: {}",
                        name,
                        page.offset,
                        rows_written,
                        source
                    );
                    return Err(ReportError::Read {
                        offset: page.offset,
                        rows_written,
                        source,
                    });
                }
            };
            if rows.is_empty() {
                break;
            }

            outcome.pages_read += 1;
            for row in &rows {
                report.write_row(&fields(row)).map_err(|source| ReportError::Write {
                    path: report.path().to_path_buf(),
                    source,
                })?;
            }
            report.flush().map_err(|source| ReportError::Write {
                path: report.path().to_path_buf(),
                source,
            })?;

            page = page.next();
        }

        outcome.rows_written = report.rows_written();
        let path = report.path().to_path_buf();
        outcome.path = report
            .finish()
            .map_err(|source| ReportError::Write { path, source })?;

        match &outcome.path {
            Some(path) => log::info!(
                "{} report written: {} rows → {}",
                name,
                outcome.rows_written,
                path.display()
            ),
            None => log::warn!("No {} counts to report; no file written", name),
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PortProtocolCount, TagCount};
    use std::cell::Cell;
    use tempfile::tempdir;

    /// In-memory source that can fail from a given page onwards
    struct VecSource {
        tags: Vec<TagCount>,
        ports: Vec<PortProtocolCount>,
        fail_from_offset: Option<usize>,
        calls: Cell<usize>,
    }

    impl VecSource {
        fn with_ports(n: u16) -> Self {
            Self {
                tags: Vec::new(),
                ports: (1..=n)
                    .map(|port| PortProtocolCount {
                        port,
                        protocol: "tcp".to_string(),
                        count: port as u64,
                    })
                    .collect(),
                fail_from_offset: None,
                calls: Cell::new(0),
            }
        }

        fn slice<T: Clone>(&self, rows: &[T], page: Page) -> Result<Vec<T>, StoreError> {
            self.calls.set(self.calls.get() + 1);
            if let Some(offset) = self.fail_from_offset {
                if page.offset >= offset {
                    return Err(StoreError::InvalidRow("disk on fire".to_string()));
                }
            }
            Ok(rows.iter().skip(page.offset).take(page.limit).cloned().collect())
        }
    }

    impl ReportSource for VecSource {
        fn tag_counts(&self, page: Page) -> Result<Vec<TagCount>, StoreError> {
            self.slice(&self.tags, page)
        }

        fn port_protocol_counts(&self, page: Page) -> Result<Vec<PortProtocolCount>, StoreError> {
            self.slice(&self.ports, page)
        }
    }

    #[test]
    fn test_pagination_complete_for_any_page_size() {
        let source = VecSource::with_ports(23);

        for page_size in [1, 2, 5, 22, 23, 24, 100] {
            let dir = tempdir().unwrap();
            let outcome = ReportGenerator::new(dir.path(), page_size)
                .port_protocol_report(&source)
                .unwrap();
            assert_eq!(outcome.rows_written, 23, "page size {}", page_size);

            let text = std::fs::read_to_string(outcome.path.unwrap()).unwrap();
            let lines: Vec<&str> = text.lines().collect();
            assert_eq!(lines[0], "Port\tProtocol\tCount");
            assert_eq!(lines.len(), 24);
            let ports: Vec<u16> = lines[1..]
                .iter()
                .map(|l| l.split('\t').next().unwrap().parse().unwrap())
                .collect();
            assert_eq!(ports, (1..=23).collect::<Vec<u16>>());
        }
    }

    #[test]
    fn test_paging_stops_at_first_empty_page() {
        let source = VecSource::with_ports(10);
        let dir = tempdir().unwrap();

        let outcome = ReportGenerator::new(dir.path(), 4)
            .port_protocol_report(&source)
            .unwrap();

        // 4 + 4 + 2, then one empty page
        assert_eq!(outcome.pages_read, 3);
        assert_eq!(source.calls.get(), 4);
    }

    #[test]
    fn test_empty_report_writes_no_file() {
        let source = VecSource::with_ports(0);
        let dir = tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path(), 10);

        let outcome = generator.tag_report(&source).unwrap();

        assert_eq!(outcome, ReportOutcome::default());
        assert!(!generator.tag_report_path().exists());
    }

    #[test]
    fn test_tag_report_format() {
        let mut source = VecSource::with_ports(0);
        source.tags = vec![
            TagCount { tag: "untagged".to_string(), count: 1 },
            TagCount { tag: "web".to_string(), count: 5 },
        ];
        let dir = tempdir().unwrap();

        let outcome = ReportGenerator::new(dir.path(), 1)
            .with_delimiter(',')
            .with_file_names("tags.csv", "ports.csv")
            .tag_report(&source)
            .unwrap();

        assert_eq!(outcome.path, Some(dir.path().join("tags.csv")));
        assert_eq!(
            std::fs::read_to_string(dir.path().join("tags.csv")).unwrap(),
            "Tag,Count\nuntagged,1\nweb,5\n"
        );
    }

    #[test]
    fn test_read_error_abandons_report_keeping_flushed_pages() {
        let mut source = VecSource::with_ports(10);
        source.fail_from_offset = Some(4);
        let dir = tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path(), 2);

        let err = generator.port_protocol_report(&source).unwrap_err();

        assert!(matches!(
            err,
            ReportError::Read {
                offset: 4,
                rows_written: 4,
                ..
            }
        ));
        let text = std::fs::read_to_string(generator.port_protocol_report_path()).unwrap();
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn test_read_error_on_first_page_leaves_no_file() {
        let mut source = VecSource::with_ports(3);
        source.fail_from_offset = Some(0);
        let dir = tempdir().unwrap();
        let generator = ReportGenerator::new(dir.path(), 2);

        assert!(generator.port_protocol_report(&source).is_err());
        assert!(!generator.port_protocol_report_path().exists());
    }
}
