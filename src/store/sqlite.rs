//! SQLite implementation of the flow tally store
//!
//! One connection serves both the write side (`UpsertWriter`) and the read side
//! (`ReportSource`). Each batch write runs inside its own transaction; the
//! rusqlite `Transaction` rolls back on drop, so every early return rolls the
//! whole batch back.

use super::schema::create_schema;
use super::{Page, ReportSource, StoreError, UpsertWriter};
use crate::model::{CountDelta, LookupRow, PortProtocolCount, TagCount};
use crate::sqlite_pragma::apply_optimized_pragmas;
use rusqlite::{params, Connection};
use std::path::Path;

const UPSERT_COUNT_SQL: &str = "INSERT INTO flowlog (port, protocol, count) VALUES (?1, ?2, ?3)
     ON CONFLICT(port, protocol) DO UPDATE SET count = flowlog.count + excluded.count";

const UPSERT_TAG_SQL: &str = "INSERT INTO flowlog (port, protocol, tag) VALUES (?1, ?2, ?3)
     ON CONFLICT(port, protocol) DO UPDATE SET tag = excluded.tag";

const TAG_PAGE_SQL: &str = "SELECT LOWER(tag) AS tag_key, SUM(count) AS total
     FROM flowlog
     GROUP BY tag_key
     HAVING total > 0
     ORDER BY tag_key ASC
     LIMIT ?1 OFFSET ?2";

const PORT_PROTOCOL_PAGE_SQL: &str = "SELECT port, protocol, count
     FROM flowlog
     WHERE count > 0
     ORDER BY port ASC, protocol ASC
     LIMIT ?1 OFFSET ?2";

/// SQLite-backed flow tally store
pub struct SqliteFlowStore {
    conn: Connection,
}

impl SqliteFlowStore {
    /// Open (or create) the store at `db_path` and make sure the schema exists.
    ///
    /// Rows from a previous run are kept; counts keep accumulating on top of them.
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();

        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        apply_optimized_pragmas(&conn)?;

        log::info!("SQLite flow store opened: {}", db_path.display());
        Self::from_connection(conn)
    }

    /// In-memory store, used by tests and dry runs
    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    /// Wrap an existing connection, creating the schema if needed
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Underlying connection, for inspection
    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Number of `(port, protocol)` rows
    pub fn row_count(&self) -> Result<u64, StoreError> {
        let rows: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM flowlog", [], |row| row.get(0))?;
        to_unsigned(rows, "row count")
    }

    /// Sum of `count` over every row
    pub fn total_count(&self) -> Result<u64, StoreError> {
        let total: i64 = self.conn.query_row(
            "SELECT COALESCE(SUM(count), 0) FROM flowlog",
            [],
            |row| row.get(0),
        )?;
        to_unsigned(total, "total count")
    }
}

impl UpsertWriter for SqliteFlowStore {
    fn upsert_counts(&mut self, batch: &[CountDelta]) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_COUNT_SQL)?;
            for record in batch {
                let delta = i64::try_from(record.delta).map_err(|_| StoreError::CountOverflow {
                    key: record.key.to_string(),
                    value: record.delta,
                })?;
                stmt.execute(params![record.key.port, record.key.protocol, delta])?;
            }
        }
        tx.commit()?;

        log::debug!("Upserted {} port/protocol counts", batch.len());
        Ok(batch.len())
    }

    fn upsert_tags(&mut self, batch: &[LookupRow]) -> Result<usize, StoreError> {
        if batch.is_empty() {
            return Ok(0);
        }

        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(UPSERT_TAG_SQL)?;
            for row in batch {
                stmt.execute(params![row.key.port, row.key.protocol, row.tag])?;
            }
        }
        tx.commit()?;

        log::debug!("Upserted {} lookup tags", batch.len());
        Ok(batch.len())
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}

impl ReportSource for SqliteFlowStore {
    fn tag_counts(&self, page: Page) -> Result<Vec<TagCount>, StoreError> {
        let mut stmt = self.conn.prepare_cached(TAG_PAGE_SQL)?;
        let rows = stmt.query_map(params![sql_int(page.limit), sql_int(page.offset)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (tag, total) = row?;
            let count = to_unsigned(total, &tag)?;
            counts.push(TagCount { tag, count });
        }
        Ok(counts)
    }

    fn port_protocol_counts(&self, page: Page) -> Result<Vec<PortProtocolCount>, StoreError> {
        let mut stmt = self.conn.prepare_cached(PORT_PROTOCOL_PAGE_SQL)?;
        let rows = stmt.query_map(params![sql_int(page.limit), sql_int(page.offset)], |row| {
            Ok((
                row.get::<_, u16>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
            ))
        })?;

        let mut counts = Vec::new();
        for row in rows {
            let (port, protocol, count) = row?;
            let count = to_unsigned(count, &format!("{}/{}", port, protocol))?;
            counts.push(PortProtocolCount {
                port,
                protocol,
                count,
            });
        }
        Ok(counts)
    }
}

/// LIMIT/OFFSET operand; sizes past `i64::MAX` clamp, which SQLite reads as unbounded
fn sql_int(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn to_unsigned(value: i64, what: &str) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::InvalidRow(format!("negative value {} for {}", value, what)))
}
