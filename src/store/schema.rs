//! Idempotent schema bootstrap for the `flowlog` table

use rusqlite::Connection;

/// Table + index definitions; every statement uses IF NOT EXISTS
pub const FLOWLOG_SCHEMA: &str = include_str!("../../sql/00_flowlog.sql");

/// Create the `flowlog` table and its tag index if they do not exist yet.
///
/// Safe to run against a store left by a previous run; existing rows are kept.
pub fn create_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(FLOWLOG_SCHEMA)?;
    log::debug!("flowlog schema ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();

        conn.execute(
            "INSERT INTO flowlog (port, protocol, tag) VALUES (80, 'tcp', 'web')",
            [],
        )
        .unwrap();

        // Second bootstrap keeps the existing row
        create_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM flowlog", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_defaults_and_unique_constraint() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();

        conn.execute("INSERT INTO flowlog (port, protocol) VALUES (22, 'tcp')", [])
            .unwrap();

        let (tag, count): (String, i64) = conn
            .query_row(
                "SELECT tag, count FROM flowlog WHERE port = 22 AND protocol = 'tcp'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(tag, "untagged");
        assert_eq!(count, 0);

        let duplicate = conn.execute("INSERT INTO flowlog (port, protocol) VALUES (22, 'tcp')", []);
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_tag_index_exists() {
        let conn = Connection::open_in_memory().unwrap();
        create_schema(&conn).unwrap();

        let exists: bool = conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = 'idx_flowlog_tag')",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert!(exists);
    }
}
