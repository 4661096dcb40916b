//! Connection PRAGMAs shared by every SQLite handle the pipeline opens

use rusqlite::Connection;
use std::time::Duration;

/// WAL auto-checkpoint threshold, in pages
pub const WAL_AUTOCHECKPOINT_PAGES: i64 = 1000;

/// Apply the PRAGMA set used for batch ingestion.
///
/// - `journal_mode = WAL`: commits append to the log instead of rewriting pages
/// - `synchronous = NORMAL`: safe with WAL, one fsync per checkpoint
/// - `temp_store = MEMORY`: sort/group temp tables for the reports stay off disk
/// - `wal_autocheckpoint`: keeps the -wal file bounded on long runs
/// - busy timeout: a leftover reader from a previous run gets a chance to finish
pub fn apply_optimized_pragmas(conn: &Connection) -> rusqlite::Result<()> {
    // journal_mode returns the resulting mode as a row
    let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.pragma_update(None, "temp_store", "MEMORY")?;
    conn.pragma_update(None, "wal_autocheckpoint", WAL_AUTOCHECKPOINT_PAGES)?;
    conn.busy_timeout(Duration::from_secs(5))?;

    log::debug!("SQLite PRAGMAs applied (journal_mode={})", mode);
    Ok(())
}
