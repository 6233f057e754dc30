//! Queue table schema.

use crate::{StoreError, StoreResult};
use rusqlite::Connection;
use tracing::debug;
use tracker_config_and_utils::is_valid_table_name;

/// Connection pragmas applied to file-backed stores.
pub(crate) const FILE_PRAGMAS: &str = "
    PRAGMA journal_mode = WAL;
    PRAGMA synchronous = NORMAL;
    PRAGMA cache_size = -8000;
    PRAGMA temp_store = MEMORY;
    PRAGMA busy_timeout = 5000;
";

/// Validate and quote a table name for SQL.
pub(crate) fn quoted(table: &str) -> StoreResult<String> {
    if is_valid_table_name(table) {
        Ok(format!("\"{table}\""))
    } else {
        Err(StoreError::InvalidTable(table.to_string()))
    }
}

/// Create the queue table if it does not exist.
pub(crate) fn create_queue_table(conn: &Connection, table: &str) -> StoreResult<()> {
    let name = quoted(table)?;
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {name} (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            data BLOB NOT NULL
        )"
    ))?;
    debug!(table, "Queue table ready");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_queue_table_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_queue_table(&conn, "events").unwrap();
        create_queue_table(&conn, "events").unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'events'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_create_queue_table_rejects_bad_name() {
        let conn = Connection::open_in_memory().unwrap();
        let result = create_queue_table(&conn, "x; DROP TABLE y");
        assert!(matches!(result, Err(StoreError::InvalidTable(_))));
    }
}
