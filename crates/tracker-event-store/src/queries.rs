//! Queue table queries.
//!
//! Plain functions over a `rusqlite::Connection`; `EventStore` runs them on
//! its executor thread.

use crate::schema::quoted;
use crate::StoreResult;
use rusqlite::{params, Connection};
use tracing::debug;
use tracker_config_and_utils::OverflowPolicy;

/// Outcome of one insert transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    /// Row ids assigned to the inserted blobs, ascending.
    pub ids: Vec<i64>,
    /// Older rows deleted to respect the limit.
    pub evicted: usize,
    /// Incoming blobs discarded because the table was full.
    pub rejected: usize,
}

impl InsertReport {
    pub fn inserted(&self) -> usize {
        self.ids.len()
    }
}

/// Oldest rows of a queue table, ascending by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchedBlobs {
    pub blobs: Vec<Vec<u8>>,
    pub ids: Vec<i64>,
}

impl FetchedBlobs {
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Insert blobs in one transaction, then enforce `limit` per `policy`.
pub(crate) fn insert_blobs(
    conn: &mut Connection,
    table: &str,
    blobs: &[Vec<u8>],
    limit: usize,
    policy: OverflowPolicy,
) -> StoreResult<InsertReport> {
    let name = quoted(table)?;
    let tx = conn.transaction()?;
    let mut report = InsertReport::default();

    let accepted = match policy {
        OverflowPolicy::DropOldest => blobs,
        OverflowPolicy::RejectNew => {
            let room = limit.saturating_sub(count_rows_in(&tx, &name)?);
            let fits = blobs.len().min(room);
            report.rejected = blobs.len() - fits;
            &blobs[..fits]
        }
    };

    {
        let mut stmt = tx.prepare(&format!("INSERT INTO {name} (data) VALUES (?1)"))?;
        for blob in accepted {
            stmt.execute([blob.as_slice()])?;
            report.ids.push(tx.last_insert_rowid());
        }
    }

    if policy == OverflowPolicy::DropOldest {
        let total = count_rows_in(&tx, &name)?;
        if total > limit {
            let excess = (total - limit) as i64;
            report.evicted = tx.execute(
                &format!(
                    "DELETE FROM {name} WHERE id IN (SELECT id FROM {name} ORDER BY id ASC LIMIT ?1)"
                ),
                params![excess],
            )?;
        }
    }

    tx.commit()?;

    debug!(
        table,
        inserted = report.ids.len(),
        evicted = report.evicted,
        rejected = report.rejected,
        "Inserted blobs"
    );
    Ok(report)
}

/// Up to `count` oldest rows, without removing them.
pub(crate) fn fetch_blobs(conn: &Connection, table: &str, count: usize) -> StoreResult<FetchedBlobs> {
    let name = quoted(table)?;
    let mut stmt = conn.prepare(&format!(
        "SELECT id, data FROM {name} ORDER BY id ASC LIMIT ?1"
    ))?;

    let rows = stmt
        .query_map(params![count as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut fetched = FetchedBlobs::default();
    for (id, blob) in rows {
        fetched.ids.push(id);
        fetched.blobs.push(blob);
    }
    Ok(fetched)
}

/// Delete exactly the given ids. Unknown ids are ignored.
pub(crate) fn delete_blobs(conn: &mut Connection, table: &str, ids: &[i64]) -> StoreResult<usize> {
    let name = quoted(table)?;
    let tx = conn.transaction()?;
    let mut removed = 0;
    {
        let mut stmt = tx.prepare(&format!("DELETE FROM {name} WHERE id = ?1"))?;
        for id in ids {
            removed += stmt.execute(params![id])?;
        }
    }
    tx.commit()?;

    debug!(table, requested = ids.len(), removed, "Deleted blobs");
    Ok(removed)
}

/// Number of rows in a queue table.
pub(crate) fn count_rows(conn: &Connection, table: &str) -> StoreResult<usize> {
    count_rows_in(conn, &quoted(table)?)
}

fn count_rows_in(conn: &Connection, quoted_name: &str) -> StoreResult<usize> {
    let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {quoted_name}"), [], |row| {
        row.get(0)
    })?;
    Ok(count as usize)
}
