//! Async event store over a dedicated SQLite thread.

use crate::queries::{self, FetchedBlobs, InsertReport};
use crate::{schema, OverflowPolicy, StoreError, StoreResult};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_rusqlite::Connection;
use tracing::{error, info};

/// Convert a tokio_rusqlite::Error to StoreError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
        tokio_rusqlite::Error::ConnectionClosed => StoreError::Closed,
        tokio_rusqlite::Error::Close(_) => StoreError::Closed,
        other => StoreError::Connection(other.to_string()),
    }
}

/// Durable queue of opaque blobs.
///
/// Cloning is cheap and every clone talks to the same executor thread.
/// A store that failed to open is *disabled*: it accepts calls and answers
/// each with [`StoreError::Disabled`] instead of persisting anything.
#[derive(Clone)]
pub struct EventStore {
    conn: Option<Connection>,
    path: String,
    closed: Arc<AtomicBool>,
}

impl EventStore {
    /// Open a store at the given path.
    ///
    /// Creates the file and parent directories if missing and applies WAL
    /// pragmas. Queue tables are created separately by [`ensure_table`](Self::ensure_table).
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening event store");

        let conn = Connection::open(path)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        conn.call(|conn| {
            conn.execute_batch(schema::FILE_PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        Ok(Self::from_connection(conn, path_str))
    }

    /// Open an in-memory store for testing.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self::from_connection(conn, ":memory:".to_string()))
    }

    /// Open a store and create `table`, degrading to a disabled store on any failure.
    pub async fn open_or_disabled(path: &Path, table: &str) -> Self {
        let opened = match Self::open(path).await {
            Ok(store) => store.ensure_table(table).await.map(|_| store),
            Err(e) => Err(e),
        };

        match opened {
            Ok(store) => store,
            Err(e) => {
                error!(
                    path = %path.display(),
                    table,
                    error = %e,
                    "Event store unavailable, tracking continues without persistence"
                );
                Self::disabled(path.to_string_lossy().to_string())
            }
        }
    }

    /// A store that never persists.
    pub fn disabled(path: String) -> Self {
        Self {
            conn: None,
            path,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn from_connection(conn: Connection, path: String) -> Self {
        Self {
            conn: Some(conn),
            path,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Execute a closure on the connection's executor thread.
    ///
    /// Only SQL and lightweight row mapping belong inside the closure; it
    /// runs on the single thread every other store operation waits on.
    async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.as_ref().ok_or(StoreError::Disabled)?;
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }

        let outer_result = conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Create a queue table if it does not exist.
    pub async fn ensure_table(&self, table: &str) -> StoreResult<()> {
        let table = table.to_string();
        self.call(move |conn| schema::create_queue_table(conn, &table))
            .await
    }

    /// Append blobs in one transaction and bound the table to `limit` rows.
    ///
    /// Resolves once the transaction has committed.
    pub async fn insert(
        &self,
        blobs: Vec<Vec<u8>>,
        table: &str,
        limit: usize,
        policy: OverflowPolicy,
    ) -> StoreResult<InsertReport> {
        if blobs.is_empty() {
            return Ok(InsertReport::default());
        }
        let table = table.to_string();
        self.call(move |conn| queries::insert_blobs(conn, &table, &blobs, limit, policy))
            .await
    }

    /// Up to `count` oldest rows, ascending by id. Nothing is removed.
    pub async fn fetch_blobs(&self, count: usize, table: &str) -> StoreResult<FetchedBlobs> {
        let table = table.to_string();
        self.call(move |conn| queries::fetch_blobs(conn, &table, count))
            .await
    }

    /// Remove exactly the given ids; ids no longer present are ignored.
    ///
    /// Returns how many rows were actually removed.
    pub async fn delete_blobs(&self, ids: Vec<i64>, table: &str) -> StoreResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let table = table.to_string();
        self.call(move |conn| queries::delete_blobs(conn, &table, &ids))
            .await
    }

    /// Number of rows waiting in `table`.
    pub async fn count(&self, table: &str) -> StoreResult<usize> {
        let table = table.to_string();
        self.call(move |conn| queries::count_rows(conn, &table)).await
    }

    /// Whether this store persists anything.
    pub fn is_enabled(&self) -> bool {
        self.conn.is_some()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Release the connection.
    ///
    /// Waits for queued operations, then stops the executor thread. Every
    /// later call on any clone returns [`StoreError::Closed`].
    pub async fn close_connection(&self) -> StoreResult<()> {
        let Some(conn) = self.conn.clone() else {
            return Ok(());
        };
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        conn.close().await.map_err(from_tokio_rusqlite)?;
        info!(path = %self.path, "Event store closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const TABLE: &str = "events";

    async fn open_store(dir: &tempfile::TempDir) -> EventStore {
        let store = EventStore::open(&dir.path().join("queue.sqlite")).await.unwrap();
        store.ensure_table(TABLE).await.unwrap();
        store
    }

    fn blob(s: &str) -> Vec<u8> {
        s.as_bytes().to_vec()
    }

    #[tokio::test]
    async fn test_insert_then_fetch_preserves_order() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let input = vec![blob("{\"n\":1}"), blob("{\"n\":2}"), blob("{\"n\":3}")];
        store
            .insert(input.clone(), TABLE, 100, OverflowPolicy::DropOldest)
            .await
            .unwrap();

        let fetched = store.fetch_blobs(input.len(), TABLE).await.unwrap();
        assert_eq!(fetched.blobs, input);
        assert!(fetched.ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[tokio::test]
    async fn test_fetch_does_not_remove_rows() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        store
            .insert(vec![blob("a")], TABLE, 10, OverflowPolicy::DropOldest)
            .await
            .unwrap();

        let first = store.fetch_blobs(10, TABLE).await.unwrap();
        let second = store.fetch_blobs(10, TABLE).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(store.count(TABLE).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_two_blobs_within_limit_then_delete_all() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let report = store
            .insert(vec![blob("one"), blob("two")], TABLE, 2, OverflowPolicy::DropOldest)
            .await
            .unwrap();
        assert_eq!(report.ids, vec![1, 2]);

        let fetched = store.fetch_blobs(2, TABLE).await.unwrap();
        assert_eq!(fetched.blobs, vec![blob("one"), blob("two")]);

        store.delete_blobs(vec![1, 2], TABLE).await.unwrap();
        assert!(store.fetch_blobs(2, TABLE).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_three_blobs_over_limit_keeps_newest_two() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;

        let report = store
            .insert(
                vec![blob("old"), blob("mid"), blob("new")],
                TABLE,
                2,
                OverflowPolicy::DropOldest,
            )
            .await
            .unwrap();
        assert_eq!(report.evicted, 1);

        let fetched = store.fetch_blobs(10, TABLE).await.unwrap();
        assert_eq!(fetched.blobs, vec![blob("mid"), blob("new")]);
        assert!(!fetched.blobs.contains(&blob("old")));
    }

    #[tokio::test]
    async fn test_delete_is_exact_and_idempotent() {
        let dir = tempdir().unwrap();
        let store = open_store(&dir).await;
        let report = store
            .insert(
                vec![blob("a"), blob("b"), blob("c")],
                TABLE,
                10,
                OverflowPolicy::DropOldest,
            )
            .await
            .unwrap();

        let removed = store.delete_blobs(vec![report.ids[1]], TABLE).await.unwrap();
        assert_eq!(removed, 1);
        let removed_again = store.delete_blobs(vec![report.ids[1]], TABLE).await.unwrap();
        assert_eq!(removed_again, 0);

        let fetched = store.fetch_blobs(10, TABLE).await.unwrap();
        assert_eq!(fetched.blobs, vec![blob("a"), blob("c")]);
        assert_eq!(fetched.ids, vec![report.ids[0], report.ids[2]]);
    }

    #[tokio::test]
    async fn test_rows_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("queue.sqlite");
        {
            let store = EventStore::open(&path).await.unwrap();
            store.ensure_table(TABLE).await.unwrap();
            store
                .insert(vec![blob("persisted")], TABLE, 10, OverflowPolicy::DropOldest)
                .await
                .unwrap();
            store.close_connection().await.unwrap();
        }

        let store = EventStore::open(&path).await.unwrap();
        store.ensure_table(TABLE).await.unwrap();
        let fetched = store.fetch_blobs(10, TABLE).await.unwrap();
        assert_eq!(fetched.blobs, vec![blob("persisted")]);
    }

    #[tokio::test]
    async fn test_operations_after_close_fail_cleanly() {
        let store = EventStore::open_in_memory().await.unwrap();
        store.ensure_table(TABLE).await.unwrap();
        let other_handle = store.clone();

        store.close_connection().await.unwrap();
        assert!(store.is_closed());

        let result = other_handle
            .insert(vec![blob("late")], TABLE, 10, OverflowPolicy::DropOldest)
            .await;
        assert!(matches!(result, Err(StoreError::Closed)));
        assert!(matches!(
            other_handle.fetch_blobs(1, TABLE).await,
            Err(StoreError::Closed)
        ));

        // Closing twice is fine.
        store.close_connection().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_failure_degrades_to_disabled() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, b"file").unwrap();

        let store = EventStore::open_or_disabled(&blocker.join("queue.sqlite"), TABLE).await;
        assert!(!store.is_enabled());

        let result = store
            .insert(vec![blob("dropped")], TABLE, 10, OverflowPolicy::DropOldest)
            .await;
        assert!(matches!(result, Err(StoreError::Disabled)));
    }

    #[tokio::test]
    async fn test_invalid_table_degrades_to_disabled() {
        let dir = tempdir().unwrap();
        let store =
            EventStore::open_or_disabled(&dir.path().join("queue.sqlite"), "bad name").await;
        assert!(!store.is_enabled());
    }

    #[tokio::test]
    async fn test_concurrent_inserts_get_unique_ids() {
        let store = EventStore::open_in_memory().await.unwrap();
        store.ensure_table(TABLE).await.unwrap();

        let mut handles = vec![];
        for task in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let blobs = (0..20).map(|i| format!("{task}-{i}").into_bytes()).collect();
                store
                    .insert(blobs, TABLE, 10_000, OverflowPolicy::DropOldest)
                    .await
                    .unwrap()
            }));
        }

        let mut all_ids = vec![];
        for handle in handles {
            all_ids.extend(handle.await.unwrap().ids);
        }
        all_ids.sort_unstable();
        all_ids.dedup();

        assert_eq!(all_ids.len(), 200);
        assert_eq!(store.count(TABLE).await.unwrap(), 200);
    }

    #[tokio::test]
    async fn test_separate_tables_are_independent() {
        let store = EventStore::open_in_memory().await.unwrap();
        store.ensure_table("events").await.unwrap();
        store.ensure_table("events_secondary").await.unwrap();

        store
            .insert(vec![blob("a")], "events", 10, OverflowPolicy::DropOldest)
            .await
            .unwrap();

        assert_eq!(store.count("events").await.unwrap(), 1);
        assert_eq!(store.count("events_secondary").await.unwrap(), 0);
    }
}
