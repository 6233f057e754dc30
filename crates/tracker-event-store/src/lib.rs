//! SQLite-backed event queue for the tracker.
//!
//! This crate provides:
//! - `EventStore`: async handle over a dedicated SQLite thread
//! - Queue tables of `(id INTEGER PRIMARY KEY AUTOINCREMENT, data BLOB)`
//! - Bounded inserts with a configurable overflow policy
//!
//! # Architecture
//!
//! All SQL runs on the single executor thread owned by `tokio-rusqlite`.
//! Callers await results without blocking their own thread, and inserts,
//! fetches and deletes are serialized in FIFO order.
//!
//! ```ignore
//! let store = EventStore::open(&path).await?;
//! store.ensure_table("events").await?;
//! let report = store.insert(vec![blob], "events", 1_000, OverflowPolicy::DropOldest).await?;
//! let batch = store.fetch_blobs(50, "events").await?;
//! store.delete_blobs(batch.ids, "events").await?;
//! ```

mod error;
mod queries;
mod schema;
mod store;

pub use error::{StoreError, StoreResult};
pub use queries::{FetchedBlobs, InsertReport};
pub use tracker_config_and_utils::{is_valid_table_name, OverflowPolicy};
pub use store::EventStore;
