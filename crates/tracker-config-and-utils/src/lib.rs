//! Configuration, paths, and logging setup for the tracker.

mod config;
mod error;
mod logging;
mod paths;
mod queue;

pub use config::{
    parse_endpoint_url, Config, DuplicateAccountConfig, DEFAULT_BATCHING_DELAY_MS,
    DEFAULT_ENDPOINT_URL, DEFAULT_LOG_LEVEL, DEFAULT_MAX_BATCH_SIZE, DEFAULT_MAX_QUEUED_EVENTS,
    DEFAULT_MIN_RETRY_INTERVAL_MS, DEFAULT_TABLE_NAME, DEFAULT_USER_AGENT,
    MAX_BATCHING_DELAY_MS,
};
pub use error::{CoreError, CoreResult};
pub use logging::{init_logging, init_logging_to_file};
pub use paths::Paths;
pub use queue::{is_valid_table_name, OverflowPolicy};
