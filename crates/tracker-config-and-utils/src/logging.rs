//! Logging initialization for tracker binaries.
//!
//! Thin wrapper over the observability package. Library crates never call
//! these; they only emit `tracing` events.

use crate::{CoreResult, Paths};
use observability::LogConfig;

/// Initialize stderr logging at the given default level.
///
/// `RUST_LOG` takes precedence when set.
pub fn init_logging(level: &str) {
    // stderr-only initialization cannot fail
    let _ = observability::init_with_config(LogConfig {
        service_name: "tracker".into(),
        default_level: level.into(),
        ..Default::default()
    });
}

/// Initialize stderr logging plus a JSONL file under the logs directory.
pub fn init_logging_to_file(level: &str, paths: &Paths) -> CoreResult<()> {
    paths.ensure_dirs()?;
    observability::init_with_config(LogConfig {
        service_name: "tracker".into(),
        default_level: level.into(),
        log_path: Some(paths.log_file()),
        also_stderr: true,
    })?;
    Ok(())
}
