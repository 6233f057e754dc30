//! Queue table settings shared by the config and the event store.

use serde::{Deserialize, Serialize};

/// Longest accepted table name.
const MAX_TABLE_NAME_LEN: usize = 64;

/// What happens to rows beyond the table limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the newest rows; the oldest excess rows are deleted.
    #[default]
    DropOldest,
    /// Keep the existing rows; blobs that do not fit are discarded.
    RejectNew,
}

/// Whether `name` can be used as a queue table name.
///
/// Names are interpolated into SQL, so only ASCII letters, digits and
/// underscores are allowed, and the first character may not be a digit.
pub fn is_valid_table_name(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= MAX_TABLE_NAME_LEN
        && (first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && !name.to_ascii_lowercase().starts_with("sqlite_")
}
