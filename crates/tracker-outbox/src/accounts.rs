//! Duplicate-account fan-out.
//!
//! A tracked event can be copied to extra destination accounts. Each copy is
//! the original payload with the account and application ids overwritten.

use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tracker_config_and_utils::DuplicateAccountConfig;

/// A tracking payload: one JSON object.
pub type Payload = serde_json::Map<String, Value>;

/// Payload field carrying the destination account id.
pub const ACCOUNT_ID_FIELD: &str = "accountId";

/// Payload field carrying the destination application id.
pub const APPLICATION_ID_FIELD: &str = "applicationId";

/// Decides per `(event name, account id)` whether a copy is made.
pub type DuplicateFilter = Arc<dyn Fn(&str, i64) -> bool + Send + Sync>;

/// An extra destination for copies of tracked events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationAccount {
    pub account_id: i64,
    pub application_id: i64,
    /// Event names never copied to this account.
    pub disabled_events: HashSet<String>,
}

impl DestinationAccount {
    /// Returns None unless both ids are positive.
    pub fn new(account_id: i64, application_id: i64) -> Option<Self> {
        if account_id <= 0 || application_id <= 0 {
            return None;
        }
        Some(Self {
            account_id,
            application_id,
            disabled_events: HashSet::new(),
        })
    }

    pub fn with_disabled_events<I, S>(mut self, events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.disabled_events.extend(events.into_iter().map(Into::into));
        self
    }

    pub fn from_config(config: &DuplicateAccountConfig) -> Option<Self> {
        Self::new(config.account_id, config.application_id)
            .map(|account| account.with_disabled_events(config.disabled_events.iter().cloned()))
    }

    pub fn accepts(&self, event_name: &str) -> bool {
        !self.disabled_events.contains(event_name)
    }

    /// A copy of `payload` addressed to this account.
    pub fn stamp(&self, payload: &Payload) -> Payload {
        let mut copy = payload.clone();
        copy.insert(ACCOUNT_ID_FIELD.to_string(), Value::from(self.account_id));
        copy.insert(APPLICATION_ID_FIELD.to_string(), Value::from(self.application_id));
        copy
    }
}

/// Copies of `payload` for every account that takes `event_name`.
///
/// An account is skipped when it disables the event or when `filter`
/// returns false for it. The original payload is never modified.
pub fn fan_out(
    event_name: &str,
    payload: &Payload,
    accounts: &[DestinationAccount],
    filter: Option<&DuplicateFilter>,
) -> Vec<Payload> {
    accounts
        .iter()
        .filter(|account| account.accepts(event_name))
        .filter(|account| filter.map_or(true, |f| f(event_name, account.account_id)))
        .map(|account| account.stamp(payload))
        .collect()
}
