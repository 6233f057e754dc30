//! Durable batching and delivery of tracking payloads.
//!
//! This crate provides:
//! - Tracker: facade that accepts payloads, persists them, and drives delivery
//! - BatchScheduler: coalescing flush timer with a fixed or computed delay
//! - HttpDeliveryClient: posts batches as JSON arrays, 2xx meaning success
//! - Duplicate-account fan-out of tracked events

mod accounts;
mod delivery;
mod error;
mod scheduler;
mod stats;
mod tracker;

pub use accounts::{
    fan_out, DestinationAccount, DuplicateFilter, Payload, ACCOUNT_ID_FIELD, APPLICATION_ID_FIELD,
};
pub use delivery::{Batch, DeliveryConfig, DeliveryTransport, HttpDeliveryClient};
pub use error::{OutboxError, OutboxResult};
pub use scheduler::{
    BatchScheduler, BatchingDelay, DelayFn, FlushOutcome, FlushTarget, MAX_BATCHING_DELAY,
};
pub use stats::StatsSnapshot;
pub use tracker::{DeliverySettings, Tracker, TrackerOptions};
