//! Shared harness for tracker integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracker_event_store::EventStore;
use tracker_outbox::{
    Batch, DeliveryTransport, OutboxError, OutboxResult, Payload, Tracker, TrackerOptions,
};
use url::Url;

/// Transport double that records every request body.
#[derive(Default)]
pub struct RecordingTransport {
    bodies: Mutex<Vec<Vec<u8>>>,
    failing: AtomicBool,
    events: AtomicUsize,
}

impl RecordingTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        let transport = Self::default();
        transport.failing.store(true, Ordering::SeqCst);
        Arc::new(transport)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn request_count(&self) -> usize {
        self.bodies.lock().len()
    }

    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.bodies.lock().clone()
    }

    /// Request bodies parsed as JSON arrays.
    pub fn requests(&self) -> Vec<Vec<Value>> {
        self.bodies()
            .iter()
            .map(|body| serde_json::from_slice::<Vec<Value>>(body).unwrap())
            .collect()
    }

    /// Events carried by successful requests.
    pub fn delivered_events(&self) -> usize {
        self.events.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeliveryTransport for RecordingTransport {
    async fn send(&self, _endpoint: &Url, batch: &Batch) -> OutboxResult<()> {
        let body = batch.json_body();
        self.bodies.lock().push(body);
        if self.failing.load(Ordering::SeqCst) {
            return Err(OutboxError::Status {
                status: 500,
                body: "internal error".to_string(),
            });
        }
        self.events.fetch_add(batch.len(), Ordering::SeqCst);
        Ok(())
    }
}

pub fn endpoint() -> Url {
    Url::parse("http://collector.test/v1/batch").unwrap()
}

pub fn options(batching_delay: Duration) -> TrackerOptions {
    TrackerOptions {
        endpoint_url: Some(endpoint()),
        batching_delay,
        ..TrackerOptions::default()
    }
}

pub fn payload(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        other => panic!("payload must be an object, got {other}"),
    }
}

pub async fn start_at(
    path: &Path,
    options: TrackerOptions,
    transport: Arc<RecordingTransport>,
) -> Tracker {
    let store = EventStore::open(path).await.unwrap();
    Tracker::start(options, store, transport).await.unwrap()
}

pub async fn sleep_ms(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
