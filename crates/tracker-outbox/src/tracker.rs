//! Tracker facade: accepts payloads, persists them, and drives delivery.
//!
//! `process` never blocks on I/O. Payloads go to a single ingest worker that
//! writes whatever has queued up in one transaction and then notifies the
//! scheduler. Flushes read the oldest rows, post them, and delete exactly
//! the posted ids on success.

use crate::accounts::{fan_out, DestinationAccount, DuplicateFilter, Payload};
use crate::delivery::{Batch, DeliveryConfig, DeliveryTransport, HttpDeliveryClient};
use crate::scheduler::{BatchScheduler, BatchingDelay, FlushOutcome, FlushTarget, MAX_BATCHING_DELAY};
use crate::stats::{StatsSnapshot, TrackerStats};
use crate::{OutboxError, OutboxResult};
use async_trait::async_trait;
use guarded_resource::{lock_all, unlock_all, GuardedResource, Lockable};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};
use tracker_config_and_utils::{
    parse_endpoint_url, Config, Paths, DEFAULT_BATCHING_DELAY_MS, DEFAULT_MAX_BATCH_SIZE,
    DEFAULT_MAX_QUEUED_EVENTS, DEFAULT_MIN_RETRY_INTERVAL_MS, DEFAULT_TABLE_NAME,
};
use tracker_event_store::{EventStore, OverflowPolicy, StoreError};
use url::Url;

/// Most payloads written in one ingest transaction.
const MAX_INGEST_GROUP: usize = 512;

/// Tracker construction options.
#[derive(Debug, Clone)]
pub struct TrackerOptions {
    pub table_name: String,
    /// Nothing is accepted until an endpoint is set.
    pub endpoint_url: Option<Url>,
    pub batching_delay: Duration,
    pub max_queued_events: usize,
    pub max_batch_size: usize,
    pub overflow_policy: OverflowPolicy,
    pub min_retry_interval: Duration,
    pub duplicate_accounts: Vec<DestinationAccount>,
}

impl Default for TrackerOptions {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            endpoint_url: None,
            batching_delay: Duration::from_millis(DEFAULT_BATCHING_DELAY_MS),
            max_queued_events: DEFAULT_MAX_QUEUED_EVENTS,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            overflow_policy: OverflowPolicy::default(),
            min_retry_interval: Duration::from_millis(DEFAULT_MIN_RETRY_INTERVAL_MS),
            duplicate_accounts: Vec::new(),
        }
    }
}

impl TrackerOptions {
    /// Options from a validated configuration.
    pub fn from_config(config: &Config) -> OutboxResult<Self> {
        config.validate()?;
        Ok(Self {
            table_name: config.table_name.clone(),
            endpoint_url: config.endpoint_url()?,
            batching_delay: config.batching_delay(),
            max_queued_events: config.max_queued_events,
            max_batch_size: config.max_batch_size,
            overflow_policy: config.overflow_policy,
            min_retry_interval: config.min_retry_interval(),
            duplicate_accounts: config
                .duplicate_accounts
                .iter()
                .filter_map(DestinationAccount::from_config)
                .collect(),
        })
    }
}

/// Endpoint and batching delay read under one lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliverySettings {
    pub endpoint_url: Option<Url>,
    pub batching_delay: Duration,
}

enum IngestMessage {
    Payload(Vec<u8>),
    Barrier(oneshot::Sender<()>),
    Stop(oneshot::Sender<()>),
}

/// Handle to a running tracker. Clones share the same state.
#[derive(Clone)]
pub struct Tracker {
    inner: Arc<TrackerInner>,
}

struct TrackerInner {
    store: EventStore,
    table: String,
    max_batch_size: usize,
    endpoint: GuardedResource<Option<Url>>,
    uploading: GuardedResource<bool>,
    accounts: GuardedResource<Vec<DestinationAccount>>,
    duplicate_filter: GuardedResource<Option<DuplicateFilter>>,
    scheduler: Arc<BatchScheduler>,
    transport: Arc<dyn DeliveryTransport>,
    ingest: mpsc::UnboundedSender<IngestMessage>,
    stats: Arc<TrackerStats>,
    shutting_down: AtomicBool,
}

impl Tracker {
    /// Start a tracker on the current Tokio runtime.
    ///
    /// Rows left in the store by an earlier run are scheduled for delivery.
    pub async fn start(
        options: TrackerOptions,
        store: EventStore,
        transport: Arc<dyn DeliveryTransport>,
    ) -> OutboxResult<Self> {
        let runtime = Handle::try_current().map_err(|e| OutboxError::NoRuntime(e.to_string()))?;

        match store.ensure_table(&options.table_name).await {
            Ok(()) | Err(StoreError::Disabled) => {}
            Err(e) => error!(
                table = %options.table_name,
                error = %e,
                "Failed to prepare queue table"
            ),
        }

        let (ingest_tx, ingest_rx) = mpsc::unbounded_channel();
        let stats = Arc::new(TrackerStats::default());
        let table = options.table_name.clone();

        let inner = Arc::new_cyclic(|weak: &Weak<TrackerInner>| {
            let target: Weak<dyn FlushTarget> = weak.clone();
            TrackerInner {
                store: store.clone(),
                table: table.clone(),
                max_batch_size: options.max_batch_size,
                endpoint: GuardedResource::new(options.endpoint_url),
                uploading: GuardedResource::new(false),
                accounts: GuardedResource::new(options.duplicate_accounts),
                duplicate_filter: GuardedResource::new(None),
                scheduler: Arc::new(BatchScheduler::new(
                    BatchingDelay::Fixed(options.batching_delay),
                    options.min_retry_interval,
                    runtime.clone(),
                    target,
                )),
                transport,
                ingest: ingest_tx,
                stats: Arc::clone(&stats),
                shutting_down: AtomicBool::new(false),
            }
        });

        let worker = IngestWorker {
            store: store.clone(),
            table: table.clone(),
            max_queued_events: options.max_queued_events,
            overflow_policy: options.overflow_policy,
            stats,
            scheduler: Arc::clone(&inner.scheduler),
        };
        runtime.spawn(worker.run(ingest_rx));

        match store.count(&table).await {
            Ok(0) | Err(StoreError::Disabled) => {}
            Ok(pending) => {
                info!(table = %table, pending, "Recovered queued events");
                inner.scheduler.on_enqueue();
            }
            Err(e) => warn!(table = %table, error = %e, "Failed to count queued events"),
        }

        info!(
            table = %table,
            persistent = store.is_enabled(),
            "Tracker started"
        );
        Ok(Self { inner })
    }

    /// Start a tracker from configuration, storing rows under `paths`.
    ///
    /// A database that cannot be opened leaves the tracker running without
    /// persistence.
    pub async fn from_config(config: &Config, paths: &Paths) -> OutboxResult<Self> {
        let options = TrackerOptions::from_config(config)?;
        let store = EventStore::open_or_disabled(&paths.database_file(), &options.table_name).await;
        let transport = Arc::new(HttpDeliveryClient::new(DeliveryConfig::from(config))?);
        Self::start(options, store, transport).await
    }

    /// Queue a payload for delivery.
    ///
    /// Returns false when no endpoint is configured or the tracker has shut
    /// down. Persistence happens in the background.
    pub fn process(&self, payload: &Payload) -> bool {
        if self.inner.shutting_down.load(Ordering::Acquire) {
            debug!("Tracker shut down, payload ignored");
            return false;
        }
        if self.inner.endpoint.with(Option::is_none) {
            debug!("No endpoint configured, payload ignored");
            return false;
        }

        let blob = match serde_json::to_vec(payload) {
            Ok(blob) => blob,
            Err(e) => {
                warn!(error = %e, "Failed to serialize payload");
                return false;
            }
        };

        if self.inner.ingest.send(IngestMessage::Payload(blob)).is_err() {
            warn!("Ingest worker stopped, payload ignored");
            return false;
        }
        self.inner.stats.add_accepted(1);
        true
    }

    /// Queue a payload and its copies for the duplicate accounts.
    pub fn track(&self, event_name: &str, payload: &Payload) -> bool {
        let accepted = self.process(payload);
        if accepted {
            self.duplicate_event(event_name, payload);
        }
        accepted
    }

    /// Queue one copy of `payload` per duplicate account that takes
    /// `event_name`. Returns how many copies were queued.
    pub fn duplicate_event(&self, event_name: &str, payload: &Payload) -> usize {
        let accounts = self.inner.accounts.get();
        if accounts.is_empty() {
            return 0;
        }
        let filter = self.inner.duplicate_filter.get();

        let copies = fan_out(event_name, payload, &accounts, filter.as_ref());
        let queued = copies.iter().filter(|copy| self.process(copy)).count();
        debug!(event = event_name, queued, "Duplicated event");
        queued
    }

    /// Add a destination account. Non-positive or already known ids are rejected.
    pub fn add_duplicate_account(&self, account_id: i64, application_id: i64) -> bool {
        self.add_duplicate_account_with_disabled_events(
            account_id,
            application_id,
            std::iter::empty::<String>(),
        )
    }

    pub fn add_duplicate_account_with_disabled_events<I, S>(
        &self,
        account_id: i64,
        application_id: i64,
        disabled_events: I,
    ) -> bool
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(account) = DestinationAccount::new(account_id, application_id) else {
            warn!(account_id, application_id, "Rejected duplicate account");
            return false;
        };
        let account = account.with_disabled_events(disabled_events);

        let added = self.inner.accounts.update(|accounts| {
            if accounts.iter().any(|a| a.account_id == account_id) {
                return false;
            }
            accounts.push(account);
            true
        });
        if added {
            info!(account_id, application_id, "Added duplicate account");
        }
        added
    }

    pub fn remove_duplicate_account(&self, account_id: i64) -> bool {
        self.inner.accounts.update(|accounts| {
            let before = accounts.len();
            accounts.retain(|a| a.account_id != account_id);
            accounts.len() != before
        })
    }

    pub fn duplicate_accounts(&self) -> Vec<DestinationAccount> {
        self.inner.accounts.get()
    }

    /// Install a runtime filter consulted for every copy.
    pub fn set_duplicate_filter(&self, filter: impl Fn(&str, i64) -> bool + Send + Sync + 'static) {
        self.inner.duplicate_filter.set(Some(Arc::new(filter)));
    }

    pub fn clear_duplicate_filter(&self) {
        self.inner.duplicate_filter.set(None);
    }

    pub fn endpoint_url(&self) -> Option<Url> {
        self.inner.endpoint.get()
    }

    /// Replace the endpoint. Takes effect from the next flush.
    pub fn set_endpoint_url(&self, endpoint_url: Option<Url>) {
        let enabled = endpoint_url.is_some();
        match &endpoint_url {
            Some(url) => info!(url = %url, "Endpoint set"),
            None => info!("Endpoint cleared"),
        }
        self.inner.endpoint.set(endpoint_url);
        if enabled {
            self.inner.scheduler.on_enqueue();
        }
    }

    /// Parse and install an http(s) endpoint.
    pub fn set_endpoint(&self, raw: &str) -> OutboxResult<()> {
        let url = parse_endpoint_url(raw)?;
        self.set_endpoint_url(Some(url));
        Ok(())
    }

    pub fn batching_delay(&self) -> Duration {
        self.inner.scheduler.batching_delay()
    }

    /// Install a fixed delay. Delays above one minute are rejected.
    pub fn set_batching_delay(&self, delay: Duration) -> bool {
        self.inner.scheduler.set_batching_delay(delay)
    }

    /// Install a delay computed whenever the timer arms.
    pub fn set_batching_delay_fn(&self, f: impl Fn() -> Duration + Send + Sync + 'static) {
        self.inner.scheduler.set_batching_delay_fn(f);
    }

    /// Endpoint and delay as one consistent pair.
    pub fn delivery_settings(&self) -> DeliverySettings {
        let endpoint = &self.inner.endpoint;
        let delay = self.inner.scheduler.delay_resource();
        let fields: [&dyn Lockable; 2] = [endpoint, delay];

        lock_all(&fields);
        let endpoint_url = endpoint.get();
        let batching_delay = delay.get();
        unlock_all(&fields);

        DeliverySettings {
            endpoint_url,
            batching_delay: batching_delay.evaluate(),
        }
    }

    /// Replace endpoint and delay together.
    pub fn configure(&self, endpoint_url: Option<Url>, batching_delay: Duration) -> bool {
        if batching_delay > MAX_BATCHING_DELAY {
            warn!(
                requested_ms = batching_delay.as_millis() as u64,
                "Rejected batching delay"
            );
            return false;
        }

        let enabled = endpoint_url.is_some();
        let endpoint = &self.inner.endpoint;
        let delay = self.inner.scheduler.delay_resource();
        let fields: [&dyn Lockable; 2] = [endpoint, delay];

        lock_all(&fields);
        endpoint.set(endpoint_url);
        delay.set(BatchingDelay::Fixed(batching_delay));
        unlock_all(&fields);

        if enabled {
            self.inner.scheduler.on_enqueue();
        }
        true
    }

    /// Wait until every payload accepted so far has been written (or dropped).
    pub async fn settle(&self) {
        let (done_tx, done_rx) = oneshot::channel();
        if self.inner.ingest.send(IngestMessage::Barrier(done_tx)).is_ok() {
            let _ = done_rx.await;
        }
    }

    /// Settle, then run one flush now.
    pub async fn flush_now(&self) -> FlushOutcome {
        self.settle().await;
        let outcome = self.inner.flush().await;
        match outcome {
            FlushOutcome::Delivered { remaining: true, .. } => self.inner.scheduler.on_enqueue(),
            FlushOutcome::Failed { .. } | FlushOutcome::StoreFailed => {
                self.inner.scheduler.on_flush_failed()
            }
            _ => {}
        }
        outcome
    }

    /// Rows waiting in the store, after settling.
    pub async fn pending_count(&self) -> OutboxResult<usize> {
        self.settle().await;
        Ok(self.inner.store.count(&self.inner.table).await?)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Whether accepted payloads survive a restart.
    pub fn is_persistent(&self) -> bool {
        self.inner.store.is_enabled()
    }

    pub fn is_flush_scheduled(&self) -> bool {
        self.inner.scheduler.is_armed()
    }

    /// Persist what is queued, stop the timer, and close the store.
    ///
    /// Undelivered rows stay in the database for the next start. Later
    /// calls to `process` return false.
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let (done_tx, done_rx) = oneshot::channel();
        if self.inner.ingest.send(IngestMessage::Stop(done_tx)).is_ok() {
            let _ = done_rx.await;
        }

        self.inner.scheduler.close();
        self.inner.endpoint.close();
        self.inner.accounts.close();
        self.inner.duplicate_filter.close();

        if let Err(e) = self.inner.store.close_connection().await {
            debug!(error = %e, "Event store already closed");
        }
        info!("Tracker shut down");
    }
}

#[async_trait]
impl FlushTarget for TrackerInner {
    async fn flush(&self) -> FlushOutcome {
        let Some(_upload) = UploadSlot::claim(&self.uploading) else {
            debug!("Upload already in progress");
            return FlushOutcome::Busy;
        };
        self.drain_once().await
    }
}

impl TrackerInner {
    async fn drain_once(&self) -> FlushOutcome {
        let Some(endpoint) = self.endpoint.get() else {
            debug!("No endpoint configured, flush skipped");
            return FlushOutcome::NoEndpoint;
        };

        let fetched = match self.store.fetch_blobs(self.max_batch_size, &self.table).await {
            Ok(fetched) => fetched,
            Err(StoreError::Disabled) => return FlushOutcome::StoreUnavailable,
            Err(e) => {
                warn!(table = %self.table, error = %e, "Failed to read queued events");
                return FlushOutcome::StoreFailed;
            }
        };
        if fetched.is_empty() {
            return FlushOutcome::Empty;
        }

        let batch = Batch::new(fetched.ids, fetched.blobs);
        let sent = batch.len();

        if let Err(e) = self.transport.send(&endpoint, &batch).await {
            self.stats.add_failed_flush();
            warn!(
                url = %endpoint,
                events = sent,
                error = %e,
                "Batch delivery failed, events kept for retry"
            );
            return FlushOutcome::Failed { retained: sent };
        }

        match self.store.delete_blobs(batch.ids, &self.table).await {
            Ok(removed) => {
                self.stats.add_delivered(removed);
                info!(url = %endpoint, events = sent, "Batch sent successfully");
            }
            Err(e) => warn!(
                events = sent,
                error = %e,
                "Delivered events could not be removed and will be sent again"
            ),
        }

        let remaining = match self.store.count(&self.table).await {
            Ok(pending) => pending > 0,
            Err(e) => {
                warn!(table = %self.table, error = %e, "Failed to count queued events");
                true
            }
        };
        FlushOutcome::Delivered { sent, remaining }
    }
}

/// The in-flight upload flag, cleared when dropped.
struct UploadSlot<'a>(&'a GuardedResource<bool>);

impl<'a> UploadSlot<'a> {
    fn claim(flag: &'a GuardedResource<bool>) -> Option<Self> {
        let owned = flag.acquire();
        if owned.get() {
            return None;
        }
        owned.set(true);
        Some(Self(flag))
    }
}

impl Drop for UploadSlot<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

/// Writes queued payloads to the store in arrival order.
struct IngestWorker {
    store: EventStore,
    table: String,
    max_queued_events: usize,
    overflow_policy: OverflowPolicy,
    stats: Arc<TrackerStats>,
    scheduler: Arc<BatchScheduler>,
}

impl IngestWorker {
    async fn run(self, mut rx: mpsc::UnboundedReceiver<IngestMessage>) {
        debug!(table = %self.table, "Ingest worker started");

        while let Some(first) = rx.recv().await {
            let mut blobs = Vec::new();
            let mut waiters = Vec::new();
            let mut stop = None;

            let mut next = Some(first);
            while let Some(message) = next.take() {
                match message {
                    IngestMessage::Payload(blob) => blobs.push(blob),
                    IngestMessage::Barrier(done) => waiters.push(done),
                    IngestMessage::Stop(done) => {
                        stop = Some(done);
                        break;
                    }
                }
                if blobs.len() < MAX_INGEST_GROUP {
                    next = rx.try_recv().ok();
                }
            }

            if stop.is_some() {
                // Payloads that raced past the shutdown flag are still kept.
                rx.close();
                while let Ok(message) = rx.try_recv() {
                    match message {
                        IngestMessage::Payload(blob) => blobs.push(blob),
                        IngestMessage::Barrier(done) | IngestMessage::Stop(done) => {
                            waiters.push(done)
                        }
                    }
                }
            }

            self.persist(blobs).await;

            for done in waiters {
                let _ = done.send(());
            }
            if let Some(done) = stop {
                let _ = done.send(());
                break;
            }
        }

        debug!(table = %self.table, "Ingest worker stopped");
    }

    async fn persist(&self, blobs: Vec<Vec<u8>>) {
        if blobs.is_empty() {
            return;
        }
        let count = blobs.len();

        match self
            .store
            .insert(blobs, &self.table, self.max_queued_events, self.overflow_policy)
            .await
        {
            Ok(report) => {
                self.stats.add_persisted(report.inserted());
                self.stats.add_evicted(report.evicted);
                self.stats.add_rejected(report.rejected);
                if report.rejected > 0 {
                    warn!(
                        rejected = report.rejected,
                        limit = self.max_queued_events,
                        "Queue full, new events discarded"
                    );
                }
                if report.inserted() > 0 {
                    self.scheduler.on_enqueue();
                }
            }
            Err(StoreError::Disabled) => {
                self.stats.add_dropped(count);
                debug!(count, "Event store disabled, payloads dropped");
            }
            Err(e) => {
                self.stats.add_dropped(count);
                error!(count, error = %e, "Failed to persist payloads");
            }
        }
    }
}
