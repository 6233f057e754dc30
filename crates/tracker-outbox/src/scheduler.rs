//! Batching delay and the coalescing flush timer.
//!
//! At most one timer is armed at a time. Enqueues that arrive while it is
//! armed only mark that more work exists, so a burst of events collapses
//! into one flush per window.

use async_trait::async_trait;
use guarded_resource::GuardedResource;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, warn};
use tracker_config_and_utils::{DEFAULT_BATCHING_DELAY_MS, MAX_BATCHING_DELAY_MS};

/// Longest accepted batching delay.
pub const MAX_BATCHING_DELAY: Duration = Duration::from_millis(MAX_BATCHING_DELAY_MS);

/// Caller-supplied delay computation.
pub type DelayFn = Arc<dyn Fn() -> Duration + Send + Sync>;

/// How long events accumulate before a flush.
#[derive(Clone)]
pub enum BatchingDelay {
    Fixed(Duration),
    /// Evaluated every time the timer is armed; results above
    /// [`MAX_BATCHING_DELAY`] are clamped.
    Dynamic(DelayFn),
}

impl BatchingDelay {
    pub fn dynamic(f: impl Fn() -> Duration + Send + Sync + 'static) -> Self {
        Self::Dynamic(Arc::new(f))
    }

    /// The delay to use right now.
    pub fn evaluate(&self) -> Duration {
        let delay = match self {
            Self::Fixed(delay) => *delay,
            Self::Dynamic(f) => f(),
        };
        if delay > MAX_BATCHING_DELAY {
            warn!(
                requested_ms = delay.as_millis() as u64,
                max_ms = MAX_BATCHING_DELAY_MS,
                "Batching delay clamped"
            );
            MAX_BATCHING_DELAY
        } else {
            delay
        }
    }

    pub fn is_dynamic(&self) -> bool {
        matches!(self, Self::Dynamic(_))
    }
}

impl Default for BatchingDelay {
    fn default() -> Self {
        Self::Fixed(Duration::from_millis(DEFAULT_BATCHING_DELAY_MS))
    }
}

impl fmt::Debug for BatchingDelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fixed(delay) => f.debug_tuple("Fixed").field(delay).finish(),
            Self::Dynamic(_) => f.write_str("Dynamic(..)"),
        }
    }
}

/// Result of one flush attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// A batch was accepted and removed from the store.
    Delivered { sent: usize, remaining: bool },
    /// Nothing was queued.
    Empty,
    /// Delivery failed; the rows stay queued.
    Failed { retained: usize },
    /// Another flush was already uploading.
    Busy,
    /// No endpoint is configured.
    NoEndpoint,
    /// The store is disabled; nothing was persisted to send.
    StoreUnavailable,
    /// The store could not be read; queued rows stay for a retry.
    StoreFailed,
}

/// The component a timer fire drains.
#[async_trait]
pub trait FlushTarget: Send + Sync {
    async fn flush(&self) -> FlushOutcome;
}

#[derive(Debug, Default, Clone, Copy)]
struct TimerState {
    armed: bool,
    enqueued_since_fire: bool,
    stopped: bool,
}

enum Rearm {
    Window,
    Retry,
}

/// Coalescing timer in front of a [`FlushTarget`].
pub struct BatchScheduler {
    delay: GuardedResource<BatchingDelay>,
    timer: GuardedResource<TimerState>,
    retry_floor: Duration,
    runtime: Handle,
    target: Weak<dyn FlushTarget>,
}

impl BatchScheduler {
    /// Timers run on `runtime`; fires are dropped once `target` is gone.
    pub fn new(
        delay: BatchingDelay,
        retry_floor: Duration,
        runtime: Handle,
        target: Weak<dyn FlushTarget>,
    ) -> Self {
        Self {
            delay: GuardedResource::new(delay),
            timer: GuardedResource::default(),
            retry_floor,
            runtime,
            target,
        }
    }

    /// Current batching delay, evaluating a dynamic delay now.
    pub fn batching_delay(&self) -> Duration {
        // Cloned out so a dynamic delay may call back into its owner.
        let delay = self.delay.get();
        delay.evaluate()
    }

    /// Install a fixed delay. Values above [`MAX_BATCHING_DELAY`] are rejected.
    pub fn set_batching_delay(&self, delay: Duration) -> bool {
        if delay > MAX_BATCHING_DELAY {
            warn!(
                requested_ms = delay.as_millis() as u64,
                max_ms = MAX_BATCHING_DELAY_MS,
                "Rejected batching delay"
            );
            return false;
        }
        self.delay.set(BatchingDelay::Fixed(delay));
        true
    }

    /// Install a delay computed on every arm.
    pub fn set_batching_delay_fn(&self, f: impl Fn() -> Duration + Send + Sync + 'static) {
        self.delay.set(BatchingDelay::dynamic(f));
    }

    pub(crate) fn delay_resource(&self) -> &GuardedResource<BatchingDelay> {
        &self.delay
    }

    pub fn is_armed(&self) -> bool {
        self.timer.with(|state| state.armed)
    }

    /// Note that rows were persisted. Arms the timer unless it already is.
    pub fn on_enqueue(self: &Arc<Self>) {
        let arm = self.timer.update(|state| {
            if state.stopped {
                return false;
            }
            if state.armed {
                state.enqueued_since_fire = true;
                false
            } else {
                state.armed = true;
                state.enqueued_since_fire = false;
                true
            }
        });

        if arm {
            self.spawn_timer(self.batching_delay());
        }
    }

    /// Arm after a failed manual flush, honoring the retry floor.
    pub fn on_flush_failed(self: &Arc<Self>) {
        let arm = self.timer.update(|state| {
            if state.stopped || state.armed {
                return false;
            }
            state.armed = true;
            true
        });

        if arm {
            self.spawn_timer(self.retry_delay());
        }
    }

    /// Run one flush and decide whether to arm again.
    pub async fn on_timer_fire(self: &Arc<Self>) {
        let stopped = self.timer.update(|state| {
            if state.stopped {
                state.armed = false;
            }
            state.enqueued_since_fire = false;
            state.stopped
        });
        if stopped {
            return;
        }

        let outcome = match self.target.upgrade() {
            Some(target) => target.flush().await,
            None => {
                self.timer.update(|state| state.armed = false);
                return;
            }
        };

        let rearm = self.timer.update(|state| {
            let rearm = if state.stopped {
                None
            } else {
                match outcome {
                    FlushOutcome::Delivered { remaining: true, .. } | FlushOutcome::Busy => {
                        Some(Rearm::Window)
                    }
                    FlushOutcome::Failed { .. } | FlushOutcome::StoreFailed => Some(Rearm::Retry),
                    FlushOutcome::Delivered { remaining: false, .. } | FlushOutcome::Empty
                        if state.enqueued_since_fire =>
                    {
                        Some(Rearm::Window)
                    }
                    _ => None,
                }
            };
            state.enqueued_since_fire = false;
            if rearm.is_none() {
                state.armed = false;
            }
            rearm
        });

        match rearm {
            Some(Rearm::Window) => self.spawn_timer(self.batching_delay()),
            Some(Rearm::Retry) => self.spawn_timer(self.retry_delay()),
            None => debug!(?outcome, "Flush timer idle"),
        }
    }

    /// Stop arming. A sleeping timer finds the flag and exits without flushing.
    pub fn stop(&self) {
        self.timer.update(|state| {
            state.stopped = true;
            state.armed = false;
        });
    }

    pub(crate) fn close(&self) {
        self.stop();
        self.delay.close();
        self.timer.close();
    }

    fn retry_delay(&self) -> Duration {
        self.batching_delay().max(self.retry_floor)
    }

    fn spawn_timer(self: &Arc<Self>, delay: Duration) {
        debug!(delay_ms = delay.as_millis() as u64, "Flush timer armed");
        let scheduler = Arc::clone(self);
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            scheduler.on_timer_fire().await;
        });
    }
}
