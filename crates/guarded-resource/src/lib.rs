//! Thread-affine reentrant lock around a single shared value.
//!
//! A `GuardedResource<T>` pairs one value with explicit ownership:
//! - `lock()` / `unlock()` make the calling thread the owner. Ownership is
//!   reentrant: the owner may lock again and must unlock the same number of times.
//! - `get()` / `set()` never take ownership. They wait while *another* thread
//!   owns the resource, then access the value.
//!
//! Several resources can be locked together (see [`lock_all`]) so that a
//! composite object performs a multi-field read-modify-write without one
//! coarse mutex over unrelated state.
//!
//! ```ignore
//! let delay = GuardedResource::new(Duration::from_secs(10));
//! delay.lock();
//! let current = delay.get();
//! delay.set(current * 2);
//! delay.unlock();
//! ```

use parking_lot::{Condvar, Mutex, MutexGuard};
use std::fmt;
use std::thread::{self, ThreadId};
use tracing::warn;

/// Ownership bookkeeping stored alongside the value.
struct Slot<T> {
    value: T,
    owner: Option<ThreadId>,
    depth: usize,
    closed: bool,
}

/// A value whose access is serialized by a reentrant, thread-affine lock.
pub struct GuardedResource<T> {
    slot: Mutex<Slot<T>>,
    released: Condvar,
}

impl<T> GuardedResource<T> {
    /// Wrap a value.
    pub fn new(value: T) -> Self {
        Self {
            slot: Mutex::new(Slot {
                value,
                owner: None,
                depth: 0,
                closed: false,
            }),
            released: Condvar::new(),
        }
    }

    /// Take (or re-enter) ownership for the calling thread.
    ///
    /// Blocks while another thread owns the resource. Returns immediately
    /// without ownership once the resource has been closed.
    pub fn lock(&self) {
        let me = thread::current().id();
        let mut slot = self.slot.lock();
        loop {
            if slot.closed {
                return;
            }
            match slot.owner {
                None => {
                    slot.owner = Some(me);
                    slot.depth = 1;
                    return;
                }
                Some(owner) if owner == me => {
                    slot.depth += 1;
                    return;
                }
                Some(_) => self.released.wait(&mut slot),
            }
        }
    }

    /// Release one level of ownership.
    ///
    /// When the count reaches zero the resource is free and parked threads
    /// are woken. Unlocking from a thread that is not the owner does nothing;
    /// debug builds treat it as a contract violation.
    pub fn unlock(&self) {
        let me = thread::current().id();
        let mut slot = self.slot.lock();
        if slot.closed {
            return;
        }
        if slot.owner != Some(me) {
            drop(slot);
            foreign_unlock();
            return;
        }

        slot.depth -= 1;
        if slot.depth == 0 {
            slot.owner = None;
            drop(slot);
            self.released.notify_all();
        }
    }

    /// Take ownership and release it when the returned guard drops.
    pub fn acquire(&self) -> Ownership<'_, T> {
        self.lock();
        Ownership { resource: self }
    }

    /// Whether any thread currently owns the resource.
    pub fn is_locked(&self) -> bool {
        self.slot.lock().owner.is_some()
    }

    /// Whether the calling thread is the current owner.
    pub fn is_held_by_current_thread(&self) -> bool {
        self.slot.lock().owner == Some(thread::current().id())
    }

    /// Read a copy of the value, waiting while another thread owns it.
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.accessible().value.clone()
    }

    /// Replace the value, waiting while another thread owns it.
    pub fn set(&self, value: T) {
        self.accessible().value = value;
    }

    /// Replace the value and return the previous one.
    pub fn replace(&self, value: T) -> T {
        std::mem::replace(&mut self.accessible().value, value)
    }

    /// Inspect the value in place.
    ///
    /// The closure runs under the internal mutex and must not touch this
    /// same resource.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.accessible().value)
    }

    /// Mutate the value in place. Same restriction as [`with`](Self::with).
    pub fn update<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        f(&mut self.accessible().value)
    }

    /// Tear the resource down while it may still be contended.
    ///
    /// Ownership is dropped and every parked thread is woken. Afterwards
    /// `lock`/`unlock` are no-ops and `get`/`set` no longer wait, so the
    /// value seen by a woken thread is whatever the last writer left.
    pub fn close(&self) {
        let mut slot = self.slot.lock();
        slot.closed = true;
        slot.owner = None;
        slot.depth = 0;
        drop(slot);
        self.released.notify_all();
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.slot.lock().closed
    }

    /// Consume the resource and return the value.
    pub fn into_inner(self) -> T {
        self.slot.into_inner().value
    }

    fn accessible(&self) -> MutexGuard<'_, Slot<T>> {
        let me = thread::current().id();
        let mut slot = self.slot.lock();
        while !slot.closed && slot.owner.is_some_and(|owner| owner != me) {
            self.released.wait(&mut slot);
        }
        slot
    }
}

fn foreign_unlock() {
    warn!("GuardedResource unlocked by a thread that does not own it");
    debug_assert!(
        false,
        "GuardedResource::unlock called from a non-owning thread"
    );
}

impl<T: Default> Default for GuardedResource<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: fmt::Debug> fmt::Debug for GuardedResource<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot.try_lock() {
            Some(slot) => f
                .debug_struct("GuardedResource")
                .field("value", &slot.value)
                .field("locked", &slot.owner.is_some())
                .field("depth", &slot.depth)
                .finish(),
            None => f
                .debug_struct("GuardedResource")
                .field("value", &"<busy>")
                .finish(),
        }
    }
}

/// RAII ownership of a [`GuardedResource`]; unlocks on drop.
pub struct Ownership<'a, T> {
    resource: &'a GuardedResource<T>,
}

impl<T> std::ops::Deref for Ownership<'_, T> {
    type Target = GuardedResource<T>;

    fn deref(&self) -> &Self::Target {
        self.resource
    }
}

impl<T> Drop for Ownership<'_, T> {
    fn drop(&mut self) {
        self.resource.unlock();
    }
}

/// Anything that exposes explicit lock/unlock, regardless of the value type.
pub trait Lockable {
    fn lock(&self);
    fn unlock(&self);
}

impl<T> Lockable for GuardedResource<T> {
    fn lock(&self) {
        GuardedResource::lock(self);
    }

    fn unlock(&self) {
        GuardedResource::unlock(self);
    }
}

/// Lock several resources in slice order.
///
/// Every caller locking an overlapping set must use the same order.
pub fn lock_all(resources: &[&dyn Lockable]) {
    for resource in resources {
        resource.lock();
    }
}

/// Unlock several resources in reverse slice order.
pub fn unlock_all(resources: &[&dyn Lockable]) {
    for resource in resources.iter().rev() {
        resource.unlock();
    }
}
