//! Cooperative cancellation for blocking waits.
//!
//! Threads cannot be interrupted from outside, so cancellation is delivered
//! cooperatively: a waiter registers its wait channel with a [`CancelToken`]
//! before parking, and `cancel()` flags the token and wakes every registered
//! channel. The waiter observes the flag at its next wait-boundary re-check;
//! it is never observed mid CAS-retry.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A wait channel that can be woken so its waiters re-check their predicates.
///
/// Implemented by the shared inner state of each blocking primitive; waking
/// is always a broadcast because every wait loop re-checks its predicate.
pub(crate) trait WakeAll: Send + Sync {
    fn wake_all(&self);
}

struct TokenState {
    cancelled: AtomicBool,
    next_id: AtomicU64,
    waiters: Mutex<Vec<(u64, Weak<dyn WakeAll>)>>,
}

/// A cloneable cancellation handle.
///
/// `cancel()` is sticky: once cancelled, every current and future cancelable
/// wait using this token fails with a cancellation result at its next wait
/// boundary.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<TokenState>,
}

impl CancelToken {
    pub fn new() -> Self {
        CancelToken {
            state: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                waiters: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Flag the token and wake every registered wait channel.
    pub fn cancel(&self) {
        self.state.cancelled.store(true, Ordering::Release);
        let waiters: Vec<_> = self.state.waiters.lock().unwrap().drain(..).collect();
        for (_, waiter) in waiters {
            if let Some(channel) = waiter.upgrade() {
                channel.wake_all();
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Register a wait channel for wakeup on cancellation.
    ///
    /// The caller must check [`CancelToken::is_cancelled`] *after*
    /// registering (under its own lock) to close the race where `cancel()`
    /// runs between the registration and the first park.
    pub(crate) fn register(&self, channel: Weak<dyn WakeAll>) -> WaiterRegistration {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        self.state.waiters.lock().unwrap().push((id, channel));
        WaiterRegistration {
            state: Arc::clone(&self.state),
            id,
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Removes the registration when the wait exits, via any path.
pub(crate) struct WaiterRegistration {
    state: Arc<TokenState>,
    id: u64,
}

impl Drop for WaiterRegistration {
    fn drop(&mut self) {
        let mut waiters = self.state.waiters.lock().unwrap();
        if let Some(pos) = waiters.iter().position(|(id, _)| *id == self.id) {
            waiters.swap_remove(pos);
        }
    }
}
