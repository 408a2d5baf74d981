use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use super::cancel::{CancelToken, WakeAll};
use super::AcquireError;

// =============================================================================
// SHARED-STATE ACQUIRE/RELEASE ENGINE
// =============================================================================
//
// A generic FIFO-queueing engine that blocks and wakes callers based on a
// single integer state word and two caller-supplied policy functions. The
// engine owns the queueing and parking; the policy owns the meaning of the
// state word (0 = tripped for a latch, remaining permits for a semaphore).
//
// Queueing protocol:
//
//   acquire ──► try policy (probe: "anyone queued?")
//       │ success: return           │ failure
//       ▼                           ▼
//   take ticket, push to FIFO queue, then loop:
//       at front AND policy succeeds ──► pop, propagate wakeup, return
//       otherwise ──► park on the condvar
//
// The queue mutex is held from the policy attempt through the park, so a
// release that slips in between cannot lose its wakeup. Policy CAS retries
// stay local to the policy; the engine only sees the final verdict.

/// Fairness probe handed to [`SharePolicy::try_acquire_shared`].
///
/// Reports whether some earlier caller is already queued ahead of the one
/// currently attempting to acquire. A fair policy fails immediately when it
/// returns true; an unfair policy ignores it (barging).
pub trait FairnessProbe {
    fn has_queued_predecessors(&self) -> bool;
}

/// Caller-supplied policy over the engine's state word.
///
/// Both hooks must be idempotent-safe under retry: the only externally
/// visible effect is the final successful compare-and-set. Failed CAS
/// attempts are retried locally and never surfaced.
pub trait SharePolicy: Send + Sync {
    /// Attempt a shared acquire of `amount`. Negative return means failure
    /// (the engine will queue and park the caller); non-negative is the
    /// state remaining after the successful CAS.
    fn try_acquire_shared(
        &self,
        state: &AtomicI64,
        probe: &dyn FairnessProbe,
        amount: usize,
    ) -> i64;

    /// Apply a shared release of `amount`. Returns true when queued
    /// acquirers should be woken.
    fn try_release_shared(&self, state: &AtomicI64, amount: usize) -> bool;
}

struct QueueProbe<'a> {
    queue: &'a VecDeque<u64>,
    /// The probing waiter's ticket; `None` for not-yet-queued callers.
    ticket: Option<u64>,
}

impl FairnessProbe for QueueProbe<'_> {
    fn has_queued_predecessors(&self) -> bool {
        match self.ticket {
            Some(ticket) => self.queue.front().is_some_and(|&front| front != ticket),
            None => !self.queue.is_empty(),
        }
    }
}

/// Probe for barging attempts that deliberately ignore the queue
/// (`try_acquire` on a fair semaphore still barges).
struct NoPredecessors;

impl FairnessProbe for NoPredecessors {
    fn has_queued_predecessors(&self) -> bool {
        false
    }
}

struct EngineInner {
    state: AtomicI64,
    queue: Mutex<VecDeque<u64>>,
    cond: Condvar,
    next_ticket: AtomicU64,
}

impl WakeAll for EngineInner {
    fn wake_all(&self) {
        let _queue = self.queue.lock().unwrap();
        self.cond.notify_all();
    }
}

/// Generic blocking acquire/release engine over one integer state word.
pub struct SharedStateEngine<P: SharePolicy> {
    inner: Arc<EngineInner>,
    policy: P,
}

impl<P: SharePolicy> SharedStateEngine<P> {
    pub fn new(initial_state: i64, policy: P) -> Self {
        SharedStateEngine {
            inner: Arc::new(EngineInner {
                state: AtomicI64::new(initial_state),
                queue: Mutex::new(VecDeque::new()),
                cond: Condvar::new(),
                next_ticket: AtomicU64::new(0),
            }),
            policy,
        }
    }

    /// Current value of the state word (policy-defined semantics).
    pub fn state(&self) -> i64 {
        self.inner.state.load(Ordering::Acquire)
    }

    /// Direct access for administrative policy extensions (reduce/drain).
    pub(crate) fn state_word(&self) -> &AtomicI64 {
        &self.inner.state
    }

    /// True if any caller is currently queued.
    pub fn has_queued_waiters(&self) -> bool {
        !self.inner.queue.lock().unwrap().is_empty()
    }

    fn try_policy(&self, queue: &VecDeque<u64>, ticket: Option<u64>, amount: usize) -> bool {
        let probe = QueueProbe { queue, ticket };
        self.policy
            .try_acquire_shared(&self.inner.state, &probe, amount)
            >= 0
    }

    /// Pop our ticket from the front and let the next waiter retry: a shared
    /// acquire may leave enough state for more acquirers to succeed.
    fn finish_front(&self, queue: &mut MutexGuard<'_, VecDeque<u64>>) {
        queue.pop_front();
        if !queue.is_empty() {
            self.inner.cond.notify_all();
        }
    }

    /// Remove a ticket that is abandoning its wait (timeout/cancellation),
    /// waking the rest in case it was the front everyone was waiting behind.
    fn abandon(&self, queue: &mut MutexGuard<'_, VecDeque<u64>>, ticket: u64) {
        if let Some(pos) = queue.iter().position(|&t| t == ticket) {
            queue.remove(pos);
        }
        if !queue.is_empty() {
            self.inner.cond.notify_all();
        }
    }

    /// Single attempt with no queueing side effects. Barges past any queue.
    pub fn try_acquire_shared_now(&self, amount: usize) -> bool {
        let _queue = self.inner.queue.lock().unwrap();
        self.policy
            .try_acquire_shared(&self.inner.state, &NoPredecessors, amount)
            >= 0
    }

    /// Block (uninterruptibly) until the policy grants `amount`.
    pub fn acquire_shared(&self, amount: usize) {
        let mut queue = self.inner.queue.lock().unwrap();
        if self.try_policy(&queue, None, amount) {
            return;
        }
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        queue.push_back(ticket);
        loop {
            let at_front = queue.front() == Some(&ticket);
            if at_front && self.try_policy(&queue, Some(ticket), amount) {
                self.finish_front(&mut queue);
                return;
            }
            queue = self.inner.cond.wait(queue).unwrap();
        }
    }

    /// Bounded-wait acquire; false on timeout (non-terminal, the engine
    /// remains fully usable).
    pub fn try_acquire_shared_timed(&self, amount: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut queue = self.inner.queue.lock().unwrap();
        if self.try_policy(&queue, None, amount) {
            return true;
        }
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        queue.push_back(ticket);
        loop {
            let at_front = queue.front() == Some(&ticket);
            if at_front && self.try_policy(&queue, Some(ticket), amount) {
                self.finish_front(&mut queue);
                return true;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.abandon(&mut queue, ticket);
                return false;
            }
            queue = self.inner.cond.wait_timeout(queue, remaining).unwrap().0;
        }
    }

    /// Like [`SharedStateEngine::acquire_shared`], but fails at the next
    /// wait boundary once `token` is cancelled.
    pub fn acquire_shared_cancelable(
        &self,
        amount: usize,
        token: &CancelToken,
    ) -> Result<(), AcquireError>
    where
        P: 'static,
    {
        let weak = Arc::downgrade(&self.inner);
        let channel: Weak<dyn WakeAll> = weak;
        let _registration = token.register(channel);

        let mut queue = self.inner.queue.lock().unwrap();
        if token.is_cancelled() {
            return Err(AcquireError::Cancelled);
        }
        if self.try_policy(&queue, None, amount) {
            return Ok(());
        }
        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        queue.push_back(ticket);
        loop {
            let at_front = queue.front() == Some(&ticket);
            if at_front && self.try_policy(&queue, Some(ticket), amount) {
                self.finish_front(&mut queue);
                return Ok(());
            }
            if token.is_cancelled() {
                self.abandon(&mut queue, ticket);
                return Err(AcquireError::Cancelled);
            }
            queue = self.inner.cond.wait(queue).unwrap();
        }
    }

    /// Apply the release policy; when it reports "should wake", unblock
    /// queued acquirers.
    pub fn release_shared(&self, amount: usize) {
        if self.policy.try_release_shared(&self.inner.state, amount) {
            let _queue = self.inner.queue.lock().unwrap();
            self.inner.cond.notify_all();
        }
    }
}
