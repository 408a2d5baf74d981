use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use crate::preemptive_synchronization::cancel::{CancelToken, WakeAll};
use crate::preemptive_synchronization::AcquireError;

// =============================================================================
// LEADER-FOLLOWER DELAY QUEUE
// =============================================================================
//
// A deadline-ordered binary heap behind a single lock/condvar pair. The heap
// root always holds the smallest deadline currently present.
//
// Without further care, every blocked taker would compute the same root delay
// and run its own timed wait, and every insertion would have to wake all of
// them. Instead, at most one waiter (the leader) is armed with a bounded
// timer; all others wait untimed for an explicit signal:
//
//   take()                          push(earlier deadline)
//     │                                │
//     ├─ leader exists ──► wait()      ├─ new root: clear leader,
//     │   (untimed follower)           │   signal once (re-arms a waiter)
//     └─ no leader ──► become leader,
//         wait_timeout(root delay),
//         clear leader on EVERY exit
//
// INVARIANT: at most one live leader per queue; the leader slot is owned by
// the heap's mutex and cleared on every exit path (success, timeout,
// cancellation).

/// An element with an expiry deadline.
pub trait Delayed {
    /// Absolute point in time at which this element becomes available.
    fn deadline(&self) -> Instant;
}

/// Convenience payload wrapper carrying an explicit deadline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DelayedItem<T> {
    pub value: T,
    pub deadline: Instant,
}

impl<T> DelayedItem<T> {
    pub fn new(value: T, deadline: Instant) -> Self {
        DelayedItem { value, deadline }
    }

    /// An item that becomes available `delay` from now.
    pub fn after(value: T, delay: Duration) -> Self {
        DelayedItem {
            value,
            deadline: Instant::now() + delay,
        }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T> Delayed for DelayedItem<T> {
    fn deadline(&self) -> Instant {
        self.deadline
    }
}

struct Entry<T> {
    deadline: Instant,
    /// Monotonic insertion sequence: makes the heap order total without
    /// requiring `T: Ord`, and keeps equal-deadline ties stable.
    seq: u64,
    value: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap; reverse so the root is the earliest
        // deadline (ties: lowest sequence).
        (self.deadline, self.seq)
            .cmp(&(other.deadline, other.seq))
            .reverse()
    }
}

struct DelayState<T> {
    heap: BinaryHeap<Entry<T>>,
    /// Waiter id of the current leader, if any.
    leader: Option<u64>,
    next_seq: u64,
}

struct DelayInner<T> {
    state: Mutex<DelayState<T>>,
    available: Condvar,
}

impl<T: Send> WakeAll for DelayInner<T> {
    fn wake_all(&self) {
        // Take the heap lock so the wakeup cannot slip between a waiter's
        // predicate check and its park.
        let _state = self.state.lock().unwrap();
        self.available.notify_all();
    }
}

/// An unbounded blocking queue of delayed elements: an element can only be
/// taken once its deadline has elapsed, and the earliest deadline is always
/// served first.
///
/// Cloning yields another handle to the same queue.
pub struct DelayQueue<T: Delayed> {
    inner: Arc<DelayInner<T>>,
    next_waiter: Arc<AtomicU64>,
}

impl<T: Delayed> Clone for DelayQueue<T> {
    fn clone(&self) -> Self {
        DelayQueue {
            inner: Arc::clone(&self.inner),
            next_waiter: Arc::clone(&self.next_waiter),
        }
    }
}

impl<T: Delayed> DelayQueue<T> {
    pub fn new() -> Self {
        DelayQueue {
            inner: Arc::new(DelayInner {
                state: Mutex::new(DelayState {
                    heap: BinaryHeap::new(),
                    leader: None,
                    next_seq: 0,
                }),
                available: Condvar::new(),
            }),
            next_waiter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Insert an element. If it became the new root (earliest deadline), the
    /// leader's timed wait is now aimed at the wrong deadline: clear the
    /// leader and signal once to re-arm a waiter.
    pub fn push(&self, value: T) {
        let mut state = self.inner.state.lock().unwrap();
        let seq = state.next_seq;
        state.next_seq += 1;
        state.heap.push(Entry {
            deadline: value.deadline(),
            seq,
            value,
        });
        if state.heap.peek().map(|e| e.seq) == Some(seq) {
            state.leader = None;
            self.inner.available.notify_one();
        }
    }

    /// Remove and return the root only if its deadline has already elapsed.
    pub fn poll(&self) -> Option<T> {
        let mut state = self.inner.state.lock().unwrap();
        match state.heap.peek() {
            Some(root) if root.deadline <= Instant::now() => {
                Some(state.heap.pop().unwrap().value)
            }
            _ => None,
        }
    }

    /// Block until an element's deadline elapses, then remove and return it.
    pub fn take(&self) -> T {
        let my_id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let mut state = self.inner.state.lock().unwrap();
        let value = loop {
            let (next_state, popped) = self.pop_or_park(state, my_id, None);
            state = next_state;
            if let Some(v) = popped {
                break v;
            }
        };
        self.signal_successor(&state);
        value
    }

    /// Like [`DelayQueue::take`], but fails at the next wait boundary once
    /// `token` is cancelled.
    pub fn take_cancelable(&self, token: &CancelToken) -> Result<T, AcquireError>
    where
        T: Send + 'static,
    {
        let my_id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let weak = Arc::downgrade(&self.inner);
        let channel: Weak<dyn WakeAll> = weak;
        let _registration = token.register(channel);

        let mut state = self.inner.state.lock().unwrap();
        let result = loop {
            if token.is_cancelled() {
                if state.leader == Some(my_id) {
                    state.leader = None;
                }
                break Err(AcquireError::Cancelled);
            }
            let (next_state, popped) = self.pop_or_park(state, my_id, None);
            state = next_state;
            if let Some(v) = popped {
                break Ok(v);
            }
        };
        self.signal_successor(&state);
        result
    }

    /// Bounded-wait variant of [`DelayQueue::take`]: returns `None` when
    /// `timeout` elapses first. The timeout is non-terminal; the queue stays
    /// fully usable.
    pub fn poll_timeout(&self, timeout: Duration) -> Option<T> {
        let my_id = self.next_waiter.fetch_add(1, Ordering::Relaxed);
        let overall = Instant::now() + timeout;
        let mut state = self.inner.state.lock().unwrap();
        let result = loop {
            let (next_state, popped) = self.pop_or_park(state, my_id, Some(overall));
            state = next_state;
            if let Some(v) = popped {
                break Some(v);
            }
            if Instant::now() >= overall {
                if state.leader == Some(my_id) {
                    state.leader = None;
                }
                break None;
            }
        };
        self.signal_successor(&state);
        result
    }

    /// One pass of the take loop. Pops and returns the root when elapsed;
    /// otherwise parks (follower: untimed; leader: timed by the root delay,
    /// clamped by `overall` when present) and hands the re-locked guard back
    /// so the caller re-checks.
    fn pop_or_park<'a>(
        &'a self,
        mut state: MutexGuard<'a, DelayState<T>>,
        my_id: u64,
        overall: Option<Instant>,
    ) -> (MutexGuard<'a, DelayState<T>>, Option<T>) {
        let now = Instant::now();
        let caller_bound = overall.map(|o| o.saturating_duration_since(now));
        let root_deadline = match state.heap.peek() {
            Some(root) => root.deadline,
            None => {
                // Empty heap: nothing to time against.
                return (self.park(state, caller_bound), None);
            }
        };
        if root_deadline <= now {
            let value = state.heap.pop().unwrap().value;
            return (state, Some(value));
        }
        let root_delay = root_deadline - now;
        if state.leader.is_some() {
            // Only the leader tracks the root's time; followers wait for an
            // explicit signal (bounded only by the caller's own deadline).
            (self.park(state, caller_bound), None)
        } else {
            state.leader = Some(my_id);
            let bound = match caller_bound {
                Some(b) => root_delay.min(b),
                None => root_delay,
            };
            let mut state = self.park(state, Some(bound));
            if state.leader == Some(my_id) {
                state.leader = None;
            }
            (state, None)
        }
    }

    fn park<'a>(
        &'a self,
        state: MutexGuard<'a, DelayState<T>>,
        bound: Option<Duration>,
    ) -> MutexGuard<'a, DelayState<T>> {
        // Spurious wakeups are harmless: every caller re-checks its
        // predicate on the re-locked guard.
        match bound {
            Some(d) => self.inner.available.wait_timeout(state, d).unwrap().0,
            None => self.inner.available.wait(state).unwrap(),
        }
    }

    /// A taker leaving with items still queued and no leader in place must
    /// hand the timing duty to someone.
    fn signal_successor(&self, state: &MutexGuard<'_, DelayState<T>>) {
        if state.leader.is_none() && !state.heap.is_empty() {
            self.inner.available.notify_one();
        }
    }

    /// Pop every already-elapsed element (earliest first), up to `max`.
    /// Stops at the first non-elapsed root or empty heap.
    pub fn drain_expired(&self, max: Option<usize>) -> Vec<T> {
        let mut state = self.inner.state.lock().unwrap();
        let mut drained = Vec::new();
        let limit = max.unwrap_or(usize::MAX);
        while drained.len() < limit {
            match state.heap.peek() {
                Some(root) if root.deadline <= Instant::now() => {
                    drained.push(state.heap.pop().unwrap().value);
                }
                _ => break,
            }
        }
        drained
    }

    /// Deadline of the current root, elapsed or not.
    pub fn peek_deadline(&self) -> Option<Instant> {
        let state = self.inner.state.lock().unwrap();
        state.heap.peek().map(|e| e.deadline)
    }

    pub fn len(&self) -> usize {
        self.inner.state.lock().unwrap().heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.state.lock().unwrap().heap.is_empty()
    }
}

impl<T: Delayed + PartialEq> DelayQueue<T> {
    /// Remove the first pending element equal to `value`, elapsed or not.
    /// If the root was removed, waiters are woken so the leader re-arms
    /// against the new root.
    pub fn remove(&self, value: &T) -> bool {
        let mut state = self.inner.state.lock().unwrap();
        let root_seq = state.heap.peek().map(|e| e.seq);
        let mut entries = std::mem::take(&mut state.heap).into_vec();
        match entries.iter().position(|e| &e.value == value) {
            Some(pos) => {
                let removed = entries.swap_remove(pos);
                state.heap = BinaryHeap::from(entries);
                if Some(removed.seq) == root_seq {
                    state.leader = None;
                    self.inner.available.notify_all();
                }
                true
            }
            None => {
                state.heap = BinaryHeap::from(entries);
                false
            }
        }
    }
}

impl<T: Delayed> Default for DelayQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn poll_respects_deadlines() {
        let queue: DelayQueue<DelayedItem<&str>> = DelayQueue::new();
        queue.push(DelayedItem::after("later", Duration::from_secs(60)));
        assert_eq!(queue.poll(), None);

        queue.push(DelayedItem::after("now", Duration::ZERO));
        assert_eq!(queue.poll().map(|i| i.value), Some("now"));
        assert_eq!(queue.poll(), None);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn earliest_deadline_first() {
        let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
        let now = Instant::now();
        queue.push(DelayedItem::new(3, now + Duration::from_millis(30)));
        queue.push(DelayedItem::new(1, now + Duration::from_millis(10)));
        queue.push(DelayedItem::new(2, now + Duration::from_millis(20)));

        assert_eq!(queue.take().value, 1);
        assert_eq!(queue.take().value, 2);
        assert_eq!(queue.take().value, 3);
    }

    #[test]
    fn stable_order_for_equal_deadlines() {
        let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
        let deadline = Instant::now();
        for i in 0..10 {
            queue.push(DelayedItem::new(i, deadline));
        }
        for i in 0..10 {
            assert_eq!(queue.take().value, i);
        }
    }

    #[test]
    fn drain_expired_stops_at_pending_root() {
        let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
        let now = Instant::now();
        queue.push(DelayedItem::new(1, now - Duration::from_millis(5)));
        queue.push(DelayedItem::new(2, now - Duration::from_millis(1)));
        queue.push(DelayedItem::new(3, now + Duration::from_secs(60)));

        let drained = queue.drain_expired(None);
        assert_eq!(drained.iter().map(|i| i.value).collect::<Vec<_>>(), vec![1, 2]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_expired_honors_max() {
        let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
        for i in 0..5 {
            queue.push(DelayedItem::after(i, Duration::ZERO));
        }
        assert_eq!(queue.drain_expired(Some(3)).len(), 3);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn remove_pending_element() {
        let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
        let far = DelayedItem::after(9, Duration::from_secs(60));
        queue.push(far.clone());
        assert!(queue.remove(&far));
        assert!(!queue.remove(&far));
        assert!(queue.is_empty());
    }

    #[test]
    fn poll_timeout_returns_none_without_disturbing_queue() {
        let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
        queue.push(DelayedItem::after(1, Duration::from_secs(60)));
        assert_eq!(queue.poll_timeout(Duration::from_millis(20)), None);
        assert_eq!(queue.len(), 1);
        // The queue stays usable after the timeout.
        queue.push(DelayedItem::after(0, Duration::ZERO));
        assert_eq!(queue.poll_timeout(Duration::from_millis(20)).map(|i| i.value), Some(0));
    }
}
