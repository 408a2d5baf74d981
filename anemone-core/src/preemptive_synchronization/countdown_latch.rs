use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use super::cancel::CancelToken;
use super::shared_engine::{FairnessProbe, SharePolicy, SharedStateEngine};
use super::AcquireError;

/// One-shot countdown policy: the state word is the remaining count.
///
/// Acquire succeeds iff the count is 0 (the latch has tripped). Release
/// decrements toward 0 and reports "wake waiters" exactly when it gets
/// there; counting down a tripped latch is a no-op.
pub(crate) struct LatchPolicy;

impl SharePolicy for LatchPolicy {
    fn try_acquire_shared(
        &self,
        state: &AtomicI64,
        _probe: &dyn FairnessProbe,
        _amount: usize,
    ) -> i64 {
        if state.load(Ordering::Acquire) == 0 {
            1
        } else {
            -1
        }
    }

    fn try_release_shared(&self, state: &AtomicI64, _amount: usize) -> bool {
        loop {
            let count = state.load(Ordering::Acquire);
            if count == 0 {
                return false;
            }
            let next = count - 1;
            if state
                .compare_exchange(count, next, Ordering::Release, Ordering::Relaxed)
                .is_ok()
            {
                return next == 0;
            }
        }
    }
}

/// A one-shot latch: `wait` blocks until `count_down` has been called
/// `count` times, after which all waits (past and future) pass immediately.
///
/// # Example
///
/// ```rust,ignore
/// let latch = Arc::new(CountDownLatch::new(3));
/// // workers: latch.count_down() when done
/// latch.wait(); // releases once all three have counted down
/// ```
pub struct CountDownLatch {
    engine: SharedStateEngine<LatchPolicy>,
}

impl CountDownLatch {
    /// Create a latch requiring `count` count-downs. A zero count starts
    /// already tripped.
    pub fn new(count: usize) -> Self {
        let count = i64::try_from(count).expect("latch count exceeds i64::MAX");
        CountDownLatch {
            engine: SharedStateEngine::new(count, LatchPolicy),
        }
    }

    /// Remaining count; 0 means tripped.
    pub fn count(&self) -> usize {
        self.engine.state() as usize
    }

    /// Decrement the count, waking all waiters when it reaches 0.
    /// Counting down past 0 is a no-op.
    pub fn count_down(&self) {
        self.engine.release_shared(1);
    }

    /// Block until the count reaches 0.
    pub fn wait(&self) {
        self.engine.acquire_shared(1);
    }

    /// Bounded wait; false if the count was still nonzero when `timeout`
    /// elapsed. The latch remains usable.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        self.engine.try_acquire_shared_timed(1, timeout)
    }

    /// Like [`CountDownLatch::wait`], but fails at the next wait boundary
    /// once `token` is cancelled.
    pub fn wait_cancelable(&self, token: &CancelToken) -> Result<(), AcquireError> {
        self.engine.acquire_shared_cancelable(1, token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn trips_after_exact_count() {
        let latch = CountDownLatch::new(3);
        assert_eq!(latch.count(), 3);
        assert!(!latch.wait_timeout(Duration::from_millis(10)));

        latch.count_down();
        latch.count_down();
        assert_eq!(latch.count(), 1);
        latch.count_down();
        assert_eq!(latch.count(), 0);
        latch.wait(); // passes immediately
    }

    #[test]
    fn extra_count_down_is_noop() {
        let latch = CountDownLatch::new(1);
        latch.count_down();
        latch.count_down();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn zero_count_starts_tripped() {
        let latch = CountDownLatch::new(0);
        latch.wait();
        assert_eq!(latch.count(), 0);
    }

    #[test]
    fn releases_all_waiters() {
        let latch = Arc::new(CountDownLatch::new(2));
        let mut handles = Vec::new();
        for _ in 0..4 {
            let latch = Arc::clone(&latch);
            handles.push(thread::spawn(move || latch.wait()));
        }
        thread::sleep(Duration::from_millis(20));
        latch.count_down();
        latch.count_down();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
