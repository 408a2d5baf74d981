use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, Weak};
use std::time::{Duration, Instant};

use super::cancel::{CancelToken, WakeAll};
use super::BarrierError;

// =============================================================================
// GENERATIONAL BARRIER
// =============================================================================
//
// A reusable rendezvous for a fixed party count. Each round owns exactly one
// Generation; a fresh Generation replaces it (under the lock) when the round
// trips or breaks. The broken flag is never reset in place, so a waiter that
// captured its round's Generation can always tell "my round completed" from
// "my round broke" from "a brand-new round started", no matter how late it
// wakes:
//
//   captured.broken            ──► round broke: Err(Broken)
//   current id != captured id  ──► round tripped and was replaced: Ok(index)
//   otherwise                  ──► round still filling: keep waiting
//
// Breaking is sticky for the generation: every past and future waiter on a
// broken generation fails until `reset` installs a fresh one.

struct Generation {
    id: u64,
    /// Written only under the barrier lock; atomic so late waiters of a
    /// replaced generation can still read it through their captured Arc.
    broken: AtomicBool,
}

impl Generation {
    fn first() -> Arc<Self> {
        Arc::new(Generation {
            id: 0,
            broken: AtomicBool::new(false),
        })
    }

    fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }
}

struct BarrierState {
    generation: Arc<Generation>,
    /// Parties not yet arrived this round.
    count: usize,
}

struct BarrierInner {
    state: Mutex<BarrierState>,
    trip: Condvar,
}

impl WakeAll for BarrierInner {
    fn wake_all(&self) {
        let _state = self.state.lock().unwrap();
        self.trip.notify_all();
    }
}

type TripAction = Box<dyn Fn() + Send + Sync>;

/// A reusable rendezvous point for a fixed number of parties.
///
/// `wait` returns the caller's arrival index: `parties - 1` for the first
/// arriver down to 0 for the last, whose arrival trips the barrier and
/// starts the next round. Timeout or cancellation of any waiter breaks the
/// barrier for the whole round; [`CyclicBarrier::reset`] starts over.
pub struct CyclicBarrier {
    inner: Arc<BarrierInner>,
    parties: usize,
    action: Option<TripAction>,
}

impl CyclicBarrier {
    /// Barrier for `parties` threads (at least one).
    pub fn new(parties: usize) -> Self {
        Self::build(parties, None)
    }

    /// Barrier that runs `action` exactly once per round, by the last
    /// arriver, before the others are released. A panic in the action
    /// breaks the barrier and propagates to that arriver.
    pub fn with_action<F>(parties: usize, action: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self::build(parties, Some(Box::new(action)))
    }

    fn build(parties: usize, action: Option<TripAction>) -> Self {
        assert!(parties > 0, "barrier requires at least one party");
        CyclicBarrier {
            inner: Arc::new(BarrierInner {
                state: Mutex::new(BarrierState {
                    generation: Generation::first(),
                    count: parties,
                }),
                trip: Condvar::new(),
            }),
            parties,
            action,
        }
    }

    pub fn parties(&self) -> usize {
        self.parties
    }

    /// Parties currently blocked in `wait` on this round.
    pub fn number_waiting(&self) -> usize {
        let state = self.inner.state.lock().unwrap();
        self.parties - state.count
    }

    pub fn is_broken(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        state.generation.is_broken()
    }

    /// Break the current generation (failing its waiters and any new
    /// arrivals) and install a fresh one.
    pub fn reset(&self) {
        let mut state = self.inner.state.lock().unwrap();
        self.break_generation(&mut state);
        self.next_generation(&mut state);
    }

    /// Wait until all parties arrive. Uninterruptible and unbounded.
    pub fn wait(&self) -> Result<usize, BarrierError> {
        self.do_wait(None, None)
    }

    /// Bounded wait. Expiry breaks the barrier: the timing-out caller gets
    /// `TimedOut`, everyone else in the round gets `Broken`.
    pub fn wait_timeout(&self, timeout: Duration) -> Result<usize, BarrierError> {
        self.do_wait(Some(Instant::now() + timeout), None)
    }

    /// Cancelable wait. Cancellation breaks the barrier, unless the round
    /// already tripped or broke for another reason, in which case that
    /// resolved outcome is returned and the token simply stays cancelled.
    pub fn wait_cancelable(&self, token: &CancelToken) -> Result<usize, BarrierError> {
        let weak = Arc::downgrade(&self.inner);
        let channel: Weak<dyn WakeAll> = weak;
        let _registration = token.register(channel);
        self.do_wait(None, Some(token))
    }

    fn do_wait(
        &self,
        deadline: Option<Instant>,
        token: Option<&CancelToken>,
    ) -> Result<usize, BarrierError> {
        let mut state = self.inner.state.lock().unwrap();
        let generation = Arc::clone(&state.generation);

        if generation.is_broken() {
            return Err(BarrierError::Broken);
        }
        if let Some(token) = token {
            if token.is_cancelled() {
                self.break_generation(&mut state);
                return Err(BarrierError::Cancelled);
            }
        }

        state.count -= 1;
        let index = state.count;
        if index == 0 {
            // Last arriver: run the trip action exactly once, then advance.
            if let Some(action) = &self.action {
                if let Err(panic) = catch_unwind(AssertUnwindSafe(|| action())) {
                    self.break_generation(&mut state);
                    drop(state);
                    resume_unwind(panic);
                }
            }
            self.next_generation(&mut state);
            return Ok(0);
        }

        loop {
            state = match deadline {
                Some(deadline) => {
                    let remaining = deadline.saturating_duration_since(Instant::now());
                    self.inner.trip.wait_timeout(state, remaining).unwrap().0
                }
                None => self.inner.trip.wait(state).unwrap(),
            };

            if generation.is_broken() {
                return Err(BarrierError::Broken);
            }
            if state.generation.id != generation.id {
                // Our round tripped and was replaced. A cancellation that
                // raced with the trip is preserved on the token but does not
                // break a barrier that already resolved.
                return Ok(index);
            }
            if let Some(token) = token {
                if token.is_cancelled() {
                    self.break_generation(&mut state);
                    return Err(BarrierError::Cancelled);
                }
            }
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    self.break_generation(&mut state);
                    return Err(BarrierError::TimedOut);
                }
            }
        }
    }

    /// Mark the current generation broken and wake everyone. Sticky: the
    /// flag on a Generation is never cleared.
    fn break_generation(&self, state: &mut MutexGuard<'_, BarrierState>) {
        state.generation.broken.store(true, Ordering::Release);
        state.count = self.parties;
        self.inner.trip.notify_all();
    }

    /// Install a fresh generation and wake the waiters of the old one.
    fn next_generation(&self, state: &mut MutexGuard<'_, BarrierState>) {
        let next_id = state.generation.id + 1;
        state.generation = Arc::new(Generation {
            id: next_id,
            broken: AtomicBool::new(false),
        });
        state.count = self.parties;
        self.inner.trip.notify_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn single_party_trips_immediately() {
        let barrier = CyclicBarrier::new(1);
        assert_eq!(barrier.wait(), Ok(0));
        assert_eq!(barrier.wait(), Ok(0));
        assert!(!barrier.is_broken());
    }

    #[test]
    fn timeout_breaks_the_barrier() {
        let barrier = CyclicBarrier::new(2);
        assert_eq!(
            barrier.wait_timeout(Duration::from_millis(20)),
            Err(BarrierError::TimedOut)
        );
        assert!(barrier.is_broken());
        // Sticky until reset, including for new arrivals.
        assert_eq!(barrier.wait(), Err(BarrierError::Broken));
        barrier.reset();
        assert!(!barrier.is_broken());
    }

    #[test]
    fn trip_action_runs_once_per_round() {
        use std::sync::atomic::AtomicUsize;
        let trips = Arc::new(AtomicUsize::new(0));
        let barrier = {
            let trips = Arc::clone(&trips);
            Arc::new(CyclicBarrier::with_action(2, move || {
                trips.fetch_add(1, Ordering::SeqCst);
            }))
        };

        for _ in 0..3 {
            let other = {
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || barrier.wait().unwrap())
            };
            barrier.wait().unwrap();
            other.join().unwrap();
        }
        assert_eq!(trips.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn panicking_action_breaks_barrier() {
        let barrier = Arc::new(CyclicBarrier::with_action(2, || panic!("trip failed")));
        let peer = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait())
        };
        thread::sleep(Duration::from_millis(20));
        let last = {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || barrier.wait())
        };
        assert!(last.join().is_err()); // the action's panic propagates
        assert_eq!(peer.join().unwrap(), Err(BarrierError::Broken));
        assert!(barrier.is_broken());
    }
}
