pub mod common_tests;
pub mod data_structures;
pub mod guard;
pub mod preemptive_synchronization;

// Re-export guard types for convenience
pub use guard::{DeferredGuard, DeferredRef, Guard};

pub use data_structures::{DelayQueue, Delayed, DelayedItem, LinkedQueue};
pub use preemptive_synchronization::{
    AcquireError, BarrierError, CancelToken, CountDownLatch, CyclicBarrier, Semaphore,
};
