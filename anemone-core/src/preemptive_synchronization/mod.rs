//! Blocking coordination primitives for preemptive native threads.
//!
//! # Organization
//!
//! - [`shared_engine`] - generic FIFO acquire/release engine over one
//!   integer state word, with pluggable [`SharePolicy`] strategies
//! - [`countdown_latch`] / [`semaphore`] - permit policies and facades
//!   riding on the engine
//! - [`cyclic_barrier`] - generational reusable rendezvous
//! - [`cancel`] - cooperative cancellation for blocking waits

pub mod cancel;
pub mod countdown_latch;
pub mod cyclic_barrier;
mod errors;
pub mod semaphore;
pub mod shared_engine;

pub use cancel::CancelToken;
pub use countdown_latch::CountDownLatch;
pub use cyclic_barrier::CyclicBarrier;
pub use errors::{AcquireError, BarrierError};
pub use semaphore::Semaphore;
pub use shared_engine::{FairnessProbe, SharePolicy, SharedStateEngine};
