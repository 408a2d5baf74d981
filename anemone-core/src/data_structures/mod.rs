//! Concurrent queue collections.
//!
//! # Organization
//!
//! - [`linked_queue`] - unbounded lock-free MPMC FIFO (CAS-only hot path)
//! - [`delay_queue`] - deadline-ordered blocking queue with the
//!   leader-follower wakeup optimization

pub mod delay_queue;
pub mod linked_queue;

pub use delay_queue::{DelayQueue, Delayed, DelayedItem};
pub use linked_queue::LinkedQueue;
