//! Crossbeam-based memory reclamation for anemone collections.
//!
//! This crate provides `EpochGuard`, an implementation of the `Guard` trait
//! using crossbeam-epoch, giving the lock-free queue production-grade
//! memory reclamation.
//!
//! # Usage
//!
//! ```ignore
//! use anemone_core::data_structures::LinkedQueue;
//! use anemone_crossbeam::EpochGuard;
//!
//! let queue: LinkedQueue<u64, EpochGuard> = LinkedQueue::new();
//! queue.enqueue(42);
//! ```

pub mod epoch_guard;

pub use epoch_guard::{EpochGuard, EpochRef};
