//! Guard trait for memory reclamation strategies.
//!
//! Lock-free structures unlink nodes that other threads may still be
//! traversing, so unlinked nodes cannot be freed immediately. The `Guard`
//! trait abstracts over when that deferred destruction actually happens:
//!
//! ```text
//! LinkedQueue<T, G: Guard>
//!     │
//!     ├── LinkedQueue<T, EpochGuard>      (production, anemone-crossbeam)
//!     └── LinkedQueue<T, DeferredGuard>   (testing)
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use anemone_core::data_structures::LinkedQueue;
//! use anemone_crossbeam::EpochGuard;
//!
//! let queue: LinkedQueue<i32, EpochGuard> = LinkedQueue::new();
//! queue.enqueue(42);
//! ```

mod deferred_guard;

use std::ops::Deref;

pub use deferred_guard::{DeferredGuard, DeferredRef};

/// A memory reclamation guard that protects concurrent access to nodes.
///
/// - **EpochGuard**: low overhead, batched reclamation (crossbeam-epoch)
/// - **DeferredGuard**: defers all destruction until the guard drops (testing)
///
/// # Safety Contract
///
/// Implementations must ensure:
/// 1. Pointers passed to `defer_destroy` are not freed while any thread may
///    still hold a `ReadGuard` pinned before the call
/// 2. `GuardedRef` keeps the referenced data valid for its lifetime
///
/// A guard instance is stored inside each collection and used for scheduling
/// deferred destruction. Thread pinning (for epoch-based guards) happens
/// per-operation via [`Guard::pin`], not when the stored guard is created.
pub trait Guard: Sized + Default + Send + Sync {
    /// A reference protected by a guard of this type.
    ///
    /// Must implement `Deref<Target = T>`. The reference owns its protection
    /// and is valid for lifetime `'a`.
    type GuardedRef<'a, T: 'a>: Deref<Target = T>;

    /// An active guard that protects raw-pointer reads for its lifetime.
    ///
    /// For epoch-based guards this is a pinned `crossbeam_epoch::Guard`;
    /// for `DeferredGuard` it is `()` because protection comes from the
    /// collection's stored guard.
    type ReadGuard: Sized;

    /// Pin an active read guard.
    ///
    /// Every traversal of a lock-free structure must hold one of these for
    /// the duration of the raw-pointer walk.
    fn pin() -> Self::ReadGuard;

    /// Schedule a pointer for deferred destruction.
    ///
    /// # Safety
    ///
    /// - `node` must have been allocated by the caller's collection
    /// - `node` must be unreachable for new traversals (unlinked)
    /// - `dealloc` must be the matching deallocation function
    /// - `node` must not be passed to `defer_destroy` twice
    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N));

    /// Create a guarded reference from a raw pointer.
    ///
    /// # Safety
    ///
    /// - `ptr` must point to data that stays valid for `'a` (typically
    ///   because destruction of it can only be deferred through this guard)
    unsafe fn make_ref<'a, T: 'a>(ptr: *const T) -> Self::GuardedRef<'a, T>;
}
