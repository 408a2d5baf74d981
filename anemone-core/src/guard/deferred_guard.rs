//! Deferred guard implementation for testing.
//!
//! `DeferredGuard` postpones every node destruction until the guard itself
//! (and therefore the owning collection) is dropped. Destruction timing is
//! fully predictable, which is what the shared stress tests want.

use std::collections::HashSet;
use std::ops::Deref;
use std::sync::Mutex;

use super::Guard;

/// A guard that defers all node destruction until it is dropped.
///
/// Memory accumulates for the lifetime of the owning collection, so this is
/// for tests, not for long-running production queues.
///
/// # Thread Safety
///
/// Deferred pointers are collected under a `Mutex`; they are freed
/// single-threadedly in `Drop`.
pub struct DeferredGuard {
    deferred: Mutex<Vec<DeferredNode>>,
    #[cfg(debug_assertions)]
    seen: Mutex<HashSet<usize>>,
}

struct DeferredNode {
    ptr: *mut (),
    dealloc: unsafe fn(*mut ()),
}

// Safety: the raw pointer is only dereferenced at drop time, after all
// sharing has ended; collection is synchronized by the Mutex.
unsafe impl Send for DeferredNode {}

impl DeferredGuard {
    /// Create a new deferred guard.
    pub fn new() -> Self {
        DeferredGuard {
            deferred: Mutex::new(Vec::new()),
            #[cfg(debug_assertions)]
            seen: Mutex::new(HashSet::new()),
        }
    }
}

impl Default for DeferredGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for DeferredGuard {
    fn drop(&mut self) {
        let nodes = self.deferred.get_mut().unwrap();

        // A pointer deferred twice would be a double free; fail loudly.
        let mut seen: HashSet<usize> = HashSet::new();
        for node in nodes.iter() {
            if !seen.insert(node.ptr as usize) {
                panic!(
                    "pointer {:#x} deferred for destruction twice",
                    node.ptr as usize
                );
            }
        }

        for node in nodes.drain(..) {
            unsafe {
                (node.dealloc)(node.ptr);
            }
        }
    }
}

/// A plain reference wrapper for `DeferredGuard`.
///
/// Since all destruction is deferred until the guard drops, references are
/// valid for as long as the collection exists.
pub struct DeferredRef<'a, T> {
    data: &'a T,
}

impl<'a, T> DeferredRef<'a, T> {
    /// Create a new deferred reference.
    pub fn new(data: &'a T) -> Self {
        DeferredRef { data }
    }
}

impl<T> Deref for DeferredRef<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl Guard for DeferredGuard {
    type GuardedRef<'a, T: 'a> = DeferredRef<'a, T>;

    /// No-op: protection comes from the collection's stored guard.
    type ReadGuard = ();

    fn pin() -> Self::ReadGuard {}

    unsafe fn defer_destroy<N>(&self, node: *mut N, dealloc: unsafe fn(*mut N)) {
        #[cfg(debug_assertions)]
        {
            let mut seen = self.seen.lock().unwrap();
            if !seen.insert(node as usize) {
                panic!("duplicate defer_destroy at {:#x}", node as usize);
            }
        }

        let node = DeferredNode {
            ptr: node as *mut (),
            dealloc: unsafe {
                std::mem::transmute::<unsafe fn(*mut N), unsafe fn(*mut ())>(dealloc)
            },
        };
        self.deferred.lock().unwrap().push(node);
    }

    unsafe fn make_ref<'a, T: 'a>(ptr: *const T) -> Self::GuardedRef<'a, T> {
        // Safety: caller guarantees ptr stays valid for 'a
        DeferredRef::new(unsafe { &*ptr })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deferred_destruction_runs_at_drop() {
        let guard = DeferredGuard::default();

        for i in 0..10 {
            let ptr = Box::into_raw(Box::new(i));
            unsafe {
                guard.defer_destroy(ptr, |p| {
                    drop(Box::from_raw(p));
                });
            }
        }
        // All 10 nodes freed when guard drops
    }

    #[test]
    fn deferred_ref_derefs() {
        let value = 42;
        let _read = DeferredGuard::pin();

        unsafe {
            let guarded = DeferredGuard::make_ref(&value);
            assert_eq!(*guarded, 42);
        }
    }
}
