use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::guard::Guard;

type NodePtr<T> = *mut QueueNode<T>;

// =============================================================================
// UNBOUNDED LOCK-FREE FIFO QUEUE
// =============================================================================
//
// Michael & Scott style singly linked queue. All shared mutation goes through
// compare-and-set; no operation ever blocks.
//
// Queue structure:
// ┌──────┐    ┌──────┐    ┌──────┐    ┌──────┐
// │ head │───►│ null │───►│ "a"  │───►│ "b"  │───► NULL
// └──────┘    │(tomb)│    └──────┘    └──▲───┘
//             └──────┘                   │
//                                      tail (may lag)
//
// INVARIANTS:
// 1. A node's item transitions value -> null (tombstone) exactly once,
//    via CAS; items are never re-set.
// 2. Exactly one enqueuer's CAS on a null successor link can succeed, so
//    every item is linked exactly once.
// 3. `head` and `tail` may lag behind the logical first/last live node by
//    any number of tombstoned nodes; they are advanced best-effort and the
//    advancing CAS is allowed to fail silently.
// 4. A node whose `next` points to itself has been unlinked; a traversal
//    that encounters one must restart from the current `head` (the stale
//    local snapshot no longer reaches the live list).
//
// UNLINKING AND RECLAMATION:
//
// Advancing `head` from h to p unlinks the chain [h, p). The winning CAS
// grants exclusive unlink rights over that chain: each chain node is
// self-linked, then handed to the guard for deferred destruction. Every
// chain node is already tombstoned, so its payload box was (or will be)
// deferred by the dequeuer that tombstoned it.
//
// Payloads are cloned out, never moved out: a pinned reader (peek, contains,
// iteration) may still be reading the payload box when the winning dequeuer
// returns, so the box is defer-destroyed like a node and the winner returns
// a clone made under its own pin.

pub struct QueueNode<T> {
    /// Boxed payload; null is the tombstone.
    item: AtomicPtr<T>,
    next: AtomicPtr<QueueNode<T>>,
}

impl<T> QueueNode<T> {
    fn new(value: T) -> Self {
        QueueNode {
            item: AtomicPtr::new(Box::into_raw(Box::new(value))),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// The initial node: starts life already tombstoned.
    fn empty() -> Self {
        QueueNode {
            item: AtomicPtr::new(ptr::null_mut()),
            next: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Load next pointer (Acquire ordering)
    #[inline]
    fn get_next(&self) -> NodePtr<T> {
        self.next.load(Ordering::Acquire)
    }

    /// CAS next pointer (Release/Relaxed ordering)
    #[inline]
    fn cas_next(&self, expected: NodePtr<T>, new: NodePtr<T>) -> Result<NodePtr<T>, NodePtr<T>> {
        self.next
            .compare_exchange(expected, new, Ordering::Release, Ordering::Relaxed)
    }

    #[inline]
    fn get_item(&self) -> *mut T {
        self.item.load(Ordering::Acquire)
    }

    /// Tombstone the item (Release/Relaxed ordering). Only one caller wins.
    #[inline]
    fn cas_item_to_null(&self, expected: *mut T) -> bool {
        self.item
            .compare_exchange(expected, ptr::null_mut(), Ordering::Release, Ordering::Relaxed)
            .is_ok()
    }
}

unsafe fn dealloc_node<T>(node: NodePtr<T>) {
    drop(unsafe { Box::from_raw(node) });
}

unsafe fn dealloc_item<T>(item: *mut T) {
    drop(unsafe { Box::from_raw(item) });
}

/// An unbounded multi-producer/multi-consumer lock-free FIFO queue.
///
/// FIFO order is preserved among successfully linked nodes; concurrent
/// dequeues race but each live item is delivered to exactly one caller.
///
/// Like the other collections, the queue is generic over its memory
/// reclamation strategy `G`.
pub struct LinkedQueue<T, G: Guard> {
    head: AtomicPtr<QueueNode<T>>,
    tail: AtomicPtr<QueueNode<T>>,
    /// Shared guard instance for deferred destruction of unlinked nodes and
    /// tombstoned payload boxes.
    guard: G,
}

// Safety: the queue owns its payloads; raw pointers are only shared through
// the CAS protocol above, and readers clone rather than alias payloads
// outside a pin.
unsafe impl<T: Send, G: Guard> Send for LinkedQueue<T, G> {}
unsafe impl<T: Send + Sync, G: Guard> Sync for LinkedQueue<T, G> {}

impl<T, G: Guard> LinkedQueue<T, G> {
    pub fn new() -> Self {
        let node = Box::into_raw(Box::new(QueueNode::empty()));
        LinkedQueue {
            head: AtomicPtr::new(node),
            tail: AtomicPtr::new(node),
            guard: G::default(),
        }
    }

    /// Get the shared guard instance for this collection.
    pub fn guard(&self) -> &G {
        &self.guard
    }

    /// Next node in traversal order: the successor, or the current `head`
    /// when `p` has been unlinked (self-linked) under us.
    #[inline]
    fn succ(&self, p: NodePtr<T>) -> NodePtr<T> {
        let next = unsafe { (*p).get_next() };
        if next == p {
            self.head.load(Ordering::Acquire)
        } else {
            next
        }
    }

    /// Try to advance `head` from `h` to `p`, unlinking the chain [h, p).
    ///
    /// Best-effort: losing the CAS means another thread advanced `head`
    /// past `h` and owns the unlink of that chain instead.
    fn update_head(&self, h: NodePtr<T>, p: NodePtr<T>) {
        if h == p {
            return;
        }
        if self
            .head
            .compare_exchange(h, p, Ordering::Release, Ordering::Relaxed)
            .is_err()
        {
            return;
        }

        // We won: [h, p) is ours to unlink. Collect the chain before
        // self-linking breaks it. Every chain node is tombstoned and its
        // payload box is owned by whichever dequeuer tombstoned it.
        let mut chain = Vec::new();
        let mut n = h;
        while n != p && !n.is_null() {
            chain.push(n);
            n = unsafe { (*n).get_next() };
        }
        for n in chain {
            unsafe {
                (*n).next.store(n, Ordering::Release);
                self.guard.defer_destroy(n, dealloc_node::<T>);
            }
        }
    }

    /// Append a value to the tail of the queue. Never blocks.
    pub fn enqueue(&self, value: T) {
        let new_node = Box::into_raw(Box::new(QueueNode::new(value)));
        let _pin = G::pin();

        // `tail` may be stale (behind the true last node, or even behind
        // `head`); walk forward until a null successor is found.
        let mut t = self.tail.load(Ordering::Acquire);
        let mut p = t;
        loop {
            let next = unsafe { (*p).get_next() };
            if next.is_null() {
                if unsafe { (*p).cas_next(ptr::null_mut(), new_node) }.is_ok() {
                    // Exactly-once link succeeded. If we had to walk past the
                    // cached tail, try to drag it forward; failure means
                    // another enqueuer already did.
                    if p != t {
                        let _ = self.tail.compare_exchange(
                            t,
                            new_node,
                            Ordering::Release,
                            Ordering::Relaxed,
                        );
                    }
                    return;
                }
                // Lost the link race; re-read the successor.
            } else if next == p {
                // p was unlinked while we held it. Re-read tail if it moved,
                // otherwise restart from head.
                let t2 = self.tail.load(Ordering::Acquire);
                p = if t2 != t {
                    t = t2;
                    t2
                } else {
                    self.head.load(Ordering::Acquire)
                };
            } else {
                // Stale tail: hop to the freshest tail if it moved since the
                // last walk step, else step to the successor.
                let t2 = self.tail.load(Ordering::Acquire);
                if p != t && t2 != t {
                    t = t2;
                    p = t2;
                } else {
                    p = next;
                }
            }
        }
    }

    /// True when no live item is currently observable. Best-effort snapshot
    /// under concurrent mutation.
    pub fn is_empty(&self) -> bool {
        let _pin = G::pin();
        self.first_live().is_null()
    }

    /// Number of live items. O(n) full traversal; under concurrent mutation
    /// the count is a best-effort snapshot and may over- or undercount
    /// relative to any single instant.
    pub fn len(&self) -> usize {
        let _pin = G::pin();
        let mut count = 0;
        let mut p = self.head.load(Ordering::Acquire);
        while !p.is_null() {
            if !unsafe { (*p).get_item() }.is_null() {
                count += 1;
            }
            p = self.succ(p);
        }
        count
    }

    /// Borrow the first live item without removing or cloning it, or `None`
    /// if the queue is empty.
    ///
    /// The returned reference carries its own protection: a concurrent
    /// dequeue may tombstone the item, but its payload box is deferred, not
    /// freed, while the reference is live.
    pub fn peek_ref(&self) -> Option<G::GuardedRef<'_, T>> {
        let _pin = G::pin();
        loop {
            let p = self.first_live();
            if p.is_null() {
                return None;
            }
            let item = unsafe { (*p).get_item() };
            if item.is_null() {
                // Tombstoned between scan and read; rescan.
                continue;
            }
            // make_ref takes its own protection while the traversal pin is
            // still held, so the payload cannot be reclaimed in between.
            return Some(unsafe { G::make_ref(item) });
        }
    }

    /// First node holding a live item, advancing `head` lazily as a side
    /// effect. Returns null if the queue is empty. Caller must hold a pin.
    fn first_live(&self) -> NodePtr<T> {
        'restart: loop {
            let h = self.head.load(Ordering::Acquire);
            let mut p = h;
            loop {
                if !unsafe { (*p).get_item() }.is_null() {
                    self.update_head(h, p);
                    return p;
                }
                let next = unsafe { (*p).get_next() };
                if next.is_null() {
                    self.update_head(h, p);
                    return ptr::null_mut();
                }
                if next == p {
                    continue 'restart;
                }
                p = next;
            }
        }
    }
}

impl<T: Clone, G: Guard> LinkedQueue<T, G> {
    /// Remove and return the first live item, or `None` if the queue is
    /// empty. Never blocks.
    pub fn dequeue(&self) -> Option<T> {
        let _pin = G::pin();
        'restart: loop {
            let h = self.head.load(Ordering::Acquire);
            let mut p = h;
            loop {
                let item = unsafe { (*p).get_item() };
                if !item.is_null() && unsafe { (*p).cas_item_to_null(item) } {
                    // We won the tombstone CAS; the item is delivered to us
                    // and to no one else.
                    if p != h {
                        let next = unsafe { (*p).get_next() };
                        self.update_head(h, if next.is_null() { p } else { next });
                    }
                    // Clone under the pin, then defer the box: a concurrent
                    // peek/iteration may still be reading it.
                    let value = unsafe { (*item).clone() };
                    unsafe { self.guard.defer_destroy(item, dealloc_item::<T>) };
                    return Some(value);
                }
                let next = unsafe { (*p).get_next() };
                if next.is_null() {
                    self.update_head(h, p);
                    return None;
                }
                if next == p {
                    continue 'restart;
                }
                p = next;
            }
        }
    }

    /// Return the first live item without removing it, or `None` if the
    /// queue is empty. Advances `head` lazily as a side effect, amortizing
    /// pointer chasing across callers.
    pub fn peek(&self) -> Option<T> {
        let _pin = G::pin();
        loop {
            let p = self.first_live();
            if p.is_null() {
                return None;
            }
            let item = unsafe { (*p).get_item() };
            if item.is_null() {
                // Tombstoned between scan and read; rescan.
                continue;
            }
            // The payload box cannot be freed while we are pinned.
            return Some(unsafe { (*item).clone() });
        }
    }

    /// Weakly consistent iteration over live items (cloned).
    ///
    /// The sequence reflects a state the queue passed through at some point
    /// during the iteration; concurrent mutations may or may not be
    /// observed. Removing the just-returned element (via
    /// [`LinkedQueue::remove`]) during iteration is supported.
    pub fn iter(&self) -> Iter<'_, T, G> {
        let pin = G::pin();
        let first = self.head.load(Ordering::Acquire);
        Iter {
            queue: self,
            cursor: first,
            _pin: pin,
        }
    }
}

impl<T: PartialEq, G: Guard> LinkedQueue<T, G> {
    /// True if some live item equals `value`. O(n) best-effort snapshot.
    pub fn contains(&self, value: &T) -> bool {
        let _pin = G::pin();
        let mut p = self.head.load(Ordering::Acquire);
        while !p.is_null() {
            let item = unsafe { (*p).get_item() };
            // Safe to compare while pinned: tombstoning defers the box.
            if !item.is_null() && unsafe { &*item } == value {
                return true;
            }
            p = self.succ(p);
        }
        false
    }

    /// Tombstone the first live item equal to `value`. Returns true if an
    /// item was removed.
    ///
    /// The node itself is left in place; head advancement is the single
    /// unlink authority (a winning head CAS owns its whole chain), so
    /// tombstoned interior nodes are swept when `head` passes them.
    pub fn remove(&self, value: &T) -> bool {
        let _pin = G::pin();
        let mut p = self.head.load(Ordering::Acquire);
        while !p.is_null() {
            let item = unsafe { (*p).get_item() };
            if !item.is_null()
                && unsafe { &*item } == value
                && unsafe { (*p).cas_item_to_null(item) }
            {
                unsafe { self.guard.defer_destroy(item, dealloc_item::<T>) };
                return true;
            }
            p = self.succ(p);
        }
        false
    }
}

impl<T, G: Guard> Default for LinkedQueue<T, G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, G: Guard> Drop for LinkedQueue<T, G> {
    fn drop(&mut self) {
        // Exclusive access: free the reachable chain. Unlinked nodes and
        // tombstoned payload boxes were already deferred to the guard, which
        // drops after this.
        let mut p = *self.head.get_mut();
        while !p.is_null() {
            let node = unsafe { &mut *p };
            let next = *node.next.get_mut();
            let item = *node.item.get_mut();
            if !item.is_null() {
                unsafe { drop(Box::from_raw(item)) };
            }
            unsafe { drop(Box::from_raw(p)) };
            if next == p {
                break;
            }
            p = next;
        }
    }
}

/// Weakly consistent iterator; holds a read pin for its whole lifetime.
pub struct Iter<'a, T: Clone, G: Guard> {
    queue: &'a LinkedQueue<T, G>,
    cursor: NodePtr<T>,
    _pin: G::ReadGuard,
}

impl<T: Clone, G: Guard> Iterator for Iter<'_, T, G> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        while !self.cursor.is_null() {
            let p = self.cursor;
            let item = unsafe { (*p).get_item() };
            self.cursor = self.queue.succ(p);
            if !item.is_null() {
                return Some(unsafe { (*item).clone() });
            }
        }
        None
    }
}
