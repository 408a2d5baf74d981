use std::thread;
use std::time::{Duration, Instant};

use anemone_core::{AcquireError, CancelToken, DelayQueue, DelayedItem};

#[test]
fn take_yields_items_in_deadline_order() {
    let queue: DelayQueue<DelayedItem<&str>> = DelayQueue::new();
    queue.push(DelayedItem::after("late", Duration::from_millis(500)));
    queue.push(DelayedItem::after("early", Duration::from_millis(100)));
    queue.push(DelayedItem::after("middle", Duration::from_millis(300)));

    // poll before any deadline elapses yields nothing.
    assert_eq!(queue.poll(), None);

    let start = Instant::now();
    assert_eq!(queue.take().value, "early");
    assert_eq!(queue.take().value, "middle");
    assert_eq!(queue.take().value, "late");
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(500));
}

#[test]
fn leader_is_preempted_by_an_earlier_insertion() {
    let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
    queue.push(DelayedItem::after(1, Duration::from_secs(10)));

    let taker = {
        let queue = queue.clone();
        thread::spawn(move || {
            let start = Instant::now();
            let item = queue.take();
            (item.value, start.elapsed())
        })
    };
    // Let the taker become leader, armed against the 10s root.
    thread::sleep(Duration::from_millis(50));

    queue.push(DelayedItem::after(2, Duration::from_millis(100)));
    let (value, elapsed) = taker.join().unwrap();

    // The leader woke for the new root promptly, not at the 10s deadline.
    assert_eq!(value, 2);
    assert!(elapsed < Duration::from_secs(2), "leader slept through preemption: {elapsed:?}");
    assert_eq!(queue.len(), 1);
}

#[test]
fn followers_wait_untimed_and_are_handed_the_next_item() {
    let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
    let mut takers = Vec::new();
    for _ in 0..3 {
        let queue = queue.clone();
        takers.push(thread::spawn(move || queue.take().value));
    }
    thread::sleep(Duration::from_millis(50));

    for i in 0..3 {
        queue.push(DelayedItem::after(i, Duration::from_millis(20 * (i as u64 + 1))));
    }

    let mut values: Vec<_> = takers.into_iter().map(|t| t.join().unwrap()).collect();
    values.sort_unstable();
    assert_eq!(values, vec![0, 1, 2]);
    assert!(queue.is_empty());
}

#[test]
fn poll_timeout_expires_without_touching_items() {
    let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
    queue.push(DelayedItem::after(7, Duration::from_secs(10)));

    let start = Instant::now();
    assert_eq!(queue.poll_timeout(Duration::from_millis(50)), None);
    assert!(start.elapsed() >= Duration::from_millis(50));
    assert_eq!(queue.len(), 1);
}

#[test]
fn cancellation_unblocks_a_taker() {
    let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
    let token = CancelToken::new();
    let taker = {
        let queue = queue.clone();
        let token = token.clone();
        thread::spawn(move || queue.take_cancelable(&token))
    };
    thread::sleep(Duration::from_millis(50));

    token.cancel();
    assert_eq!(taker.join().unwrap(), Err(AcquireError::Cancelled));

    // The queue stays fully usable.
    queue.push(DelayedItem::after(1, Duration::ZERO));
    assert_eq!(queue.take().value, 1);
}

#[test]
fn cancelling_the_leader_promotes_a_follower() {
    let queue: DelayQueue<DelayedItem<u32>> = DelayQueue::new();
    queue.push(DelayedItem::after(5, Duration::from_millis(200)));

    let token = CancelToken::new();
    let leader = {
        let queue = queue.clone();
        let token = token.clone();
        thread::spawn(move || queue.take_cancelable(&token))
    };
    thread::sleep(Duration::from_millis(30));

    let follower = {
        let queue = queue.clone();
        thread::spawn(move || queue.take().value)
    };
    thread::sleep(Duration::from_millis(30));

    // The leader departs; the follower must inherit the timing duty and
    // still collect the item at its deadline.
    token.cancel();
    assert_eq!(leader.join().unwrap(), Err(AcquireError::Cancelled));
    assert_eq!(follower.join().unwrap(), 5);
}
