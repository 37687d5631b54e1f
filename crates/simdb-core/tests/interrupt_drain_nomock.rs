//! Worker-queue interrupt semantics.
//!
//! Submitting an interrupt after a pile of tasks must drain every task
//! before the consumer thread joins; nothing queued ahead of the
//! interrupt may be stranded.

use simdb_core::tasks::{set_max_task_threads, AsyncTaskQueue};
use simdb_core::{task_from_fn, WorkerInterrupt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn interrupt_drains_then_stops() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    set_max_task_threads(4);
    let completed = Arc::new(AtomicUsize::new(0));
    let queue = AsyncTaskQueue::with_interval(Duration::from_millis(10));

    for _ in 0..1000 {
        let completed = Arc::clone(&completed);
        queue
            .add_worker_task(task_from_fn(move || {
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
    }
    queue.add_worker_task(Box::new(WorkerInterrupt)).unwrap();

    queue.stop_thread();
    assert_eq!(completed.load(Ordering::SeqCst), 1000);
}

#[test]
fn single_producer_order_is_preserved() {
    set_max_task_threads(4);
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let queue = AsyncTaskQueue::with_interval(Duration::from_millis(5));

    for i in 0..500usize {
        let seen = Arc::clone(&seen);
        queue
            .add_worker_task(task_from_fn(move || {
                seen.lock().unwrap().push(i);
                Ok(())
            }))
            .unwrap();
    }
    queue.stop_thread();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 500);
    assert!(seen.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn flush_queue_is_synchronous() {
    set_max_task_threads(4);
    let completed = Arc::new(AtomicUsize::new(0));
    // A one-hour interval: only the explicit flush can drain.
    let queue = AsyncTaskQueue::with_interval(Duration::from_secs(3600));

    for _ in 0..10 {
        let completed = Arc::clone(&completed);
        queue
            .add_worker_task(task_from_fn(move || {
                completed.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
    }
    queue.flush_queue().unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 10);
    queue.stop_thread();
}
