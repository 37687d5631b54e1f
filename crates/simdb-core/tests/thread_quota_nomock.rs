//! Process-wide worker-thread cap enforcement.
//!
//! Lives in its own test binary so no other test's worker threads can
//! perturb the global counters.

use simdb_core::tasks::{current_task_threads, set_max_task_threads, AsyncTaskQueue};
use simdb_core::{task_from_fn, DbError};
use std::time::Duration;

#[test]
fn exceeding_the_cap_fails_task_submission() {
    set_max_task_threads(1);

    let first = AsyncTaskQueue::with_interval(Duration::from_millis(10));
    first.add_worker_task(task_from_fn(|| Ok(()))).unwrap();
    assert_eq!(current_task_threads(), 1);

    let second = AsyncTaskQueue::with_interval(Duration::from_millis(10));
    let err = second
        .add_worker_task(task_from_fn(|| Ok(())))
        .unwrap_err();
    assert!(matches!(err, DbError::ThreadQuotaExceeded { limit: 1 }));

    // Joining the first queue frees its slot; the second can start now.
    first.stop_thread();
    assert_eq!(current_task_threads(), 0);
    second.add_worker_task(task_from_fn(|| Ok(()))).unwrap();
    assert_eq!(current_task_threads(), 1);
    second.stop_thread();
}
