//! Shared-thread task multiplexing.
//!
//! N tasks across M queues registered with one controller must drain
//! with exactly one transaction bracket per owning manager per round.

mod support;

use simdb_common::NamedValue;
use simdb_core::tasks::set_max_task_threads;
use simdb_core::{task_from_fn, ObjectManager, ObjectQuery, TaskController};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn one_transaction_per_owner_per_drain_round() {
    set_max_task_threads(8);
    let dir = tempfile::tempdir().unwrap();

    let begins_a = Arc::new(AtomicUsize::new(0));
    let commits_a = Arc::new(AtomicUsize::new(0));
    let begins_b = Arc::new(AtomicUsize::new(0));
    let commits_b = Arc::new(AtomicUsize::new(0));

    let mgr_a = ObjectManager::new(dir.path());
    mgr_a
        .create_database_from_schema(
            support::numbers_schema(),
            Box::new(support::CountingBackend::new(&begins_a, &commits_a)),
        )
        .unwrap();
    let mgr_b = ObjectManager::new(dir.path());
    mgr_b
        .create_database_from_schema(
            support::numbers_schema(),
            Box::new(support::CountingBackend::new(&begins_b, &commits_b)),
        )
        .unwrap();

    // An hour-long interval: only the explicit flush below drains, so
    // the whole submission burst lands in one round.
    let controller = TaskController::with_interval(Duration::from_secs(3600));
    mgr_a.add_to_task_controller(&controller).unwrap();
    mgr_b.add_to_task_controller(&controller).unwrap();

    for i in 0..10i64 {
        let mut table_a = mgr_a.get_table("Numbers").unwrap().unwrap();
        mgr_a
            .task_queue()
            .add_worker_task(task_from_fn(move || {
                table_a.create_object_with_args(&[NamedValue::new("Value", i)])?;
                Ok(())
            }))
            .unwrap();

        let mut table_b = mgr_b.get_table("Numbers").unwrap().unwrap();
        mgr_b
            .task_queue()
            .add_worker_task(task_from_fn(move || {
                table_b.create_object_with_args(&[NamedValue::new("Value", i * 100)])?;
                Ok(())
            }))
            .unwrap();
    }

    let begins_a_before = begins_a.load(Ordering::SeqCst);
    let begins_b_before = begins_b.load(Ordering::SeqCst);

    controller.flush_queue().unwrap();

    // One bracket per owner, not one per task.
    assert_eq!(begins_a.load(Ordering::SeqCst), begins_a_before + 1);
    assert_eq!(begins_b.load(Ordering::SeqCst), begins_b_before + 1);
    assert_eq!(
        commits_a.load(Ordering::SeqCst),
        begins_a.load(Ordering::SeqCst)
    );
    assert_eq!(
        commits_b.load(Ordering::SeqCst),
        begins_b.load(Ordering::SeqCst)
    );

    let mut query = ObjectQuery::new(&mgr_a, "Numbers");
    assert_eq!(query.count_matches().unwrap(), 10);
    let mut query = ObjectQuery::new(&mgr_b, "Numbers");
    assert_eq!(query.count_matches().unwrap(), 10);

    controller.stop_thread();
}

#[test]
fn ownerless_tasks_run_outside_transactions() {
    set_max_task_threads(8);
    let controller = TaskController::with_interval(Duration::from_secs(3600));
    let ran = Arc::new(AtomicUsize::new(0));
    {
        let ran = Arc::clone(&ran);
        controller
            .add_ownerless_task(task_from_fn(move || {
                ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }))
            .unwrap();
    }
    controller.flush_queue().unwrap();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
    controller.stop_thread();
}
