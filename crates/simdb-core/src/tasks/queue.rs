//! Per-connection task queue.
//!
//! One producer (typically the simulation's main thread) pushes tasks;
//! one consumer thread drains them every interval. The consumer thread is
//! lazily started on the first submitted task and joined on teardown.
//! When registered with a [`TaskController`], the queue forwards every
//! submission there instead and never starts a thread of its own.

use crate::object_manager::ObjectManager;
use crate::tasks::controller::TaskController;
use crate::tasks::timer::{TimerThread, DEFAULT_INTERVAL};
use crate::tasks::{PreFlushListener, WorkerInterrupt, WorkerTask};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use simdb_common::{DbError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Drain every task currently in the channel. Returns `true` when an
/// interrupt was popped, which ends the consumer loop.
pub(crate) fn drain_channel(rx: &Receiver<Box<dyn WorkerTask>>) -> Result<bool> {
    while let Ok(mut task) = rx.try_recv() {
        match task.complete_task() {
            Ok(()) => {}
            Err(DbError::Interrupted) => return Ok(true),
            Err(err) => return Err(err),
        }
    }
    Ok(false)
}

/// Single-producer/single-consumer work queue driven by a wall-clock
/// timer thread.
pub struct AsyncTaskQueue {
    tx: Sender<Box<dyn WorkerTask>>,
    rx: Receiver<Box<dyn WorkerTask>>,
    timer: TimerThread,
    /// Database this queue flushes into. When set, each drain runs inside
    /// one safe transaction on that manager.
    owner: Mutex<Weak<ObjectManager>>,
    controller: Mutex<Option<Arc<TaskController>>>,
    listeners: Mutex<Vec<Weak<dyn PreFlushListener>>>,
    joined: AtomicBool,
}

impl AsyncTaskQueue {
    pub fn new() -> Arc<Self> {
        Self::with_interval(DEFAULT_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Arc<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new(AsyncTaskQueue {
            tx,
            rx,
            timer: TimerThread::new(interval),
            owner: Mutex::new(Weak::new()),
            controller: Mutex::new(None),
            listeners: Mutex::new(Vec::new()),
            joined: AtomicBool::new(false),
        })
    }

    /// Associate this queue with the database it flushes into, so drains
    /// are grouped into one transaction per interval.
    pub fn set_simulation_database(&self, obj_mgr: &Arc<ObjectManager>) {
        *self.owner.lock() = Arc::downgrade(obj_mgr);
    }

    /// Owner wiring used while the manager itself is still under
    /// construction.
    pub(crate) fn set_owner(&self, obj_mgr: Weak<ObjectManager>) {
        *self.owner.lock() = obj_mgr;
    }

    /// Forward all future submissions to a shared controller. Any pending
    /// work is flushed here first and this queue's own consumer thread,
    /// if it was started, is torn down.
    pub fn add_to_task_controller(self: &Arc<Self>, controller: &Arc<TaskController>) -> Result<()> {
        self.flush_queue()?;
        if self.timer.is_running() {
            let _ = self.tx.send(Box::new(WorkerInterrupt));
            self.timer.stop();
        }
        *self.controller.lock() = Some(Arc::clone(controller));
        controller.register_queue(self);
        Ok(())
    }

    /// Register a weak pre-flush listener.
    pub fn register_for_pre_flush_notifications(&self, listener: &Arc<dyn PreFlushListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    /// Notify all live listeners that a drain is about to happen.
    pub fn emit_pre_flush_notification(&self) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                listener.notify_task_queue_about_to_flush();
                true
            }
            None => false,
        });
    }

    /// Submit a task for asynchronous evaluation. Starts the consumer
    /// thread on the first submission. Fails loudly if the queue has
    /// already been joined.
    pub fn add_worker_task(self: &Arc<Self>, task: Box<dyn WorkerTask>) -> Result<()> {
        if self.joined.load(Ordering::SeqCst) {
            return Err(DbError::TaskQueueJoined);
        }

        if let Some(controller) = self.controller.lock().clone() {
            let owner = self.owner.lock().clone();
            return controller.add_worker_task(owner, task);
        }

        self.tx
            .send(task)
            .map_err(|_| DbError::TaskQueueJoined)?;

        if !self.timer.is_running() {
            let queue = Arc::clone(self);
            self.timer.start(move || queue.tick())?;
        }
        Ok(())
    }

    fn tick(&self) -> Result<()> {
        if self.flush_queue()? {
            return Err(DbError::Interrupted);
        }
        Ok(())
    }

    /// Evaluate all pending tasks synchronously. When the queue is tied
    /// to a database, the whole drain runs inside one safe transaction.
    /// Returns `true` when an interrupt was drained.
    pub fn flush_queue(&self) -> Result<bool> {
        self.emit_pre_flush_notification();

        let owner = self.owner.lock().upgrade();
        match owner {
            Some(obj_mgr) if obj_mgr.is_connected() => {
                obj_mgr.safe_transaction(|| drain_channel(&self.rx))
            }
            _ => drain_channel(&self.rx),
        }
    }

    /// Submit the special interrupt task and join the consumer thread.
    /// All work queued ahead of the interrupt is drained first. Must not
    /// be called from a task's `complete_task`.
    pub fn stop_thread(&self) {
        if self.joined.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(controller) = self.controller.lock().clone() {
            controller.stop_thread();
            return;
        }
        let _ = self.tx.send(Box::new(WorkerInterrupt));
        self.timer.stop();
    }
}

impl Drop for AsyncTaskQueue {
    fn drop(&mut self) {
        if !self.joined.swap(true, Ordering::SeqCst) {
            // Stopping through the controller is the controller's
            // business; only tear down a thread this queue started.
            if self.controller.lock().is_none() && self.timer.is_running() {
                let _ = self.tx.send(Box::new(WorkerInterrupt));
                self.timer.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{task_from_fn, timer::set_max_task_threads};
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tasks_drain_in_submission_order_before_join() {
        set_max_task_threads(8);
        let order = Arc::new(Mutex::new(Vec::new()));
        let queue = AsyncTaskQueue::with_interval(Duration::from_millis(5));
        for i in 0..100 {
            let order = Arc::clone(&order);
            queue
                .add_worker_task(task_from_fn(move || {
                    order.lock().push(i);
                    Ok(())
                }))
                .unwrap();
        }
        queue.stop_thread();

        let seen = order.lock();
        assert_eq!(seen.len(), 100);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn submission_after_join_fails_loudly() {
        set_max_task_threads(8);
        let queue = AsyncTaskQueue::with_interval(Duration::from_millis(5));
        queue.add_worker_task(task_from_fn(|| Ok(()))).unwrap();
        queue.stop_thread();
        let err = queue.add_worker_task(task_from_fn(|| Ok(()))).unwrap_err();
        assert!(matches!(err, DbError::TaskQueueJoined));
    }

    #[test]
    fn pre_flush_listeners_fire_before_drains() {
        set_max_task_threads(8);

        struct Counter(AtomicUsize);
        impl PreFlushListener for Counter {
            fn notify_task_queue_about_to_flush(&self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let queue = AsyncTaskQueue::with_interval(Duration::from_millis(5));
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let listener: Arc<dyn PreFlushListener> = counter.clone();
        queue.register_for_pre_flush_notifications(&listener);
        queue.flush_queue().unwrap();

        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }
}
