//! Shared worker thread for multiple task queues.
//!
//! A controller holds one timer thread and a single concurrent FIFO. On
//! each interval tick it drains the FIFO, de-interleaves the tasks by
//! owning database, and runs each owner's batch inside one safe
//! transaction. Hundreds of small writes to one file collapse into one
//! atomic transaction per drain round.

use crate::object_manager::ObjectManager;
use crate::tasks::queue::AsyncTaskQueue;
use crate::tasks::timer::{TimerThread, DEFAULT_INTERVAL};
use crate::tasks::{PreFlushListener, WorkerInterrupt, WorkerTask};
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;
use simdb_common::{DbError, Result};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

struct OwnedTask {
    /// Owner stamp. Non-owning: the controller never extends an
    /// ObjectManager's lifetime.
    owner: Option<Weak<ObjectManager>>,
    task: Box<dyn WorkerTask>,
}

/// Multiplexes many [`AsyncTaskQueue`]s onto one worker thread.
pub struct TaskController {
    tx: Sender<OwnedTask>,
    rx: Receiver<OwnedTask>,
    timer: TimerThread,
    listeners: Mutex<Vec<Weak<dyn PreFlushListener>>>,
    client_queues: Mutex<Vec<Weak<AsyncTaskQueue>>>,
    joined: AtomicBool,
}

impl TaskController {
    pub fn new() -> Arc<Self> {
        Self::with_interval(DEFAULT_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Arc<Self> {
        let (tx, rx) = crossbeam_channel::unbounded();
        Arc::new(TaskController {
            tx,
            rx,
            timer: TimerThread::new(interval),
            listeners: Mutex::new(Vec::new()),
            client_queues: Mutex::new(Vec::new()),
            joined: AtomicBool::new(false),
        })
    }

    pub(crate) fn register_queue(&self, queue: &Arc<AsyncTaskQueue>) {
        self.client_queues.lock().push(Arc::downgrade(queue));
    }

    /// Register a weak pre-flush listener on the controller itself.
    pub fn register_for_pre_flush_notifications(&self, listener: &Arc<dyn PreFlushListener>) {
        self.listeners.lock().push(Arc::downgrade(listener));
    }

    /// Notify the controller's own listeners and those of every client
    /// queue that a drain is about to happen.
    pub fn emit_pre_flush_notification(&self) {
        let mut listeners = self.listeners.lock();
        listeners.retain(|weak| match weak.upgrade() {
            Some(listener) => {
                listener.notify_task_queue_about_to_flush();
                true
            }
            None => false,
        });
        drop(listeners);

        let mut queues = self.client_queues.lock();
        queues.retain(|weak| match weak.upgrade() {
            Some(queue) => {
                queue.emit_pre_flush_notification();
                true
            }
            None => false,
        });
    }

    /// Record the task's owner and push it into the shared FIFO. Starts
    /// the shared worker thread on the first submission.
    pub fn add_worker_task(
        self: &Arc<Self>,
        owner: Weak<ObjectManager>,
        task: Box<dyn WorkerTask>,
    ) -> Result<()> {
        self.push_task(Some(owner), task)
    }

    /// Push a task with no owning database. Such tasks run outside any
    /// transaction.
    pub fn add_ownerless_task(self: &Arc<Self>, task: Box<dyn WorkerTask>) -> Result<()> {
        self.push_task(None, task)
    }

    fn push_task(
        self: &Arc<Self>,
        owner: Option<Weak<ObjectManager>>,
        task: Box<dyn WorkerTask>,
    ) -> Result<()> {
        if self.joined.load(Ordering::SeqCst) {
            return Err(DbError::TaskQueueJoined);
        }
        self.tx
            .send(OwnedTask { owner, task })
            .map_err(|_| DbError::TaskQueueJoined)?;

        if !self.timer.is_running() {
            let controller = Arc::clone(self);
            self.timer.start(move || controller.drain_round())?;
        }
        Ok(())
    }

    /// Force a synchronous flush of every queued task.
    pub fn flush_queue(&self) -> Result<()> {
        match self.drain_round() {
            Err(DbError::Interrupted) => Ok(()),
            other => other,
        }
    }

    /// Enqueue an interrupt and join the shared worker thread. Work
    /// queued ahead of the interrupt is drained first. Must not be called
    /// from a task's `complete_task`.
    pub fn stop_thread(&self) {
        if self.joined.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(OwnedTask {
            owner: None,
            task: Box::new(WorkerInterrupt),
        });
        self.timer.stop();
    }

    /// One drain round: de-interleave the FIFO by owner, run each owner's
    /// batch inside one safe transaction, then run ownerless tasks bare.
    fn drain_round(&self) -> Result<()> {
        self.emit_pre_flush_notification();

        // Group by owner identity. A map from pointer to batch index
        // keeps each owner's tasks in submission order.
        let mut batches: Vec<(Arc<ObjectManager>, Vec<Box<dyn WorkerTask>>)> = Vec::new();
        let mut batch_by_owner: HashMap<*const ObjectManager, usize> = HashMap::new();
        let mut ownerless: Vec<Box<dyn WorkerTask>> = Vec::new();

        while let Ok(owned) = self.rx.try_recv() {
            let obj_mgr = owned.owner.as_ref().and_then(Weak::upgrade);
            match obj_mgr {
                Some(obj_mgr) => {
                    let key = Arc::as_ptr(&obj_mgr);
                    let idx = *batch_by_owner.entry(key).or_insert_with(|| {
                        batches.push((obj_mgr, Vec::new()));
                        batches.len() - 1
                    });
                    batches[idx].1.push(owned.task);
                }
                None => ownerless.push(owned.task),
            }
        }

        for (obj_mgr, mut batch) in batches {
            obj_mgr.safe_transaction(|| {
                for task in batch.iter_mut() {
                    match task.complete_task() {
                        Ok(()) => {}
                        // An interrupt inside an owner batch only ends
                        // that batch; the transaction still commits.
                        Err(DbError::Interrupted) => break,
                        Err(err) => return Err(err),
                    }
                }
                Ok(())
            })?;
        }

        let mut interrupted = false;
        for task in &mut ownerless {
            match task.complete_task() {
                Ok(()) => {}
                Err(DbError::Interrupted) => {
                    interrupted = true;
                    break;
                }
                Err(err) => return Err(err),
            }
        }
        if interrupted {
            return Err(DbError::Interrupted);
        }
        Ok(())
    }
}

impl Drop for TaskController {
    fn drop(&mut self) {
        if !self.joined.swap(true, Ordering::SeqCst) {
            let _ = self.tx.send(OwnedTask {
                owner: None,
                task: Box::new(WorkerInterrupt),
            });
            self.timer.stop();
        }
    }
}
