//! Asynchronous database work.
//!
//! Producers hand [`WorkerTask`]s to an [`AsyncTaskQueue`], which drains
//! them on a background thread at a fixed wall-clock interval. Queues may
//! instead register with a [`TaskController`], which multiplexes many
//! queues onto one shared worker thread and collapses each owner's batch
//! into a single atomic transaction per drain round.

pub mod controller;
pub mod queue;
pub mod timer;

pub use controller::TaskController;
pub use queue::AsyncTaskQueue;
pub use timer::{
    current_task_threads, max_task_threads, set_max_task_threads, TimerThread, DEFAULT_INTERVAL,
};

use simdb_common::{DbError, Result};

/// A unit of work for the background thread. `complete_task` runs to
/// completion or fails; there is no mid-task suspension.
pub trait WorkerTask: Send {
    fn complete_task(&mut self) -> Result<()>;
}

/// Specialized task used to break out of the consumer loop without
/// synchronously asking it to do so. When popped, it fails with the
/// distinguished interrupt error that the consumer loop catches.
pub struct WorkerInterrupt;

impl WorkerTask for WorkerInterrupt {
    fn complete_task(&mut self) -> Result<()> {
        Err(DbError::Interrupted)
    }
}

struct FnTask<F: FnMut() -> Result<()> + Send>(F);

impl<F: FnMut() -> Result<()> + Send> WorkerTask for FnTask<F> {
    fn complete_task(&mut self) -> Result<()> {
        (self.0)()
    }
}

/// Wrap a closure as a [`WorkerTask`].
pub fn task_from_fn(f: impl FnMut() -> Result<()> + Send + 'static) -> Box<dyn WorkerTask> {
    Box::new(FnTask(f))
}

/// Clients register for a callback fired synchronously just before each
/// interval's drain. Registration is by weak reference; dead listeners
/// are dropped silently.
pub trait PreFlushListener: Send + Sync {
    fn notify_task_queue_about_to_flush(&self);
}
