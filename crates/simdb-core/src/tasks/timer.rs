//! Fixed-interval worker thread.
//!
//! A [`TimerThread`] calls a tick closure every interval on a dedicated
//! OS thread. The number of concurrently live worker threads in the
//! process is capped; exceeding the cap on start is an error.

use parking_lot::{Condvar, Mutex};
use simdb_common::{DbError, Result};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Default drain interval.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(100);

static LIVE_TASK_THREADS: AtomicUsize = AtomicUsize::new(0);
static MAX_TASK_THREADS: AtomicUsize = AtomicUsize::new(2);

/// Process-wide cap on concurrently live worker threads.
pub fn max_task_threads() -> usize {
    MAX_TASK_THREADS.load(Ordering::SeqCst)
}

/// Reconfigure the process-wide worker-thread cap.
pub fn set_max_task_threads(max: usize) {
    MAX_TASK_THREADS.store(max, Ordering::SeqCst);
}

/// Number of worker threads currently alive in the process.
pub fn current_task_threads() -> usize {
    LIVE_TASK_THREADS.load(Ordering::SeqCst)
}

fn claim_thread_slot() -> Result<()> {
    let mut live = LIVE_TASK_THREADS.load(Ordering::SeqCst);
    loop {
        let limit = max_task_threads();
        if live >= limit {
            return Err(DbError::ThreadQuotaExceeded { limit });
        }
        match LIVE_TASK_THREADS.compare_exchange(
            live,
            live + 1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        ) {
            Ok(_) => return Ok(()),
            Err(actual) => live = actual,
        }
    }
}

fn release_thread_slot() {
    LIVE_TASK_THREADS.fetch_sub(1, Ordering::SeqCst);
}

struct TimerShared {
    running: AtomicBool,
    wake_lock: Mutex<()>,
    wake_cv: Condvar,
}

/// Wall-clock interval executor.
///
/// The tick closure is first called one interval after `start`, then
/// repeatedly. A tick that overruns the interval is followed by the next
/// tick immediately. A tick returning the interrupt error ends the loop.
pub struct TimerThread {
    interval: Duration,
    shared: Arc<TimerShared>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimerThread {
    pub fn new(interval: Duration) -> Self {
        TimerThread {
            interval,
            shared: Arc::new(TimerShared {
                running: AtomicBool::new(false),
                wake_lock: Mutex::new(()),
                wake_cv: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Begin timed execution of `tick` on a new worker thread. A no-op if
    /// already running. Fails with [`DbError::ThreadQuotaExceeded`] when
    /// another live worker thread would exceed the process-wide cap.
    pub fn start(&self, mut tick: impl FnMut() -> Result<()> + Send + 'static) -> Result<()> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        claim_thread_slot()?;

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let interval = self.interval;

        let spawned = thread::Builder::new()
            .name("simdb-worker".to_string())
            .spawn(move || {
                shared.wait(interval);
                loop {
                    // Read the stop flag before draining so a stop request
                    // can never strand work that was queued ahead of it.
                    let stopping = !shared.running.load(Ordering::SeqCst);
                    let tick_start = Instant::now();
                    match tick() {
                        Ok(()) => {}
                        Err(DbError::Interrupted) => break,
                        Err(err) => {
                            tracing::warn!(error = %err, "worker tick failed");
                        }
                    }
                    if stopping {
                        break;
                    }
                    let elapsed = tick_start.elapsed();
                    if elapsed < interval {
                        shared.wait(interval - elapsed);
                    }
                }
            });

        match spawned {
            Ok(h) => {
                *handle = Some(h);
                Ok(())
            }
            Err(err) => {
                release_thread_slot();
                self.shared.running.store(false, Ordering::SeqCst);
                Err(err.into())
            }
        }
    }

    /// Stop timed execution and join the worker thread. The worker runs
    /// one final tick before exiting, so work queued before the stop
    /// request is drained. Must not be called from the tick closure
    /// itself.
    pub fn stop(&self) {
        {
            // Flip the flag under the wake lock so the worker cannot
            // check it and then miss the wakeup.
            let _guard = self.shared.wake_lock.lock();
            self.shared.running.store(false, Ordering::SeqCst);
        }
        self.shared.wake_cv.notify_all();
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
            release_thread_slot();
        }
    }

    /// Whether the worker thread is alive. This does not mean a tick is
    /// executing right now.
    pub fn is_running(&self) -> bool {
        self.handle.lock().is_some()
    }
}

impl TimerShared {
    fn wait(&self, dur: Duration) {
        let mut guard = self.wake_lock.lock();
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.wake_cv.wait_for(&mut guard, dur);
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn tick_runs_and_stop_joins() {
        set_max_task_threads(8);
        let ticks = Arc::new(AtomicUsize::new(0));
        let timer = TimerThread::new(Duration::from_millis(5));
        let counter = Arc::clone(&ticks);
        timer
            .start(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        thread::sleep(Duration::from_millis(50));
        timer.stop();
        assert!(!timer.is_running());
        assert!(ticks.load(Ordering::SeqCst) >= 2);
    }

    #[test]
    fn stop_runs_a_final_tick() {
        set_max_task_threads(8);
        let ticks = Arc::new(AtomicUsize::new(0));
        let timer = TimerThread::new(Duration::from_secs(60));
        let counter = Arc::clone(&ticks);
        timer
            .start(move || {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .unwrap();
        // The first scheduled tick is a minute away; stop must wake the
        // worker and still drain once.
        timer.stop();
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
