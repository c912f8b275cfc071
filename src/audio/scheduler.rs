//! Cancellable periodic ticks
//!
//! Both the metering tick and the playback progress tick run through a
//! [`Scheduler`]. Cancelling a [`TickHandle`] is synchronous: once
//! [`TickHandle::cancel`] returns, the task will not run again.

use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A periodic callback. Returning `ControlFlow::Break` ends the task.
pub type TickTask = Box<dyn FnMut() -> ControlFlow<()> + Send + 'static>;

/// Source of periodic callbacks and of a monotonic clock
pub trait Scheduler: Send + Sync {
    /// Monotonic time since an arbitrary epoch
    fn now(&self) -> Duration;

    /// Run `task` every `interval` until it breaks or the handle is cancelled
    fn schedule(&self, interval: Duration, task: TickTask) -> TickHandle;
}

/// Handle to a scheduled task; dropping it cancels the task
pub struct TickHandle {
    cancelled: Arc<AtomicBool>,
    worker: Option<Worker>,
}

struct Worker {
    wake: mpsc::Sender<()>,
    thread: JoinHandle<()>,
}

impl TickHandle {
    fn detached(cancelled: Arc<AtomicBool>) -> Self {
        Self {
            cancelled,
            worker: None,
        }
    }

    /// Stop the task; no invocation starts after this returns
    pub fn cancel(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(worker) = self.worker.take() {
            drop(worker.wake);
            // A task may end its own tick; it cannot wait for itself.
            if worker.thread.thread().id() != thread::current().id() {
                let _ = worker.thread.join();
            }
        }
    }
}

impl Drop for TickHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Scheduler backed by one timer thread per task
pub struct ThreadScheduler {
    epoch: Instant,
}

impl ThreadScheduler {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for ThreadScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for ThreadScheduler {
    fn now(&self) -> Duration {
        self.epoch.elapsed()
    }

    fn schedule(&self, interval: Duration, mut task: TickTask) -> TickHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let (wake, receiver) = mpsc::channel::<()>();

        let thread = thread::spawn(move || loop {
            match receiver.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => {}
                _ => break,
            }
            if flag.load(Ordering::SeqCst) {
                break;
            }
            if task().is_break() {
                break;
            }
        });

        TickHandle {
            cancelled,
            worker: Some(Worker { wake, thread }),
        }
    }
}

/// Deterministic scheduler driven by [`ManualScheduler::advance`].
///
/// Tasks run on the thread that advances the clock, in due order.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    inner: Arc<Mutex<ManualInner>>,
}

#[derive(Default)]
struct ManualInner {
    now: Duration,
    tasks: Vec<ManualTask>,
}

struct ManualTask {
    interval: Duration,
    due: Duration,
    cancelled: Arc<AtomicBool>,
    task: TickTask,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks still scheduled
    pub fn pending(&self) -> usize {
        let mut inner = self.inner.lock().unwrap();
        inner.tasks.retain(|t| !t.cancelled.load(Ordering::SeqCst));
        inner.tasks.len()
    }

    /// Move the clock forward, running every task that falls due
    pub fn advance(&self, by: Duration) {
        let target = self.inner.lock().unwrap().now + by;

        loop {
            let mut next = {
                let mut inner = self.inner.lock().unwrap();
                inner.tasks.retain(|t| !t.cancelled.load(Ordering::SeqCst));
                let earliest = inner
                    .tasks
                    .iter()
                    .enumerate()
                    .filter(|(_, t)| t.due <= target)
                    .min_by_key(|(_, t)| t.due)
                    .map(|(i, _)| i);
                match earliest {
                    Some(index) => {
                        let task = inner.tasks.swap_remove(index);
                        inner.now = task.due;
                        task
                    }
                    None => {
                        inner.now = target;
                        return;
                    }
                }
            };

            // Run outside the lock so the task can read the clock.
            let flow = (next.task)();
            if flow.is_continue() && !next.cancelled.load(Ordering::SeqCst) {
                next.due += next.interval;
                self.inner.lock().unwrap().tasks.push(next);
            }
        }
    }
}

impl Scheduler for ManualScheduler {
    fn now(&self) -> Duration {
        self.inner.lock().unwrap().now
    }

    fn schedule(&self, interval: Duration, task: TickTask) -> TickHandle {
        let interval = interval.max(Duration::from_millis(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut inner = self.inner.lock().unwrap();
        let due = inner.now + interval;
        inner.tasks.push(ManualTask {
            interval,
            due,
            cancelled: cancelled.clone(),
            task,
        });
        TickHandle::detached(cancelled)
    }
}
