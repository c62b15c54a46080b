//! Single-thread task scheduler
//!
//! Decouples task submission from execution: any thread may submit a one-shot
//! task, a dedicated OS thread runs them one at a time in submission order.
//! A task that fails or panics is logged with its sequential id and does not
//! affect the tasks queued behind it.

use crate::{Error, Result};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, trace, warn};

/// One-shot unit of deferred work
pub type Task = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

enum Message {
    Run(Task),
    Stop,
}

/// Runs tasks with per-task failure isolation and sequential ids
struct Executor {
    name: String,
    next_task_id: AtomicU64,
    executed: Arc<AtomicU64>,
}

impl Executor {
    fn run(&self, task: Task) {
        let task_id = self.next_task_id.fetch_add(1, Ordering::Relaxed);

        match panic::catch_unwind(AssertUnwindSafe(task)) {
            Ok(Ok(())) => trace!(scheduler = %self.name, task_id, "Task completed"),
            Ok(Err(e)) => warn!(
                scheduler = %self.name,
                task_id,
                category = e.category(),
                "Unexpected error occurred while executing task: {}",
                e
            ),
            Err(payload) => {
                let err = Error::TaskPanicked {
                    task_id,
                    message: panic_message(payload.as_ref()),
                };
                warn!(scheduler = %self.name, task_id, "{}", err);
            }
        }

        self.executed.fetch_add(1, Ordering::Relaxed);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Handle given to the loop running on the scheduler thread.
///
/// The default queue loop is [`StopSignal::run_until_stopped`]; custom drivers
/// passed to [`TaskScheduler::spawn_with`] poll it to learn when to exit and
/// may use [`StopSignal::wait`] to keep queued tasks flowing while they idle.
pub struct StopSignal {
    running: Arc<AtomicBool>,
    receiver: Receiver<Message>,
    executor: Executor,
}

impl StopSignal {
    /// Whether `stop()` has been requested
    pub fn is_stopped(&self) -> bool {
        !self.running.load(Ordering::Acquire)
    }

    /// Block until a stop request arrives, running queued tasks in FIFO order
    pub fn run_until_stopped(&self) {
        loop {
            match self.receiver.recv() {
                Ok(Message::Run(task)) => self.executor.run(task),
                Ok(Message::Stop) | Err(_) => break,
            }
        }
    }

    /// Wait up to `timeout`, running tasks that arrive meanwhile.
    ///
    /// Returns `true` once a stop has been requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            match self.receiver.recv_deadline(deadline) {
                Ok(Message::Run(task)) => self.executor.run(task),
                Ok(Message::Stop) | Err(RecvTimeoutError::Disconnected) => return true,
                Err(RecvTimeoutError::Timeout) if self.is_stopped() => {
                    self.drain();
                    return true;
                }
                Err(RecvTimeoutError::Timeout) => return false,
            }
        }
    }

    /// Run whatever was queued ahead of the stop marker
    fn drain(&self) {
        while let Ok(Message::Run(task)) = self.receiver.try_recv() {
            self.executor.run(task);
        }
    }
}

/// Minimal FIFO executor backed by one dedicated thread
pub struct TaskScheduler {
    name: String,
    sender: Sender<Message>,
    running: Arc<AtomicBool>,
    /// Held across the running check and the enqueue, and by `stop()`
    /// around the flag flip, so no task lands behind the stop marker
    submit_lock: Mutex<()>,
    executed: Arc<AtomicU64>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TaskScheduler {
    /// Start a scheduler whose thread drains the task queue
    pub fn spawn(name: impl Into<String>) -> Result<Self> {
        Self::spawn_with(name, |signal| signal.run_until_stopped())
    }

    /// Start a scheduler whose thread runs `driver` instead of the plain
    /// queue loop. The driver must return once the signal reports a stop.
    pub fn spawn_with<F>(name: impl Into<String>, driver: F) -> Result<Self>
    where
        F: FnOnce(&StopSignal) + Send + 'static,
    {
        let name = name.into();
        let (sender, receiver) = unbounded();
        let running = Arc::new(AtomicBool::new(true));
        let executed = Arc::new(AtomicU64::new(0));

        let signal = StopSignal {
            running: Arc::clone(&running),
            receiver,
            executor: Executor {
                name: name.clone(),
                next_task_id: AtomicU64::new(0),
                executed: Arc::clone(&executed),
            },
        };

        let handle = thread::Builder::new()
            .name(format!("{} Thread", name))
            .spawn(move || {
                debug!(scheduler = %signal.executor.name, "Scheduler thread started");
                driver(&signal);
                debug!(scheduler = %signal.executor.name, "Scheduler thread exiting");
            })?;

        Ok(Self {
            name,
            sender,
            running,
            submit_lock: Mutex::new(()),
            executed,
            handle: Mutex::new(Some(handle)),
        })
    }

    /// Scheduler name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Queue a task; never blocks the caller
    pub fn submit(&self, task: Task) -> Result<()> {
        let _guard = self.submit_lock.lock();
        if !self.is_running() {
            return Err(Error::scheduler_stopped(&self.name));
        }
        self.sender
            .send(Message::Run(task))
            .map_err(|_| Error::scheduler_stopped(&self.name))
    }

    /// Queue an infallible closure
    pub fn submit_fn<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.submit(Box::new(move || {
            f();
            Ok(())
        }))
    }

    /// Whether the scheduler still accepts tasks
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Number of tasks waiting to run
    pub fn pending(&self) -> usize {
        self.sender.len()
    }

    /// Number of tasks run so far, failed ones included
    pub fn executed(&self) -> u64 {
        self.executed.load(Ordering::Relaxed)
    }

    /// Stop the scheduler thread.
    ///
    /// Tasks queued before the call still run; later submissions are
    /// rejected. Idempotent. When called from a task on the scheduler thread
    /// itself the join is skipped.
    pub fn stop(&self) {
        {
            let _guard = self.submit_lock.lock();
            if self.running.swap(false, Ordering::AcqRel) {
                let _ = self.sender.send(Message::Stop);
            }
        }

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                warn!(scheduler = %self.name, "Scheduler thread terminated abnormally");
            }
        }
    }
}

impl Drop for TaskScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TaskScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskScheduler")
            .field("name", &self.name)
            .field("running", &self.is_running())
            .field("executed", &self.executed())
            .finish()
    }
}
