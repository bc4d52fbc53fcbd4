//! Single-threaded task queues
//!
//! A task queue is an execution context running one task at a time in
//! submission order. [`ThreadedTaskQueue`] owns a worker thread;
//! [`PollingTaskQueue`] is drained by its owner calling
//! [`PollingTaskQueue::process_tasks`], typically once per frame.
//!
//! While a queue runs a task, a thread-local marker names it as the current
//! queue. [`TaskQueueExt::add_future_task_or_run_directly`] checks the
//! marker and runs inline instead of enqueueing, so a queue waiting on work
//! it scheduled on itself cannot deadlock.
//!
//! ```
//! use prism_meta::task_queue::{TaskQueueExt, ThreadedTaskQueue};
//!
//! let queue = ThreadedTaskQueue::with_name("docs").unwrap();
//! let future = queue.add_waitable_task(|| 6 * 7).unwrap();
//! assert_eq!(future.get(), Ok(42));
//! ```

use crate::config::TaskQueueConfig;
use crate::error::{MetaError, Result};
use crate::future::{channel, Future};
use crate::uid::InstanceId;
use parking_lot::{Condvar, Mutex};
use std::cell::Cell;
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// A unit of work
pub type Task = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
    static CURRENT_QUEUE: Cell<Option<InstanceId>> = const { Cell::new(None) };
}

/// Id of the queue running on this thread, if any
pub fn current_queue() -> Option<InstanceId> {
    CURRENT_QUEUE.with(Cell::get)
}

struct CurrentQueueGuard {
    previous: Option<InstanceId>,
}

impl CurrentQueueGuard {
    fn enter(id: InstanceId) -> Self {
        let previous = CURRENT_QUEUE.with(|current| current.replace(Some(id)));
        Self { previous }
    }
}

impl Drop for CurrentQueueGuard {
    fn drop(&mut self) {
        CURRENT_QUEUE.with(|current| current.set(self.previous));
    }
}

/// Execution context accepting tasks
pub trait TaskQueue: Send + Sync {
    fn id(&self) -> InstanceId;

    /// Enqueue `task` to run after `delay`
    ///
    /// Fails with [`MetaError::QueueShutdown`] once the queue is shut down;
    /// the task is dropped.
    fn post(&self, task: Task, delay: Option<Duration>) -> Result<()>;

    /// Stop accepting tasks and discard those still pending
    fn shutdown(&self);

    fn is_shutdown(&self) -> bool;

    /// Number of tasks waiting to run
    fn pending_count(&self) -> usize;

    /// Whether the calling thread is currently running this queue
    fn is_current(&self) -> bool {
        current_queue() == Some(self.id())
    }
}

/// Convenience submission helpers for every [`TaskQueue`]
pub trait TaskQueueExt: TaskQueue {
    fn add_task<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(f), None)
    }

    fn add_delayed_task<F>(&self, delay: Duration, f: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        self.post(Box::new(f), Some(delay))
    }

    /// Enqueue `f`, returning a future for its result
    fn add_waitable_task<T, F>(&self, f: F) -> Result<Future<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (promise, future) = channel();
        self.post(
            Box::new(move || {
                promise.set(f());
            }),
            None,
        )?;
        Ok(future)
    }

    /// Run `f` inline when called from this queue, otherwise enqueue it
    fn add_future_task_or_run_directly<T, F>(&self, f: F) -> Result<Future<T>>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        if self.is_shutdown() {
            return Err(MetaError::QueueShutdown);
        }
        if self.is_current() {
            return Ok(Future::ready(f()));
        }
        self.add_waitable_task(f)
    }
}

impl<Q: TaskQueue + ?Sized> TaskQueueExt for Q {}

// ============================================================================
// Shared queue storage
// ============================================================================

struct Entry {
    due: Instant,
    seq: u64,
    task: Task,
}

#[derive(Default)]
struct QueueState {
    entries: VecDeque<Entry>,
    next_seq: u64,
    shutdown: bool,
}

#[derive(Default)]
struct QueueCore {
    state: Mutex<QueueState>,
    available: Condvar,
}

impl QueueCore {
    fn push(&self, id: InstanceId, task: Task, delay: Option<Duration>) -> Result<()> {
        let mut state = self.state.lock();
        if state.shutdown {
            drop(state);
            tracing::warn!("task posted to queue {} after shutdown", id);
            return Err(MetaError::QueueShutdown);
        }

        let due = Instant::now() + delay.unwrap_or_default();
        let seq = state.next_seq;
        state.next_seq += 1;
        // Ordered by due time, then submission
        let index = state
            .entries
            .iter()
            .position(|entry| entry.due > due)
            .unwrap_or(state.entries.len());
        state.entries.insert(index, Entry { due, seq, task });
        drop(state);

        self.available.notify_one();
        Ok(())
    }

    fn shutdown(&self) -> bool {
        let discarded: Vec<Entry> = {
            let mut state = self.state.lock();
            if state.shutdown {
                return false;
            }
            state.shutdown = true;
            state.entries.drain(..).collect()
        };
        self.available.notify_all();

        if !discarded.is_empty() {
            tracing::debug!("discarding {} pending tasks", discarded.len());
        }
        // Dropped unlocked: abandoned promises wake waiters that may post again
        drop(discarded);
        true
    }

    fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    fn len(&self) -> usize {
        self.state.lock().entries.len()
    }
}

fn run_task(id: InstanceId, task: Task) {
    if panic::catch_unwind(AssertUnwindSafe(task)).is_err() {
        tracing::error!("task panicked on queue {}", id);
    }
}

// ============================================================================
// Threaded queue
// ============================================================================

/// Queue with its own worker thread
pub struct ThreadedTaskQueue {
    id: InstanceId,
    name: String,
    core: Arc<QueueCore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadedTaskQueue {
    pub fn new() -> io::Result<Self> {
        Self::from_config(&TaskQueueConfig::default())
    }

    pub fn from_config(config: &TaskQueueConfig) -> io::Result<Self> {
        Self::with_name(&config.thread_name)
    }

    /// Start a queue whose worker thread is called `name`
    pub fn with_name(name: impl Into<String>) -> io::Result<Self> {
        let name = name.into();
        let id = InstanceId::generate();
        let core = Arc::new(QueueCore::default());

        let worker_core = Arc::clone(&core);
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn(move || worker_loop(id, &worker_core))?;
        tracing::debug!("task queue {} ({}) started", name, id);

        Ok(Self {
            id,
            name,
            core,
            worker: Mutex::new(Some(handle)),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

fn worker_loop(id: InstanceId, core: &QueueCore) {
    let _current = CurrentQueueGuard::enter(id);
    loop {
        let entry = {
            let mut state = core.state.lock();
            loop {
                if state.shutdown {
                    return;
                }
                match state.entries.front().map(|entry| entry.due) {
                    None => core.available.wait(&mut state),
                    Some(due) if due <= Instant::now() => break state.entries.pop_front(),
                    Some(due) => {
                        core.available.wait_until(&mut state, due);
                    }
                }
            }
        };
        if let Some(entry) = entry {
            run_task(id, entry.task);
        }
    }
}

impl TaskQueue for ThreadedTaskQueue {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn post(&self, task: Task, delay: Option<Duration>) -> Result<()> {
        self.core.push(self.id, task, delay)
    }

    /// Also joins the worker, unless called from a task on this queue
    fn shutdown(&self) {
        if self.core.shutdown() {
            tracing::debug!("task queue {} ({}) shut down", self.name, self.id);
        }

        let Some(handle) = self.worker.lock().take() else {
            return;
        };
        if handle.thread().id() == thread::current().id() {
            return;
        }
        if handle.join().is_err() {
            tracing::error!("worker of task queue {} panicked", self.name);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.core.is_shutdown()
    }

    fn pending_count(&self) -> usize {
        self.core.len()
    }
}

impl Drop for ThreadedTaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for ThreadedTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedTaskQueue")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("pending", &self.pending_count())
            .finish()
    }
}

// ============================================================================
// Polling queue
// ============================================================================

/// Queue drained explicitly by its owner
pub struct PollingTaskQueue {
    id: InstanceId,
    core: QueueCore,
}

impl PollingTaskQueue {
    pub fn new() -> Self {
        Self {
            id: InstanceId::generate(),
            core: QueueCore::default(),
        }
    }

    /// Run every task that was due when the call started
    ///
    /// Tasks posted while processing run on the next call. Returns the
    /// number of tasks run.
    pub fn process_tasks(&self) -> usize {
        let _current = CurrentQueueGuard::enter(self.id);
        let now = Instant::now();
        let seq_limit = self.core.state.lock().next_seq;

        let mut ran = 0;
        loop {
            let entry = {
                let mut state = self.core.state.lock();
                if state.shutdown {
                    break;
                }
                match state.entries.front() {
                    Some(entry) if entry.due <= now && entry.seq < seq_limit => {
                        state.entries.pop_front()
                    }
                    _ => None,
                }
            };
            let Some(entry) = entry else {
                break;
            };
            run_task(self.id, entry.task);
            ran += 1;
        }
        ran
    }
}

impl Default for PollingTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue for PollingTaskQueue {
    fn id(&self) -> InstanceId {
        self.id
    }

    fn post(&self, task: Task, delay: Option<Duration>) -> Result<()> {
        self.core.push(self.id, task, delay)
    }

    fn shutdown(&self) {
        if self.core.shutdown() {
            tracing::debug!("polling task queue {} shut down", self.id);
        }
    }

    fn is_shutdown(&self) -> bool {
        self.core.is_shutdown()
    }

    fn pending_count(&self) -> usize {
        self.core.len()
    }
}

impl fmt::Debug for PollingTaskQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingTaskQueue")
            .field("id", &self.id)
            .field("pending", &self.pending_count())
            .finish()
    }
}
