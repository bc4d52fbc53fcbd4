//! One-shot result handoff
//!
//! [`channel`] creates a [`Promise`]/[`Future`] pair. The promise is
//! fulfilled exactly once, with a value or by abandonment; the first
//! fulfillment wins and later attempts return false. Dropping an unfulfilled
//! promise abandons it, so waiters never block forever on a lost producer.
//!
//! ```
//! use prism_meta::future::channel;
//! use std::thread;
//!
//! let (promise, future) = channel::<u32>();
//! thread::spawn(move || {
//!     promise.set(42);
//! });
//! assert_eq!(future.get(), Ok(42));
//! ```

use crate::error::{MetaError, Result};
use crate::task_queue::{TaskQueue, TaskQueueExt};
use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

enum Slot<T> {
    Pending,
    Ready(T),
    Abandoned,
}

type Continuation = Box<dyn FnOnce() + Send>;

struct SharedState<T> {
    slot: Slot<T>,
    continuations: Vec<Continuation>,
}

struct Shared<T> {
    state: Mutex<SharedState<T>>,
    ready: Condvar,
}

impl<T> Shared<T> {
    fn fulfill(&self, slot: Slot<T>) -> bool {
        let continuations = {
            let mut state = self.state.lock();
            if !matches!(state.slot, Slot::Pending) {
                return false;
            }
            state.slot = slot;
            std::mem::take(&mut state.continuations)
        };
        self.ready.notify_all();

        for continuation in continuations {
            continuation();
        }
        true
    }
}

/// Create a connected promise and future
pub fn channel<T: Send + 'static>() -> (Promise<T>, Future<T>) {
    let shared = Arc::new(Shared {
        state: Mutex::new(SharedState {
            slot: Slot::Pending,
            continuations: Vec::new(),
        }),
        ready: Condvar::new(),
    });
    (
        Promise {
            shared: shared.clone(),
        },
        Future { shared },
    )
}

/// Producer side of a one-shot result
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Promise<T> {
    /// Fulfill with a value; returns false if already fulfilled
    pub fn set(&self, value: T) -> bool {
        self.shared.fulfill(Slot::Ready(value))
    }

    /// Fulfill without a value; returns false if already fulfilled
    pub fn set_abandoned(&self) -> bool {
        self.shared.fulfill(Slot::Abandoned)
    }

    pub fn is_fulfilled(&self) -> bool {
        !matches!(self.shared.state.lock().slot, Slot::Pending)
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        if self.shared.fulfill(Slot::Abandoned) {
            tracing::debug!("promise dropped unfulfilled, abandoned");
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("fulfilled", &self.is_fulfilled())
            .finish()
    }
}

/// Consumer side of a one-shot result
pub struct Future<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<T: Send + 'static> Future<T> {
    /// A future that is already fulfilled with `value`
    pub fn ready(value: T) -> Self {
        let (promise, future) = channel();
        promise.set(value);
        future
    }

    /// A future that is already abandoned
    pub fn abandoned() -> Self {
        let (promise, future) = channel();
        promise.set_abandoned();
        future
    }

    /// Whether the promise was fulfilled, with a value or abandoned
    pub fn is_ready(&self) -> bool {
        !matches!(self.shared.state.lock().slot, Slot::Pending)
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self.shared.state.lock().slot, Slot::Abandoned)
    }

    /// Block until the promise is fulfilled
    pub fn wait(&self) {
        let mut state = self.shared.state.lock();
        while matches!(state.slot, Slot::Pending) {
            self.shared.ready.wait(&mut state);
        }
    }

    /// Block for at most `timeout`; returns true if fulfilled
    pub fn wait_for(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while matches!(state.slot, Slot::Pending) {
            if self
                .shared
                .ready
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                return !matches!(state.slot, Slot::Pending);
            }
        }
        true
    }

    /// Run `f` with the result once fulfilled
    ///
    /// `f` receives `None` when the promise was abandoned. When `queue` is
    /// given the continuation is posted there, otherwise it runs on the
    /// fulfilling thread (or immediately if already fulfilled).
    pub fn then<U, F>(&self, queue: Option<Arc<dyn TaskQueue>>, f: F) -> Future<U>
    where
        T: Clone,
        U: Send + 'static,
        F: FnOnce(Option<T>) -> U + Send + 'static,
    {
        let (promise, future) = channel::<U>();
        let run = move |value: Option<T>| match queue {
            Some(queue) => {
                let posted = queue.add_task(move || {
                    promise.set(f(value));
                });
                if let Err(err) = posted {
                    tracing::warn!("continuation dropped: {}", err);
                }
            }
            None => {
                promise.set(f(value));
            }
        };

        let mut state = self.shared.state.lock();
        if matches!(state.slot, Slot::Pending) {
            let source = self.clone();
            state
                .continuations
                .push(Box::new(move || run(source.value())));
            return future;
        }
        drop(state);
        run(self.value());
        future
    }
}

impl<T: Clone + Send + 'static> Future<T> {
    /// Wait for and return the value, or [`MetaError::Abandoned`]
    pub fn get(&self) -> Result<T> {
        self.wait();
        self.try_get().unwrap_or(Err(MetaError::Abandoned))
    }

    fn value(&self) -> Option<T> {
        match &self.shared.state.lock().slot {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Return the result without blocking; `None` while pending
    pub fn try_get(&self) -> Option<Result<T>> {
        match &self.shared.state.lock().slot {
            Slot::Pending => None,
            Slot::Ready(value) => Some(Ok(value.clone())),
            Slot::Abandoned => Some(Err(MetaError::Abandoned)),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.shared.state.lock().slot {
            Slot::Pending => "pending",
            Slot::Ready(_) => "ready",
            Slot::Abandoned => "abandoned",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_set_once() {
        let (promise, future) = channel::<i32>();
        assert!(!future.is_ready());
        assert_eq!(future.try_get(), None);

        assert!(promise.set(1));
        assert!(!promise.set(2));
        assert!(!promise.set_abandoned());
        assert!(future.is_ready());
        assert_eq!(future.get(), Ok(1));
    }

    #[test]
    fn test_abandoned_first_wins() {
        let (promise, future) = channel::<i32>();
        assert!(promise.set_abandoned());
        assert!(!promise.set(5));
        assert!(future.is_abandoned());
        assert_eq!(future.get(), Err(MetaError::Abandoned));
    }

    #[test]
    fn test_drop_abandons() {
        let (promise, future) = channel::<String>();
        drop(promise);
        assert_eq!(future.get(), Err(MetaError::Abandoned));
    }

    #[test]
    fn test_wait_blocks_until_set_from_other_thread() {
        let (promise, future) = channel::<u64>();
        let started = Arc::new(AtomicBool::new(false));
        let flag = started.clone();

        let producer = thread::spawn(move || {
            flag.store(true, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(20));
            promise.set(99);
        });

        future.wait();
        assert!(started.load(Ordering::SeqCst));
        assert_eq!(future.get(), Ok(99));
        producer.join().unwrap();
    }

    #[test]
    fn test_wait_for_times_out() {
        let (promise, future) = channel::<u8>();
        assert!(!future.wait_for(Duration::from_millis(10)));
        promise.set(1);
        assert!(future.wait_for(Duration::from_millis(10)));
    }

    #[test]
    fn test_then_without_queue() {
        let (promise, future) = channel::<i32>();
        let chained = future.then(None, |value| value.map(|v| v * 10));
        assert!(!chained.is_ready());
        promise.set(4);
        assert_eq!(chained.get(), Ok(Some(40)));

        let after = future.then(None, |value| value.unwrap_or(0) + 1);
        assert_eq!(after.get(), Ok(5));

        let abandoned = Future::<i32>::abandoned().then(None, |value| value.is_none());
        assert_eq!(abandoned.get(), Ok(true));
    }

    #[test]
    fn test_ready_future() {
        let future = Future::ready("done".to_string());
        assert!(future.is_ready());
        assert_eq!(future.clone().get().as_deref(), Ok("done"));
    }
}
