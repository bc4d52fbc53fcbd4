//! Observer lists
//!
//! An [`Event`] holds callables registered with [`Event::subscribe`]. Invoking
//! the event walks a snapshot of the registrations taken when the invocation
//! starts:
//! - subscribers added while firing are only called by the next invocation
//! - subscribers removed while firing are skipped if not yet visited
//! - order within one event is registration order

use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Handle to a single subscription
///
/// Tokens are unique across all events in the process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventToken(u64);

impl EventToken {
    fn next() -> Self {
        EventToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }

    pub fn to_raw(self) -> u64 {
        self.0
    }
}

type Handler<A> = Arc<dyn Fn(&A) + Send + Sync>;

/// A list of callables invoked with `&A`
pub struct Event<A: ?Sized + 'static = ()> {
    handlers: Mutex<SmallVec<[(EventToken, Handler<A>); 4]>>,
}

/// Change notification event shared by properties, binds and resources
pub type OnChanged = Event<()>;

/// Anything that broadcasts change notifications
pub trait Notifier: Send + Sync {
    fn on_changed(&self) -> &OnChanged;
}

impl<A: ?Sized + 'static> Event<A> {
    pub fn new() -> Self {
        Self {
            handlers: Mutex::new(SmallVec::new()),
        }
    }

    /// Register a callable, returning its token
    pub fn subscribe<F>(&self, handler: F) -> EventToken
    where
        F: Fn(&A) + Send + Sync + 'static,
    {
        let token = EventToken::next();
        self.handlers.lock().push((token, Arc::new(handler)));
        token
    }

    /// Remove exactly the registration behind `token`
    ///
    /// Returns false if the token is unknown or was already removed.
    pub fn unsubscribe(&self, token: EventToken) -> bool {
        let mut handlers = self.handlers.lock();
        match handlers.iter().position(|(t, _)| *t == token) {
            Some(index) => {
                handlers.remove(index);
                true
            }
            None => false,
        }
    }

    pub fn is_subscribed(&self, token: EventToken) -> bool {
        self.handlers.lock().iter().any(|(t, _)| *t == token)
    }

    /// Call every subscriber registered when the invocation starts
    pub fn invoke(&self, args: &A) {
        let snapshot: SmallVec<[(EventToken, Handler<A>); 4]> = self.handlers.lock().clone();
        for (token, handler) in snapshot {
            // Removed by an earlier handler in this invocation
            if !self.is_subscribed(token) {
                continue;
            }
            handler(args);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.lock().len()
    }

    pub fn clear(&self) {
        self.handlers.lock().clear();
    }
}

impl<A: ?Sized + 'static> Default for Event<A> {
    fn default() -> Self {
        Self::new()
    }
}

impl<A: ?Sized + 'static> fmt::Debug for Event<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[test]
    fn test_invoke_in_registration_order() {
        let event: Event<i32> = Event::new();
        let calls = Arc::new(StdMutex::new(Vec::new()));

        for name in ["c1", "c2", "c3"] {
            let calls = calls.clone();
            event.subscribe(move |value| calls.lock().unwrap().push((name, *value)));
        }

        event.invoke(&7);
        assert_eq!(
            *calls.lock().unwrap(),
            vec![("c1", 7), ("c2", 7), ("c3", 7)]
        );
    }

    #[test]
    fn test_unsubscribe_during_invoke_skips_unvisited() {
        let event = Arc::new(OnChanged::new());
        let calls = Arc::new(StdMutex::new(Vec::new()));
        let c2_token = Arc::new(StdMutex::new(None::<EventToken>));

        let c1 = {
            let event = event.clone();
            let calls = calls.clone();
            let c2_token = c2_token.clone();
            move |_: &()| {
                calls.lock().unwrap().push("c1");
                if let Some(token) = *c2_token.lock().unwrap() {
                    event.unsubscribe(token);
                }
            }
        };
        event.subscribe(c1);
        let calls2 = calls.clone();
        let token = event.subscribe(move |_| calls2.lock().unwrap().push("c2"));
        *c2_token.lock().unwrap() = Some(token);
        let calls3 = calls.clone();
        event.subscribe(move |_| calls3.lock().unwrap().push("c3"));

        event.invoke(&());
        assert_eq!(*calls.lock().unwrap(), vec!["c1", "c3"]);
        assert_eq!(event.subscriber_count(), 2);
    }

    #[test]
    fn test_self_unsubscribe_and_deferred_add() {
        let event = Arc::new(OnChanged::new());
        let calls = Arc::new(StdMutex::new(0));
        let own_token = Arc::new(StdMutex::new(None::<EventToken>));

        let handler = {
            let event_ref = event.clone();
            let calls = calls.clone();
            let own_token = own_token.clone();
            move |_: &()| {
                *calls.lock().unwrap() += 1;
                if let Some(token) = own_token.lock().unwrap().take() {
                    event_ref.unsubscribe(token);
                }
                // Added during invocation: only runs next time
                let calls = calls.clone();
                event_ref.subscribe(move |_| *calls.lock().unwrap() += 100);
            }
        };
        let token = event.subscribe(handler);
        *own_token.lock().unwrap() = Some(token);

        event.invoke(&());
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(!event.is_subscribed(token));

        event.invoke(&());
        assert_eq!(*calls.lock().unwrap(), 101);
    }

    #[test]
    fn test_unsubscribe_unknown_token() {
        let event: Event<()> = Event::new();
        let token = event.subscribe(|_| {});
        assert!(event.unsubscribe(token));
        assert!(!event.unsubscribe(token));

        let other: Event<()> = Event::new();
        let foreign = other.subscribe(|_| {});
        assert!(!event.unsubscribe(foreign));
        assert!(other.is_subscribed(foreign));
    }
}
