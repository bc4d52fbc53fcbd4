//! Thread-local dependency tracking
//!
//! While a bind discovers the dependencies of a function target, every
//! property read on the thread is recorded. Nested evaluations run untracked
//! so only direct reads of the function are attributed to it.

use crate::property::{Property, WeakProperty};
use std::cell::RefCell;

thread_local! {
    static FRAMES: RefCell<Vec<Option<Vec<WeakProperty>>>> = const { RefCell::new(Vec::new()) };
    static EVALUATING: RefCell<Vec<usize>> = const { RefCell::new(Vec::new()) };
}

struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        FRAMES.with(|frames| {
            frames.borrow_mut().pop();
        });
    }
}

/// Record a read of `property` in the innermost tracking frame
pub(crate) fn record(property: &Property) {
    FRAMES.with(|frames| {
        if let Some(Some(deps)) = frames.borrow_mut().last_mut() {
            if !deps.iter().any(|dep| dep.is(property)) {
                deps.push(property.downgrade());
            }
        }
    });
}

/// Run `f`, collecting the properties it reads
pub(crate) fn track<R>(f: impl FnOnce() -> R) -> (R, Vec<Property>) {
    FRAMES.with(|frames| frames.borrow_mut().push(Some(Vec::new())));
    let guard = FrameGuard;
    let result = f();
    let deps = FRAMES.with(|frames| {
        frames
            .borrow_mut()
            .last_mut()
            .and_then(Option::take)
            .unwrap_or_default()
    });
    drop(guard);
    (result, deps.iter().filter_map(WeakProperty::upgrade).collect())
}

/// Run `f` without recording reads into an enclosing frame
pub(crate) fn untracked<R>(f: impl FnOnce() -> R) -> R {
    FRAMES.with(|frames| frames.borrow_mut().push(None));
    let _guard = FrameGuard;
    f()
}

/// Marks a bind as evaluating on this thread for as long as it lives
pub(crate) struct EvaluationGuard {
    key: usize,
}

impl EvaluationGuard {
    /// Returns `None` if `key` is already evaluating on this thread
    pub(crate) fn enter(key: usize) -> Option<Self> {
        EVALUATING.with(|evaluating| {
            let mut evaluating = evaluating.borrow_mut();
            if evaluating.contains(&key) {
                None
            } else {
                evaluating.push(key);
                Some(EvaluationGuard { key })
            }
        })
    }
}

impl Drop for EvaluationGuard {
    fn drop(&mut self) {
        EVALUATING.with(|evaluating| {
            let mut evaluating = evaluating.borrow_mut();
            if let Some(index) = evaluating.iter().rposition(|k| *k == self.key) {
                evaluating.remove(index);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::any::TypedValue;

    #[test]
    fn test_track_records_direct_reads_once() {
        let a = Property::new("a", TypedValue::new(1i32));
        let b = Property::new("b", TypedValue::new(2i32));

        let (sum, deps) = track(|| {
            a.get::<i32>().unwrap_or(0) + b.get::<i32>().unwrap_or(0) + a.get::<i32>().unwrap_or(0)
        });
        assert_eq!(sum, 4);
        assert_eq!(deps.len(), 2);
        assert!(deps[0].ptr_eq(&a));
        assert!(deps[1].ptr_eq(&b));
    }

    #[test]
    fn test_untracked_reads_are_hidden() {
        let a = Property::new("a", TypedValue::new(1i32));
        let b = Property::new("b", TypedValue::new(2i32));

        let (_, deps) = track(|| {
            let _ = a.get_value();
            untracked(|| b.get_value())
        });
        assert_eq!(deps.len(), 1);
        assert!(deps[0].ptr_eq(&a));
    }

    #[test]
    fn test_evaluation_guard_detects_reentry() {
        let first = EvaluationGuard::enter(42);
        assert!(first.is_some());
        assert!(EvaluationGuard::enter(42).is_none());
        drop(first);
        assert!(EvaluationGuard::enter(42).is_some());
    }
}
