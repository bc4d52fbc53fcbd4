//! Lock abstraction for object-level access discipline
//!
//! [`Lockable`] exposes exclusive and shared locking through RAII guards;
//! dropping the guard unlocks. [`ObjectLock`] is a shared/exclusive lock and
//! [`RecursiveLock`] a re-entrant variant for call graphs that re-enter the
//! same object on one thread (a bind resolving through nested properties).

use parking_lot::{ReentrantMutex, ReentrantMutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;

// Guards are only held for their drop
#[allow(dead_code)]
enum GuardInner<'a> {
    Shared(RwLockReadGuard<'a, ()>),
    Exclusive(RwLockWriteGuard<'a, ()>),
    Recursive(ReentrantMutexGuard<'a, ()>),
}

/// Held lock; unlocks on drop
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard<'a> {
    inner: GuardInner<'a>,
}

impl LockGuard<'_> {
    /// Whether other holders are excluded while this guard lives
    pub fn is_exclusive(&self) -> bool {
        !matches!(self.inner, GuardInner::Shared(_))
    }
}

impl fmt::Debug for LockGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.inner {
            GuardInner::Shared(_) => "shared",
            GuardInner::Exclusive(_) => "exclusive",
            GuardInner::Recursive(_) => "recursive",
        };
        f.debug_struct("LockGuard").field("kind", &kind).finish()
    }
}

pub trait Lockable: Send + Sync {
    /// Acquire exclusive access
    fn lock(&self) -> LockGuard<'_>;

    /// Acquire shared access
    fn lock_shared(&self) -> LockGuard<'_>;

    /// Try to acquire exclusive access without blocking
    fn try_lock(&self) -> Option<LockGuard<'_>>;
}

/// Run `f` while holding exclusive access
pub fn with_lock<L: Lockable + ?Sized, R>(lockable: &L, f: impl FnOnce() -> R) -> R {
    let _guard = lockable.lock();
    f()
}

/// Run `f` while holding shared access
pub fn with_lock_shared<L: Lockable + ?Sized, R>(lockable: &L, f: impl FnOnce() -> R) -> R {
    let _guard = lockable.lock_shared();
    f()
}

/// Shared/exclusive lock; not re-entrant
#[derive(Default)]
pub struct ObjectLock {
    raw: RwLock<()>,
}

impl ObjectLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lockable for ObjectLock {
    fn lock(&self) -> LockGuard<'_> {
        LockGuard {
            inner: GuardInner::Exclusive(self.raw.write()),
        }
    }

    fn lock_shared(&self) -> LockGuard<'_> {
        LockGuard {
            inner: GuardInner::Shared(self.raw.read()),
        }
    }

    fn try_lock(&self) -> Option<LockGuard<'_>> {
        self.raw.try_write().map(|guard| LockGuard {
            inner: GuardInner::Exclusive(guard),
        })
    }
}

/// Re-entrant lock
///
/// The owning thread may lock again without deadlocking. Shared locking is
/// exclusive across threads.
#[derive(Default)]
pub struct RecursiveLock {
    raw: ReentrantMutex<()>,
}

impl RecursiveLock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Lockable for RecursiveLock {
    fn lock(&self) -> LockGuard<'_> {
        LockGuard {
            inner: GuardInner::Recursive(self.raw.lock()),
        }
    }

    fn lock_shared(&self) -> LockGuard<'_> {
        self.lock()
    }

    fn try_lock(&self) -> Option<LockGuard<'_>> {
        self.raw.try_lock().map(|guard| LockGuard {
            inner: GuardInner::Recursive(guard),
        })
    }
}

impl fmt::Debug for ObjectLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectLock").finish_non_exhaustive()
    }
}

impl fmt::Debug for RecursiveLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecursiveLock").finish_non_exhaustive()
    }
}
