//! Property binding
//!
//! A [`Bind`] is a modifier that supplies its property's value from a target
//! property or function. Dependencies are held weakly; a change on any of
//! them marks the bind dirty and fires the owning property's `on_changed`.
//! The target is re-evaluated lazily on the next read, so several changes in
//! one update cost a single evaluation.
//!
//! Adding a dependency is rejected when the dependency graph would lead back
//! to the owning property, across any number of intermediate binds.

use crate::any::{types_compatible, TypedValue};
use crate::event::{EventToken, Notifier};
use crate::modifier::{EvalResult, Modifier, ResetResult, StackResetable};
use crate::property::{Property, WeakProperty};
use crate::tracking::{self, EvaluationGuard};
use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

type TargetFn = Arc<dyn Fn() -> TypedValue + Send + Sync>;

/// What a bind resolves its value from
#[derive(Clone)]
pub enum BindTarget {
    Property(WeakProperty),
    Function(TargetFn),
}

impl BindTarget {
    pub fn property(property: &Property) -> Self {
        BindTarget::Property(property.downgrade())
    }

    pub fn function<F>(f: F) -> Self
    where
        F: Fn() -> TypedValue + Send + Sync + 'static,
    {
        BindTarget::Function(Arc::new(f))
    }

    fn evaluate(&self) -> Option<TypedValue> {
        match self {
            BindTarget::Property(weak) => weak.upgrade().map(|p| p.get_value()),
            BindTarget::Function(f) => Some(f()),
        }
    }
}

impl fmt::Debug for BindTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindTarget::Property(weak) => f.debug_tuple("Property").field(weak).finish(),
            BindTarget::Function(_) => f.write_str("Function"),
        }
    }
}

enum DependencySource {
    Property(WeakProperty),
    Notifier(Weak<dyn Notifier>),
}

struct Dependency {
    source: DependencySource,
    token: EventToken,
}

impl Dependency {
    fn is_property(&self, property: &Property) -> bool {
        matches!(&self.source, DependencySource::Property(weak) if weak.is(property))
    }

    fn unsubscribe(&self) {
        match &self.source {
            DependencySource::Property(weak) => {
                if let Some(property) = weak.upgrade() {
                    property.on_changed().unsubscribe(self.token);
                }
            }
            DependencySource::Notifier(weak) => {
                if let Some(notifier) = weak.upgrade() {
                    notifier.on_changed().unsubscribe(self.token);
                }
            }
        }
    }
}

type DependencyList = SmallVec<[Dependency; 2]>;

#[derive(Default)]
struct BindState {
    target: Option<BindTarget>,
    dependencies: DependencyList,
    // Properties the target read when it was set, subscribed or not
    reads: SmallVec<[WeakProperty; 2]>,
    cached: Option<TypedValue>,
    owner: Option<WeakProperty>,
}

/// Modifier resolving a property from a target
pub struct Bind {
    this: Weak<Bind>,
    state: Mutex<BindState>,
    dirty: AtomicBool,
}

impl Bind {
    pub fn new() -> Arc<Bind> {
        Arc::new_cyclic(|this| Bind {
            this: this.clone(),
            state: Mutex::new(BindState::default()),
            dirty: AtomicBool::new(false),
        })
    }

    /// Owning handle to this bind
    pub fn handle(&self) -> Option<Arc<Bind>> {
        self.this.upgrade()
    }

    fn key(&self) -> usize {
        self as *const Bind as usize
    }

    /// Replace the target
    ///
    /// The target is evaluated once to check its type against `owner`, and
    /// every property it reads is checked for a path back to `owner`. With
    /// `get_deps`, a property target becomes the only dependency, and a
    /// function target's dependencies are discovered from the properties it
    /// reads. On failure the previous target and dependencies stay active.
    pub fn set_target(&self, target: BindTarget, get_deps: bool, owner: Option<&Property>) -> bool {
        let owner = owner.cloned().or_else(|| self.owner());

        let (value, reads) = match &target {
            BindTarget::Property(weak) => {
                let Some(source) = weak.upgrade() else {
                    tracing::warn!("bind target property was dropped");
                    return false;
                };
                let value = tracking::untracked(|| source.get_value());
                (value, vec![source])
            }
            BindTarget::Function(f) => tracking::track(|| f()),
        };

        if let Some(owner) = &owner {
            if !types_compatible(value.type_id(), owner.type_id()) {
                tracing::warn!(
                    "bind target of type {} is incompatible with {:?}",
                    value.type_name(),
                    owner.name()
                );
                return false;
            }
        }

        if let Some(read) = reads
            .iter()
            .find(|read| self.would_cycle(read, owner.as_ref()))
        {
            tracing::warn!(
                "rejected bind target: {:?} leads back to the owner",
                read.name()
            );
            return false;
        }

        let replaced = {
            let mut state = self.state.lock();
            let replaced = if get_deps {
                let fresh = reads.iter().map(|dep| self.subscribe(dep)).collect();
                std::mem::replace(&mut state.dependencies, fresh)
            } else {
                DependencyList::new()
            };
            state.reads = reads.iter().map(Property::downgrade).collect();
            state.target = Some(target);
            state.cached = Some(value);
            if state.owner.is_none() {
                state.owner = owner.as_ref().map(Property::downgrade);
            }
            replaced
        };
        self.dirty.store(false, Ordering::Release);

        for dep in &replaced {
            dep.unsubscribe();
        }
        tracing::debug!(
            "bind target set with {} dependencies",
            if get_deps { reads.len() } else { 0 }
        );

        if let Some(owner) = self.attached_owner() {
            owner.notify_changed();
        }
        true
    }

    fn subscribe(&self, property: &Property) -> Dependency {
        let this = self.this.clone();
        let token = property.on_changed().subscribe(move |_| {
            if let Some(bind) = this.upgrade() {
                bind.invalidate();
            }
        });
        Dependency {
            source: DependencySource::Property(property.downgrade()),
            token,
        }
    }

    /// Add a dependency
    ///
    /// Returns false, leaving the dependency list unchanged, if the
    /// dependency would lead back to the owning property.
    pub fn add_dependency(&self, property: &Property) -> bool {
        let owner = self.owner();
        if self.would_cycle(property, owner.as_ref()) {
            tracing::warn!(
                "rejected dependency {:?}: it would create a cycle",
                property.name()
            );
            return false;
        }

        let mut state = self.state.lock();
        if state.dependencies.iter().any(|dep| dep.is_property(property)) {
            return true;
        }
        let dep = self.subscribe(property);
        state.dependencies.push(dep);
        true
    }

    /// Treat `notifier` changes like dependency changes
    pub fn add_notifier(&self, notifier: &Arc<dyn Notifier>) -> bool {
        let weak = Arc::downgrade(notifier);
        let mut state = self.state.lock();
        let known = state.dependencies.iter().any(|dep| match &dep.source {
            DependencySource::Notifier(existing) => Weak::ptr_eq(existing, &weak),
            DependencySource::Property(_) => false,
        });
        if known {
            return false;
        }

        let this = self.this.clone();
        let token = notifier.on_changed().subscribe(move |_| {
            if let Some(bind) = this.upgrade() {
                bind.invalidate();
            }
        });
        state.dependencies.push(Dependency {
            source: DependencySource::Notifier(weak),
            token,
        });
        true
    }

    pub fn remove_dependency(&self, property: &Property) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let index = state
                .dependencies
                .iter()
                .position(|dep| dep.is_property(property));
            index.map(|index| state.dependencies.remove(index))
        };
        match removed {
            Some(dep) => {
                dep.unsubscribe();
                true
            }
            None => false,
        }
    }

    pub fn clear_dependencies(&self) {
        let removed = std::mem::take(&mut self.state.lock().dependencies);
        for dep in &removed {
            dep.unsubscribe();
        }
    }

    /// Live property dependencies
    pub fn dependencies(&self) -> Vec<Property> {
        self.state
            .lock()
            .dependencies
            .iter()
            .filter_map(|dep| match &dep.source {
                DependencySource::Property(weak) => weak.upgrade(),
                DependencySource::Notifier(_) => None,
            })
            .collect()
    }

    /// Dependencies plus every property the target read when it was set
    fn sources(&self) -> Vec<Property> {
        let mut sources = self.dependencies();
        let state = self.state.lock();
        for read in state.reads.iter().filter_map(WeakProperty::upgrade) {
            if !sources.iter().any(|s| s.ptr_eq(&read)) {
                sources.push(read);
            }
        }
        sources
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// The property this bind resolves for
    pub fn owner(&self) -> Option<Property> {
        self.state.lock().owner.as_ref().and_then(WeakProperty::upgrade)
    }

    fn attached_owner(&self) -> Option<Property> {
        let owner = self.owner()?;
        let bind = owner.bind()?;
        std::ptr::eq(Arc::as_ptr(&bind), self).then_some(owner)
    }

    /// Mark dirty and notify the owner
    pub fn invalidate(&self) {
        self.dirty.store(true, Ordering::Release);
        if let Some(owner) = self.attached_owner() {
            owner.notify_changed();
        }
    }

    /// Resolve the bound value, re-evaluating the target if dirty
    ///
    /// Returns `None` if there is no target, the target property was
    /// dropped, or the bind is already evaluating on this thread.
    pub fn evaluate(&self) -> Option<TypedValue> {
        let Some(_guard) = EvaluationGuard::enter(self.key()) else {
            tracing::warn!("bind re-entered while evaluating");
            return None;
        };

        let (target, cached) = {
            let state = self.state.lock();
            (state.target.clone(), state.cached.clone())
        };
        let target = target?;

        let dirty = self.dirty.swap(false, Ordering::AcqRel);
        if let (false, Some(cached)) = (dirty, cached) {
            return Some(cached);
        }

        tracing::debug!("re-evaluating bind target");
        let Some(value) = tracking::untracked(|| target.evaluate()) else {
            self.dirty.store(true, Ordering::Release);
            tracing::warn!("bind target property was dropped");
            return None;
        };
        self.state.lock().cached = Some(value.clone());
        Some(value)
    }

    /// Check whether depending on `candidate` leads back to `owner` or this bind
    fn would_cycle(&self, candidate: &Property, owner: Option<&Property>) -> bool {
        let mut pending = vec![candidate.clone()];
        let mut visited = FxHashSet::default();

        while let Some(property) = pending.pop() {
            if owner.is_some_and(|owner| owner.ptr_eq(&property)) {
                return true;
            }
            if !visited.insert(property.key()) {
                continue;
            }
            if let Some(bind) = property.bind() {
                if std::ptr::eq(Arc::as_ptr(&bind), self) {
                    return true;
                }
                pending.extend(bind.sources());
            }
        }
        false
    }
}

impl Modifier for Bind {
    fn process_on_get(&self, value: &mut TypedValue) -> EvalResult {
        let Some(resolved) = self.evaluate() else {
            return EvalResult::Error;
        };
        match value.set_from(&resolved) {
            Ok(()) => EvalResult::Return,
            Err(err) => {
                tracing::warn!("bound value rejected: {}", err);
                EvalResult::Error
            }
        }
    }

    fn process_on_set(&self, _value: &mut TypedValue, _current: &TypedValue) -> EvalResult {
        tracing::warn!("set on a bound property was vetoed");
        EvalResult::Veto
    }

    fn as_resetable(&self) -> Option<&dyn StackResetable> {
        Some(self)
    }

    fn as_bind(&self) -> Option<&Bind> {
        Some(self)
    }

    fn on_attach(&self, property: &Property) {
        self.state.lock().owner = Some(property.downgrade());
    }

    fn on_detach(&self, property: &Property) {
        let mut state = self.state.lock();
        if state.owner.as_ref().is_some_and(|owner| owner.is(property)) {
            state.owner = None;
        }
    }

    fn name(&self) -> &str {
        "Bind"
    }
}

impl StackResetable for Bind {
    fn process_on_reset(&self, _default: &TypedValue) -> ResetResult {
        ResetResult::REMOVE_ME
    }
}

impl Drop for Bind {
    fn drop(&mut self) {
        for dep in self.state.get_mut().dependencies.drain(..) {
            dep.unsubscribe();
        }
    }
}

impl fmt::Debug for Bind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Bind")
            .field("target", &state.target)
            .field("dependencies", &state.dependencies.len())
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::OnChanged;
    use crate::property::SetOutcome;
    use std::sync::atomic::AtomicUsize;

    fn counter(property: &Property) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        property.on_changed().subscribe(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });
        count
    }

    #[test]
    fn test_property_target_follows_source() {
        let a = Property::with_value("a", 1i32);
        let b = Property::with_value("b", 0i32);
        let bind = b.bind_to(BindTarget::property(&a)).unwrap();
        assert_eq!(b.get::<i32>(), Some(1));
        assert_eq!(bind.dependencies().len(), 1);

        let notified = counter(&b);
        a.set(5i32).unwrap();
        assert!(bind.is_dirty());
        assert_eq!(notified.load(Ordering::SeqCst), 1);
        assert_eq!(b.get::<i32>(), Some(5));
        assert!(!bind.is_dirty());
    }

    #[test]
    fn test_function_target_discovers_dependencies() {
        let a = Property::with_value("a", 2i32);
        let b = Property::with_value("b", 3i32);
        let sum = Property::with_value("sum", 0i32);

        let (ra, rb) = (a.clone(), b.clone());
        let bind = sum
            .bind_to(BindTarget::function(move || {
                TypedValue::new(ra.get::<i32>().unwrap_or(0) + rb.get::<i32>().unwrap_or(0))
            }))
            .unwrap();

        assert_eq!(sum.get::<i32>(), Some(5));
        let deps = bind.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps[0].ptr_eq(&a));
        assert!(deps[1].ptr_eq(&b));

        b.set(10i32).unwrap();
        assert_eq!(sum.get::<i32>(), Some(12));
    }

    #[test]
    fn test_evaluation_is_lazy() {
        let a = Property::with_value("a", 1i32);
        let doubled = Property::with_value("doubled", 0i32);
        let evaluations = Arc::new(AtomicUsize::new(0));

        let (ra, evals) = (a.clone(), evaluations.clone());
        doubled
            .bind_to(BindTarget::function(move || {
                evals.fetch_add(1, Ordering::SeqCst);
                TypedValue::new(ra.get::<i32>().unwrap_or(0) * 2)
            }))
            .unwrap();
        assert_eq!(doubled.get::<i32>(), Some(2));
        let before = evaluations.load(Ordering::SeqCst);

        a.set(2i32).unwrap();
        a.set(3i32).unwrap();
        a.set(4i32).unwrap();
        assert_eq!(evaluations.load(Ordering::SeqCst), before);

        assert_eq!(doubled.get::<i32>(), Some(8));
        assert_eq!(doubled.get::<i32>(), Some(8));
        assert_eq!(evaluations.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn test_cycle_rejected_and_deps_unchanged() {
        let a = Property::with_value("a", 0i32);
        let b = Property::with_value("b", 0i32);
        let x = Property::with_value("x", 0i32);

        b.bind_to(BindTarget::property(&a)).unwrap();
        let bind_a = a.bind_to(BindTarget::property(&x)).unwrap();
        let before: Vec<_> = bind_a.dependencies();

        assert!(!bind_a.add_dependency(&b));
        let after = bind_a.dependencies();
        assert_eq!(before.len(), after.len());
        assert!(after[0].ptr_eq(&x));
    }

    #[test]
    fn test_multi_hop_cycle_rejected() {
        let a = Property::with_value("a", 0i32);
        let b = Property::with_value("b", 0i32);
        let c = Property::with_value("c", 0i32);

        b.bind_to(BindTarget::property(&a)).unwrap();
        c.bind_to(BindTarget::property(&b)).unwrap();

        assert!(a.bind_to(BindTarget::property(&c)).is_none());
        assert!(a.bind().is_none());
    }

    #[test]
    fn test_self_reading_function_rejected() {
        let a = Property::with_value("a", 1i32);
        let ra = a.clone();
        let bound = a.bind_to(BindTarget::function(move || {
            TypedValue::new(ra.get::<i32>().unwrap_or(0) + 1)
        }));
        assert!(bound.is_none());
        assert_eq!(a.get::<i32>(), Some(1));
    }

    #[test]
    fn test_untracked_self_target_rejected() {
        let a = Property::with_value("a", 0i32);
        let bind = Bind::new();
        assert!(!bind.set_target(BindTarget::property(&a), false, Some(&a)));
        assert!(bind.evaluate().is_none());
    }

    #[test]
    fn test_untracked_two_hop_cycle_rejected() {
        let a = Property::with_value("a", 0i32);
        let b = Property::with_value("b", 0i32);

        let bind_b = Bind::new();
        assert!(bind_b.set_target(BindTarget::property(&a), false, Some(&b)));
        assert!(b.set_bind(bind_b.clone()));
        assert!(bind_b.dependencies().is_empty());

        let bind_a = Bind::new();
        assert!(!bind_a.set_target(BindTarget::property(&b), false, Some(&a)));

        // The tracked path sees the untracked edge as well
        assert!(a.bind_to(BindTarget::property(&b)).is_none());
        assert!(a.bind().is_none());
    }

    #[test]
    fn test_untracked_self_reading_function_rejected() {
        let a = Property::with_value("a", 1i32);
        let ra = a.clone();
        let bind = Bind::new();
        let target =
            BindTarget::function(move || TypedValue::new(ra.get::<i32>().unwrap_or(0) + 1));
        assert!(!bind.set_target(target, false, Some(&a)));

        let other = Property::with_value("other", 2i32);
        let ro = other.clone();
        let target =
            BindTarget::function(move || TypedValue::new(ro.get::<i32>().unwrap_or(0)));
        assert!(bind.set_target(target, false, Some(&a)));
        assert!(bind.dependencies().is_empty());
    }

    #[test]
    fn test_incompatible_target_keeps_previous() {
        let source = Property::with_value("source", 4i32);
        let text = Property::with_value("text", String::from("label"));
        let target = Property::with_value("target", 0i32);

        let bind = target.bind_to(BindTarget::property(&source)).unwrap();
        assert!(!bind.set_target(BindTarget::property(&text), true, Some(&target)));

        let deps = bind.dependencies();
        assert_eq!(deps.len(), 1);
        assert!(deps[0].ptr_eq(&source));
        assert_eq!(target.get::<i32>(), Some(4));
    }

    #[test]
    fn test_bound_property_vetoes_set() {
        let a = Property::with_value("a", 1i32);
        let b = Property::with_value("b", 0i32);
        b.bind_to(BindTarget::property(&a)).unwrap();

        assert_eq!(b.set(9i32), Ok(SetOutcome::Vetoed));
        assert_eq!(b.get::<i32>(), Some(1));
    }

    #[test]
    fn test_reset_breaks_binding() {
        let a = Property::with_value("a", 7i32);
        let b = Property::with_value("b", 0i32);
        let bind = b.bind_to(BindTarget::property(&a)).unwrap();
        let weak = Arc::downgrade(&bind);
        drop(bind);

        assert!(b.reset_value());
        assert!(b.bind().is_none());
        assert_eq!(b.get::<i32>(), Some(0));
        // Stack held the only reference; dropping it unsubscribed from a
        assert!(weak.upgrade().is_none());
        assert_eq!(a.on_changed().subscriber_count(), 0);
    }

    struct Reloadable {
        changed: OnChanged,
    }

    impl Notifier for Reloadable {
        fn on_changed(&self) -> &OnChanged {
            &self.changed
        }
    }

    #[test]
    fn test_notifier_dependency_invalidates() {
        let resource: Arc<dyn Notifier> = Arc::new(Reloadable {
            changed: OnChanged::new(),
        });
        let generation = Arc::new(AtomicUsize::new(0));
        let property = Property::with_value("generation", 0usize);

        let g = generation.clone();
        let bind = property
            .bind_to(BindTarget::function(move || {
                TypedValue::new(g.load(Ordering::SeqCst))
            }))
            .unwrap();
        assert!(bind.add_notifier(&resource));
        assert!(!bind.add_notifier(&resource));

        generation.store(3, Ordering::SeqCst);
        assert_eq!(property.get::<usize>(), Some(0));
        resource.on_changed().invoke(&());
        assert_eq!(property.get::<usize>(), Some(3));
    }

    #[test]
    fn test_dropped_dependency_is_skipped() {
        let b = Property::with_value("b", 0i32);
        let bind = {
            let a = Property::with_value("a", 2i32);
            b.bind_to(BindTarget::property(&a)).unwrap()
        };
        assert!(bind.dependencies().is_empty());
        // Cached value stays readable
        assert_eq!(b.get::<i32>(), Some(2));
    }
}
