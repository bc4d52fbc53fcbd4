//! Observable typed properties
//!
//! A [`Property`] is a cheap clonable handle to a named cell holding an
//! optional value, a default, and an ordered modifier stack. Reads walk the
//! stack from the top; writes walk it on a working copy and commit only when
//! every modifier accepts. `on_changed` fires after internal locks are
//! released and only when the resolved value actually differs.
//!
//! ```
//! use prism_meta::{Property, SetOutcome, TypedValue};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//!
//! let width = Property::new("Width", TypedValue::new(100.0f32));
//! let changes = Arc::new(AtomicUsize::new(0));
//! let counter = changes.clone();
//! width.on_changed().subscribe(move |_| {
//!     counter.fetch_add(1, Ordering::SeqCst);
//! });
//!
//! assert_eq!(width.set(120.0f32), Ok(SetOutcome::Changed));
//! assert_eq!(width.set(120.0f32), Ok(SetOutcome::Unchanged));
//! assert_eq!(changes.load(Ordering::SeqCst), 1);
//!
//! width.reset_value();
//! assert_eq!(width.get::<f32>(), Some(100.0));
//! ```

use crate::any::{AnyType, TypedValue};
use crate::bind::{Bind, BindTarget};
use crate::error::{MetaError, Result};
use crate::event::{Notifier, OnChanged};
use crate::future::Future;
use crate::modifier::{EvalResult, Modifier};
use crate::object::MetaObject;
use crate::runtime;
use crate::task_queue::{TaskQueue, TaskQueueExt};
use crate::tracking;
use crate::uid::{InstanceId, TypeId};
use parking_lot::Mutex;
use smallvec::SmallVec;
use std::fmt;
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::{Arc, Weak};

type ModifierList = SmallVec<[Arc<dyn Modifier>; 2]>;

/// Result of a property write
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SetOutcome {
    /// The value was committed and differs from the previous one
    Changed,
    /// The value was committed but equals the previous one
    Unchanged,
    /// A modifier rejected the write
    Vetoed,
    /// A modifier failed; nothing was committed
    Failed,
}

impl SetOutcome {
    pub fn is_committed(self) -> bool {
        matches!(self, SetOutcome::Changed | SetOutcome::Unchanged)
    }
}

struct PropertyState {
    value: Option<TypedValue>,
    default: TypedValue,
    last_good: Option<TypedValue>,
    owner: Option<InstanceId>,
    modifiers: ModifierList,
}

impl PropertyState {
    fn base(&self) -> TypedValue {
        self.value.clone().unwrap_or_else(|| self.default.clone())
    }
}

struct PropertyInner {
    name: String,
    type_id: TypeId,
    state: Mutex<PropertyState>,
    on_changed: OnChanged,
}

/// Shared handle to a property
#[derive(Clone)]
pub struct Property {
    inner: Arc<PropertyInner>,
}

/// Non-owning handle to a property
#[derive(Clone, Default)]
pub struct WeakProperty {
    inner: Weak<PropertyInner>,
}

impl WeakProperty {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upgrade(&self) -> Option<Property> {
        self.inner.upgrade().map(|inner| Property { inner })
    }

    /// Check if this handle points at `property`
    pub fn is(&self, property: &Property) -> bool {
        std::ptr::eq(self.inner.as_ptr(), Arc::as_ptr(&property.inner))
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.upgrade() {
            Some(property) => write!(f, "WeakProperty({:?})", property.name()),
            None => write!(f, "WeakProperty(<dropped>)"),
        }
    }
}

fn same_modifier(a: &Arc<dyn Modifier>, b: &Arc<dyn Modifier>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

impl Property {
    /// Create a property; its type is the type of `default`
    pub fn new(name: impl Into<String>, default: TypedValue) -> Self {
        Self {
            inner: Arc::new(PropertyInner {
                name: name.into(),
                type_id: default.type_id(),
                state: Mutex::new(PropertyState {
                    value: None,
                    default,
                    last_good: None,
                    owner: None,
                    modifiers: SmallVec::new(),
                }),
                on_changed: OnChanged::new(),
            }),
        }
    }

    /// Create a property with a typed default
    pub fn with_value<T: AnyType>(name: impl Into<String>, default: T) -> Self {
        Self::new(name, TypedValue::new(default))
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Declared value type
    pub fn type_id(&self) -> TypeId {
        self.inner.type_id
    }

    pub fn downgrade(&self) -> WeakProperty {
        WeakProperty {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Check if both handles point at the same property
    pub fn ptr_eq(&self, other: &Property) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub(crate) fn key(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    // ========================================================================
    // Ownership
    // ========================================================================

    pub fn owner(&self) -> Option<InstanceId> {
        self.inner.state.lock().owner
    }

    pub fn set_owner(&self, owner: Option<InstanceId>) {
        self.inner.state.lock().owner = owner;
    }

    /// Resolve the owner through the global object registry
    ///
    /// Returns `None` when there is no owner, the owner was destroyed, or the
    /// runtime is not initialized.
    pub fn owner_object(&self) -> Option<Arc<MetaObject>> {
        let owner = self.owner()?;
        runtime::try_global()?.objects().get_object(owner)
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Resolve the current value through the modifier stack
    ///
    /// Always returns a value of the declared type. When a modifier fails,
    /// the last successfully resolved value is returned instead.
    pub fn get_value(&self) -> TypedValue {
        tracking::record(self);
        self.resolve()
    }

    /// Resolve the value as `T`, see [`TypedValue::get`]
    pub fn get<T: AnyType>(&self) -> Option<T> {
        self.get_value().get::<T>()
    }

    fn resolve(&self) -> TypedValue {
        let (base, modifiers, last_good) = {
            let state = self.inner.state.lock();
            (state.base(), state.modifiers.clone(), state.last_good.clone())
        };

        if modifiers.is_empty() {
            return base;
        }

        match self.walk_get(base.clone(), &modifiers) {
            Some(value) => {
                self.inner.state.lock().last_good = Some(value.clone());
                value
            }
            None => {
                tracing::warn!(
                    "modifier failed while reading {:?}, using last good value",
                    self.name()
                );
                last_good.unwrap_or(base)
            }
        }
    }

    fn resolve_untracked(&self) -> TypedValue {
        tracking::untracked(|| self.resolve())
    }

    fn walk_get(&self, mut value: TypedValue, modifiers: &[Arc<dyn Modifier>]) -> Option<TypedValue> {
        for modifier in modifiers {
            let mut working = value.clone();
            let result = modifier.process_on_get(&mut working);
            if working.type_id() != self.type_id() {
                tracing::warn!(
                    "{} produced {} for {:?}",
                    modifier.name(),
                    working.type_name(),
                    self.name()
                );
                return None;
            }
            match result {
                EvalResult::Continue => value = working,
                EvalResult::Return => return Some(working),
                EvalResult::Veto => return Some(value),
                EvalResult::Error => return None,
            }
        }
        Some(value)
    }

    /// Write a value through the modifier stack
    ///
    /// The value is converted to the declared type first; an incompatible
    /// value fails with [`MetaError::IncompatibleType`] and leaves the
    /// property untouched. `on_changed` fires only for
    /// [`SetOutcome::Changed`].
    pub fn set_value(&self, value: &TypedValue) -> Result<SetOutcome> {
        let mut working = value
            .converted_to(self.type_id())
            .ok_or(MetaError::IncompatibleType {
                expected: self.type_id(),
                actual: value.type_id(),
            })?;

        let (current, modifiers) = {
            let state = self.inner.state.lock();
            (state.base(), state.modifiers.clone())
        };

        for modifier in &modifiers {
            let result = modifier.process_on_set(&mut working, &current);
            if working.type_id() != self.type_id() {
                tracing::warn!(
                    "{} rewrote {:?} to {}",
                    modifier.name(),
                    self.name(),
                    working.type_name()
                );
                return Ok(SetOutcome::Failed);
            }
            match result {
                EvalResult::Continue => {}
                EvalResult::Return => break,
                EvalResult::Veto => {
                    tracing::debug!("{} vetoed set of {:?}", modifier.name(), self.name());
                    return Ok(SetOutcome::Vetoed);
                }
                EvalResult::Error => {
                    tracing::warn!("{} failed to set {:?}", modifier.name(), self.name());
                    return Ok(SetOutcome::Failed);
                }
            }
        }

        let changed = {
            let mut state = self.inner.state.lock();
            let changed = !state.base().value_eq(&working);
            state.value = Some(working);
            state.last_good = None;
            changed
        };

        if changed {
            self.notify_changed();
            Ok(SetOutcome::Changed)
        } else {
            Ok(SetOutcome::Unchanged)
        }
    }

    pub fn set<T: AnyType>(&self, value: T) -> Result<SetOutcome> {
        self.set_value(&TypedValue::new(value))
    }

    /// Reset through the stack, then restore the default unless stopped
    ///
    /// Returns true if the resolved value changed.
    pub fn reset_value(&self) -> bool {
        let before = self.resolve_untracked();
        let (default, modifiers) = {
            let state = self.inner.state.lock();
            (state.default.clone(), state.modifiers.clone())
        };

        let mut stopped = false;
        let mut removed: ModifierList = SmallVec::new();
        for modifier in &modifiers {
            let Some(resetable) = modifier.as_resetable() else {
                continue;
            };
            let result = resetable.process_on_reset(&default);
            if result.remove_me {
                removed.push(modifier.clone());
            }
            if result.stop {
                stopped = true;
                break;
            }
        }

        {
            let mut state = self.inner.state.lock();
            state
                .modifiers
                .retain(|m| !removed.iter().any(|r| same_modifier(m, r)));
            if !stopped {
                state.value = None;
            }
            state.last_good = None;
        }
        for modifier in &removed {
            modifier.on_detach(self);
        }

        let changed = !self.resolve_untracked().value_eq(&before);
        if changed {
            self.notify_changed();
        }
        changed
    }

    pub fn default_value(&self) -> TypedValue {
        self.inner.state.lock().default.clone()
    }

    /// Replace the default, converting to the declared type
    pub fn set_default_value(&self, default: &TypedValue) -> Result<()> {
        let converted = default
            .converted_to(self.type_id())
            .ok_or(MetaError::IncompatibleType {
                expected: self.type_id(),
                actual: default.type_id(),
            })?;
        self.with_change_check(|state| state.default = converted);
        Ok(())
    }

    /// Whether a value was set since creation or the last reset
    pub fn is_value_set(&self) -> bool {
        self.inner.state.lock().value.is_some()
    }

    pub fn on_changed(&self) -> &OnChanged {
        &self.inner.on_changed
    }

    /// Fire `on_changed` unconditionally
    pub fn notify_changed(&self) {
        self.inner.on_changed.invoke(&());
    }

    fn with_change_check(&self, update: impl FnOnce(&mut PropertyState)) {
        let before = self.resolve_untracked();
        {
            let mut state = self.inner.state.lock();
            update(&mut state);
            state.last_good = None;
        }
        if !self.resolve_untracked().value_eq(&before) {
            self.notify_changed();
        }
    }

    // ========================================================================
    // Modifier stack
    // ========================================================================

    /// Append a modifier to the bottom of the stack
    pub fn add_modifier(&self, modifier: Arc<dyn Modifier>) {
        let len = self.inner.state.lock().modifiers.len();
        self.insert_modifier(len, modifier);
    }

    /// Insert a modifier at `index`; 0 is the top
    pub fn insert_modifier(&self, index: usize, modifier: Arc<dyn Modifier>) {
        modifier.on_attach(self);
        self.with_change_check(|state| {
            let index = index.min(state.modifiers.len());
            state.modifiers.insert(index, modifier);
        });
    }

    /// Remove a modifier; returns false if it is not on this stack
    pub fn remove_modifier(&self, modifier: &Arc<dyn Modifier>) -> bool {
        let mut found = false;
        self.with_change_check(|state| {
            if let Some(index) = state.modifiers.iter().position(|m| same_modifier(m, modifier)) {
                state.modifiers.remove(index);
                found = true;
            }
        });
        if found {
            modifier.on_detach(self);
        }
        found
    }

    /// Snapshot of the stack, top first
    pub fn modifiers(&self) -> Vec<Arc<dyn Modifier>> {
        self.inner.state.lock().modifiers.to_vec()
    }

    pub fn clear_modifiers(&self) {
        let mut removed: ModifierList = SmallVec::new();
        self.with_change_check(|state| removed = std::mem::take(&mut state.modifiers));
        for modifier in &removed {
            modifier.on_detach(self);
        }
    }

    // ========================================================================
    // Binding
    // ========================================================================

    /// Install `bind` at the top of the stack, replacing any current bind
    ///
    /// Returns false if the bind is already attached elsewhere.
    pub fn set_bind(&self, bind: Arc<Bind>) -> bool {
        if let Some(owner) = bind.owner() {
            if !owner.ptr_eq(self) {
                tracing::warn!(
                    "bind already attached to {:?}, cannot attach to {:?}",
                    owner.name(),
                    self.name()
                );
                return false;
            }
        }
        if let Some(current) = self.bind() {
            if Arc::ptr_eq(&current, &bind) {
                return true;
            }
        }

        let modifier: Arc<dyn Modifier> = bind;
        modifier.on_attach(self);
        let mut previous = None;
        self.with_change_check(|state| {
            if let Some(index) = state.modifiers.iter().position(|m| m.as_bind().is_some()) {
                previous = Some(state.modifiers.remove(index));
            }
            state.modifiers.insert(0, modifier);
        });
        if let Some(previous) = previous {
            previous.on_detach(self);
        }
        true
    }

    /// Bind this property to `target`, discovering dependencies
    pub fn bind_to(&self, target: BindTarget) -> Option<Arc<Bind>> {
        let bind = Bind::new();
        if !bind.set_target(target, true, Some(self)) {
            return None;
        }
        self.set_bind(bind.clone()).then_some(bind)
    }

    /// The bind currently attached to this property
    pub fn bind(&self) -> Option<Arc<Bind>> {
        self.inner
            .state
            .lock()
            .modifiers
            .iter()
            .find_map(|m| m.as_bind().and_then(Bind::handle))
    }

    /// Detach the current bind; the property keeps its stored value
    pub fn remove_bind(&self) -> bool {
        match self.take_bind() {
            Some(bind) => {
                bind.on_detach(self);
                true
            }
            None => false,
        }
    }

    fn take_bind(&self) -> Option<Arc<dyn Modifier>> {
        let mut removed = None;
        self.with_change_check(|state| {
            if let Some(index) = state.modifiers.iter().position(|m| m.as_bind().is_some()) {
                removed = Some(state.modifiers.remove(index));
            }
        });
        removed
    }

    /// Properties the current bind depends on
    pub fn dependencies(&self) -> Vec<Property> {
        self.bind()
            .map(|bind| bind.dependencies())
            .unwrap_or_default()
    }

    // ========================================================================
    // Queue marshalling
    // ========================================================================

    /// Set the value on `queue`, or directly when already running on it
    pub fn set_value_on(
        &self,
        queue: &dyn TaskQueue,
        value: TypedValue,
    ) -> Result<Future<Result<SetOutcome>>> {
        let property = self.clone();
        queue.add_future_task_or_run_directly(move || property.set_value(&value))
    }
}

impl Notifier for Property {
    fn on_changed(&self) -> &OnChanged {
        &self.inner.on_changed
    }
}

impl fmt::Debug for Property {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Property")
            .field("name", &self.inner.name)
            .field("value", &state.value)
            .field("default", &state.default)
            .field("modifiers", &state.modifiers.len())
            .finish()
    }
}

// ============================================================================
// Typed handle
// ============================================================================

/// Property handle with a compile-time value type
pub struct TypedProperty<T: AnyType> {
    property: Property,
    _marker: PhantomData<fn() -> T>,
}

impl<T: AnyType + Default> TypedProperty<T> {
    pub fn new(name: impl Into<String>, default: T) -> Self {
        Self {
            property: Property::with_value(name, default),
            _marker: PhantomData,
        }
    }

    /// Wrap an untyped property of type `T`
    pub fn from_property(property: Property) -> Option<Self> {
        (property.type_id() == TypeId::of::<T>()).then_some(Self {
            property,
            _marker: PhantomData,
        })
    }

    pub fn get(&self) -> T {
        self.property.get::<T>().unwrap_or_default()
    }

    pub fn set(&self, value: T) -> Result<SetOutcome> {
        self.property.set(value)
    }

    pub fn property(&self) -> &Property {
        &self.property
    }
}

impl<T: AnyType> Clone for TypedProperty<T> {
    fn clone(&self) -> Self {
        Self {
            property: self.property.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: AnyType> Deref for TypedProperty<T> {
    type Target = Property;

    fn deref(&self) -> &Property {
        &self.property
    }
}

impl<T: AnyType> fmt::Debug for TypedProperty<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TypedProperty").field(&self.property).finish()
    }
}
