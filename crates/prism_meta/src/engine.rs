//! Engine value boundary
//!
//! External storage (an ECS component field, a GPU parameter block) is
//! exposed through [`EngineValueAccess`]. An [`EngineValueModifier`] at the
//! bottom of a property's stack makes the property read and write through
//! the access. The [`EngineValueManager`] tracks attached properties and,
//! on [`EngineValueManager::sync`], fires `on_changed` for every property
//! whose external value changed since the previous sync.

use crate::any::{types_compatible, AnyType, TypedValue};
use crate::error::{MetaError, Result};
use crate::modifier::{EvalResult, Modifier};
use crate::property::{Property, WeakProperty};
use crate::uid::TypeId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

/// Token describing the type of an external value
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TypeDeclaration {
    pub type_id: TypeId,
    pub type_name: &'static str,
}

impl TypeDeclaration {
    pub fn of<T: AnyType>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
        }
    }
}

/// Read/write access to one external value
pub trait EngineValueAccess: Send + Sync {
    fn declaration(&self) -> TypeDeclaration;

    /// Current external value; `None` if the backing storage is gone
    fn read(&self) -> Option<TypedValue>;

    fn write(&self, value: &TypedValue) -> Result<()>;
}

/// Modifier routing a property through an [`EngineValueAccess`]
pub struct EngineValueModifier {
    access: Arc<dyn EngineValueAccess>,
}

impl EngineValueModifier {
    pub fn new(access: Arc<dyn EngineValueAccess>) -> Self {
        Self { access }
    }

    pub fn access(&self) -> &Arc<dyn EngineValueAccess> {
        &self.access
    }
}

impl Modifier for EngineValueModifier {
    fn process_on_get(&self, value: &mut TypedValue) -> EvalResult {
        let Some(external) = self.access.read() else {
            return EvalResult::Error;
        };
        match value.set_from(&external) {
            Ok(()) => EvalResult::Return,
            Err(_) => EvalResult::Error,
        }
    }

    fn process_on_set(&self, value: &mut TypedValue, _current: &TypedValue) -> EvalResult {
        match self.access.write(value) {
            Ok(()) => EvalResult::Continue,
            Err(err) => {
                tracing::warn!("engine value write failed: {}", err);
                EvalResult::Error
            }
        }
    }

    fn name(&self) -> &str {
        "EngineValueModifier"
    }
}

impl fmt::Debug for EngineValueModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineValueModifier")
            .field("declaration", &self.access.declaration())
            .finish()
    }
}

struct Attached {
    property: WeakProperty,
    modifier: Arc<dyn Modifier>,
    access: Arc<dyn EngineValueAccess>,
    last: Option<TypedValue>,
}

/// Engine values attached to properties
#[derive(Default)]
pub struct EngineValueManager {
    attached: Mutex<Vec<Attached>>,
}

impl EngineValueManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route `property` through `access`
    pub fn attach(&self, property: &Property, access: Arc<dyn EngineValueAccess>) -> Result<()> {
        let declaration = access.declaration();
        if !types_compatible(declaration.type_id, property.type_id()) {
            return Err(MetaError::IncompatibleType {
                expected: property.type_id(),
                actual: declaration.type_id,
            });
        }

        let modifier: Arc<dyn Modifier> = Arc::new(EngineValueModifier::new(access.clone()));
        property.add_modifier(modifier.clone());
        let last = access.read();
        self.attached.lock().push(Attached {
            property: property.downgrade(),
            modifier,
            access,
            last,
        });
        tracing::debug!(
            "attached {} engine value to {:?}",
            declaration.type_name,
            property.name()
        );
        Ok(())
    }

    /// Stop routing `property`; returns false if it was not attached
    pub fn detach(&self, property: &Property) -> bool {
        let removed = {
            let mut attached = self.attached.lock();
            let index = attached.iter().position(|a| a.property.is(property));
            index.map(|index| attached.remove(index))
        };
        match removed {
            Some(entry) => {
                property.remove_modifier(&entry.modifier);
                true
            }
            None => false,
        }
    }

    /// Pull external values and notify properties that changed
    ///
    /// Entries of dropped properties are discarded. Returns the number of
    /// properties notified.
    pub fn sync(&self) -> usize {
        let changed: Vec<Property> = {
            let mut attached = self.attached.lock();
            attached.retain(|a| a.property.is_alive());
            attached
                .iter_mut()
                .filter_map(|entry| {
                    let current = entry.access.read();
                    let differs = match (&current, &entry.last) {
                        (Some(now), Some(before)) => !now.value_eq(before),
                        (None, None) => false,
                        _ => true,
                    };
                    if !differs {
                        return None;
                    }
                    entry.last = current;
                    entry.property.upgrade()
                })
                .collect()
        };

        for property in &changed {
            property.notify_changed();
        }
        changed.len()
    }

    pub fn len(&self) -> usize {
        self.attached.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.attached.lock().is_empty()
    }
}

impl fmt::Debug for EngineValueManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineValueManager")
            .field("attached", &self.len())
            .finish()
    }
}
