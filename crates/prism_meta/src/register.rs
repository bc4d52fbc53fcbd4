//! Property register
//!
//! Maps an [`ObjectId`] to an [`AnyBuilder`] that constructs the
//! [`TypedValue`] representation of a value type, and owns the pairwise
//! [`CompatibilityTable`]. One register lives in the global
//! [`MetaRuntime`](crate::runtime::MetaRuntime); standalone registers can be
//! created for tests or isolated tooling.

use crate::any::{AnyType, TypedValue};
use crate::error::{MetaError, Result};
use crate::property::Property;
use crate::runtime;
use crate::time_span::TimeSpan;
use crate::uid::{InstanceId, ObjectId, TypeId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Factory for the any representation of one value type
pub trait AnyBuilder: Send + Sync {
    /// Id under which the builder is registered
    fn object_id(&self) -> ObjectId;

    /// Type of the values constructed
    fn type_id(&self) -> TypeId;

    fn type_name(&self) -> &str;

    /// Construct a value holding the type's default
    fn construct(&self) -> TypedValue;
}

/// Builder for a concrete Rust type
pub struct TypedAnyBuilder<T: AnyType> {
    object_id: ObjectId,
    default: T,
}

impl<T: AnyType + Default> TypedAnyBuilder<T> {
    pub fn new() -> Self {
        Self::with_default(T::default())
    }
}

impl<T: AnyType + Default> Default for TypedAnyBuilder<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AnyType> TypedAnyBuilder<T> {
    /// Create a builder whose constructed values start at `default`
    pub fn with_default(default: T) -> Self {
        Self {
            object_id: ObjectId::for_any::<T>(),
            default,
        }
    }

    /// Register under a custom object id instead of the type-derived one
    pub fn with_object_id(mut self, object_id: ObjectId) -> Self {
        self.object_id = object_id;
        self
    }
}

impl<T: AnyType> AnyBuilder for TypedAnyBuilder<T> {
    fn object_id(&self) -> ObjectId {
        self.object_id
    }

    fn type_id(&self) -> TypeId {
        TypeId::of::<T>()
    }

    fn type_name(&self) -> &str {
        std::any::type_name::<T>()
    }

    fn construct(&self) -> TypedValue {
        TypedValue::new(self.default.clone())
    }
}

type Converter = Arc<dyn Fn(&TypedValue) -> Option<TypedValue> + Send + Sync>;

/// Declared pairwise compatibility between value types
///
/// Pairs are registered with converters in both directions, so the relation
/// is symmetric. It is not transitive.
#[derive(Default)]
pub struct CompatibilityTable {
    converters: RwLock<FxHashMap<(TypeId, TypeId), Converter>>,
}

impl CompatibilityTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `A` and `B` compatible
    ///
    /// Converters return `None` for values the other type cannot represent,
    /// which surfaces as a failed conversion. Returns false, leaving the
    /// table untouched, if either direction was declared before.
    pub fn register<A, B, F, G>(&self, a_to_b: F, b_to_a: G) -> bool
    where
        A: AnyType,
        B: AnyType,
        F: Fn(&A) -> Option<B> + Send + Sync + 'static,
        G: Fn(&B) -> Option<A> + Send + Sync + 'static,
    {
        let a = TypeId::of::<A>();
        let b = TypeId::of::<B>();
        if a == b {
            return false;
        }

        let mut converters = self.converters.write();
        if converters.contains_key(&(a, b)) || converters.contains_key(&(b, a)) {
            tracing::warn!(
                "compatibility between {} and {} already declared",
                std::any::type_name::<A>(),
                std::any::type_name::<B>()
            );
            return false;
        }

        converters.insert(
            (a, b),
            Arc::new(move |value: &TypedValue| {
                value.downcast_ref::<A>().and_then(&a_to_b).map(TypedValue::new)
            }),
        );
        converters.insert(
            (b, a),
            Arc::new(move |value: &TypedValue| {
                value.downcast_ref::<B>().and_then(&b_to_a).map(TypedValue::new)
            }),
        );
        true
    }

    /// Remove a declared pair (both directions)
    pub fn unregister(&self, a: TypeId, b: TypeId) -> bool {
        let mut converters = self.converters.write();
        let removed = converters.remove(&(a, b)).is_some();
        converters.remove(&(b, a));
        removed
    }

    pub fn is_compatible(&self, from: TypeId, to: TypeId) -> bool {
        from == to || self.converters.read().contains_key(&(from, to))
    }

    /// Convert `value` into a value of type `to`
    pub fn convert(&self, value: &TypedValue, to: TypeId) -> Option<TypedValue> {
        if value.type_id() == to {
            return Some(value.clone());
        }
        // Clone the converter out so user conversion code runs unlocked
        let converter = self
            .converters
            .read()
            .get(&(value.type_id(), to))
            .cloned()?;
        converter(value)
    }

    pub fn len(&self) -> usize {
        self.converters.read().len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.converters.read().is_empty()
    }
}

/// Registry of any builders keyed by object id
#[derive(Default)]
pub struct PropertyRegister {
    builders: RwLock<FxHashMap<ObjectId, Arc<dyn AnyBuilder>>>,
    by_type: RwLock<FxHashMap<TypeId, ObjectId>>,
    compatibility: CompatibilityTable,
}

impl PropertyRegister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a register with the primitive types and their builtin
    /// compatibility pairs
    pub fn with_builtin_types() -> Self {
        let register = Self::new();
        register.register_builtin_types();
        register
    }

    /// Register `bool`, integers, floats, `String`, [`TimeSpan`] and ids
    pub fn register_builtin_types(&self) {
        // Errors only mean the type is already present
        let _ = self.register_type::<bool>();
        let _ = self.register_type::<i32>();
        let _ = self.register_type::<i64>();
        let _ = self.register_type::<u32>();
        let _ = self.register_type::<u64>();
        let _ = self.register_type::<f32>();
        let _ = self.register_type::<f64>();
        let _ = self.register_type::<String>();
        let _ = self.register_type::<TimeSpan>();
        let _ = self.register_type::<TypeId>();
        let _ = self.register_type::<ObjectId>();
        let _ = self.register_type::<InstanceId>();

        // Narrowing integers must fit; narrowing floats round
        self.compatibility
            .register::<f32, f64, _, _>(|v| Some(f64::from(*v)), |v| Some(*v as f32));
        self.compatibility.register::<i32, i64, _, _>(
            |v| Some(i64::from(*v)),
            |v| i32::try_from(*v).ok(),
        );
        self.compatibility.register::<u32, u64, _, _>(
            |v| Some(u64::from(*v)),
            |v| u32::try_from(*v).ok(),
        );
    }

    /// Register an any builder
    ///
    /// A second registration of the same object id is rejected; the first
    /// registration stays active.
    pub fn register_any(&self, builder: Arc<dyn AnyBuilder>) -> Result<()> {
        let object_id = builder.object_id();
        let mut builders = self.builders.write();
        if builders.contains_key(&object_id) {
            tracing::warn!(
                "rejected second registration of {} ({})",
                object_id,
                builder.type_name()
            );
            return Err(MetaError::AlreadyRegistered(object_id));
        }

        tracing::debug!("registered any {} for {}", object_id, builder.type_name());
        self.by_type
            .write()
            .entry(builder.type_id())
            .or_insert(object_id);
        builders.insert(object_id, builder);
        Ok(())
    }

    /// Register the default builder for `T`, returning its object id
    pub fn register_type<T: AnyType + Default>(&self) -> Result<ObjectId> {
        let builder = TypedAnyBuilder::<T>::new();
        let object_id = builder.object_id();
        self.register_any(Arc::new(builder))?;
        Ok(object_id)
    }

    /// Remove a builder; returns false if the id was not registered
    pub fn unregister_any(&self, object_id: ObjectId) -> bool {
        let Some(builder) = self.builders.write().remove(&object_id) else {
            return false;
        };

        let mut by_type = self.by_type.write();
        if by_type.get(&builder.type_id()) == Some(&object_id) {
            by_type.remove(&builder.type_id());
        }
        tracing::debug!("unregistered any {}", object_id);
        true
    }

    pub fn is_registered(&self, object_id: ObjectId) -> bool {
        self.builders.read().contains_key(&object_id)
    }

    pub fn builder(&self, object_id: ObjectId) -> Option<Arc<dyn AnyBuilder>> {
        self.builders.read().get(&object_id).cloned()
    }

    /// First registered builder producing values of `type_id`
    pub fn builder_for_type(&self, type_id: TypeId) -> Option<Arc<dyn AnyBuilder>> {
        let object_id = *self.by_type.read().get(&type_id)?;
        self.builder(object_id)
    }

    /// Construct a default value from a registered builder
    pub fn construct_any(&self, object_id: ObjectId) -> Option<TypedValue> {
        self.builder(object_id).map(|builder| builder.construct())
    }

    /// Create a property whose default value comes from the builder
    pub fn create(&self, object_id: ObjectId, name: &str) -> Option<Property> {
        let Some(default) = self.construct_any(object_id) else {
            tracing::warn!("cannot create property {:?}: {} not registered", name, object_id);
            return None;
        };
        Some(Property::new(name, default))
    }

    /// Create a property for a value type
    pub fn create_for_type(&self, type_id: TypeId, name: &str) -> Option<Property> {
        let builder = self.builder_for_type(type_id)?;
        Some(Property::new(name, builder.construct()))
    }

    pub fn compatibility(&self) -> &CompatibilityTable {
        &self.compatibility
    }

    /// Declare `A` and `B` compatible, see [`CompatibilityTable::register`]
    pub fn register_compatibility<A, B, F, G>(&self, a_to_b: F, b_to_a: G) -> bool
    where
        A: AnyType,
        B: AnyType,
        F: Fn(&A) -> Option<B> + Send + Sync + 'static,
        G: Fn(&B) -> Option<A> + Send + Sync + 'static,
    {
        self.compatibility.register(a_to_b, b_to_a)
    }

    /// Number of registered builders
    pub fn len(&self) -> usize {
        self.builders.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.builders.read().is_empty()
    }
}

/// Create a property from a builder in the global register
pub fn create_property(object_id: ObjectId, name: &str) -> Result<Property> {
    runtime::checked_global()?
        .register()
        .create(object_id, name)
        .ok_or(MetaError::Unregistered(object_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Debug, Default, PartialEq)]
    struct Color {
        r: f32,
        g: f32,
        b: f32,
    }

    #[test]
    fn test_register_and_construct() {
        let register = PropertyRegister::new();
        let id = register.register_type::<Color>().unwrap();

        assert!(register.is_registered(id));
        let value = register.construct_any(id).unwrap();
        assert_eq!(value.get::<Color>(), Some(Color::default()));
    }

    #[test]
    fn test_double_registration_rejected() {
        let register = PropertyRegister::new();
        let red = Color {
            r: 1.0,
            g: 0.0,
            b: 0.0,
        };
        let id = ObjectId::from_name("test.RedColor");
        register
            .register_any(Arc::new(
                TypedAnyBuilder::with_default(red.clone()).with_object_id(id),
            ))
            .unwrap();

        let second = register.register_any(Arc::new(
            TypedAnyBuilder::<Color>::new().with_object_id(id),
        ));
        assert_eq!(second, Err(MetaError::AlreadyRegistered(id)));

        // First registration still wins
        assert_eq!(register.construct_any(id).unwrap().get::<Color>(), Some(red));
    }

    #[test]
    fn test_unregistered_construct_fails() {
        let register = PropertyRegister::new();
        let id = ObjectId::from_name("test.Missing");
        assert!(register.construct_any(id).is_none());
        assert!(register.create(id, "missing").is_none());
        assert!(!register.unregister_any(id));
    }

    #[test]
    fn test_unregister_removes_type_lookup() {
        let register = PropertyRegister::new();
        let id = register.register_type::<Color>().unwrap();
        assert!(register.builder_for_type(TypeId::of::<Color>()).is_some());

        assert!(register.unregister_any(id));
        assert!(register.builder_for_type(TypeId::of::<Color>()).is_none());
        assert!(register.construct_any(id).is_none());
    }

    #[test]
    fn test_create_property_from_builder() {
        let register = PropertyRegister::with_builtin_types();
        let property = register
            .create(ObjectId::for_any::<f32>(), "Opacity")
            .unwrap();

        assert_eq!(property.name(), "Opacity");
        assert_eq!(property.type_id(), TypeId::of::<f32>());
        assert_eq!(property.get::<f32>(), Some(0.0));

        let by_type = register
            .create_for_type(TypeId::of::<String>(), "Label")
            .unwrap();
        assert_eq!(by_type.get::<String>().as_deref(), Some(""));
    }

    #[test]
    fn test_create_property_from_global_register() {
        runtime::init_global(crate::config::MetaConfig::default());
        let property = create_property(ObjectId::for_any::<i64>(), "Ticks").unwrap();
        assert_eq!(property.get::<i64>(), Some(0));

        let missing = ObjectId::from_name("test.NotAType");
        assert_eq!(
            create_property(missing, "Nope").unwrap_err(),
            MetaError::Unregistered(missing)
        );
    }

    #[test]
    fn test_compatibility_is_symmetric_not_transitive() {
        let table = CompatibilityTable::new();
        assert!(table.register::<u8, u16, _, _>(
            |v| Some(u16::from(*v)),
            |v| u8::try_from(*v).ok()
        ));
        assert!(table.register::<u16, u32, _, _>(
            |v| Some(u32::from(*v)),
            |v| u16::try_from(*v).ok()
        ));

        let u8_id = TypeId::of::<u8>();
        let u16_id = TypeId::of::<u16>();
        let u32_id = TypeId::of::<u32>();
        assert!(table.is_compatible(u8_id, u16_id));
        assert!(table.is_compatible(u16_id, u8_id));
        assert!(!table.is_compatible(u8_id, u32_id));

        // Re-declaring either direction is rejected
        assert!(!table.register::<u16, u8, _, _>(
            |v| u8::try_from(*v).ok(),
            |v| Some(u16::from(*v))
        ));
        assert_eq!(table.len(), 2);

        let converted = table.convert(&TypedValue::new(7u8), u16_id).unwrap();
        assert_eq!(converted.get::<u16>(), Some(7));
        assert!(table.convert(&TypedValue::new(7u8), u32_id).is_none());
        assert!(table.convert(&TypedValue::new(300u16), u8_id).is_none());
    }

    #[test]
    fn test_builtin_integer_narrowing_rejects_out_of_range() {
        let register = PropertyRegister::with_builtin_types();
        let table = register.compatibility();
        let i32_id = TypeId::of::<i32>();
        let u32_id = TypeId::of::<u32>();

        assert!(table.convert(&TypedValue::new(5_000_000_000i64), i32_id).is_none());
        assert!(table.convert(&TypedValue::new(i64::from(i32::MIN) - 1), i32_id).is_none());
        assert!(table.convert(&TypedValue::new(u64::MAX), u32_id).is_none());

        let fits = table.convert(&TypedValue::new(-42i64), i32_id).unwrap();
        assert_eq!(fits.get::<i32>(), Some(-42));
        let fits = table.convert(&TypedValue::new(u64::from(u32::MAX)), u32_id).unwrap();
        assert_eq!(fits.get::<u32>(), Some(u32::MAX));
    }
}
