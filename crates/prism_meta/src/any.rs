//! Type-erased value storage
//!
//! [`TypedValue`] holds exactly one value of one registered type. It owns its
//! storage, clones deeply, and refuses writes of a type that is neither the
//! declared type nor declared compatible in the global
//! [`CompatibilityTable`](crate::register::CompatibilityTable).
//!
//! ```
//! use prism_meta::TypedValue;
//!
//! let mut value = TypedValue::new(1.5f32);
//! assert_eq!(value.get::<f32>(), Some(1.5));
//! assert!(value.set(2.0f32).is_ok());
//! assert!(value.set("text".to_string()).is_err());
//! assert_eq!(value.get::<f32>(), Some(2.0));
//! ```

use crate::error::{MetaError, Result};
use crate::runtime;
use crate::uid::TypeId;
use std::any::Any;
use std::fmt;

/// Bound for types that can be stored in a [`TypedValue`]
pub trait AnyType: Any + Clone + PartialEq + fmt::Debug + Send + Sync {}

impl<T> AnyType for T where T: Any + Clone + PartialEq + fmt::Debug + Send + Sync {}

trait ErasedValue: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn clone_boxed(&self) -> Box<dyn ErasedValue>;
    fn eq_erased(&self, other: &dyn ErasedValue) -> bool;
    fn fmt_erased(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result;
    fn type_name(&self) -> &'static str;
}

impl<T: AnyType> ErasedValue for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn clone_boxed(&self) -> Box<dyn ErasedValue> {
        Box::new(self.clone())
    }

    fn eq_erased(&self, other: &dyn ErasedValue) -> bool {
        other
            .as_any()
            .downcast_ref::<T>()
            .is_some_and(|other| other == self)
    }

    fn fmt_erased(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }

    fn type_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

/// Type-erased container for a single value
pub struct TypedValue {
    type_id: TypeId,
    value: Box<dyn ErasedValue>,
}

impl TypedValue {
    pub fn new<T: AnyType>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            value: Box::new(value),
        }
    }

    /// The declared type of this value
    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn type_name(&self) -> &'static str {
        self.value.type_name()
    }

    /// Check if the stored type is exactly `T`
    pub fn is<T: AnyType>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    /// Borrow the stored value if its type is exactly `T`
    pub fn downcast_ref<T: AnyType>(&self) -> Option<&T> {
        self.value.as_any().downcast_ref::<T>()
    }

    /// Get the value as `T`
    ///
    /// Succeeds when the stored type is `T`, or when the pair is declared
    /// compatible in the global register.
    pub fn get<T: AnyType>(&self) -> Option<T> {
        if let Some(value) = self.downcast_ref::<T>() {
            return Some(value.clone());
        }
        self.converted_to(TypeId::of::<T>())
            .and_then(|converted| converted.downcast_ref::<T>().cloned())
    }

    /// Replace the stored value
    ///
    /// Fails with [`MetaError::IncompatibleType`] without touching the
    /// current value when `T` is not compatible with the declared type.
    pub fn set<T: AnyType>(&mut self, value: T) -> Result<()> {
        if self.is::<T>() {
            self.value = Box::new(value);
            return Ok(());
        }
        self.set_from(&TypedValue::new(value))
    }

    /// Copy the value of another any into this one, converting if needed
    pub fn set_from(&mut self, other: &TypedValue) -> Result<()> {
        let converted = other
            .converted_to(self.type_id)
            .ok_or(MetaError::IncompatibleType {
                expected: self.type_id,
                actual: other.type_id,
            })?;
        self.value = converted.value;
        Ok(())
    }

    /// Produce a copy of this value with the given declared type
    pub fn converted_to(&self, target: TypeId) -> Option<TypedValue> {
        if target == self.type_id {
            return Some(self.clone());
        }
        runtime::try_global().and_then(|rt| rt.register().compatibility().convert(self, target))
    }

    /// Check if this value can be read or written as `other`
    pub fn is_compatible(&self, other: TypeId) -> bool {
        types_compatible(self.type_id, other)
    }

    /// Logical equality: same declared type and equal values
    pub fn value_eq(&self, other: &TypedValue) -> bool {
        self.type_id == other.type_id && self.value.eq_erased(other.value.as_ref())
    }
}

/// Check if two types are identical or declared compatible
pub fn types_compatible(a: TypeId, b: TypeId) -> bool {
    a == b
        || runtime::try_global()
            .is_some_and(|rt| rt.register().compatibility().is_compatible(a, b))
}

impl Clone for TypedValue {
    fn clone(&self) -> Self {
        Self {
            type_id: self.type_id,
            value: self.value.clone_boxed(),
        }
    }
}

impl PartialEq for TypedValue {
    fn eq(&self, other: &Self) -> bool {
        self.value_eq(other)
    }
}

impl fmt::Debug for TypedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypedValue<{}>(", self.type_name())?;
        self.value.fmt_erased(f)?;
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetaConfig;

    #[derive(Clone, Debug, PartialEq)]
    struct Meters(f32);

    #[derive(Clone, Debug, PartialEq)]
    struct Feet(f32);

    #[test]
    fn test_get_set_same_type() {
        let mut value = TypedValue::new(10i32);
        assert!(value.is::<i32>());
        assert_eq!(value.get::<i32>(), Some(10));

        value.set(42i32).unwrap();
        assert_eq!(value.get::<i32>(), Some(42));
        assert_eq!(value.downcast_ref::<i32>(), Some(&42));
    }

    #[test]
    fn test_incompatible_set_keeps_value() {
        let mut value = TypedValue::new(String::from("hello"));
        let err = value.set(5u8).unwrap_err();
        assert_eq!(
            err,
            MetaError::IncompatibleType {
                expected: TypeId::of::<String>(),
                actual: TypeId::of::<u8>(),
            }
        );
        assert_eq!(value.get::<String>().as_deref(), Some("hello"));
        assert_eq!(value.get::<u8>(), None);
    }

    #[test]
    fn test_clone_is_independent() {
        let original = TypedValue::new(vec![1, 2, 3]);
        let mut copy = original.clone();
        copy.set(vec![4]).unwrap();

        assert_eq!(original.get::<Vec<i32>>(), Some(vec![1, 2, 3]));
        assert_eq!(copy.get::<Vec<i32>>(), Some(vec![4]));
        assert_ne!(original, copy);
    }

    #[test]
    fn test_value_eq_requires_same_type() {
        assert_eq!(TypedValue::new(1.0f32), TypedValue::new(1.0f32));
        assert_ne!(TypedValue::new(1.0f32), TypedValue::new(1.0f64));
        assert_ne!(TypedValue::new(1.0f32), TypedValue::new(2.0f32));
    }

    #[test]
    fn test_declared_compatibility_converts_both_ways() {
        let rt = runtime::init_global(MetaConfig::default());
        let declared = rt.register().register_compatibility::<Meters, Feet, _, _>(
            |m| Some(Feet(m.0 * 3.28084)),
            |f| Some(Meters(f.0 / 3.28084)),
        );
        assert!(declared);

        let meters = TypedValue::new(Meters(1.0));
        let feet = meters.get::<Feet>().unwrap();
        assert!((feet.0 - 3.28084).abs() < 1e-4);

        let mut target = TypedValue::new(Meters(0.0));
        target.set(Feet(3.28084)).unwrap();
        assert!((target.get::<Meters>().unwrap().0 - 1.0).abs() < 1e-4);
        assert!(target.is::<Meters>());
    }

    #[test]
    fn test_builtin_float_compatibility() {
        runtime::init_global(MetaConfig::default());
        let value = TypedValue::new(0.5f32);
        assert_eq!(value.get::<f64>(), Some(0.5));
        assert!(value.is_compatible(TypeId::of::<f64>()));
        assert!(!value.is_compatible(TypeId::of::<String>()));
    }

    #[test]
    fn test_builtin_integer_narrowing_must_fit() {
        runtime::init_global(MetaConfig::default());
        assert_eq!(TypedValue::new(u64::MAX).get::<u32>(), None);
        assert_eq!(TypedValue::new(7u64).get::<u32>(), Some(7));

        let mut target = TypedValue::new(0i32);
        assert!(target.set(5_000_000_000i64).is_err());
        assert_eq!(target.get::<i32>(), Some(0));
    }

    #[test]
    fn test_debug_shows_type_and_value() {
        let value = TypedValue::new(7u32);
        assert_eq!(format!("{value:?}"), "TypedValue<u32>(7)");
    }
}
