//! Animatable value types
//!
//! Provides the [`Interpolate`] trait and type-erased interpolation between
//! two [`TypedValue`]s of the same type.

use prism_meta::TypedValue;

/// Trait for values that can be linearly interpolated
pub trait Interpolate: Clone {
    /// Linearly interpolate between self and other by factor t (0.0 to 1.0)
    fn lerp(&self, other: &Self, t: f32) -> Self;

    /// Check if two values are approximately equal
    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool;
}

// ============================================================================
// Floating point
// ============================================================================

impl Interpolate for f32 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        self + (other - self) * t
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self - other).abs() < epsilon
    }
}

impl Interpolate for f64 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        self + (other - self) * f64::from(t)
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (self - other).abs() < f64::from(epsilon)
    }
}

// ============================================================================
// Integers
// ============================================================================

impl Interpolate for i32 {
    fn lerp(&self, other: &Self, t: f32) -> Self {
        let from = f64::from(*self);
        let to = f64::from(*other);
        (from + (to - from) * f64::from(t)).round() as i32
    }

    fn approx_eq(&self, other: &Self, epsilon: f32) -> bool {
        (f64::from(*self) - f64::from(*other)).abs() < f64::from(epsilon)
    }
}

// ============================================================================
// Type-erased interpolation
// ============================================================================

fn lerp_as<T: Interpolate + prism_meta::AnyType>(
    from: &TypedValue,
    to: &TypedValue,
    t: f32,
) -> Option<TypedValue> {
    let a = from.downcast_ref::<T>()?;
    let b = to.downcast_ref::<T>()?;
    Some(TypedValue::new(a.lerp(b, t)))
}

/// Whether values of this type interpolate smoothly
pub fn is_interpolable(value: &TypedValue) -> bool {
    value.is::<f32>() || value.is::<f64>() || value.is::<i32>()
}

/// Interpolate two values of the same interpolable type
///
/// Returns `None` when the types differ or have no [`Interpolate`] impl.
pub fn interpolate_any(from: &TypedValue, to: &TypedValue, t: f32) -> Option<TypedValue> {
    lerp_as::<f32>(from, to, t)
        .or_else(|| lerp_as::<f64>(from, to, t))
        .or_else(|| lerp_as::<i32>(from, to, t))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_lerp() {
        assert_eq!(0.0f32.lerp(&10.0, 0.25), 2.5);
        assert_eq!(2.0f64.lerp(&4.0, 0.5), 3.0);
        assert_eq!(0i32.lerp(&10, 0.26), 3);
        assert!(1.0f32.approx_eq(&1.0005, 0.001));
    }

    #[test]
    fn test_interpolate_any() {
        let value = interpolate_any(&TypedValue::new(0.0f32), &TypedValue::new(2.0f32), 0.5);
        assert_eq!(value.and_then(|v| v.get::<f32>()), Some(1.0));

        let mixed = interpolate_any(&TypedValue::new(0.0f32), &TypedValue::new(2.0f64), 0.5);
        assert!(mixed.is_none());

        let text = TypedValue::new(String::from("a"));
        assert!(!is_interpolable(&text));
        assert!(interpolate_any(&text, &text, 0.5).is_none());
    }
}
