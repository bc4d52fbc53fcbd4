//! Property modifier stack protocol
//!
//! A property's stack is an ordered list of [`Modifier`]s. Index 0 is the top
//! and is evaluated first on get, set and reset. The stack owns its modifiers
//! through `Arc`; modifiers never hold strong references to the property.

use crate::any::TypedValue;
use crate::bind::Bind;
use crate::property::Property;
use std::fmt;

/// Outcome of a modifier step during get or set
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EvalResult {
    /// Pass the (possibly transformed) value to the next modifier
    Continue,
    /// Stop walking and accept the current value
    Return,
    /// Stop walking and reject the operation. On get this behaves like `Return`.
    Veto,
    /// Evaluation failed; the operation leaves the property untouched
    Error,
}

/// Outcome of a modifier step during reset
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResetResult {
    /// Halt further reset propagation, including restoring the default
    pub stop: bool,
    /// Detach this modifier once the reset completes
    pub remove_me: bool,
}

impl ResetResult {
    pub const CONTINUE: ResetResult = ResetResult {
        stop: false,
        remove_me: false,
    };
    pub const STOP: ResetResult = ResetResult {
        stop: true,
        remove_me: false,
    };
    pub const REMOVE_ME: ResetResult = ResetResult {
        stop: false,
        remove_me: true,
    };
    pub const STOP_AND_REMOVE: ResetResult = ResetResult {
        stop: true,
        remove_me: true,
    };
}

/// Participates in property resets
pub trait StackResetable {
    fn process_on_reset(&self, default: &TypedValue) -> ResetResult;
}

/// One layer of a property's value resolution
pub trait Modifier: Send + Sync {
    /// Called on every read with the value resolved so far
    fn process_on_get(&self, _value: &mut TypedValue) -> EvalResult {
        EvalResult::Continue
    }

    /// Called on every write with the candidate value and the current one
    fn process_on_set(&self, _value: &mut TypedValue, _current: &TypedValue) -> EvalResult {
        EvalResult::Continue
    }

    fn as_resetable(&self) -> Option<&dyn StackResetable> {
        None
    }

    fn as_bind(&self) -> Option<&Bind> {
        None
    }

    /// The modifier was pushed onto `property`'s stack
    fn on_attach(&self, _property: &Property) {}

    /// The modifier was removed from `property`'s stack
    fn on_detach(&self, _property: &Property) {}

    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

/// Rejects every write and stops resets
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadOnly;

impl Modifier for ReadOnly {
    fn process_on_set(&self, _value: &mut TypedValue, _current: &TypedValue) -> EvalResult {
        EvalResult::Veto
    }

    fn as_resetable(&self) -> Option<&dyn StackResetable> {
        Some(self)
    }

    fn name(&self) -> &str {
        "ReadOnly"
    }
}

impl StackResetable for ReadOnly {
    fn process_on_reset(&self, _default: &TypedValue) -> ResetResult {
        ResetResult::STOP
    }
}

type GetHook = Box<dyn Fn(&mut TypedValue) -> EvalResult + Send + Sync>;
type SetHook = Box<dyn Fn(&mut TypedValue, &TypedValue) -> EvalResult + Send + Sync>;

/// Modifier built from closures
///
/// ```
/// use prism_meta::modifier::{EvalResult, FnModifier};
/// use prism_meta::{Property, TypedValue};
/// use std::sync::Arc;
///
/// let opacity = Property::new("Opacity", TypedValue::new(0.5f32));
/// // Clamp writes into 0..=1
/// opacity.add_modifier(Arc::new(FnModifier::new().on_set(|value, _| {
///     let clamped = value.get::<f32>().unwrap_or(0.0).clamp(0.0, 1.0);
///     match value.set(clamped) {
///         Ok(()) => EvalResult::Continue,
///         Err(_) => EvalResult::Error,
///     }
/// })));
///
/// opacity.set(3.0f32).unwrap();
/// assert_eq!(opacity.get::<f32>(), Some(1.0));
/// ```
#[derive(Default)]
pub struct FnModifier {
    on_get: Option<GetHook>,
    on_set: Option<SetHook>,
}

impl FnModifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_get<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut TypedValue) -> EvalResult + Send + Sync + 'static,
    {
        self.on_get = Some(Box::new(hook));
        self
    }

    pub fn on_set<F>(mut self, hook: F) -> Self
    where
        F: Fn(&mut TypedValue, &TypedValue) -> EvalResult + Send + Sync + 'static,
    {
        self.on_set = Some(Box::new(hook));
        self
    }
}

impl Modifier for FnModifier {
    fn process_on_get(&self, value: &mut TypedValue) -> EvalResult {
        match &self.on_get {
            Some(hook) => hook(value),
            None => EvalResult::Continue,
        }
    }

    fn process_on_set(&self, value: &mut TypedValue, current: &TypedValue) -> EvalResult {
        match &self.on_set {
            Some(hook) => hook(value, current),
            None => EvalResult::Continue,
        }
    }

    fn name(&self) -> &str {
        "FnModifier"
    }
}

impl fmt::Debug for FnModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnModifier")
            .field("on_get", &self.on_get.is_some())
            .field("on_set", &self.on_set.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_vetoes() {
        let mut value = TypedValue::new(1i32);
        let current = value.clone();
        assert_eq!(ReadOnly.process_on_set(&mut value, &current), EvalResult::Veto);
        assert_eq!(
            ReadOnly.as_resetable().map(|r| r.process_on_reset(&current)),
            Some(ResetResult::STOP)
        );
    }

    #[test]
    fn test_fn_modifier_defaults_to_continue() {
        let modifier = FnModifier::new().on_get(|value| {
            let doubled = value.get::<i32>().unwrap_or(0) * 2;
            let _ = value.set(doubled);
            EvalResult::Continue
        });

        let mut value = TypedValue::new(21i32);
        assert_eq!(modifier.process_on_get(&mut value), EvalResult::Continue);
        assert_eq!(value.get::<i32>(), Some(42));

        let current = value.clone();
        assert_eq!(
            modifier.process_on_set(&mut value, &current),
            EvalResult::Continue
        );
        assert!(modifier.as_resetable().is_none());
    }
}
