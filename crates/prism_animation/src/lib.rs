//! Prism Animation System
//!
//! Property animations driven by an explicit clock, with composable
//! animation modifiers.
//!
//! # Features
//!
//! - **Property Animations**: interpolate any property between two values
//! - **Modifiers**: `Speed`, `Loop` and `Reverse` reshape duration and playback
//! - **Easing**: standard easing curves
//! - **Controller**: step many animations together, optionally on a task queue
//!
//! # Example
//!
//! ```rust
//! use prism_animation::{Animation, Speed};
//! use prism_meta::{Property, TimeSpan, TypedValue};
//! use std::sync::Arc;
//!
//! let opacity = Property::with_value("Opacity", 0.0f32);
//! let mut fade = Animation::new(
//!     &opacity,
//!     TypedValue::new(0.0f32),
//!     TypedValue::new(1.0f32),
//!     TimeSpan::from_secs(10),
//! )
//! .unwrap()
//! .with_modifier(Arc::new(Speed::new(2.0)));
//!
//! assert_eq!(fade.total_duration(), TimeSpan::from_secs(5));
//! fade.start();
//! fade.step(TimeSpan::from_secs(5));
//! assert_eq!(opacity.get::<f32>(), Some(1.0));
//! ```

pub mod animation;
pub mod controller;
pub mod easing;
pub mod modifier;
pub mod values;

pub use animation::{Animation, PlayState};
pub use controller::{AnimationController, AnimationId};
pub use easing::Easing;
pub use modifier::{AnimationModifier, DurationData, Loop, Reverse, Speed, StepData};
pub use values::{interpolate_any, is_interpolable, Interpolate};
