//! Animation modifiers
//!
//! An [`AnimationModifier`] intercepts the duration and per-frame step of an
//! animation without touching the animation itself. Modifiers run in
//! attachment order, each one seeing the output of the previous one.
//!
//! Modifier parameters are properties, so they can be bound or animated
//! like any other value; an animation reads them afresh on every step.

use prism_meta::{TimeSpan, TypedProperty};

/// Duration of one loop plus the number of loops
///
/// `loop_count` of 0 means the animation never plays a frame; a negative
/// count repeats without bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DurationData {
    pub duration: TimeSpan,
    pub loop_count: i32,
}

impl DurationData {
    pub fn new(duration: TimeSpan) -> Self {
        Self {
            duration,
            loop_count: 1,
        }
    }

    pub fn is_unbounded(&self) -> bool {
        self.loop_count < 0
    }

    /// Total play time across all loops
    pub fn total(&self) -> TimeSpan {
        match self.loop_count {
            0 => TimeSpan::ZERO,
            n if n < 0 => TimeSpan::INFINITE,
            n => self.duration.scale(f64::from(n)),
        }
    }
}

/// Progress within the current loop
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StepData {
    /// Linear progress in [0, 1]
    pub progress: f32,
    /// Whether the step plays backwards
    pub reverse: bool,
}

impl StepData {
    pub fn new(progress: f32) -> Self {
        Self {
            progress,
            reverse: false,
        }
    }
}

pub trait AnimationModifier: Send + Sync {
    fn process_on_get_duration(&self, _duration: &mut DurationData) {}

    fn process_on_step(&self, _step: &mut StepData) {}

    fn name(&self) -> &str {
        "AnimationModifier"
    }
}

fn reverse_step(step: &mut StepData) {
    step.progress = 1.0 - step.progress;
    step.reverse = !step.reverse;
}

// ============================================================================
// Speed
// ============================================================================

/// Scales playback speed
///
/// A factor of 0 makes the duration infinite. A negative factor plays at
/// `|factor|` in reverse.
#[derive(Debug)]
pub struct Speed {
    speed_factor: TypedProperty<f32>,
}

impl Speed {
    pub fn new(factor: f32) -> Self {
        Self {
            speed_factor: TypedProperty::new("SpeedFactor", factor),
        }
    }

    pub fn speed_factor(&self) -> &TypedProperty<f32> {
        &self.speed_factor
    }

    pub fn set_speed_factor(&self, factor: f32) {
        if let Err(err) = self.speed_factor.set(factor) {
            tracing::warn!("failed to set speed factor: {}", err);
        }
    }
}

impl Default for Speed {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl AnimationModifier for Speed {
    fn process_on_get_duration(&self, duration: &mut DurationData) {
        let factor = self.speed_factor.get();
        if factor == 0.0 {
            duration.duration = TimeSpan::INFINITE;
        } else if duration.duration.is_finite() {
            duration.duration = duration.duration.scale(1.0 / f64::from(factor.abs()));
        }
    }

    fn process_on_step(&self, step: &mut StepData) {
        if self.speed_factor.get() < 0.0 {
            reverse_step(step);
        }
    }

    fn name(&self) -> &str {
        "Speed"
    }
}

// ============================================================================
// Loop
// ============================================================================

/// Repeats the animation
///
/// Counts multiply with the counts of earlier modifiers. -1 repeats without
/// bound and absorbs every non-zero count.
#[derive(Debug)]
pub struct Loop {
    loop_count: TypedProperty<i32>,
}

impl Loop {
    pub const INDEFINITE: i32 = -1;

    pub fn new(count: i32) -> Self {
        Self {
            loop_count: TypedProperty::new("LoopCount", count),
        }
    }

    pub fn loop_count(&self) -> &TypedProperty<i32> {
        &self.loop_count
    }

    pub fn set_loop_count(&self, count: i32) {
        if let Err(err) = self.loop_count.set(count) {
            tracing::warn!("failed to set loop count: {}", err);
        }
    }

    pub fn loop_indefinitely(&self) {
        self.set_loop_count(Self::INDEFINITE);
    }
}

impl Default for Loop {
    fn default() -> Self {
        Self::new(1)
    }
}

impl AnimationModifier for Loop {
    fn process_on_get_duration(&self, duration: &mut DurationData) {
        let count = self.loop_count.get();
        duration.loop_count = if count == 0 || duration.loop_count == 0 {
            0
        } else if count < 0 || duration.loop_count < 0 {
            Self::INDEFINITE
        } else {
            duration.loop_count.saturating_mul(count)
        };
    }

    fn name(&self) -> &str {
        "Loop"
    }
}

// ============================================================================
// Reverse
// ============================================================================

/// Plays the animation backwards
#[derive(Clone, Copy, Debug, Default)]
pub struct Reverse;

impl AnimationModifier for Reverse {
    fn process_on_step(&self, step: &mut StepData) {
        reverse_step(step);
    }

    fn name(&self) -> &str {
        "Reverse"
    }
}
