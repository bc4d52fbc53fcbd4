//! Property animations
//!
//! An [`Animation`] drives one property from a start value to an end value.
//! Time advances only through [`Animation::step`], so the caller decides the
//! clock. The modifier chain is consulted on every step, so changing a
//! modifier's parameters takes effect on the next frame.

use crate::easing::Easing;
use crate::modifier::{AnimationModifier, DurationData, StepData};
use crate::values::interpolate_any;
use prism_meta::{
    types_compatible, Event, MetaError, Property, Result, TimeSpan, TypedValue, WeakProperty,
};
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Playback state of an animation
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlayState {
    #[default]
    Idle,
    Running,
    Finished,
}

/// Animates a property between two values
pub struct Animation {
    target: WeakProperty,
    from: TypedValue,
    to: TypedValue,
    duration: TimeSpan,
    easing: Easing,
    modifiers: SmallVec<[Arc<dyn AnimationModifier>; 2]>,
    elapsed: TimeSpan,
    progress: f32,
    state: PlayState,
    on_finished: Event<()>,
}

impl Animation {
    /// Animate `target` from `from` to `to` over `duration`
    ///
    /// Both values must be compatible with the property's type. Values
    /// without an interpolation switch to `to` on the last frame.
    pub fn new(target: &Property, from: TypedValue, to: TypedValue, duration: TimeSpan) -> Result<Self> {
        for value in [&from, &to] {
            if !types_compatible(value.type_id(), target.type_id()) {
                return Err(MetaError::IncompatibleType {
                    expected: target.type_id(),
                    actual: value.type_id(),
                });
            }
        }
        Ok(Self {
            target: target.downgrade(),
            from,
            to,
            duration,
            easing: Easing::Linear,
            modifiers: SmallVec::new(),
            elapsed: TimeSpan::ZERO,
            progress: 0.0,
            state: PlayState::Idle,
            on_finished: Event::new(),
        })
    }

    pub fn with_easing(mut self, easing: Easing) -> Self {
        self.easing = easing;
        self
    }

    pub fn with_modifier(mut self, modifier: Arc<dyn AnimationModifier>) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn add_modifier(&mut self, modifier: Arc<dyn AnimationModifier>) {
        self.modifiers.push(modifier);
    }

    pub fn remove_modifier(&mut self, modifier: &Arc<dyn AnimationModifier>) -> bool {
        let before = self.modifiers.len();
        let removed = Arc::as_ptr(modifier) as *const ();
        self.modifiers
            .retain(|m| !std::ptr::eq(Arc::as_ptr(m) as *const (), removed));
        self.modifiers.len() != before
    }

    pub fn modifiers(&self) -> &[Arc<dyn AnimationModifier>] {
        &self.modifiers
    }

    pub fn target(&self) -> Option<Property> {
        self.target.upgrade()
    }

    /// Base duration of one loop, before modifiers
    pub fn duration(&self) -> TimeSpan {
        self.duration
    }

    /// Loop duration and count after the modifier chain
    pub fn duration_data(&self) -> DurationData {
        let mut data = DurationData::new(self.duration);
        for modifier in &self.modifiers {
            modifier.process_on_get_duration(&mut data);
        }
        data
    }

    /// Total play time after the modifier chain
    pub fn total_duration(&self) -> TimeSpan {
        self.duration_data().total()
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == PlayState::Running
    }

    /// Progress of the last frame, after modifiers
    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn elapsed(&self) -> TimeSpan {
        self.elapsed
    }

    /// Fired once when the animation plays to its end
    ///
    /// Handlers run inside [`Animation::step`].
    pub fn on_finished(&self) -> &Event<()> {
        &self.on_finished
    }

    /// Start from the beginning
    pub fn start(&mut self) {
        self.elapsed = TimeSpan::ZERO;
        self.progress = 0.0;
        self.state = PlayState::Running;
    }

    /// Stop without finishing; the property keeps its current value
    pub fn stop(&mut self) {
        if self.state == PlayState::Running {
            self.state = PlayState::Idle;
        }
    }

    /// Advance by `dt` and write the new frame
    ///
    /// Returns true while the animation keeps running.
    pub fn step(&mut self, dt: TimeSpan) -> bool {
        if self.state != PlayState::Running {
            return false;
        }
        let Some(target) = self.target.upgrade() else {
            tracing::debug!("animation target dropped, stopping");
            self.state = PlayState::Idle;
            return false;
        };

        let data = self.duration_data();
        if data.loop_count == 0 {
            self.finish();
            return false;
        }

        self.elapsed = self.elapsed + dt;
        let (linear, done) = Self::loop_progress(&data, self.elapsed);

        let mut step = StepData::new(linear);
        for modifier in &self.modifiers {
            modifier.process_on_step(&mut step);
        }
        self.progress = step.progress;
        self.write_frame(&target, step.progress);

        if done {
            self.finish();
            return false;
        }
        true
    }

    /// Linear progress in the current loop and whether play is complete
    fn loop_progress(data: &DurationData, elapsed: TimeSpan) -> (f32, bool) {
        if data.duration.is_infinite() {
            return (0.0, false);
        }
        let per_loop = data.duration.as_micros();
        if per_loop <= 0 {
            return (1.0, !data.is_unbounded());
        }

        let elapsed = elapsed.as_micros();
        let completed = elapsed / per_loop;
        if !data.is_unbounded() && completed >= i64::from(data.loop_count) {
            return (1.0, true);
        }
        let within = elapsed % per_loop;
        ((within as f64 / per_loop as f64) as f32, false)
    }

    fn write_frame(&self, target: &Property, progress: f32) {
        let t = self.easing.apply(progress);
        let value = interpolate_any(&self.from, &self.to, t).unwrap_or_else(|| {
            if t >= 1.0 {
                self.to.clone()
            } else {
                self.from.clone()
            }
        });
        if let Err(err) = target.set_value(&value) {
            tracing::warn!("animation failed to write {:?}: {}", target.name(), err);
        }
    }

    // Progress keeps the last frame written
    fn finish(&mut self) {
        self.state = PlayState::Finished;
        self.on_finished.invoke(&());
    }
}

impl fmt::Debug for Animation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Animation")
            .field("target", &self.target)
            .field("duration", &self.duration)
            .field("easing", &self.easing)
            .field("modifiers", &self.modifiers.len())
            .field("state", &self.state)
            .field("progress", &self.progress)
            .finish()
    }
}
