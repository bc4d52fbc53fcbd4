//! Animation controller
//!
//! Owns a set of animations and steps them together. Cloning a controller
//! yields another handle to the same set. Animations are stepped with the
//! set unlocked, so `on_changed` and `on_finished` handlers may call back
//! into the controller.

use crate::animation::Animation;
use parking_lot::Mutex;
use prism_meta::config::AnimationConfig;
use prism_meta::{Future, Result, TaskQueue, TaskQueueExt, TimeSpan};
use slotmap::{new_key_type, SlotMap};
use std::sync::Arc;

new_key_type! {
    /// Handle to an animation registered with a controller
    pub struct AnimationId;
}

impl AnimationId {
    /// Convert to raw u64
    pub fn to_raw(self) -> u64 {
        self.0.as_ffi()
    }

    /// Reconstruct from a value returned by `to_raw()`
    pub fn from_raw(raw: u64) -> Self {
        AnimationId::from(slotmap::KeyData::from_ffi(raw))
    }
}

type SharedAnimation = Arc<Mutex<Animation>>;

#[derive(Clone)]
pub struct AnimationController {
    animations: Arc<Mutex<SlotMap<AnimationId, SharedAnimation>>>,
    frame_interval: TimeSpan,
}

impl AnimationController {
    pub fn new() -> Self {
        Self::from_config(&AnimationConfig::default())
    }

    pub fn from_config(config: &AnimationConfig) -> Self {
        Self {
            animations: Arc::new(Mutex::new(SlotMap::with_key())),
            frame_interval: TimeSpan::from(config.frame_interval()),
        }
    }

    pub fn frame_interval(&self) -> TimeSpan {
        self.frame_interval
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an animation without starting it
    pub fn add(&self, animation: Animation) -> AnimationId {
        self.animations.lock().insert(Arc::new(Mutex::new(animation)))
    }

    /// Register and start an animation
    pub fn play(&self, mut animation: Animation) -> AnimationId {
        animation.start();
        self.add(animation)
    }

    /// Unregister an animation; the property keeps its current value
    pub fn remove(&self, id: AnimationId) -> bool {
        self.animations.lock().remove(id).is_some()
    }

    pub fn contains(&self, id: AnimationId) -> bool {
        self.animations.lock().contains_key(id)
    }

    /// Run `f` against a registered animation
    ///
    /// `f` must not step this controller.
    pub fn with_animation<F, R>(&self, id: AnimationId, f: F) -> Option<R>
    where
        F: FnOnce(&mut Animation) -> R,
    {
        let animation = self.animations.lock().get(id).cloned()?;
        let mut guard = animation.lock();
        Some(f(&mut guard))
    }

    pub fn start(&self, id: AnimationId) -> bool {
        self.with_animation(id, Animation::start).is_some()
    }

    pub fn stop(&self, id: AnimationId) -> bool {
        self.with_animation(id, Animation::stop).is_some()
    }

    pub fn is_running(&self, id: AnimationId) -> bool {
        self.with_animation(id, |a| a.is_running()).unwrap_or(false)
    }

    pub fn len(&self) -> usize {
        self.animations.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.animations.lock().is_empty()
    }

    pub fn running_count(&self) -> usize {
        self.snapshot()
            .iter()
            .filter(|(_, animation)| animation.lock().is_running())
            .count()
    }

    // =========================================================================
    // Stepping
    // =========================================================================

    fn snapshot(&self) -> Vec<(AnimationId, SharedAnimation)> {
        self.animations
            .lock()
            .iter()
            .map(|(id, animation)| (id, animation.clone()))
            .collect()
    }

    /// Advance every running animation by `dt`
    ///
    /// Returns the number still running afterwards.
    pub fn step(&self, dt: TimeSpan) -> usize {
        let mut running = 0;
        for (id, animation) in self.snapshot() {
            // Skips animations already being stepped on another thread
            let Some(mut guard) = animation.try_lock() else {
                tracing::trace!("animation {:?} busy, skipping frame", id);
                continue;
            };
            if guard.step(dt) {
                running += 1;
            }
        }
        running
    }

    /// Advance by one configured frame interval
    pub fn tick(&self) -> usize {
        self.step(self.frame_interval)
    }

    /// Step on `queue`, inline when already running on it
    pub fn step_on(&self, queue: &dyn TaskQueue, dt: TimeSpan) -> Result<Future<usize>> {
        let controller = self.clone();
        queue.add_future_task_or_run_directly(move || controller.step(dt))
    }
}

impl Default for AnimationController {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for AnimationController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnimationController")
            .field("animations", &self.len())
            .field("frame_interval", &self.frame_interval)
            .finish()
    }
}
