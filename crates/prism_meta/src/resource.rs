//! Dynamic resources
//!
//! Resources such as images and shaders reload at runtime. They announce
//! reloads through an `OnChanged` event, so a [`Bind`](crate::bind::Bind)
//! can depend on a resource with [`Bind::add_notifier`](crate::bind::Bind::add_notifier)
//! exactly as on a property.

use crate::event::{Notifier, OnChanged};
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A resource that can change after creation
pub trait DynamicResource: Notifier {
    fn resource_name(&self) -> &str;

    /// Number of reloads so far
    fn generation(&self) -> u64;

    /// Fired after each reload
    fn on_resource_changed(&self) -> &OnChanged {
        self.on_changed()
    }
}

/// Reloadable resource holding data of type `T`
pub struct ResourceSlot<T> {
    name: String,
    data: RwLock<Arc<T>>,
    generation: AtomicU64,
    changed: OnChanged,
}

impl<T: Send + Sync> ResourceSlot<T> {
    pub fn new(name: impl Into<String>, data: T) -> Self {
        Self {
            name: name.into(),
            data: RwLock::new(Arc::new(data)),
            generation: AtomicU64::new(0),
            changed: OnChanged::new(),
        }
    }

    /// Current data; readers keep their snapshot across reloads
    pub fn get(&self) -> Arc<T> {
        self.data.read().clone()
    }

    /// Replace the data and notify subscribers
    pub fn reload(&self, data: T) {
        *self.data.write() = Arc::new(data);
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!("resource {} reloaded (generation {})", self.name, generation);
        self.changed.invoke(&());
    }
}

impl<T: Send + Sync> Notifier for ResourceSlot<T> {
    fn on_changed(&self) -> &OnChanged {
        &self.changed
    }
}

impl<T: Send + Sync> DynamicResource for ResourceSlot<T> {
    fn resource_name(&self) -> &str {
        &self.name
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for ResourceSlot<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceSlot")
            .field("name", &self.name)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::any::TypedValue;
    use crate::bind::BindTarget;
    use crate::property::Property;

    #[test]
    fn test_reload_bumps_generation_and_notifies() {
        let slot = ResourceSlot::new("shaders/pbr.wgsl", String::from("v1"));
        let seen = Arc::new(AtomicU64::new(0));
        let s = seen.clone();
        slot.on_resource_changed().subscribe(move |_| {
            s.fetch_add(1, Ordering::SeqCst);
        });

        let before = slot.get();
        slot.reload(String::from("v2"));
        assert_eq!(slot.generation(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(before.as_str(), "v1");
        assert_eq!(slot.get().as_str(), "v2");
        assert_eq!(slot.resource_name(), "shaders/pbr.wgsl");
    }

    #[test]
    fn test_bind_follows_resource_reload() {
        let texture = Arc::new(ResourceSlot::new("textures/albedo.png", (256u32, 256u32)));
        let width = Property::with_value("TextureWidth", 0u32);

        let source = texture.clone();
        let bind = width
            .bind_to(BindTarget::function(move || TypedValue::new(source.get().0)))
            .unwrap();
        let notifier: Arc<dyn Notifier> = texture.clone();
        assert!(bind.add_notifier(&notifier));
        assert_eq!(width.get::<u32>(), Some(256));

        texture.reload((1024, 512));
        assert!(bind.is_dirty());
        assert_eq!(width.get::<u32>(), Some(1024));
    }
}
