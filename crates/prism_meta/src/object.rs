//! Meta objects and the object registry
//!
//! Classes are described with [`ClassInfo::builder`] and registered with the
//! [`ObjectRegistry`]. Creating an instance builds one [`Property`] per
//! descriptor, owned by the object. Objects expose optional behaviour through
//! a [`CapabilitySet`] queried by trait type.
//!
//! ```
//! use prism_meta::object::{ClassInfo, ObjectRegistry, PropertyFlags};
//!
//! let registry = ObjectRegistry::new();
//! let class = registry
//!     .register_class(
//!         ClassInfo::builder("docs.Light")
//!             .property("Intensity", 1.0f32)
//!             .property_with_flags("Kind", String::from("point"), PropertyFlags::READ_ONLY)
//!             .build(),
//!     )
//!     .unwrap();
//!
//! let light = registry.create(class.object_id()).unwrap();
//! light.property("Intensity").unwrap().set(2.0f32).unwrap();
//! assert_eq!(light.get_value("Intensity").unwrap().get::<f32>(), Some(2.0));
//! ```

use crate::any::{AnyType, TypedValue};
use crate::error::{MetaError, Result};
use crate::event::Event;
use crate::lock::{LockGuard, Lockable, RecursiveLock};
use crate::modifier::ReadOnly;
use crate::property::{Property, SetOutcome};
use crate::runtime;
use crate::uid::{InstanceId, ObjectId};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::any::Any;
use std::fmt;
use std::ops::BitOr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Per-property flags
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PropertyFlags(u32);

impl PropertyFlags {
    pub const NONE: PropertyFlags = PropertyFlags(0);
    /// Writes are vetoed by a [`ReadOnly`] modifier
    pub const READ_ONLY: PropertyFlags = PropertyFlags(1);
    /// Skipped by export
    pub const NO_SERIALIZE: PropertyFlags = PropertyFlags(1 << 1);

    pub const fn contains(self, other: PropertyFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn bits(self) -> u32 {
        self.0
    }
}

impl BitOr for PropertyFlags {
    type Output = PropertyFlags;

    fn bitor(self, rhs: PropertyFlags) -> PropertyFlags {
        PropertyFlags(self.0 | rhs.0)
    }
}

/// Declared property of a class
#[derive(Clone, Debug)]
pub struct PropertyDescriptor {
    pub name: String,
    pub default: TypedValue,
    pub flags: PropertyFlags,
}

/// Class metadata
#[derive(Clone, Debug)]
pub struct ClassInfo {
    object_id: ObjectId,
    name: String,
    properties: Vec<PropertyDescriptor>,
}

impl ClassInfo {
    pub fn builder(name: impl Into<String>) -> ClassInfoBuilder {
        ClassInfoBuilder {
            name: name.into(),
            object_id: None,
            properties: Vec::new(),
        }
    }

    pub fn object_id(&self) -> ObjectId {
        self.object_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn properties(&self) -> &[PropertyDescriptor] {
        &self.properties
    }

    pub fn descriptor(&self, name: &str) -> Option<&PropertyDescriptor> {
        self.properties.iter().find(|d| d.name == name)
    }
}

pub struct ClassInfoBuilder {
    name: String,
    object_id: Option<ObjectId>,
    properties: Vec<PropertyDescriptor>,
}

impl ClassInfoBuilder {
    /// Use an explicit class id instead of one derived from the name
    pub fn object_id(mut self, object_id: ObjectId) -> Self {
        self.object_id = Some(object_id);
        self
    }

    pub fn property<T: AnyType>(self, name: impl Into<String>, default: T) -> Self {
        self.property_with_flags(name, default, PropertyFlags::NONE)
    }

    pub fn property_with_flags<T: AnyType>(
        self,
        name: impl Into<String>,
        default: T,
        flags: PropertyFlags,
    ) -> Self {
        self.property_value(name, TypedValue::new(default), flags)
    }

    /// Declare a property from an already erased default
    pub fn property_value(
        mut self,
        name: impl Into<String>,
        default: TypedValue,
        flags: PropertyFlags,
    ) -> Self {
        let name = name.into();
        if self.properties.iter().any(|d| d.name == name) {
            tracing::warn!("class {} declares property {:?} twice", self.name, name);
            return self;
        }
        self.properties.push(PropertyDescriptor {
            name,
            default,
            flags,
        });
        self
    }

    pub fn build(self) -> ClassInfo {
        let object_id = self
            .object_id
            .unwrap_or_else(|| ObjectId::from_name(&self.name));
        ClassInfo {
            object_id,
            name: self.name,
            properties: self.properties,
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Optional behaviour of an object, looked up by trait type
///
/// ```
/// use prism_meta::object::CapabilitySet;
/// use std::sync::Arc;
///
/// trait Pickable: Send + Sync {
///     fn radius(&self) -> f32;
/// }
///
/// struct Sphere;
/// impl Pickable for Sphere {
///     fn radius(&self) -> f32 {
///         0.5
///     }
/// }
///
/// let caps = CapabilitySet::new();
/// caps.insert::<dyn Pickable>(Arc::new(Sphere));
/// assert_eq!(caps.get::<dyn Pickable>().map(|p| p.radius()), Some(0.5));
/// ```
#[derive(Default)]
pub struct CapabilitySet {
    entries: RwLock<FxHashMap<std::any::TypeId, Box<dyn Any + Send + Sync>>>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace the capability `C`
    pub fn insert<C: ?Sized + Send + Sync + 'static>(&self, capability: Arc<C>) {
        self.entries
            .write()
            .insert(std::any::TypeId::of::<C>(), Box::new(capability));
    }

    pub fn get<C: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<C>> {
        self.entries
            .read()
            .get(&std::any::TypeId::of::<C>())
            .and_then(|entry| entry.downcast_ref::<Arc<C>>())
            .cloned()
    }

    pub fn contains<C: ?Sized + 'static>(&self) -> bool {
        self.entries
            .read()
            .contains_key(&std::any::TypeId::of::<C>())
    }

    pub fn remove<C: ?Sized + 'static>(&self) -> bool {
        self.entries
            .write()
            .remove(&std::any::TypeId::of::<C>())
            .is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    pub fn clear(&self) {
        self.entries.write().clear();
    }
}

impl fmt::Debug for CapabilitySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CapabilitySet")
            .field("len", &self.len())
            .finish()
    }
}

// ============================================================================
// Objects
// ============================================================================

/// Live instance of a class
pub struct MetaObject {
    instance_id: InstanceId,
    class: Arc<ClassInfo>,
    properties: RwLock<Vec<(Property, PropertyFlags)>>,
    capabilities: CapabilitySet,
    lock: RecursiveLock,
    destroyed: AtomicBool,
    on_destroyed: Event<InstanceId>,
}

impl MetaObject {
    /// Instantiate `class` without registering the instance anywhere
    pub fn new(class: Arc<ClassInfo>) -> Arc<Self> {
        let instance_id = InstanceId::generate();
        let properties = class
            .properties()
            .iter()
            .map(|descriptor| {
                let property = Property::new(descriptor.name.clone(), descriptor.default.clone());
                property.set_owner(Some(instance_id));
                if descriptor.flags.contains(PropertyFlags::READ_ONLY) {
                    property.add_modifier(Arc::new(ReadOnly));
                }
                (property, descriptor.flags)
            })
            .collect();

        Arc::new(Self {
            instance_id,
            class,
            properties: RwLock::new(properties),
            capabilities: CapabilitySet::new(),
            lock: RecursiveLock::new(),
            destroyed: AtomicBool::new(false),
            on_destroyed: Event::new(),
        })
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn class(&self) -> &Arc<ClassInfo> {
        &self.class
    }

    pub fn property(&self, name: &str) -> Option<Property> {
        self.properties
            .read()
            .iter()
            .find(|(p, _)| p.name() == name)
            .map(|(p, _)| p.clone())
    }

    pub fn property_flags(&self, name: &str) -> Option<PropertyFlags> {
        self.properties
            .read()
            .iter()
            .find(|(p, _)| p.name() == name)
            .map(|(_, flags)| *flags)
    }

    /// Snapshot of the object's properties with their flags
    pub fn properties(&self) -> Vec<(Property, PropertyFlags)> {
        self.properties.read().clone()
    }

    pub fn get_value(&self, name: &str) -> Result<TypedValue> {
        self.property(name)
            .map(|p| p.get_value())
            .ok_or_else(|| MetaError::UnknownProperty(name.to_string()))
    }

    pub fn set_value(&self, name: &str, value: &TypedValue) -> Result<SetOutcome> {
        let property = self
            .property(name)
            .ok_or_else(|| MetaError::UnknownProperty(name.to_string()))?;
        property.set_value(value)
    }

    /// Attach an extra property; false if the name is taken
    pub fn add_property(&self, property: Property, flags: PropertyFlags) -> bool {
        let mut properties = self.properties.write();
        if properties.iter().any(|(p, _)| p.name() == property.name()) {
            return false;
        }
        property.set_owner(Some(self.instance_id));
        properties.push((property, flags));
        true
    }

    pub fn capabilities(&self) -> &CapabilitySet {
        &self.capabilities
    }

    /// Fired once with the instance id when the object is destroyed
    pub fn on_destroyed(&self) -> &Event<InstanceId> {
        &self.on_destroyed
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.load(Ordering::Acquire)
    }

    /// Tear the object down
    ///
    /// Runs once; later calls return false. Property stacks are cleared and
    /// ownership links dropped, so externally held properties and modifiers
    /// survive detached.
    pub fn destroy(&self) -> bool {
        if self.destroyed.swap(true, Ordering::AcqRel) {
            return false;
        }
        tracing::debug!("destroying {} ({})", self.class.name(), self.instance_id);

        self.on_destroyed.invoke(&self.instance_id);
        self.on_destroyed.clear();

        let properties = std::mem::take(&mut *self.properties.write());
        for (property, _) in &properties {
            property.clear_modifiers();
            property.set_owner(None);
        }
        self.capabilities.clear();

        if let Some(rt) = runtime::try_global() {
            rt.objects().forget(self.instance_id);
        }
        true
    }
}

impl Lockable for MetaObject {
    fn lock(&self) -> LockGuard<'_> {
        self.lock.lock()
    }

    fn lock_shared(&self) -> LockGuard<'_> {
        self.lock.lock_shared()
    }

    fn try_lock(&self) -> Option<LockGuard<'_>> {
        self.lock.try_lock()
    }
}

impl Drop for MetaObject {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl fmt::Debug for MetaObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetaObject")
            .field("instance_id", &self.instance_id)
            .field("class", &self.class.name())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

// ============================================================================
// Registry
// ============================================================================

/// Registered classes and weak handles to live instances
#[derive(Default)]
pub struct ObjectRegistry {
    classes: RwLock<FxHashMap<ObjectId, Arc<ClassInfo>>>,
    instances: RwLock<FxHashMap<InstanceId, Weak<MetaObject>>>,
}

impl ObjectRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class; a second registration of its id is rejected
    pub fn register_class(&self, class: ClassInfo) -> Result<Arc<ClassInfo>> {
        let mut classes = self.classes.write();
        if classes.contains_key(&class.object_id()) {
            tracing::warn!("rejected second registration of class {}", class.name());
            return Err(MetaError::AlreadyRegistered(class.object_id()));
        }
        tracing::debug!("registered class {} ({})", class.name(), class.object_id());
        let class = Arc::new(class);
        classes.insert(class.object_id(), class.clone());
        Ok(class)
    }

    pub fn unregister_class(&self, object_id: ObjectId) -> bool {
        self.classes.write().remove(&object_id).is_some()
    }

    pub fn class(&self, object_id: ObjectId) -> Option<Arc<ClassInfo>> {
        self.classes.read().get(&object_id).cloned()
    }

    /// Instantiate a registered class and track the instance
    pub fn create(&self, object_id: ObjectId) -> Result<Arc<MetaObject>> {
        let class = self
            .class(object_id)
            .ok_or(MetaError::Unregistered(object_id))?;
        let object = MetaObject::new(class);
        self.instances
            .write()
            .insert(object.instance_id(), Arc::downgrade(&object));
        Ok(object)
    }

    /// Look up a live instance; destroyed or dropped objects are not found
    pub fn get_object(&self, instance_id: InstanceId) -> Option<Arc<MetaObject>> {
        self.instances
            .read()
            .get(&instance_id)
            .and_then(Weak::upgrade)
            .filter(|object| !object.is_destroyed())
    }

    pub(crate) fn forget(&self, instance_id: InstanceId) {
        self.instances.write().remove(&instance_id);
    }

    /// Number of tracked instances still alive
    pub fn live_count(&self) -> usize {
        self.instances
            .read()
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    /// Drop entries of instances that no longer exist
    pub fn purge(&self) -> usize {
        let mut instances = self.instances.write();
        let before = instances.len();
        instances.retain(|_, weak| weak.strong_count() > 0);
        before - instances.len()
    }

    /// Destroy every live instance
    pub fn destroy_all(&self) {
        let live: Vec<Arc<MetaObject>> = self
            .instances
            .write()
            .drain()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect();
        for object in live {
            object.destroy();
        }
    }
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectRegistry")
            .field("classes", &self.classes.read().len())
            .field("instances", &self.instances.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MetaConfig;
    use std::sync::atomic::AtomicUsize;

    fn camera_class() -> ClassInfo {
        ClassInfo::builder("test.Camera")
            .property("Fov", 60.0f32)
            .property("Name", String::from("main"))
            .property_with_flags("Id", 7u32, PropertyFlags::READ_ONLY)
            .build()
    }

    #[test]
    fn test_builder_declares_properties() {
        let class = camera_class();
        assert_eq!(class.object_id(), ObjectId::from_name("test.Camera"));
        assert_eq!(class.properties().len(), 3);
        assert!(class
            .descriptor("Id")
            .is_some_and(|d| d.flags.contains(PropertyFlags::READ_ONLY)));

        let duplicate = ClassInfo::builder("test.Dup")
            .property("A", 1i32)
            .property("A", 2i32)
            .build();
        assert_eq!(duplicate.properties().len(), 1);
    }

    #[test]
    fn test_create_and_access_properties() {
        let registry = ObjectRegistry::new();
        let class = registry.register_class(camera_class()).unwrap();
        let camera = registry.create(class.object_id()).unwrap();

        assert_eq!(camera.get_value("Fov").unwrap().get::<f32>(), Some(60.0));
        assert_eq!(
            camera.set_value("Fov", &TypedValue::new(90.0f32)),
            Ok(SetOutcome::Changed)
        );
        assert_eq!(
            camera.set_value("Id", &TypedValue::new(9u32)),
            Ok(SetOutcome::Vetoed)
        );
        assert_eq!(
            camera.get_value("Missing"),
            Err(MetaError::UnknownProperty("Missing".into()))
        );
        let fov = camera.property("Fov").unwrap();
        assert_eq!(fov.owner(), Some(camera.instance_id()));
    }

    #[test]
    fn test_unregistered_class_fails() {
        let registry = ObjectRegistry::new();
        let id = ObjectId::from_name("test.Nothing");
        assert!(matches!(registry.create(id), Err(MetaError::Unregistered(_))));
        registry.register_class(camera_class()).unwrap();
        assert!(matches!(
            registry.register_class(camera_class()),
            Err(MetaError::AlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_destroy_runs_once() {
        let registry = ObjectRegistry::new();
        let class = registry.register_class(camera_class()).unwrap();
        let camera = registry.create(class.object_id()).unwrap();
        let fov = camera.property("Fov").unwrap();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        camera.on_destroyed().subscribe(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert!(camera.destroy());
        assert!(!camera.destroy());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(camera.is_destroyed());
        assert!(registry.get_object(camera.instance_id()).is_none());

        // Externally held property survives, detached
        assert_eq!(fov.owner(), None);
        assert_eq!(fov.get::<f32>(), Some(60.0));
    }

    #[test]
    fn test_drop_triggers_destroy() {
        let registry = ObjectRegistry::new();
        let class = registry.register_class(camera_class()).unwrap();
        let camera = registry.create(class.object_id()).unwrap();
        let id = camera.instance_id();

        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        camera.on_destroyed().subscribe(move |destroyed| {
            assert_eq!(*destroyed, id);
            f.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(registry.live_count(), 1);
        drop(camera);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(registry.live_count(), 0);
        assert_eq!(registry.purge(), 1);
        assert!(registry.get_object(id).is_none());
    }

    trait Renderable: Send + Sync {
        fn triangles(&self) -> u32;
    }

    struct Mesh(u32);

    impl Renderable for Mesh {
        fn triangles(&self) -> u32 {
            self.0
        }
    }

    #[test]
    fn test_capabilities() {
        let object = MetaObject::new(Arc::new(camera_class()));
        assert!(!object.capabilities().contains::<dyn Renderable>());

        object.capabilities().insert::<dyn Renderable>(Arc::new(Mesh(12)));
        let renderable = object.capabilities().get::<dyn Renderable>().unwrap();
        assert_eq!(renderable.triangles(), 12);
        assert!(object.capabilities().get::<Mesh>().is_none());

        assert!(object.capabilities().remove::<dyn Renderable>());
        assert!(object.capabilities().is_empty());
    }

    #[test]
    fn test_object_lock_is_reentrant() {
        let object = MetaObject::new(Arc::new(camera_class()));
        let _outer = object.lock();
        let _inner = object.lock();
    }

    #[test]
    fn test_owner_resolves_through_global_registry() {
        let rt = runtime::init_global(MetaConfig::default());
        let class = rt
            .objects()
            .register_class(ClassInfo::builder("test.OwnedLight").property("On", true).build())
            .unwrap();
        let light = rt.objects().create(class.object_id()).unwrap();
        let on = light.property("On").unwrap();

        let owner = on.owner_object().unwrap();
        assert_eq!(owner.instance_id(), light.instance_id());
        drop(owner);

        light.destroy();
        assert!(on.owner_object().is_none());
    }
}
