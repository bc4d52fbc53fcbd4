//! Prism Meta-Object Runtime
//!
//! This crate provides the property system the rest of Prism is built on:
//!
//! - **Typed Values**: type-erased values with a runtime compatibility table
//! - **Properties**: observable values with a modifier stack and reset support
//! - **Binds**: lazily evaluated, cycle-checked property expressions
//! - **Events**: snapshot-delivered subscriber lists
//! - **Task Queues**: single-threaded execution contexts with promises and futures
//! - **Objects**: class metadata, capability sets and a live-object registry
//!
//! # Example
//!
//! ```rust
//! use prism_meta::{BindTarget, Property};
//!
//! let width = Property::with_value("Width", 10.0f32);
//! let area = Property::with_value("Area", 0.0f32);
//!
//! let w = width.clone();
//! area.bind_to(BindTarget::function(move || {
//!     let side = w.get::<f32>().unwrap_or(0.0);
//!     prism_meta::TypedValue::new(side * side)
//! }))
//! .unwrap();
//!
//! assert_eq!(area.get::<f32>(), Some(100.0));
//! width.set(3.0f32).unwrap();
//! assert_eq!(area.get::<f32>(), Some(9.0));
//! ```

pub mod any;
pub mod bind;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod future;
pub mod lock;
pub mod modifier;
pub mod object;
pub mod property;
pub mod register;
pub mod resource;
pub mod runtime;
pub mod serialize;
pub mod task_queue;
pub mod time_span;
mod tracking;
pub mod uid;

pub use any::{types_compatible, AnyType, TypedValue};
pub use bind::{Bind, BindTarget};
pub use config::{ConfigError, MetaConfig};
pub use engine::{EngineValueAccess, EngineValueManager, EngineValueModifier, TypeDeclaration};
pub use error::{MetaError, Result};
pub use event::{Event, EventToken, Notifier, OnChanged};
pub use future::{channel, Future, Promise};
pub use lock::{Lockable, LockGuard, ObjectLock, RecursiveLock};
pub use modifier::{EvalResult, FnModifier, Modifier, ReadOnly, ResetResult, StackResetable};
pub use object::{
    CapabilitySet, ClassInfo, ClassInfoBuilder, MetaObject, ObjectRegistry, PropertyDescriptor,
    PropertyFlags,
};
pub use property::{Property, SetOutcome, TypedProperty, WeakProperty};
pub use register::{create_property, AnyBuilder, CompatibilityTable, PropertyRegister, TypedAnyBuilder};
pub use resource::{DynamicResource, ResourceSlot};
pub use runtime::MetaRuntime;
pub use serialize::{ExportContext, ImportContext, Serializable, TomlExporter, TomlImporter};
pub use task_queue::{current_queue, PollingTaskQueue, Task, TaskQueue, TaskQueueExt, ThreadedTaskQueue};
pub use time_span::TimeSpan;
pub use uid::{InstanceId, ObjectId, TypeId, Uid};
