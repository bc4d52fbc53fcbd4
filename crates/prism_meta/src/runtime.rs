//! Process-wide runtime
//!
//! The [`MetaRuntime`] owns the global [`PropertyRegister`] and
//! [`ObjectRegistry`]. It is created by [`init_global`] and torn down by
//! [`shutdown_global`]. Using [`global`] before initialization is an
//! unrecoverable error: it logs and panics.

use crate::config::MetaConfig;
use crate::error::{MetaError, Result};
use crate::object::ObjectRegistry;
use crate::register::PropertyRegister;
use parking_lot::{const_rwlock, RwLock};
use std::sync::Arc;

static GLOBAL: RwLock<Option<Arc<MetaRuntime>>> = const_rwlock(None);

/// Global registries and configuration
pub struct MetaRuntime {
    config: MetaConfig,
    register: PropertyRegister,
    objects: ObjectRegistry,
}

impl MetaRuntime {
    pub fn new(config: MetaConfig) -> Self {
        let register = if config.register.builtin_types {
            PropertyRegister::with_builtin_types()
        } else {
            PropertyRegister::new()
        };
        Self {
            config,
            register,
            objects: ObjectRegistry::new(),
        }
    }

    pub fn config(&self) -> &MetaConfig {
        &self.config
    }

    pub fn register(&self) -> &PropertyRegister {
        &self.register
    }

    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }
}

impl std::fmt::Debug for MetaRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetaRuntime")
            .field("types", &self.register.len())
            .field("objects", &self.objects)
            .finish()
    }
}

/// Initialize the global runtime
///
/// Idempotent: when a runtime already exists it is returned and `config` is
/// ignored.
pub fn init_global(config: MetaConfig) -> Arc<MetaRuntime> {
    if let Some(existing) = GLOBAL.read().as_ref() {
        return existing.clone();
    }

    let mut global = GLOBAL.write();
    if let Some(existing) = global.as_ref() {
        return existing.clone();
    }
    let runtime = Arc::new(MetaRuntime::new(config));
    tracing::debug!(
        "meta runtime initialized with {} types",
        runtime.register().len()
    );
    *global = Some(runtime.clone());
    runtime
}

/// Tear down the global runtime, destroying live objects
///
/// Returns false if no runtime was initialized.
pub fn shutdown_global() -> bool {
    let Some(runtime) = GLOBAL.write().take() else {
        return false;
    };
    runtime.objects().destroy_all();
    tracing::debug!("meta runtime shut down");
    true
}

/// The global runtime, if initialized
pub fn try_global() -> Option<Arc<MetaRuntime>> {
    GLOBAL.read().clone()
}

/// The global runtime, or [`MetaError::NotInitialized`]
pub fn checked_global() -> Result<Arc<MetaRuntime>> {
    try_global().ok_or(MetaError::NotInitialized)
}

/// The global runtime
///
/// # Panics
///
/// Panics if [`init_global`] has not been called.
pub fn global() -> Arc<MetaRuntime> {
    match try_global() {
        Some(runtime) => runtime,
        None => {
            tracing::error!("meta runtime used before init_global");
            panic!("meta runtime not initialized: call prism_meta::runtime::init_global first");
        }
    }
}

/// Install a tracing subscriber using the configured filter
///
/// `RUST_LOG` takes precedence over the configured directive. Does nothing
/// if a global subscriber is already installed.
#[cfg(feature = "subscriber")]
pub fn init_tracing(config: &crate::config::LoggingConfig) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.filter));
    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
