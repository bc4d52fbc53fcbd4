//! Error types for prism_meta

use crate::uid::{ObjectId, TypeId};
use thiserror::Error;

/// Errors returned by value, property, bind and task queue operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetaError {
    /// A value or bind target does not match the declared type
    #[error("incompatible type: expected {expected}, got {actual}")]
    IncompatibleType { expected: TypeId, actual: TypeId },

    /// Adding a dependency would create a cycle
    #[error("dependency would create a cycle")]
    CycleDetected,

    /// The id is not known to the registry
    #[error("{0} is not registered")]
    Unregistered(ObjectId),

    /// The id was registered before
    #[error("{0} is already registered")]
    AlreadyRegistered(ObjectId),

    /// No property with this name exists on the object
    #[error("unknown property: {0}")]
    UnknownProperty(String),

    /// The promise was fulfilled without a value
    #[error("promise abandoned")]
    Abandoned,

    /// A task was submitted to a queue after shutdown
    #[error("task queue has been shut down")]
    QueueShutdown,

    /// A value could not be exported or imported
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The global runtime has not been initialized
    #[error("meta runtime not initialized")]
    NotInitialized,
}

/// Result type for prism_meta operations
pub type Result<T> = std::result::Result<T, MetaError>;
