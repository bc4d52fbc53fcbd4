//! Runtime configuration
//!
//! `MetaConfig` is read from a `prism.toml`-style file. Every section and
//! field is optional and falls back to its default.
//!
//! ```toml
//! [logging]
//! filter = "prism_meta=debug,info"
//!
//! [register]
//! builtin_types = true
//!
//! [task_queue]
//! thread_name = "prism-queue"
//!
//! [animation]
//! frame_interval_ms = 16
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading a configuration file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Top-level configuration
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MetaConfig {
    pub logging: LoggingConfig,
    pub register: RegisterConfig,
    pub task_queue: TaskQueueConfig,
    pub animation: AnimationConfig,
}

impl MetaConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Load from a file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Load from `path` if it exists, otherwise use defaults
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!("no config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }
}

/// Logging section
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, used unless `RUST_LOG` is set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

/// Property register section
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct RegisterConfig {
    /// Register primitive value types and their compatibility pairs at init
    pub builtin_types: bool,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            builtin_types: true,
        }
    }
}

/// Task queue section
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TaskQueueConfig {
    /// Worker thread name for threaded queues
    pub thread_name: String,
}

impl Default for TaskQueueConfig {
    fn default() -> Self {
        Self {
            thread_name: "prism-queue".to_string(),
        }
    }
}

/// Animation section
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnimationConfig {
    /// Fixed step used by animation controllers
    pub frame_interval_ms: u64,
}

impl AnimationConfig {
    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            frame_interval_ms: 16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = MetaConfig::from_toml_str("").unwrap();
        assert_eq!(config, MetaConfig::default());
        assert_eq!(config.logging.filter, "info");
        assert!(config.register.builtin_types);
        assert_eq!(config.animation.frame_interval(), Duration::from_millis(16));
    }

    #[test]
    fn test_partial_sections() {
        let config = MetaConfig::from_toml_str(
            r#"
            [task_queue]
            thread_name = "render"

            [animation]
            frame_interval_ms = 8
            "#,
        )
        .unwrap();
        assert_eq!(config.task_queue.thread_name, "render");
        assert_eq!(config.animation.frame_interval_ms, 8);
        assert_eq!(config.logging, LoggingConfig::default());
    }

    #[test]
    fn test_parse_error() {
        let err = MetaConfig::from_toml_str("[logging]\nfilter = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_and_round_trip_file() {
        let path = std::env::temp_dir().join(format!("prism-config-{}.toml", std::process::id()));
        let mut config = MetaConfig::default();
        config.logging.filter = "debug".to_string();
        fs::write(&path, config.to_toml_string().unwrap()).unwrap();

        let loaded = MetaConfig::load(&path).unwrap();
        assert_eq!(loaded, config);
        fs::remove_file(&path).unwrap();

        assert!(matches!(MetaConfig::load(&path), Err(ConfigError::Io { .. })));
        assert_eq!(MetaConfig::load_or_default(&path).unwrap(), MetaConfig::default());
    }
}
