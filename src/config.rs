//! Configuration System
//!
//! Layered configuration for the resolver's cache and for logging. Built-in defaults are
//! overridden by a global config file, then workspace config files, then environment
//! variables (see [`ConfigLoader`]).

use crate::logging::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

mod facade;
mod merge;
mod sources;

pub use facade::ConfigLoader;

/// Prefix of environment variable overrides, e.g. `CONTEXT_RESOLUTION__CACHE__USE_LOCAL_CACHE`.
pub const ENV_PREFIX: &str = "CONTEXT_RESOLUTION";

/// Selects the environment-specific workspace file `config/{name}.toml`.
pub const ENV_NAME_VAR: &str = "CONTEXT_RESOLUTION_ENV";

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResolutionConfig {
    /// Cache tiers used by the resolver
    #[serde(default)]
    pub cache: CacheOptions,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Options of the tiered cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheOptions {
    /// Use the in-process cache tier
    #[serde(default = "default_true")]
    pub use_local_cache: bool,

    /// Use the distributed cache tier
    #[serde(default)]
    pub use_distributed_cache: bool,

    /// Rough size limit of the local tier, measured in serialized bytes
    #[serde(default = "default_local_size_limit")]
    pub local_size_limit: Option<u64>,

    /// Local entries not read for this long are evicted
    #[serde(default = "default_local_sliding_expiration_secs")]
    pub local_sliding_expiration_secs: Option<u64>,

    /// Distributed entries not read for this long may be evicted
    #[serde(default = "default_distributed_sliding_expiration_secs")]
    pub distributed_sliding_expiration_secs: Option<u64>,
}

fn default_true() -> bool {
    true
}

pub(crate) fn default_local_size_limit() -> Option<u64> {
    Some(2 * 1024 * 1024 * 1024)
}

pub(crate) fn default_local_sliding_expiration_secs() -> Option<u64> {
    Some(60)
}

pub(crate) fn default_distributed_sliding_expiration_secs() -> Option<u64> {
    Some(900)
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            use_local_cache: default_true(),
            use_distributed_cache: false,
            local_size_limit: default_local_size_limit(),
            local_sliding_expiration_secs: default_local_sliding_expiration_secs(),
            distributed_sliding_expiration_secs: default_distributed_sliding_expiration_secs(),
        }
    }
}

impl CacheOptions {
    /// Options with both tiers disabled
    pub fn disabled() -> Self {
        Self {
            use_local_cache: false,
            use_distributed_cache: false,
            ..Self::default()
        }
    }

    pub fn local_sliding_expiration(&self) -> Option<Duration> {
        self.local_sliding_expiration_secs.map(Duration::from_secs)
    }

    pub fn distributed_sliding_expiration(&self) -> Option<Duration> {
        self.distributed_sliding_expiration_secs
            .map(Duration::from_secs)
    }

    /// Validate cache options
    pub fn validate(&self) -> Result<(), String> {
        if self.local_size_limit == Some(0) {
            return Err("Local size limit cannot be zero".to_string());
        }
        if self.local_sliding_expiration_secs == Some(0) {
            return Err("Local sliding expiration cannot be zero".to_string());
        }
        if self.distributed_sliding_expiration_secs == Some(0) {
            return Err("Distributed sliding expiration cannot be zero".to_string());
        }
        Ok(())
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Cache(String),
    Logging(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Cache(msg) => write!(f, "Cache: {}", msg),
            ValidationError::Logging(msg) => write!(f, "Logging: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl ResolutionConfig {
    /// Validate the entire configuration
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.cache.validate() {
            errors.push(ValidationError::Cache(e));
        }

        if !matches!(self.logging.format.as_str(), "text" | "json") {
            errors.push(ValidationError::Logging(format!(
                "Invalid log format: {}",
                self.logging.format
            )));
        }
        if !matches!(self.logging.output.as_str(), "stdout" | "stderr" | "file") {
            errors.push(ValidationError::Logging(format!(
                "Invalid log output: {}",
                self.logging.output
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
