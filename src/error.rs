//! Error types for the context resolution system.
//!
//! Every failure a caller can observe from a resolution belongs to [`ResolutionError`], so callers
//! can catch broadly (any `ResolutionError`) or narrowly (match a variant or an [`ErrorKind`]).

use crate::key::ContextKey;
use crate::name::ContextName;
use std::sync::Arc;
use thiserror::Error;

/// Shared, cloneable cause attached to [`ResolutionError::SourceFailed`].
pub type SharedCause = Arc<dyn std::error::Error + Send + Sync + 'static>;

/// Cache tier errors
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Cache tier '{tier}' failed: {message}")]
    Tier { tier: String, message: String },

    #[error("Invalid cache entry for {key}: {message}")]
    InvalidEntry { key: String, message: String },
}

/// Coarse classification of a [`ResolutionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NameAmbiguous,
    NameNotFound,
    InvalidArgument,
    CircularDependency,
    SourceNotFound,
    SourceFailed,
    Cancelled,
    Cache,
    Config,
}

/// Resolution errors
#[derive(Debug, Clone, Error)]
pub enum ResolutionError {
    #[error(
        "Context name '{}' is ambiguous; it matches types {}",
        .aliases.join("|"),
        .types.join(", ")
    )]
    NameAmbiguous {
        aliases: Vec<String>,
        types: Vec<String>,
    },

    #[error("Context name not found: {0}")]
    NameNotFound(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Circular dependency detected: {}", format_chain(.path, .requested))]
    CircularDependency {
        path: Vec<ContextKey>,
        requested: ContextKey,
    },

    #[error("No context source found for context '{0}'")]
    SourceNotFound(ContextName),

    #[error("Context source '{source_name}' failed: {cause}")]
    SourceFailed {
        source_name: String,
        #[source]
        cause: SharedCause,
    },

    #[error("Context resolution was cancelled")]
    Cancelled,

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ResolutionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ResolutionError::NameAmbiguous { .. } => ErrorKind::NameAmbiguous,
            ResolutionError::NameNotFound(_) => ErrorKind::NameNotFound,
            ResolutionError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ResolutionError::CircularDependency { .. } => ErrorKind::CircularDependency,
            ResolutionError::SourceNotFound(_) => ErrorKind::SourceNotFound,
            ResolutionError::SourceFailed { .. } => ErrorKind::SourceFailed,
            ResolutionError::Cancelled => ErrorKind::Cancelled,
            ResolutionError::Cache(_) => ErrorKind::Cache,
            ResolutionError::Config(_) => ErrorKind::Config,
        }
    }

    /// Convert an error raised by a context source.
    ///
    /// Errors that already belong to this family pass through unchanged, so a source reporting
    /// e.g. a nested circular dependency is not masked. Anything else becomes `SourceFailed`.
    pub fn from_source(source_name: &str, err: anyhow::Error) -> Self {
        match err.downcast::<ResolutionError>() {
            Ok(resolution_error) => resolution_error,
            Err(other) => {
                let boxed: Box<dyn std::error::Error + Send + Sync + 'static> = other.into();
                ResolutionError::SourceFailed {
                    source_name: source_name.to_string(),
                    cause: Arc::from(boxed),
                }
            }
        }
    }
}

impl From<config::ConfigError> for ResolutionError {
    fn from(err: config::ConfigError) -> Self {
        ResolutionError::Config(err.to_string())
    }
}

fn format_chain(path: &[ContextKey], requested: &ContextKey) -> String {
    path.iter()
        .map(|key| key.to_string())
        .chain(std::iter::once(requested.to_string()))
        .collect::<Vec<_>>()
        .join("->")
}
