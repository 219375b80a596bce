//! Context Resolution: On-Demand Typed and Named Context
//!
//! Resolves "context" (auxiliary data such as "pets owned by person X") by asking pluggable
//! sources, merging their partial contributions and caching the result for as long as the
//! sources allow.
//!
//! - [`name`] and [`key`] give every context a canonical identity.
//! - [`instruction`] describes how long a result may be cached.
//! - [`result`] combines what several sources returned.
//! - [`resolver`] invokes the sources, deduplicating concurrent requests and detecting cycles.
//! - [`cache`] puts local and distributed tiers in front of the resolver.

pub mod cache;
pub mod config;
pub mod error;
pub mod instruction;
pub mod key;
pub mod logging;
pub mod name;
pub mod resolver;
pub mod result;
pub mod source;
pub mod value;

pub use cache::TieredCache;
pub use config::{CacheOptions, ConfigLoader, ResolutionConfig};
pub use error::{CacheError, ErrorKind, ResolutionError};
pub use instruction::CacheInstruction;
pub use key::ContextKey;
pub use name::{register_context_type, ContextName, ContextType};
pub use resolver::{ContextResolver, Resolver};
pub use result::ContextResult;
pub use source::{Fill, NamedSource, SourceRegistry, TypedSource};
pub use tokio_util::sync::CancellationToken;
