//! Context sources
//!
//! Two kinds of sources feed the resolver:
//! - [`TypedSource`]: bound to one [`ContextType`]; receives the request and returns a patch
//!   to merge into it.
//! - [`NamedSource`]: asked for every context key; answers with zero or more results.
//!
//! Sources are registered in a [`SourceRegistry`] in the order they should be merged.

use crate::error::ResolutionError;
use crate::instruction::CacheInstruction;
use crate::key::ContextKey;
use crate::name::{register_context_type, BoundType, ContextType};
use crate::resolver::Resolver;
use crate::result::ContextResult;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Contribution of a typed source: a patch to merge into the request, and how long it holds.
#[derive(Debug, Clone, PartialEq)]
pub struct Fill {
    pub patch: Value,
    pub cache_instruction: CacheInstruction,
}

impl Fill {
    pub fn new(patch: Value, cache_instruction: CacheInstruction) -> Self {
        Self {
            patch,
            cache_instruction,
        }
    }

    /// Patch taken from a serializable value.
    pub fn from_patch<P: Serialize>(
        patch: &P,
        cache_instruction: CacheInstruction,
    ) -> anyhow::Result<Self> {
        Ok(Self::new(serde_json::to_value(patch)?, cache_instruction))
    }

    /// Nothing to add.
    pub fn empty(cache_instruction: CacheInstruction) -> Self {
        Self::new(Value::Null, cache_instruction)
    }
}

/// Source for one statically typed context.
///
/// The request is read-only: a source returns what it adds as a patch. Arrays in the patch
/// are appended to the request's arrays; nested objects merge; scalars overwrite.
#[async_trait]
pub trait TypedSource<T: ContextType>: Send + Sync {
    /// Name reported when the source fails.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn fill(
        &self,
        request: &T,
        resolver: &Resolver,
        cancel: CancellationToken,
    ) -> anyhow::Result<Fill>;
}

/// Source answering for contexts by key.
///
/// Every returned result must match the requested name; returning nothing, or a not-found
/// result, means the source has no data for the key.
#[async_trait]
pub trait NamedSource: Send + Sync {
    /// Name reported when the source fails.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    async fn resolve(
        &self,
        key: &ContextKey,
        resolver: &Resolver,
        cancel: CancellationToken,
    ) -> anyhow::Result<Vec<ContextResult>>;
}

/// Typed source with its context type erased, as stored in the registry.
#[async_trait]
pub(crate) trait ErasedTypedSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fill(
        &self,
        request: &Value,
        resolver: &Resolver,
        cancel: CancellationToken,
    ) -> Result<Fill, ResolutionError>;
}

struct TypedAdapter<T, S> {
    source: S,
    _context: PhantomData<fn() -> T>,
}

#[async_trait]
impl<T, S> ErasedTypedSource for TypedAdapter<T, S>
where
    T: ContextType,
    S: TypedSource<T>,
{
    fn name(&self) -> &str {
        self.source.name()
    }

    async fn fill(
        &self,
        request: &Value,
        resolver: &Resolver,
        cancel: CancellationToken,
    ) -> Result<Fill, ResolutionError> {
        let request: T = serde_json::from_value(request.clone()).map_err(|e| {
            ResolutionError::InvalidArgument(format!(
                "Request is not convertible to {}: {}",
                T::NAME,
                e
            ))
        })?;
        self.source
            .fill(&request, resolver, cancel)
            .await
            .map_err(|e| ResolutionError::from_source(self.source.name(), e))
    }
}

/// Ordered collection of the sources available to a resolver.
#[derive(Default)]
pub struct SourceRegistry {
    typed: HashMap<TypeId, Vec<Arc<dyn ErasedTypedSource>>>,
    named: Vec<Arc<dyn NamedSource>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a typed source for `T`; `T` is registered in the alias registry.
    pub fn add_typed<T, S>(&mut self, source: S) -> &mut Self
    where
        T: ContextType,
        S: TypedSource<T> + 'static,
    {
        let bound = register_context_type::<T>();
        self.typed
            .entry(bound.type_id())
            .or_default()
            .push(Arc::new(TypedAdapter {
                source,
                _context: PhantomData,
            }));
        self
    }

    pub fn with_typed<T, S>(mut self, source: S) -> Self
    where
        T: ContextType,
        S: TypedSource<T> + 'static,
    {
        self.add_typed::<T, S>(source);
        self
    }

    pub fn add_named<S>(&mut self, source: S) -> &mut Self
    where
        S: NamedSource + 'static,
    {
        self.named.push(Arc::new(source));
        self
    }

    pub fn with_named<S>(mut self, source: S) -> Self
    where
        S: NamedSource + 'static,
    {
        self.add_named(source);
        self
    }

    pub(crate) fn typed_sources(&self, bound: &BoundType) -> &[Arc<dyn ErasedTypedSource>] {
        self.typed
            .get(&bound.type_id())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub(crate) fn named_sources(&self) -> &[Arc<dyn NamedSource>] {
        &self.named
    }

    pub fn has_named_sources(&self) -> bool {
        !self.named.is_empty()
    }

    /// Number of typed sources registered for `T`.
    pub fn typed_count<T: ContextType>(&self) -> usize {
        self.typed.get(&TypeId::of::<T>()).map_or(0, Vec::len)
    }
}
