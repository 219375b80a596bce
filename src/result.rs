//! Context results
//!
//! A [`ContextResult`] is what one or more sources produced for a context: either nothing
//! (`NotFound`) or a list of partial values together with the combined cache instruction.
//! Partials are merged and coerced lazily, once, on the first call to
//! [`ContextResult::get_result`].

use crate::error::ResolutionError;
use crate::instruction::CacheInstruction;
use crate::name::{ContextName, ContextType};
use crate::value::{kind_of, merge_all};
use serde_json::Value;
use std::sync::{Arc, OnceLock};

/// Outcome of querying sources for one context.
#[derive(Debug, Clone)]
pub struct ContextResult {
    name: ContextName,
    found: bool,
    partials: Arc<[Value]>,
    cache_instruction: CacheInstruction,
    resolved: Arc<OnceLock<Value>>,
}

impl ContextResult {
    /// No source produced a value for `name`.
    pub fn not_found(name: ContextName) -> Self {
        Self::new(name, false, Vec::new(), CacheInstruction::Transient)
    }

    /// A source produced `value` for `name`.
    pub fn found(name: ContextName, value: Value, cache_instruction: CacheInstruction) -> Self {
        Self::new(name, true, vec![value], cache_instruction)
    }

    /// A typed value was produced.
    pub fn found_typed<T: ContextType>(
        value: &T,
        cache_instruction: CacheInstruction,
    ) -> Result<Self, ResolutionError> {
        let value = serde_json::to_value(value).map_err(|e| {
            ResolutionError::InvalidArgument(format!("Context {} is not serializable: {}", T::NAME, e))
        })?;
        Ok(Self::found(ContextName::of::<T>(), value, cache_instruction))
    }

    /// A value was produced for a context given by name.
    pub fn found_named(
        name: &str,
        value: Value,
        cache_instruction: CacheInstruction,
    ) -> Result<Self, ResolutionError> {
        Ok(Self::found(ContextName::parse(name)?, value, cache_instruction))
    }

    /// Several partials, in merge order, that together form one result.
    pub fn from_partials(
        name: ContextName,
        partials: Vec<Value>,
        cache_instruction: CacheInstruction,
    ) -> Self {
        Self::new(name, true, partials, cache_instruction)
    }

    fn new(
        name: ContextName,
        found: bool,
        partials: Vec<Value>,
        cache_instruction: CacheInstruction,
    ) -> Self {
        Self {
            name,
            found,
            partials: partials.into(),
            cache_instruction,
            resolved: Arc::new(OnceLock::new()),
        }
    }

    pub fn name(&self) -> &ContextName {
        &self.name
    }

    /// Whether any source produced a value.
    pub fn is_found(&self) -> bool {
        self.found
    }

    pub fn cache_instruction(&self) -> CacheInstruction {
        self.cache_instruction
    }

    pub fn partials(&self) -> &[Value] {
        &self.partials
    }

    /// The coerced value.
    ///
    /// One partial is coerced directly; several are deep-merged in order first, with later
    /// scalars overwriting earlier ones. A not-found result yields the name's default value.
    pub fn get_result(&self) -> Result<Value, ResolutionError> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(resolved.clone());
        }

        let value = match self.partials.as_ref() {
            [single] => self.name.coerce(single.clone())?,
            partials => {
                if let Some(bad) = partials.iter().find(|p| !p.is_object() && !p.is_null()) {
                    return Err(ResolutionError::InvalidArgument(format!(
                        "Partial result for '{}' is a {}, not an object",
                        self.name,
                        kind_of(bad)
                    )));
                }
                self.name.coerce(merge_all(partials.iter()))?
            }
        };
        Ok(self.resolved.get_or_init(|| value).clone())
    }

    /// The coerced value as a typed context.
    pub fn get_typed<T: ContextType>(&self) -> Result<T, ResolutionError> {
        serde_json::from_value(self.get_result()?).map_err(|e| {
            ResolutionError::InvalidArgument(format!(
                "Result for '{}' is not convertible to {}: {}",
                self.name,
                T::NAME,
                e
            ))
        })
    }

    /// Combine results from several sources into one result for `name`.
    ///
    /// Every result must match `name`. Not-found results are dropped; a single survivor is
    /// returned unchanged, several are concatenated under the most restrictive instruction.
    pub fn combine(name: &ContextName, results: Vec<ContextResult>) -> Result<Self, ResolutionError> {
        if let Some(mismatch) = results.iter().find(|r| !name.matches(&r.name)) {
            return Err(ResolutionError::InvalidArgument(format!(
                "Result for context '{}' cannot be combined into context '{}'",
                mismatch.name, name
            )));
        }

        let mut found: Vec<ContextResult> = results.into_iter().filter(|r| r.found).collect();
        match found.len() {
            0 => Ok(Self::not_found(name.clone())),
            1 => Ok(found.remove(0)),
            _ => {
                let cache_instruction =
                    CacheInstruction::combine(found.iter().map(|r| r.cache_instruction));
                let partials = found
                    .iter()
                    .flat_map(|r| r.partials.iter().cloned())
                    .collect();
                Ok(Self::new(name.clone(), true, partials, cache_instruction))
            }
        }
    }
}
