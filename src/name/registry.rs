//! Alias registry: process-wide map from normalized alias to the context types declaring it.
//!
//! Context types register themselves explicitly (see [`register_context_type`]); the registry
//! is append-only and read-mostly, guarded by a `parking_lot::RwLock`.

use crate::error::ResolutionError;
use crate::name::ContextType;
use crate::value::{align_keys, kind_of};
use parking_lot::RwLock;
use serde_json::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, LazyLock};
use tracing::debug;
use unicode_normalization::UnicodeNormalization;

static GLOBAL_REGISTRY: LazyLock<AliasRegistry> = LazyLock::new(AliasRegistry::new);

type CoerceFn = fn(Value) -> Result<Value, ResolutionError>;

/// Normalize an alias for case-insensitive comparison.
pub fn normalize_alias(alias: &str) -> String {
    alias.nfc().collect::<String>().to_lowercase()
}

/// Order free-form aliases: shortest first, then alphabetically ignoring case.
pub(crate) fn order_aliases(aliases: &mut [String]) {
    aliases.sort_by_cached_key(|alias| (alias.chars().count(), normalize_alias(alias), alias.clone()));
}

/// Drop aliases that repeat an earlier one, ignoring case.
pub(crate) fn dedup_aliases<I>(aliases: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    let mut seen = std::collections::HashSet::new();
    aliases
        .into_iter()
        .filter(|alias| seen.insert(normalize_alias(alias)))
        .collect()
}

struct ContextTypeInfo {
    type_id: TypeId,
    type_name: &'static str,
    aliases: Vec<String>,
    coerce: CoerceFn,
}

/// Handle to a registered context type: the "bound type" of a [`ContextName`](crate::name::ContextName).
#[derive(Clone)]
pub struct BoundType(Arc<ContextTypeInfo>);

impl BoundType {
    fn of<T: ContextType>() -> Self {
        let declared = T::ALIASES
            .iter()
            .map(|alias| alias.trim().to_string())
            .filter(|alias| !alias.is_empty())
            .filter(|alias| normalize_alias(alias) != normalize_alias(T::NAME));
        let mut declared = dedup_aliases(declared);
        order_aliases(&mut declared);

        let mut aliases = Vec::with_capacity(declared.len() + 1);
        aliases.push(T::NAME.to_string());
        aliases.extend(declared);

        BoundType(Arc::new(ContextTypeInfo {
            type_id: TypeId::of::<T>(),
            type_name: std::any::type_name::<T>(),
            aliases,
            coerce: coerce_as::<T>,
        }))
    }

    pub fn type_id(&self) -> TypeId {
        self.0.type_id
    }

    /// Short name of the type, always the first alias.
    pub fn name(&self) -> &str {
        &self.0.aliases[0]
    }

    /// Fully qualified Rust type name.
    pub fn type_name(&self) -> &'static str {
        self.0.type_name
    }

    /// Short name followed by the declared aliases, shortest first.
    pub fn aliases(&self) -> &[String] {
        &self.0.aliases
    }

    pub fn is<T: ContextType>(&self) -> bool {
        self.0.type_id == TypeId::of::<T>()
    }

    /// Convert a value into the shape of this type.
    pub fn coerce(&self, value: Value) -> Result<Value, ResolutionError> {
        (self.0.coerce)(value)
    }
}

impl PartialEq for BoundType {
    fn eq(&self, other: &Self) -> bool {
        self.0.type_id == other.0.type_id
    }
}

impl Eq for BoundType {}

impl Hash for BoundType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.type_id.hash(state);
    }
}

impl fmt::Debug for BoundType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("BoundType").field(&self.0.type_name).finish()
    }
}

/// Structural conversion of an arbitrary object into `T`, and back to a value.
///
/// Property names are matched ignoring case against `T`'s serialized default, and top-level
/// properties that are missing or null take their default. Nested records need
/// `#[serde(default)]` to accept partial objects.
fn coerce_as<T: ContextType>(value: Value) -> Result<Value, ResolutionError> {
    let value = match value {
        Value::Null => Value::Object(Default::default()),
        Value::Object(map) => Value::Object(map),
        other => {
            return Err(ResolutionError::InvalidArgument(format!(
                "Value is a {}, not convertible to context type {}",
                kind_of(&other),
                T::NAME
            )))
        }
    };

    let template = serde_json::to_value(T::default()).map_err(|e| {
        ResolutionError::InvalidArgument(format!("Context type {} is not serializable: {}", T::NAME, e))
    })?;
    let mut aligned = align_keys(value, &template);
    if let (Value::Object(map), Value::Object(defaults)) = (&mut aligned, &template) {
        for (key, default) in defaults {
            match map.get_mut(key) {
                Some(existing) if existing.is_null() => *existing = default.clone(),
                Some(_) => {}
                None => {
                    map.insert(key.clone(), default.clone());
                }
            }
        }
    }
    let typed: T = serde_json::from_value(aligned).map_err(|e| {
        ResolutionError::InvalidArgument(format!("Value not convertible to type {}: {}", T::NAME, e))
    })?;
    serde_json::to_value(typed).map_err(|e| {
        ResolutionError::InvalidArgument(format!("Context type {} is not serializable: {}", T::NAME, e))
    })
}

#[derive(Default)]
struct RegistryState {
    by_alias: HashMap<String, Vec<BoundType>>,
    by_type: HashMap<TypeId, BoundType>,
}

/// Alias registry
pub struct AliasRegistry {
    state: RwLock<RegistryState>,
}

impl AliasRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            state: RwLock::new(RegistryState::default()),
        }
    }

    /// The process-wide registry consulted when names are parsed from strings.
    pub fn global() -> &'static AliasRegistry {
        &GLOBAL_REGISTRY
    }

    /// Register a context type; registering the same type again is a no-op.
    pub fn register<T: ContextType>(&self) -> BoundType {
        if let Some(existing) = self.state.read().by_type.get(&TypeId::of::<T>()) {
            return existing.clone();
        }

        let mut state = self.state.write();
        if let Some(existing) = state.by_type.get(&TypeId::of::<T>()) {
            return existing.clone();
        }

        let bound = BoundType::of::<T>();
        for alias in bound.aliases() {
            let types = state.by_alias.entry(normalize_alias(alias)).or_default();
            if !types.contains(&bound) {
                types.push(bound.clone());
            }
        }
        state.by_type.insert(bound.type_id(), bound.clone());
        debug!(
            context_type = bound.type_name(),
            aliases = ?bound.aliases(),
            "Registered context type"
        );
        bound
    }

    /// Look up a registered type.
    pub fn get<T: ContextType>(&self) -> Option<BoundType> {
        self.state.read().by_type.get(&TypeId::of::<T>()).cloned()
    }

    /// All types declaring the given alias (compared ignoring case).
    pub fn lookup(&self, alias: &str) -> Vec<BoundType> {
        self.state
            .read()
            .by_alias
            .get(&normalize_alias(alias))
            .cloned()
            .unwrap_or_default()
    }

    /// Find the single type all known aliases point to.
    ///
    /// Aliases unknown to the registry are ignored; the type sets of the known ones are
    /// intersected. One survivor binds, none leaves the name unbound, several are ambiguous.
    pub fn resolve(&self, aliases: &[String]) -> Result<Option<BoundType>, ResolutionError> {
        let state = self.state.read();
        let mut candidates: Option<Vec<BoundType>> = None;
        for alias in aliases {
            let Some(types) = state.by_alias.get(&normalize_alias(alias)) else {
                continue;
            };
            candidates = Some(match candidates {
                None => types.clone(),
                Some(current) => current.into_iter().filter(|t| types.contains(t)).collect(),
            });
        }

        let mut candidates = candidates.unwrap_or_default();
        match candidates.len() {
            0 => Ok(None),
            1 => Ok(candidates.pop()),
            _ => Err(ResolutionError::NameAmbiguous {
                aliases: aliases.to_vec(),
                types: candidates.iter().map(|t| t.type_name().to_string()).collect(),
            }),
        }
    }
}

impl Default for AliasRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register `T` in the process-wide registry.
pub fn register_context_type<T: ContextType>() -> BoundType {
    AliasRegistry::global().register::<T>()
}
