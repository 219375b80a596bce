//! Context names
//!
//! A [`ContextName`] identifies a kind of context by an ordered list of aliases and, when one of
//! those aliases belongs to a registered [`ContextType`], by the type it is bound to.

pub mod registry;

pub use registry::{register_context_type, AliasRegistry, BoundType};

use crate::error::ResolutionError;
use crate::value::kind_of;
use registry::{dedup_aliases, normalize_alias, order_aliases};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// A statically typed context.
///
/// Implementors are plain serde records; the engine converts between them and
/// `serde_json::Value` with property names matched ignoring case. Sources return partial
/// objects, so records nested inside a context should be `#[serde(default)]`.
pub trait ContextType: Serialize + DeserializeOwned + Default + Send + Sync + 'static {
    /// Short name, always the first alias.
    const NAME: &'static str;
    /// Additional aliases the type answers to.
    const ALIASES: &'static [&'static str] = &[];
}

/// Identity of a kind of context.
#[derive(Clone)]
pub struct ContextName {
    bound: Option<BoundType>,
    aliases: Arc<[String]>,
    key: Arc<str>,
}

impl ContextName {
    /// Parse a name against the process-wide alias registry.
    ///
    /// Aliases may be separated by whitespace, `,`, `/` or `|`.
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        Self::parse_in(raw, AliasRegistry::global())
    }

    /// Parse a name against the given registry.
    pub fn parse_in(raw: &str, registry: &AliasRegistry) -> Result<Self, ResolutionError> {
        let tokens = raw
            .split(|c: char| c.is_whitespace() || matches!(c, ',' | '/' | '|'))
            .filter(|token| !token.is_empty())
            .map(str::to_string);
        Self::from_aliases_in(tokens, registry)
    }

    /// Build a name from already separated aliases.
    pub fn from_aliases<I, S>(aliases: I) -> Result<Self, ResolutionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_aliases_in(aliases, AliasRegistry::global())
    }

    fn from_aliases_in<I, S>(aliases: I, registry: &AliasRegistry) -> Result<Self, ResolutionError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut aliases = dedup_aliases(
            aliases
                .into_iter()
                .map(|alias| alias.into().trim().to_string())
                .filter(|alias| !alias.is_empty()),
        );
        if aliases.is_empty() {
            return Err(ResolutionError::InvalidArgument(
                "A context name requires at least one alias".to_string(),
            ));
        }

        if let Some(bound) = registry.resolve(&aliases)? {
            return Ok(Self::from_bound(bound));
        }

        order_aliases(&mut aliases);
        Ok(Self::build(None, aliases))
    }

    /// Name of a context type, registering the type if needed.
    pub fn of<T: ContextType>() -> Self {
        Self::from_bound(register_context_type::<T>())
    }

    pub fn from_bound(bound: BoundType) -> Self {
        let aliases = bound.aliases().to_vec();
        Self::build(Some(bound), aliases)
    }

    fn build(bound: Option<BoundType>, aliases: Vec<String>) -> Self {
        let key = aliases
            .iter()
            .map(|alias| normalize_alias(alias))
            .collect::<Vec<_>>()
            .join("|");
        Self {
            bound,
            aliases: aliases.into(),
            key: key.into(),
        }
    }

    pub fn bound_type(&self) -> Option<&BoundType> {
        self.bound.as_ref()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    pub fn is<T: ContextType>(&self) -> bool {
        self.bound.as_ref().is_some_and(|bound| bound.is::<T>())
    }

    pub fn aliases(&self) -> &[String] {
        &self.aliases
    }

    /// Canonical form: lower-cased aliases joined by `|`.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// True if every alias of `other` is also an alias of this name, ignoring case and order.
    pub fn matches(&self, other: &ContextName) -> bool {
        let own: HashSet<String> = self.aliases.iter().map(|a| normalize_alias(a)).collect();
        other
            .aliases
            .iter()
            .all(|alias| own.contains(&normalize_alias(alias)))
    }

    /// Convert a value into the shape this name requires.
    ///
    /// Bound names convert through their type; unbound names accept any object. `null` becomes
    /// the default (an empty object when unbound). Arrays and scalars are rejected.
    pub fn coerce(&self, value: Value) -> Result<Value, ResolutionError> {
        match (&self.bound, value) {
            (Some(bound), value) => bound.coerce(value),
            (None, Value::Null) => Ok(Value::Object(Default::default())),
            (None, Value::Object(map)) => Ok(Value::Object(map)),
            (None, other) => Err(ResolutionError::InvalidArgument(format!(
                "Value is a {}, not a valid object for context '{}'",
                kind_of(&other),
                self.key
            ))),
        }
    }
}

impl PartialEq for ContextName {
    fn eq(&self, other: &Self) -> bool {
        self.bound == other.bound && self.key == other.key
    }
}

impl Eq for ContextName {}

impl Hash for ContextName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bound.hash(state);
        self.key.hash(state);
    }
}

impl fmt::Display for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for ContextName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut debug = f.debug_struct("ContextName");
        debug.field("key", &self.key);
        if let Some(bound) = &self.bound {
            debug.field("type", &bound.type_name());
        }
        debug.finish()
    }
}

impl FromStr for ContextName {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ContextName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key)
    }
}

impl<'de> Deserialize<'de> for ContextName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
