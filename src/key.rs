//! Context keys
//!
//! A [`ContextKey`] identifies one instance of a context: its [`ContextName`] plus the coerced
//! identifying value. Keys compare and hash by their canonical string, which is insensitive to
//! property order, property-name casing and array element order.

use crate::error::ResolutionError;
use crate::name::{ContextName, ContextType};
use crate::value::{canonical_json, KeyFolding};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

/// Identity of one context instance; used as the dedup and cache key.
#[derive(Clone)]
pub struct ContextKey {
    name: ContextName,
    id: Arc<Value>,
    key: Arc<str>,
}

impl ContextKey {
    /// Build a key from a name and an identifying value, coercing the value through the name.
    pub fn new(name: ContextName, id: Value) -> Result<Self, ResolutionError> {
        let id = name.coerce(id)?;
        let folding = if name.is_bound() {
            KeyFolding::CamelCase
        } else {
            KeyFolding::Lowercase
        };
        let key = format!(
            "{{{}:{}}}",
            Value::String(name.key().to_string()),
            canonical_json(&id, folding)
        );
        Ok(Self {
            name,
            id: Arc::new(id),
            key: key.into(),
        })
    }

    /// Key of a typed identifying object.
    pub fn from_typed<T: ContextType>(id: &T) -> Result<Self, ResolutionError> {
        let value = serde_json::to_value(id).map_err(|e| {
            ResolutionError::InvalidArgument(format!("Context {} is not serializable: {}", T::NAME, e))
        })?;
        Self::new(ContextName::of::<T>(), value)
    }

    /// Key of a named context with an optional identifying value.
    pub fn from_named(name: &str, id: Option<Value>) -> Result<Self, ResolutionError> {
        Self::new(ContextName::parse(name)?, id.unwrap_or(Value::Null))
    }

    /// Parse a canonical key string back into a key.
    pub fn parse(raw: &str) -> Result<Self, ResolutionError> {
        let invalid = || ResolutionError::InvalidArgument(format!("Not a valid context key: {}", raw));

        let value: Value = serde_json::from_str(raw).map_err(|_| invalid())?;
        let Value::Object(map) = value else {
            return Err(invalid());
        };
        if map.len() != 1 {
            return Err(invalid());
        }
        let Some((name, id)) = map.into_iter().next() else {
            return Err(invalid());
        };
        Self::new(ContextName::parse(&name)?, id)
    }

    pub fn name(&self) -> &ContextName {
        &self.name
    }

    /// The coerced identifying value.
    pub fn id(&self) -> &Value {
        &self.id
    }

    /// Canonical string form.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the identifying value back as a typed context.
    pub fn id_as<T: ContextType>(&self) -> Result<T, ResolutionError> {
        serde_json::from_value(self.id.as_ref().clone()).map_err(|e| {
            ResolutionError::InvalidArgument(format!(
                "Id of {} is not convertible to {}: {}",
                self.key,
                T::NAME,
                e
            ))
        })
    }
}

impl PartialEq for ContextKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for ContextKey {}

impl Hash for ContextKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

impl fmt::Debug for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ContextKey").field(&self.key).finish()
    }
}

impl FromStr for ContextKey {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ContextKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.key)
    }
}

impl<'de> Deserialize<'de> for ContextKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
