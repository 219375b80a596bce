//! Cached entry format.
//!
//! An entry is a result plus the time it was created; the remaining lifetime is recomputed
//! from the result's cache instruction on every read. Serialized form:
//! `{"n": <name key>, "i": <cache instruction>, "r": <coerced value>, "t": <RFC 3339 time>}`.

use crate::cache::clock::elapsed;
use crate::error::CacheError;
use crate::instruction::CacheInstruction;
use crate::name::ContextName;
use crate::result::ContextResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// A context result as stored in a cache tier.
#[derive(Debug, Clone)]
pub struct CachedContextResult {
    result: ContextResult,
    created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize)]
struct CacheRecord {
    #[serde(rename = "n")]
    name: String,
    #[serde(rename = "i")]
    cache_instruction: CacheInstruction,
    #[serde(rename = "r")]
    result: Value,
    #[serde(rename = "t")]
    created_at: DateTime<Utc>,
}

impl CachedContextResult {
    pub fn new(result: ContextResult, created_at: DateTime<Utc>) -> Self {
        Self { result, created_at }
    }

    pub fn result(&self) -> &ContextResult {
        &self.result
    }

    pub fn into_result(self) -> ContextResult {
        self.result
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn age_at(&self, now: DateTime<Utc>) -> Duration {
        elapsed(self.created_at, now)
    }

    /// Remaining local lifetime at `now`.
    pub fn local_expiration_at(&self, now: DateTime<Utc>) -> Duration {
        self.result
            .cache_instruction()
            .local_expiration_at_age(self.age_at(now))
    }

    /// Remaining distributed lifetime at `now`.
    pub fn distributed_expiration_at(&self, now: DateTime<Utc>) -> Duration {
        self.result
            .cache_instruction()
            .distributed_expiration_at_age(self.age_at(now))
    }

    pub fn to_json(&self) -> Result<String, CacheError> {
        let invalid = |message: String| CacheError::InvalidEntry {
            key: self.result.name().to_string(),
            message,
        };

        let record = CacheRecord {
            name: self.result.name().key().to_string(),
            cache_instruction: self.result.cache_instruction(),
            result: self.result.get_result().map_err(|e| invalid(e.to_string()))?,
            created_at: self.created_at,
        };
        serde_json::to_string(&record).map_err(|e| invalid(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, CacheError> {
        let record: CacheRecord =
            serde_json::from_str(raw).map_err(|e| CacheError::InvalidEntry {
                key: String::new(),
                message: e.to_string(),
            })?;
        let name = ContextName::parse(&record.name).map_err(|e| CacheError::InvalidEntry {
            key: record.name.clone(),
            message: e.to_string(),
        })?;
        Ok(Self::new(
            ContextResult::found(name, record.result, record.cache_instruction),
            record.created_at,
        ))
    }
}
