//! Cache instructions
//!
//! A cache instruction tells the cache whether a result may be stored and for how long. One
//! expiration applies to both the local and the distributed tier.
//!
//! Grammar (case-insensitive, surrounding whitespace ignored):
//! - `transient`: do not cache
//! - `<number>[<unit>]` with unit one of `s`, `sec`, `second`, `seconds`, `m`, `min`, `minute`,
//!   `minutes`, `h`, `hour`, `hours`, `d`, `day`, `days`. Seconds when the unit is omitted.
//!
//! A zero duration collapses to `transient`.

use crate::error::ResolutionError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;
use std::time::Duration;

static INSTRUCTION_PATTERN: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(
        r"(?i)^\s*(?:(?P<transient>transient)|(?P<num>\d+|\d*\.\d+)\s*(?P<unit>seconds|second|sec|s|minutes|minute|min|m|hours|hour|h|days|day|d)?)\s*$",
    )
    .expect("cache instruction pattern is valid")
});

/// Cacheability directive attached to every context result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheInstruction {
    /// Not cacheable in either tier.
    Transient,
    /// Cacheable in both tiers for the given duration after creation.
    Expiring(Duration),
}

impl CacheInstruction {
    /// Build an instruction from a duration; zero becomes `Transient`.
    pub fn from_duration(duration: Duration) -> Self {
        if duration.is_zero() {
            CacheInstruction::Transient
        } else {
            CacheInstruction::Expiring(duration)
        }
    }

    /// Parse an instruction, returning `None` if it does not follow the grammar.
    pub fn try_parse(instruction: &str) -> Option<Self> {
        let captures = INSTRUCTION_PATTERN.captures(instruction)?;
        if captures.name("transient").is_some() {
            return Some(CacheInstruction::Transient);
        }

        let number: f64 = captures.name("num")?.as_str().parse().ok()?;
        let unit = captures
            .name("unit")
            .map(|m| m.as_str().to_ascii_lowercase())
            .unwrap_or_else(|| "s".to_string());
        let multiplier = match unit.as_str() {
            "d" | "day" | "days" => 86_400.0,
            "h" | "hour" | "hours" => 3_600.0,
            "m" | "min" | "minute" | "minutes" => 60.0,
            _ => 1.0,
        };

        let seconds = number * multiplier;
        let duration = Duration::try_from_secs_f64(seconds).ok()?;
        Some(Self::from_duration(duration))
    }

    /// Parse an instruction, failing with an argument error on malformed text.
    pub fn parse(instruction: &str) -> Result<Self, ResolutionError> {
        Self::try_parse(instruction).ok_or_else(|| {
            ResolutionError::InvalidArgument(format!(
                "Not a valid cache instruction: '{}'",
                instruction
            ))
        })
    }

    /// Combine several instructions into the most restrictive one.
    ///
    /// If every instruction is cacheable the result expires after the shortest duration;
    /// a single transient instruction makes the combination transient.
    pub fn combine<I>(instructions: I) -> Self
    where
        I: IntoIterator<Item = CacheInstruction>,
    {
        let mut shortest: Option<Duration> = None;
        for instruction in instructions {
            match instruction {
                CacheInstruction::Transient => return CacheInstruction::Transient,
                CacheInstruction::Expiring(duration) => {
                    shortest = Some(shortest.map_or(duration, |current| current.min(duration)));
                }
            }
        }
        Self::from_duration(shortest.unwrap_or(Duration::ZERO))
    }

    pub fn is_locally_cacheable(&self) -> bool {
        matches!(self, CacheInstruction::Expiring(_))
    }

    pub fn is_distributed_cacheable(&self) -> bool {
        matches!(self, CacheInstruction::Expiring(_))
    }

    /// The full expiration duration, `None` for transient instructions.
    pub fn expiration(&self) -> Option<Duration> {
        match self {
            CacheInstruction::Transient => None,
            CacheInstruction::Expiring(duration) => Some(*duration),
        }
    }

    /// Remaining local expiration for an item of the given age.
    pub fn local_expiration_at_age(&self, age: Duration) -> Duration {
        if !self.is_locally_cacheable() {
            return Duration::ZERO;
        }
        self.remaining_at_age(age)
    }

    /// Remaining distributed expiration for an item of the given age.
    pub fn distributed_expiration_at_age(&self, age: Duration) -> Duration {
        if !self.is_distributed_cacheable() {
            return Duration::ZERO;
        }
        self.remaining_at_age(age)
    }

    fn remaining_at_age(&self, age: Duration) -> Duration {
        self.expiration()
            .map(|duration| duration.saturating_sub(age))
            .unwrap_or(Duration::ZERO)
    }
}

impl Default for CacheInstruction {
    fn default() -> Self {
        CacheInstruction::Transient
    }
}

impl From<Duration> for CacheInstruction {
    fn from(duration: Duration) -> Self {
        Self::from_duration(duration)
    }
}

impl fmt::Display for CacheInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheInstruction::Transient => write!(f, "transient"),
            CacheInstruction::Expiring(duration) if duration.subsec_nanos() == 0 => {
                write!(f, "{} seconds", duration.as_secs())
            }
            CacheInstruction::Expiring(duration) => {
                write!(f, "{} seconds", duration.as_secs_f64())
            }
        }
    }
}

impl FromStr for CacheInstruction {
    type Err = ResolutionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for CacheInstruction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CacheInstruction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
