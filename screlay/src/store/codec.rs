//! On-disk encodings of the durable values.
//!
//! The counter file is a bare JSON number. Files written by older
//! deployments carry `{"count": n}` instead; both shapes decode. The set
//! file is a JSON array of integer identities.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::de::IgnoredAny;

use crate::{Error, Result};

/// A value that a [`super::DurableStore`] can hold.
pub trait PersistentValue: Default + Send + Sync + 'static {
    /// Short label for logs.
    const KIND: &'static str;

    fn decode(raw: &str) -> Result<Self>;

    fn encode(&self) -> Result<String>;
}

/// Monotonic counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counter(pub u64);

#[derive(Deserialize)]
#[serde(untagged)]
enum CounterFile {
    Bare(f64),
    Wrapped { count: f64 },
}

impl PersistentValue for Counter {
    const KIND: &'static str = "counter";

    fn decode(raw: &str) -> Result<Self> {
        let value = match serde_json::from_str::<CounterFile>(raw)? {
            CounterFile::Bare(n) | CounterFile::Wrapped { count: n } => n,
        };
        if !value.is_finite() || value < 0.0 {
            return Err(Error::Other(format!("invalid counter value {value}")));
        }
        Ok(Self(value as u64))
    }

    fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

/// Set of numeric identities.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdSet(pub BTreeSet<i64>);

#[derive(Deserialize)]
#[serde(untagged)]
enum IdEntry {
    Int(i64),
    Float(f64),
    Text(String),
    Other(IgnoredAny),
}

impl IdEntry {
    fn into_id(self) -> Option<i64> {
        match self {
            Self::Int(id) => Some(id),
            Self::Float(f) if f.is_finite() && f.fract() == 0.0 => Some(f as i64),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl PersistentValue for IdSet {
    const KIND: &'static str = "set";

    /// Entries that are not integers (or integer strings) are skipped.
    fn decode(raw: &str) -> Result<Self> {
        let entries: Vec<IdEntry> = serde_json::from_str(raw)?;
        Ok(Self(entries.into_iter().filter_map(IdEntry::into_id).collect()))
    }

    fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}
