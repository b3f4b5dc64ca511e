// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Cache entry data structures.
//!
//! An entry is split in two: the value itself and its [`EntryMetadata`]
//! (expiry, tags, size, timestamps). Stores persist both wrapped in an
//! [`Envelope`] so that a value read back from disk or Redis still knows
//! when it expires.
//!
//! # Example
//!
//! ```
//! use cache_engine::entry::{Envelope, EntryMetadata, ValueKind};
//! use serde_json::json;
//!
//! let value = json!({"plan": "pro", "seats": 5});
//! let meta = EntryMetadata::new("account.42", &value, None).unwrap();
//! assert_eq!(meta.kind, ValueKind::Object);
//! assert!(meta.size_bytes > 0);
//!
//! let envelope = Envelope::new(value.clone(), meta);
//! assert_eq!(envelope.data, value);
//! ```

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fixed per-entry overhead added to every size estimate (bookkeeping structs).
const ENTRY_OVERHEAD_BYTES: usize = 64;

/// Current wall-clock time in epoch millis.
#[inline]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
#[inline]
#[must_use]
pub fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// Shape of a stored JSON value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Null,
    Bool,
    Number,
    String,
    Array,
    Object,
}

impl ValueKind {
    #[must_use]
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(_) => Self::Bool,
            Value::Number(_) => Self::Number,
            Value::String(_) => Self::String,
            Value::Array(_) => Self::Array,
            Value::Object(_) => Self::Object,
        }
    }
}

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Null => "null",
            Self::Bool => "bool",
            Self::Number => "number",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(s)
    }
}

/// Priority label attached to an entry.
///
/// Stored and persisted, but not consulted by any eviction policy yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
}

/// Per-entry bookkeeping that travels with the value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub kind: ValueKind,
    /// Estimated in-memory footprint (key + serialized value + overhead)
    pub size_bytes: usize,
    /// Creation timestamp (epoch millis)
    pub created_at: u64,
    /// Last write timestamp (epoch millis)
    pub updated_at: u64,
    /// Absolute expiry (epoch millis), `None` = never expires
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
    /// TTL as requested at write time, before sliding extension
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub priority: Priority,
}

impl EntryMetadata {
    /// Build metadata for a fresh value, computing its size estimate.
    pub fn new(key: &str, value: &Value, ttl: Option<Duration>) -> Result<Self, serde_json::Error> {
        let now = now_millis();
        let ttl_ms = ttl.map(duration_millis);
        Ok(Self {
            kind: ValueKind::of(value),
            size_bytes: estimate_size(key, value)?,
            created_at: now,
            updated_at: now,
            expires_at: ttl_ms.map(|ms| now.saturating_add(ms)),
            ttl_ms,
            tags: BTreeSet::new(),
            priority: Priority::Normal,
        })
    }

    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// An entry is expired once `now >= expires_at`.
    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }

    /// Time left before expiry, `None` when the entry never expires.
    #[must_use]
    pub fn remaining_at(&self, now: u64) -> Option<Duration> {
        self.expires_at
            .map(|at| Duration::from_millis(at.saturating_sub(now)))
    }

    /// True if any of `tags` is attached to this entry.
    #[must_use]
    pub fn has_any_tag(&self, tags: &[String]) -> bool {
        tags.iter().any(|t| self.tags.contains(t))
    }
}

/// Wire/disk representation of a cached value: `{data, metadata, timestamp}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub data: Value,
    pub metadata: EntryMetadata,
    /// Time the envelope was built (epoch millis)
    pub timestamp: u64,
}

impl Envelope {
    #[must_use]
    pub fn new(data: Value, metadata: EntryMetadata) -> Self {
        Self {
            data,
            metadata,
            timestamp: now_millis(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_expired_at(&self, now: u64) -> bool {
        self.metadata.is_expired_at(now)
    }

    #[inline]
    #[must_use]
    pub fn size_bytes(&self) -> usize {
        self.metadata.size_bytes
    }
}

/// Estimate the footprint of `key → value`.
pub fn estimate_size(key: &str, value: &Value) -> Result<usize, serde_json::Error> {
    let value_len = serde_json::to_vec(value)?.len();
    Ok(key.len() + value_len + ENTRY_OVERHEAD_BYTES)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_value_kind_of() {
        assert_eq!(ValueKind::of(&json!(null)), ValueKind::Null);
        assert_eq!(ValueKind::of(&json!(true)), ValueKind::Bool);
        assert_eq!(ValueKind::of(&json!(1.5)), ValueKind::Number);
        assert_eq!(ValueKind::of(&json!("x")), ValueKind::String);
        assert_eq!(ValueKind::of(&json!([1, 2])), ValueKind::Array);
        assert_eq!(ValueKind::of(&json!({"a": 1})), ValueKind::Object);
    }

    #[test]
    fn test_size_grows_with_content() {
        let small = estimate_size("k", &json!("a")).unwrap();
        let large = estimate_size("k", &json!("a".repeat(1000))).unwrap();
        assert!(large > small);
        assert!(small > ENTRY_OVERHEAD_BYTES);
    }

    #[test]
    fn test_expiry_boundary_is_inclusive() {
        let mut meta = EntryMetadata::new("k", &json!(1), Some(Duration::from_millis(100))).unwrap();
        meta.expires_at = Some(1_000);
        assert!(!meta.is_expired_at(999));
        assert!(meta.is_expired_at(1_000));
        assert!(meta.is_expired_at(1_001));
    }

    #[test]
    fn test_no_ttl_never_expires() {
        let meta = EntryMetadata::new("k", &json!(1), None).unwrap();
        assert!(meta.expires_at.is_none());
        assert!(!meta.is_expired_at(u64::MAX));
        assert!(meta.remaining_at(now_millis()).is_none());
    }

    #[test]
    fn test_has_any_tag() {
        let meta = EntryMetadata::new("k", &json!(1), None)
            .unwrap()
            .with_tags(["user:1", "billing"]);
        assert!(meta.has_any_tag(&["billing".to_string()]));
        assert!(meta.has_any_tag(&["nope".to_string(), "user:1".to_string()]));
        assert!(!meta.has_any_tag(&["nope".to_string()]));
        assert!(!meta.has_any_tag(&[]));
    }

    #[test]
    fn test_envelope_serde_shape() {
        let meta = EntryMetadata::new("k", &json!({"a": 1}), None)
            .unwrap()
            .with_priority(Priority::High);
        let envelope = Envelope::new(json!({"a": 1}), meta);
        let doc = serde_json::to_value(&envelope).unwrap();

        assert_eq!(doc["data"], json!({"a": 1}));
        assert_eq!(doc["metadata"]["kind"], "object");
        assert_eq!(doc["metadata"]["priority"], "high");
        assert!(doc["timestamp"].as_u64().is_some());
        // Optional fields are omitted when unset
        assert!(doc["metadata"].get("expires_at").is_none());
    }

    #[test]
    fn test_huge_ttl_saturates_instead_of_wrapping() {
        let meta = EntryMetadata::new("k", &json!(1), Some(Duration::MAX)).unwrap();
        assert_eq!(meta.ttl_ms, Some(u64::MAX));
        assert_eq!(meta.expires_at, Some(u64::MAX));
        assert!(!meta.is_expired_at(now_millis()));
        assert_eq!(duration_millis(Duration::from_millis(1_500)), 1_500);
    }
}
