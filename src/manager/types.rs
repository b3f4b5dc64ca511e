// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the cache manager.

use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;
use crate::entry::Priority;
use crate::storage::traits::StorageError;
use crate::strategy::Expiry;

/// Cache lifecycle state.
///
/// Use [`super::CacheManager::state()`] to check the current state or
/// [`super::CacheManager::state_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    /// Constructed; operations are served but no maintenance runs yet
    Created,
    /// Restoring the snapshot and preloading keys
    Warming,
    /// Maintenance task running
    Running,
    /// New operations are refused while in-flight ones drain
    ShuttingDown,
    /// Tables cleared, maintenance stopped
    Stopped,
}

impl CacheState {
    /// Whether new operations are admitted.
    #[must_use]
    pub fn accepts_operations(&self) -> bool {
        matches!(self, Self::Created | Self::Warming | Self::Running)
    }
}

impl std::fmt::Display for CacheState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "Created"),
            Self::Warming => write!(f, "Warming"),
            Self::Running => write!(f, "Running"),
            Self::ShuttingDown => write!(f, "ShuttingDown"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Per-write options for [`super::CacheManager::set`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use cache_engine::{Priority, SetOptions};
///
/// let opts = SetOptions::ttl(Duration::from_secs(30))
///     .with_tags(["user:42", "profile"])
///     .with_priority(Priority::High);
/// assert_eq!(opts.tags.len(), 2);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SetOptions {
    pub expiry: Expiry,
    pub tags: Vec<String>,
    pub priority: Priority,
}

impl SetOptions {
    #[must_use]
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            expiry: Expiry::from(ttl),
            ..Self::default()
        }
    }

    /// Millisecond TTL; zero or negative never expires.
    #[must_use]
    pub fn ttl_ms(ms: i64) -> Self {
        Self {
            expiry: Expiry::from_millis(ms),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn never_expire() -> Self {
        Self {
            expiry: Expiry::Never,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_expiry(mut self, expiry: Expiry) -> Self {
        self.expiry = expiry;
        self
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
}

/// Answer of [`super::CacheManager::ttl`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlStatus {
    /// No live entry under the key
    Missing,
    /// Live entry without expiry
    NoExpiry,
    /// Live entry expiring after the given time
    Remaining(Duration),
}

/// Result of a batch operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchResult {
    /// Total items in the batch
    pub total: usize,
    /// Successfully processed items
    pub succeeded: usize,
    /// Failed items
    pub failed: usize,
}

impl BatchResult {
    /// Check if all items succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Outcome of one [`super::CacheManager::tick`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaintenanceReport {
    /// Entries removed by the expiration sweep
    pub expired: usize,
    /// Entries removed by the TTL-policy capacity pass
    pub evicted: usize,
    /// Entries reloaded or flagged for refresh
    pub refreshed: usize,
    /// Entries written to the snapshot, if one was saved
    pub snapshot_entries: Option<usize>,
    /// Shard sizes, when they were found out of balance
    pub imbalance: Option<Vec<usize>>,
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Entry for {key} is {size} bytes, above the {max} byte limit")]
    TooLarge { key: String, size: usize, max: usize },
    #[error("Cache is {0}, no new operations are accepted")]
    NotAccepting(CacheState),
    #[error("Cannot start from state {0}")]
    InvalidState(CacheState),
    #[error("Snapshot failed: {0}")]
    Snapshot(String),
}
