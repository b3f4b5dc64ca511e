// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Redis storage backend.
//!
//! Each entry is one Redis STRING holding the encoded envelope (see
//! [`EnvelopeCodec`]). Entries with an expiry are written with `PX`, so
//! Redis drops them on its own even if the cache never touches them again.
//!
//! All keys carry the configured prefix, which lets several caches share
//! one Redis database. `keys()`/`clear()` only ever see their own prefix.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{cmd, pipe, Client, RedisError};
use tracing::debug;

use super::codec::EnvelopeCodec;
use super::traits::{CacheStore, StorageError};
use crate::entry::{now_millis, Envelope};
use crate::resilience::retry::{retry_if, RetryConfig};

/// Keys fetched per SCAN round trip.
const SCAN_COUNT: usize = 500;

pub struct RedisStore {
    connection: ConnectionManager,
    /// Optional key prefix for namespacing (e.g., "myapp:" → "myapp:user:1")
    prefix: String,
    codec: EnvelopeCodec,
    retry: RetryConfig,
}

/// Connection-level failures are worth retrying; command errors are not.
fn is_transient(e: &RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_timeout() || e.is_connection_refusal()
}

fn backend_error(e: RedisError) -> StorageError {
    if is_transient(&e) {
        crate::metrics::record_connection_error("redis");
    }
    StorageError::Backend(e.to_string())
}

/// Escape glob metacharacters so a prefix matches literally in `SCAN MATCH`.
fn escape_glob(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Longest `PX` sent to Redis (~100 years). Redis rejects expiries that
/// overflow its clock, so longer TTLs are written without one and rely on
/// the envelope's expiry check at read time.
const PX_CEILING_MS: u64 = 100 * 365 * 24 * 60 * 60 * 1000;

/// Milliseconds left for `PX`, or `None` for no expiry. Already-expired
/// entries still get 1ms so the write is well-formed and Redis drops it.
fn px_for(envelope: &Envelope, now_ms: u64) -> Option<u64> {
    envelope
        .metadata
        .expires_at
        .map(|at| at.saturating_sub(now_ms).max(1))
        .filter(|&ms| ms <= PX_CEILING_MS)
}

impl RedisStore {
    /// Connect without a key prefix.
    pub async fn new(connection_string: &str, codec: EnvelopeCodec) -> Result<Self, StorageError> {
        Self::with_prefix(connection_string, None, codec).await
    }

    /// Connect with an optional key prefix.
    ///
    /// # Example
    ///
    /// ```rust,no_run
    /// # use cache_engine::storage::{codec::EnvelopeCodec, redis::RedisStore};
    /// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
    /// // Keys will be stored as "myapp:user:1", "myapp:session:abc"
    /// let store = RedisStore::with_prefix("redis://localhost", Some("myapp:"), EnvelopeCodec::plain()).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_prefix(
        connection_string: &str,
        prefix: Option<&str>,
        codec: EnvelopeCodec,
    ) -> Result<Self, StorageError> {
        let client = Client::open(connection_string).map_err(|e| StorageError::Backend(e.to_string()))?;

        // Fast-fail on a bad URL or unreachable server rather than hanging
        let connection = retry_if(
            "redis_connect",
            &RetryConfig::startup(),
            || ConnectionManager::new(client.clone()),
            is_transient,
        )
        .await
        .map_err(backend_error)?;

        crate::metrics::set_backend_healthy("redis", true);
        debug!(prefix = prefix.unwrap_or(""), "Redis store connected");
        Ok(Self {
            connection,
            prefix: prefix.unwrap_or("").to_string(),
            codec,
            retry: RetryConfig::query(),
        })
    }

    /// Override the per-command retry schedule.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    #[inline]
    fn prefixed_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}{}", self.prefix, key)
        }
    }

    #[inline]
    fn strip_prefix<'a>(&self, key: &'a str) -> &'a str {
        if self.prefix.is_empty() {
            key
        } else {
            key.strip_prefix(&self.prefix).unwrap_or(key)
        }
    }

    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Get a clone of the connection manager
    #[must_use]
    pub fn connection(&self) -> ConnectionManager {
        self.connection.clone()
    }

    /// Full (prefixed) keys owned by this store.
    async fn scan_prefixed(&self) -> Result<Vec<String>, StorageError> {
        let pattern = format!("{}*", escape_glob(&self.prefix));
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();
        loop {
            let conn = self.connection.clone();
            let pattern = pattern.clone();
            let (next, batch): (u64, Vec<String>) = retry_if(
                "redis_scan",
                &self.retry,
                || {
                    let mut conn = conn.clone();
                    let pattern = pattern.clone();
                    async move {
                        cmd("SCAN")
                            .arg(cursor)
                            .arg("MATCH")
                            .arg(&pattern)
                            .arg("COUNT")
                            .arg(SCAN_COUNT)
                            .query_async(&mut conn)
                            .await
                    }
                },
                is_transient,
            )
            .await
            .map_err(backend_error)?;

            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }
        // SCAN may return a key more than once
        keys.sort_unstable();
        keys.dedup();
        Ok(keys)
    }
}

#[async_trait]
impl CacheStore for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Envelope>, StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        let data: Option<Vec<u8>> = retry_if(
            "redis_get",
            &self.retry,
            || {
                let mut conn = conn.clone();
                let key = prefixed.clone();
                async move { cmd("GET").arg(&key).query_async(&mut conn).await }
            },
            is_transient,
        )
        .await
        .map_err(backend_error)?;

        match data {
            Some(bytes) => {
                crate::metrics::record_bytes_read("redis", bytes.len());
                self.codec.decode(&bytes).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn put(&self, key: &str, envelope: &Envelope) -> Result<(), StorageError> {
        let bytes = self.codec.encode(envelope)?;
        let px = px_for(envelope, now_millis());
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        retry_if(
            "redis_set",
            &self.retry,
            || {
                let mut conn = conn.clone();
                let key = prefixed.clone();
                let bytes = bytes.clone();
                async move {
                    let mut c = cmd("SET");
                    c.arg(&key).arg(bytes);
                    if let Some(ms) = px {
                        c.arg("PX").arg(ms);
                    }
                    c.query_async::<()>(&mut conn).await
                }
            },
            is_transient,
        )
        .await
        .map_err(backend_error)?;

        crate::metrics::record_bytes_written("redis", bytes.len());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        let removed: u64 = retry_if(
            "redis_delete",
            &self.retry,
            || {
                let mut conn = conn.clone();
                let key = prefixed.clone();
                async move { cmd("DEL").arg(&key).query_async(&mut conn).await }
            },
            is_transient,
        )
        .await
        .map_err(backend_error)?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let conn = self.connection.clone();
        let prefixed = self.prefixed_key(key);

        retry_if(
            "redis_exists",
            &self.retry,
            || {
                let mut conn = conn.clone();
                let key = prefixed.clone();
                async move { cmd("EXISTS").arg(&key).query_async::<bool>(&mut conn).await }
            },
            is_transient,
        )
        .await
        .map_err(backend_error)
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .scan_prefixed()
            .await?
            .iter()
            .map(|k| self.strip_prefix(k).to_string())
            .collect())
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let keys = self.scan_prefixed().await?;
        if keys.is_empty() {
            return Ok(0);
        }
        let mut removed = 0usize;
        for chunk in keys.chunks(SCAN_COUNT) {
            let mut conn = self.connection.clone();
            let n: u64 = cmd("DEL")
                .arg(chunk)
                .query_async(&mut conn)
                .await
                .map_err(backend_error)?;
            removed += n as usize;
        }
        Ok(removed)
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.scan_prefixed().await?.len())
    }

    fn name(&self) -> &'static str {
        "redis"
    }

    /// Redis drops expired keys itself through `PX`.
    async fn purge_expired(&self, _now_ms: u64) -> Result<Vec<String>, StorageError> {
        Ok(Vec::new())
    }

    /// One pipelined round trip for the whole batch.
    async fn put_batch(&self, entries: &[(String, Envelope)]) -> Result<usize, StorageError> {
        if entries.is_empty() {
            return Ok(0);
        }
        let now = now_millis();
        let prepared = entries
            .iter()
            .map(|(key, envelope)| {
                Ok((self.prefixed_key(key), self.codec.encode(envelope)?, px_for(envelope, now)))
            })
            .collect::<Result<Vec<_>, StorageError>>()?;

        let conn = self.connection.clone();
        retry_if(
            "redis_put_batch",
            &self.retry,
            || {
                let mut conn = conn.clone();
                let prepared = prepared.clone();
                async move {
                    let mut pipeline = pipe();
                    for (key, bytes, px) in &prepared {
                        let c = pipeline.cmd("SET").arg(key).arg(bytes.as_slice());
                        if let Some(ms) = px {
                            c.arg("PX").arg(*ms);
                        }
                        c.ignore();
                    }
                    pipeline.query_async::<()>(&mut conn).await
                }
            },
            is_transient,
        )
        .await
        .map_err(backend_error)?;

        Ok(prepared.len())
    }
}
