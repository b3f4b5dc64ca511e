// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Snapshot persistence for the manager table.
//!
//! File layout:
//! - `json`: one document `{version, created_at, entries: [{key, envelope}]}`
//! - `ndjson`: a header line `{version, created_at, count}` followed by one
//!   `{key, envelope}` record per line
//!
//! Either layout may be zstd-compressed; the frame magic is detected on
//! load, so `persistence.compression` can change between runs. Writes go to
//! a sibling `.tmp` file that is renamed over the snapshot.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::compression::{compress_bytes, decompress_bytes, is_compressed, DEFAULT_COMPRESSION_LEVEL};
use crate::entry::{now_millis, Envelope};
use crate::storage::traits::StorageError;

use super::shard::Slot;
use super::types::CacheError;
use super::CacheManager;

const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotFormat {
    #[default]
    Json,
    Ndjson,
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotRecord {
    key: String,
    envelope: Envelope,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonSnapshot {
    version: u32,
    created_at: u64,
    entries: Vec<SnapshotRecord>,
}

#[derive(Debug, Serialize, Deserialize)]
struct NdjsonHeader {
    version: u32,
    created_at: u64,
    count: usize,
}

fn snapshot_error(msg: impl Into<String>) -> CacheError {
    CacheError::Snapshot(msg.into())
}

fn check_version(version: u32) -> Result<(), CacheError> {
    if version != SNAPSHOT_VERSION {
        return Err(snapshot_error(format!(
            "unsupported snapshot version {version} (expected {SNAPSHOT_VERSION})"
        )));
    }
    Ok(())
}

fn encode(records: Vec<SnapshotRecord>, format: SnapshotFormat, compress: bool) -> Result<Vec<u8>, CacheError> {
    let created_at = now_millis();
    let body = match format {
        SnapshotFormat::Json => serde_json::to_vec(&JsonSnapshot {
            version: SNAPSHOT_VERSION,
            created_at,
            entries: records,
        })?,
        SnapshotFormat::Ndjson => {
            let mut out = serde_json::to_vec(&NdjsonHeader {
                version: SNAPSHOT_VERSION,
                created_at,
                count: records.len(),
            })?;
            out.push(b'\n');
            for record in &records {
                serde_json::to_writer(&mut out, record)?;
                out.push(b'\n');
            }
            out
        }
    };
    if compress {
        return compress_bytes(&body, DEFAULT_COMPRESSION_LEVEL).map_err(|e| StorageError::Codec(e).into());
    }
    Ok(body)
}

fn decode(bytes: &[u8], format: SnapshotFormat) -> Result<Vec<SnapshotRecord>, CacheError> {
    let owned;
    let body = if is_compressed(bytes) {
        owned = decompress_bytes(bytes).map_err(StorageError::Codec)?;
        owned.as_slice()
    } else {
        bytes
    };

    match format {
        SnapshotFormat::Json => {
            let snapshot: JsonSnapshot = serde_json::from_slice(body)?;
            check_version(snapshot.version)?;
            Ok(snapshot.entries)
        }
        SnapshotFormat::Ndjson => {
            let mut lines = body.split(|b| *b == b'\n').filter(|l| !l.is_empty());
            let header: NdjsonHeader = match lines.next() {
                Some(line) => serde_json::from_slice(line)?,
                None => return Err(snapshot_error("empty ndjson snapshot")),
            };
            check_version(header.version)?;
            let records = lines
                .map(serde_json::from_slice::<SnapshotRecord>)
                .collect::<Result<Vec<_>, _>>()?;
            if records.len() != header.count {
                return Err(snapshot_error(format!(
                    "truncated snapshot: header says {} entries, found {}",
                    header.count,
                    records.len()
                )));
            }
            Ok(records)
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CacheError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| StorageError::io(parent, e))?;
    }
    let tmp = temp_path(path);
    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::io(path, e))?;
    Ok(())
}

impl CacheManager {
    fn snapshot_path(&self) -> Result<&Path, CacheError> {
        self.config
            .persistence
            .path
            .as_deref()
            .ok_or_else(|| snapshot_error("persistence.path not configured"))
    }

    /// Write every live entry to the snapshot file. Returns the entry count.
    #[tracing::instrument(skip(self))]
    pub async fn save_snapshot(&self) -> Result<usize, CacheError> {
        let path = self.snapshot_path()?;
        let now = now_millis();
        let records: Vec<SnapshotRecord> = self
            .shards
            .iter()
            .flat_map(|shard| shard.lock().envelopes(now))
            .map(|(key, envelope)| SnapshotRecord { key, envelope })
            .collect();
        let count = records.len();

        let persist = &self.config.persistence;
        let result = match encode(records, persist.format, persist.compression) {
            Ok(bytes) => write_atomic(path, &bytes).await.map(|()| bytes.len()),
            Err(e) => Err(e),
        };
        match result {
            Ok(bytes) => {
                crate::metrics::record_snapshot("save", count, true);
                debug!(path = %path.display(), entries = count, bytes, "Snapshot saved");
                Ok(count)
            }
            Err(e) => {
                crate::metrics::record_snapshot("save", 0, false);
                error!(path = %path.display(), error = %e, "Snapshot save failed");
                Err(e)
            }
        }
    }

    /// Load the snapshot file into the table, skipping entries that expired
    /// while the cache was down. A missing file restores nothing.
    #[tracing::instrument(skip(self))]
    pub async fn restore_snapshot(&self) -> Result<usize, CacheError> {
        let path = self.snapshot_path()?;
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No snapshot to restore");
                return Ok(0);
            }
            Err(e) => return Err(StorageError::io(path, e).into()),
        };

        let records = match decode(&bytes, self.config.persistence.format) {
            Ok(r) => r,
            Err(e) => {
                crate::metrics::record_snapshot("load", 0, false);
                warn!(path = %path.display(), error = %e, "Snapshot unreadable, starting empty");
                return Err(e);
            }
        };

        let now = now_millis();
        let total = records.len();
        let mut restored = 0;
        for SnapshotRecord { key, envelope } in records {
            if envelope.is_expired_at(now) {
                continue;
            }
            let victims = self.admit(
                &key,
                Slot {
                    value: envelope.data,
                    meta: envelope.metadata,
                },
            );
            self.after_eviction(victims).await;
            restored += 1;
        }
        crate::metrics::record_snapshot("load", restored, true);
        info!(
            path = %path.display(),
            restored,
            skipped = total - restored,
            "Snapshot restored"
        );
        Ok(restored)
    }
}
