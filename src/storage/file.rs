// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! File-per-key storage backend.
//!
//! Layout of the data directory:
//!
//! ```text
//! <dir>/
//!   manifest.json          key → {filename, size, created_at}
//!   3f0a…9c.bin            one encoded envelope per key
//! ```
//!
//! The in-memory index is the source of truth; `manifest.json` is its
//! persisted copy, rewritten after every mutation. File names are the first
//! 32 hex chars of `sha256(key)`, so arbitrary keys map to bounded, safe
//! names. A missing or undecodable backing file reads as a miss and its
//! index entry is dropped.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::entry::{now_millis, Envelope};
use super::codec::EnvelopeCodec;
use super::traits::{CacheStore, StorageError};

pub const MANIFEST_FILE: &str = "manifest.json";

/// Hex chars of the key hash used as file name.
const FILENAME_HASH_LEN: usize = 32;

/// When the manifest is rewritten relative to the mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestSync {
    /// Await the manifest write before the mutation returns
    #[default]
    Sync,
    /// Fire-and-forget; the newest snapshot always wins
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub filename: String,
    pub size: u64,
    pub created_at: u64,
    /// Lets expired files be purged without reading them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<u64>,
}

/// Serializes manifest writes and discards snapshots older than the last one written.
#[derive(Debug, Default)]
struct ManifestWriter {
    lock: tokio::sync::Mutex<u64>,
}

pub struct FileStore {
    dir: PathBuf,
    index: RwLock<HashMap<String, ManifestEntry>>,
    codec: EnvelopeCodec,
    sync: ManifestSync,
    generation: AtomicU64,
    /// Distinguishes temp files of concurrent writers to the same key
    tmp_seq: AtomicU64,
    writer: Arc<ManifestWriter>,
}

impl FileStore {
    /// Open (or create) a store rooted at `dir`, loading its manifest.
    ///
    /// An unreadable manifest is logged and replaced by an empty index.
    pub async fn open(dir: impl Into<PathBuf>, codec: EnvelopeCodec, sync: ManifestSync) -> Result<Self, StorageError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let index = match tokio::fs::read(&manifest_path).await {
            Ok(bytes) => match serde_json::from_slice::<HashMap<String, ManifestEntry>>(&bytes) {
                Ok(index) => index,
                Err(e) => {
                    warn!(path = %manifest_path.display(), error = %e, "Corrupt manifest, starting with empty index");
                    HashMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(StorageError::io(&manifest_path, e)),
        };

        debug!(dir = %dir.display(), entries = index.len(), "File store opened");
        Ok(Self {
            dir,
            index: RwLock::new(index),
            codec,
            sync,
            generation: AtomicU64::new(0),
            tmp_seq: AtomicU64::new(0),
            writer: Arc::new(ManifestWriter::default()),
        })
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name for a key: truncated hex SHA-256 plus `.bin`.
    #[must_use]
    pub fn filename_for(key: &str) -> String {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        format!("{}.bin", &digest[..FILENAME_HASH_LEN])
    }

    /// Write the manifest now, regardless of the configured sync mode.
    pub async fn flush_manifest(&self) -> Result<(), StorageError> {
        let (generation, bytes) = self.snapshot_manifest()?;
        write_manifest(&self.dir, &self.writer, generation, bytes).await
    }

    fn snapshot_manifest(&self) -> Result<(u64, Vec<u8>), StorageError> {
        let index = self.index.read();
        // Generation is taken under the index lock so snapshot order matches mutation order
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let bytes = serde_json::to_vec_pretty(&*index)?;
        Ok((generation, bytes))
    }

    async fn persist_manifest(&self) -> Result<(), StorageError> {
        let (generation, bytes) = self.snapshot_manifest()?;
        match self.sync {
            ManifestSync::Sync => write_manifest(&self.dir, &self.writer, generation, bytes).await,
            ManifestSync::Background => {
                let dir = self.dir.clone();
                let writer = self.writer.clone();
                tokio::spawn(async move {
                    if let Err(e) = write_manifest(&dir, &writer, generation, bytes).await {
                        warn!(error = %e, "Background manifest write failed");
                        crate::metrics::record_error("file", "manifest", e.kind());
                    }
                });
                Ok(())
            }
        }
    }

    /// Drop an index entry whose backing file is gone or unreadable.
    async fn drop_dangling(&self, key: &str) {
        let removed = self.index.write().remove(key).is_some();
        if removed {
            if let Err(e) = self.persist_manifest().await {
                warn!(key = %key, error = %e, "Failed to persist manifest after dropping dangling entry");
            }
        }
    }
}

async fn write_manifest(dir: &Path, writer: &ManifestWriter, generation: u64, bytes: Vec<u8>) -> Result<(), StorageError> {
    let mut last_written = writer.lock.lock().await;
    if generation <= *last_written {
        return Ok(());
    }
    let path = dir.join(MANIFEST_FILE);
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &bytes)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, &path)
        .await
        .map_err(|e| StorageError::io(&path, e))?;
    *last_written = generation;
    Ok(())
}

#[async_trait]
impl CacheStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<Envelope>, StorageError> {
        let Some(entry) = self.index.read().get(key).cloned() else {
            return Ok(None);
        };
        let path = self.dir.join(&entry.filename);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(key = %key, "Backing file missing, dropping index entry");
                self.drop_dangling(key).await;
                return Ok(None);
            }
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        match self.codec.decode(&bytes) {
            Ok(envelope) => Ok(Some(envelope)),
            Err(e) => {
                warn!(key = %key, error = %e, "Corrupt backing file, treating as miss");
                crate::metrics::record_error("file", "get", "corrupt");
                self.drop_dangling(key).await;
                Ok(None)
            }
        }
    }

    async fn put(&self, key: &str, envelope: &Envelope) -> Result<(), StorageError> {
        let bytes = self.codec.encode(envelope)?;
        let filename = Self::filename_for(key);
        let path = self.dir.join(&filename);
        let seq = self.tmp_seq.fetch_add(1, Ordering::Relaxed);
        let tmp = self.dir.join(format!("{filename}.{}.{seq}.tmp", std::process::id()));

        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| StorageError::io(&tmp, e))?;
        // Rename is atomic, so racing writers of one key resolve to the last rename
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(StorageError::io(&path, e));
        }

        {
            let mut index = self.index.write();
            let created_at = index.get(key).map_or_else(now_millis, |e| e.created_at);
            index.insert(
                key.to_string(),
                ManifestEntry {
                    filename,
                    size: bytes.len() as u64,
                    created_at,
                    expires_at: envelope.metadata.expires_at,
                },
            );
        }
        crate::metrics::record_bytes_written("file", bytes.len());
        self.persist_manifest().await
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let Some(entry) = self.index.write().remove(key) else {
            return Ok(false);
        };
        let path = self.dir.join(&entry.filename);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(StorageError::io(&path, e)),
        }
        self.persist_manifest().await?;
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.index.read().contains_key(key))
    }

    async fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.index.read().keys().cloned().collect())
    }

    async fn clear(&self) -> Result<usize, StorageError> {
        let drained: Vec<ManifestEntry> = self.index.write().drain().map(|(_, e)| e).collect();
        for entry in &drained {
            let path = self.dir.join(&entry.filename);
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %path.display(), error = %e, "Failed to remove backing file during clear");
                }
            }
        }
        self.persist_manifest().await?;
        Ok(drained.len())
    }

    async fn len(&self) -> Result<usize, StorageError> {
        Ok(self.index.read().len())
    }

    fn name(&self) -> &'static str {
        "file"
    }

    /// Expiry comes from the index, so only due files are touched.
    async fn purge_expired(&self, now_ms: u64) -> Result<Vec<String>, StorageError> {
        let due: Vec<String> = self
            .index
            .read()
            .iter()
            .filter(|(_, e)| e.expires_at.is_some_and(|at| now_ms >= at))
            .map(|(k, _)| k.clone())
            .collect();
        let mut purged = Vec::with_capacity(due.len());
        for key in due {
            if self.delete(&key).await? {
                purged.push(key);
            }
        }
        Ok(purged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encryption::{Cipher, KEY_LEN};
    use crate::entry::EntryMetadata;
    use serde_json::json;

    fn envelope(key: &str, value: serde_json::Value) -> Envelope {
        let meta = EntryMetadata::new(key, &value, None).unwrap();
        Envelope::new(value, meta)
    }

    async fn open(dir: &Path) -> FileStore {
        FileStore::open(dir, EnvelopeCodec::plain(), ManifestSync::Sync).await.unwrap()
    }

    #[test]
    fn test_filename_is_bounded_hash() {
        let name = FileStore::filename_for(&"k".repeat(10_000));
        assert_eq!(name.len(), FILENAME_HASH_LEN + 4);
        assert!(name.ends_with(".bin"));
        assert_eq!(name, FileStore::filename_for(&"k".repeat(10_000)));
        assert_ne!(FileStore::filename_for("a/../b"), FileStore::filename_for("a/b"));
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path()).await;

        store.put("user:1", &envelope("user:1", json!({"name": "Ada"}))).await.unwrap();
        let got = store.get("user:1").await.unwrap().unwrap();
        assert_eq!(got.data["name"], "Ada");
        assert!(store.exists("user:1").await.unwrap());

        assert!(store.delete("user:1").await.unwrap());
        assert!(!store.delete("user:1").await.unwrap());
        assert!(store.get("user:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_manifest_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let store = open(tmp.path()).await;
            store.put("a", &envelope("a", json!(1))).await.unwrap();
            store.put("b", &envelope("b", json!(2))).await.unwrap();
        }

        let manifest: HashMap<String, ManifestEntry> =
            serde_json::from_slice(&std::fs::read(tmp.path().join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest.len(), 2);
        assert_eq!(manifest["a"].filename, FileStore::filename_for("a"));

        let reopened = open(tmp.path()).await;
        assert_eq!(reopened.len().await.unwrap(), 2);
        assert_eq!(reopened.get("b").await.unwrap().unwrap().data, json!(2));
    }

    #[tokio::test]
    async fn test_missing_backing_file_is_miss_and_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path()).await;
        store.put("gone", &envelope("gone", json!("x"))).await.unwrap();

        std::fs::remove_file(tmp.path().join(FileStore::filename_for("gone"))).unwrap();

        assert!(store.get("gone").await.unwrap().is_none());
        assert!(!store.exists("gone").await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_backing_file_is_miss() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path()).await;
        store.put("bad", &envelope("bad", json!("x"))).await.unwrap();

        std::fs::write(tmp.path().join(FileStore::filename_for("bad")), b"garbage").unwrap();

        assert!(store.get("bad").await.unwrap().is_none());
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_corrupt_manifest_starts_empty() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join(MANIFEST_FILE), b"{ not json").unwrap();

        let store = open(tmp.path()).await;
        assert_eq!(store.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_removes_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path()).await;
        for i in 0..3 {
            let key = format!("k{i}");
            store.put(&key, &envelope(&key, json!(i))).await.unwrap();
        }

        assert_eq!(store.clear().await.unwrap(), 3);
        assert_eq!(store.clear().await.unwrap(), 0);
        let bins = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "bin"))
            .count();
        assert_eq!(bins, 0);
    }

    #[tokio::test]
    async fn test_encrypted_files_at_rest() {
        let tmp = tempfile::tempdir().unwrap();
        let codec = EnvelopeCodec::plain().with_cipher(Cipher::new(&[4u8; KEY_LEN]));
        let store = FileStore::open(tmp.path(), codec, ManifestSync::Sync).await.unwrap();

        store.put("card", &envelope("card", json!("4111-1111"))).await.unwrap();
        let raw = std::fs::read(tmp.path().join(FileStore::filename_for("card"))).unwrap();
        assert!(!raw.windows(9).any(|w| w == b"4111-1111"));
        assert_eq!(store.get("card").await.unwrap().unwrap().data, json!("4111-1111"));
    }

    #[tokio::test]
    async fn test_purge_expired_uses_manifest_expiry() {
        let tmp = tempfile::tempdir().unwrap();
        let store = open(tmp.path()).await;
        let value = json!("x");
        let meta = EntryMetadata::new("short", &value, Some(std::time::Duration::from_millis(10))).unwrap();
        store.put("short", &Envelope::new(value.clone(), meta)).await.unwrap();
        store.put("kept", &envelope("kept", value)).await.unwrap();

        assert!(store.purge_expired(now_millis()).await.unwrap().is_empty());
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;

        assert_eq!(store.purge_expired(now_millis()).await.unwrap(), vec!["short"]);
        assert!(!store.exists("short").await.unwrap());
        assert!(!tmp.path().join(FileStore::filename_for("short")).exists());
        assert!(store.exists("kept").await.unwrap());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_of_one_key_all_succeed() {
        let tmp = tempfile::tempdir().unwrap();
        let store = Arc::new(open(tmp.path()).await);

        let handles: Vec<_> = (0..64)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move { store.put("same", &envelope("same", json!(i))).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let value = store.get("same").await.unwrap().unwrap().data;
        assert!(value.as_i64().is_some_and(|n| (0..64).contains(&n)));
        // No temp files left behind
        let leftovers = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter(|e| e.as_ref().unwrap().path().extension().is_some_and(|x| x == "tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_background_manifest_eventually_written() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path(), EnvelopeCodec::plain(), ManifestSync::Background)
            .await
            .unwrap();
        for i in 0..5 {
            let key = format!("k{i}");
            store.put(&key, &envelope(&key, json!(i))).await.unwrap();
        }
        store.flush_manifest().await.unwrap();

        let manifest: HashMap<String, ManifestEntry> =
            serde_json::from_slice(&std::fs::read(tmp.path().join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest.len(), 5);
    }
}
