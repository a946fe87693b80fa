//! JSON-file percentile store.
//!
//! The whole baseline lives in one JSON document:
//!
//! ```json
//! { "revision": 12, "records": [ { "stream": "buddha", "percentile": 9000, "value": 3.1, "n": 4 } ] }
//! ```
//!
//! Every mutation takes an exclusive advisory lock on a sidecar file
//! (`baseline.lock` next to `baseline.json`), re-reads the document, applies
//! the change, writes a uniquely named temp file in the same directory and
//! renames it over the original. The lock spans the whole
//! read-modify-write, so writers in other processes (or other handles in
//! this one) are serialized. Readers never take the lock; the rename makes
//! every commit visible all at once.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use ahash::AHashMap;
use anyhow::Result;
use async_trait::async_trait;
use fd_lock::RwLock as FileLock;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use super::{PercentileKey, PercentileRecord, PercentileStore};
use crate::error::HypeError;
use crate::types::StreamId;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreDocument {
    /// Bumped on every commit.
    revision: u64,
    records: Vec<PercentileRecord>,
}

type RecordMap = AHashMap<(StreamId, PercentileKey), PercentileRecord>;

impl StoreDocument {
    fn into_map(self) -> (u64, RecordMap) {
        let map = self.records.into_iter().map(|r| ((r.stream.clone(), r.percentile), r)).collect();
        (self.revision, map)
    }

    fn from_map(revision: u64, map: RecordMap) -> Self {
        let mut records: Vec<_> = map.into_values().collect();
        records.sort_by(|a, b| a.stream.cmp(&b.stream).then(a.percentile.cmp(&b.percentile)));
        Self { revision, records }
    }
}

/// Percentile store persisted to a JSON file.
pub struct JsonFileStore {
    path: PathBuf,
    lock_path: PathBuf,
    /// Keeps this handle's writers from piling up on blocking threads.
    writers: Mutex<()>,
}

impl JsonFileStore {
    /// Open (or lazily create) the store at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let lock_path = path.with_extension("lock");
        Self { path, lock_path, writers: Mutex::new(()) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<StoreDocument> {
        let content = tokio::fs::read_to_string(&self.path).await;
        Ok(parse_document(&self.path, content)?)
    }

    /// Apply `mutate` to the current document and commit the result while
    /// holding the sidecar lock.
    async fn modify<T, F>(&self, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut RecordMap) -> T + Send + 'static,
        T: Send + 'static,
    {
        let _guard = self.writers.lock().await;
        let path = self.path.clone();
        let lock_path = self.lock_path.clone();

        let out = tokio::task::spawn_blocking(move || modify_locked(&path, &lock_path, mutate))
            .await
            .map_err(|e| HypeError::Store(format!("store writer task failed: {e}")))??;
        Ok(out)
    }
}

fn parse_document(path: &Path, content: std::io::Result<String>) -> Result<StoreDocument, HypeError> {
    match content {
        Ok(content) if content.trim().is_empty() => Ok(StoreDocument::default()),
        Ok(content) => serde_json::from_str(&content)
            .map_err(|e| HypeError::Store(format!("corrupt baseline store {}: {e}", path.display()))),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(StoreDocument::default()),
        Err(e) => Err(HypeError::Store(format!("failed to read {}: {e}", path.display()))),
    }
}

fn modify_locked<T>(path: &Path, lock_path: &Path, mutate: impl FnOnce(&mut RecordMap) -> T) -> Result<T, HypeError> {
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(lock_path)
        .map_err(|e| HypeError::Store(format!("failed to open lock file {}: {e}", lock_path.display())))?;
    let mut lock = FileLock::new(lock_file);
    let _held = lock.write().map_err(|e| HypeError::Store(format!("failed to lock {}: {e}", lock_path.display())))?;

    let (revision, mut map) = parse_document(path, std::fs::read_to_string(path))?.into_map();
    let out = mutate(&mut map);
    let doc = StoreDocument::from_map(revision + 1, map);
    write_document(path, &doc)?;
    debug!("[store] committed revision {} to {}", doc.revision, path.display());
    Ok(out)
}

fn write_document(path: &Path, doc: &StoreDocument) -> Result<(), HypeError> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let failed = |e: &dyn std::fmt::Display| HypeError::Store(format!("failed to write {}: {e}", path.display()));

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| failed(&e))?;
    serde_json::to_writer_pretty(&mut tmp, doc).map_err(|e| failed(&e))?;
    tmp.flush().map_err(|e| failed(&e))?;
    tmp.as_file().sync_all().map_err(|e| failed(&e))?;
    let _file: File = tmp.persist(path).map_err(|e| failed(&e.error))?;
    Ok(())
}

fn merge_into(map: &mut RecordMap, stream: &StreamId, percentile: PercentileKey, value: f64, n: u64) -> PercentileRecord {
    map.entry((stream.clone(), percentile))
        .and_modify(|r| r.merge(value, n))
        .or_insert_with(|| PercentileRecord::new(stream.clone(), percentile, value, n))
        .clone()
}

#[async_trait]
impl PercentileStore for JsonFileStore {
    async fn get(&self, stream: &StreamId, percentile: PercentileKey) -> Result<Option<PercentileRecord>> {
        let doc = self.load().await?;
        Ok(doc.records.into_iter().find(|r| &r.stream == stream && r.percentile == percentile))
    }

    async fn upsert(
        &self,
        stream: &StreamId,
        percentile: PercentileKey,
        value: f64,
        n: u64,
    ) -> Result<PercentileRecord> {
        let stream = stream.clone();
        self.modify(move |map| merge_into(map, &stream, percentile, value, n)).await
    }

    async fn delete_all(&self, stream: &StreamId) -> Result<usize> {
        let stream = stream.clone();
        self.modify(move |map| {
            let before = map.len();
            map.retain(|(s, _), _| s != &stream);
            before - map.len()
        })
        .await
    }

    async fn upsert_many(&self, stream: &StreamId, values: &[(PercentileKey, f64)]) -> Result<()> {
        let stream = stream.clone();
        let values = values.to_vec();
        self.modify(move |map| {
            for (percentile, value) in values {
                merge_into(map, &stream, percentile, value, 1);
            }
        })
        .await
    }
}
