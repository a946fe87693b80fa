//! In-process percentile store.

use ahash::AHashMap;
use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{PercentileKey, PercentileRecord, PercentileStore};
use crate::types::StreamId;

/// Percentile store held in memory. Lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    records: Mutex<AHashMap<(StreamId, PercentileKey), PercentileRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// All records of `stream`, ordered by percentile.
    pub async fn records(&self, stream: &StreamId) -> Vec<PercentileRecord> {
        let guard = self.records.lock().await;
        let mut out: Vec<_> = guard.values().filter(|r| &r.stream == stream).cloned().collect();
        out.sort_by_key(|r| r.percentile);
        out
    }
}

#[async_trait]
impl PercentileStore for MemoryStore {
    async fn get(&self, stream: &StreamId, percentile: PercentileKey) -> Result<Option<PercentileRecord>> {
        Ok(self.records.lock().await.get(&(stream.clone(), percentile)).cloned())
    }

    async fn upsert(
        &self,
        stream: &StreamId,
        percentile: PercentileKey,
        value: f64,
        n: u64,
    ) -> Result<PercentileRecord> {
        let mut guard = self.records.lock().await;
        let rec = guard
            .entry((stream.clone(), percentile))
            .and_modify(|r| r.merge(value, n))
            .or_insert_with(|| PercentileRecord::new(stream.clone(), percentile, value, n));
        Ok(rec.clone())
    }

    async fn delete_all(&self, stream: &StreamId) -> Result<usize> {
        let mut guard = self.records.lock().await;
        let before = guard.len();
        guard.retain(|(s, _), _| s != stream);
        Ok(before - guard.len())
    }
}
