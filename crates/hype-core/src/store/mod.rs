//! Durable percentile baseline storage.
//!
//! A baseline is one [`PercentileRecord`] per (stream, grid percentile). Records
//! are merged with a running average so the stored value converges towards
//! the long-run distribution while memory stays bounded by the grid size.
//!
//! Two implementations are provided:
//!
//! 1. [`MemoryStore`]: process-local, for tests and dry runs.
//! 2. [`JsonFileStore`]: a JSON document on disk; read-modify-write runs
//!    under an advisory file lock so several processes can share one file.

pub mod file;
pub mod memory;

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::StreamId;

pub use file::JsonFileStore;
pub use memory::MemoryStore;

/// Resolution of [`PercentileKey`]: one unit is `1e-4`.
const KEY_SCALE: f64 = 10_000.0;

/// A percentile on the baseline grid, stored as an integer number of `1e-4`
/// steps so keys compare exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PercentileKey(u16);

impl PercentileKey {
    pub const MAX: PercentileKey = PercentileKey(10_000);

    pub const fn from_basis_points(bp: u16) -> Self {
        Self(if bp > 10_000 { 10_000 } else { bp })
    }

    /// The grid key nearest to `p`, if `p` lies on the baseline grid.
    pub fn on_grid(p: f64) -> Option<Self> {
        if !(0.0..=1.0).contains(&p) {
            return None;
        }
        let bp = (p * KEY_SCALE).round() as u16;
        let key = Self(bp);
        ((p - key.as_f64()).abs() < 1e-9 && baseline_grid().any(|k| k == key)).then_some(key)
    }

    pub fn basis_points(self) -> u16 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / KEY_SCALE
    }
}

impl fmt::Display for PercentileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_f64())
    }
}

/// The fixed percentile grid a baseline is condensed to.
///
/// Coarse deciles up to 0.7, then percent steps through 0.98, then per-mille
/// steps to 0.998, then 1e-4 steps to 0.9999, plus 1.0.
pub fn baseline_grid() -> impl Iterator<Item = PercentileKey> {
    (0..=7u16)
        .map(|i| i * 1_000)
        .chain((80..=98u16).map(|i| i * 100))
        .chain((990..=998u16).map(|i| i * 10))
        .chain(9_990..=9_999u16)
        .chain(std::iter::once(10_000))
        .map(PercentileKey)
}

/// One stored baseline value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PercentileRecord {
    pub stream: StreamId,
    pub percentile: PercentileKey,
    pub value: f64,
    /// Number of flushes merged into `value`.
    pub n: u64,
}

impl PercentileRecord {
    /// A fresh record holding a single merged value.
    pub fn new(stream: StreamId, percentile: PercentileKey, value: f64, n: u64) -> Self {
        Self { stream, percentile, value, n: n.max(1) }
    }

    /// Running-average merge of `incoming` with weight `n`:
    /// `value * (n_old / n_new) + incoming * n / n_new`.
    pub fn merge(&mut self, incoming: f64, n: u64) {
        let n = n.max(1);
        let n_new = self.n + n;
        let (old, new) = (self.n as f64, n_new as f64);
        self.value = self.value * (old / new) + incoming * (n as f64) / new;
        self.n = n_new;
    }
}

/// Durable key-value store for percentile baselines.
///
/// Implementations must make [`upsert`](PercentileStore::upsert) an atomic
/// read-modify-write: concurrent merges for the same key never lose updates.
#[async_trait]
pub trait PercentileStore: Send + Sync {
    /// Fetch one record.
    async fn get(&self, stream: &StreamId, percentile: PercentileKey) -> Result<Option<PercentileRecord>>;

    /// Merge `value` (weight `n`) into the record, creating it if missing.
    /// Returns the record after the merge.
    async fn upsert(&self, stream: &StreamId, percentile: PercentileKey, value: f64, n: u64)
    -> Result<PercentileRecord>;

    /// Delete every record of `stream`. Returns how many were removed.
    async fn delete_all(&self, stream: &StreamId) -> Result<usize>;

    /// Merge a whole grid at once. The default upserts one key at a time.
    async fn upsert_many(&self, stream: &StreamId, values: &[(PercentileKey, f64)]) -> Result<()> {
        for &(percentile, value) in values {
            self.upsert(stream, percentile, value, 1).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grid_shape() {
        let grid: Vec<_> = baseline_grid().collect();
        assert_eq!(grid.len(), 8 + 19 + 9 + 10 + 1);
        assert!(grid.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(grid.first().unwrap().as_f64(), 0.0);
        assert_eq!(grid.last().copied(), Some(PercentileKey::MAX));
        assert!(grid.contains(&PercentileKey::from_basis_points(9_950)));
    }

    #[test]
    fn on_grid_lookup() {
        assert_eq!(PercentileKey::on_grid(0.9).map(|k| k.basis_points()), Some(9_000));
        assert_eq!(PercentileKey::on_grid(0.85).map(|k| k.basis_points()), Some(8_500));
        assert_eq!(PercentileKey::on_grid(0.9999).map(|k| k.basis_points()), Some(9_999));
        assert_eq!(PercentileKey::on_grid(1.0), Some(PercentileKey::MAX));
        assert_eq!(PercentileKey::on_grid(0.75), None);
        assert_eq!(PercentileKey::on_grid(0.91234), None);
        assert_eq!(PercentileKey::on_grid(1.5), None);
    }

    #[test]
    fn running_average_merge() {
        let mut rec = PercentileRecord::new(StreamId::new("s").unwrap(), PercentileKey::MAX, 10.0, 3);
        rec.merge(18.0, 1);
        assert_eq!(rec.n, 4);
        assert!((rec.value - 12.0).abs() < 1e-12);
    }
}
