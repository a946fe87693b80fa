//! Baseline synchronization: condense samples into the durable percentile grid.
//!
//! A flush runs in the background after the monitor hands out a
//! [`FlushTicket`](crate::monitor::FlushTicket):
//!
//! 1. skip if fewer than `flush_min_samples` samples are held;
//! 2. re-validate that the stream is live, otherwise reset it and stop;
//! 3. snapshot and clear the held samples;
//! 4. compute every grid percentile of the snapshot and merge it into the
//!    store with a running average;
//! 5. re-fetch the threshold percentile and hand it to the monitor.
//!
//! The monitor lock is only held for the short synchronous steps, never
//! across store or metadata I/O.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use crate::config::MonitorSettings;
use crate::error::HypeError;
use crate::metadata::StreamMetadata;
use crate::monitor::{FlushTicket, SharedMonitor};
use crate::order_stats::percentile_of;
use crate::store::{PercentileKey, PercentileStore, baseline_grid};
use crate::time_util::now_ms;
use crate::types::StreamId;

/// What a flush ended up doing.
#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Fewer samples than the flush minimum.
    Skipped,
    /// The stream is no longer live; it was reset instead.
    StreamOffline,
    /// The monitor was reset after the ticket was issued.
    Superseded,
    /// Samples were merged into the store.
    Flushed { samples: usize, threshold: Option<f64> },
}

/// Condense a sorted snapshot into `(grid percentile, value)` pairs.
pub fn condense(sorted: &[f64]) -> Vec<(PercentileKey, f64)> {
    baseline_grid().filter_map(|key| percentile_of(sorted, key.as_f64()).map(|v| (key, v))).collect()
}

/// Moves accumulated samples into durable storage and keeps the held
/// threshold of each monitor current.
pub struct BaselineSync {
    store: Arc<dyn PercentileStore>,
    metadata: Arc<dyn StreamMetadata>,
    threshold_key: PercentileKey,
    min_samples: usize,
    /// Bounds concurrent store traffic across all streams.
    jobs: Arc<Semaphore>,
}

impl BaselineSync {
    pub fn new(
        store: Arc<dyn PercentileStore>,
        metadata: Arc<dyn StreamMetadata>,
        settings: &MonitorSettings,
        jobs: Arc<Semaphore>,
    ) -> Self {
        Self {
            store,
            metadata,
            threshold_key: settings.hype_percentile,
            min_samples: settings.flush_min_samples,
            jobs,
        }
    }

    pub fn store(&self) -> &Arc<dyn PercentileStore> {
        &self.store
    }

    /// Durable value at the threshold percentile, if a baseline exists.
    pub async fn fetch_threshold(&self, stream: &StreamId) -> Result<Option<f64>> {
        let _permit = self.jobs.acquire().await.context("job pool closed")?;
        let rec = self.store.get(stream, self.threshold_key).await?;
        Ok(rec.map(|r| r.value))
    }

    /// Re-fetch the threshold and hand it to the monitor.
    ///
    /// On failure the monitor keeps its previous threshold.
    pub async fn refresh_threshold(&self, monitor: &SharedMonitor) -> Result<Option<f64>> {
        let id = monitor.lock().await.id().clone();
        let threshold = self.fetch_threshold(&id).await?;
        monitor.lock().await.set_baseline_threshold(threshold);
        info!("[{id}] hype threshold (p{}) = {threshold:?}", self.threshold_key);
        Ok(threshold)
    }

    /// Run one flush for `ticket`. Always releases the monitor's flush slot.
    pub async fn flush(&self, monitor: &SharedMonitor, ticket: FlushTicket) -> Result<FlushOutcome> {
        let result = self.flush_inner(monitor, ticket).await;
        monitor.lock().await.finish_flush(ticket.generation);
        result
    }

    async fn flush_inner(&self, monitor: &SharedMonitor, ticket: FlushTicket) -> Result<FlushOutcome> {
        let (id, held) = {
            let m = monitor.lock().await;
            (m.id().clone(), m.stats().len())
        };
        if held < self.min_samples {
            return Ok(FlushOutcome::Skipped);
        }

        let live = self
            .metadata
            .is_live(&id)
            .await
            .map_err(|e| HypeError::Metadata(format!("[{id}] live re-validation failed: {e:#}")))?;
        if !live {
            let mut m = monitor.lock().await;
            if m.generation() == ticket.generation {
                warn!("[{id}] stream offline at flush time, discarding {held} samples");
                m.on_offline(now_ms());
            }
            return Ok(FlushOutcome::StreamOffline);
        }

        let Some(snapshot) = monitor.lock().await.take_flush_snapshot(ticket.generation) else {
            debug!("[{id}] flush superseded by reset");
            return Ok(FlushOutcome::Superseded);
        };

        let grid = condense(&snapshot);
        let merged = {
            let _permit = self.jobs.acquire().await.context("job pool closed")?;
            self.store.upsert_many(&id, &grid).await
        };
        if let Err(e) = merged {
            monitor.lock().await.restore_flush_snapshot(ticket.generation, snapshot);
            return Err(e.context(format!("[{id}] baseline merge failed")));
        }
        info!("[{id}] flushed {} samples into {} percentiles", snapshot.len(), grid.len());

        let threshold = match self.fetch_threshold(&id).await {
            Ok(t) => {
                monitor.lock().await.set_baseline_threshold(t);
                t
            }
            Err(e) => {
                warn!("[{id}] threshold refresh failed, keeping previous: {e:#}");
                monitor.lock().await.baseline_threshold()
            }
        };

        Ok(FlushOutcome::Flushed { samples: snapshot.len(), threshold })
    }
}
