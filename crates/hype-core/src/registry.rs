//! Registry of per-stream monitors and the background work around them.
//!
//! ```text
//! chat feed ──► on_message ──┐
//! poller    ──► on_stream_online / on_stream_offline / set_viewer_count
//!                            ▼
//!                   SharedMonitor (one per stream)
//!                            ▲
//! ticker task (per stream) ──┘ tick ──► HypeEvent ──► NotificationSink   (job)
//!                                  └──► FlushTicket ──► BaselineSync.flush (job)
//! ```
//!
//! Each stream is serialized by its own lock; different streams proceed in
//! parallel. Jobs (notifications, flushes, threshold and viewer refreshes)
//! are tracked in one `JoinSet` and share one semaphore. On shutdown the
//! tickers stop first, then outstanding jobs get [`SHUTDOWN_GRACE`] to finish
//! before they are aborted.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use anyhow::Result;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::baseline::{BaselineSync, FlushOutcome};
use crate::config::MonitorSettings;
use crate::error::HypeError;
use crate::metadata::StreamMetadata;
use crate::monitor::{MonitorStatus, SharedMonitor, StreamMonitor, TickReport};
use crate::notify::NotificationSink;
use crate::store::PercentileStore;
use crate::time_util::now_ms;
use crate::types::{ChatMessage, Stream, StreamId};

/// How long shutdown waits for in-flight jobs before aborting them.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

pub struct MonitorRegistry {
    settings: Arc<MonitorSettings>,
    monitors: RwLock<AHashMap<StreamId, SharedMonitor>>,
    baseline: Arc<BaselineSync>,
    metadata: Arc<dyn StreamMetadata>,
    notifier: Arc<dyn NotificationSink>,
    permits: Arc<Semaphore>,
    tickers: Mutex<Vec<JoinHandle<()>>>,
    jobs: Mutex<JoinSet<()>>,
}

impl MonitorRegistry {
    pub fn new(
        settings: MonitorSettings,
        store: Arc<dyn PercentileStore>,
        metadata: Arc<dyn StreamMetadata>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_jobs));
        let baseline = Arc::new(BaselineSync::new(store, metadata.clone(), &settings, permits.clone()));
        Self {
            settings: Arc::new(settings),
            monitors: RwLock::new(AHashMap::new()),
            baseline,
            metadata,
            notifier,
            permits,
            tickers: Mutex::new(Vec::new()),
            jobs: Mutex::new(JoinSet::new()),
        }
    }

    pub fn settings(&self) -> &MonitorSettings {
        &self.settings
    }

    pub fn baseline(&self) -> &Arc<BaselineSync> {
        &self.baseline
    }

    /// Create a monitor for `stream` without starting its ticker.
    pub async fn register(&self, stream: Stream) -> Result<SharedMonitor> {
        let mut monitors = self.monitors.write().await;
        if monitors.contains_key(&stream.id) {
            return Err(HypeError::InvalidInput(format!("stream {} already registered", stream.id)).into());
        }
        let id = stream.id.clone();
        let monitor = Arc::new(Mutex::new(StreamMonitor::new(stream, self.settings.clone())));
        monitors.insert(id, monitor.clone());
        Ok(monitor)
    }

    /// Register `stream`, load its threshold, and start its periodic ticker.
    pub async fn add_stream(self: &Arc<Self>, stream: Stream) -> Result<SharedMonitor> {
        let id = stream.id.clone();
        let monitor = self.register(stream).await?;

        let baseline = self.baseline.clone();
        let m = monitor.clone();
        self.spawn_job(async move {
            if let Err(e) = baseline.refresh_threshold(&m).await {
                warn!("initial threshold load failed: {e:#}");
            }
        })
        .await;

        let weak = Arc::downgrade(self);
        let period = self.settings.tick;
        let ticker_id = id.clone();
        let ticker = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            interval.tick().await; // skip the immediate first tick

            loop {
                interval.tick().await;
                let Some(registry) = weak.upgrade() else { break };
                if let Err(e) = registry.tick(&ticker_id, now_ms()).await {
                    warn!("[{ticker_id}] tick failed: {e:#}");
                }
            }
        });

        self.tickers.lock().await.push(ticker);
        info!("[{id}] monitoring every {:?}", period);
        Ok(monitor)
    }

    pub async fn monitor(&self, id: &StreamId) -> Option<SharedMonitor> {
        self.monitors.read().await.get(id).cloned()
    }

    async fn require(&self, id: &StreamId) -> Result<SharedMonitor> {
        self.monitor(id).await.ok_or_else(|| HypeError::InvalidInput(format!("unknown stream {id}")).into())
    }

    pub async fn stream_ids(&self) -> Vec<StreamId> {
        let mut ids: Vec<_> = self.monitors.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Route one chat message. Returns whether it was recorded.
    pub async fn on_message(&self, msg: &ChatMessage) -> bool {
        let Some(monitor) = self.monitor(&msg.stream).await else {
            return false;
        };
        monitor.lock().await.on_message(&msg.text, msg.received_at_ms)
    }

    /// Mark the stream live and refresh its threshold and audience size in
    /// the background.
    pub async fn on_stream_online(&self, id: &StreamId, started_at_ms: u64) -> Result<()> {
        let monitor = self.require(id).await?;
        monitor.lock().await.on_online(started_at_ms);

        let baseline = self.baseline.clone();
        let metadata = self.metadata.clone();
        self.spawn_job(async move {
            if let Err(e) = baseline.refresh_threshold(&monitor).await {
                warn!("threshold refresh after online failed: {e:#}");
            }
            if let Err(e) = refresh_viewers(metadata.as_ref(), &monitor).await {
                warn!("{e:#}");
            }
        })
        .await;
        Ok(())
    }

    pub async fn on_stream_offline(&self, id: &StreamId) -> Result<()> {
        let monitor = self.require(id).await?;
        monitor.lock().await.on_offline(now_ms());
        Ok(())
    }

    pub async fn set_viewer_count(&self, id: &StreamId, viewers: Option<u64>) -> Result<()> {
        let monitor = self.require(id).await?;
        monitor.lock().await.set_viewers(viewers);
        Ok(())
    }

    pub async fn set_display_name(&self, id: &StreamId, name: &str) -> Result<()> {
        let monitor = self.require(id).await?;
        monitor.lock().await.set_display_name(name);
        Ok(())
    }

    /// Ask the metadata source for the stream's audience size.
    ///
    /// A known count replaces the monitor's; an unknown one leaves it as is.
    pub async fn refresh_viewers(&self, id: &StreamId) -> Result<Option<u64>> {
        let monitor = self.require(id).await?;
        refresh_viewers(self.metadata.as_ref(), &monitor).await
    }

    /// Tick one stream and dispatch the resulting notification and flush
    /// as background jobs.
    pub async fn tick(&self, id: &StreamId, now: u64) -> Result<TickReport> {
        let monitor = self.require(id).await?;
        let (report, name) = {
            let mut m = monitor.lock().await;
            (m.tick(now), m.stream().display_name.clone())
        };

        if let Some(event) = &report.event {
            let summary = event.summary(&name);
            info!("{summary}");
            let notifier = self.notifier.clone();
            let permits = self.permits.clone();
            let stream = id.clone();
            self.spawn_job(async move {
                let Ok(_permit) = permits.acquire_owned().await else { return };
                if let Err(e) = notifier.send(&summary).await {
                    error!("[{stream}] notification failed: {e:#}");
                }
            })
            .await;
        }

        if let Some(ticket) = report.flush {
            let baseline = self.baseline.clone();
            let stream = id.clone();
            self.spawn_job(async move {
                match baseline.flush(&monitor, ticket).await {
                    Ok(FlushOutcome::Flushed { samples, threshold }) => {
                        info!("[{stream}] baseline updated from {samples} samples, threshold {threshold:?}");
                    }
                    Ok(outcome) => info!("[{stream}] flush: {outcome:?}"),
                    Err(e) => error!("[{stream}] flush failed, samples kept: {e:#}"),
                }
            })
            .await;
        }

        Ok(report)
    }

    /// Delete the stream's durable baseline and drop its held threshold.
    ///
    /// Returns the number of deleted records.
    pub async fn reset_baseline(&self, id: &StreamId) -> Result<usize> {
        let monitor = self.require(id).await?;
        let deleted = {
            let _permit = self.permits.acquire().await?;
            self.baseline.store().delete_all(id).await?
        };
        monitor.lock().await.set_baseline_threshold(None);
        self.baseline.refresh_threshold(&monitor).await?;
        info!("[{id}] cleared {deleted} baseline records");
        Ok(deleted)
    }

    pub async fn status(&self, id: &StreamId) -> Result<MonitorStatus> {
        let monitor = self.require(id).await?;
        let status = monitor.lock().await.status();
        Ok(status)
    }

    async fn spawn_job<F>(&self, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut jobs = self.jobs.lock().await;
        while let Some(done) = jobs.try_join_next() {
            log_job_result(done);
        }
        jobs.spawn(job);
    }

    /// Number of jobs not yet reaped.
    pub async fn pending_jobs(&self) -> usize {
        self.jobs.lock().await.len()
    }

    /// Wait for every job dispatched so far.
    pub async fn wait_for_jobs(&self) {
        let mut jobs = std::mem::take(&mut *self.jobs.lock().await);
        drain(&mut jobs).await;
    }

    /// Stop the tickers, let in-flight jobs finish within
    /// [`SHUTDOWN_GRACE`], then abort whatever is left.
    pub async fn shutdown(&self) {
        self.shutdown_within(SHUTDOWN_GRACE).await;
    }

    async fn shutdown_within(&self, grace: Duration) {
        let tickers: Vec<_> = self.tickers.lock().await.drain(..).collect();
        for ticker in &tickers {
            ticker.abort();
        }
        for ticker in tickers {
            let _ = ticker.await;
        }

        let mut jobs = std::mem::take(&mut *self.jobs.lock().await);
        if !jobs.is_empty() {
            info!("waiting for {} background job(s)", jobs.len());
        }
        if tokio::time::timeout(grace, drain(&mut jobs)).await.is_err() {
            warn!("{} background job(s) still running after {grace:?}, aborting", jobs.len());
            jobs.shutdown().await;
        }
        info!("monitor registry stopped");
    }
}

async fn refresh_viewers(metadata: &dyn StreamMetadata, monitor: &SharedMonitor) -> Result<Option<u64>> {
    let id = monitor.lock().await.id().clone();
    let viewers = metadata
        .viewer_count(&id)
        .await
        .map_err(|e| HypeError::Metadata(format!("[{id}] viewer count lookup failed: {e:#}")))?;
    if viewers.is_some() {
        monitor.lock().await.set_viewers(viewers);
    }
    Ok(viewers)
}

async fn drain(jobs: &mut JoinSet<()>) {
    while let Some(done) = jobs.join_next().await {
        log_job_result(done);
    }
}

fn log_job_result(done: Result<(), tokio::task::JoinError>) {
    match done {
        Err(e) if e.is_panic() => error!("background job panicked: {e}"),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::metadata::AlwaysLive;
    use crate::store::{MemoryStore, PercentileKey, PercentileRecord};
    use crate::types::HypeEvent;

    const T0: u64 = 1_700_000_000_000;

    #[derive(Default)]
    struct RecordingSink(Mutex<Vec<String>>);

    #[async_trait]
    impl NotificationSink for RecordingSink {
        async fn send(&self, message: &str) -> Result<()> {
            self.0.lock().await.push(message.to_string());
            Ok(())
        }
    }

    fn settings() -> MonitorSettings {
        MonitorSettings {
            store_cooldown_ms: 0,
            save_cooldown_ms: 0,
            flush_min_samples: 2,
            hype_percentile: PercentileKey::MAX,
            ..Default::default()
        }
    }

    fn id() -> StreamId {
        StreamId::new("buddha").unwrap()
    }

    fn registry() -> (MonitorRegistry, Arc<MemoryStore>, Arc<RecordingSink>) {
        let store = Arc::new(MemoryStore::new());
        let sink = Arc::new(RecordingSink::default());
        let reg = MonitorRegistry::new(settings(), store.clone(), Arc::new(AlwaysLive), sink.clone());
        (reg, store, sink)
    }

    fn msg(at: u64) -> ChatMessage {
        ChatMessage { stream: id(), author: "viewer".into(), text: "POG".into(), received_at_ms: at }
    }

    #[tokio::test]
    async fn duplicate_and_unknown_streams_are_rejected() {
        let (reg, _store, _sink) = registry();
        reg.register(Stream::new(id())).await.unwrap();
        assert!(reg.register(Stream::new(id())).await.is_err());

        let other = StreamId::new("nobody").unwrap();
        assert!(reg.on_stream_online(&other, T0).await.is_err());
        assert!(reg.tick(&other, T0).await.is_err());
        assert!(!reg.on_message(&ChatMessage { stream: other, ..msg(T0) }).await);
        assert_eq!(reg.stream_ids().await, vec![id()]);
    }

    #[tokio::test]
    async fn hype_is_notified() {
        let (reg, store, sink) = registry();
        store.upsert(&id(), PercentileKey::MAX, 0.5, 1).await.unwrap();
        let monitor = reg.register(Stream::new(id())).await.unwrap();
        reg.set_display_name(&id(), "Buddha").await.unwrap();
        monitor.lock().await.on_online(T0);
        reg.baseline().refresh_threshold(&monitor).await.unwrap();

        for _ in 0..10 {
            assert!(reg.on_message(&msg(T0 + 1_000)).await);
        }
        let report = reg.tick(&id(), T0 + 11_000).await.unwrap();
        assert!(matches!(report.event, Some(HypeEvent::Started { .. })));
        reg.wait_for_jobs().await;

        let report = reg.tick(&id(), T0 + 40_000).await.unwrap();
        assert!(matches!(report.event, Some(HypeEvent::Ended { .. })));
        reg.wait_for_jobs().await;

        let sent = sink.0.lock().await;
        assert_eq!(sent.len(), 2);
        assert!(sent[0].starts_with("Hype Detected-Buddha"));
        assert!(sent[1].starts_with("Hype Ended-Buddha"));
    }

    #[tokio::test]
    async fn tick_dispatches_flush() {
        let (reg, store, _sink) = registry();
        let monitor = reg.register(Stream::new(id())).await.unwrap();
        monitor.lock().await.on_online(T0);

        reg.on_message(&msg(T0 + 1_000)).await;
        reg.tick(&id(), T0 + 11_000).await.unwrap();
        reg.wait_for_jobs().await;
        reg.on_message(&msg(T0 + 12_000)).await;
        reg.on_message(&msg(T0 + 12_000)).await;
        let report = reg.tick(&id(), T0 + 13_000).await.unwrap();
        assert!(report.flush.is_some());
        reg.wait_for_jobs().await;

        assert!(!store.records(&id()).await.is_empty());
        let status = reg.status(&id()).await.unwrap();
        assert_eq!(status.held_samples, 0);
        assert_eq!(status.count, 2);
        assert_eq!(status.threshold, Some(0.2));
    }

    #[tokio::test]
    async fn reset_baseline_clears_store_and_threshold() {
        let (reg, store, _sink) = registry();
        store.upsert(&id(), PercentileKey::MAX, 3.0, 1).await.unwrap();
        store.upsert(&id(), PercentileKey::from_basis_points(0), 1.0, 1).await.unwrap();
        let monitor = reg.register(Stream::new(id())).await.unwrap();
        reg.baseline().refresh_threshold(&monitor).await.unwrap();
        assert_eq!(reg.status(&id()).await.unwrap().threshold, Some(3.0));

        assert_eq!(reg.reset_baseline(&id()).await.unwrap(), 2);
        assert!(store.records(&id()).await.is_empty());
        assert_eq!(reg.status(&id()).await.unwrap().threshold, None);
    }

    #[tokio::test]
    async fn offline_and_viewers() {
        let (reg, _store, _sink) = registry();
        reg.register(Stream::new(id())).await.unwrap();
        reg.on_stream_online(&id(), T0).await.unwrap();
        reg.set_viewer_count(&id(), Some(1_234)).await.unwrap();
        assert_eq!(reg.status(&id()).await.unwrap().viewers, Some(1_234));

        reg.on_message(&msg(T0 + 1_000)).await;
        reg.on_stream_offline(&id()).await.unwrap();
        let status = reg.status(&id()).await.unwrap();
        assert!(!status.live);
        assert!(!reg.on_message(&msg(T0 + 2_000)).await);
    }

    #[tokio::test]
    async fn add_stream_starts_ticker_and_shutdown_stops_it() {
        let store = Arc::new(MemoryStore::new());
        let reg = Arc::new(MonitorRegistry::new(
            settings(),
            store,
            Arc::new(AlwaysLive),
            Arc::new(RecordingSink::default()),
        ));
        reg.add_stream(Stream::new(id())).await.unwrap();
        assert!(reg.monitor(&id()).await.is_some());
        assert_eq!(reg.tickers.lock().await.len(), 1);
        assert_eq!(reg.pending_jobs().await, 1);

        reg.shutdown().await;
        assert!(reg.tickers.lock().await.is_empty());
        assert_eq!(reg.pending_jobs().await, 0);
    }

    /// Store whose batch merge takes a while, so a flush is still running
    /// when shutdown starts.
    struct SlowStore {
        inner: MemoryStore,
        delay: Duration,
    }

    #[async_trait]
    impl PercentileStore for SlowStore {
        async fn get(&self, stream: &StreamId, percentile: PercentileKey) -> Result<Option<PercentileRecord>> {
            self.inner.get(stream, percentile).await
        }

        async fn upsert(
            &self,
            stream: &StreamId,
            percentile: PercentileKey,
            value: f64,
            n: u64,
        ) -> Result<PercentileRecord> {
            self.inner.upsert(stream, percentile, value, n).await
        }

        async fn delete_all(&self, stream: &StreamId) -> Result<usize> {
            self.inner.delete_all(stream).await
        }

        async fn upsert_many(&self, stream: &StreamId, values: &[(PercentileKey, f64)]) -> Result<()> {
            tokio::time::sleep(self.delay).await;
            self.inner.upsert_many(stream, values).await
        }
    }

    fn slow_registry(delay: Duration) -> (MonitorRegistry, Arc<SlowStore>) {
        let store = Arc::new(SlowStore { inner: MemoryStore::new(), delay });
        let reg =
            MonitorRegistry::new(settings(), store.clone(), Arc::new(AlwaysLive), Arc::new(RecordingSink::default()));
        (reg, store)
    }

    async fn start_flush(reg: &MonitorRegistry) {
        let monitor = reg.register(Stream::new(id())).await.unwrap();
        monitor.lock().await.on_online(T0);
        reg.on_message(&msg(T0 + 1_000)).await;
        reg.tick(&id(), T0 + 11_000).await.unwrap();
        reg.on_message(&msg(T0 + 12_000)).await;
        reg.on_message(&msg(T0 + 12_000)).await;
        let report = reg.tick(&id(), T0 + 13_000).await.unwrap();
        assert!(report.flush.is_some());
    }

    #[tokio::test]
    async fn shutdown_waits_for_inflight_flush() {
        let (reg, store) = slow_registry(Duration::from_millis(50));
        start_flush(&reg).await;
        assert!(reg.pending_jobs().await > 0);

        reg.shutdown().await;
        assert_eq!(reg.pending_jobs().await, 0);
        assert!(!store.inner.records(&id()).await.is_empty());
    }

    #[tokio::test]
    async fn shutdown_aborts_jobs_past_the_grace_period() {
        let (reg, store) = slow_registry(Duration::from_secs(3_600));
        start_flush(&reg).await;

        reg.shutdown_within(Duration::from_millis(20)).await;
        assert_eq!(reg.pending_jobs().await, 0);
        assert!(store.inner.records(&id()).await.is_empty());
    }

    struct FixedAudience(Option<u64>);

    #[async_trait]
    impl StreamMetadata for FixedAudience {
        async fn viewer_count(&self, _stream: &StreamId) -> Result<Option<u64>> {
            match self.0 {
                Some(n) => Ok(Some(n)),
                None => Err(anyhow::anyhow!("status API unavailable")),
            }
        }

        async fn is_live(&self, _stream: &StreamId) -> Result<bool> {
            Ok(true)
        }
    }

    #[tokio::test]
    async fn online_refreshes_audience_size() {
        let reg = MonitorRegistry::new(
            settings(),
            Arc::new(MemoryStore::new()),
            Arc::new(FixedAudience(Some(321))),
            Arc::new(RecordingSink::default()),
        );
        reg.register(Stream::new(id())).await.unwrap();
        reg.on_stream_online(&id(), T0).await.unwrap();
        reg.wait_for_jobs().await;
        assert_eq!(reg.status(&id()).await.unwrap().viewers, Some(321));
    }

    #[tokio::test]
    async fn audience_lookup_failure_is_a_metadata_error() {
        let reg = MonitorRegistry::new(
            settings(),
            Arc::new(MemoryStore::new()),
            Arc::new(FixedAudience(None)),
            Arc::new(RecordingSink::default()),
        );
        reg.register(Stream::new(id())).await.unwrap();
        reg.set_viewer_count(&id(), Some(50)).await.unwrap();

        let err = reg.refresh_viewers(&id()).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<HypeError>(), Some(HypeError::Metadata(_))));
        assert_eq!(reg.status(&id()).await.unwrap().viewers, Some(50));
    }
}
