//! # Feed poller
//! One worker's loop over the feeds it owns:
//! fetch → filter against the watermark → pipeline → sink → advance watermark.
//!
//! A sweep visits every owned feed once, in order. When no feed advanced during
//! a sweep the worker sleeps once for the configured duration; otherwise it
//! sweeps again right away. Failures are contained per feed (fetch) or per entry
//! (extract/classify/sink), logged, and counted in [`WorkerStats`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};
use serde::Serialize;
use tokio::sync::watch;

use crate::ingest::error::{ConfigError, ErrorKind, IngestError};
use crate::ingest::filter::{filter_new, OrderPolicy};
use crate::ingest::pipeline::{EntryContext, RecordPipeline};
use crate::ingest::timestamps::{IngestStamps, MissingTimestamp};
use crate::ingest::types::{FeedFetcher, FeedSource, Timestamp, TimestampExtractor};
use crate::ingest::watermark::WatermarkStore;
use crate::sink::Sink;

/// Where a worker currently is in its loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PollerState {
    Idle,
    Fetching,
    Filtering,
    Emitting,
    Sleeping,
    Stopped,
}

/// Read-only collaborators shared by every worker.
#[derive(Clone)]
pub struct Collaborators {
    pub fetcher: Arc<dyn FeedFetcher>,
    pub timestamps: Arc<dyn TimestampExtractor>,
    pub pipeline: RecordPipeline,
}

#[derive(Debug, Clone, Copy)]
pub struct PollerSettings {
    /// Pause after a sweep in which no feed advanced.
    pub sleep: Duration,
    pub order_policy: OrderPolicy,
}

impl Default for PollerSettings {
    fn default() -> Self {
        Self {
            sleep: Duration::from_secs(5),
            order_policy: OrderPolicy::TrustSource,
        }
    }
}

/// Lock-free counters for one worker.
#[derive(Debug, Default)]
pub struct WorkerStats {
    sweeps: AtomicU64,
    idle_sleeps: AtomicU64,
    entries_accepted: AtomicU64,
    rows_emitted: AtomicU64,
    unordered_pulls: AtomicU64,
    fetch_errors: AtomicU64,
    extract_errors: AtomicU64,
    classify_errors: AtomicU64,
    sink_errors: AtomicU64,
}

impl WorkerStats {
    fn record_error(&self, kind: ErrorKind) {
        let c = match kind {
            ErrorKind::Fetch => &self.fetch_errors,
            ErrorKind::Extract => &self.extract_errors,
            ErrorKind::Classify => &self.classify_errors,
            ErrorKind::Sink => &self.sink_errors,
        };
        c.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            sweeps: self.sweeps.load(Ordering::Relaxed),
            idle_sleeps: self.idle_sleeps.load(Ordering::Relaxed),
            entries_accepted: self.entries_accepted.load(Ordering::Relaxed),
            rows_emitted: self.rows_emitted.load(Ordering::Relaxed),
            unordered_pulls: self.unordered_pulls.load(Ordering::Relaxed),
            fetch_errors: self.fetch_errors.load(Ordering::Relaxed),
            extract_errors: self.extract_errors.load(Ordering::Relaxed),
            classify_errors: self.classify_errors.load(Ordering::Relaxed),
            sink_errors: self.sink_errors.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub sweeps: u64,
    pub idle_sleeps: u64,
    pub entries_accepted: u64,
    pub rows_emitted: u64,
    pub unordered_pulls: u64,
    pub fetch_errors: u64,
    pub extract_errors: u64,
    pub classify_errors: u64,
    pub sink_errors: u64,
}

impl StatsSnapshot {
    pub fn errors(&self, kind: ErrorKind) -> u64 {
        match kind {
            ErrorKind::Fetch => self.fetch_errors,
            ErrorKind::Extract => self.extract_errors,
            ErrorKind::Classify => self.classify_errors,
            ErrorKind::Sink => self.sink_errors,
        }
    }

    pub fn total_errors(&self) -> u64 {
        self.fetch_errors + self.extract_errors + self.classify_errors + self.sink_errors
    }
}

/// Result of one pass over every owned feed.
#[derive(Debug, Default)]
pub struct SweepReport {
    /// At least one feed accepted new entries.
    pub advanced: bool,
    pub entries_accepted: usize,
    pub rows_emitted: usize,
    pub errors: Vec<IngestError>,
}

pub struct FeedPoller {
    worker: usize,
    sources: Vec<FeedSource>,
    watermarks: WatermarkStore,
    stamps: IngestStamps,
    collab: Collaborators,
    sink: Arc<dyn Sink>,
    settings: PollerSettings,
    stats: Arc<WorkerStats>,
    state: watch::Sender<PollerState>,
}

impl FeedPoller {
    pub fn new(
        worker: usize,
        sources: Vec<FeedSource>,
        collab: Collaborators,
        sink: Arc<dyn Sink>,
        settings: PollerSettings,
    ) -> Result<Self, ConfigError> {
        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        if settings.sleep.is_zero() {
            return Err(ConfigError::ZeroSleep);
        }
        collab.pipeline.check_against(sink.schema())?;

        let (state, _) = watch::channel(PollerState::Idle);
        Ok(Self {
            worker,
            sources,
            watermarks: WatermarkStore::new(),
            stamps: IngestStamps::new(),
            collab,
            sink,
            settings,
            stats: Arc::new(WorkerStats::default()),
            state,
        })
    }

    pub fn worker(&self) -> usize {
        self.worker
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn stats(&self) -> Arc<WorkerStats> {
        self.stats.clone()
    }

    pub fn state(&self) -> watch::Receiver<PollerState> {
        self.state.subscribe()
    }

    pub fn watermark(&self, source: &FeedSource) -> Option<Timestamp> {
        self.watermarks.get(source)
    }

    /// One pass over every owned feed, without sleeping.
    pub async fn sweep(&mut self) -> SweepReport {
        self.sweep_inner(None).await
    }

    /// Loop until `cancel` flips to `true` (or its sender is dropped).
    /// Cancellation is honored at the top of a sweep, between feeds, and
    /// during the idle sleep; an in-flight feed is always finished first.
    pub async fn run(mut self, mut cancel: watch::Receiver<bool>) -> StatsSnapshot {
        tracing::info!(
            worker = self.worker,
            feeds = self.sources.len(),
            sleep_secs = self.settings.sleep.as_secs_f64(),
            "poller started"
        );

        loop {
            if *cancel.borrow() {
                break;
            }

            let report = self.sweep_inner(Some(&cancel)).await;
            if report.advanced {
                continue;
            }
            if *cancel.borrow() {
                break;
            }

            self.stats.idle_sleeps.fetch_add(1, Ordering::Relaxed);
            counter!("ingest_idle_sleeps_total").increment(1);
            self.state.send_replace(PollerState::Sleeping);
            tracing::debug!(worker = self.worker, "no feed advanced; sleeping");

            tokio::select! {
                _ = tokio::time::sleep(self.settings.sleep) => {}
                changed = cancel.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        self.state.send_replace(PollerState::Stopped);
        let snap = self.stats.snapshot();
        tracing::info!(
            worker = self.worker,
            sweeps = snap.sweeps,
            rows = snap.rows_emitted,
            errors = snap.total_errors(),
            "poller stopped"
        );
        snap
    }

    async fn sweep_inner(&mut self, cancel: Option<&watch::Receiver<bool>>) -> SweepReport {
        let mut report = SweepReport::default();

        for idx in 0..self.sources.len() {
            if cancel.is_some_and(|c| *c.borrow()) {
                break;
            }
            let source = self.sources[idx].clone();
            self.poll_source(&source, &mut report).await;
        }

        self.stats.sweeps.fetch_add(1, Ordering::Relaxed);
        counter!("ingest_sweeps_total").increment(1);
        gauge!("ingest_last_sweep_ts").set(chrono::Utc::now().timestamp() as f64);
        self.state.send_replace(PollerState::Idle);
        report
    }

    async fn poll_source(&mut self, source: &FeedSource, report: &mut SweepReport) {
        self.state.send_replace(PollerState::Fetching);
        let t0 = Instant::now();
        let fetched = self.collab.fetcher.fetch(source).await;
        histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let entries = match fetched {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(
                    worker = self.worker,
                    source = %source,
                    fetcher = self.collab.fetcher.name(),
                    error = %format!("{e:#}"),
                    "feed fetch failed; skipping this sweep"
                );
                self.stats.record_error(ErrorKind::Fetch);
                counter!("ingest_fetch_errors_total").increment(1);
                report.errors.push(IngestError::fetch(source, &e));
                return;
            }
        };

        self.state.send_replace(PollerState::Filtering);
        let watermark = self.watermarks.get(source);
        let fetched_count = entries.len();
        let timestamps = self.collab.timestamps.as_ref();
        let outcome = match timestamps.missing() {
            MissingTimestamp::Reject => {
                filter_new(entries, watermark, timestamps, self.settings.order_policy)
            }
            MissingTimestamp::IngestTime => {
                self.stamps
                    .refresh(source, &entries, timestamps, chrono::Utc::now());
                filter_new(
                    entries,
                    watermark,
                    &self.stamps.extractor(source, timestamps),
                    self.settings.order_policy,
                )
            }
        };

        if outcome.unordered {
            self.stats.unordered_pulls.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                worker = self.worker,
                source = %source,
                policy = ?self.settings.order_policy,
                "feed entries are not newest-first"
            );
        }
        if outcome.hit_undated {
            tracing::debug!(source = %source, "stopped at an entry without a usable timestamp");
        }

        let Some(newest) = outcome.newest else {
            tracing::debug!(source = %source, fetched = fetched_count, "no new entries");
            return;
        };

        self.state.send_replace(PollerState::Emitting);
        let accepted = outcome.accepted.len();
        let mut emitted = 0usize;

        // oldest first, so rows land in chronological order
        for acc in outcome.accepted.into_iter().rev() {
            let ctx = EntryContext {
                source,
                entry: &acc.entry,
                ts: acc.ts,
            };
            let rows = match self.collab.pipeline.process(&ctx) {
                Ok(rows) => rows,
                Err(err) => {
                    tracing::warn!(
                        worker = self.worker,
                        source = %source,
                        kind = %err.kind,
                        error = %err.message,
                        "entry dropped"
                    );
                    self.stats.record_error(err.kind);
                    counter!("ingest_record_errors_total").increment(1);
                    report.errors.push(err);
                    continue;
                }
            };
            let n = rows.len();
            match self.sink.append_all(rows) {
                Ok(()) => emitted += n,
                Err(e) => {
                    tracing::warn!(source = %source, error = %e, "sink rejected entry");
                    self.stats.record_error(ErrorKind::Sink);
                    counter!("ingest_record_errors_total").increment(1);
                    report.errors.push(IngestError::sink(source, &e));
                }
            }
        }

        self.watermarks.set(source, newest);
        report.advanced = true;
        report.entries_accepted += accepted;
        report.rows_emitted += emitted;

        self.stats
            .entries_accepted
            .fetch_add(accepted as u64, Ordering::Relaxed);
        self.stats
            .rows_emitted
            .fetch_add(emitted as u64, Ordering::Relaxed);
        counter!("ingest_entries_accepted_total").increment(accepted as u64);
        counter!("ingest_rows_emitted_total").increment(emitted as u64);

        tracing::debug!(
            worker = self.worker,
            source = %source,
            fetched = fetched_count,
            accepted,
            rows = emitted,
            watermark = %newest,
            "feed advanced"
        );
    }
}

impl std::fmt::Debug for FeedPoller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeedPoller")
            .field("worker", &self.worker)
            .field("sources", &self.sources)
            .field("settings", &self.settings)
            .finish()
    }
}
