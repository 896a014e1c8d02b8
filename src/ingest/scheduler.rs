// src/ingest/scheduler.rs
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::ingest::error::ConfigError;
use crate::ingest::filter::OrderPolicy;
use crate::ingest::poller::{
    Collaborators, FeedPoller, PollerSettings, PollerState, StatsSnapshot, WorkerStats,
};
use crate::ingest::types::FeedSource;
use crate::sink::{MemoryTable, MergedOutput, Schema, Sink};

#[derive(Debug, Clone)]
pub struct IngestSchedulerCfg {
    pub sources: Vec<FeedSource>,
    /// Defaults to 1: a single poller owns every feed.
    pub workers: Option<usize>,
    pub sleep: Duration,
    pub order_policy: OrderPolicy,
    /// Column schema each per-worker table is created with.
    pub schema: Schema,
}

impl IngestSchedulerCfg {
    pub fn new(sources: Vec<FeedSource>, sleep: Duration, schema: Schema) -> Self {
        Self {
            sources,
            workers: None,
            sleep,
            order_policy: OrderPolicy::default(),
            schema,
        }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers);
        self
    }

    pub fn with_order_policy(mut self, policy: OrderPolicy) -> Self {
        self.order_policy = policy;
        self
    }
}

/// Contiguous, order-preserving split of `sources` into `workers` groups whose
/// sizes differ by at most one (the first `n % workers` groups take the extra).
pub fn partition(
    sources: &[FeedSource],
    workers: usize,
) -> Result<Vec<Vec<FeedSource>>, ConfigError> {
    let n = sources.len();
    if n == 0 {
        return Err(ConfigError::NoSources);
    }
    if workers == 0 {
        return Err(ConfigError::ZeroWorkers);
    }
    if workers > n {
        return Err(ConfigError::EmptyWorkerGroup {
            workers,
            sources: n,
        });
    }

    let mut seen = HashSet::with_capacity(n);
    for s in sources {
        if !seen.insert(s) {
            return Err(ConfigError::DuplicateSource(s.url().to_string()));
        }
    }

    let base = n / workers;
    let extra = n % workers;
    let mut groups = Vec::with_capacity(workers);
    let mut start = 0;
    for g in 0..workers {
        let len = base + usize::from(g < extra);
        groups.push(sources[start..start + len].to_vec());
        start += len;
    }
    Ok(groups)
}

/// Validate, partition, and start one poller per group. Returns immediately;
/// workers run until the pool is cancelled.
///
/// Must be called inside a Tokio runtime.
pub fn schedule(cfg: IngestSchedulerCfg, collab: Collaborators) -> Result<Scheduled, ConfigError> {
    crate::ingest::ensure_metrics_described();

    let workers = cfg.workers.unwrap_or(1);
    let groups = partition(&cfg.sources, workers)?;
    collab.pipeline.check_against(&cfg.schema)?;

    let settings = PollerSettings {
        sleep: cfg.sleep,
        order_policy: cfg.order_policy,
    };

    // Build every poller before spawning any, so a bad group fails startup cleanly.
    let mut tables = Vec::with_capacity(groups.len());
    let mut pollers = Vec::with_capacity(groups.len());
    for (worker, group) in groups.into_iter().enumerate() {
        let table = Arc::new(MemoryTable::new(cfg.schema.clone()));
        let sink: Arc<dyn Sink> = table.clone();
        pollers.push(FeedPoller::new(worker, group, collab.clone(), sink, settings)?);
        tables.push(table);
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    let mut workers_out = Vec::with_capacity(pollers.len());
    for poller in pollers {
        workers_out.push(spawn_worker(poller, cancel_rx.clone()));
    }

    tracing::info!(
        workers = workers_out.len(),
        feeds = cfg.sources.len(),
        sleep_secs = cfg.sleep.as_secs_f64(),
        "ingest scheduler started"
    );

    Ok(Scheduled {
        pool: WorkerPool {
            cancel: cancel_tx,
            workers: workers_out,
        },
        output: MergedOutput::new(cfg.schema, tables),
    })
}

fn spawn_worker(poller: FeedPoller, cancel: watch::Receiver<bool>) -> WorkerHandle {
    let worker = poller.worker();
    let sources = poller.sources().to_vec();
    let stats = poller.stats();
    let state = poller.state();
    let (ready_tx, ready_rx) = oneshot::channel();

    let span = tracing::info_span!("worker", worker);
    let join = tokio::spawn(
        async move {
            let _ = ready_tx.send(());
            poller.run(cancel).await
        }
        .instrument(span),
    );

    WorkerHandle {
        worker,
        sources,
        stats,
        state,
        ready: Some(ready_rx),
        join,
    }
}

/// Running workers plus the merged view over their tables.
#[derive(Debug)]
pub struct Scheduled {
    pub pool: WorkerPool,
    pub output: MergedOutput,
}

#[derive(Debug)]
pub struct WorkerHandle {
    pub worker: usize,
    pub sources: Vec<FeedSource>,
    stats: Arc<WorkerStats>,
    state: watch::Receiver<PollerState>,
    ready: Option<oneshot::Receiver<()>>,
    join: JoinHandle<StatsSnapshot>,
}

impl WorkerHandle {
    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn state(&self) -> PollerState {
        *self.state.borrow()
    }
}

/// Managed set of pollers: start (via [`schedule`]), await ready, cancel, join.
#[derive(Debug)]
pub struct WorkerPool {
    cancel: watch::Sender<bool>,
    workers: Vec<WorkerHandle>,
}

impl WorkerPool {
    pub fn workers(&self) -> &[WorkerHandle] {
        &self.workers
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    /// Resolves once every worker task has started running.
    pub async fn ready(&mut self) {
        for w in &mut self.workers {
            if let Some(rx) = w.ready.take() {
                // a worker that died before signalling is reported by `join`
                let _ = rx.await;
            }
        }
    }

    pub fn stats(&self) -> Vec<StatsSnapshot> {
        self.workers.iter().map(WorkerHandle::stats).collect()
    }

    /// Ask every worker to stop at its next cancellation point.
    pub fn cancel(&self) {
        self.cancel.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// Wait for all workers to finish; returns their final stats in worker order.
    /// A worker that panicked is logged and reported with its last live counters.
    pub async fn join(self) -> Vec<StatsSnapshot> {
        let mut out = Vec::with_capacity(self.workers.len());
        for w in self.workers {
            let last = w.stats.snapshot();
            match w.join.await {
                Ok(snap) => out.push(snap),
                Err(e) => {
                    tracing::error!(worker = w.worker, error = %e, "worker task failed");
                    out.push(last);
                }
            }
        }
        // keep the sender alive until every worker has observed cancellation
        drop(self.cancel);
        out
    }

    /// `cancel` followed by `join`.
    pub async fn shutdown(self) -> Vec<StatsSnapshot> {
        self.cancel();
        self.join().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn srcs(names: &[&str]) -> Vec<FeedSource> {
        names.iter().map(|n| FeedSource::new(*n)).collect()
    }

    fn urls(groups: &[Vec<FeedSource>]) -> Vec<Vec<String>> {
        groups
            .iter()
            .map(|g| g.iter().map(|s| s.url().to_string()).collect())
            .collect()
    }

    #[test]
    fn five_sources_two_workers() {
        let g = partition(&srcs(&["A", "B", "C", "D", "E"]), 2).unwrap();
        assert_eq!(urls(&g), vec![vec!["A", "B", "C"], vec!["D", "E"]]);
    }

    #[test]
    fn single_worker_owns_everything() {
        let g = partition(&srcs(&["A", "B", "C"]), 1).unwrap();
        assert_eq!(urls(&g), vec![vec!["A", "B", "C"]]);
    }

    #[test]
    fn coverage_and_balance_for_many_shapes() {
        for n in 1..=40usize {
            let all: Vec<FeedSource> = (0..n).map(|i| FeedSource::new(format!("f{i}"))).collect();
            for w in 1..=n {
                let g = partition(&all, w).unwrap();
                assert_eq!(g.len(), w);

                let flat: Vec<FeedSource> = g.iter().flatten().cloned().collect();
                assert_eq!(flat, all, "n={n} w={w}: order or coverage broken");

                let max = g.iter().map(Vec::len).max().unwrap();
                let min = g.iter().map(Vec::len).min().unwrap();
                assert!(max - min <= 1, "n={n} w={w}: sizes {min}..{max}");
                assert!(min >= 1);
            }
        }
    }

    #[test]
    fn invalid_shapes_fail_at_startup() {
        assert_eq!(partition(&[], 1), Err(ConfigError::NoSources));
        assert_eq!(partition(&srcs(&["A"]), 0), Err(ConfigError::ZeroWorkers));
        assert_eq!(
            partition(&srcs(&["A", "B"]), 3),
            Err(ConfigError::EmptyWorkerGroup {
                workers: 3,
                sources: 2
            })
        );
        assert_eq!(
            partition(&srcs(&["A", "B", "A"]), 1),
            Err(ConfigError::DuplicateSource("A".into()))
        );
    }
}
