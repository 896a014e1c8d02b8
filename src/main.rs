//! rss-sentiment-stream: binary entrypoint.
//! Polls the configured feeds, classifies new items, and streams the merged
//! rows to stdout as JSON lines until Ctrl-C.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;
use serde_json::{Map, Value as JsonValue};
use tokio::sync::watch;
use tracing::info;

use rss_sentiment_stream::ingest::poller::Collaborators;
use rss_sentiment_stream::ingest::providers::RssFetcher;
use rss_sentiment_stream::metrics::Metrics;
use rss_sentiment_stream::{init_tracing, schedule, IngestConfig, Scheduled, Value};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = IngestConfig::load_default()?;
    let sched_cfg = cfg.scheduler_cfg()?;

    let (stop_tx, stop_rx) = watch::channel(false);
    let metrics_task = match cfg.metrics_addr()? {
        Some(addr) => {
            let m = Metrics::init()?;
            let mut rx = stop_rx;
            Some(tokio::spawn(async move {
                let shutdown = async move {
                    let _ = rx.wait_for(|stop| *stop).await;
                };
                if let Err(e) = m.serve(addr, shutdown).await {
                    tracing::error!(error = ?e, "metrics server failed");
                }
            }))
        }
        None => None,
    };

    let fetcher = RssFetcher::from_http(&cfg.user_agent, cfg.fetch_timeout())?;
    let collab = Collaborators {
        fetcher: Arc::new(fetcher),
        timestamps: Arc::new(cfg.timestamps()),
        pipeline: cfg.pipeline(),
    };

    let Scheduled { mut pool, output } = schedule(sched_cfg, collab)?;
    pool.ready().await;
    info!(
        workers = pool.len(),
        columns = %output.schema(),
        "all workers running"
    );

    let columns: Vec<String> = output
        .schema()
        .columns()
        .iter()
        .map(|c| c.name.clone())
        .collect();
    let mut rows = output.stream();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("ctrl-c received; stopping workers");
                break;
            }
            next = rows.recv() => {
                let Some((worker, row)) = next else { break };
                let line = row_json(&columns, worker, &row)?;
                let mut out = std::io::stdout().lock();
                writeln!(out, "{line}")?;
            }
        }
    }

    let stats = pool.shutdown().await;
    for (worker, s) in stats.iter().enumerate() {
        info!(
            worker,
            sweeps = s.sweeps,
            idle_sleeps = s.idle_sleeps,
            entries = s.entries_accepted,
            rows = s.rows_emitted,
            fetch_errors = s.fetch_errors,
            record_errors = s.extract_errors + s.classify_errors + s.sink_errors,
            "worker stats"
        );
    }

    stop_tx.send_replace(true);
    if let Some(t) = metrics_task {
        let _ = t.await;
    }
    Ok(())
}

fn row_json(columns: &[String], worker: usize, row: &[Value]) -> Result<String> {
    let mut obj = Map::with_capacity(columns.len() + 1);
    obj.insert("worker".into(), JsonValue::from(worker));
    for (name, v) in columns.iter().zip(row) {
        obj.insert(name.clone(), serde_json::to_value(v)?);
    }
    Ok(serde_json::to_string(&obj)?)
}
