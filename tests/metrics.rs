// tests/metrics.rs
#![cfg(feature = "strict-metrics")]
use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use rss_sentiment_stream::ingest::pipeline::{AttributeExtractor, RecordPipeline};
use rss_sentiment_stream::ingest::poller::{Collaborators, FeedPoller, PollerSettings};
use rss_sentiment_stream::ingest::types::{Entry, FeedFetcher, FeedSource};
use rss_sentiment_stream::ingest::FieldTimestamp;
use rss_sentiment_stream::metrics::Metrics;
use rss_sentiment_stream::sink::MemoryTable;

struct HalfBroken;

#[async_trait]
impl FeedFetcher for HalfBroken {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<Entry>> {
        if source.url().contains("broken") {
            bail!("503 from upstream");
        }
        Ok(vec![Entry::new()
            .with("title", "Stocks rally")
            .with("published", "2024-01-01T00:00:00Z")])
    }

    fn name(&self) -> &'static str {
        "half-broken"
    }
}

#[tokio::test]
async fn metrics_endpoint_exposes_ingest_series() {
    let metrics = Metrics::init().expect("recorder");

    let pipeline = RecordPipeline::new(Arc::new(AttributeExtractor::default()), None);
    let table = Arc::new(MemoryTable::new(pipeline.schema().clone()));
    let collab = Collaborators {
        fetcher: Arc::new(HalfBroken),
        timestamps: Arc::new(FieldTimestamp::default()),
        pipeline,
    };
    let mut poller = FeedPoller::new(
        0,
        vec![FeedSource::new("https://ok.test"), FeedSource::new("https://broken.test")],
        collab,
        table,
        PollerSettings::default(),
    )
    .unwrap();
    poller.sweep().await;

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    // axum::body::to_bytes requires an explicit limit
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "ingest_sweeps_total",
        "ingest_entries_accepted_total",
        "ingest_rows_emitted_total",
        "ingest_fetch_errors_total",
        "ingest_fetch_ms",
        "ingest_last_sweep_ts",
    ] {
        assert!(
            text.contains(needle),
            "metrics exposition missing '{needle}'\n{text}"
        );
    }
    assert!(text.contains("ingest_fetch_errors_total 1"), "{text}");
}
