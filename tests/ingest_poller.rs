// tests/ingest_poller.rs
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parking_lot::Mutex;

use rss_sentiment_stream::ingest::pipeline::{AttributeExtractor, RecordExtractor, RecordPipeline};
use rss_sentiment_stream::ingest::poller::{Collaborators, FeedPoller, PollerSettings};
use rss_sentiment_stream::ingest::types::{Entry, FeedFetcher, FeedSource, Timestamp};
use rss_sentiment_stream::ingest::{
    ConfigError, ErrorKind, FieldTimestamp, MissingTimestamp, OrderPolicy,
};
use rss_sentiment_stream::sink::{Column, ColumnType, MemoryTable, MergedOutput, Schema, Sink};

/// Serves a scripted sequence of pulls per URL; the last pull repeats forever.
/// `Err` strings become fetch errors.
#[derive(Default)]
struct MockFetcher {
    pulls: Mutex<HashMap<String, VecDeque<Result<Vec<Entry>, String>>>>,
    calls: Mutex<Vec<String>>,
}

impl MockFetcher {
    fn script(self, url: &str, pulls: Vec<Result<Vec<Entry>, String>>) -> Self {
        self.pulls.lock().insert(url.to_string(), pulls.into());
        self
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl FeedFetcher for MockFetcher {
    async fn fetch(&self, source: &FeedSource) -> Result<Vec<Entry>> {
        self.calls.lock().push(source.url().to_string());
        let mut pulls = self.pulls.lock();
        let q = pulls
            .get_mut(source.url())
            .ok_or_else(|| anyhow!("unknown feed {source}"))?;
        let next = if q.len() > 1 {
            q.pop_front()
        } else {
            q.front().cloned()
        };
        match next {
            Some(Ok(v)) => Ok(v),
            Some(Err(msg)) => Err(anyhow!(msg)),
            None => Ok(Vec::new()),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}

fn ts(secs: i64) -> Timestamp {
    Utc.timestamp_opt(secs, 0).unwrap()
}

fn item(title: &str, secs: i64) -> Entry {
    Entry::new().with("title", title).with("t", secs)
}

fn by_t(e: &Entry) -> Option<Timestamp> {
    e.get("t").and_then(|v| v.as_i64()).map(ts)
}

fn poller(fetcher: Arc<MockFetcher>, urls: &[&str]) -> (FeedPoller, Arc<MemoryTable>) {
    let pipeline = RecordPipeline::new(Arc::new(AttributeExtractor::default()), None);
    let table = Arc::new(MemoryTable::new(pipeline.schema().clone()));
    let collab = Collaborators {
        fetcher,
        timestamps: Arc::new(by_t),
        pipeline,
    };
    let sources = urls.iter().map(|u| FeedSource::new(*u)).collect();
    let p = FeedPoller::new(0, sources, collab, table.clone(), PollerSettings::default())
        .expect("valid poller");
    (p, table)
}

fn titles(table: &MemoryTable) -> Vec<String> {
    table
        .snapshot()
        .iter()
        .map(|r| r[0].as_str().unwrap().to_string())
        .collect()
}

#[tokio::test]
async fn first_pull_emits_every_entry_oldest_first() {
    let pull = vec![item("c", 30), item("b", 20), item("a", 10)];
    let f = Arc::new(MockFetcher::default().script("https://one", vec![Ok(pull)]));
    let (mut p, table) = poller(f, &["https://one"]);

    let report = p.sweep().await;
    assert!(report.advanced);
    assert_eq!(report.entries_accepted, 3);
    assert_eq!(titles(&table), vec!["a", "b", "c"]);
    assert_eq!(p.watermark(&FeedSource::new("https://one")), Some(ts(30)));
}

#[tokio::test]
async fn identical_second_pull_emits_nothing() {
    let pull = vec![item("b", 20), item("a", 10)];
    let f = Arc::new(MockFetcher::default().script("https://one", vec![Ok(pull)]));
    let (mut p, table) = poller(f, &["https://one"]);

    assert!(p.sweep().await.advanced);
    let second = p.sweep().await;
    assert!(!second.advanced);
    assert_eq!(second.rows_emitted, 0);
    assert_eq!(table.len(), 2);
}

#[tokio::test]
async fn emission_is_chronological_across_sweeps() {
    let f = Arc::new(MockFetcher::default().script(
        "https://one",
        vec![
            Ok(vec![item("2", 20), item("1", 10)]),
            Ok(vec![item("4", 40), item("3", 30), item("2", 20)]),
            Ok(vec![item("5", 50), item("4", 40)]),
        ],
    ));
    let (mut p, table) = poller(f, &["https://one"]);
    for _ in 0..4 {
        p.sweep().await;
    }

    let times: Vec<Timestamp> = table
        .snapshot()
        .iter()
        .map(|r| r[1].as_timestamp().unwrap())
        .collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]), "{times:?}");
    assert_eq!(titles(&table), vec!["1", "2", "3", "4", "5"]);
}

#[tokio::test]
async fn boundary_timestamp_is_never_reemitted() {
    let f = Arc::new(MockFetcher::default().script(
        "https://one",
        vec![
            Ok(vec![item("old", 90)]),
            Ok(vec![item("x", 100), item("y", 100), item("old", 90)]),
        ],
    ));
    let (mut p, table) = poller(f, &["https://one"]);
    let src = FeedSource::new("https://one");

    p.sweep().await;
    assert_eq!(p.watermark(&src), Some(ts(90)));

    let r = p.sweep().await;
    assert_eq!(r.entries_accepted, 2);
    assert_eq!(p.watermark(&src), Some(ts(100)));

    let again = p.sweep().await;
    assert!(!again.advanced);
    assert_eq!(titles(&table), vec!["old", "y", "x"]);
}

#[tokio::test]
async fn failing_source_does_not_block_healthy_one() {
    let f = Arc::new(
        MockFetcher::default()
            .script("https://broken", vec![Err("connection refused".into())])
            .script("https://ok", vec![Ok(vec![item("fine", 10)])]),
    );
    let (mut p, table) = poller(f.clone(), &["https://broken", "https://ok"]);

    let r = p.sweep().await;
    assert!(r.advanced);
    assert_eq!(r.errors.len(), 1);
    assert_eq!(r.errors[0].kind, ErrorKind::Fetch);
    assert_eq!(r.errors[0].feed, FeedSource::new("https://broken"));
    assert_eq!(titles(&table), vec!["fine"]);
    assert_eq!(p.watermark(&FeedSource::new("https://broken")), None);

    // retried every sweep, in source order
    p.sweep().await;
    assert_eq!(
        f.calls(),
        vec!["https://broken", "https://ok", "https://broken", "https://ok"]
    );
    assert_eq!(p.stats().snapshot().fetch_errors, 2);
}

#[tokio::test]
async fn record_error_drops_only_that_entry() {
    let f = Arc::new(MockFetcher::default().script(
        "https://one",
        vec![Ok(vec![
            item("newest", 30),
            Entry::new().with("summary", "no title here").with("t", 20),
            item("oldest", 10),
        ])],
    ));
    let (mut p, table) = poller(f, &["https://one"]);

    let r = p.sweep().await;
    assert_eq!(r.entries_accepted, 3);
    assert_eq!(r.rows_emitted, 2);
    assert_eq!(r.errors.len(), 1);
    assert_eq!(r.errors[0].kind, ErrorKind::Extract);
    assert_eq!(titles(&table), vec!["oldest", "newest"]);

    // the bad entry still counts as seen
    assert_eq!(p.watermark(&FeedSource::new("https://one")), Some(ts(30)));
    assert_eq!(p.stats().snapshot().errors(ErrorKind::Extract), 1);
}

#[tokio::test]
async fn sort_policy_recovers_unordered_feed() {
    let f = Arc::new(MockFetcher::default().script(
        "https://one",
        vec![
            Ok(vec![item("base", 10)]),
            Ok(vec![item("b", 20), item("base", 10), item("c", 30)]),
        ],
    ));
    let pipeline = RecordPipeline::new(Arc::new(AttributeExtractor::default()), None);
    let table = Arc::new(MemoryTable::new(pipeline.schema().clone()));
    let collab = Collaborators {
        fetcher: f,
        timestamps: Arc::new(by_t),
        pipeline,
    };
    let settings = PollerSettings {
        order_policy: OrderPolicy::SortWhenUnordered,
        ..PollerSettings::default()
    };
    let mut p = FeedPoller::new(
        0,
        vec![FeedSource::new("https://one")],
        collab,
        table.clone(),
        settings,
    )
    .unwrap();

    p.sweep().await;
    p.sweep().await;
    assert_eq!(titles(&table), vec!["base", "b", "c"]);
    assert_eq!(p.watermark(&FeedSource::new("https://one")), Some(ts(30)));
    assert_eq!(p.stats().snapshot().unordered_pulls, 1);
}

#[tokio::test]
async fn undated_entries_under_ingest_time_are_emitted_once() {
    let episode = |id: &str, title: &str| Entry::new().with("id", id).with("title", title);
    let f = Arc::new(MockFetcher::default().script(
        "https://pods",
        vec![
            Ok(vec![episode("ep-1", "Pilot")]),
            Ok(vec![episode("ep-1", "Pilot")]),
            Ok(vec![episode("ep-2", "Second"), episode("ep-1", "Pilot")]),
        ],
    ));
    let pipeline = RecordPipeline::new(Arc::new(AttributeExtractor::default()), None);
    let table = Arc::new(MemoryTable::new(pipeline.schema().clone()));
    let collab = Collaborators {
        fetcher: f,
        timestamps: Arc::new(FieldTimestamp::new(
            ["published"],
            MissingTimestamp::IngestTime,
        )),
        pipeline,
    };
    let mut p = FeedPoller::new(
        0,
        vec![FeedSource::new("https://pods")],
        collab,
        table.clone(),
        PollerSettings::default(),
    )
    .unwrap();

    assert!(p.sweep().await.advanced);
    let stamped = p.watermark(&FeedSource::new("https://pods"));
    assert!(stamped.is_some());

    // the same undated entry again: nothing new, so the worker may sleep
    let again = p.sweep().await;
    assert!(!again.advanced);
    assert_eq!(again.rows_emitted, 0);
    assert_eq!(p.watermark(&FeedSource::new("https://pods")), stamped);

    tokio::time::sleep(Duration::from_millis(2)).await;
    let r = p.sweep().await;
    assert_eq!(r.entries_accepted, 1);
    assert_eq!(titles(&table), vec!["Pilot", "Second"]);

    assert!(!p.sweep().await.advanced);
    assert_eq!(table.len(), 2);
}

#[tokio::test]
async fn merged_stream_keeps_every_row_of_a_huge_pull() {
    const N: i64 = 5_000;
    let pull: Vec<Entry> = (0..N).rev().map(|i| item(&format!("n{i}"), i + 1)).collect();
    let f = Arc::new(MockFetcher::default().script("https://firehose", vec![Ok(pull)]));
    let (mut p, table) = poller(f, &["https://firehose"]);
    let merged = MergedOutput::new(table.schema().clone(), vec![table.clone()]);
    let mut rows = merged.stream();

    let r = p.sweep().await;
    assert_eq!(r.rows_emitted, N as usize);

    for i in 0..N {
        let (worker, row) = rows.recv().await.unwrap();
        assert_eq!(worker, 0);
        assert_eq!(row[0].as_str(), Some(format!("n{i}").as_str()));
    }
    assert!(rows.try_recv().is_err());
}

#[test]
fn invalid_poller_setup_is_a_config_error() {
    let f: Arc<dyn FeedFetcher> = Arc::new(MockFetcher::default());
    let pipeline = RecordPipeline::new(Arc::new(AttributeExtractor::default()), None);
    let collab = Collaborators {
        fetcher: f,
        timestamps: Arc::new(by_t),
        pipeline: pipeline.clone(),
    };

    let wrong_sink: Arc<dyn Sink> = Arc::new(MemoryTable::new(Schema::new(vec![Column::new(
        "Only",
        ColumnType::String,
    )])));
    let err = FeedPoller::new(
        0,
        vec![FeedSource::new("https://one")],
        collab.clone(),
        wrong_sink,
        PollerSettings::default(),
    )
    .unwrap_err();
    assert!(matches!(err, ConfigError::SchemaMismatch { .. }));

    let sink: Arc<dyn Sink> = Arc::new(MemoryTable::new(AttributeExtractor::default().schema()));
    let err = FeedPoller::new(0, vec![], collab.clone(), sink.clone(), PollerSettings::default())
        .unwrap_err();
    assert_eq!(err, ConfigError::NoSources);

    let zero = PollerSettings {
        sleep: Duration::ZERO,
        ..PollerSettings::default()
    };
    let err = FeedPoller::new(0, vec![FeedSource::new("https://one")], collab, sink, zero)
        .unwrap_err();
    assert_eq!(err, ConfigError::ZeroSleep);
}
