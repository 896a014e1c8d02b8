// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod ingest;
pub mod metrics;
pub mod sentiment;
pub mod sink;

pub use crate::ingest::{schedule, IngestConfig, IngestSchedulerCfg, Scheduled, WorkerPool};
pub use crate::sink::{MemoryTable, MergedOutput, OutputRow, Schema, Sink, Value};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install the global tracing subscriber.
/// `RUST_LOG` selects levels (default `rss_sentiment_stream=info,warn`);
/// `LOG_FORMAT=json` switches to one JSON object per line.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("rss_sentiment_stream=info,warn"));

    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    // logs go to stderr; stdout carries the row stream
    let registry = tracing_subscriber::registry().with(filter);
    let res = if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init()
    } else {
        registry
            .with(fmt::layer().compact().with_writer(std::io::stderr))
            .try_init()
    };
    if res.is_err() {
        // already installed (tests, embedding binaries)
        tracing::debug!("tracing subscriber already set");
    }
}
