// src/ingest/error.rs

//! Error types for the polling engine.
//!
//! Only [`ConfigError`] ever reaches the caller of `schedule`. Everything that
//! goes wrong while a worker is running is contained, logged, and counted as an
//! [`IngestError`] tagged with its [`ErrorKind`] and the feed it came from.

use std::fmt;

use thiserror::Error;

use crate::ingest::types::FeedSource;
use crate::sink::SinkError;

/// Invalid startup configuration. Surfaced before any worker starts.
#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    /// No feed URLs at all.
    #[error("no feed sources configured")]
    NoSources,

    /// Worker count of zero.
    #[error("worker count must be at least 1")]
    ZeroWorkers,

    /// More workers than feeds would leave a worker with nothing to poll.
    #[error("{workers} workers requested for {sources} sources; a worker would own no feeds")]
    EmptyWorkerGroup { workers: usize, sources: usize },

    /// The same URL listed twice would be polled by two owners.
    #[error("feed source listed more than once: {0}")]
    DuplicateSource(String),

    /// Extractor + classifier columns do not line up with the sink schema.
    #[error("pipeline produces columns {pipeline}, sink declares {sink}")]
    SchemaMismatch { pipeline: String, sink: String },

    /// Sleep duration of zero would spin on quiet feeds.
    #[error("sleep duration must be greater than zero")]
    ZeroSleep,

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Invalid(String),
}

/// What part of a sweep an error came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Fetching or parsing the feed document.
    Fetch,
    /// Record extraction from one entry.
    Extract,
    /// Classifying one extracted text.
    Classify,
    /// The sink refused a row.
    Sink,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Fetch => "fetch",
            ErrorKind::Extract => "extract",
            ErrorKind::Classify => "classify",
            ErrorKind::Sink => "sink",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A contained, per-feed failure.
#[derive(Error, Debug)]
#[error("{kind} error for {feed}: {message}")]
pub struct IngestError {
    pub kind: ErrorKind,
    pub feed: FeedSource,
    pub message: String,
}

impl IngestError {
    pub fn new(kind: ErrorKind, source: &FeedSource, err: impl fmt::Display) -> Self {
        Self {
            kind,
            feed: source.clone(),
            message: err.to_string(),
        }
    }

    pub fn fetch(source: &FeedSource, err: &anyhow::Error) -> Self {
        Self::new(ErrorKind::Fetch, source, format!("{err:#}"))
    }

    pub fn sink(source: &FeedSource, err: &SinkError) -> Self {
        Self::new(ErrorKind::Sink, source, err)
    }
}
