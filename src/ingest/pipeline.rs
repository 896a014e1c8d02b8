// src/ingest/pipeline.rs
use std::sync::Arc;

use anyhow::{anyhow, Result};

use crate::ingest::error::{ConfigError, ErrorKind, IngestError};
use crate::ingest::normalize_text;
use crate::ingest::types::{Entry, FeedSource, Timestamp};
use crate::sink::{Column, ColumnType, OutputRow, Schema, Value};

/// Everything an extractor may look at for one accepted entry.
#[derive(Debug, Clone, Copy)]
pub struct EntryContext<'a> {
    pub source: &'a FeedSource,
    pub entry: &'a Entry,
    /// Timestamp the filter accepted the entry with.
    pub ts: Timestamp,
}

/// One extracted record: the leading row values and, when a classifier is
/// configured, the text it should classify.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub values: Vec<Value>,
    pub text: Option<String>,
}

/// Turns one entry into zero or more records. Must be pure.
pub trait RecordExtractor: Send + Sync {
    /// Columns produced by `extract`, in order.
    fn schema(&self) -> Schema;
    fn extract(&self, ctx: &EntryContext<'_>) -> Result<Vec<Extracted>>;
}

/// Maps text to classification columns appended after the extracted values.
pub trait Classifier: Send + Sync {
    fn schema(&self) -> Schema;
    fn classify(&self, text: &str) -> Result<Vec<Value>>;
}

/// Extractor + optional classifier, applied per accepted entry.
#[derive(Clone)]
pub struct RecordPipeline {
    extractor: Arc<dyn RecordExtractor>,
    classifier: Option<Arc<dyn Classifier>>,
    schema: Schema,
}

impl RecordPipeline {
    pub fn new(
        extractor: Arc<dyn RecordExtractor>,
        classifier: Option<Arc<dyn Classifier>>,
    ) -> Self {
        let mut schema = extractor.schema();
        if let Some(c) = &classifier {
            schema = schema.concat(&c.schema());
        }
        Self {
            extractor,
            classifier,
            schema,
        }
    }

    /// Columns of every row this pipeline emits.
    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Startup check: emitted rows must fit the sink.
    pub fn check_against(&self, sink: &Schema) -> Result<(), ConfigError> {
        if &self.schema == sink {
            Ok(())
        } else {
            Err(ConfigError::SchemaMismatch {
                pipeline: self.schema.to_string(),
                sink: sink.to_string(),
            })
        }
    }

    /// All rows for one entry, or the first error. An entry is all-or-nothing:
    /// a failure on any of its records drops the whole entry.
    pub fn process(&self, ctx: &EntryContext<'_>) -> Result<Vec<OutputRow>, IngestError> {
        let records = self
            .extractor
            .extract(ctx)
            .map_err(|e| IngestError::new(ErrorKind::Extract, ctx.source, format!("{e:#}")))?;

        let mut rows = Vec::with_capacity(records.len());
        for rec in records {
            let mut row = rec.values;
            if let Some(classifier) = &self.classifier {
                let text = rec.text.as_deref().ok_or_else(|| {
                    IngestError::new(ErrorKind::Classify, ctx.source, "record carries no text")
                })?;
                let classes = classifier.classify(text).map_err(|e| {
                    IngestError::new(ErrorKind::Classify, ctx.source, format!("{e:#}"))
                })?;
                row.extend(classes);
            }
            self.schema
                .check(&row)
                .map_err(|e| IngestError::new(ErrorKind::Extract, ctx.source, e))?;
            rows.push(row);
        }
        Ok(rows)
    }
}

impl std::fmt::Debug for RecordPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordPipeline")
            .field("schema", &self.schema)
            .field("classified", &self.classifier.is_some())
            .finish()
    }
}

/// One `(Sentence, Datetime)` row per configured attribute of the entry.
/// The normalized sentence is what gets classified.
#[derive(Debug, Clone)]
pub struct AttributeExtractor {
    attributes: Vec<String>,
}

impl AttributeExtractor {
    pub fn new<I, S>(attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            attributes: attributes.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for AttributeExtractor {
    fn default() -> Self {
        Self::new(["title"])
    }
}

impl RecordExtractor for AttributeExtractor {
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Column::new("Sentence", ColumnType::String),
            Column::new("Datetime", ColumnType::Timestamp),
        ])
    }

    fn extract(&self, ctx: &EntryContext<'_>) -> Result<Vec<Extracted>> {
        let mut out = Vec::with_capacity(self.attributes.len());
        for attr in &self.attributes {
            let raw = ctx
                .entry
                .get_str(attr)
                .ok_or_else(|| anyhow!("entry has no `{attr}` field"))?;
            let text = normalize_text(raw);
            if text.is_empty() {
                continue;
            }
            out.push(Extracted {
                values: vec![Value::String(text.clone()), Value::Timestamp(ctx.ts)],
                text: Some(text),
            });
        }
        Ok(out)
    }
}

/// One row per entry: title, publish time, feed URL, and the raw entry as JSON.
#[derive(Debug, Clone, Default)]
pub struct EntrySummaryExtractor;

impl RecordExtractor for EntrySummaryExtractor {
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Column::new("RssEntryTitle", ColumnType::String),
            Column::new("PublishDatetime", ColumnType::Timestamp),
            Column::new("RssFeedUrl", ColumnType::String),
            Column::new("JsonObject", ColumnType::String),
        ])
    }

    fn extract(&self, ctx: &EntryContext<'_>) -> Result<Vec<Extracted>> {
        let title = ctx
            .entry
            .get_str("title")
            .ok_or_else(|| anyhow!("entry has no `title` field"))?;
        let title = normalize_text(title);
        Ok(vec![Extracted {
            values: vec![
                Value::String(title.clone()),
                Value::Timestamp(ctx.ts),
                Value::String(ctx.source.url().to_string()),
                Value::String(ctx.entry.to_json()),
            ],
            text: Some(title),
        }])
    }
}
