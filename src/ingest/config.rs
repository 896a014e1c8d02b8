// src/ingest/config.rs
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::error::ConfigError;
use crate::ingest::filter::OrderPolicy;
use crate::ingest::pipeline::{
    AttributeExtractor, Classifier, EntrySummaryExtractor, RecordExtractor, RecordPipeline,
};
use crate::ingest::scheduler::IngestSchedulerCfg;
use crate::ingest::timestamps::{FieldTimestamp, MissingTimestamp};
use crate::ingest::types::FeedSource;
use crate::sentiment::{LabelClassifier, PolarityClassifier};

const ENV_PATH: &str = "INGEST_CONFIG_PATH";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    /// `(Sentence, Datetime)` per configured attribute.
    #[default]
    Attributes,
    /// `(RssEntryTitle, PublishDatetime, RssFeedUrl, JsonObject)` per entry.
    EntrySummary,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierKind {
    None,
    /// Positive / Neutral / Negative / Compound floats.
    #[default]
    Polarity,
    /// Single `Sentiment` label column.
    Label,
}

/// Startup configuration for the binary. Every field has a default, so a
/// config file only needs the keys it changes (usually just `feeds`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestConfig {
    pub feeds: Vec<String>,
    pub sleep_secs: u64,
    pub workers: Option<usize>,
    pub extractor: ExtractorKind,
    pub attributes: Vec<String>,
    pub timestamp_fields: Vec<String>,
    pub missing_timestamp: MissingTimestamp,
    pub classifier: ClassifierKind,
    pub order_policy: OrderPolicy,
    pub user_agent: String,
    pub fetch_timeout_secs: u64,
    pub metrics_addr: Option<String>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            feeds: Vec::new(),
            sleep_secs: 5,
            workers: None,
            extractor: ExtractorKind::default(),
            attributes: vec!["title".into()],
            timestamp_fields: vec!["updated".into(), "published".into()],
            missing_timestamp: MissingTimestamp::default(),
            classifier: ClassifierKind::default(),
            order_policy: OrderPolicy::default(),
            user_agent: concat!("rss-sentiment-stream/", env!("CARGO_PKG_VERSION")).into(),
            fetch_timeout_secs: 30,
            metrics_addr: None,
        }
    }
}

impl IngestConfig {
    /// Load from an explicit path. Supports TOML or JSON.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading ingest config from {}", path.display()))?;
        let ext = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
            .to_ascii_lowercase();
        parse_config(&content, ext.as_str())
            .with_context(|| format!("parsing ingest config {}", path.display()))
    }

    /// Load using env var + fallbacks:
    /// 1) $INGEST_CONFIG_PATH
    /// 2) config/ingest.toml
    /// 3) config/ingest.json
    /// 4) built-in defaults (no feeds, so `validate` will refuse it)
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PATH) {
            let pb = PathBuf::from(p);
            if pb.exists() {
                return Self::load_from(&pb);
            }
            return Err(anyhow!("{ENV_PATH} points to non-existent path"));
        }
        let toml_p = PathBuf::from("config/ingest.toml");
        if toml_p.exists() {
            return Self::load_from(&toml_p);
        }
        let json_p = PathBuf::from("config/ingest.json");
        if json_p.exists() {
            return Self::load_from(&json_p);
        }
        Ok(Self::default())
    }

    /// Feed URLs trimmed, blanks dropped, input order kept.
    pub fn sources(&self) -> Vec<FeedSource> {
        clean_list(&self.feeds).into_iter().map(FeedSource::from).collect()
    }

    pub fn sleep(&self) -> Duration {
        Duration::from_secs(self.sleep_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    pub fn metrics_addr(&self) -> Result<Option<SocketAddr>, ConfigError> {
        self.metrics_addr
            .as_deref()
            .map(|a| {
                a.parse()
                    .map_err(|_| ConfigError::Invalid(format!("metrics_addr `{a}` is not host:port")))
            })
            .transpose()
    }

    /// Everything `schedule` would refuse, checked up front.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sources = self.sources();
        if sources.is_empty() {
            return Err(ConfigError::NoSources);
        }
        let mut seen = HashSet::with_capacity(sources.len());
        for s in &sources {
            if !seen.insert(s) {
                return Err(ConfigError::DuplicateSource(s.url().to_string()));
            }
        }
        match self.workers {
            Some(0) => return Err(ConfigError::ZeroWorkers),
            Some(w) if w > sources.len() => {
                return Err(ConfigError::EmptyWorkerGroup {
                    workers: w,
                    sources: sources.len(),
                })
            }
            _ => {}
        }
        if self.sleep_secs == 0 {
            return Err(ConfigError::ZeroSleep);
        }
        if self.extractor == ExtractorKind::Attributes && clean_list(&self.attributes).is_empty() {
            return Err(ConfigError::Invalid("`attributes` is empty".into()));
        }
        if clean_list(&self.timestamp_fields).is_empty() {
            return Err(ConfigError::Invalid("`timestamp_fields` is empty".into()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(ConfigError::Invalid("`fetch_timeout_secs` must be > 0".into()));
        }
        self.metrics_addr()?;
        Ok(())
    }

    pub fn timestamps(&self) -> FieldTimestamp {
        FieldTimestamp::new(clean_list(&self.timestamp_fields), self.missing_timestamp)
    }

    pub fn extractor(&self) -> Arc<dyn RecordExtractor> {
        match self.extractor {
            ExtractorKind::Attributes => Arc::new(AttributeExtractor::new(clean_list(&self.attributes))),
            ExtractorKind::EntrySummary => Arc::new(EntrySummaryExtractor),
        }
    }

    pub fn classifier(&self) -> Option<Arc<dyn Classifier>> {
        match self.classifier {
            ClassifierKind::None => None,
            ClassifierKind::Polarity => Some(Arc::new(PolarityClassifier::default())),
            ClassifierKind::Label => Some(Arc::new(LabelClassifier::default())),
        }
    }

    pub fn pipeline(&self) -> RecordPipeline {
        RecordPipeline::new(self.extractor(), self.classifier())
    }

    /// Scheduler settings; the sink schema is whatever the configured pipeline emits.
    pub fn scheduler_cfg(&self) -> Result<IngestSchedulerCfg, ConfigError> {
        self.validate()?;
        let mut cfg = IngestSchedulerCfg::new(self.sources(), self.sleep(), self.pipeline().schema().clone())
            .with_order_policy(self.order_policy);
        if let Some(w) = self.workers {
            cfg = cfg.with_workers(w);
        }
        Ok(cfg)
    }
}

fn parse_config(s: &str, hint_ext: &str) -> Result<IngestConfig> {
    match hint_ext {
        "toml" => Ok(toml::from_str(s)?),
        "json" => Ok(serde_json::from_str(s)?),
        _ => {
            if let Ok(v) = serde_json::from_str(s) {
                return Ok(v);
            }
            toml::from_str(s).map_err(|e| anyhow!("unsupported ingest config format: {e}"))
        }
    }
}

fn clean_list(items: &[String]) -> Vec<String> {
    items
        .iter()
        .map(|it| it.trim())
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}
