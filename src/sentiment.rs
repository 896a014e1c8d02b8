//! # Sentiment
//! Lexicon sentiment scoring with short-range negation, plus the two
//! [`Classifier`] adapters the pipeline can append to extracted rows.

use std::collections::HashMap;

use anyhow::Result;
use once_cell::sync::Lazy;
use serde::Serialize;

use crate::ingest::pipeline::Classifier;
use crate::sink::{Column, ColumnType, Schema, Value};

static LEXICON: Lazy<HashMap<String, i32>> = Lazy::new(|| {
    let raw = include_str!("../sentiment_lexicon.json");
    serde_json::from_str::<HashMap<String, i32>>(raw).expect("valid sentiment lexicon")
});

/// Normalization constant for the compound score: `x / sqrt(x² + ALPHA)`.
const ALPHA: f64 = 15.0;

/// Compound score beyond which a text is labelled positive/negative.
const LABEL_THRESHOLD: f64 = 0.05;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PolarityScores {
    pub positive: f64,
    pub neutral: f64,
    pub negative: f64,
    /// Normalized overall valence in [-1, 1].
    pub compound: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            SentimentLabel::Positive => "positive",
            SentimentLabel::Negative => "negative",
            SentimentLabel::Neutral => "neutral",
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SentimentAnalyzer;

impl SentimentAnalyzer {
    pub fn new() -> Self {
        Self
    }

    #[inline]
    fn word_score(&self, w: &str) -> i32 {
        *LEXICON.get(w).unwrap_or(&0)
    }

    /// Per-token valence after negation. A negator within the previous
    /// 1..=3 tokens flips the sign of a word's lexicon score.
    fn valences(&self, text: &str) -> Vec<i32> {
        let tokens: Vec<String> = tokenize(text).collect();
        (0..tokens.len())
            .map(|i| {
                let base = self.word_score(&tokens[i]);
                let negated = (1..=3).any(|k| i >= k && is_negator(&tokens[i - k]));
                if negated {
                    -base
                } else {
                    base
                }
            })
            .collect()
    }

    /// Returns (summed valence, token count).
    pub fn score_text(&self, text: &str) -> (i32, usize) {
        let v = self.valences(text);
        (v.iter().sum(), v.len())
    }

    /// Positive / neutral / negative proportions plus the compound score.
    /// Empty text scores all zeros.
    pub fn polarity_scores(&self, text: &str) -> PolarityScores {
        let v = self.valences(text);
        if v.is_empty() {
            return PolarityScores::default();
        }

        // sentiment-bearing words weigh one more than a neutral token
        let mut pos = 0.0;
        let mut neg = 0.0;
        let mut neu = 0.0;
        for &s in &v {
            match s {
                0 => neu += 1.0,
                s if s > 0 => pos += f64::from(s) + 1.0,
                s => neg += f64::from(-s) + 1.0,
            }
        }
        let total = pos + neg + neu;

        let sum = f64::from(v.iter().sum::<i32>());
        let compound = sum / (sum * sum + ALPHA).sqrt();

        PolarityScores {
            positive: round(pos / total, 3),
            neutral: round(neu / total, 3),
            negative: round(neg / total, 3),
            compound: round(compound, 4),
        }
    }

    pub fn label(&self, text: &str) -> SentimentLabel {
        let c = self.polarity_scores(text).compound;
        if c >= LABEL_THRESHOLD {
            SentimentLabel::Positive
        } else if c <= -LABEL_THRESHOLD {
            SentimentLabel::Negative
        } else {
            SentimentLabel::Neutral
        }
    }
}

fn round(x: f64, places: i32) -> f64 {
    let p = 10f64.powi(places);
    (x * p).round() / p
}

/// Alphanumeric tokens, lower-case.
fn tokenize(s: &str) -> impl Iterator<Item = String> + '_ {
    s.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Contractions arrive split at the apostrophe (`isn't` → `isn`, `t`).
fn is_negator(tok: &str) -> bool {
    matches!(
        tok,
        "not"
            | "no"
            | "never"
            | "nor"
            | "neither"
            | "without"
            | "cannot"
            | "isn"
            | "wasn"
            | "aren"
            | "weren"
            | "don"
            | "doesn"
            | "didn"
            | "couldn"
            | "shouldn"
            | "wouldn"
    )
}

/// Appends `Positive`, `Neutral`, `Negative`, `Compound` float columns.
#[derive(Debug, Clone, Copy, Default)]
pub struct PolarityClassifier {
    analyzer: SentimentAnalyzer,
}

impl Classifier for PolarityClassifier {
    fn schema(&self) -> Schema {
        Schema::new(vec![
            Column::new("Positive", ColumnType::Float),
            Column::new("Neutral", ColumnType::Float),
            Column::new("Negative", ColumnType::Float),
            Column::new("Compound", ColumnType::Float),
        ])
    }

    fn classify(&self, text: &str) -> Result<Vec<Value>> {
        let s = self.analyzer.polarity_scores(text);
        Ok(vec![
            Value::Float(s.positive),
            Value::Float(s.neutral),
            Value::Float(s.negative),
            Value::Float(s.compound),
        ])
    }
}

/// Appends a single `Sentiment` label column.
#[derive(Debug, Clone, Copy, Default)]
pub struct LabelClassifier {
    analyzer: SentimentAnalyzer,
}

impl Classifier for LabelClassifier {
    fn schema(&self) -> Schema {
        Schema::new(vec![Column::new("Sentiment", ColumnType::String)])
    }

    fn classify(&self, text: &str) -> Result<Vec<Value>> {
        Ok(vec![Value::from(self.analyzer.label(text).as_str())])
    }
}
