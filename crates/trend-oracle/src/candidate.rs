//! Candidate topics and their scored form.

use serde::{Deserialize, Serialize};

/// Safety sub-score that vetoes a candidate outright.
pub const DISQUALIFIED_SAFETY: f64 = -100.0;

/// A ranked topic signal produced by a candidate source for the current tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Topic as it appeared in the source (may carry a leading `#`).
    pub name: String,
    /// Lowercase, ASCII-alphanumeric-only identity of the topic.
    pub normalized_key: String,
    /// 1-based position in the source ranking.
    pub rank: u32,
    /// Keyword-derived category (e.g. `crypto`, `politics`, `general`).
    pub category: String,
    /// Compact magnitude string such as `125K`, `1.2M` or `Unknown`.
    pub volume_hint: String,
    /// Link to the topic at its origin, if the source provided one.
    #[serde(default)]
    pub url: Option<String>,
    /// Name of the source that produced this candidate.
    #[serde(default)]
    pub source: Option<String>,
}

impl Candidate {
    /// Build a candidate, deriving the normalized key from the name.
    pub fn new(name: impl Into<String>, rank: u32, category: impl Into<String>, volume_hint: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            normalized_key: normalize_key(&name),
            name,
            rank,
            category: category.into(),
            volume_hint: volume_hint.into(),
            url: None,
            source: None,
        }
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

/// Lowercase the name and drop everything that is not `[a-z0-9]`.
pub fn normalize_key(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect()
}

/// Named sub-scores that make up a candidate's total.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub base: f64,
    pub memeability: f64,
    pub category: f64,
    pub velocity: f64,
    pub safety: f64,
}

impl ScoreBreakdown {
    /// Sum of all sub-scores, clamped above at 100. There is no floor.
    pub fn total(&self) -> f64 {
        let sum = self.base + self.memeability + self.category + self.velocity + self.safety;
        sum.min(100.0)
    }

    /// Sub-scores as `(name, value)` pairs, in a fixed order.
    pub fn entries(&self) -> [(&'static str, f64); 5] {
        [
            ("base", self.base),
            ("memeability", self.memeability),
            ("category", self.category),
            ("velocity", self.velocity),
            ("safety", self.safety),
        ]
    }
}

/// A candidate with its score. Recomputed every cycle and never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub breakdown: ScoreBreakdown,
    pub total_score: f64,
}

impl ScoredCandidate {
    pub fn key(&self) -> &str {
        &self.candidate.normalized_key
    }

    /// True when the safety veto fired for this candidate.
    pub fn is_disqualified(&self) -> bool {
        self.breakdown.safety <= DISQUALIFIED_SAFETY
    }
}
