//! Candidate scoring.
//!
//! Five sub-scores are summed into a total capped at 100:
//!
//! - **base**: rank position plus log-scaled volume
//! - **memeability**: short, symbolic, shouty or on-theme names (capped at 25)
//! - **category**: preferred / neutral / avoided
//! - **velocity**: a step function of rank
//! - **safety**: a blocked keyword vetoes the candidate with -100
//!
//! Scoring is pure: the same candidate and configuration always yield the
//! same result.

use std::cmp::Ordering;

use crate::candidate::{Candidate, ScoreBreakdown, ScoredCandidate, DISQUALIFIED_SAFETY};

/// Score a candidate must reach to be deployed.
pub const DEFAULT_MIN_SCORE: f64 = 50.0;

/// Volume assumed when the hint is missing or unparsable.
const DEFAULT_VOLUME: f64 = 1000.0;

const MEMEABILITY_CAP: f64 = 25.0;

const DOMAIN_TERMS: &[&str] = &["coin", "token", "moon", "pump", "doge", "pepe", "wojak", "chad"];
const CULTURE_TERMS: &[&str] = &["based", "sigma", "alpha", "goat", "king", "queen", "lord"];
const SENSITIVE_TERMS: &[&str] = &["trump", "biden", "congress", "senate", "election"];

/// Static scoring configuration.
#[derive(Debug, Clone)]
pub struct ScoringConfig {
    /// Case-insensitive substrings that disqualify a candidate.
    pub blocked_keywords: Vec<String>,
    pub preferred_categories: Vec<String>,
    pub avoided_categories: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| items.iter().map(|s| s.to_string()).collect();
        Self {
            blocked_keywords: owned(&[
                "death", "died", "rip", "tragedy", "shooting", "killed", "war", "bombing",
                "terrorist", "abuse", "assault",
            ]),
            preferred_categories: owned(&["crypto", "memes", "entertainment", "sports", "tech"]),
            avoided_categories: owned(&["politics", "news", "disasters"]),
        }
    }
}

/// Maps raw candidates to scored candidates.
#[derive(Debug, Clone, Default)]
pub struct ScoringEngine {
    config: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(config: ScoringConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Score a single candidate.
    pub fn score(&self, candidate: &Candidate) -> ScoredCandidate {
        let breakdown = ScoreBreakdown {
            base: base_score(candidate),
            memeability: memeability_score(&candidate.name),
            category: self.category_score(&candidate.category),
            velocity: velocity_score(candidate.rank),
            safety: self.safety_score(&candidate.name),
        };

        ScoredCandidate {
            candidate: candidate.clone(),
            breakdown,
            total_score: breakdown.total(),
        }
    }

    /// Score every candidate and order them by total score, highest first.
    ///
    /// The sort is stable: equal scores keep their input order.
    pub fn rank(&self, candidates: &[Candidate]) -> Vec<ScoredCandidate> {
        let mut scored: Vec<ScoredCandidate> = candidates.iter().map(|c| self.score(c)).collect();
        scored.sort_by(|a, b| {
            b.total_score
                .partial_cmp(&a.total_score)
                .unwrap_or(Ordering::Equal)
        });

        for s in &scored {
            tracing::debug!(
                topic = %s.candidate.name,
                score = s.total_score,
                disqualified = s.is_disqualified(),
                "Scored candidate"
            );
        }

        scored
    }

    fn category_score(&self, category: &str) -> f64 {
        let category = category.to_lowercase();
        if self.config.preferred_categories.iter().any(|c| *c == category) {
            15.0
        } else if self.config.avoided_categories.iter().any(|c| *c == category) {
            -10.0
        } else {
            5.0
        }
    }

    fn safety_score(&self, name: &str) -> f64 {
        let name = name.to_lowercase();
        if self
            .config
            .blocked_keywords
            .iter()
            .any(|kw| name.contains(&kw.to_lowercase()))
        {
            return DISQUALIFIED_SAFETY;
        }
        if SENSITIVE_TERMS.iter().any(|t| name.contains(t)) {
            return -20.0;
        }
        10.0
    }
}

fn base_score(candidate: &Candidate) -> f64 {
    let rank_score = (20.0 - 2.0 * candidate.rank as f64).max(0.0);
    let volume = parse_volume(&candidate.volume_hint);
    let volume_score = (3.0 * volume.log10()).min(15.0);
    rank_score + volume_score
}

fn memeability_score(raw_name: &str) -> f64 {
    let name = raw_name.to_lowercase();
    let len = name.chars().count();
    let mut score: f64 = 0.0;

    if raw_name.starts_with('#') {
        score += 5.0;
    }
    if len <= 10 {
        score += 5.0;
    }
    if len <= 6 {
        score += 5.0;
    }
    if name.chars().any(|c| c.is_ascii_digit()) {
        score += 3.0;
    }
    if raw_name == raw_name.to_uppercase() && raw_name.chars().count() > 2 {
        score += 3.0;
    }
    if DOMAIN_TERMS.iter().any(|t| name.contains(t)) {
        score += 10.0;
    }
    if CULTURE_TERMS.iter().any(|t| name.contains(t)) {
        score += 8.0;
    }

    score.min(MEMEABILITY_CAP)
}

fn velocity_score(rank: u32) -> f64 {
    match rank {
        0..=3 => 15.0,
        4..=5 => 10.0,
        6..=10 => 5.0,
        _ => 0.0,
    }
}

/// Parse a compact magnitude string (`"125K"`, `"1.2M"`, `"800"`).
///
/// The leading numeric part is read the way a lenient float parser would;
/// a `K` anywhere multiplies by a thousand, otherwise an `M` by a million.
/// Missing, unparsable or non-positive values fall back to 1000.
pub fn parse_volume(hint: &str) -> f64 {
    let hint = hint.trim();
    if hint.is_empty() || hint.eq_ignore_ascii_case("unknown") {
        return DEFAULT_VOLUME;
    }

    let mut seen_dot = false;
    let numeric: String = hint
        .chars()
        .take_while(|c| {
            if *c == '.' && !seen_dot {
                seen_dot = true;
                true
            } else {
                c.is_ascii_digit()
            }
        })
        .collect();

    let number = match numeric.parse::<f64>() {
        Ok(n) => n,
        Err(_) => return DEFAULT_VOLUME,
    };

    let volume = if hint.contains('K') {
        number * 1_000.0
    } else if hint.contains('M') {
        number * 1_000_000.0
    } else {
        number
    };

    if volume > 0.0 {
        volume
    } else {
        DEFAULT_VOLUME
    }
}
