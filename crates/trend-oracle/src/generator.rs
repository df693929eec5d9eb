//! Artifact generation: turns a scored candidate into deployable metadata.
//!
//! Ticker codes are unique among live reservations; a code whose artifact
//! was previewed or failed to deploy is released back. The node seeds
//! the generator with every ticker already recorded in the candidate store,
//! so codes of deployed artifacts are never reissued after a restart.

use std::collections::HashSet;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rand::seq::IndexedRandom;
use serde::{Deserialize, Serialize};

use crate::candidate::ScoredCandidate;
use crate::external::AssetFetcher;
use crate::voice;

const MAX_TICKER_LEN: usize = 6;
const MIN_TICKER_LEN: usize = 3;
/// Longest code once a collision counter is appended.
const MAX_SUFFIXED_LEN: usize = 7;
/// Used when a topic has no alphanumeric characters at all.
const FALLBACK_TICKER: &str = "TRND";

const NAME_SUFFIXES: &[&str] = &["Coin", "Token", "Inu", "Moon", "Protocol", ""];
const NAME_PREFIXES: &[&str] = &["", "Baby ", "Super ", "Mega ", "Ultra "];

/// A binary image payload for an artifact.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Asset {
    pub content_type: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
}

impl std::fmt::Debug for Asset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Asset")
            .field("content_type", &self.content_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

/// Deployable metadata for one candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    /// Display name.
    pub name: String,
    /// Short symbolic code, unique within this process.
    pub ticker: String,
    pub description: String,
    /// Link back to the topic (origin URL or a constructed search link).
    pub social_url: String,
    /// Representative image; `None` means the sink substitutes a default.
    #[serde(skip)]
    pub asset: Option<Asset>,
    /// Topic name as it was scored.
    pub topic: String,
    pub normalized_key: String,
    pub score: f64,
    pub generated_at: DateTime<Utc>,
}

/// Builds [`Artifact`]s and keeps ticker codes unique.
#[derive(Debug, Default)]
pub struct ArtifactGenerator {
    used_tickers: Mutex<HashSet<String>>,
}

impl ArtifactGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a generator that treats `tickers` as already taken.
    pub fn with_reserved<I, S>(tickers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let used = tickers.into_iter().map(Into::into).collect();
        Self {
            used_tickers: Mutex::new(used),
        }
    }

    /// Generate an artifact and try to attach a representative image.
    ///
    /// A missing image never fails generation.
    pub async fn generate(&self, scored: &ScoredCandidate, assets: &dyn AssetFetcher) -> Artifact {
        let mut artifact = self.compose(scored);

        match assets.fetch(&scored.candidate.name).await {
            Some(asset) => {
                tracing::info!(
                    topic = %scored.candidate.name,
                    bytes = asset.bytes.len(),
                    "Asset attached"
                );
                artifact.asset = Some(asset);
            }
            None => {
                tracing::warn!(topic = %scored.candidate.name, "No asset available, default will be used");
            }
        }

        artifact
    }

    /// Generate artifact metadata without an asset.
    pub fn compose(&self, scored: &ScoredCandidate) -> Artifact {
        let base_name = clean_topic_name(&scored.candidate.name);
        let ticker = self.reserve_ticker(&base_ticker(&base_name));
        let name = display_name(&base_name);
        let description = voice::artifact_description(
            &scored.candidate.name,
            scored.candidate.rank,
            &scored.candidate.category,
            scored.total_score,
            &ticker,
        );
        let social_url = scored
            .candidate
            .url
            .clone()
            .unwrap_or_else(|| search_url(&scored.candidate.name));

        Artifact {
            name,
            ticker,
            description,
            social_url,
            asset: None,
            topic: scored.candidate.name.clone(),
            normalized_key: scored.candidate.normalized_key.clone(),
            score: scored.total_score,
            generated_at: Utc::now(),
        }
    }

    /// Return a ticker whose artifact was never deployed to the free pool.
    pub fn release(&self, ticker: &str) {
        match self.used_tickers.lock() {
            Ok(mut used) => {
                used.remove(ticker);
            }
            Err(poisoned) => {
                poisoned.into_inner().remove(ticker);
            }
        }
    }

    /// Whether a ticker has already been handed out or reserved.
    pub fn is_used(&self, ticker: &str) -> bool {
        self.used_tickers
            .lock()
            .map(|used| used.contains(ticker))
            .unwrap_or(true)
    }

    /// Claim `base`, or the first free stem + n for n = 1, 2, ...
    ///
    /// The stem is at most five characters and shrinks as the counter gains
    /// digits, so a suffixed code never exceeds seven characters.
    fn reserve_ticker(&self, base: &str) -> String {
        let mut used = match self.used_tickers.lock() {
            Ok(u) => u,
            Err(poisoned) => {
                tracing::error!("ticker set mutex poisoned, recovering");
                poisoned.into_inner()
            }
        };

        let mut candidate = base.to_string();
        let mut counter = 1u32;
        while used.contains(&candidate) {
            let suffix = counter.to_string();
            let stem_len = MAX_SUFFIXED_LEN
                .saturating_sub(suffix.len())
                .min(MAX_TICKER_LEN - 1);
            let stem: String = base.chars().take(stem_len).collect();
            candidate = format!("{stem}{suffix}");
            counter += 1;
        }

        used.insert(candidate.clone());
        candidate
    }
}

/// Strip a leading `#` and every character that is not ASCII alphanumeric
/// or whitespace.
pub fn clean_topic_name(name: &str) -> String {
    name.strip_prefix('#')
        .unwrap_or(name)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Derive the uncontested ticker for a cleaned name.
///
/// One word is truncated to six characters. Several words give their
/// initials (at most six); initials shorter than three fall back to the
/// first four letters of the first word. Anything still under three
/// characters is padded with `X`.
pub fn base_ticker(clean_name: &str) -> String {
    let upper = clean_name.to_uppercase();
    let words: Vec<&str> = upper.split_whitespace().collect();

    let mut ticker: String = match words.as_slice() {
        [] => return FALLBACK_TICKER.to_string(),
        [word] => word.chars().take(MAX_TICKER_LEN).collect(),
        [first, ..] => {
            let initials: String = words
                .iter()
                .filter_map(|w| w.chars().next())
                .take(MAX_TICKER_LEN)
                .collect();
            if initials.chars().count() < MIN_TICKER_LEN {
                first.chars().take(4).collect()
            } else {
                initials
            }
        }
    };

    while ticker.chars().count() < MIN_TICKER_LEN {
        ticker.push('X');
    }
    ticker
}

/// Short names get a random decoration; long names pass through.
fn display_name(base_name: &str) -> String {
    if base_name.chars().count() > MAX_TICKER_LEN {
        return base_name.to_string();
    }

    let mut rng = rand::rng();
    let suffix = NAME_SUFFIXES.choose(&mut rng).copied().unwrap_or("");
    if !suffix.is_empty() {
        return format!("{base_name} {suffix}");
    }
    let prefix = NAME_PREFIXES.choose(&mut rng).copied().unwrap_or("");
    format!("{prefix}{base_name}")
}

/// Search link for a topic on the social origin.
pub fn search_url(topic: &str) -> String {
    format!(
        "https://x.com/search?q={}&src=trend_click&vertical=trends",
        urlencoding::encode(topic)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Candidate;
    use crate::scoring::ScoringEngine;

    fn scored(name: &str) -> ScoredCandidate {
        ScoringEngine::default().score(&Candidate::new(name, 2, "crypto", "10K"))
    }

    struct NoAssets;

    #[async_trait::async_trait]
    impl AssetFetcher for NoAssets {
        async fn fetch(&self, _topic: &str) -> Option<Asset> {
            None
        }
    }

    struct FixedAsset;

    #[async_trait::async_trait]
    impl AssetFetcher for FixedAsset {
        async fn fetch(&self, _topic: &str) -> Option<Asset> {
            Some(Asset {
                content_type: "image/png".to_string(),
                bytes: vec![7; 2048],
            })
        }
    }

    #[test]
    fn test_clean_topic_name() {
        assert_eq!(clean_topic_name("#Doge-Coin!"), "DogeCoin");
        assert_eq!(clean_topic_name("  Doge Coin 2 "), "Doge Coin 2");
        assert_eq!(clean_topic_name("#"), "");
    }

    #[test]
    fn test_base_ticker_rules() {
        assert_eq!(base_ticker("Dogecoin"), "DOGECO");
        assert_eq!(base_ticker("DOGE"), "DOGE");
        assert_eq!(base_ticker("Doge Coin 2"), "DC2");
        assert_eq!(base_ticker("Doge Coin"), "DOGE");
        assert_eq!(base_ticker("one two three four five six seven"), "OTTFFS");
        assert_eq!(base_ticker("AI"), "AIX");
        assert_eq!(base_ticker(""), FALLBACK_TICKER);
    }

    #[test]
    fn test_tickers_unique_within_process() {
        let generator = ArtifactGenerator::new();
        let tickers: Vec<String> = ["Dogecoin", "DOGE", "Doge Coin 2"]
            .iter()
            .map(|n| generator.compose(&scored(n)).ticker)
            .collect();

        let unique: HashSet<&String> = tickers.iter().collect();
        assert_eq!(unique.len(), 3, "duplicates in {tickers:?}");
        for t in &tickers {
            assert!((3..=7).contains(&t.len()), "bad length: {t}");
        }
    }

    #[test]
    fn test_collision_appends_counter() {
        let generator = ArtifactGenerator::new();
        let first = generator.compose(&scored("Dogecoin")).ticker;
        let second = generator.compose(&scored("DOGECOIN")).ticker;
        let third = generator.compose(&scored("#dogecoin")).ticker;

        assert_eq!(first, "DOGECO");
        assert_eq!(second, "DOGEC1");
        assert_eq!(third, "DOGEC2");
    }

    #[test]
    fn test_suffixed_tickers_stay_within_seven_chars() {
        let generator = ArtifactGenerator::new();
        let tickers: Vec<String> = (0..150)
            .map(|_| generator.compose(&scored("Dogecoin")).ticker)
            .collect();

        let unique: HashSet<&String> = tickers.iter().collect();
        assert_eq!(unique.len(), tickers.len());
        for t in &tickers {
            assert!((3..=7).contains(&t.len()), "bad length: {t}");
        }
        assert_eq!(tickers[99], "DOGEC99");
        assert_eq!(tickers[100], "DOGE100");
    }

    #[test]
    fn test_released_ticker_is_reused() {
        let generator = ArtifactGenerator::new();
        let first = generator.compose(&scored("Dogecoin")).ticker;
        generator.release(&first);
        assert!(!generator.is_used(&first));
        assert_eq!(generator.compose(&scored("Dogecoin")).ticker, first);
    }

    #[test]
    fn test_reserved_tickers_are_skipped() {
        let generator = ArtifactGenerator::with_reserved(["PEPE"]);
        assert!(generator.is_used("PEPE"));
        let ticker = generator.compose(&scored("Pepe")).ticker;
        assert_eq!(ticker, "PEPE1");
    }

    #[test]
    fn test_display_name_decorates_short_names_only() {
        let long = display_name("Extraordinary");
        assert_eq!(long, "Extraordinary");

        for _ in 0..20 {
            let short = display_name("Pepe");
            assert!(short.contains("Pepe"));
        }
    }

    #[test]
    fn test_social_url_prefers_candidate_url() {
        let generator = ArtifactGenerator::new();
        let mut s = scored("Pepe");
        s.candidate.url = Some("https://x.com/pepe/status/1".to_string());
        assert_eq!(generator.compose(&s).social_url, "https://x.com/pepe/status/1");

        let fallback = generator.compose(&scored("#Big News"));
        assert!(fallback.social_url.starts_with("https://x.com/search?q=%23Big%20News"));
    }

    #[tokio::test]
    async fn test_generate_without_asset_still_succeeds() {
        let generator = ArtifactGenerator::new();
        let artifact = generator.generate(&scored("Pepe"), &NoAssets).await;
        assert!(artifact.asset.is_none());
        assert!(!artifact.ticker.is_empty());
        assert!(artifact.description.contains(&artifact.ticker));
    }

    #[tokio::test]
    async fn test_generate_attaches_asset() {
        let generator = ArtifactGenerator::new();
        let artifact = generator.generate(&scored("Pepe"), &FixedAsset).await;
        assert_eq!(artifact.asset.map(|a| a.bytes.len()), Some(2048));
    }
}
