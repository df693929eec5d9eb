//! Trend sources.
//!
//! Each source scrapes a ranked trends page and pulls topic names out of
//! link patterns with a regular expression. [`SourceChain`] tries sources in
//! order and falls through on failure or an empty result.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use oracle::{normalize_key, Candidate, CandidateSource, OracleError};

use crate::error::FeedError;

/// Most candidates taken from a single page.
pub const MAX_CANDIDATES: usize = 30;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

const CATEGORY_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "crypto",
        &[
            "bitcoin", "btc", "ethereum", "eth", "solana", "sol", "crypto", "token", "nft", "defi",
            "web3", "blockchain", "doge",
        ],
    ),
    (
        "politics",
        &[
            "trump", "biden", "democrat", "republican", "congress", "senate", "scotus",
            "supreme court", "tariff", "election", "maga", "vote", "impeach",
        ],
    ),
    (
        "tech",
        &[
            "ai", "chatgpt", "openai", "apple", "google", "microsoft", "nvidia", "iphone",
            "android", "elon",
        ],
    ),
    (
        "entertainment",
        &[
            "movie", "netflix", "disney", "album", "tour", "concert", "grammy", "oscar", "anime",
            "manga", "kdrama",
        ],
    ),
    (
        "sports",
        &[
            "nba", "nfl", "mlb", "nhl", "soccer", "football", "basketball", "baseball",
            "super bowl", "playoffs", "ufc",
        ],
    ),
    (
        "gaming",
        &[
            "nintendo", "playstation", "xbox", "pokemon", "pokémon", "zelda", "mario", "switch",
            "steam", "gaming", "nier",
        ],
    ),
    ("memes", &["meme", "viral", "lmao", "bruh", "ratio", "based"]),
];

/// First category whose keyword list has a substring match, else `general`.
pub fn categorize(name: &str) -> &'static str {
    let lower = name.to_lowercase();
    CATEGORY_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|kw| lower.contains(kw)))
        .map(|(category, _)| *category)
        .unwrap_or("general")
}

/// Search link for a topic.
pub fn trend_url(name: &str) -> String {
    format!(
        "https://x.com/search?q={}&src=trend_click",
        urlencoding::encode(name)
    )
}

/// A trends page scraped with a single capture-group pattern.
pub struct RegexTrendSource {
    name: String,
    page_url: String,
    pattern: Regex,
    /// Decode `+` as a space after percent-decoding.
    plus_as_space: bool,
    http: reqwest::Client,
}

impl RegexTrendSource {
    pub fn new(
        name: &str,
        page_url: &str,
        pattern: &str,
        plus_as_space: bool,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| OracleError::ConfigurationMissing(format!("trend pattern for {name}: {e}")))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| OracleError::ConfigurationMissing(format!("http client: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            page_url: page_url.to_string(),
            pattern,
            plus_as_space,
            http,
        })
    }

    /// Ranked US trends from getdaytrends.com.
    pub fn getdaytrends(timeout: Duration) -> Result<Self, OracleError> {
        Self::new(
            "getdaytrends",
            "https://getdaytrends.com/united-states/",
            r"/united-states/trend/([^/]+)/",
            false,
            timeout,
        )
    }

    /// Backup source: trends24.in.
    pub fn trends24(timeout: Duration) -> Result<Self, OracleError> {
        Self::new(
            "trends24",
            "https://trends24.in/united-states/",
            r#"twitter\.com/search\?q=([^"&]+)"#,
            true,
            timeout,
        )
    }

    /// Extract candidates from a page body.
    ///
    /// Names are percent-decoded and trimmed. Repeats (by normalized key)
    /// and empty names are skipped; ranks count from 1 over what is kept.
    pub fn parse(&self, html: &str) -> Vec<Candidate> {
        let mut seen = HashSet::new();
        let mut candidates = Vec::new();

        for caps in self.pattern.captures_iter(html) {
            let raw = &caps[1];
            let decoded = urlencoding::decode(raw)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| raw.to_string());
            let name = if self.plus_as_space {
                decoded.replace('+', " ")
            } else {
                decoded
            };
            let name = name.trim();
            if name.is_empty() || !seen.insert(normalize_key(name)) {
                continue;
            }

            let rank = candidates.len() as u32 + 1;
            candidates.push(
                Candidate::new(name, rank, categorize(name), "Unknown")
                    .with_url(trend_url(name))
                    .with_source(self.name.clone()),
            );
            if candidates.len() >= MAX_CANDIDATES {
                break;
            }
        }

        candidates
    }

    async fn fetch_page(&self) -> Result<String, FeedError> {
        let resp = self.http.get(&self.page_url).send().await?;
        let resp = FeedError::check(resp).await?;
        Ok(resp.text().await?)
    }
}

#[async_trait]
impl CandidateSource for RegexTrendSource {
    fn name(&self) -> &str {
        &self.name
    }

    async fn fetch(&self) -> Result<Vec<Candidate>, OracleError> {
        let html = self
            .fetch_page()
            .await
            .map_err(|e| OracleError::SourceUnavailable(format!("{}: {e}", self.name)))?;

        let candidates = self.parse(&html);
        if candidates.is_empty() {
            return Err(OracleError::SourceUnavailable(
                FeedError::Empty(self.name.clone()).to_string(),
            ));
        }

        tracing::info!(source = %self.name, count = candidates.len(), "Fetched live trends");
        Ok(candidates)
    }
}

/// Ordered fallback over several sources.
///
/// The first source that returns a non-empty list wins. When every source
/// fails the chain yields an empty list, never an error.
pub struct SourceChain {
    sources: Vec<Arc<dyn CandidateSource>>,
}

impl SourceChain {
    pub fn new(sources: Vec<Arc<dyn CandidateSource>>) -> Self {
        Self { sources }
    }

    /// getdaytrends, then trends24.
    pub fn default_chain(timeout: Duration) -> Result<Self, OracleError> {
        Ok(Self::new(vec![
            Arc::new(RegexTrendSource::getdaytrends(timeout)?),
            Arc::new(RegexTrendSource::trends24(timeout)?),
        ]))
    }
}

#[async_trait]
impl CandidateSource for SourceChain {
    fn name(&self) -> &str {
        "chain"
    }

    async fn fetch(&self) -> Result<Vec<Candidate>, OracleError> {
        for source in &self.sources {
            match source.fetch().await {
                Ok(candidates) if !candidates.is_empty() => return Ok(candidates),
                Ok(_) => {
                    tracing::warn!(source = source.name(), "Source returned no candidates, trying next");
                }
                Err(e) => {
                    tracing::warn!(source = source.name(), error = %e, "Source failed, trying next");
                }
            }
        }
        tracing::warn!("All candidate sources failed, continuing with no candidates");
        Ok(Vec::new())
    }
}
