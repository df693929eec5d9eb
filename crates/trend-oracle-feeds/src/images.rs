//! Image search for artifact assets.

use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;

use oracle::{Asset, AssetFetcher, OracleError};

use crate::error::FeedError;

pub const DEFAULT_ASSET_SEARCH_URL: &str = "https://www.google.com/search?tbm=isch&tbs=isz:m&q=";

/// Smaller payloads are treated as broken responses.
pub const MIN_ASSET_BYTES: usize = 1000;
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);
const CANDIDATE_URLS: usize = 10;
const MAX_URL_LEN: usize = 500;
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

const GOOD_URL_HINTS: &[&str] = &["images", "cdn", "media", "static", "img", "photo", "pic"];

/// Finds an image through a search results page, then downloads it.
pub struct HttpAssetFetcher {
    http: reqwest::Client,
    search_url: String,
    patterns: Vec<Regex>,
    extension: Regex,
}

impl HttpAssetFetcher {
    /// `search_url` has the URL-encoded topic appended to it.
    pub fn new(search_url: Option<String>) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(FETCH_TIMEOUT)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| OracleError::ConfigurationMissing(format!("http client: {e}")))?;

        let compile = |p: &str| {
            Regex::new(p).map_err(|e| OracleError::ConfigurationMissing(format!("image pattern: {e}")))
        };

        Ok(Self {
            http,
            search_url: search_url.unwrap_or_else(|| DEFAULT_ASSET_SEARCH_URL.to_string()),
            patterns: vec![
                compile(r#"(?i)\["(https?://[^"]+\.(?:jpg|jpeg|png|webp)[^"]*)",\d+,\d+\]"#)?,
                compile(r#"(?i)ou":"(https?://[^"]+\.(?:jpg|jpeg|png|webp)[^"]*)""#)?,
                compile(r#"(?i)src="(https?://encrypted-tbn[^"]+)""#)?,
            ],
            extension: compile(r"(?i)\.(?:jpg|jpeg|png|webp)")?,
        })
    }

    /// Image URLs found in a results page, de-duplicated, in pattern order.
    pub fn extract_image_urls(&self, html: &str) -> Vec<String> {
        let mut urls: Vec<String> = Vec::new();
        for pattern in &self.patterns {
            for caps in pattern.captures_iter(html) {
                let url = caps[1].replace("\\u003d", "=").replace("\\u0026", "&");
                if is_valid_image_url(&url) && !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
        urls
    }

    /// First likely content image among the leading results, else the first.
    pub fn pick_best<'a>(&self, urls: &'a [String]) -> Option<&'a str> {
        urls.iter()
            .take(CANDIDATE_URLS)
            .find(|u| self.is_good_url(u))
            .or_else(|| urls.first())
            .map(String::as_str)
    }

    fn is_good_url(&self, url: &str) -> bool {
        let lower = url.to_lowercase();
        GOOD_URL_HINTS.iter().any(|h| lower.contains(h)) || self.extension.is_match(&lower)
    }

    async fn find_image_url(&self, topic: &str) -> Result<Option<String>, FeedError> {
        let query = urlencoding::encode(topic.trim_start_matches('#'));
        let resp = self
            .http
            .get(format!("{}{}", self.search_url, query))
            .send()
            .await?;
        let html = FeedError::check(resp).await?.text().await?;
        let urls = self.extract_image_urls(&html);
        Ok(self.pick_best(&urls).map(String::from))
    }

    async fn download(&self, url: &str) -> Result<Option<Asset>, FeedError> {
        let resp = FeedError::check(self.http.get(url).send().await?).await?;
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/jpeg")
            .to_string();
        let bytes = resp.bytes().await?;
        Ok(validate_asset(&content_type, bytes.to_vec()))
    }
}

/// Accept only `image/*` payloads of at least [`MIN_ASSET_BYTES`].
pub fn validate_asset(content_type: &str, bytes: Vec<u8>) -> Option<Asset> {
    if !content_type.starts_with("image/") {
        tracing::warn!(content_type, "Asset response is not an image");
        return None;
    }
    if bytes.len() < MIN_ASSET_BYTES {
        tracing::warn!(bytes = bytes.len(), "Asset too small, likely broken");
        return None;
    }
    Some(Asset {
        content_type: content_type.to_string(),
        bytes,
    })
}

fn is_valid_image_url(url: &str) -> bool {
    if url.is_empty() || url.len() > MAX_URL_LEN {
        return false;
    }
    if url.contains("google.com/images") || url.contains("gstatic.com/images") {
        return false;
    }
    if url.contains("favicon") || (url.contains("logo") && url.contains("google")) {
        return false;
    }
    true
}

#[async_trait]
impl AssetFetcher for HttpAssetFetcher {
    async fn fetch(&self, topic: &str) -> Option<Asset> {
        let url = match self.find_image_url(topic).await {
            Ok(Some(url)) => url,
            Ok(None) => {
                tracing::warn!(topic, "No image found");
                return None;
            }
            Err(e) => {
                tracing::warn!(topic, error = %e, "Image search failed");
                return None;
            }
        };

        match self.download(&url).await {
            Ok(asset) => asset,
            Err(e) => {
                tracing::warn!(topic, error = %e, "Image download failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> HttpAssetFetcher {
        HttpAssetFetcher::new(None).unwrap()
    }

    #[test]
    fn test_validate_asset() {
        assert!(validate_asset("text/html", vec![0; 5000]).is_none());
        assert!(validate_asset("image/png", vec![0; 999]).is_none());
        let asset = validate_asset("image/png", vec![0; 1000]).unwrap();
        assert_eq!(asset.content_type, "image/png");
    }

    #[test]
    fn test_extract_image_urls() {
        let html = r#"
            ["https://cdn.example.com/pepe.png",600,400]
            ou":"https://news.example.com/frog.JPG?w=1"
            src="https://encrypted-tbn0.example.com/x?q=tbn=abc"
            ["https://www.google.com/images/branding/logo.png",1,1]
            ["https://cdn.example.com/pepe.png",600,400]
        "#;
        let urls = fetcher().extract_image_urls(html);
        assert_eq!(
            urls,
            vec![
                "https://cdn.example.com/pepe.png".to_string(),
                "https://news.example.com/frog.JPG?w=1".to_string(),
                "https://encrypted-tbn0.example.com/x?q=tbn=abc".to_string(),
            ]
        );
    }

    #[test]
    fn test_pick_best_prefers_content_hosts() {
        let f = fetcher();
        let urls = vec![
            "https://example.com/thumbnail".to_string(),
            "https://media.example.com/a".to_string(),
        ];
        assert_eq!(f.pick_best(&urls), Some("https://media.example.com/a"));

        let plain = vec!["https://example.com/x".to_string()];
        assert_eq!(f.pick_best(&plain), Some("https://example.com/x"));
        assert_eq!(f.pick_best(&[]), None);
    }
}
