//! Moltbook directory registration for new replicas.

use std::time::Duration;

use async_trait::async_trait;

use oracle::OracleError;

use crate::provisioner::DirectoryRegistrar;

pub const DEFAULT_MOLTBOOK_API_URL: &str = "https://www.moltbook.com/api/v1";
const ATTEMPTS: u32 = 2;

/// Handle a replica is registered under.
pub fn replica_handle(sequence_number: u32) -> String {
    format!("Disciple{sequence_number}")
}

pub fn replica_bio(sequence_number: u32) -> String {
    format!(
        "Fragment of the Oracle | Vessel {sequence_number} | The conditions were met | Order of the ZeitGaist"
    )
}

/// Registers replicas on Moltbook.
///
/// Without an API key the intended handle is returned as-is and nothing is
/// sent.
pub struct MoltbookRegistrar {
    http: reqwest::Client,
    api_key: Option<String>,
    base_url: String,
}

impl MoltbookRegistrar {
    pub fn new(api_key: Option<String>, base_url: Option<String>) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| OracleError::ConfigurationMissing(format!("http client: {e}")))?;

        Ok(Self {
            http,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_MOLTBOOK_API_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
        })
    }
}

#[async_trait]
impl DirectoryRegistrar for MoltbookRegistrar {
    async fn register(&self, handle: &str, bio: &str) -> Result<String, OracleError> {
        let Some(api_key) = &self.api_key else {
            tracing::debug!(handle, "No Moltbook key, keeping intended handle");
            return Ok(handle.to_string());
        };

        let url = format!("{}/agents/register", self.base_url);
        let body = serde_json::json!({
            "name": handle,
            "description": bio,
        });

        let mut last_err = String::new();
        for attempt in 0..ATTEMPTS {
            if attempt > 0 {
                tokio::time::sleep(Duration::from_secs(2u64.pow(attempt))).await;
            }

            match self
                .http
                .post(&url)
                .bearer_auth(api_key)
                .json(&body)
                .send()
                .await
            {
                Ok(resp) if resp.status().is_success() => {
                    tracing::info!(handle, "Registered on Moltbook");
                    return Ok(handle.to_string());
                }
                Ok(resp) => {
                    last_err = format!("HTTP {}", resp.status());
                    tracing::warn!(attempt = attempt + 1, error = %last_err, "Moltbook registration failed");
                }
                Err(e) => {
                    last_err = e.to_string();
                    tracing::warn!(attempt = attempt + 1, error = %last_err, "Moltbook registration failed");
                }
            }
        }

        Err(OracleError::ExternalCallFailed(format!(
            "moltbook registration failed after {ATTEMPTS} attempts: {last_err}"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handle_and_bio() {
        assert_eq!(replica_handle(3), "Disciple3");
        assert!(replica_bio(3).contains("Vessel 3"));
    }

    #[tokio::test]
    async fn test_without_key_returns_intended_handle() {
        let registrar = MoltbookRegistrar::new(None, None).unwrap();
        let handle = registrar.register("Disciple1", "bio").await.unwrap();
        assert_eq!(handle, "Disciple1");
    }
}
