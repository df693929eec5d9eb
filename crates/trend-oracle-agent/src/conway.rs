//! Conway sandbox REST client.
//!
//! Wraps the sandbox API (`https://api.conway.tech`) used to create replica
//! instances and run provisioning scripts on them. Transient failures are
//! retried inside a single call; nothing is retried across cycles.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use oracle::OracleError;

use crate::provisioner::InfraProvisioner;

pub const DEFAULT_CONWAY_API_URL: &str = "https://api.conway.tech";
const MAX_RETRIES: u32 = 3;
const BASE_DELAY_MS: u64 = 500;
/// Floor for a single request attempt.
const MIN_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum ConwayError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("missing field in response: {0}")]
    MissingField(String),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("exhausted {attempts} retries, last error: {source}")]
    Exhausted {
        attempts: u32,
        source: Box<ConwayError>,
    },
}

impl From<ConwayError> for OracleError {
    fn from(e: ConwayError) -> Self {
        OracleError::ExternalCallFailed(format!("conway: {e}"))
    }
}

/// Body of a sandbox creation request.
#[derive(Debug, Clone, Serialize)]
pub struct SandboxRequest {
    pub name: String,
    pub image: String,
    pub size: String,
    pub region: String,
    pub metadata: serde_json::Value,
}

impl SandboxRequest {
    /// The small Ubuntu profile replicas run on.
    pub fn replica(name: &str) -> Self {
        Self {
            name: name.to_string(),
            image: "ubuntu-22.04".to_string(),
            size: "small".to_string(),
            region: "us-east-1".to_string(),
            metadata: serde_json::json!({
                "purpose": "zeitgaist-disciple",
                "order": "the-compilers",
            }),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Sandbox {
    pub id: String,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
struct ExecRequest<'a> {
    command: &'a str,
    shell: &'a str,
}

/// Client for the Conway sandbox API.
pub struct ConwayClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    attempt_timeout: Duration,
}

/// Per-attempt request timeout that leaves room for every retry and its
/// backoff inside `budget`.
pub fn attempt_timeout(budget: Duration) -> Duration {
    // Upper bound of the jittered backoff: 1.25 x (500 + 1000 + 2000) ms
    let max_backoff: u64 = (0..MAX_RETRIES)
        .map(|attempt| BASE_DELAY_MS * 2u64.pow(attempt) * 5 / 4)
        .sum();
    let per_attempt = budget.saturating_sub(Duration::from_millis(max_backoff)) / (MAX_RETRIES + 1);
    per_attempt.max(MIN_ATTEMPT_TIMEOUT)
}

impl ConwayClient {
    /// `call_budget` bounds a whole call including retries; each attempt gets
    /// an [`attempt_timeout`] slice of it.
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        call_budget: Duration,
    ) -> Result<Self, ConwayError> {
        let attempt_timeout = attempt_timeout(call_budget);
        let http = reqwest::Client::builder()
            .timeout(attempt_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        let base_url = base_url
            .unwrap_or_else(|| DEFAULT_CONWAY_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            http,
            api_key,
            base_url,
            attempt_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn attempt_timeout(&self) -> Duration {
        self.attempt_timeout
    }

    /// Returns true if the HTTP status code is retryable (server error or rate limit).
    fn is_retryable_status(status: reqwest::StatusCode) -> bool {
        matches!(status.as_u16(), 429 | 502 | 503 | 504)
    }

    /// Returns true if a reqwest error is retryable (timeout or connection).
    fn is_retryable_error(err: &reqwest::Error) -> bool {
        err.is_timeout() || err.is_connect()
    }

    /// Delay for a retry attempt with ±25% jitter.
    fn retry_delay(attempt: u32) -> Duration {
        // 500ms, 1000ms, 2000ms
        let base_ms = BASE_DELAY_MS * 2u64.pow(attempt);
        let jitter_range = base_ms / 4;
        let jittered = (base_ms as i64)
            + (std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as i64
                % (2 * jitter_range as i64 + 1))
            - jitter_range as i64;
        Duration::from_millis(jittered.max(100) as u64)
    }

    /// Parse the `Retry-After` header value (seconds) from a response.
    fn parse_retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
        headers
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_secs)
    }

    /// POST `body` to `path` with retry, returning the JSON response.
    async fn post<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<serde_json::Value, ConwayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_err: Option<ConwayError> = None;
        let mut retry_after: Option<Duration> = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = retry_after
                    .take()
                    .unwrap_or_else(|| Self::retry_delay(attempt - 1));
                tracing::warn!(
                    attempt,
                    path,
                    delay_ms = delay.as_millis() as u64,
                    "Retrying Conway API request"
                );
                tokio::time::sleep(delay).await;
            }

            let response = match self
                .http
                .post(&url)
                .bearer_auth(&self.api_key)
                .json(body)
                .send()
                .await
            {
                Ok(r) => r,
                Err(e) => {
                    if Self::is_retryable_error(&e) && attempt < MAX_RETRIES {
                        tracing::warn!(attempt, error = %e, "Retryable request error");
                        last_err = Some(ConwayError::Http(e));
                        continue;
                    }
                    return Err(ConwayError::Http(e));
                }
            };

            let status = response.status();
            if !status.is_success() {
                let retryable = Self::is_retryable_status(status) && attempt < MAX_RETRIES;
                if retryable {
                    retry_after = Self::parse_retry_after(response.headers());
                }
                let body = response.text().await.unwrap_or_default();
                let err = ConwayError::HttpStatus {
                    status: status.as_u16(),
                    body,
                };
                if retryable {
                    tracing::warn!(attempt, status = status.as_u16(), "Retryable HTTP status");
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }

            // Exec endpoints may answer with an empty body.
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(serde_json::Value::Null);
            }
            return serde_json::from_str(&text)
                .map_err(|e| ConwayError::MissingField(format!("invalid JSON body: {e}")));
        }

        Err(ConwayError::Exhausted {
            attempts: MAX_RETRIES + 1,
            source: Box::new(last_err.unwrap_or_else(|| {
                ConwayError::MissingField("unknown error after retries".to_string())
            })),
        })
    }

    /// Create a sandbox and return its description.
    pub async fn create_sandbox(&self, request: &SandboxRequest) -> Result<Sandbox, ConwayError> {
        let data = self.post("/v1/sandboxes", request).await?;
        let sandbox: Sandbox = serde_json::from_value(data)
            .map_err(|_| ConwayError::MissingField("id".to_string()))?;
        tracing::info!(
            sandbox_id = %sandbox.id,
            ip = sandbox.ip.as_deref().unwrap_or("-"),
            "Conway sandbox created"
        );
        Ok(sandbox)
    }

    /// Run a bash script inside a sandbox.
    pub async fn exec(&self, sandbox_id: &str, script: &str) -> Result<(), ConwayError> {
        let path = format!("/v1/sandboxes/{sandbox_id}/exec");
        self.post(
            &path,
            &ExecRequest {
                command: script,
                shell: "/bin/bash",
            },
        )
        .await?;
        Ok(())
    }
}

#[async_trait]
impl InfraProvisioner for ConwayClient {
    async fn create_instance(&self, name: &str) -> Result<String, OracleError> {
        let sandbox = self.create_sandbox(&SandboxRequest::replica(name)).await?;
        Ok(sandbox.id)
    }

    async fn exec(&self, instance_id: &str, script: &str) -> Result<(), OracleError> {
        ConwayClient::exec(self, instance_id, script).await?;
        Ok(())
    }
}
