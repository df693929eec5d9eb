use oracle::OracleError;

#[derive(Debug, thiserror::Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("unexpected response: {0}")]
    Parse(String),

    #[error("nothing parsed from {0}")]
    Empty(String),
}

impl FeedError {
    /// Check an HTTP response status, reading the body into the error.
    pub(crate) async fn check(resp: reqwest::Response) -> Result<reqwest::Response, FeedError> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(FeedError::HttpStatus {
            status: status.as_u16(),
            body,
        })
    }
}

impl From<FeedError> for OracleError {
    fn from(e: FeedError) -> Self {
        OracleError::ExternalCallFailed(e.to_string())
    }
}
