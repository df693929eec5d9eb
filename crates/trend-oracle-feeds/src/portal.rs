//! Deploy and settle services.
//!
//! Signing and submission happen behind these services; this side only
//! sends metadata and reads back references.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};

use oracle::{
    Artifact, DeploymentReceipt, DeploymentSink, OracleError, PendingClaim, SettlementReceipt,
    SettlementSink, WalletContext,
};

use crate::error::FeedError;

/// Minimal valid PNG (1x1 orange pixel) used when no asset was found.
pub const PLACEHOLDER_PNG: &[u8] = &[
    137, 80, 78, 71, 13, 10, 26, 10, 0, 0, 0, 13, 73, 72, 68, 82, 0, 0, 0, 1, 0, 0, 0, 1, 8, 2, 0,
    0, 0, 144, 119, 83, 222, 0, 0, 0, 12, 73, 68, 65, 84, 8, 215, 99, 248, 207, 128, 0, 0, 0, 3, 0,
    1, 54, 174, 216, 54, 0, 0, 0, 0, 0, 73, 69, 78, 68, 174, 66, 96, 130,
];

fn http_client(timeout: Duration) -> Result<reqwest::Client, OracleError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| OracleError::ConfigurationMissing(format!("http client: {e}")))
}

#[derive(Debug, Serialize)]
struct DeployRequest<'a> {
    name: &'a str,
    symbol: &'a str,
    description: &'a str,
    twitter: &'a str,
    image_base64: String,
    image_content_type: &'a str,
    initial_buy: f64,
    wallet: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    signing_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct DeployResponse {
    mint: String,
    signature: String,
    #[serde(default)]
    auth_key: Option<String>,
}

/// Posts artifact metadata to the deploy service.
pub struct HttpDeploymentSink {
    http: reqwest::Client,
    url: String,
    wallet: WalletContext,
    initial_buy: f64,
}

impl HttpDeploymentSink {
    pub fn new(
        url: String,
        wallet: WalletContext,
        initial_buy: f64,
        timeout: Duration,
    ) -> Result<Self, OracleError> {
        Ok(Self {
            http: http_client(timeout)?,
            url,
            wallet,
            initial_buy,
        })
    }

    fn request<'a>(&'a self, artifact: &'a Artifact) -> DeployRequest<'a> {
        let (bytes, content_type) = match &artifact.asset {
            Some(asset) => (asset.bytes.as_slice(), asset.content_type.as_str()),
            None => {
                tracing::warn!(ticker = %artifact.ticker, "No asset, using placeholder image");
                (PLACEHOLDER_PNG, "image/png")
            }
        };

        DeployRequest {
            name: &artifact.name,
            symbol: &artifact.ticker,
            description: &artifact.description,
            twitter: &artifact.social_url,
            image_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            image_content_type: content_type,
            initial_buy: self.initial_buy,
            wallet: &self.wallet.address,
            signing_key: self.wallet.signing_key.as_deref(),
        }
    }

    async fn send(&self, artifact: &Artifact) -> Result<DeployResponse, FeedError> {
        let resp = self
            .http
            .post(&self.url)
            .json(&self.request(artifact))
            .send()
            .await?;
        let resp = FeedError::check(resp).await?;
        resp.json::<DeployResponse>()
            .await
            .map_err(|e| FeedError::Parse(format!("deploy response: {e}")))
    }
}

#[async_trait]
impl DeploymentSink for HttpDeploymentSink {
    async fn deploy(&self, artifact: &Artifact) -> Result<DeploymentReceipt, OracleError> {
        tracing::info!(name = %artifact.name, ticker = %artifact.ticker, "Deploying artifact");
        let resp = self.send(artifact).await?;
        tracing::info!(mint = %resp.mint, tx = %resp.signature, "Artifact deployed");
        Ok(DeploymentReceipt {
            external_reference: resp.mint,
            transaction: resp.signature,
            auth_key_material: resp.auth_key,
        })
    }
}

#[derive(Debug, Serialize)]
struct SettleRequest<'a> {
    action: &'static str,
    mint: &'a str,
    amount: &'static str,
    wallet: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    auth_key: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    signing_key: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct SettleResponse {
    signature: String,
}

/// Posts harvest requests to the settle service.
pub struct HttpSettlementSink {
    http: reqwest::Client,
    url: String,
}

impl HttpSettlementSink {
    pub fn new(url: String, timeout: Duration) -> Result<Self, OracleError> {
        Ok(Self {
            http: http_client(timeout)?,
            url,
        })
    }
}

#[async_trait]
impl SettlementSink for HttpSettlementSink {
    async fn settle(
        &self,
        claim: &PendingClaim,
        wallet: &WalletContext,
    ) -> Result<SettlementReceipt, OracleError> {
        let body = SettleRequest {
            action: "sell",
            mint: &claim.external_reference,
            amount: "100%",
            wallet: &wallet.address,
            auth_key: claim.auth_key_material.as_deref(),
            signing_key: wallet.signing_key.as_deref(),
        };

        let resp = self
            .http
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(FeedError::from)?;
        let resp = FeedError::check(resp).await?;
        let parsed: SettleResponse = resp
            .json()
            .await
            .map_err(|e| FeedError::Parse(format!("settle response: {e}")))?;

        Ok(SettlementReceipt {
            transaction: parsed.signature,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle::{ArtifactGenerator, Asset, Candidate, ScoringEngine};

    fn artifact(asset: Option<Asset>) -> Artifact {
        let scored = ScoringEngine::default().score(&Candidate::new("Pepe", 1, "memes", "500K"));
        let mut artifact = ArtifactGenerator::new().compose(&scored);
        artifact.asset = asset;
        artifact
    }

    fn sink() -> HttpDeploymentSink {
        HttpDeploymentSink::new(
            "http://localhost:0/deploy".into(),
            WalletContext::new("wallet-1"),
            0.1,
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn test_placeholder_is_png() {
        assert_eq!(&PLACEHOLDER_PNG[..8], &[137, 80, 78, 71, 13, 10, 26, 10]);
    }

    #[test]
    fn test_request_uses_placeholder_without_asset() {
        let sink = sink();
        let artifact = artifact(None);
        let req = sink.request(&artifact);

        let expected = base64::engine::general_purpose::STANDARD.encode(PLACEHOLDER_PNG);
        assert_eq!(req.image_base64, expected);
        assert_eq!(req.image_content_type, "image/png");
        assert_eq!(req.symbol, "PEPE");
        assert_eq!(req.wallet, "wallet-1");

        let json = serde_json::to_value(&req).unwrap();
        assert!(json.get("signing_key").is_none());
    }

    #[test]
    fn test_request_uses_asset_when_present() {
        let sink = sink();
        let artifact = artifact(Some(Asset {
            content_type: "image/jpeg".into(),
            bytes: vec![1; 1500],
        }));
        let req = sink.request(&artifact);
        assert_eq!(req.image_content_type, "image/jpeg");
        assert_ne!(
            req.image_base64,
            base64::engine::general_purpose::STANDARD.encode(PLACEHOLDER_PNG)
        );
    }
}
