//! Collaborator seams.
//!
//! Everything that talks to the outside world is behind one of these
//! traits. The HTTP implementations live in `oracle_feeds` and
//! `oracle_agent`; tests plug in in-process fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::candidate::Candidate;
use crate::claim_ledger::PendingClaim;
use crate::error::OracleError;
use crate::generator::{Artifact, Asset};

/// Produces the ranked candidates for the current tick.
#[async_trait]
pub trait CandidateSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Fetch candidates. An empty list or `SourceUnavailable` both mean
    /// "try the next source".
    async fn fetch(&self) -> Result<Vec<Candidate>, OracleError>;
}

/// Fetches a representative image for a topic.
#[async_trait]
pub trait AssetFetcher: Send + Sync {
    /// `None` when nothing usable was found. Never an error.
    async fn fetch(&self, topic: &str) -> Option<Asset>;
}

/// Publishes an artifact.
#[async_trait]
pub trait DeploymentSink: Send + Sync {
    async fn deploy(&self, artifact: &Artifact) -> Result<DeploymentReceipt, OracleError>;
}

/// Harvests the proceeds owed for a pending claim.
///
/// Must be safe to call again when a previous attempt's outcome is unknown.
#[async_trait]
pub trait SettlementSink: Send + Sync {
    async fn settle(
        &self,
        claim: &PendingClaim,
        wallet: &WalletContext,
    ) -> Result<SettlementReceipt, OracleError>;
}

/// Reads the reserve balance of an account, in whole units.
#[async_trait]
pub trait BalanceQuery: Send + Sync {
    async fn balance(&self, account: &str) -> Result<f64, OracleError>;
}

/// Account the pipeline acts for.
#[derive(Clone, Serialize, Deserialize)]
pub struct WalletContext {
    pub address: String,
    /// Signing key, forwarded opaquely to sinks that need it.
    #[serde(skip)]
    pub signing_key: Option<String>,
}

impl WalletContext {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            signing_key: None,
        }
    }

    pub fn with_signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = Some(key.into());
        self
    }
}

impl std::fmt::Debug for WalletContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WalletContext")
            .field("address", &self.address)
            .field("signing_key", &self.signing_key.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Successful deployment.
#[derive(Clone, Serialize, Deserialize)]
pub struct DeploymentReceipt {
    /// Durable identifier of the deployed artifact (e.g. a mint address).
    pub external_reference: String,
    /// Transaction identifier of the deployment.
    pub transaction: String,
    /// Opaque material the settlement sink needs later.
    #[serde(skip_serializing, default)]
    pub auth_key_material: Option<String>,
}

impl std::fmt::Debug for DeploymentReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentReceipt")
            .field("external_reference", &self.external_reference)
            .field("transaction", &self.transaction)
            .field(
                "auth_key_material",
                &self.auth_key_material.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

/// Successful settlement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SettlementReceipt {
    pub transaction: String,
}
