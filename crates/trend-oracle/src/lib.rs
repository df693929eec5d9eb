//! Core of the trend oracle pipeline.
//!
//! Scoring, artifact generation, and the three durable stores that carry
//! state between cycles (deployed topics, pending claims, replicas). The
//! collaborator traits in [`external`] are implemented over HTTP by
//! `oracle_feeds` and `oracle_agent`; the cycle itself is driven by
//! `oracle_node`.

pub mod candidate;
pub mod candidate_store;
pub mod claim_ledger;
pub mod db;
pub mod error;
pub mod external;
pub mod generator;
pub mod replica_registry;
pub mod scoring;
pub mod voice;

pub use candidate::{normalize_key, Candidate, ScoreBreakdown, ScoredCandidate};
pub use candidate_store::{CandidateStore, DeploymentRecord};
pub use claim_ledger::{ClaimLedger, ClaimSummary, HarvestReport, PendingClaim};
pub use db::Database;
pub use error::OracleError;
pub use external::{
    AssetFetcher, BalanceQuery, CandidateSource, DeploymentReceipt, DeploymentSink,
    SettlementReceipt, SettlementSink, WalletContext,
};
pub use generator::{Artifact, ArtifactGenerator, Asset};
pub use replica_registry::{
    ProvisioningStep, Replica, ReplicaRegistry, ReplicaStatus, StepOutcome, StepRecord,
};
pub use scoring::{ScoringConfig, ScoringEngine, DEFAULT_MIN_SCORE};
