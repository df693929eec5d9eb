//! Pending harvest obligations for deployed artifacts.
//!
//! Every unclaimed claim is attempted on every harvest, whether or not its
//! `eligible_at` has passed: proceeds are recouped before the next spend.
//! A failed attempt leaves the claim exactly as it was, so it is retried
//! next cycle with no cap and no backoff.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::{from_millis, to_millis, Database};
use crate::error::OracleError;
use crate::external::{DeploymentReceipt, SettlementSink, WalletContext};

/// Minutes between registration and nominal eligibility.
pub const CLAIM_DELAY_MINUTES: i64 = 30;

/// Default bound on a single settlement call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// One outstanding (or settled) harvest obligation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingClaim {
    pub id: i64,
    pub external_reference: String,
    /// Opaque material from the deployment receipt. Never serialized out.
    #[serde(skip_serializing, default)]
    pub auth_key_material: Option<String>,
    pub display_name: String,
    pub registered_at: DateTime<Utc>,
    pub eligible_at: DateTime<Utc>,
    pub claimed: bool,
    pub claimed_at: Option<DateTime<Utc>>,
    /// Settlement transaction on success.
    pub result: Option<String>,
}

impl PendingClaim {
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        !self.claimed && now >= self.eligible_at
    }
}

/// Outcome of one harvest pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HarvestReport {
    pub attempted: usize,
    pub claimed: usize,
    pub failed: usize,
}

/// Claim counts by state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimSummary {
    pub total: usize,
    /// Unclaimed, not yet eligible.
    pub pending: usize,
    /// Unclaimed and eligible.
    pub ready: usize,
    pub claimed: usize,
}

#[derive(Debug, Clone)]
pub struct ClaimLedger {
    db: Database,
    call_timeout: Duration,
}

impl ClaimLedger {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// Append a claim for a fresh deployment. Persisted immediately.
    pub fn register(
        &self,
        receipt: &DeploymentReceipt,
        display_name: &str,
        now: DateTime<Utc>,
    ) -> Result<PendingClaim, OracleError> {
        let eligible_at = now + chrono::Duration::minutes(CLAIM_DELAY_MINUTES);
        let conn = self.db.lock()?;
        conn.execute(
            r#"
            INSERT INTO pending_claims
                (external_reference, auth_key_material, display_name, registered_at, eligible_at, claimed)
            VALUES (?1, ?2, ?3, ?4, ?5, 0)
            "#,
            params![
                receipt.external_reference,
                receipt.auth_key_material,
                display_name,
                to_millis(now),
                to_millis(eligible_at),
            ],
        )?;
        let id = conn.last_insert_rowid();

        tracing::info!(
            reference = %receipt.external_reference,
            name = %display_name,
            eligible_at = %eligible_at,
            "Claim registered"
        );

        Ok(PendingClaim {
            id,
            external_reference: receipt.external_reference.clone(),
            auth_key_material: receipt.auth_key_material.clone(),
            display_name: display_name.to_string(),
            registered_at: now,
            eligible_at,
            claimed: false,
            claimed_at: None,
            result: None,
        })
    }

    /// All claims, in registration order.
    pub fn load_all(&self) -> Result<Vec<PendingClaim>, OracleError> {
        self.query("SELECT id, external_reference, auth_key_material, display_name, registered_at, eligible_at, claimed, claimed_at, result FROM pending_claims ORDER BY id ASC")
    }

    pub fn load_unclaimed(&self) -> Result<Vec<PendingClaim>, OracleError> {
        self.query("SELECT id, external_reference, auth_key_material, display_name, registered_at, eligible_at, claimed, claimed_at, result FROM pending_claims WHERE claimed = 0 ORDER BY id ASC")
    }

    fn query(&self, sql: &str) -> Result<Vec<PendingClaim>, OracleError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let claims = stmt
            .query_map([], |row| {
                Ok(PendingClaim {
                    id: row.get(0)?,
                    external_reference: row.get(1)?,
                    auth_key_material: row.get(2)?,
                    display_name: row.get(3)?,
                    registered_at: from_millis(row.get(4)?),
                    eligible_at: from_millis(row.get(5)?),
                    claimed: row.get::<_, i32>(6)? == 1,
                    claimed_at: row.get::<_, Option<i64>>(7)?.map(from_millis),
                    result: row.get(8)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(claims)
    }

    /// Attempt settlement of every unclaimed claim.
    ///
    /// Settlement failures and timeouts are counted, never returned. Only a
    /// storage failure is an error. Successes are written together after
    /// the whole batch has been attempted.
    pub async fn harvest(
        &self,
        sink: &dyn SettlementSink,
        wallet: &WalletContext,
    ) -> Result<HarvestReport, OracleError> {
        let unclaimed = self.load_unclaimed()?;
        let mut report = HarvestReport::default();
        if unclaimed.is_empty() {
            return Ok(report);
        }

        tracing::info!(count = unclaimed.len(), "Harvesting unclaimed claims");

        let mut settled = Vec::new();
        for claim in &unclaimed {
            report.attempted += 1;
            let outcome = tokio::time::timeout(self.call_timeout, sink.settle(claim, wallet))
                .await
                .unwrap_or(Err(OracleError::Timeout(self.call_timeout.as_secs())));

            match outcome {
                Ok(receipt) => {
                    tracing::info!(
                        reference = %claim.external_reference,
                        tx = %receipt.transaction,
                        "Claim settled"
                    );
                    settled.push((claim.id, receipt.transaction, Utc::now()));
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!(
                        reference = %claim.external_reference,
                        error = %e,
                        "Claim settlement failed, will retry next cycle"
                    );
                }
            }
        }

        if !settled.is_empty() {
            let mut conn = self.db.lock()?;
            let tx = conn.transaction()?;
            for (id, transaction, claimed_at) in &settled {
                tx.execute(
                    "UPDATE pending_claims SET claimed = 1, claimed_at = ?1, result = ?2 WHERE id = ?3 AND claimed = 0",
                    params![to_millis(*claimed_at), transaction, id],
                )?;
            }
            tx.commit()?;
        }
        report.claimed = settled.len();

        Ok(report)
    }

    pub fn summary(&self, now: DateTime<Utc>) -> Result<ClaimSummary, OracleError> {
        let claims = self.load_all()?;
        let mut summary = ClaimSummary {
            total: claims.len(),
            ..Default::default()
        };
        for claim in &claims {
            if claim.claimed {
                summary.claimed += 1;
            } else if claim.is_ready(now) {
                summary.ready += 1;
            } else {
                summary.pending += 1;
            }
        }
        Ok(summary)
    }
}
