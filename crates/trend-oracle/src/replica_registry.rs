//! Durable list of replicas and the per-step provisioning log.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

use crate::db::{from_millis, to_millis, Database};
use crate::error::OracleError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplicaStatus {
    /// Every remote step succeeded.
    Active,
    /// The instance exists but a remote step after creation failed.
    Degraded,
    /// Produced without provisioner credentials; nothing was created.
    Preview,
}

impl ReplicaStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Degraded => "degraded",
            Self::Preview => "preview",
        }
    }
}

impl fmt::Display for ReplicaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReplicaStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "degraded" => Ok(Self::Degraded),
            "preview" => Ok(Self::Preview),
            other => Err(format!("unknown replica status: {other}")),
        }
    }
}

/// An autonomous unit created by the expansion workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Replica {
    pub sequence_number: u32,
    pub name: String,
    pub instance_id: String,
    pub profile_handle: Option<String>,
    pub created_at: DateTime<Utc>,
    pub status: ReplicaStatus,
}

/// Steps of the provisioning state machine, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisioningStep {
    CheckBalance,
    CreateInfra,
    Bootstrap,
    ConfigureIdentity,
    RegisterExternal,
    Start,
    Persist,
}

impl ProvisioningStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckBalance => "check_balance",
            Self::CreateInfra => "create_infra",
            Self::Bootstrap => "bootstrap",
            Self::ConfigureIdentity => "configure_identity",
            Self::RegisterExternal => "register_external",
            Self::Start => "start",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for ProvisioningStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepOutcome {
    Succeeded,
    Failed,
    SkippedDryRun,
}

impl StepOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::SkippedDryRun => "skipped_dry_run",
        }
    }
}

impl FromStr for StepOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Self::Succeeded),
            "failed" => Ok(Self::Failed),
            "skipped_dry_run" => Ok(Self::SkippedDryRun),
            other => Err(format!("unknown step outcome: {other}")),
        }
    }
}

/// A logged provisioning step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepRecord {
    pub run_id: String,
    pub sequence_number: u32,
    pub step: String,
    pub outcome: StepOutcome,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReplicaRegistry {
    db: Database,
}

impl ReplicaRegistry {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// All replicas ordered by sequence number.
    pub fn load_all(&self) -> Result<Vec<Replica>, OracleError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            "SELECT sequence_number, name, instance_id, profile_handle, created_at, status \
             FROM replicas ORDER BY sequence_number ASC",
        )?;
        let replicas = stmt
            .query_map([], |row| {
                let status: String = row.get(5)?;
                Ok(Replica {
                    sequence_number: row.get(0)?,
                    name: row.get(1)?,
                    instance_id: row.get(2)?,
                    profile_handle: row.get(3)?,
                    created_at: from_millis(row.get(4)?),
                    status: status.parse().map_err(|e: String| {
                        rusqlite::Error::FromSqlConversionFailure(
                            5,
                            rusqlite::types::Type::Text,
                            e.into(),
                        )
                    })?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(replicas)
    }

    /// `1 + max(sequence_number)`, or 1 for an empty registry. Always read
    /// from storage, never cached.
    pub fn next_sequence_number(&self) -> Result<u32, OracleError> {
        let conn = self.db.lock()?;
        let max: Option<u32> =
            conn.query_row("SELECT MAX(sequence_number) FROM replicas", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) + 1)
    }

    pub fn count(&self) -> Result<u64, OracleError> {
        let conn = self.db.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM replicas", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Append a replica. A duplicate sequence number is a storage error.
    pub fn append(&self, replica: &Replica) -> Result<(), OracleError> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO replicas (sequence_number, name, instance_id, profile_handle, created_at, status) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                replica.sequence_number,
                replica.name,
                replica.instance_id,
                replica.profile_handle,
                to_millis(replica.created_at),
                replica.status.as_str(),
            ],
        )?;
        tracing::info!(
            sequence = replica.sequence_number,
            instance_id = %replica.instance_id,
            status = %replica.status,
            "Replica persisted"
        );
        Ok(())
    }

    pub fn record_step(
        &self,
        run_id: &str,
        sequence_number: u32,
        step: ProvisioningStep,
        outcome: StepOutcome,
        detail: Option<&str>,
    ) -> Result<(), OracleError> {
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT INTO provisioning_steps (run_id, sequence_number, step, outcome, detail, recorded_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                run_id,
                sequence_number,
                step.as_str(),
                outcome.as_str(),
                detail,
                to_millis(Utc::now()),
            ],
        )?;
        Ok(())
    }

    /// Logged steps of one provisioning run, in the order recorded.
    pub fn steps_for_run(&self, run_id: &str) -> Result<Vec<StepRecord>, OracleError> {
        self.query_steps(
            "SELECT run_id, sequence_number, step, outcome, detail, recorded_at \
             FROM provisioning_steps WHERE run_id = ?1 ORDER BY id ASC",
            params![run_id],
        )
    }

    /// Logged steps of every run that targeted `sequence_number`. Aborted
    /// runs leave steps here without a replica.
    pub fn steps_for_sequence(&self, sequence_number: u32) -> Result<Vec<StepRecord>, OracleError> {
        self.query_steps(
            "SELECT run_id, sequence_number, step, outcome, detail, recorded_at \
             FROM provisioning_steps WHERE sequence_number = ?1 ORDER BY id ASC",
            params![sequence_number],
        )
    }

    fn query_steps(
        &self,
        sql: &str,
        args: impl rusqlite::Params,
    ) -> Result<Vec<StepRecord>, OracleError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(sql)?;
        let steps = stmt
            .query_map(args, |row| {
                let outcome: String = row.get(3)?;
                Ok(StepRecord {
                    run_id: row.get(0)?,
                    sequence_number: row.get(1)?,
                    step: row.get(2)?,
                    outcome: outcome.parse().map_err(|e: String| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            rusqlite::types::Type::Text,
                            e.into(),
                        )
                    })?,
                    detail: row.get(4)?,
                    recorded_at: from_millis(row.get(5)?),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(steps)
    }
}
