//! Durable record of every topic that has been deployed.
//!
//! The key set only grows. A normalized key that is present is never
//! considered again, across restarts included.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::candidate::ScoredCandidate;
use crate::db::{from_millis, to_millis, Database};
use crate::error::OracleError;

/// One successful deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub normalized_key: String,
    pub artifact_id: String,
    pub external_reference: String,
    pub transaction: Option<String>,
    pub ticker: String,
    pub name: String,
    pub deployed_at: DateTime<Utc>,
}

/// Deduplication gate in front of the deployment sink.
#[derive(Debug, Clone)]
pub struct CandidateStore {
    db: Database,
}

impl CandidateStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn is_deployed(&self, key: &str) -> Result<bool, OracleError> {
        let conn = self.db.lock()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM deployed_topics WHERE normalized_key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Record a deployment. The first record for a key wins; marking the
    /// same key again is a no-op and returns `false`.
    pub fn mark_deployed(&self, record: &DeploymentRecord) -> Result<bool, OracleError> {
        let conn = self.db.lock()?;
        let inserted = conn.execute(
            r#"
            INSERT OR IGNORE INTO deployed_topics
                (normalized_key, artifact_id, external_reference, transaction_id, ticker, name, deployed_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.normalized_key,
                record.artifact_id,
                record.external_reference,
                record.transaction,
                record.ticker,
                record.name,
                to_millis(record.deployed_at),
            ],
        )?;

        if inserted == 0 {
            tracing::debug!(key = %record.normalized_key, "Topic already marked deployed");
        }
        Ok(inserted > 0)
    }

    pub fn get(&self, key: &str) -> Result<Option<DeploymentRecord>, OracleError> {
        let conn = self.db.lock()?;
        let record = conn
            .query_row(
                r#"
                SELECT normalized_key, artifact_id, external_reference, transaction_id, ticker, name, deployed_at
                FROM deployed_topics
                WHERE normalized_key = ?1
                "#,
                params![key],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    /// Every deployment, oldest first.
    pub fn load_all(&self) -> Result<Vec<DeploymentRecord>, OracleError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT normalized_key, artifact_id, external_reference, transaction_id, ticker, name, deployed_at
            FROM deployed_topics
            ORDER BY deployed_at ASC
            "#,
        )?;
        let records = stmt
            .query_map([], row_to_record)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(records)
    }

    pub fn count(&self) -> Result<u64, OracleError> {
        let conn = self.db.lock()?;
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM deployed_topics", [], |row| row.get(0))?;
        Ok(n as u64)
    }

    /// Tickers of all deployed artifacts, for seeding the generator.
    pub fn deployed_tickers(&self) -> Result<Vec<String>, OracleError> {
        let conn = self.db.lock()?;
        let mut stmt = conn.prepare("SELECT ticker FROM deployed_topics")?;
        let tickers = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(tickers)
    }

    /// Pick what to deploy this cycle.
    ///
    /// Walks `ranked` in order and keeps candidates with
    /// `total_score >= min_score` whose key is not deployed, skipping
    /// repeats of a key within the batch, until `max` are chosen.
    pub fn select_eligible(
        &self,
        ranked: &[ScoredCandidate],
        min_score: f64,
        max: usize,
    ) -> Result<Vec<ScoredCandidate>, OracleError> {
        let deployed: HashSet<String> = {
            let conn = self.db.lock()?;
            let mut stmt = conn.prepare("SELECT normalized_key FROM deployed_topics")?;
            let keys = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<HashSet<String>, _>>()?;
            keys
        };

        let mut seen = HashSet::new();
        let mut selected = Vec::new();
        for scored in ranked {
            if selected.len() >= max {
                break;
            }
            if scored.total_score < min_score {
                continue;
            }
            let key = scored.key();
            if key.is_empty() || deployed.contains(key) || !seen.insert(key.to_string()) {
                continue;
            }
            selected.push(scored.clone());
        }

        tracing::info!(
            candidates = ranked.len(),
            selected = selected.len(),
            min_score,
            max,
            "Selected candidates for deployment"
        );
        Ok(selected)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<DeploymentRecord> {
    Ok(DeploymentRecord {
        normalized_key: row.get(0)?,
        artifact_id: row.get(1)?,
        external_reference: row.get(2)?,
        transaction: row.get(3)?,
        ticker: row.get(4)?,
        name: row.get(5)?,
        deployed_at: from_millis(row.get(6)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::Candidate;
    use crate::scoring::ScoringEngine;

    fn record(key: &str, reference: &str) -> DeploymentRecord {
        DeploymentRecord {
            normalized_key: key.to_string(),
            artifact_id: format!("artifact-{reference}"),
            external_reference: reference.to_string(),
            transaction: Some(format!("tx-{reference}")),
            ticker: key.to_uppercase(),
            name: key.to_string(),
            deployed_at: Utc::now(),
        }
    }

    fn store() -> CandidateStore {
        CandidateStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_mark_deployed_first_write_wins() {
        let store = store();
        assert!(!store.is_deployed("pepe").unwrap());

        assert!(store.mark_deployed(&record("pepe", "mint-1")).unwrap());
        assert!(!store.mark_deployed(&record("pepe", "mint-2")).unwrap());

        let stored = store.get("pepe").unwrap().unwrap();
        assert_eq!(stored.external_reference, "mint-1");
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_deployed_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oracle.db");

        {
            let store = CandidateStore::new(Database::open(&path).unwrap());
            store.mark_deployed(&record("pepe", "mint-1")).unwrap();
        }

        let store = CandidateStore::new(Database::open(&path).unwrap());
        assert!(store.is_deployed("pepe").unwrap());
        assert!(!store.mark_deployed(&record("pepe", "mint-9")).unwrap());
        assert_eq!(store.get("pepe").unwrap().unwrap().external_reference, "mint-1");
        assert_eq!(store.deployed_tickers().unwrap(), vec!["PEPE".to_string()]);
    }

    #[test]
    fn test_select_eligible_respects_threshold_dedup_and_max() {
        let store = store();
        store.mark_deployed(&record("pepe", "mint-1")).unwrap();

        let engine = ScoringEngine::default();
        let ranked = engine.rank(&[
            Candidate::new("Pepe", 1, "memes", "500K"),
            Candidate::new("#Pepe", 2, "memes", "500K"),
            Candidate::new("Doge", 2, "crypto", "100K"),
            Candidate::new("DOGE", 3, "crypto", "100K"),
            Candidate::new("Wojak", 4, "memes", "50K"),
            Candidate::new("#ObscureThing99", 20, "general", "Unknown"),
        ]);

        let selected = store.select_eligible(&ranked, 50.0, 5).unwrap();
        let keys: Vec<&str> = selected.iter().map(|s| s.key()).collect();
        assert_eq!(keys, vec!["doge", "wojak"]);

        let one = store.select_eligible(&ranked, 50.0, 1).unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].key(), "doge");
    }

    #[test]
    fn test_select_eligible_prefers_higher_score() {
        let store = store();
        let ranked = ScoringEngine::default().rank(&[
            Candidate::new("#ObscureThing99", 20, "general", "Unknown"),
            Candidate::new("Pepe", 1, "memes", "500K"),
        ]);

        let selected = store.select_eligible(&ranked, 30.0, 1).unwrap();
        assert_eq!(selected[0].candidate.name, "Pepe");
    }
}
