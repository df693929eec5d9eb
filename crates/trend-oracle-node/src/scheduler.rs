//! The cycle scheduler.
//!
//! One cycle runs its phases strictly in order:
//!
//! ```text
//! ingest -> score -> harvest -> select -> generate/deploy/mark/register -> expansion
//! ```
//!
//! Cycles are serialized by a run-lock. A tick that arrives while a cycle is
//! still running is skipped, not queued. Only storage failures end a cycle
//! early; the partial report is still returned.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinSet;

use oracle::{
    voice, ArtifactGenerator, Asset, AssetFetcher, BalanceQuery, CandidateSource, CandidateStore,
    ClaimLedger, Database, DeploymentRecord, DeploymentSink, HarvestReport, OracleError, Replica,
    ScoredCandidate, ScoringEngine, SettlementSink, WalletContext, DEFAULT_MIN_SCORE,
};
use oracle_agent::ReplicationController;

use crate::metrics;

/// Scored candidates described in the log at debug level.
const LOGGED_TOP_CANDIDATES: usize = 5;

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub min_score: f64,
    pub max_deploys_per_cycle: usize,
    /// Generate and announce previews; never deploy or mark.
    pub dry_run: bool,
    /// Bound on each external call made by the scheduler itself.
    pub call_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_score: DEFAULT_MIN_SCORE,
            max_deploys_per_cycle: 1,
            dry_run: true,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// External systems one cycle talks to.
pub struct Collaborators {
    pub source: Arc<dyn CandidateSource>,
    pub assets: Arc<dyn AssetFetcher>,
    /// `None` forces dry-run.
    pub deployer: Option<Arc<dyn DeploymentSink>>,
    /// `None` skips the harvest phase.
    pub settler: Option<Arc<dyn SettlementSink>>,
    pub balances: Arc<dyn BalanceQuery>,
}

/// Structured outcome of one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub dry_run: bool,
    /// Candidates ingested.
    pub candidates: usize,
    /// Candidates scoring at or above the threshold.
    pub above_threshold: usize,
    /// Candidates chosen for deployment.
    pub selected: usize,
    pub deployed: usize,
    pub previews: usize,
    pub deploy_failures: usize,
    pub claims: HarvestReport,
    pub claims_registered: usize,
    /// Tickers generated this cycle, deployed or previewed.
    pub tickers: Vec<String>,
    /// Sequence number of a replica created this cycle.
    pub replica: Option<u32>,
    /// Storage failure that ended the cycle early.
    pub aborted: Option<String>,
}

impl CycleReport {
    fn new(cycle: u64, dry_run: bool) -> Self {
        Self {
            cycle,
            started_at: Utc::now(),
            finished_at: None,
            dry_run,
            candidates: 0,
            above_threshold: 0,
            selected: 0,
            deployed: 0,
            previews: 0,
            deploy_failures: 0,
            claims: HarvestReport::default(),
            claims_registered: 0,
            tickers: Vec::new(),
            replica: None,
            aborted: None,
        }
    }
}

/// Asset lookups bounded by the scheduler's call timeout.
struct BoundedAssets<'a> {
    inner: &'a dyn AssetFetcher,
    timeout: Duration,
}

#[async_trait]
impl AssetFetcher for BoundedAssets<'_> {
    async fn fetch(&self, topic: &str) -> Option<Asset> {
        match tokio::time::timeout(self.timeout, self.inner.fetch(topic)).await {
            Ok(asset) => asset,
            Err(_) => {
                tracing::warn!(topic, timeout_secs = self.timeout.as_secs(), "Asset fetch timed out");
                None
            }
        }
    }
}

pub struct CycleScheduler {
    engine: ScoringEngine,
    store: CandidateStore,
    ledger: ClaimLedger,
    generator: ArtifactGenerator,
    controller: Option<ReplicationController>,
    collaborators: Collaborators,
    wallet: WalletContext,
    config: SchedulerConfig,
    run_lock: Mutex<()>,
    cycles: AtomicU64,
    transmissions: AtomicU64,
    skipped_ticks: AtomicU64,
    last_report: RwLock<Option<CycleReport>>,
}

impl CycleScheduler {
    /// Build a scheduler over `db`.
    ///
    /// The ticker set is seeded with every ticker already deployed, so codes
    /// stay unique across restarts.
    pub fn new(
        db: Database,
        collaborators: Collaborators,
        wallet: WalletContext,
        controller: Option<ReplicationController>,
        config: SchedulerConfig,
    ) -> Result<Self, OracleError> {
        let store = CandidateStore::new(db.clone());
        let generator = ArtifactGenerator::with_reserved(store.deployed_tickers()?);
        let ledger = ClaimLedger::new(db).with_call_timeout(config.call_timeout);

        if collaborators.deployer.is_none() && !config.dry_run {
            tracing::warn!("No deployment sink configured, running as dry run");
        }

        Ok(Self {
            engine: ScoringEngine::default(),
            store,
            ledger,
            generator,
            controller,
            collaborators,
            wallet,
            config,
            run_lock: Mutex::new(()),
            cycles: AtomicU64::new(0),
            transmissions: AtomicU64::new(0),
            skipped_ticks: AtomicU64::new(0),
            last_report: RwLock::new(None),
        })
    }

    pub fn with_engine(mut self, engine: ScoringEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.config.dry_run || self.collaborators.deployer.is_none()
    }

    pub fn store(&self) -> &CandidateStore {
        &self.store
    }

    pub fn ledger(&self) -> &ClaimLedger {
        &self.ledger
    }

    pub fn controller(&self) -> Option<&ReplicationController> {
        self.controller.as_ref()
    }

    pub fn skipped_ticks(&self) -> u64 {
        self.skipped_ticks.load(Ordering::Relaxed)
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report
            .read()
            .map(|r| r.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Run one cycle unless one is already in flight.
    ///
    /// Returns `None` for a skipped tick.
    pub async fn tick(&self) -> Option<CycleReport> {
        let Ok(_guard) = self.run_lock.try_lock() else {
            let skipped = self.skipped_ticks.fetch_add(1, Ordering::Relaxed) + 1;
            metrics::TICKS_SKIPPED.inc();
            tracing::warn!(skipped, "Previous cycle still running, skipping tick");
            return None;
        };
        Some(self.run_cycle().await)
    }

    /// Run only the expansion check, waiting for any in-flight cycle.
    pub async fn expand_only(&self, account: &str) -> Result<Option<Replica>, OracleError> {
        let _guard = self.run_lock.lock().await;
        match &self.controller {
            Some(controller) => {
                let replica = controller
                    .check_and_expand(self.collaborators.balances.as_ref(), account)
                    .await?;
                if replica.is_some() {
                    metrics::REPLICAS_CREATED.inc();
                }
                Ok(replica)
            }
            None => Err(OracleError::ConfigurationMissing(
                "expansion is not enabled".into(),
            )),
        }
    }

    /// Tick every `interval` until `shutdown` flips to true.
    ///
    /// The timer does not wait for a cycle to finish; overlapping ticks are
    /// skipped by the run-lock. On shutdown no new tick is started and the
    /// in-flight cycle, if any, is awaited.
    pub async fn run_continuous(
        self: Arc<Self>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(
            interval_secs = interval.as_secs(),
            dry_run = self.is_dry_run(),
            "Continuous mode started"
        );

        let mut timer = tokio::time::interval(interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let mut in_flight = JoinSet::new();

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    let scheduler = Arc::clone(&self);
                    in_flight.spawn(async move { scheduler.tick().await });
                }
                Some(joined) = in_flight.join_next(), if !in_flight.is_empty() => {
                    if let Err(e) = joined {
                        tracing::error!(error = %e, "Cycle task failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        tracing::info!(in_flight = in_flight.len(), "Stopping, waiting for in-flight cycle");
        while let Some(joined) = in_flight.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Cycle task failed");
            }
        }
        tracing::info!("Scheduler stopped");
    }

    async fn run_cycle(&self) -> CycleReport {
        let cycle = self.cycles.fetch_add(1, Ordering::SeqCst) + 1;
        let dry_run = self.is_dry_run();
        let started = Instant::now();
        let mut report = CycleReport::new(cycle, dry_run);

        tracing::info!(cycle, dry_run, "{}", voice::scanning_banner());

        if let Err(e) = self.run_phases(&mut report).await {
            metrics::CYCLES_ABORTED.inc();
            tracing::error!(cycle, error = %e, "{}", voice::handle_error(&e.to_string()));
            report.aborted = Some(e.to_string());
        }

        report.finished_at = Some(Utc::now());
        metrics::CYCLES_TOTAL.inc();
        metrics::CYCLE_DURATION.observe(started.elapsed().as_secs_f64());

        tracing::info!(
            cycle,
            candidates = report.candidates,
            deployed = report.deployed,
            previews = report.previews,
            claims_settled = report.claims.claimed,
            replica = ?report.replica,
            "{}",
            voice::report_cycle(report.candidates, report.deployed + report.previews)
        );

        match self.last_report.write() {
            Ok(mut last) => *last = Some(report.clone()),
            Err(poisoned) => *poisoned.into_inner() = Some(report.clone()),
        }
        report
    }

    async fn run_phases(&self, report: &mut CycleReport) -> Result<(), OracleError> {
        // Ingest
        let candidates = match self.timed(self.collaborators.source.fetch()).await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "Candidate source failed, continuing with none");
                Vec::new()
            }
        };
        report.candidates = candidates.len();

        // Score
        let ranked = self.engine.rank(&candidates);
        report.above_threshold = ranked
            .iter()
            .filter(|s| s.total_score >= self.config.min_score)
            .count();
        for scored in ranked.iter().take(LOGGED_TOP_CANDIDATES) {
            tracing::debug!(
                topic = %scored.candidate.name,
                score = scored.total_score,
                "{}",
                voice::describe_trend(&scored.candidate.name, scored.total_score)
            );
        }

        // Harvest before any new spend
        match &self.collaborators.settler {
            Some(settler) => {
                report.claims = self.ledger.harvest(settler.as_ref(), &self.wallet).await?;
                metrics::CLAIMS_HARVESTED.inc_by(report.claims.claimed as u64);
                metrics::CLAIMS_FAILED.inc_by(report.claims.failed as u64);
            }
            None => tracing::debug!("No settlement sink configured, skipping harvest"),
        }

        // Select and deploy
        let selected = self.store.select_eligible(
            &ranked,
            self.config.min_score,
            self.config.max_deploys_per_cycle,
        )?;
        report.selected = selected.len();
        for scored in &selected {
            self.deploy_one(scored, report).await?;
        }

        // Expansion
        if let Some(controller) = &self.controller {
            let replica = controller
                .check_and_expand(self.collaborators.balances.as_ref(), &self.wallet.address)
                .await?;
            if let Some(replica) = replica {
                metrics::REPLICAS_CREATED.inc();
                report.replica = Some(replica.sequence_number);
            }
        }

        Ok(())
    }

    /// Generate, deploy, mark and register one candidate.
    ///
    /// A failed deploy is counted and leaves the topic unmarked.
    async fn deploy_one(
        &self,
        scored: &ScoredCandidate,
        report: &mut CycleReport,
    ) -> Result<(), OracleError> {
        let assets = BoundedAssets {
            inner: self.collaborators.assets.as_ref(),
            timeout: self.config.call_timeout,
        };
        let artifact = self.generator.generate(scored, &assets).await;
        report.tickers.push(artifact.ticker.clone());
        let transmission = self.transmissions.fetch_add(1, Ordering::SeqCst) + 1;

        let deployer = match (&self.collaborators.deployer, self.config.dry_run) {
            (Some(deployer), false) => deployer,
            _ => {
                tracing::info!(
                    ticker = %artifact.ticker,
                    "{}",
                    voice::announce_deployment(transmission, &artifact, None)
                );
                report.previews += 1;
                self.generator.release(&artifact.ticker);
                return Ok(());
            }
        };

        let receipt = match self.timed(deployer.deploy(&artifact)).await {
            Ok(receipt) => receipt,
            Err(e) => {
                metrics::DEPLOYMENTS_FAILED.inc();
                report.deploy_failures += 1;
                self.generator.release(&artifact.ticker);
                tracing::warn!(
                    topic = %artifact.topic,
                    ticker = %artifact.ticker,
                    error = %e,
                    "{}",
                    voice::handle_error(&e.to_string())
                );
                return Ok(());
            }
        };

        let now = Utc::now();
        let record = DeploymentRecord {
            normalized_key: artifact.normalized_key.clone(),
            artifact_id: uuid::Uuid::new_v4().to_string(),
            external_reference: receipt.external_reference.clone(),
            transaction: Some(receipt.transaction.clone()),
            ticker: artifact.ticker.clone(),
            name: artifact.name.clone(),
            deployed_at: now,
        };
        if !self.store.mark_deployed(&record)? {
            tracing::warn!(key = %record.normalized_key, "Topic was already marked deployed");
        }
        self.ledger.register(&receipt, &artifact.name, now)?;

        metrics::DEPLOYMENTS_TOTAL.inc();
        report.deployed += 1;
        report.claims_registered += 1;
        tracing::info!(
            reference = %receipt.external_reference,
            "{}",
            voice::announce_deployment(transmission, &artifact, Some(&receipt.external_reference))
        );
        Ok(())
    }

    async fn timed<T>(
        &self,
        fut: impl Future<Output = Result<T, OracleError>>,
    ) -> Result<T, OracleError> {
        tokio::time::timeout(self.config.call_timeout, fut)
            .await
            .unwrap_or(Err(OracleError::Timeout(self.config.call_timeout.as_secs())))
    }
}
