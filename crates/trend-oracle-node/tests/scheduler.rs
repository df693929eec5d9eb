//! Scheduler behaviour against in-process collaborators.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use oracle::{
    Artifact, Asset, AssetFetcher, BalanceQuery, Candidate, CandidateSource, Database,
    DeploymentReceipt, DeploymentSink, OracleError, PendingClaim, ReplicaRegistry,
    SettlementReceipt, SettlementSink, WalletContext,
};
use oracle_agent::{ExpansionConfig, MoltbookRegistrar, ReplicationController};
use oracle_node::{Collaborators, CycleScheduler, SchedulerConfig};

struct FixedSource {
    candidates: Vec<Candidate>,
    delay: Duration,
}

#[async_trait]
impl CandidateSource for FixedSource {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn fetch(&self) -> Result<Vec<Candidate>, OracleError> {
        tokio::time::sleep(self.delay).await;
        Ok(self.candidates.clone())
    }
}

struct NoAssets;

#[async_trait]
impl AssetFetcher for NoAssets {
    async fn fetch(&self, _topic: &str) -> Option<Asset> {
        None
    }
}

#[derive(Default)]
struct FakeDeployer {
    calls: AtomicUsize,
    fail: bool,
}

#[async_trait]
impl DeploymentSink for FakeDeployer {
    async fn deploy(&self, artifact: &Artifact) -> Result<DeploymentReceipt, OracleError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail {
            return Err(OracleError::ExternalCallFailed("HTTP 502".into()));
        }
        Ok(DeploymentReceipt {
            external_reference: format!("mint-{}-{n}", artifact.ticker),
            transaction: format!("sig-{n}"),
            auth_key_material: Some("auth".into()),
        })
    }
}

#[derive(Default)]
struct FakeSettler {
    calls: AtomicUsize,
}

#[async_trait]
impl SettlementSink for FakeSettler {
    async fn settle(
        &self,
        claim: &PendingClaim,
        _wallet: &WalletContext,
    ) -> Result<SettlementReceipt, OracleError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(SettlementReceipt {
            transaction: format!("settled-{}", claim.external_reference),
        })
    }
}

struct FixedBalance(f64);

#[async_trait]
impl BalanceQuery for FixedBalance {
    async fn balance(&self, _account: &str) -> Result<f64, OracleError> {
        Ok(self.0)
    }
}

fn trending() -> Vec<Candidate> {
    vec![
        Candidate::new("Pepe", 1, "memes", "500K"),
        Candidate::new("Doge", 2, "memes", "500K"),
        Candidate::new("Wojak", 3, "memes", "500K"),
    ]
}

struct Harness {
    db: Database,
    deployer: Arc<FakeDeployer>,
    settler: Arc<FakeSettler>,
}

impl Harness {
    fn new(deployer: FakeDeployer) -> Self {
        Self {
            db: Database::open_in_memory().unwrap(),
            deployer: Arc::new(deployer),
            settler: Arc::new(FakeSettler::default()),
        }
    }

    fn collaborators(&self, delay: Duration, balance: f64) -> Collaborators {
        Collaborators {
            source: Arc::new(FixedSource {
                candidates: trending(),
                delay,
            }),
            assets: Arc::new(NoAssets),
            deployer: Some(self.deployer.clone()),
            settler: Some(self.settler.clone()),
            balances: Arc::new(FixedBalance(balance)),
        }
    }

    fn controller(&self) -> ReplicationController {
        ReplicationController::new(
            ReplicaRegistry::new(self.db.clone()),
            None,
            Arc::new(MoltbookRegistrar::new(None, None).unwrap()),
            ExpansionConfig::default(),
        )
    }

    fn scheduler(&self, config: SchedulerConfig, expansion: bool) -> CycleScheduler {
        self.scheduler_with(config, expansion, Duration::ZERO, 0.0)
    }

    fn scheduler_with(
        &self,
        config: SchedulerConfig,
        expansion: bool,
        delay: Duration,
        balance: f64,
    ) -> CycleScheduler {
        let controller = expansion.then(|| self.controller());
        CycleScheduler::new(
            self.db.clone(),
            self.collaborators(delay, balance),
            WalletContext::new("wallet-1"),
            controller,
            config,
        )
        .unwrap()
    }
}

fn live(max: usize) -> SchedulerConfig {
    SchedulerConfig {
        max_deploys_per_cycle: max,
        dry_run: false,
        call_timeout: Duration::from_secs(5),
        ..SchedulerConfig::default()
    }
}

#[tokio::test]
async fn test_overlapping_ticks_create_one_replica() {
    let harness = Harness::new(FakeDeployer::default());
    let scheduler = harness.scheduler_with(
        SchedulerConfig::default(),
        true,
        Duration::from_millis(50),
        1.0,
    );

    let (first, second) = tokio::join!(scheduler.tick(), scheduler.tick());

    let reports: Vec<_> = [first, second].into_iter().flatten().collect();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].replica, Some(1));
    assert_eq!(scheduler.skipped_ticks(), 1);
    assert_eq!(ReplicaRegistry::new(harness.db.clone()).count().unwrap(), 1);
}

#[tokio::test]
async fn test_deploys_at_most_max_per_cycle() {
    let harness = Harness::new(FakeDeployer::default());
    let scheduler = harness.scheduler(live(2), false);

    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.candidates, 3);
    assert_eq!(report.selected, 2);
    assert_eq!(report.deployed, 2);
    assert_eq!(report.claims_registered, 2);
    assert_eq!(harness.deployer.calls.load(Ordering::SeqCst), 2);
    assert!(scheduler.store().is_deployed("pepe").unwrap());
    assert!(scheduler.store().is_deployed("doge").unwrap());
    assert!(!scheduler.store().is_deployed("wojak").unwrap());

    // Next cycle harvests the two new claims and deploys the remaining topic.
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.claims.attempted, 2);
    assert_eq!(report.claims.claimed, 2);
    assert_eq!(report.deployed, 1);
    assert_eq!(report.tickers, vec!["WOJAK".to_string()]);
    assert_eq!(harness.settler.calls.load(Ordering::SeqCst), 2);

    // Nothing left to deploy.
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.selected, 0);
    assert_eq!(report.claims.attempted, 1);
    assert_eq!(harness.deployer.calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_dry_run_never_marks_deployed() {
    let harness = Harness::new(FakeDeployer::default());
    let scheduler = harness.scheduler(SchedulerConfig::default(), false);
    assert!(scheduler.is_dry_run());

    // Preview tickers go back to the pool, so every cycle reuses the code.
    for _ in 0..3 {
        let report = scheduler.tick().await.unwrap();
        assert_eq!(report.previews, 1);
        assert_eq!(report.deployed, 0);
        assert_eq!(report.tickers, vec!["PEPE".to_string()]);
    }
    assert_eq!(harness.deployer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.store().count().unwrap(), 0);
    assert!(scheduler.ledger().load_all().unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_deploy_is_not_marked() {
    let harness = Harness::new(FakeDeployer {
        fail: true,
        ..FakeDeployer::default()
    });
    let scheduler = harness.scheduler(live(1), false);

    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.deploy_failures, 1);
    assert_eq!(report.deployed, 0);
    assert!(report.aborted.is_none());
    assert!(!scheduler.store().is_deployed("pepe").unwrap());

    // The same topic is selected again next cycle, under the same code.
    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.deploy_failures, 1);
    assert_eq!(report.tickers, vec!["PEPE".to_string()]);
    assert_eq!(harness.deployer.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_storage_failure_returns_partial_report() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("oracle.db");
    let db = Database::open(&path).unwrap();
    let harness = Harness {
        db,
        deployer: Arc::new(FakeDeployer::default()),
        settler: Arc::new(FakeSettler::default()),
    };
    let scheduler = harness.scheduler(live(1), false);

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch("DROP TABLE deployed_topics").unwrap();

    let report = scheduler.tick().await.unwrap();
    assert_eq!(report.candidates, 3);
    assert!(report.aborted.is_some());
    assert_eq!(report.deployed, 0);
    assert!(report.finished_at.is_some());
    assert_eq!(harness.deployer.calls.load(Ordering::SeqCst), 0);
    assert_eq!(scheduler.last_report().map(|r| r.cycle), Some(1));
}

#[tokio::test]
async fn test_expansion_below_threshold_creates_nothing() {
    let harness = Harness::new(FakeDeployer::default());
    let scheduler = harness.scheduler_with(SchedulerConfig::default(), true, Duration::ZERO, 0.1);

    let report = scheduler.tick().await.unwrap();
    assert!(report.replica.is_none());
    assert_eq!(ReplicaRegistry::new(harness.db.clone()).count().unwrap(), 0);
}

#[tokio::test]
async fn test_continuous_mode_stops_cleanly() {
    let harness = Harness::new(FakeDeployer::default());
    let scheduler = Arc::new(harness.scheduler(SchedulerConfig::default(), false));
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let runner = tokio::spawn(Arc::clone(&scheduler).run_continuous(Duration::from_secs(3600), stop_rx));
    tokio::time::sleep(Duration::from_millis(100)).await;
    stop_tx.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(scheduler.last_report().map(|r| r.cycle), Some(1));
}

#[tokio::test]
async fn test_stop_lets_in_flight_cycle_finish() {
    let harness = Harness::new(FakeDeployer::default());
    let scheduler = Arc::new(harness.scheduler_with(
        SchedulerConfig::default(),
        false,
        Duration::from_millis(300),
        0.0,
    ));
    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);

    let runner = tokio::spawn(Arc::clone(&scheduler).run_continuous(Duration::from_secs(3600), stop_rx));
    // First tick is still waiting on the slow source.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(scheduler.last_report().is_none());
    stop_tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), runner)
        .await
        .unwrap()
        .unwrap();

    let report = scheduler.last_report().unwrap();
    assert_eq!(report.cycle, 1);
    assert!(report.aborted.is_none());
    assert_eq!(report.previews, 1);
}

#[tokio::test]
async fn test_expand_only_runs_check_without_cycle() {
    let harness = Harness::new(FakeDeployer::default());
    let scheduler = harness.scheduler_with(SchedulerConfig::default(), true, Duration::ZERO, 1.0);

    let replica = scheduler.expand_only("wallet-1").await.unwrap().unwrap();
    assert_eq!(replica.sequence_number, 1);
    assert!(scheduler.last_report().is_none());
    assert_eq!(harness.deployer.calls.load(Ordering::SeqCst), 0);

    let disabled = harness.scheduler(SchedulerConfig::default(), false);
    assert!(disabled.expand_only("wallet-1").await.is_err());
}
