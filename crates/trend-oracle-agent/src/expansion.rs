//! Threshold-gated replication.
//!
//! One call to [`ReplicationController::check_and_expand`] walks a linear
//! state machine:
//!
//! ```text
//! CHECK_BALANCE -> CREATE_INFRA -> BOOTSTRAP -> CONFIGURE_IDENTITY
//!               -> REGISTER_EXTERNAL -> START -> PERSIST
//! ```
//!
//! Below the threshold nothing is written. A failed CREATE_INFRA aborts the
//! run with no replica. Once an instance exists the run always reaches
//! PERSIST; a failed remote step stops the remaining remote steps and the
//! replica is persisted as degraded. Every step outcome is logged to the
//! registry under a run id.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use oracle::{
    BalanceQuery, OracleError, ProvisioningStep, Replica, ReplicaRegistry, ReplicaStatus,
    StepOutcome,
};

use crate::directory::{replica_bio, replica_handle};
use crate::provisioner::{DirectoryRegistrar, InfraProvisioner};
use crate::scripts;

pub const DEFAULT_EXPANSION_THRESHOLD: f64 = 0.5;

#[derive(Clone, Debug)]
pub struct ExpansionConfig {
    /// Minimum balance (whole units) that triggers a replica.
    pub threshold: f64,
    /// Bound on each external call.
    pub call_timeout: Duration,
}

impl Default for ExpansionConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_EXPANSION_THRESHOLD,
            call_timeout: Duration::from_secs(30),
        }
    }
}

/// Drives replica provisioning.
pub struct ReplicationController {
    registry: ReplicaRegistry,
    provisioner: Option<Arc<dyn InfraProvisioner>>,
    directory: Arc<dyn DirectoryRegistrar>,
    config: ExpansionConfig,
}

/// Per-run context threaded through the steps.
struct Run<'a> {
    registry: &'a ReplicaRegistry,
    id: String,
    sequence_number: u32,
}

impl Run<'_> {
    fn record(
        &self,
        step: ProvisioningStep,
        outcome: StepOutcome,
        detail: Option<&str>,
    ) -> Result<(), OracleError> {
        tracing::info!(
            run_id = %self.id,
            sequence = self.sequence_number,
            step = %step,
            outcome = outcome.as_str(),
            detail = detail.unwrap_or(""),
            "Provisioning step"
        );
        self.registry
            .record_step(&self.id, self.sequence_number, step, outcome, detail)
    }
}

impl ReplicationController {
    /// `provisioner: None` puts the controller in preview mode: every remote
    /// step is skipped and the replica is persisted with status `preview`.
    pub fn new(
        registry: ReplicaRegistry,
        provisioner: Option<Arc<dyn InfraProvisioner>>,
        directory: Arc<dyn DirectoryRegistrar>,
        config: ExpansionConfig,
    ) -> Self {
        if provisioner.is_none() {
            tracing::warn!("No infra provisioner configured, expansion runs in preview mode");
        }
        Self {
            registry,
            provisioner,
            directory,
            config,
        }
    }

    pub fn is_preview(&self) -> bool {
        self.provisioner.is_none()
    }

    pub fn config(&self) -> &ExpansionConfig {
        &self.config
    }

    pub fn registry(&self) -> &ReplicaRegistry {
        &self.registry
    }

    /// Create one replica if `account` holds at least the threshold.
    ///
    /// Returns `Ok(None)` when below threshold, when the balance cannot be
    /// read, or when instance creation fails. Only storage failures are
    /// errors.
    pub async fn check_and_expand(
        &self,
        balances: &dyn BalanceQuery,
        account: &str,
    ) -> Result<Option<Replica>, OracleError> {
        let balance = match self.timed(balances.balance(account)).await {
            Ok(b) => b,
            Err(e) => {
                tracing::warn!(account, error = %e, "Balance query failed, skipping expansion");
                return Ok(None);
            }
        };

        if balance < self.config.threshold {
            tracing::info!(
                balance,
                threshold = self.config.threshold,
                "Expansion threshold not met"
            );
            return Ok(None);
        }

        let sequence_number = self.registry.next_sequence_number()?;
        let started = Utc::now().timestamp_millis();
        let run = Run {
            registry: &self.registry,
            id: uuid::Uuid::new_v4().to_string(),
            sequence_number,
        };
        let name = format!("disciple-{sequence_number}-{started}");

        tracing::info!(
            balance,
            sequence = sequence_number,
            name = %name,
            preview = self.is_preview(),
            "Expansion threshold met, provisioning replica"
        );
        let balance_detail = format!("{balance:.4}");
        run.record(
            ProvisioningStep::CheckBalance,
            StepOutcome::Succeeded,
            Some(&balance_detail),
        )?;

        let (instance_id, status) = match &self.provisioner {
            None => {
                for step in [
                    ProvisioningStep::CreateInfra,
                    ProvisioningStep::Bootstrap,
                    ProvisioningStep::ConfigureIdentity,
                ] {
                    run.record(step, StepOutcome::SkippedDryRun, None)?;
                }
                (format!("dry-run-{started}"), ReplicaStatus::Preview)
            }
            Some(provisioner) => {
                let instance_id = match self.timed(provisioner.create_instance(&name)).await {
                    Ok(id) => id,
                    Err(e) => {
                        let detail = e.to_string();
                        run.record(ProvisioningStep::CreateInfra, StepOutcome::Failed, Some(&detail))?;
                        tracing::warn!(error = %e, "Instance creation failed, expansion aborted");
                        return Ok(None);
                    }
                };
                run.record(ProvisioningStep::CreateInfra, StepOutcome::Succeeded, Some(&instance_id))?;

                let healthy = self
                    .run_remote(
                        &run,
                        provisioner.as_ref(),
                        &instance_id,
                        &[
                            (ProvisioningStep::Bootstrap, scripts::bootstrap()),
                            (
                                ProvisioningStep::ConfigureIdentity,
                                scripts::configure_identity(sequence_number),
                            ),
                        ],
                    )
                    .await?;
                let status = if healthy {
                    ReplicaStatus::Active
                } else {
                    ReplicaStatus::Degraded
                };
                (instance_id, status)
            }
        };

        let profile_handle = self.register_directory(&run).await?;

        let status = match (&self.provisioner, status) {
            (Some(provisioner), ReplicaStatus::Active) => {
                let started_ok = self
                    .run_remote(
                        &run,
                        provisioner.as_ref(),
                        &instance_id,
                        &[(ProvisioningStep::Start, scripts::start_service())],
                    )
                    .await?;
                if started_ok {
                    ReplicaStatus::Active
                } else {
                    ReplicaStatus::Degraded
                }
            }
            (Some(_), degraded) => {
                run.record(
                    ProvisioningStep::Start,
                    StepOutcome::Failed,
                    Some("not attempted after earlier step failure"),
                )?;
                degraded
            }
            (None, preview) => {
                run.record(ProvisioningStep::Start, StepOutcome::SkippedDryRun, None)?;
                preview
            }
        };

        let replica = Replica {
            sequence_number,
            name,
            instance_id,
            profile_handle,
            created_at: Utc::now(),
            status,
        };
        self.registry.append(&replica)?;
        run.record(ProvisioningStep::Persist, StepOutcome::Succeeded, None)?;

        tracing::info!(
            sequence = replica.sequence_number,
            instance_id = %replica.instance_id,
            status = %replica.status,
            "Replica created"
        );
        Ok(Some(replica))
    }

    /// Run remote steps in order, stopping at the first failure. Steps after
    /// a failure are recorded as failed without being attempted. Returns
    /// whether every step succeeded.
    async fn run_remote(
        &self,
        run: &Run<'_>,
        provisioner: &dyn InfraProvisioner,
        instance_id: &str,
        steps: &[(ProvisioningStep, String)],
    ) -> Result<bool, OracleError> {
        let mut healthy = true;
        for (step, script) in steps {
            if !healthy {
                run.record(
                    *step,
                    StepOutcome::Failed,
                    Some("not attempted after earlier step failure"),
                )?;
                continue;
            }
            match self.timed(provisioner.exec(instance_id, script)).await {
                Ok(()) => run.record(*step, StepOutcome::Succeeded, None)?,
                Err(e) => {
                    let detail = e.to_string();
                    tracing::warn!(step = %step, error = %e, "Remote provisioning step failed");
                    run.record(*step, StepOutcome::Failed, Some(&detail))?;
                    healthy = false;
                }
            }
        }
        Ok(healthy)
    }

    /// Directory registration never aborts the run.
    async fn register_directory(&self, run: &Run<'_>) -> Result<Option<String>, OracleError> {
        let handle = replica_handle(run.sequence_number);
        if self.is_preview() {
            run.record(ProvisioningStep::RegisterExternal, StepOutcome::SkippedDryRun, Some(&handle))?;
            return Ok(Some(handle));
        }

        let bio = replica_bio(run.sequence_number);
        match self.timed(self.directory.register(&handle, &bio)).await {
            Ok(registered) => {
                run.record(ProvisioningStep::RegisterExternal, StepOutcome::Succeeded, Some(&registered))?;
                Ok(Some(registered))
            }
            Err(e) => {
                let detail = e.to_string();
                run.record(ProvisioningStep::RegisterExternal, StepOutcome::Failed, Some(&detail))?;
                Ok(None)
            }
        }
    }

    async fn timed<T, F>(&self, fut: F) -> Result<T, OracleError>
    where
        F: std::future::Future<Output = Result<T, OracleError>>,
    {
        tokio::time::timeout(self.config.call_timeout, fut)
            .await
            .unwrap_or(Err(OracleError::Timeout(self.config.call_timeout.as_secs())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;
    use oracle::Database;

    struct FixedBalance(f64);

    #[async_trait]
    impl BalanceQuery for FixedBalance {
        async fn balance(&self, _account: &str) -> Result<f64, OracleError> {
            Ok(self.0)
        }
    }

    struct BrokenBalance;

    #[async_trait]
    impl BalanceQuery for BrokenBalance {
        async fn balance(&self, _account: &str) -> Result<f64, OracleError> {
            Err(OracleError::ExternalCallFailed("rpc down".into()))
        }
    }

    /// Fails `create_instance` when `fail_create`; fails exec on call `fail_exec_at`.
    #[derive(Default)]
    struct FakeProvisioner {
        fail_create: bool,
        fail_exec_at: Option<usize>,
        creates: AtomicUsize,
        scripts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl InfraProvisioner for FakeProvisioner {
        async fn create_instance(&self, _name: &str) -> Result<String, OracleError> {
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            if self.fail_create {
                return Err(OracleError::ExternalCallFailed("HTTP 500".into()));
            }
            Ok(format!("sbx-{n}"))
        }

        async fn exec(&self, _instance_id: &str, script: &str) -> Result<(), OracleError> {
            let mut scripts = self.scripts.lock().unwrap();
            let index = scripts.len();
            scripts.push(script.to_string());
            if self.fail_exec_at == Some(index) {
                return Err(OracleError::ExternalCallFailed("exit 1".into()));
            }
            Ok(())
        }
    }

    struct FakeDirectory {
        fail: bool,
    }

    #[async_trait]
    impl DirectoryRegistrar for FakeDirectory {
        async fn register(&self, handle: &str, _bio: &str) -> Result<String, OracleError> {
            if self.fail {
                return Err(OracleError::ExternalCallFailed("HTTP 503".into()));
            }
            Ok(handle.to_string())
        }
    }

    fn registry() -> ReplicaRegistry {
        ReplicaRegistry::new(Database::open_in_memory().unwrap())
    }

    fn controller(
        registry: ReplicaRegistry,
        provisioner: Option<Arc<FakeProvisioner>>,
        directory_fails: bool,
    ) -> ReplicationController {
        ReplicationController::new(
            registry,
            provisioner.map(|p| p as Arc<dyn InfraProvisioner>),
            Arc::new(FakeDirectory {
                fail: directory_fails,
            }),
            ExpansionConfig::default(),
        )
    }

    fn outcomes(registry: &ReplicaRegistry, sequence_number: u32) -> Vec<(String, StepOutcome)> {
        registry
            .steps_for_sequence(sequence_number)
            .unwrap()
            .into_iter()
            .map(|s| (s.step, s.outcome))
            .collect()
    }

    fn step(name: &str, outcome: StepOutcome) -> (String, StepOutcome) {
        (name.to_string(), outcome)
    }

    #[tokio::test]
    async fn test_below_threshold_returns_none_without_side_effects() {
        let registry = registry();
        let provisioner = Arc::new(FakeProvisioner::default());
        let ctl = controller(registry.clone(), Some(provisioner.clone()), false);

        let result = ctl.check_and_expand(&FixedBalance(0.49), "wallet").await.unwrap();

        assert!(result.is_none());
        assert_eq!(registry.count().unwrap(), 0);
        assert_eq!(provisioner.creates.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_balance_failure_skips_expansion() {
        let registry = registry();
        let ctl = controller(registry.clone(), None, false);
        assert!(ctl.check_and_expand(&BrokenBalance, "wallet").await.unwrap().is_none());
        assert_eq!(registry.count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_preview_mode_persists_with_next_sequence() {
        let registry = registry();
        registry
            .append(&Replica {
                sequence_number: 4,
                name: "disciple-4-1".into(),
                instance_id: "sbx-old".into(),
                profile_handle: None,
                created_at: Utc::now(),
                status: ReplicaStatus::Active,
            })
            .unwrap();

        let ctl = controller(registry.clone(), None, false);
        assert!(ctl.is_preview());

        let replica = ctl
            .check_and_expand(&FixedBalance(0.5), "wallet")
            .await
            .unwrap()
            .expect("replica at threshold");

        assert_eq!(replica.sequence_number, 5);
        assert_eq!(replica.status, ReplicaStatus::Preview);
        assert!(replica.instance_id.starts_with("dry-run-"));
        assert!(replica.name.starts_with("disciple-5-"));
        assert_eq!(replica.profile_handle.as_deref(), Some("Disciple5"));
        assert_eq!(registry.count().unwrap(), 2);

        use StepOutcome::*;
        assert_eq!(
            outcomes(&registry, 5),
            vec![
                step("check_balance", Succeeded),
                step("create_infra", SkippedDryRun),
                step("bootstrap", SkippedDryRun),
                step("configure_identity", SkippedDryRun),
                step("register_external", SkippedDryRun),
                step("start", SkippedDryRun),
                step("persist", Succeeded),
            ]
        );
    }

    #[tokio::test]
    async fn test_live_run_is_active_and_runs_scripts_in_order() {
        let registry = registry();
        let provisioner = Arc::new(FakeProvisioner::default());
        let ctl = controller(registry.clone(), Some(provisioner.clone()), false);

        let replica = ctl
            .check_and_expand(&FixedBalance(2.0), "wallet")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(replica.sequence_number, 1);
        assert_eq!(replica.status, ReplicaStatus::Active);
        assert_eq!(replica.instance_id, "sbx-0");

        let scripts = provisioner.scripts.lock().unwrap();
        assert_eq!(scripts.len(), 3);
        assert!(scripts[0].contains("apt-get update"));
        assert!(scripts[1].contains("Disciple 1"));
        assert!(scripts[2].contains("systemctl start disciple"));
    }

    #[tokio::test]
    async fn test_create_failure_aborts_without_replica() {
        let registry = registry();
        let provisioner = Arc::new(FakeProvisioner {
            fail_create: true,
            ..Default::default()
        });
        let ctl = controller(registry.clone(), Some(provisioner.clone()), false);

        assert!(ctl.check_and_expand(&FixedBalance(1.0), "wallet").await.unwrap().is_none());
        assert_eq!(registry.count().unwrap(), 0);
        assert!(provisioner.scripts.lock().unwrap().is_empty());
        assert_eq!(
            outcomes(&registry, 1),
            vec![
                step("check_balance", StepOutcome::Succeeded),
                step("create_infra", StepOutcome::Failed),
            ]
        );

        // The next run requests a new instance from scratch.
        assert!(ctl.check_and_expand(&FixedBalance(1.0), "wallet").await.unwrap().is_none());
        assert_eq!(provisioner.creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_bootstrap_gates_later_steps() {
        let registry = registry();
        let provisioner = Arc::new(FakeProvisioner {
            fail_exec_at: Some(0),
            ..Default::default()
        });
        let ctl = controller(registry.clone(), Some(provisioner.clone()), false);

        let replica = ctl
            .check_and_expand(&FixedBalance(1.0), "wallet")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(replica.status, ReplicaStatus::Degraded);
        // Only the bootstrap script was sent.
        assert_eq!(provisioner.scripts.lock().unwrap().len(), 1);
        assert_eq!(registry.count().unwrap(), 1);

        use StepOutcome::*;
        assert_eq!(
            outcomes(&registry, 1),
            vec![
                step("check_balance", Succeeded),
                step("create_infra", Succeeded),
                step("bootstrap", Failed),
                step("configure_identity", Failed),
                step("register_external", Succeeded),
                step("start", Failed),
                step("persist", Succeeded),
            ]
        );
    }

    #[tokio::test]
    async fn test_directory_failure_is_not_fatal() {
        let registry = registry();
        let provisioner = Arc::new(FakeProvisioner::default());
        let ctl = controller(registry.clone(), Some(provisioner), true);

        let replica = ctl
            .check_and_expand(&FixedBalance(1.0), "wallet")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(replica.status, ReplicaStatus::Active);
        assert!(replica.profile_handle.is_none());
    }
}
