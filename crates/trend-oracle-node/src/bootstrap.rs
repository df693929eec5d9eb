//! Wire the HTTP collaborators into a scheduler from [`NodeConfig`].

use std::sync::Arc;

use oracle::{
    BalanceQuery, Database, DeploymentSink, OracleError, ReplicaRegistry, SettlementSink,
    WalletContext,
};
use oracle_agent::{
    ConwayClient, ExpansionConfig, InfraProvisioner, MoltbookRegistrar, ReplicationController,
};
use oracle_feeds::{
    HttpAssetFetcher, HttpDeploymentSink, HttpSettlementSink, RpcBalanceQuery, SourceChain,
};

use crate::config::NodeConfig;
use crate::scheduler::{Collaborators, CycleScheduler, SchedulerConfig};

fn wallet(config: &NodeConfig) -> WalletContext {
    let wallet = WalletContext::new(config.wallet_address.clone().unwrap_or_default());
    match &config.wallet_private_key {
        Some(key) => wallet.with_signing_key(key.clone()),
        None => wallet,
    }
}

/// Replication controller, or `None` when expansion is disabled.
///
/// Without Conway credentials the controller runs in preview mode.
pub fn build_controller(
    config: &NodeConfig,
    db: &Database,
) -> Result<Option<ReplicationController>, OracleError> {
    if !config.enable_expansion {
        return Ok(None);
    }

    let provisioner: Option<Arc<dyn InfraProvisioner>> = match &config.conway_api_key {
        Some(key) => Some(Arc::new(ConwayClient::new(
            key.clone(),
            config.conway_api_url.clone(),
            config.call_timeout,
        )?)),
        None => None,
    };
    let directory = Arc::new(MoltbookRegistrar::new(config.moltbook_api_key.clone(), None)?);

    Ok(Some(ReplicationController::new(
        ReplicaRegistry::new(db.clone()),
        provisioner,
        directory,
        ExpansionConfig {
            threshold: config.expansion_threshold,
            call_timeout: config.call_timeout,
        },
    )))
}

/// Open the database and build a scheduler over the live HTTP services.
pub fn build_scheduler(config: &NodeConfig) -> Result<CycleScheduler, OracleError> {
    let db = Database::open(&config.db_path)?;
    tracing::info!(path = %config.db_path, "Database initialized");

    let wallet = wallet(config);
    let timeout = config.call_timeout;

    let deployer: Option<Arc<dyn DeploymentSink>> = match &config.deploy_api_url {
        Some(url) => Some(Arc::new(HttpDeploymentSink::new(
            url.clone(),
            wallet.clone(),
            config.initial_buy_sol,
            timeout,
        )?)),
        None => None,
    };
    let settler: Option<Arc<dyn SettlementSink>> = match &config.settle_api_url {
        Some(url) => Some(Arc::new(HttpSettlementSink::new(url.clone(), timeout)?)),
        None => None,
    };
    let balances: Arc<dyn BalanceQuery> =
        Arc::new(RpcBalanceQuery::new(Some(config.rpc_url.clone()), timeout)?);

    let collaborators = Collaborators {
        source: Arc::new(SourceChain::default_chain(timeout)?),
        assets: Arc::new(HttpAssetFetcher::new(config.asset_search_url.clone())?),
        deployer,
        settler,
        balances,
    };

    let controller = build_controller(config, &db)?;

    CycleScheduler::new(
        db,
        collaborators,
        wallet,
        controller,
        SchedulerConfig {
            min_score: config.min_trend_score,
            max_deploys_per_cycle: config.max_deploys_per_run,
            dry_run: config.dry_run,
            call_timeout: timeout,
        },
    )
}
