use std::env;
use std::time::Duration;

use url::Url;

use oracle::DEFAULT_MIN_SCORE;
use oracle_agent::expansion::DEFAULT_EXPANSION_THRESHOLD;
use oracle_feeds::rpc::DEFAULT_RPC_URL;

const DEFAULT_DB_PATH: &str = "./data/oracle.db";
const DEFAULT_CHECK_INTERVAL_MS: u64 = 20 * 60 * 1000;
const DEFAULT_MAX_DEPLOYS_PER_RUN: usize = 1;
const DEFAULT_INITIAL_BUY_SOL: f64 = 0.1;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;
/// Initial buys below this rarely cover fees.
const MIN_SENSIBLE_INITIAL_BUY: f64 = 0.05;

#[derive(Clone)]
pub struct NodeConfig {
    /// SQLite database path
    pub db_path: String,
    /// Time between cycle ticks in continuous mode
    pub check_interval: Duration,
    /// Generate and preview only; nothing is deployed
    pub dry_run: bool,
    pub min_trend_score: f64,
    pub max_deploys_per_run: usize,
    pub enable_expansion: bool,
    /// Balance (whole units) that triggers a replica
    pub expansion_threshold: f64,
    pub wallet_address: Option<String>,
    pub wallet_private_key: Option<String>,
    pub rpc_url: String,
    pub deploy_api_url: Option<String>,
    pub settle_api_url: Option<String>,
    pub initial_buy_sol: f64,
    pub conway_api_key: Option<String>,
    pub conway_api_url: Option<String>,
    pub moltbook_api_key: Option<String>,
    pub asset_search_url: Option<String>,
    /// Bound on every external call
    pub call_timeout: Duration,
    /// Status server port (None = no server)
    pub port: Option<u16>,
}

impl std::fmt::Debug for NodeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeConfig")
            .field("db_path", &self.db_path)
            .field("check_interval", &self.check_interval)
            .field("dry_run", &self.dry_run)
            .field("min_trend_score", &self.min_trend_score)
            .field("max_deploys_per_run", &self.max_deploys_per_run)
            .field("enable_expansion", &self.enable_expansion)
            .field("expansion_threshold", &self.expansion_threshold)
            .field("wallet_address", &self.wallet_address)
            .field(
                "wallet_private_key",
                &self.wallet_private_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("rpc_url", &self.rpc_url)
            .field("deploy_api_url", &self.deploy_api_url)
            .field("settle_api_url", &self.settle_api_url)
            .field("initial_buy_sol", &self.initial_buy_sol)
            .field(
                "conway_api_key",
                &self.conway_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("conway_api_url", &self.conway_api_url)
            .field(
                "moltbook_api_key",
                &self.moltbook_api_key.as_ref().map(|_| "[REDACTED]"),
            )
            .field("asset_search_url", &self.asset_search_url)
            .field("call_timeout", &self.call_timeout)
            .field("port", &self.port)
            .finish()
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            check_interval: Duration::from_millis(DEFAULT_CHECK_INTERVAL_MS),
            dry_run: true,
            min_trend_score: DEFAULT_MIN_SCORE,
            max_deploys_per_run: DEFAULT_MAX_DEPLOYS_PER_RUN,
            enable_expansion: false,
            expansion_threshold: DEFAULT_EXPANSION_THRESHOLD,
            wallet_address: None,
            wallet_private_key: None,
            rpc_url: DEFAULT_RPC_URL.to_string(),
            deploy_api_url: None,
            settle_api_url: None,
            initial_buy_sol: DEFAULT_INITIAL_BUY_SOL,
            conway_api_key: None,
            conway_api_url: None,
            moltbook_api_key: None,
            asset_search_url: None,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
            port: None,
        }
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|s| !s.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError> {
    match optional(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidNumber { name, value: raw }),
        None => Ok(None),
    }
}

impl NodeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        // Dry run unless explicitly switched off
        let dry_run = env::var("DRY_RUN").map(|v| v != "false").unwrap_or(true);

        let enable_expansion = env::var("ENABLE_EXPANSION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false);

        let config = Self {
            db_path: optional("ORACLE_DB_PATH").unwrap_or(defaults.db_path),
            check_interval: parsed::<u64>("CHECK_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.check_interval),
            dry_run,
            min_trend_score: parsed("MIN_TREND_SCORE")?.unwrap_or(defaults.min_trend_score),
            max_deploys_per_run: parsed("MAX_DEPLOYS_PER_RUN")?
                .unwrap_or(defaults.max_deploys_per_run),
            enable_expansion,
            expansion_threshold: parsed("EXPANSION_THRESHOLD")?
                .unwrap_or(defaults.expansion_threshold),
            wallet_address: optional("WALLET_ADDRESS"),
            wallet_private_key: optional("WALLET_PRIVATE_KEY"),
            rpc_url: optional("SOLANA_RPC").unwrap_or(defaults.rpc_url),
            deploy_api_url: optional("DEPLOY_API_URL"),
            settle_api_url: optional("SETTLE_API_URL"),
            initial_buy_sol: parsed("INITIAL_BUY_SOL")?.unwrap_or(defaults.initial_buy_sol),
            conway_api_key: optional("CONWAY_API_KEY"),
            conway_api_url: optional("CONWAY_API_URL"),
            moltbook_api_key: optional("MOLTBOOK_API_KEY"),
            asset_search_url: optional("ASSET_SEARCH_URL"),
            call_timeout: parsed::<u64>("EXTERNAL_CALL_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.call_timeout),
            port: parsed("PORT")?,
        };

        // Validate URLs
        let urls = [
            Some(&config.rpc_url),
            config.deploy_api_url.as_ref(),
            config.settle_api_url.as_ref(),
            config.conway_api_url.as_ref(),
            config.asset_search_url.as_ref(),
        ];
        for url in urls.into_iter().flatten() {
            Url::parse(url).map_err(|_| ConfigError::InvalidUrl(url.clone()))?;
        }

        Ok(config)
    }

    /// Settings for an explicit expansion run: the check runs whatever
    /// `ENABLE_EXPANSION` says, in preview mode without Conway credentials.
    pub fn for_expand_only(mut self) -> Self {
        self.enable_expansion = true;
        self
    }

    /// Check the combination of settings.
    ///
    /// Returns warnings for degraded-but-valid setups; anything that would
    /// make a live run impossible is an error.
    pub fn validate(&self) -> Result<Vec<String>, ConfigError> {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if !self.dry_run {
            if self.wallet_private_key.is_none() {
                errors.push("WALLET_PRIVATE_KEY is required when DRY_RUN=false".to_string());
            }
            if self.deploy_api_url.is_none() {
                errors.push("DEPLOY_API_URL is required when DRY_RUN=false".to_string());
            }
        }

        if self.wallet_address.is_none() {
            warnings.push("WALLET_ADDRESS not set, balance and harvest calls use an empty account".to_string());
        }

        if self.enable_expansion && self.conway_api_key.is_none() {
            warnings.push("CONWAY_API_KEY not set, expansion runs in preview mode".to_string());
        }

        if self.initial_buy_sol < MIN_SENSIBLE_INITIAL_BUY {
            warnings.push(format!(
                "INITIAL_BUY_SOL={} is below {MIN_SENSIBLE_INITIAL_BUY}",
                self.initial_buy_sol
            ));
        }

        if self.max_deploys_per_run == 0 {
            warnings.push("MAX_DEPLOYS_PER_RUN=0, nothing will be deployed".to_string());
        }

        if errors.is_empty() {
            Ok(warnings)
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid number for {name}: {value}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_dry_run() {
        let config = NodeConfig::default();
        assert!(config.dry_run);
        assert_eq!(config.max_deploys_per_run, 1);
        assert_eq!(config.check_interval, Duration::from_secs(20 * 60));
        assert_eq!(config.min_trend_score, 50.0);
        assert!(config.port.is_none());
    }

    #[test]
    fn test_live_mode_requires_key_and_deploy_url() {
        let config = NodeConfig {
            dry_run: false,
            ..NodeConfig::default()
        };
        let err = config.validate().unwrap_err().to_string();
        assert!(err.contains("WALLET_PRIVATE_KEY"));
        assert!(err.contains("DEPLOY_API_URL"));

        let config = NodeConfig {
            dry_run: false,
            wallet_private_key: Some("key".into()),
            deploy_api_url: Some("http://localhost/deploy".into()),
            wallet_address: Some("wallet".into()),
            ..NodeConfig::default()
        };
        assert!(config.validate().unwrap().is_empty());
    }

    #[test]
    fn test_warnings() {
        let config = NodeConfig {
            enable_expansion: true,
            initial_buy_sol: 0.01,
            wallet_address: Some("wallet".into()),
            ..NodeConfig::default()
        };
        let warnings = config.validate().unwrap();
        assert_eq!(warnings.len(), 2);
        assert!(warnings[0].contains("preview mode"));
        assert!(warnings[1].contains("INITIAL_BUY_SOL"));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let config = NodeConfig {
            wallet_private_key: Some("super-secret".into()),
            conway_api_key: Some("conway-secret".into()),
            ..NodeConfig::default()
        };
        let debug = format!("{config:?}");
        assert!(!debug.contains("super-secret"));
        assert!(!debug.contains("conway-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
