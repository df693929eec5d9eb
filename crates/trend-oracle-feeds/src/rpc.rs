//! Wallet balance over JSON-RPC.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use oracle::{BalanceQuery, OracleError};

use crate::error::FeedError;

pub const DEFAULT_RPC_URL: &str = "https://api.mainnet-beta.solana.com";
const LAMPORTS_PER_UNIT: f64 = 1_000_000_000.0;

pub struct RpcBalanceQuery {
    http: reqwest::Client,
    rpc_url: String,
}

impl RpcBalanceQuery {
    pub fn new(rpc_url: Option<String>, timeout: Duration) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| OracleError::ConfigurationMissing(format!("http client: {e}")))?;
        Ok(Self {
            http,
            rpc_url: rpc_url.unwrap_or_else(|| DEFAULT_RPC_URL.to_string()),
        })
    }

    async fn call(&self, account: &str) -> Result<Value, FeedError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "getBalance",
            "params": [account],
        });
        let resp = self.http.post(&self.rpc_url).json(&body).send().await?;
        let resp = FeedError::check(resp).await?;
        Ok(resp.json().await?)
    }
}

/// Balance in whole units from a `getBalance` response.
pub fn parse_balance(response: &Value) -> Result<f64, FeedError> {
    if let Some(err) = response.get("error") {
        return Err(FeedError::Parse(format!("rpc error: {err}")));
    }
    response
        .pointer("/result/value")
        .and_then(Value::as_u64)
        .map(|lamports| lamports as f64 / LAMPORTS_PER_UNIT)
        .ok_or_else(|| FeedError::Parse("missing result.value".into()))
}

#[async_trait]
impl BalanceQuery for RpcBalanceQuery {
    async fn balance(&self, account: &str) -> Result<f64, OracleError> {
        let response = self.call(account).await?;
        let balance = parse_balance(&response)?;
        tracing::debug!(account, balance, "Fetched balance");
        Ok(balance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_balance() {
        let resp = json!({"jsonrpc": "2.0", "result": {"context": {"slot": 1}, "value": 1_500_000_000u64}, "id": 1});
        assert!((parse_balance(&resp).unwrap() - 1.5).abs() < f64::EPSILON);

        let zero = json!({"result": {"value": 0}});
        assert_eq!(parse_balance(&zero).unwrap(), 0.0);
    }

    #[test]
    fn test_parse_balance_errors() {
        let err = json!({"error": {"code": -32602, "message": "Invalid param"}});
        assert!(matches!(parse_balance(&err), Err(FeedError::Parse(_))));
        assert!(parse_balance(&json!({"result": {}})).is_err());
    }
}
