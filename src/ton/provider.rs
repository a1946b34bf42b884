// ton/provider.rs
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use serde_json::{json, Value};

use crate::error::EscrowError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Uninitialized,
    Active,
    Frozen,
}

#[derive(Debug, Clone, Copy)]
pub struct AccountState {
    pub status: AccountStatus,
    pub balance_nano: i64,
}

/// Message handed to the chain endpoint for broadcast. `state_init` is only
/// present on contract deployments.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    pub destination: String,
    pub amount_nano: i64,
    pub payload: Vec<u8>,
    pub state_init: Option<Vec<u8>>,
}

/// Chain access seam. The engine never talks to an endpoint directly, which
/// keeps every lifecycle path testable against [`MockProvider`].
#[async_trait]
pub trait TonProvider: Send + Sync {
    async fn account_state(&self, address: &str) -> Result<AccountState, EscrowError>;
    /// Broadcasts a message and returns the transaction reference.
    async fn broadcast(&self, message: &OutboundMessage) -> Result<String, EscrowError>;
}

/// Toncenter JSON-RPC client.
pub struct HttpProvider {
    http: reqwest::Client,
    url: String,
    api_key: Option<String>,
}

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

impl HttpProvider {
    pub fn new(url: String, api_key: Option<String>) -> Self {
        HttpProvider {
            http: reqwest::Client::new(),
            url,
            api_key,
        }
    }

    async fn call(&self, method: &str, params: Value) -> Result<Value, EscrowError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });

        let mut request = self
            .http
            .post(&self.url)
            .timeout(REQUEST_TIMEOUT)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response: Value = request
            .send()
            .await
            .map_err(|e| EscrowError::ChainUnavailable(e.to_string()))?
            .json()
            .await
            .map_err(|e| EscrowError::ChainUnavailable(e.to_string()))?;

        if let Some(error) = response.get("error") {
            return Err(EscrowError::ChainUnavailable(error.to_string()));
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| EscrowError::ChainUnavailable(format!("{method}: empty response")))
    }
}

fn parse_balance(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::String(s)) => s.parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_i64().unwrap_or(0),
        _ => 0,
    }
}

#[async_trait]
impl TonProvider for HttpProvider {
    async fn account_state(&self, address: &str) -> Result<AccountState, EscrowError> {
        let result = self
            .call("getAddressInformation", json!({ "address": address }))
            .await?;

        let status = match result.get("state").and_then(Value::as_str) {
            Some("active") => AccountStatus::Active,
            Some("frozen") => AccountStatus::Frozen,
            _ => AccountStatus::Uninitialized,
        };
        Ok(AccountState {
            status,
            balance_nano: parse_balance(result.get("balance")),
        })
    }

    async fn broadcast(&self, message: &OutboundMessage) -> Result<String, EscrowError> {
        let mut boc = Vec::new();
        if let Some(state_init) = &message.state_init {
            boc.extend_from_slice(state_init);
        }
        boc.extend_from_slice(&message.payload);
        let encoded = base64::engine::general_purpose::STANDARD.encode(&boc);

        let result = self
            .call("sendBocReturnHash", json!({ "boc": encoded }))
            .await?;
        result
            .get("hash")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| EscrowError::ChainUnavailable("broadcast returned no hash".to_string()))
    }
}

#[cfg(test)]
pub use mock::MockProvider;
