use async_trait::async_trait;
use rand::{seq::SliceRandom, thread_rng};
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{pubkey::Pubkey, signature::Signature, transaction::VersionedTransaction};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::info;

use super::{encode_transaction, first_signature, SendError, TransactionSender};
use crate::types::JITO_TIP_ACCOUNTS;

const SENDER: &str = "jito";

/// 随机选一个 Jito 小费账户
pub fn random_tip_account() -> Pubkey {
    let mut rng = thread_rng();
    JITO_TIP_ACCOUNTS
        .choose(&mut rng)
        .copied()
        .unwrap_or(JITO_TIP_ACCOUNTS[0])
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// Jito block engine bundle 发送
pub struct JitoSender {
    client: Client,
    bundles_url: String,
    tip_lamports: u64,
    request_id: AtomicU64,
}

impl JitoSender {
    pub fn new(block_engine_url: &str, tip_lamports: u64) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            bundles_url: format!("{}/api/v1/bundles", block_engine_url.trim_end_matches('/')),
            tip_lamports,
            request_id: AtomicU64::new(1),
        }
    }

    fn bundle_body(&self, encoded: &str) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": self.request_id.fetch_add(1, Ordering::Relaxed),
            "method": "sendBundle",
            "params": [[encoded], {"encoding": "base64"}]
        })
    }
}

#[async_trait]
impl TransactionSender for JitoSender {
    fn name(&self) -> &'static str {
        SENDER
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SendError> {
        let signature = first_signature(tx)?;
        let body = self.bundle_body(&encode_transaction(tx)?);

        let response = self.client.post(&self.bundles_url).json(&body).send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SendError::from_status(SENDER, status, text));
        }

        let parsed: JsonRpcResponse =
            serde_json::from_str(&text).map_err(|e| SendError::SendFailure {
                sender: SENDER,
                status: Some(status.as_u16()),
                body: format!("{}: {}", e, text),
            })?;
        if let Some(error) = parsed.error {
            return Err(SendError::SendFailure {
                sender: SENDER,
                status: Some(status.as_u16()),
                body: error.to_string(),
            });
        }

        let bundle_id = parsed
            .result
            .as_ref()
            .and_then(Value::as_str)
            .unwrap_or_default();
        info!(target: "trade_executor", "[Jito] bundle 已提交: {} (tx {})", bundle_id, signature);
        Ok(signature)
    }

    async fn simulate(&self, _tx: &VersionedTransaction) -> Result<(), SendError> {
        Err(SendError::Unsupported(SENDER))
    }

    fn tip_lamports(&self) -> Option<u64> {
        Some(self.tip_lamports)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bundle_body_shape() {
        let sender = JitoSender::new("https://mainnet.block-engine.jito.wtf/", 100_000);
        assert_eq!(
            sender.bundles_url,
            "https://mainnet.block-engine.jito.wtf/api/v1/bundles"
        );
        let body = sender.bundle_body("AAAA");
        assert_eq!(body["method"], "sendBundle");
        assert_eq!(body["params"][0][0], "AAAA");
        assert_eq!(body["params"][1]["encoding"], "base64");
        assert_eq!(sender.tip_lamports(), Some(100_000));
    }

    #[test]
    fn test_random_tip_account_is_known() {
        for _ in 0..16 {
            assert!(JITO_TIP_ACCOUNTS.contains(&random_tip_account()));
        }
    }
}
