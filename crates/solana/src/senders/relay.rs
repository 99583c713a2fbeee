use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{encode_transaction, rpc::simulate_via_rpc, SendError, TransactionSender, TxStatus};
use crate::client::SolanaClient;

const SENDER: &str = "relay";

#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// 第三方防夹转发
pub struct RelaySender {
    client: Client,
    api_url: String,
    api_key: Option<String>,
    rpc: Arc<SolanaClient>,
}

impl RelaySender {
    pub fn new(api_url: &str, api_key: Option<String>, rpc: Arc<SolanaClient>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
            api_key,
            rpc,
        }
    }

    fn submit_url(&self) -> String {
        format!("{}/txproxy/v1/send_transaction", self.api_url)
    }

    fn status_url(&self) -> String {
        format!("{}/txproxy/v1/get_transaction_status", self.api_url)
    }

    fn submit_body(encoded: &str) -> Value {
        json!({
            "transaction": encoded,
            "encoding": "base64",
            "antiMev": true
        })
    }

    async fn call(&self, request: reqwest::RequestBuilder) -> Result<Value, SendError> {
        let request = match &self.api_key {
            Some(key) => request.header("x-api-key", key),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(SendError::from_status(SENDER, status, text));
        }

        let parsed: RelayResponse =
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
        Ok(parsed.result.unwrap_or(Value::Null))
    }
}

fn parse_status(result: &Value) -> TxStatus {
    let status = result
        .get("status")
        .and_then(Value::as_str)
        .unwrap_or("pending")
        .to_ascii_lowercase();
    match status.as_str() {
        "confirmed" | "finalized" | "success" => TxStatus::Confirmed,
        "failed" | "error" => TxStatus::Failed(
            result
                .get("error")
                .map(Value::to_string)
                .unwrap_or_default(),
        ),
        _ => TxStatus::Pending,
    }
}

#[async_trait]
impl TransactionSender for RelaySender {
    fn name(&self) -> &'static str {
        SENDER
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SendError> {
        let encoded = encode_transaction(tx)?;
        let request = self
            .client
            .post(self.submit_url())
            .json(&Self::submit_body(&encoded));
        let result = self.call(request).await?;

        let hash = result
            .as_str()
            .or_else(|| result.get("signature").and_then(Value::as_str))
            .ok_or_else(|| SendError::SendFailure {
                sender: SENDER,
                status: None,
                body: format!("missing signature in {}", result),
            })?;
        let signature = Signature::from_str(hash).map_err(|e| SendError::SendFailure {
            sender: SENDER,
            status: None,
            body: format!("bad signature {}: {}", hash, e),
        })?;
        info!(target: "trade_executor", "[Relay] 交易已提交: {}", signature);
        Ok(signature)
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<(), SendError> {
        simulate_via_rpc(&self.rpc, tx).await
    }

    /// 查询转发交易状态，待定且超过有效高度视为过期
    async fn status(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
    ) -> Result<TxStatus, SendError> {
        let request = self
            .client
            .get(self.status_url())
            .query(&[("signature", signature.to_string())]);
        let result = self.call(request).await?;
        let status = parse_status(&result);

        if status == TxStatus::Pending {
            let height = self
                .rpc
                .get_block_height()
                .await
                .map_err(|e| SendError::Rpc(format!("{:#}", e)))?;
            if height > last_valid_block_height {
                return Ok(TxStatus::Expired);
            }
        }
        debug!(target: "trade_executor", "[Relay] {} 状态: {:?}", signature, status);
        Ok(status)
    }
}
