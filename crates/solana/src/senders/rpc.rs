use async_trait::async_trait;
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::sync::Arc;
use tracing::debug;

use super::{SendError, TransactionSender};
use crate::client::SolanaClient;

/// 通过 RPC 节点发送
pub struct RpcSender {
    client: Arc<SolanaClient>,
}

impl RpcSender {
    pub fn new(client: Arc<SolanaClient>) -> Self {
        Self { client }
    }
}

/// RPC 模拟：链上错误转为 `TransactionError` 并带上日志
pub(crate) async fn simulate_via_rpc(
    client: &SolanaClient,
    tx: &VersionedTransaction,
) -> Result<(), SendError> {
    let result = client
        .simulate(tx)
        .await
        .map_err(|e| SendError::Rpc(format!("{:#}", e)))?;
    match result.err {
        Some(err) => Err(SendError::TransactionError {
            message: err.to_string(),
            logs: result.logs.unwrap_or_default(),
        }),
        None => {
            debug!(
                target: "trade_executor",
                "[Sender] 模拟成功，消耗 CU: {:?}",
                result.units_consumed
            );
            Ok(())
        }
    }
}

#[async_trait]
impl TransactionSender for RpcSender {
    fn name(&self) -> &'static str {
        "rpc"
    }

    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SendError> {
        self.client.send(tx).await.map_err(|e| {
            let message = format!("{:#}", e);
            if message.contains("429") {
                SendError::TooManyRequests("rpc")
            } else {
                SendError::Rpc(message)
            }
        })
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<(), SendError> {
        simulate_via_rpc(&self.client, tx).await
    }
}
