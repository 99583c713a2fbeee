//! 交易发送通道
//!
//! - `RpcSender`: 节点 `sendTransaction` (跳过预检)
//! - `JitoSender`: Jito bundle (`sendBundle`)
//! - `RelaySender`: 第三方防夹转发服务

mod jito;
mod relay;
mod rpc;

pub use jito::*;
pub use relay::*;
pub use rpc::*;

use async_trait::async_trait;
use base64::{engine::general_purpose, Engine as _};
use reqwest::StatusCode;
use solana_sdk::{signature::Signature, transaction::VersionedTransaction};
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SendError {
    #[error("too many requests to {0}")]
    TooManyRequests(&'static str),

    #[error("transaction error: {message}")]
    TransactionError { message: String, logs: Vec<String> },

    #[error("{sender} send failed (status {status:?}): {body}")]
    SendFailure {
        sender: &'static str,
        status: Option<u16>,
        body: String,
    },

    #[error("{0} does not support this operation")]
    Unsupported(&'static str),

    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl SendError {
    /// 由非成功 HTTP 状态构造错误
    pub(crate) fn from_status(sender: &'static str, status: StatusCode, body: String) -> Self {
        if status == StatusCode::TOO_MANY_REQUESTS {
            SendError::TooManyRequests(sender)
        } else {
            SendError::SendFailure {
                sender,
                status: Some(status.as_u16()),
                body,
            }
        }
    }

    /// 网络/限流类错误可重试，其余对该笔交易是终态
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SendError::TooManyRequests(_) | SendError::Transport(_) | SendError::Rpc(_)
        )
    }
}

/// 已提交交易的状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxStatus {
    Pending,
    Confirmed,
    Failed(String),
    /// 超过有效区块高度仍未上链
    Expired,
}

#[async_trait]
pub trait TransactionSender: Send + Sync {
    fn name(&self) -> &'static str;

    /// 提交已签名交易，返回交易签名
    async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SendError>;

    /// 预执行交易，失败时返回 `TransactionError`
    async fn simulate(&self, tx: &VersionedTransaction) -> Result<(), SendError>;

    /// 发送前是否需要附加小费转账 (lamports)
    fn tip_lamports(&self) -> Option<u64> {
        None
    }

    /// 查询已提交交易的状态，不支持的通道由调用方改走节点查询
    async fn status(
        &self,
        _signature: &Signature,
        _last_valid_block_height: u64,
    ) -> Result<TxStatus, SendError> {
        Err(SendError::Unsupported(self.name()))
    }
}

/// 发送通道类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderKind {
    Rpc,
    Jito,
    Relay,
}

impl FromStr for SenderKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "rpc" => Ok(Self::Rpc),
            "jito" => Ok(Self::Jito),
            "relay" => Ok(Self::Relay),
            other => anyhow::bail!("unknown trade sender: {}", other),
        }
    }
}

/// bincode + base64 编码
pub fn encode_transaction(tx: &VersionedTransaction) -> Result<String, SendError> {
    let bytes = bincode::serialize(tx).map_err(|e| SendError::Serialization(e.to_string()))?;
    Ok(general_purpose::STANDARD.encode(bytes))
}

pub(crate) fn first_signature(tx: &VersionedTransaction) -> Result<Signature, SendError> {
    tx.signatures
        .first()
        .copied()
        .ok_or_else(|| SendError::Serialization("transaction has no signature".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            SendError::from_status("jito", StatusCode::TOO_MANY_REQUESTS, String::new()),
            SendError::TooManyRequests("jito")
        ));
        assert!(matches!(
            SendError::from_status("relay", StatusCode::BAD_REQUEST, "bad".to_string()),
            SendError::SendFailure { status: Some(400), .. }
        ));
        assert!(SendError::TooManyRequests("rpc").is_transient());
        assert!(!SendError::Unsupported("jito").is_transient());
    }

    #[test]
    fn test_sender_kind_from_str() {
        assert_eq!("JITO".parse::<SenderKind>().unwrap(), SenderKind::Jito);
        assert!("carrier".parse::<SenderKind>().is_err());
    }
}
