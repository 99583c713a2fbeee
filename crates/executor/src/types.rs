//! 执行器类型定义

use serde::{Deserialize, Serialize};
use solana_chain::SendError;
use thiserror::Error;

/// 交易执行路径
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// pump.fun 联合曲线
    BondingCurve,
    /// pump AMM
    Amm,
    /// Jupiter 聚合器
    Aggregator,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::BondingCurve => "bonding_curve",
            Route::Amm => "amm",
            Route::Aggregator => "aggregator",
        }
    }
}

/// 执行错误
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Unsupported route for program {0}")]
    UnsupportedRoute(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("No route found: {0}")]
    NoRouteFound(String),

    #[error("Transaction error: {message}")]
    TransactionError { message: String, logs: Vec<String> },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Decoding error: {0}")]
    Decoding(#[from] solana_chain::DecodingError),

    #[error("Send error: {0}")]
    Send(SendError),

    /// 发送阶段失败，交易可能已上链
    #[error("Submit error ({signature}): {source}")]
    Submit { signature: String, source: SendError },

    #[error("RPC error: {0}")]
    Rpc(String),

    #[error("Build error: {0}")]
    Build(String),
}

impl ExecutionError {
    /// 对该笔意图是否为终态 (重试也不会成功)
    pub fn is_terminal(&self) -> bool {
        match self {
            ExecutionError::Send(e) => !e.is_transient(),
            ExecutionError::Rpc(_) => false,
            _ => true,
        }
    }

    /// 已签名交易的签名，仅发送阶段的错误携带
    pub fn signature(&self) -> Option<&str> {
        match self {
            ExecutionError::Submit { signature, .. } => Some(signature),
            _ => None,
        }
    }
}

impl From<SendError> for ExecutionError {
    fn from(e: SendError) -> Self {
        match e {
            SendError::TransactionError { message, logs } => {
                ExecutionError::TransactionError { message, logs }
            }
            other => ExecutionError::Send(other),
        }
    }
}
