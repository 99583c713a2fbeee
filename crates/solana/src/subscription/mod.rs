//! 钱包交易订阅后端
//!
//! 两种后端：WebSocket `logsSubscribe` 与 Yellowstone gRPC 推送。
//! 后端将 `(钱包, 原始交易)` 通过 mpsc 通道交给上层。

mod geyser;
mod logs;

pub use geyser::*;
pub use logs::*;

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::client::SolanaClient;
use crate::config::SolanaConfig;
use crate::parser::RawTransaction;

/// 通知通道容量
pub const NOTIFICATION_CHANNEL_SIZE: usize = 1024;

/// 断线重连间隔
pub(crate) const RECONNECT_DELAY: std::time::Duration = std::time::Duration::from_secs(5);

/// 监控钱包的一笔交易
#[derive(Debug)]
pub struct WalletNotification {
    pub wallet: String,
    pub raw: RawTransaction,
}

#[async_trait]
pub trait TransactionSubscriber: Send + Sync {
    fn name(&self) -> &'static str;

    async fn subscribe(&self, wallet: &str) -> Result<()>;

    async fn unsubscribe(&self, wallet: &str) -> Result<()>;

    /// 启动后台连接，重复调用无副作用
    async fn start(&self);

    /// 停止后台连接并等待退出，可重复调用
    async fn stop(&self);

    /// 当前监控的钱包
    async fn watched(&self) -> Vec<String>;
}

/// 订阅后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionBackendKind {
    Logs,
    Geyser,
}

impl FromStr for SubscriptionBackendKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "logs" | "websocket" | "ws" => Ok(Self::Logs),
            "geyser" | "grpc" | "yellowstone" => Ok(Self::Geyser),
            other => bail!("unknown subscription backend: {}", other),
        }
    }
}

/// 按配置构建订阅后端，返回后端与通知接收端
pub fn build_subscriber(
    kind: SubscriptionBackendKind,
    config: &SolanaConfig,
    client: Arc<SolanaClient>,
) -> (Arc<dyn TransactionSubscriber>, mpsc::Receiver<WalletNotification>) {
    let (tx, rx) = mpsc::channel(NOTIFICATION_CHANNEL_SIZE);
    let subscriber: Arc<dyn TransactionSubscriber> = match kind {
        SubscriptionBackendKind::Logs => {
            Arc::new(LogsSubscriber::new(&config.ws_url, client, tx))
        }
        SubscriptionBackendKind::Geyser => Arc::new(GeyserSubscriber::new(
            &config.geyser_grpc_url,
            config.geyser_x_token.clone(),
            tx,
        )),
    };
    (subscriber, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_from_str() {
        assert_eq!("logs".parse::<SubscriptionBackendKind>().unwrap(), SubscriptionBackendKind::Logs);
        assert_eq!("Geyser".parse::<SubscriptionBackendKind>().unwrap(), SubscriptionBackendKind::Geyser);
        assert!("carrier-pigeon".parse::<SubscriptionBackendKind>().is_err());
    }
}
