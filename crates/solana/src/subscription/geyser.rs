//! Yellowstone gRPC 推送后端
//!
//! 单个 SubscribeRequest，交易过滤器的 `account_include` 为当前监控集合；
//! 增删钱包时在已打开的流上推送新的请求。

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tonic::transport::channel::ClientTlsConfig;
use tracing::{debug, error, info, warn};
use yellowstone_grpc_client::{GeyserGrpcClient, Interceptor};
use yellowstone_grpc_proto::{
    geyser::SubscribeRequestFilterTransactions,
    prelude::{
        subscribe_update::UpdateOneof, CommitmentLevel, SubscribeRequest, SubscribeRequestPing,
        SubscribeUpdateTransaction,
    },
};

use services::ShutdownSignal;

use super::{TransactionSubscriber, WalletNotification, RECONNECT_DELAY};
use crate::parser::RawTransaction;

const FILTER_NAME: &str = "copytrade";

/// 按监控集合构建订阅请求，集合为空时不订阅任何交易
pub fn build_subscribe_request(wallets: &BTreeSet<String>) -> SubscribeRequest {
    let mut transactions = HashMap::new();
    if !wallets.is_empty() {
        transactions.insert(
            FILTER_NAME.to_string(),
            SubscribeRequestFilterTransactions {
                vote: Some(false),
                failed: Some(false),
                account_include: wallets.iter().cloned().collect(),
                ..Default::default()
            },
        );
    }

    SubscribeRequest {
        transactions,
        commitment: Some(CommitmentLevel::Confirmed as i32),
        ..Default::default()
    }
}

/// 交易涉及的监控钱包
fn matched_wallets(update: &SubscribeUpdateTransaction, wallets: &BTreeSet<String>) -> Vec<String> {
    let Some(info) = update.transaction.as_ref() else {
        return Vec::new();
    };
    let static_keys = info
        .transaction
        .as_ref()
        .and_then(|tx| tx.message.as_ref())
        .map(|message| message.account_keys.as_slice())
        .unwrap_or_default();
    let (writable, readonly) = info
        .meta
        .as_ref()
        .map(|meta| {
            (
                meta.loaded_writable_addresses.as_slice(),
                meta.loaded_readonly_addresses.as_slice(),
            )
        })
        .unwrap_or_default();

    let mut matched = Vec::new();
    for key in static_keys.iter().chain(writable).chain(readonly) {
        let key = bs58::encode(key).into_string();
        if wallets.contains(&key) && !matched.contains(&key) {
            matched.push(key);
        }
    }
    matched
}

struct GeyserInner {
    url: String,
    x_token: Option<String>,
    notify_tx: mpsc::Sender<WalletNotification>,
    wallets: RwLock<BTreeSet<String>>,
    /// 当前流的请求发送端
    requests: Mutex<Option<mpsc::UnboundedSender<SubscribeRequest>>>,
    running: RwLock<bool>,
    shutdown: ShutdownSignal,
}

pub struct GeyserSubscriber {
    inner: Arc<GeyserInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl GeyserSubscriber {
    pub fn new(
        url: &str,
        x_token: Option<String>,
        notify_tx: mpsc::Sender<WalletNotification>,
    ) -> Self {
        Self {
            inner: Arc::new(GeyserInner {
                url: url.to_string(),
                x_token,
                notify_tx,
                wallets: RwLock::new(BTreeSet::new()),
                requests: Mutex::new(None),
                running: RwLock::new(false),
                shutdown: ShutdownSignal::new(),
            }),
            handle: Mutex::new(None),
        }
    }
}

impl GeyserInner {
    async fn connect(&self) -> Result<GeyserGrpcClient<impl Interceptor>> {
        let mut builder = GeyserGrpcClient::build_from_shared(self.url.clone())?
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(10))
            .tls_config(ClientTlsConfig::new().with_native_roots())?
            .max_decoding_message_size(1024 * 1024 * 1024);

        if let Some(token) = &self.x_token {
            builder = builder.x_token(Some(token.clone()))?;
        }

        Ok(builder.connect().await?)
    }

    async fn current_request(&self) -> SubscribeRequest {
        build_subscribe_request(&*self.wallets.read().await)
    }

    /// 监控集合变化后推送新请求
    async fn push_request(&self) {
        let request = self.current_request().await;
        if let Some(tx) = self.requests.lock().as_ref() {
            let _ = tx.send(request);
        }
    }

    async fn run(self: Arc<Self>) {
        info!("[Geyser] 连接到 {}", self.url);

        loop {
            if !*self.running.read().await {
                break;
            }

            match self.run_stream().await {
                Ok(_) => info!("[Geyser] 流正常关闭"),
                Err(e) => error!("[Geyser] 连接错误: {:#}", e),
            }
            *self.requests.lock() = None;

            if *self.running.read().await {
                info!("[Geyser] 5秒后重连...");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = self.shutdown.triggered() => {}
                }
            }
        }
    }

    async fn run_stream(&self) -> Result<()> {
        let mut client = self.connect().await?;
        let request = self.current_request().await;
        let (mut sink, mut stream) = client.subscribe_with_request(Some(request)).await?;

        let (req_tx, mut req_rx) = mpsc::unbounded_channel();
        *self.requests.lock() = Some(req_tx);
        info!("[Geyser] 订阅已建立，监控 {} 个钱包", self.wallets.read().await.len());

        loop {
            tokio::select! {
                message = stream.next() => match message {
                    Some(Ok(msg)) => match msg.update_oneof {
                        Some(UpdateOneof::Transaction(update)) => self.forward(update).await,
                        Some(UpdateOneof::Ping(_)) => {
                            sink.send(SubscribeRequest {
                                ping: Some(SubscribeRequestPing { id: 1 }),
                                ..Default::default()
                            })
                            .await?;
                        }
                        Some(UpdateOneof::Pong(_)) => {}
                        None => {
                            warn!("[Geyser] 收到空更新");
                            break;
                        }
                        _ => {}
                    },
                    Some(Err(status)) => {
                        error!("[Geyser] 流错误: {:?}", status);
                        break;
                    }
                    None => break,
                },
                Some(request) = req_rx.recv() => {
                    sink.send(request).await?;
                    debug!("[Geyser] 已更新订阅过滤器");
                }
                _ = self.shutdown.triggered() => break,
            }
        }

        Ok(())
    }

    async fn forward(&self, update: SubscribeUpdateTransaction) {
        let matched = matched_wallets(&update, &*self.wallets.read().await);
        if matched.is_empty() {
            return;
        }

        let received_at = chrono::Utc::now().timestamp();
        let update = Box::new(update);
        for wallet in matched {
            let notification = WalletNotification {
                wallet,
                raw: RawTransaction::Geyser {
                    update: update.clone(),
                    received_at,
                },
            };
            if self.notify_tx.send(notification).await.is_err() {
                debug!("[Geyser] 通知通道已关闭");
                return;
            }
        }
    }
}

#[async_trait]
impl TransactionSubscriber for GeyserSubscriber {
    fn name(&self) -> &'static str {
        "geyser"
    }

    async fn subscribe(&self, wallet: &str) -> Result<()> {
        if self.inner.wallets.write().await.insert(wallet.to_string()) {
            self.inner.push_request().await;
            info!("[Geyser] 监控钱包: {}", wallet);
        }
        Ok(())
    }

    async fn unsubscribe(&self, wallet: &str) -> Result<()> {
        if self.inner.wallets.write().await.remove(wallet) {
            self.inner.push_request().await;
            info!("[Geyser] 取消监控钱包: {}", wallet);
        }
        Ok(())
    }

    async fn start(&self) {
        {
            let mut running = self.inner.running.write().await;
            if *running {
                return;
            }
            *running = true;
            self.inner.shutdown.reset();
        }
        let inner = self.inner.clone();
        *self.handle.lock() = Some(tokio::spawn(inner.run()));
    }

    async fn stop(&self) {
        *self.inner.running.write().await = false;
        self.inner.shutdown.trigger();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!("[Geyser] 停止订阅");
        }
    }

    async fn watched(&self) -> Vec<String> {
        self.inner.wallets.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::pubkey::Pubkey;
    use yellowstone_grpc_proto::prelude::{
        Message, SubscribeUpdateTransactionInfo, Transaction, TransactionStatusMeta,
    };

    #[test]
    fn test_empty_set_subscribes_nothing() {
        let request = build_subscribe_request(&BTreeSet::new());
        assert!(request.transactions.is_empty());
    }

    #[test]
    fn test_request_includes_wallets() {
        let wallets: BTreeSet<String> = ["W1".to_string(), "W2".to_string()].into();
        let request = build_subscribe_request(&wallets);
        let filter = &request.transactions[FILTER_NAME];
        assert_eq!(filter.account_include, vec!["W1", "W2"]);
        assert_eq!(filter.vote, Some(false));
        assert_eq!(request.commitment, Some(CommitmentLevel::Confirmed as i32));
    }

    #[test]
    fn test_matched_wallets_static_and_loaded() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let other = Pubkey::new_unique();
        let update = SubscribeUpdateTransaction {
            transaction: Some(SubscribeUpdateTransactionInfo {
                transaction: Some(Transaction {
                    message: Some(Message {
                        account_keys: vec![a.to_bytes().to_vec(), other.to_bytes().to_vec()],
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                meta: Some(TransactionStatusMeta {
                    loaded_readonly_addresses: vec![b.to_bytes().to_vec()],
                    ..Default::default()
                }),
                ..Default::default()
            }),
            slot: 1,
        };
        let wallets: BTreeSet<String> = [a.to_string(), b.to_string()].into();
        assert_eq!(matched_wallets(&update, &wallets), vec![a.to_string(), b.to_string()]);
    }

    #[tokio::test]
    async fn test_subscribe_updates_watched_set() {
        let (tx, _rx) = mpsc::channel(1);
        let subscriber = GeyserSubscriber::new("http://127.0.0.1:1", None, tx);
        subscriber.subscribe("W1").await.unwrap();
        subscriber.subscribe("W2").await.unwrap();
        subscriber.unsubscribe("W1").await.unwrap();
        assert_eq!(subscriber.watched().await, vec!["W2"]);
        subscriber.stop().await;
    }
}
