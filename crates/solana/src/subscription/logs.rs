//! WebSocket `logsSubscribe` 后端

use anyhow::Result;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use services::ShutdownSignal;

use super::{TransactionSubscriber, WalletNotification, RECONNECT_DELAY};
use crate::client::SolanaClient;
use crate::parser::RawTransaction;

const FETCH_ATTEMPTS: usize = 3;
const FETCH_RETRY_DELAY: Duration = Duration::from_millis(500);

/// 按签名拉取完整交易
#[async_trait]
pub trait TransactionFetcher: Send + Sync {
    async fn fetch_transaction(&self, signature: &str)
        -> Result<EncodedConfirmedTransactionWithStatusMeta>;
}

#[async_trait]
impl TransactionFetcher for SolanaClient {
    async fn fetch_transaction(
        &self,
        signature: &str,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        self.get_transaction(signature).await
    }
}

/// RPC 响应
#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<RpcParams>,
    #[serde(default)]
    id: Option<u64>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct RpcParams {
    result: RpcResult,
    subscription: u64,
}

#[derive(Debug, Deserialize)]
struct RpcResult {
    context: RpcContext,
    value: RpcValue,
}

#[derive(Debug, Deserialize)]
struct RpcContext {
    slot: u64,
}

#[derive(Debug, Deserialize)]
struct RpcValue {
    signature: String,
    #[serde(default)]
    err: Option<Value>,
}

struct LogsInner {
    ws_url: String,
    fetcher: Arc<dyn TransactionFetcher>,
    notify_tx: mpsc::Sender<WalletNotification>,
    wallets: RwLock<BTreeSet<String>>,
    /// 订阅 id -> 钱包
    subscriptions: Mutex<HashMap<u64, String>>,
    /// 请求 id -> 钱包 (等待订阅确认)
    pending: Mutex<HashMap<u64, String>>,
    /// 确认前已取消的请求 id，确认到达后立即退订
    cancelled: Mutex<HashSet<u64>>,
    /// 当前连接的发送端
    outgoing: Mutex<Option<mpsc::UnboundedSender<String>>>,
    next_id: AtomicU64,
    running: RwLock<bool>,
    shutdown: ShutdownSignal,
}

/// WebSocket 日志订阅器，每个钱包一个 `logsSubscribe {"mentions": [wallet]}`
pub struct LogsSubscriber {
    inner: Arc<LogsInner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl LogsSubscriber {
    pub fn new(
        ws_url: &str,
        client: Arc<SolanaClient>,
        notify_tx: mpsc::Sender<WalletNotification>,
    ) -> Self {
        Self::with_fetcher(ws_url, client, notify_tx)
    }

    pub fn with_fetcher(
        ws_url: &str,
        fetcher: Arc<dyn TransactionFetcher>,
        notify_tx: mpsc::Sender<WalletNotification>,
    ) -> Self {
        Self {
            inner: Arc::new(LogsInner {
                ws_url: ws_url.to_string(),
                fetcher,
                notify_tx,
                wallets: RwLock::new(BTreeSet::new()),
                subscriptions: Mutex::new(HashMap::new()),
                pending: Mutex::new(HashMap::new()),
                cancelled: Mutex::new(HashSet::new()),
                outgoing: Mutex::new(None),
                next_id: AtomicU64::new(1),
                running: RwLock::new(false),
                shutdown: ShutdownSignal::new(),
            }),
            handle: Mutex::new(None),
        }
    }
}

impl LogsInner {
    fn send(&self, text: String) -> bool {
        match self.outgoing.lock().as_ref() {
            Some(tx) => tx.send(text).is_ok(),
            None => false,
        }
    }

    fn subscribe_request(&self, wallet: &str) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(id, wallet.to_string());
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "logsSubscribe",
            "params": [
                { "mentions": [wallet] },
                { "commitment": "confirmed" }
            ]
        })
        .to_string()
    }

    fn unsubscribe_request(&self, subscription: u64) -> String {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "logsUnsubscribe",
            "params": [subscription]
        })
        .to_string()
    }

    /// 把钱包尚未确认的订阅请求转入取消集合
    fn cancel_pending(&self, wallet: &str) {
        let mut pending = self.pending.lock();
        let ids: Vec<u64> = pending
            .iter()
            .filter(|(_, w)| w.as_str() == wallet)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            pending.remove(id);
        }
        self.cancelled.lock().extend(ids);
    }

    fn subscription_of(&self, wallet: &str) -> Option<u64> {
        self.subscriptions
            .lock()
            .iter()
            .find(|(_, w)| w.as_str() == wallet)
            .map(|(id, _)| *id)
    }

    async fn run(self: Arc<Self>) {
        info!("[Solana WS] 连接到 {}", self.ws_url);

        loop {
            if !*self.running.read().await {
                break;
            }

            match self.run_connection().await {
                Ok(_) => info!("[Solana WS] 连接正常关闭"),
                Err(e) => error!("[Solana WS] 连接错误: {}", e),
            }
            self.reset_connection_state();

            if *self.running.read().await {
                info!("[Solana WS] 5秒后重连...");
                tokio::select! {
                    _ = tokio::time::sleep(RECONNECT_DELAY) => {}
                    _ = self.shutdown.triggered() => {}
                }
            }
        }
    }

    fn reset_connection_state(&self) {
        *self.outgoing.lock() = None;
        self.subscriptions.lock().clear();
        self.pending.lock().clear();
        self.cancelled.lock().clear();
    }

    /// 运行单次连接
    async fn run_connection(self: &Arc<Self>) -> Result<()> {
        let (ws_stream, _) = connect_async(&self.ws_url).await?;
        let (mut write, mut read) = ws_stream.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        *self.outgoing.lock() = Some(out_tx);

        // 重连后重新订阅全部钱包
        let wallets: Vec<String> = self.wallets.read().await.iter().cloned().collect();
        for wallet in &wallets {
            write.send(Message::Text(self.subscribe_request(wallet))).await?;
        }
        info!("[Solana WS] 连接成功，已订阅 {} 个钱包", wallets.len());

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.handle_message(&text),
                    Some(Ok(Message::Ping(data))) => {
                        let _ = write.send(Message::Pong(data)).await;
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("[Solana WS] 收到关闭帧");
                        break;
                    }
                    Some(Err(e)) => {
                        error!("[Solana WS] 接收消息错误: {}", e);
                        break;
                    }
                    Some(Ok(_)) => {}
                },
                Some(text) = out_rx.recv() => {
                    write.send(Message::Text(text)).await?;
                }
                _ = self.shutdown.triggered() => {
                    let _ = write.send(Message::Close(None)).await;
                    break;
                }
            }
        }

        Ok(())
    }

    /// 处理 WebSocket 消息
    fn handle_message(self: &Arc<Self>, text: &str) {
        let response: RpcResponse = match serde_json::from_str(text) {
            Ok(r) => r,
            Err(e) => {
                debug!("[Solana WS] 解析消息失败: {}", e);
                return;
            }
        };

        if let Some(id) = response.id {
            let wallet = self.pending.lock().remove(&id);
            let subscription = response.result.as_ref().and_then(Value::as_u64);
            if self.cancelled.lock().remove(&id) {
                if let Some(subscription) = subscription {
                    debug!("[Solana WS] 订阅 #{} 确认前已取消，退订", subscription);
                    self.send(self.unsubscribe_request(subscription));
                }
                return;
            }
            match (wallet, subscription) {
                (Some(wallet), Some(subscription)) => {
                    debug!("[Solana WS] 订阅 #{} 确认: {}", subscription, wallet);
                    self.subscriptions.lock().insert(subscription, wallet);
                }
                (Some(wallet), None) => {
                    warn!("[Solana WS] 订阅 {} 失败: {:?}", wallet, response.error);
                }
                (None, _) => {}
            }
            return;
        }

        if response.method.as_deref() != Some("logsNotification") {
            return;
        }
        let Some(params) = response.params else {
            return;
        };
        let Some(wallet) = self.subscriptions.lock().get(&params.subscription).cloned() else {
            debug!("[Solana WS] 未知订阅 #{}", params.subscription);
            return;
        };
        // 失败交易不处理
        if params.result.value.err.is_some() {
            return;
        }

        let signature = params.result.value.signature;
        debug!(
            "[Solana WS] {} 新交易: slot={}, sig={}",
            wallet, params.result.context.slot, signature
        );

        let inner = self.clone();
        tokio::spawn(async move {
            inner.fetch_and_forward(wallet, signature).await;
        });
    }

    async fn fetch_and_forward(&self, wallet: String, signature: String) {
        for attempt in 1..=FETCH_ATTEMPTS {
            match self.fetcher.fetch_transaction(&signature).await {
                Ok(tx) => {
                    let notification = WalletNotification {
                        wallet,
                        raw: RawTransaction::Rpc(Box::new(tx)),
                    };
                    if self.notify_tx.send(notification).await.is_err() {
                        debug!("[Solana WS] 通知通道已关闭");
                    }
                    return;
                }
                Err(e) if attempt < FETCH_ATTEMPTS => {
                    debug!("[Solana WS] 拉取交易 {} 失败 (第 {} 次): {}", signature, attempt, e);
                    tokio::time::sleep(FETCH_RETRY_DELAY).await;
                }
                Err(e) => warn!("[Solana WS] 拉取交易 {} 失败: {:#}", signature, e),
            }
        }
    }
}

#[async_trait]
impl TransactionSubscriber for LogsSubscriber {
    fn name(&self) -> &'static str {
        "logs"
    }

    async fn subscribe(&self, wallet: &str) -> Result<()> {
        if !self.inner.wallets.write().await.insert(wallet.to_string()) {
            return Ok(());
        }
        // 未连接时由下次连接统一订阅
        let request = self.inner.subscribe_request(wallet);
        if !self.inner.send(request) {
            self.inner.pending.lock().retain(|_, w| w.as_str() != wallet);
        }
        info!("[Solana WS] 监控钱包: {}", wallet);
        Ok(())
    }

    async fn unsubscribe(&self, wallet: &str) -> Result<()> {
        self.inner.wallets.write().await.remove(wallet);
        self.inner.cancel_pending(wallet);
        if let Some(subscription) = self.inner.subscription_of(wallet) {
            self.inner.subscriptions.lock().remove(&subscription);
            self.inner.send(self.inner.unsubscribe_request(subscription));
        }
        info!("[Solana WS] 取消监控钱包: {}", wallet);
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
            info!("[Solana WS] 停止订阅");
        }
    }

    async fn watched(&self) -> Vec<String> {
        self.inner.wallets.read().await.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeFetcher;

    #[async_trait]
    impl TransactionFetcher for FakeFetcher {
        async fn fetch_transaction(
            &self,
            signature: &str,
        ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
            let json = json!({
                "slot": 9,
                "blockTime": null,
                "transaction": [signature, "base64"],
                "meta": null
            });
            Ok(serde_json::from_value(json)?)
        }
    }

    fn subscriber() -> (LogsSubscriber, mpsc::Receiver<WalletNotification>) {
        let (tx, rx) = mpsc::channel(8);
        (
            LogsSubscriber::with_fetcher("ws://127.0.0.1:1", Arc::new(FakeFetcher), tx),
            rx,
        )
    }

    #[tokio::test]
    async fn test_confirmation_then_notification_forwards() {
        let (subscriber, mut rx) = subscriber();
        let inner = subscriber.inner.clone();

        let request: Value = serde_json::from_str(&inner.subscribe_request("W1")).unwrap();
        let id = request["id"].as_u64().unwrap();
        assert_eq!(request["params"][0]["mentions"][0], "W1");

        inner.handle_message(&json!({"jsonrpc": "2.0", "result": 77, "id": id}).to_string());
        assert_eq!(inner.subscription_of("W1"), Some(77));

        let notification = json!({
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {
                "subscription": 77,
                "result": {
                    "context": {"slot": 5},
                    "value": {"signature": "sigA", "err": null, "logs": []}
                }
            }
        });
        inner.handle_message(&notification.to_string());

        let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.wallet, "W1");
        assert!(matches!(received.raw, RawTransaction::Rpc(_)));
    }

    #[tokio::test]
    async fn test_failed_and_unknown_notifications_dropped() {
        let (subscriber, mut rx) = subscriber();
        let inner = subscriber.inner.clone();
        inner.subscriptions.lock().insert(3, "W1".to_string());

        let failed = json!({
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {"subscription": 3, "result": {"context": {"slot": 1},
                "value": {"signature": "s", "err": {"InstructionError": [0, "Custom"]}}}}
        });
        let unknown = json!({
            "jsonrpc": "2.0",
            "method": "logsNotification",
            "params": {"subscription": 4, "result": {"context": {"slot": 1},
                "value": {"signature": "s", "err": null}}}
        });
        inner.handle_message(&failed.to_string());
        inner.handle_message(&unknown.to_string());

        assert!(tokio::time::timeout(Duration::from_millis(100), rx.recv())
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_subscribe_offline_tracks_wallet() {
        let (subscriber, _rx) = subscriber();
        subscriber.subscribe("W1").await.unwrap();
        subscriber.subscribe("W2").await.unwrap();
        subscriber.subscribe("W1").await.unwrap();
        assert_eq!(subscriber.watched().await, vec!["W1", "W2"]);
        assert!(subscriber.inner.pending.lock().is_empty());

        subscriber.unsubscribe("W1").await.unwrap();
        assert_eq!(subscriber.watched().await, vec!["W2"]);
    }

    #[tokio::test]
    async fn test_unsubscribe_before_confirmation_releases_subscription() {
        let (subscriber, _rx) = subscriber();
        let inner = subscriber.inner.clone();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        *inner.outgoing.lock() = Some(out_tx);

        subscriber.subscribe("W1").await.unwrap();
        let request: Value = serde_json::from_str(&out_rx.try_recv().unwrap()).unwrap();
        let id = request["id"].as_u64().unwrap();

        subscriber.unsubscribe("W1").await.unwrap();
        assert!(out_rx.try_recv().is_err());

        inner.handle_message(&json!({"jsonrpc": "2.0", "result": 77, "id": id}).to_string());
        assert_eq!(inner.subscription_of("W1"), None);

        let sent: Value = serde_json::from_str(&out_rx.try_recv().unwrap()).unwrap();
        assert_eq!(sent["method"], "logsUnsubscribe");
        assert_eq!(sent["params"][0], 77);
        assert!(inner.cancelled.lock().is_empty());

        // 重新订阅走正常确认
        subscriber.subscribe("W1").await.unwrap();
        let request: Value = serde_json::from_str(&out_rx.try_recv().unwrap()).unwrap();
        let id = request["id"].as_u64().unwrap();
        inner.handle_message(&json!({"jsonrpc": "2.0", "result": 78, "id": id}).to_string());
        assert_eq!(inner.subscription_of("W1"), Some(78));
    }

    #[tokio::test]
    async fn test_stop_without_start() {
        let (subscriber, _rx) = subscriber();
        subscriber.stop().await;
        subscriber.stop().await;
        assert!(!*subscriber.inner.running.read().await);
    }
}
