//! 钱包订阅管理
//!
//! - 启动时订阅全部监控钱包 (监控目标 ∪ 跟单目标)
//! - 消费 `copytrade:wallet_control`：resume 订阅，pause 取消订阅
//! - 解析后端推送的交易，发布 TxEvent 并交给跟单编排

use anyhow::Result;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use models::{watched_wallets, ControlEvent, ControlKind, TxEvent};
use services::{
    Bus, BusConsumer, ConsumerOptions, ShutdownSignal, TX_EVENT_CHANNEL, WALLET_CONTROL_CHANNEL,
};
use solana_chain::{ParseError, ParsedTransaction, TransactionSubscriber, WalletNotification};

use crate::orchestrator::CopyTradeOrchestrator;
use crate::store::FollowStore;

/// 钱包监控消费者组
pub const WALLET_MONITOR_GROUP: &str = "wallet-monitor";

pub struct SubscriptionManager {
    subscriber: Arc<dyn TransactionSubscriber>,
    follows: Arc<dyn FollowStore>,
    orchestrator: Arc<CopyTradeOrchestrator>,
    bus: Bus,
    control: Arc<BusConsumer>,
    notifications: Mutex<Option<mpsc::Receiver<WalletNotification>>>,
    running: RwLock<bool>,
    shutdown: ShutdownSignal,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl SubscriptionManager {
    pub fn new(
        subscriber: Arc<dyn TransactionSubscriber>,
        notifications: mpsc::Receiver<WalletNotification>,
        follows: Arc<dyn FollowStore>,
        orchestrator: Arc<CopyTradeOrchestrator>,
        bus: Bus,
        consumer_name: &str,
        options: ConsumerOptions,
    ) -> Self {
        let control_subscriber = subscriber.clone();
        let control = bus
            .consumer(WALLET_CONTROL_CHANNEL, WALLET_MONITOR_GROUP, consumer_name, options)
            .register(move |event: ControlEvent| {
                let subscriber = control_subscriber.clone();
                async move {
                    if let Err(e) = apply_control(subscriber.as_ref(), &event).await {
                        error!(
                            "[Subscription] 处理控制事件 {:?} {} 失败: {:#}",
                            event.event, event.target_wallet, e
                        );
                    }
                    Ok(())
                }
            });

        Self {
            subscriber,
            follows,
            orchestrator,
            bus,
            control: Arc::new(control),
            notifications: Mutex::new(Some(notifications)),
            running: RwLock::new(false),
            shutdown: ShutdownSignal::new(),
            handle: Mutex::new(None),
        }
    }

    pub fn control_consumer(&self) -> &Arc<BusConsumer> {
        &self.control
    }

    /// 订阅全部监控钱包，返回订阅数量
    pub async fn subscribe_watched(&self) -> Result<usize> {
        let targets = self.follows.monitor_targets().await?;
        let follows = self.follows.active_follows().await?;
        let wallets = watched_wallets(&targets, &follows);

        let mut subscribed = 0;
        for wallet in &wallets {
            match self.subscriber.subscribe(wallet).await {
                Ok(()) => subscribed += 1,
                Err(e) => error!("[Subscription] 订阅 {} 失败: {:#}", wallet, e),
            }
        }
        info!(
            "[Subscription] {} 已订阅 {}/{} 个钱包",
            self.subscriber.name(),
            subscribed,
            wallets.len()
        );
        Ok(subscribed)
    }

    /// 启动订阅、控制消费者与通知处理，重复调用无副作用
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                return Ok(());
            }
            *running = true;
            self.shutdown.reset();
        }

        self.subscribe_watched().await?;
        self.subscriber.start().await;
        self.control.start().await;

        let Some(rx) = self.notifications.lock().take() else {
            warn!("[Subscription] 通知通道不可用，交易不会被处理");
            return Ok(());
        };
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            manager.notification_loop(rx).await;
        });
        *self.handle.lock() = Some(handle);
        Ok(())
    }

    async fn notification_loop(&self, mut rx: mpsc::Receiver<WalletNotification>) {
        info!("[Subscription] 交易通知处理已启动");
        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::select! {
                notification = rx.recv() => {
                    match notification {
                        Some(notification) => {
                            self.handle_notification(notification).await;
                        }
                        None => {
                            warn!("[Subscription] 通知通道已关闭");
                            break;
                        }
                    }
                }
                _ = self.shutdown.triggered() => {}
            }
        }
        // 归还接收端，允许再次 start
        *self.notifications.lock() = Some(rx);
        info!("[Subscription] 交易通知处理已停止");
    }

    /// 解析一笔交易并分发，非交易类返回 None
    pub async fn handle_notification(&self, notification: WalletNotification) -> Option<TxEvent> {
        let parsed = ParsedTransaction::new(notification.raw, &notification.wallet);
        let event = match parsed.parse() {
            Ok(event) => event,
            Err(e @ ParseError::UnknownTransactionType(_)) => {
                warn!("[Subscription] {} 交易无法解析: {}", notification.wallet, e);
                return None;
            }
            Err(e) => {
                debug!("[Subscription] {} 跳过: {}", notification.wallet, e);
                return None;
            }
        };

        info!(
            target: "copytrade",
            "[Subscription] {} {} {} {} -> {} ({})",
            event.who,
            event.tx_type.as_str(),
            event.mint,
            event.pre_token_amount,
            event.post_token_amount,
            event.signature
        );

        if let Err(e) = self.bus.produce(TX_EVENT_CHANNEL, &event).await {
            error!("[Subscription] 发布 TxEvent 失败: {}", e);
        }
        if let Err(e) = self.orchestrator.on_tx_event(&event).await {
            error!(target: "copytrade", "[CopyTrade] {} 跟单分发失败: {:#}", event.signature, e);
        }
        Some(event)
    }

    /// 停止全部后台任务，可重复调用
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.shutdown.trigger();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.control.stop().await;
        self.subscriber.stop().await;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

/// 控制事件是权威的：pause 总会取消订阅
pub async fn apply_control(subscriber: &dyn TransactionSubscriber, event: &ControlEvent) -> Result<()> {
    match event.event {
        ControlKind::Resume => {
            subscriber.subscribe(&event.target_wallet).await?;
            info!("[Subscription] 恢复监控 {}", event.target_wallet);
        }
        ControlKind::Pause => {
            subscriber.unsubscribe(&event.target_wallet).await?;
            info!("[Subscription] 暂停监控 {}", event.target_wallet);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::OrchestratorConfig;
    use crate::store::testing::{follow, MemoryBalances, MemoryFollowStore};
    use async_trait::async_trait;
    use config_crate::TradingConfig;
    use models::{MonitorTarget, SwapEvent, SwapOrigin, TxType};
    use services::{MemoryStreamStore, SWAP_EVENT_CHANNEL};
    use solana_chain::RawTransaction;
    use solana_sdk::pubkey::Pubkey;
    use solana_transaction_status::EncodedConfirmedTransactionWithStatusMeta;

    /// 记录订阅调用；钱包 "bad" 订阅失败
    #[derive(Default)]
    struct FakeSubscriber {
        watched: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TransactionSubscriber for FakeSubscriber {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn subscribe(&self, wallet: &str) -> Result<()> {
            if wallet == "bad" {
                anyhow::bail!("subscribe rejected");
            }
            let mut watched = self.watched.lock();
            if !watched.iter().any(|w| w == wallet) {
                watched.push(wallet.to_string());
            }
            Ok(())
        }

        async fn unsubscribe(&self, wallet: &str) -> Result<()> {
            self.watched.lock().retain(|w| w != wallet);
            Ok(())
        }

        async fn start(&self) {}

        async fn stop(&self) {}

        async fn watched(&self) -> Vec<String> {
            self.watched.lock().clone()
        }
    }

    fn options() -> ConsumerOptions {
        ConsumerOptions {
            batch_size: 10,
            poll_timeout_ms: 10,
            visibility_timeout_ms: 60_000,
        }
    }

    struct Harness {
        manager: Arc<SubscriptionManager>,
        subscriber: Arc<FakeSubscriber>,
        follows: Arc<MemoryFollowStore>,
        bus: Bus,
        notify: mpsc::Sender<WalletNotification>,
    }

    fn harness() -> Harness {
        let bus = Bus::new(Arc::new(MemoryStreamStore::new()));
        let subscriber = Arc::new(FakeSubscriber::default());
        let follows = Arc::new(MemoryFollowStore::default());
        let orchestrator = Arc::new(CopyTradeOrchestrator::new(
            OrchestratorConfig::from(&TradingConfig::default()),
            follows.clone(),
            Arc::new(MemoryBalances::default()),
            bus.clone(),
        ));
        let (notify, rx) = mpsc::channel(16);
        let manager = Arc::new(SubscriptionManager::new(
            subscriber.clone(),
            rx,
            follows.clone(),
            orchestrator,
            bus.clone(),
            "monitor-1",
            options(),
        ));
        Harness {
            manager,
            subscriber,
            follows,
            bus,
            notify,
        }
    }

    async fn collect<E: services::BusEvent + Clone>(bus: &Bus, channel: &str) -> Vec<E> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let consumer = bus
            .consumer(channel, "test", "c1", options())
            .register(move |event: E| {
                let sink = sink.clone();
                async move {
                    sink.lock().push(event);
                    Ok(())
                }
            });
        consumer.poll().await.unwrap();
        let events = seen.lock().clone();
        events
    }

    /// 钱包从 0 买入 1,000,000 个代币的 RPC 交易
    fn open_position_tx(wallet: &str, mint: &str) -> RawTransaction {
        let json = serde_json::json!({
            "slot": 100,
            "blockTime": 1_700_000_123,
            "transaction": {
                "signatures": ["4buy"],
                "message": {
                    "accountKeys": [
                        {"pubkey": wallet, "writable": true, "signer": true, "source": "transaction"},
                        {"pubkey": solana_chain::pump_fun::PROGRAM_ID.to_string(), "writable": false, "signer": false, "source": "transaction"}
                    ],
                    "recentBlockhash": "11111111111111111111111111111111",
                    "instructions": [
                        {"programId": solana_chain::pump_fun::PROGRAM_ID.to_string(), "accounts": [], "data": "3Bxs4h24hBtQy9rw"}
                    ]
                }
            },
            "meta": {
                "err": null,
                "status": {"Ok": null},
                "fee": 5000,
                "preBalances": [1_000_000_000u64, 1],
                "postBalances": [949_000_000u64, 1],
                "innerInstructions": [],
                "logMessages": [],
                "preTokenBalances": [],
                "postTokenBalances": [
                    {"accountIndex": 2, "mint": mint, "owner": wallet,
                     "uiTokenAmount": {"amount": "1000000", "decimals": 6, "uiAmount": 1.0, "uiAmountString": "1"}}
                ],
                "rewards": []
            }
        });
        let tx: EncodedConfirmedTransactionWithStatusMeta = serde_json::from_value(json).unwrap();
        RawTransaction::Rpc(Box::new(tx))
    }

    #[tokio::test]
    async fn test_start_subscribes_watched_union() {
        let h = harness();
        h.follows.targets.lock().extend([
            MonitorTarget { id: 1, wallet: "A".to_string(), alias: None, active: true },
            MonitorTarget { id: 2, wallet: "bad".to_string(), alias: None, active: true },
        ]);
        h.follows
            .follows
            .lock()
            .extend([follow(1, "Owner", "A"), follow(2, "Owner", "B")]);

        assert_eq!(h.manager.subscribe_watched().await.unwrap(), 2);
        assert_eq!(h.subscriber.watched().await, vec!["A".to_string(), "B".to_string()]);
    }

    #[tokio::test]
    async fn test_control_events_drive_subscriptions() {
        let h = harness();
        h.follows.follows.lock().push(follow(1, "Owner", "W1"));

        for event in [
            ControlEvent::resume("W1"),
            ControlEvent::resume("bad"),
            ControlEvent::resume("W2"),
            ControlEvent::pause("W1"),
        ] {
            h.bus.produce(WALLET_CONTROL_CHANNEL, &event).await.unwrap();
        }

        let summary = h.manager.control_consumer().poll().await.unwrap();
        assert_eq!(summary.delivered, 4);
        // 失败的控制事件只记录日志，照常确认
        assert_eq!(summary.acked, 4);
        // W1 仍被跟单，pause 依然生效
        assert_eq!(h.subscriber.watched().await, vec!["W2".to_string()]);
    }

    #[tokio::test]
    async fn test_open_position_flows_to_copytrade_swap() {
        let h = harness();
        let wallet = Pubkey::new_unique().to_string();
        let mint = Pubkey::new_unique().to_string();
        h.follows.follows.lock().push(follow(9, "Follower", &wallet));

        let event = h
            .manager
            .handle_notification(WalletNotification {
                wallet: wallet.clone(),
                raw: open_position_tx(&wallet, &mint),
            })
            .await
            .unwrap();
        assert_eq!(event.tx_type, TxType::OpenPosition);
        assert_eq!(event.who, wallet);
        assert_eq!(event.mint, mint);

        let tx_events: Vec<TxEvent> = collect(&h.bus, TX_EVENT_CHANNEL).await;
        assert_eq!(tx_events, vec![event]);

        let swaps: Vec<SwapEvent> = collect(&h.bus, SWAP_EVENT_CHANNEL).await;
        assert_eq!(swaps.len(), 1);
        assert_eq!(swaps[0].origin, SwapOrigin::Copytrade);
        assert_eq!(swaps[0].amount, 50_000_000);
        assert_eq!(swaps[0].output_mint, mint);
    }

    #[tokio::test]
    async fn test_notification_loop_start_stop() {
        let h = harness();
        let wallet = Pubkey::new_unique().to_string();
        let mint = Pubkey::new_unique().to_string();

        h.manager.start().await.unwrap();
        h.manager.start().await.unwrap();
        assert!(h.manager.is_running().await);

        h.notify
            .send(WalletNotification {
                wallet: wallet.clone(),
                raw: open_position_tx(&wallet, &mint),
            })
            .await
            .unwrap();

        let mut tx_events: Vec<TxEvent> = Vec::new();
        for _ in 0..50 {
            tx_events = collect(&h.bus, TX_EVENT_CHANNEL).await;
            if !tx_events.is_empty() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(tx_events.len(), 1);

        h.manager.stop().await;
        h.manager.stop().await;
        assert!(!h.manager.is_running().await);
    }
}
