//! 应用启动引导模块
//!
//! 封装组件装配、后台任务启动和关闭逻辑

use anyhow::{Context, Result};
use config_crate::AppConfig;
use executor::{
    ExecutorConfig, IntentGuard, SwapEventConsumer, SwapExecutor, SwapRecordStore, TradeRouter,
};
use redis::aio::ConnectionManager;
use services::{
    Bus, ConsumerOptions, CopyTradeFollowDb, Database, KeyValueStore, MonitorTargetDb,
    RedisKvStore, RedisStreamStore, SwapRecordDb, WalletDb,
};
use solana_chain::{
    build_subscriber,
    dex::JupiterApi,
    senders::{JitoSender, RelaySender, RpcSender},
    BlockhashCache, LaunchStatusCache, RentExemptCache, SenderKind, SolanaClient,
    SolanaConfig, SubscriptionBackendKind, TransactionSender,
};
use std::sync::Arc;
use std::time::Duration;
use strategies::{CopyTradeOrchestrator, DbFollowStore, SubscriptionManager};
use tracing::{error, info, warn};

/// 应用程序实例
///
/// 管理所有后台组件的生命周期
pub struct Application {
    blockhash: Arc<BlockhashCache>,
    rent: Arc<RentExemptCache>,
    swap_consumer: SwapEventConsumer,
    subscription: Arc<SubscriptionManager>,
}

impl Application {
    /// 初始化并启动应用
    pub async fn start(config: AppConfig) -> Result<Self> {
        let solana_config = SolanaConfig::from_env();
        Self::log_config(&config, &solana_config);

        // 数据库
        info!("初始化数据库连接...");
        let database = Database::new(&config.database.url, config.database.max_connections)
            .await
            .context("connect database")?;
        let pool = database.pool().clone();

        // Redis: 缓存与事件总线共用一个连接管理器
        info!("连接 Redis: {}", config.redis.url);
        let redis_client = redis::Client::open(config.redis.url.as_str())?;
        let conn = ConnectionManager::new(redis_client)
            .await
            .context("connect redis")?;
        let kv: Arc<dyn KeyValueStore> = Arc::new(RedisKvStore::new(conn.clone()));
        let bus = Bus::new(Arc::new(RedisStreamStore::new(conn, config.bus.stream_maxlen)));
        let options = ConsumerOptions::from(&config.bus);

        // Solana RPC
        let client = Arc::new(SolanaClient::new(&solana_config));
        match client.health_check().await {
            Ok(true) => info!("[Solana] RPC 节点正常: {}", solana_config.rpc_url),
            Ok(false) => warn!("[Solana] RPC 节点状态异常: {}", solana_config.rpc_url),
            Err(e) => warn!("[Solana] RPC 健康检查失败: {:#}", e),
        }

        // 链上状态缓存
        let interval = Duration::from_secs(config.cache.update_interval_secs);
        let blockhash = Arc::new(BlockhashCache::new(client.clone(), kv.clone(), interval));
        let rent = Arc::new(RentExemptCache::new(client.clone(), kv.clone(), interval));
        blockhash.start().await;
        rent.start().await;
        match rent.get().await {
            Ok(lamports) => info!("[Cache] token 账户免租余额: {} lamports", lamports),
            Err(e) => warn!("[Cache] 免租余额读取失败: {:#}", e),
        }
        let launch_status = Arc::new(LaunchStatusCache::new(
            client.clone(),
            kv.clone(),
            config.cache.launch_status_ttl_secs,
        ));

        // 交易执行
        let sender = Self::build_sender(&config, &solana_config, client.clone());
        let swap_executor = Arc::new(SwapExecutor::new(
            ExecutorConfig::from(&config.trading),
            client.clone(),
            TradeRouter::new(launch_status),
            Arc::new(WalletDb::new(pool.clone())),
            blockhash.clone(),
            JupiterApi::with_url(&solana_config.jupiter_api_url),
            sender,
        ));
        let records: Arc<dyn SwapRecordStore> = Arc::new(SwapRecordDb::new(pool.clone()));
        let guard = IntentGuard::new(
            kv,
            config.trading.intent_claim_ttl_secs,
            config.trading.max_intent_age_secs,
        );
        let swap_consumer = SwapEventConsumer::new(
            bus.clone(),
            swap_executor,
            Some(records),
            guard,
            &consumer_name("executor"),
            options.clone(),
        );

        // 跟单与钱包订阅
        let follows = Arc::new(DbFollowStore::new(
            MonitorTargetDb::new(pool.clone()),
            CopyTradeFollowDb::new(pool),
        ));
        let orchestrator = Arc::new(CopyTradeOrchestrator::new(
            (&config.trading).into(),
            follows.clone(),
            client.clone(),
            bus.clone(),
        ));
        let (subscriber, notifications) = build_subscriber(
            backend_kind(config.subscription.backend),
            &solana_config,
            client,
        );
        let subscription = Arc::new(SubscriptionManager::new(
            subscriber,
            notifications,
            follows,
            orchestrator,
            bus,
            &consumer_name("monitor"),
            options,
        ));

        swap_consumer.start().await;
        subscription
            .start()
            .await
            .context("start subscription manager")?;

        let app = Self {
            blockhash,
            rent,
            swap_consumer,
            subscription,
        };
        app.log_startup_complete(&config).await;
        Ok(app)
    }

    /// 按启动的相反顺序停止
    pub async fn shutdown(self) -> Result<()> {
        info!("正在停止服务...");

        info!("停止钱包订阅...");
        self.subscription.stop().await;

        info!("停止交易消费者...");
        self.swap_consumer.stop().await;

        self.rent.stop().await;
        self.blockhash.stop().await;

        info!("系统已停止");
        Ok(())
    }

    // ========== 私有辅助方法 ==========

    fn log_config(config: &AppConfig, solana_config: &SolanaConfig) {
        info!("配置加载成功");
        info!("========================================");
        info!("  RPC: {}", solana_config.rpc_url);
        info!("  WS:  {}", solana_config.ws_url);
        info!("  订阅后端: {:?}", config.subscription.backend);
        info!("  发送通道: {:?}", config.trading.sender);
        info!("========================================");
        info!("默认优先费: {} SOL", config.trading.default_priority_fee_sol);
        info!("默认滑点: {} bps", config.trading.default_slippage_bps);
        info!("防夹滑点: {} bps", config.trading.anti_sandwich_slippage_bps);
        info!("发送前模拟: {}", config.trading.simulate_before_send);
        info!(
            "意图有效期: {}s, 确认超时: {}s",
            config.trading.max_intent_age_secs, config.trading.confirm_timeout_secs
        );
        info!(
            "事件总线: batch={}, block={}ms, visibility={}ms",
            config.bus.batch_size, config.bus.poll_timeout_ms, config.bus.visibility_timeout_ms
        );
    }

    fn build_sender(
        config: &AppConfig,
        solana_config: &SolanaConfig,
        client: Arc<SolanaClient>,
    ) -> Arc<dyn TransactionSender> {
        match sender_kind(config.trading.sender) {
            SenderKind::Rpc => Arc::new(RpcSender::new(client)),
            SenderKind::Jito => Arc::new(JitoSender::new(
                &solana_config.jito_block_engine_url,
                config.trading.jito_tip_lamports,
            )),
            SenderKind::Relay => {
                if solana_config.relay_api_key.is_none() {
                    warn!("[Sender] RELAY_API_KEY 未设置，转发服务可能拒绝请求");
                }
                Arc::new(RelaySender::new(
                    &solana_config.relay_api_url,
                    solana_config.relay_api_key.clone(),
                    client,
                ))
            }
        }
    }

    async fn log_startup_complete(&self, config: &AppConfig) {
        info!("========================================");
        info!("  系统启动完成");
        info!(
            "  钱包订阅: {}",
            if self.subscription.is_running().await {
                "已启动"
            } else {
                "未启动"
            }
        );
        info!("  交易消费者: 已启动");
        info!("  缓存更新间隔: {}s", config.cache.update_interval_secs);
        info!("========================================");
    }
}

/// 消费者名称，同组内多个进程按 pid 区分
fn consumer_name(role: &str) -> String {
    format!("{}-{}", role, std::process::id())
}

fn sender_kind(kind: config_crate::SenderKind) -> SenderKind {
    match kind {
        config_crate::SenderKind::Rpc => SenderKind::Rpc,
        config_crate::SenderKind::Jito => SenderKind::Jito,
        config_crate::SenderKind::Relay => SenderKind::Relay,
    }
}

fn backend_kind(kind: config_crate::SubscriptionBackendKind) -> SubscriptionBackendKind {
    match kind {
        config_crate::SubscriptionBackendKind::Logs => SubscriptionBackendKind::Logs,
        config_crate::SubscriptionBackendKind::Geyser => SubscriptionBackendKind::Geyser,
    }
}

/// 设置全局 panic hook
pub fn setup_panic_hook() {
    std::panic::set_hook(Box::new(|panic_info| {
        error!("========================================");
        error!("!!! 系统发生 PANIC !!!");
        error!("========================================");
        error!("Panic 信息: {:?}", panic_info);
        if let Some(location) = panic_info.location() {
            error!(
                "发生位置: {}:{}:{}",
                location.file(),
                location.line(),
                location.column()
            );
        }
        if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            error!("Panic 消息: {}", s);
        }
        error!("========================================");
    }));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_kinds_map_to_chain_kinds() {
        assert_eq!(sender_kind(config_crate::SenderKind::Jito), SenderKind::Jito);
        assert_eq!(sender_kind(config_crate::SenderKind::Relay), SenderKind::Relay);
        assert_eq!(
            backend_kind(config_crate::SubscriptionBackendKind::Geyser),
            SubscriptionBackendKind::Geyser
        );
    }

    #[test]
    fn test_consumer_name_carries_role() {
        assert!(consumer_name("executor").starts_with("executor-"));
    }
}
