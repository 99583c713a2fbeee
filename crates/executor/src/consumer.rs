//! 交易意图消费者
//!
//! 从 `copytrade:swap_events` 读取 SwapEvent，执行后把 SwapResult 发布到
//! `copytrade:swap_results`。每个意图先在键值存储中认领，重投的同一意图只执行一次。
//! 路由/构建类错误以及发送阶段的任何错误对该意图是终态，直接确认并发布带错误的结果；
//! 发送前的网络类错误释放认领且不确认，等待超时后重新认领。

use anyhow::Result;
use std::sync::Arc;
use tracing::{error, info, warn};

use models::{SwapEvent, SwapResult};
use services::{
    Bus, BusConsumer, ConsumerOptions, KeyValueStore, SWAP_EVENT_CHANNEL, SWAP_RESULT_CHANNEL,
};

use crate::executor::SwapHandler;
use crate::wallet::SwapRecordStore;

/// 执行器消费者组
pub const SWAP_EXECUTOR_GROUP: &str = "trade-executor";

const INTENT_KEY_PREFIX: &str = "swap_intent";

/// 意图认领与过期判断
pub struct IntentGuard {
    store: Arc<dyn KeyValueStore>,
    claim_ttl_secs: u64,
    /// 0 表示不检查
    max_age_secs: u64,
}

impl IntentGuard {
    pub fn new(store: Arc<dyn KeyValueStore>, claim_ttl_secs: u64, max_age_secs: u64) -> Self {
        Self {
            store,
            claim_ttl_secs,
            max_age_secs,
        }
    }

    fn key(event: &SwapEvent) -> String {
        format!("{}:{}", INTENT_KEY_PREFIX, event.intent_id())
    }

    /// 认领意图，已被认领时返回 false
    pub async fn claim(&self, event: &SwapEvent) -> Result<bool> {
        let claimed_at = utils::now_millis().to_string();
        self.store
            .set_nx_ex(&Self::key(event), &claimed_at, self.claim_ttl_secs)
            .await
    }

    /// 释放认领，允许重投时再次执行
    pub async fn release(&self, event: &SwapEvent) -> Result<()> {
        self.store.delete(&Self::key(event)).await
    }

    pub fn is_expired(&self, event: &SwapEvent, now_secs: i64) -> bool {
        self.max_age_secs > 0 && now_secs.saturating_sub(event.timestamp) > self.max_age_secs as i64
    }
}

pub struct SwapEventConsumer {
    consumer: Arc<BusConsumer>,
}

impl SwapEventConsumer {
    pub fn new(
        bus: Bus,
        executor: Arc<dyn SwapHandler>,
        records: Option<Arc<dyn SwapRecordStore>>,
        guard: IntentGuard,
        consumer_name: &str,
        options: ConsumerOptions,
    ) -> Self {
        let publisher = bus.clone();
        let guard = Arc::new(guard);
        let consumer = bus
            .consumer(SWAP_EVENT_CHANNEL, SWAP_EXECUTOR_GROUP, consumer_name, options)
            .register(move |event: SwapEvent| {
                let executor = executor.clone();
                let publisher = publisher.clone();
                let records = records.clone();
                let guard = guard.clone();
                async move {
                    handle_swap_event(
                        executor.as_ref(),
                        &publisher,
                        records.as_deref(),
                        &guard,
                        event,
                    )
                    .await
                }
            });
        Self {
            consumer: Arc::new(consumer),
        }
    }

    pub async fn start(&self) {
        self.consumer.start().await;
        info!(target: "trade_executor", "[Executor] 交易意图消费者已启动");
    }

    pub async fn stop(&self) {
        self.consumer.stop().await;
        info!(target: "trade_executor", "[Executor] 交易意图消费者已停止");
    }

    pub fn consumer(&self) -> &Arc<BusConsumer> {
        &self.consumer
    }
}

fn failed_result(event: SwapEvent, transaction_hash: Option<String>, error: String) -> SwapResult {
    SwapResult {
        user_pubkey: event.user_pubkey.clone(),
        submit_time: utils::now_millis(),
        transaction_hash,
        blocks_passed: None,
        error: Some(error),
        event,
    }
}

async fn handle_swap_event(
    executor: &dyn SwapHandler,
    bus: &Bus,
    records: Option<&dyn SwapRecordStore>,
    guard: &IntentGuard,
    event: SwapEvent,
) -> Result<()> {
    // 认领失败不确认，稍后重试
    if !guard.claim(&event).await? {
        info!(
            target: "trade_executor",
            "[Executor] 意图 {} 已处理过，跳过重复投递",
            event.intent_id()
        );
        return Ok(());
    }

    let now = utils::now_secs();
    if guard.is_expired(&event, now) {
        warn!(
            target: "trade_executor",
            "[Executor] {} {} -> {} 意图已过期 ({}s)，不执行",
            event.user_pubkey, event.input_mint, event.output_mint, now - event.timestamp
        );
        let error = format!("Intent expired: created {}s ago", now - event.timestamp);
        publish_result(bus, records, &failed_result(event, None, error)).await;
        return Ok(());
    }

    let result = match executor.execute(&event).await {
        Ok(result) => result,
        Err(e) if e.is_terminal() => {
            error!(
                target: "trade_executor",
                "[Executor] {} {} -> {} 执行失败: {}",
                event.user_pubkey, event.input_mint, event.output_mint, e
            );
            let hash = e.signature().map(String::from);
            failed_result(event, hash, e.to_string())
        }
        Err(e) => {
            warn!(
                target: "trade_executor",
                "[Executor] {} {} -> {} 暂时失败，等待重投: {}",
                event.user_pubkey, event.input_mint, event.output_mint, e
            );
            if let Err(release_err) = guard.release(&event).await {
                error!(
                    target: "trade_executor",
                    "[Executor] 释放意图 {} 失败，重投将被跳过: {:#}",
                    event.intent_id(), release_err
                );
            }
            return Err(e.into());
        }
    };

    publish_result(bus, records, &result).await;
    Ok(())
}

/// 交易已提交后不再返回错误，避免重投导致重复下单
async fn publish_result(bus: &Bus, records: Option<&dyn SwapRecordStore>, result: &SwapResult) {
    if let Err(e) = bus.produce(SWAP_RESULT_CHANNEL, result).await {
        error!(target: "trade_executor", "[Executor] 发布交易结果失败: {}", e);
    }
    if let Some(records) = records {
        if let Err(e) = records.save(result).await {
            error!(target: "trade_executor", "[Executor] 保存交易记录失败: {:#}", e);
        }
    }
}
