//! 跟单编排
//!
//! 监控钱包产生一笔交易后，为每个启用的跟单配置生成一笔 SwapEvent 并发布到总线。
//! 单个跟单者的失败只记录日志，不影响其他跟单者。

use anyhow::Result;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, error, info};

use config_crate::TradingConfig;
use models::{
    CopyTradeFollow, SlippageMode, SwapEvent, SwapMode, SwapOrigin, TxDirection, TxEvent, TxType,
};
use services::{Bus, SWAP_EVENT_CHANNEL};
use solana_chain::WSOL;

use crate::store::{FollowStore, TokenBalanceSource};

const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// 自动滑点 (bps)
    pub default_slippage_bps: u16,
    /// 防夹滑点 (bps)
    pub anti_sandwich_slippage_bps: u16,
}

impl From<&TradingConfig> for OrchestratorConfig {
    fn from(config: &TradingConfig) -> Self {
        Self {
            default_slippage_bps: config.default_slippage_bps,
            anti_sandwich_slippage_bps: config.anti_sandwich_slippage_bps,
        }
    }
}

/// 一次分发的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub published: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct CopyTradeOrchestrator {
    config: OrchestratorConfig,
    follows: Arc<dyn FollowStore>,
    balances: Arc<dyn TokenBalanceSource>,
    bus: Bus,
}

impl CopyTradeOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        follows: Arc<dyn FollowStore>,
        balances: Arc<dyn TokenBalanceSource>,
        bus: Bus,
    ) -> Self {
        Self {
            config,
            follows,
            balances,
            bus,
        }
    }

    /// 处理监控钱包的一笔交易
    pub async fn on_tx_event(&self, event: &TxEvent) -> Result<DispatchSummary> {
        let follows = self.follows.follows_of(&event.who).await?;
        let mut summary = DispatchSummary::default();

        for follow in follows.iter().filter(|f| f.active) {
            match self.synthesize(follow, event).await {
                Ok(Some(swap)) => match self.bus.produce(SWAP_EVENT_CHANNEL, &swap).await {
                    Ok(id) => {
                        summary.published += 1;
                        info!(
                            target: "copytrade",
                            "[CopyTrade] 跟单 #{} {} {:?} {} amount={} ({})",
                            follow.id, follow.owner, event.tx_direction, event.mint, swap.amount, id
                        );
                    }
                    Err(e) => {
                        summary.failed += 1;
                        error!(target: "copytrade", "[CopyTrade] 跟单 #{} 发布失败: {}", follow.id, e);
                    }
                },
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    summary.failed += 1;
                    error!(target: "copytrade", "[CopyTrade] 跟单 #{} 生成失败: {:#}", follow.id, e);
                }
            }
        }

        debug!(
            target: "copytrade",
            "[CopyTrade] {} {} 分发完成: {:?}",
            event.who, event.signature, summary
        );
        Ok(summary)
    }

    fn slippage_bps(&self, follow: &CopyTradeFollow) -> u16 {
        match follow.slippage_mode() {
            SlippageMode::Auto => self.config.default_slippage_bps,
            SlippageMode::Custom(bps) => bps,
            SlippageMode::AntiSandwich => self.config.anti_sandwich_slippage_bps,
        }
    }

    /// 为单个跟单者生成交易意图，不需要跟单时返回 None
    pub async fn synthesize(
        &self,
        follow: &CopyTradeFollow,
        event: &TxEvent,
    ) -> Result<Option<SwapEvent>> {
        let (input_mint, output_mint, amount, ui_amount) = match event.tx_direction {
            TxDirection::Buy => {
                let lamports = buy_amount(follow, event);
                (
                    WSOL.to_string(),
                    event.mint.clone(),
                    lamports,
                    lamports as f64 / LAMPORTS_PER_SOL as f64,
                )
            }
            TxDirection::Sell => {
                if follow.no_sell {
                    debug!(target: "copytrade", "[CopyTrade] 跟单 #{} 只买不卖，跳过", follow.id);
                    return Ok(None);
                }
                let balance = self.balances.token_balance(&follow.owner, &event.mint).await?;
                let amount = sell_amount(follow, event, balance);
                (
                    event.mint.clone(),
                    WSOL.to_string(),
                    amount,
                    amount as f64 / 10f64.powi(event.decimals as i32),
                )
            }
        };

        if amount == 0 {
            debug!(
                target: "copytrade",
                "[CopyTrade] 跟单 #{} {:?} 数量为 0，跳过",
                follow.id, event.tx_direction
            );
            return Ok(None);
        }

        Ok(Some(SwapEvent {
            user_pubkey: follow.owner.clone(),
            swap_mode: SwapMode::ExactIn,
            input_mint,
            output_mint,
            amount,
            ui_amount,
            timestamp: utils::now_secs(),
            slippage_bps: self.slippage_bps(follow),
            priority_fee: follow.priority_fee(),
            program_id: event.program_id.clone(),
            origin: SwapOrigin::Copytrade,
            tx_event: Some(event.clone()),
            by: Some(follow.id.to_string()),
        }))
    }
}

/// 买入 lamports：固定金额，或按目标花费的 SOL 乘以比例
pub fn buy_amount(follow: &CopyTradeFollow, event: &TxEvent) -> u64 {
    let lamports = if follow.is_fixed_buy {
        follow.fixed_buy_amount * Decimal::from(LAMPORTS_PER_SOL)
    } else {
        Decimal::from(event.sol_change.unsigned_abs()) * follow.fixed_buy_amount
    };
    lamports.floor().to_u64().unwrap_or(0)
}

/// 卖出数量：止损或目标清仓时全部卖出，否则按目标卖出比例
pub fn sell_amount(follow: &CopyTradeFollow, event: &TxEvent, balance: u64) -> u64 {
    if balance == 0 {
        return 0;
    }
    if follow.stop_loss || event.tx_type == TxType::ClosePosition || event.pre_token_amount == 0 {
        return balance;
    }
    let sold = event.pre_token_amount.saturating_sub(event.post_token_amount) as u128;
    let amount = balance as u128 * sold / event.pre_token_amount as u128;
    amount.min(balance as u128) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::testing::{follow, MemoryBalances, MemoryFollowStore};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use services::MemoryStreamStore;

    const LEADER: &str = "Leader1111";
    const MINT: &str = "Mint1111pump";

    fn config() -> OrchestratorConfig {
        OrchestratorConfig::from(&TradingConfig::default())
    }

    fn tx_event(direction: TxDirection, tx_type: TxType, pre: u64, post: u64) -> TxEvent {
        TxEvent {
            signature: "sig".to_string(),
            block_time: 1_700_000_000,
            who: LEADER.to_string(),
            mint: MINT.to_string(),
            tx_direction: direction,
            tx_type,
            pre_token_amount: pre,
            post_token_amount: post,
            decimals: 6,
            sol_change: match direction {
                TxDirection::Buy => -2_000_000_000,
                TxDirection::Sell => 1_000_000_000,
            },
            program_id: Some(solana_chain::pump_fun::PROGRAM_ID.to_string()),
        }
    }

    struct Harness {
        orchestrator: CopyTradeOrchestrator,
        follows: Arc<MemoryFollowStore>,
        balances: Arc<MemoryBalances>,
        bus: Bus,
    }

    fn harness() -> Harness {
        let follows = Arc::new(MemoryFollowStore::default());
        let balances = Arc::new(MemoryBalances::default());
        let bus = Bus::new(Arc::new(MemoryStreamStore::new()));
        Harness {
            orchestrator: CopyTradeOrchestrator::new(
                config(),
                follows.clone(),
                balances.clone(),
                bus.clone(),
            ),
            follows,
            balances,
            bus,
        }
    }

    async fn published(bus: &Bus) -> Vec<SwapEvent> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let consumer = bus
            .consumer(SWAP_EVENT_CHANNEL, "test", "c1", Default::default())
            .register(move |event: SwapEvent| {
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

    #[test]
    fn test_buy_amount_fixed_and_proportional() {
        let event = tx_event(TxDirection::Buy, TxType::OpenPosition, 0, 1_000_000);
        let mut f = follow(1, "Owner", LEADER);
        assert_eq!(buy_amount(&f, &event), 50_000_000);

        f.is_fixed_buy = false;
        f.fixed_buy_amount = dec!(0.5);
        assert_eq!(buy_amount(&f, &event), 1_000_000_000);

        f.fixed_buy_amount = dec!(-1);
        assert_eq!(buy_amount(&f, &event), 0);
    }

    #[test]
    fn test_sell_amount_policy() {
        let mut f = follow(1, "Owner", LEADER);
        let reduce = tx_event(TxDirection::Sell, TxType::ReducePosition, 1_000, 750);
        assert_eq!(sell_amount(&f, &reduce, 400), 100);
        assert_eq!(sell_amount(&f, &reduce, 0), 0);

        let close = tx_event(TxDirection::Sell, TxType::ClosePosition, 1_000, 0);
        assert_eq!(sell_amount(&f, &close, 400), 400);

        f.stop_loss = true;
        assert_eq!(sell_amount(&f, &reduce, 400), 400);
    }

    #[tokio::test]
    async fn test_fixed_buy_publishes_swap_event() {
        let h = harness();
        h.follows.follows.lock().push(follow(7, "Owner", LEADER));
        h.follows.follows.lock().push(follow(8, "Other", "SomeoneElse"));

        let event = tx_event(TxDirection::Buy, TxType::OpenPosition, 0, 1_000_000);
        let summary = h.orchestrator.on_tx_event(&event).await.unwrap();
        assert_eq!(summary.published, 1);

        let events = published(&h.bus).await;
        assert_eq!(events.len(), 1);
        let swap = &events[0];
        assert_eq!(swap.origin, SwapOrigin::Copytrade);
        assert_eq!(swap.amount, 50_000_000);
        assert_eq!(swap.user_pubkey, "Owner");
        assert_eq!(swap.input_mint, WSOL);
        assert_eq!(swap.output_mint, MINT);
        assert_eq!(swap.swap_mode, SwapMode::ExactIn);
        assert_eq!(swap.slippage_bps, 2_500);
        assert_eq!(swap.by.as_deref(), Some("7"));
        assert_eq!(swap.program_id, event.program_id);
        assert_eq!(swap.tx_event.as_ref(), Some(&event));
    }

    #[tokio::test]
    async fn test_sell_skips_buy_only_and_empty_holders() {
        let h = harness();
        let mut buy_only = follow(1, "BuyOnly", LEADER);
        buy_only.no_sell = true;
        h.follows.follows.lock().extend([
            buy_only,
            follow(2, "Empty", LEADER),
            follow(3, "Holder", LEADER),
        ]);
        h.balances.set("BuyOnly", MINT, 1_000);
        h.balances.set("Holder", MINT, 1_000);

        let event = tx_event(TxDirection::Sell, TxType::ReducePosition, 1_000, 500);
        let summary = h.orchestrator.on_tx_event(&event).await.unwrap();
        assert_eq!(
            summary,
            DispatchSummary {
                published: 1,
                skipped: 2,
                failed: 0
            }
        );

        let events = published(&h.bus).await;
        assert_eq!(events[0].user_pubkey, "Holder");
        assert_eq!(events[0].amount, 500);
        assert_eq!(events[0].input_mint, MINT);
        assert_eq!(events[0].output_mint, WSOL);
        assert!((events[0].ui_amount - 0.0005).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_follower_failure_is_isolated() {
        let h = harness();
        h.follows
            .follows
            .lock()
            .extend([follow(1, "broken", LEADER), follow(2, "Holder", LEADER)]);
        h.balances.set("Holder", MINT, 80);

        let event = tx_event(TxDirection::Sell, TxType::ClosePosition, 1_000, 0);
        let summary = h.orchestrator.on_tx_event(&event).await.unwrap();
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.published, 1);
        assert_eq!(published(&h.bus).await[0].amount, 80);
    }

    #[tokio::test]
    async fn test_slippage_modes() {
        let h = harness();
        let mut f = follow(1, "Owner", LEADER);
        let event = tx_event(TxDirection::Buy, TxType::OpenPosition, 0, 10);

        f.anti_sandwich = true;
        let swap = h.orchestrator.synthesize(&f, &event).await.unwrap().unwrap();
        assert_eq!(swap.slippage_bps, 1_000);

        f.anti_sandwich = false;
        f.auto_follow = false;
        f.custom_slippage = dec!(3);
        f.priority = dec!(0.002);
        let swap = h.orchestrator.synthesize(&f, &event).await.unwrap().unwrap();
        assert_eq!(swap.slippage_bps, 300);
        assert_eq!(swap.priority_fee, Some(0.002));
    }
}
