//! 交易执行器
//!
//! 路由 -> 加载钱包 -> 构建交易 -> (可选) 模拟 -> 发送 -> 等待确认。
//! 买入的 `amount` 为 lamports，卖出的 `amount` 为代币最小单位。
//! 发送之后的任何错误都带上交易签名返回，由调用方确认而不是重试。

use async_trait::async_trait;
use solana_chain::{
    dex::{self, jupiter::JupiterApi, pump_amm as amm_ix, pump_fun as curve_ix},
    layouts::{AccountLayout, AmmGlobalConfig, BondingCurve, PumpAmmPool},
    types::{pump_amm, pump_fun, WSOL, WSOL_MINT},
    BlockhashCache, SendError, TransactionSender, TxStatus,
};
use solana_sdk::{
    account::Account,
    instruction::Instruction,
    pubkey::Pubkey,
    signature::{Keypair, Signature},
    signer::Signer,
    transaction::VersionedTransaction,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use config_crate::TradingConfig;
use models::{SwapEvent, SwapMode, SwapResult};

use crate::builder::{assemble_transaction, resign_transaction, ComputeBudget};
use crate::router::TradeRouter;
use crate::rpc::ChainRpc;
use crate::types::{ExecutionError, Route};
use crate::wallet::{keypair_from_base58, WalletStore};

/// 区块哈希的有效区块数
const BLOCKHASH_VALID_BLOCKS: u64 = 150;

const CONFIRM_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// 执行器配置
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// 意图未指定优先费时使用 (SOL)
    pub default_priority_fee_sol: f64,
    pub compute_unit_limit: u32,
    /// 发送前模拟
    pub simulate_before_send: bool,
    /// 等待确认的最长时间，超时后结果不带区块数
    pub confirm_timeout: Duration,
    pub confirm_poll_interval: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&TradingConfig::default())
    }
}

impl From<&TradingConfig> for ExecutorConfig {
    fn from(config: &TradingConfig) -> Self {
        Self {
            default_priority_fee_sol: config.default_priority_fee_sol,
            compute_unit_limit: config.default_compute_unit_limit,
            simulate_before_send: config.simulate_before_send,
            confirm_timeout: Duration::from_secs(config.confirm_timeout_secs),
            confirm_poll_interval: CONFIRM_POLL_INTERVAL,
        }
    }
}

/// 执行一笔交易意图
#[async_trait]
pub trait SwapHandler: Send + Sync {
    async fn execute(&self, event: &SwapEvent) -> Result<SwapResult, ExecutionError>;
}

fn rpc_error(e: anyhow::Error) -> ExecutionError {
    ExecutionError::Rpc(format!("{:#}", e))
}

fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey, ExecutionError> {
    Pubkey::from_str(value).map_err(|_| ExecutionError::InvalidInput(format!("{} {}", what, value)))
}

enum Confirmation {
    Confirmed(Option<u64>),
    Failed(String),
    TimedOut,
}

/// 交易执行器
pub struct SwapExecutor {
    config: ExecutorConfig,
    rpc: Arc<dyn ChainRpc>,
    router: TradeRouter,
    wallets: Arc<dyn WalletStore>,
    blockhash: Arc<BlockhashCache>,
    jupiter: JupiterApi,
    sender: Arc<dyn TransactionSender>,
}

impl SwapExecutor {
    pub fn new(
        config: ExecutorConfig,
        rpc: Arc<dyn ChainRpc>,
        router: TradeRouter,
        wallets: Arc<dyn WalletStore>,
        blockhash: Arc<BlockhashCache>,
        jupiter: JupiterApi,
        sender: Arc<dyn TransactionSender>,
    ) -> Self {
        info!(
            target: "trade_executor",
            "[Executor] 初始化完成: sender={}, simulate={}",
            sender.name(),
            config.simulate_before_send
        );
        Self {
            config,
            rpc,
            router,
            wallets,
            blockhash,
            jupiter,
            sender,
        }
    }

    fn compute_budget(&self, event: &SwapEvent) -> ComputeBudget {
        let priority_fee = event
            .priority_fee
            .unwrap_or(self.config.default_priority_fee_sol);
        ComputeBudget::from_priority_fee(priority_fee, self.config.compute_unit_limit)
    }

    async fn load_keypair(&self, user_pubkey: &str) -> Result<Keypair, ExecutionError> {
        let secret = self
            .wallets
            .private_key(user_pubkey)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| ExecutionError::WalletNotFound(user_pubkey.to_string()))?;
        let keypair = keypair_from_base58(&secret)
            .map_err(|e| ExecutionError::Build(format!("wallet {}: {:#}", user_pubkey, e)))?;
        if keypair.pubkey().to_string() != user_pubkey {
            return Err(ExecutionError::Build(format!(
                "stored key does not belong to {}",
                user_pubkey
            )));
        }
        Ok(keypair)
    }

    async fn fetch_account(&self, pubkey: &Pubkey, what: &str) -> Result<Account, ExecutionError> {
        self.rpc
            .account(pubkey)
            .await
            .map_err(rpc_error)?
            .ok_or_else(|| ExecutionError::NoRouteFound(format!("{} {} not found", what, pubkey)))
    }

    async fn with_blockhash(
        &self,
        payer: &Keypair,
        budget: &ComputeBudget,
        core: Vec<Instruction>,
    ) -> Result<VersionedTransaction, ExecutionError> {
        let blockhash = self.blockhash.get().await.map_err(rpc_error)?;
        assemble_transaction(payer, budget, core, self.sender.tip_lamports(), blockhash)
    }

    /// pump.fun 联合曲线交易
    async fn build_bonding_curve(
        &self,
        event: &SwapEvent,
        payer: &Keypair,
        mint: Pubkey,
        budget: &ComputeBudget,
    ) -> Result<VersionedTransaction, ExecutionError> {
        let user = payer.pubkey();
        let mint_account = self.fetch_account(&mint, "mint").await?;
        let curve_address = pump_fun::bonding_curve(&mint);
        let curve_account = self.fetch_account(&curve_address, "bonding curve").await?;
        let curve = BondingCurve::decode(&curve_account.data)?;
        if curve.complete {
            return Err(ExecutionError::NoRouteFound(format!(
                "bonding curve of {} is complete",
                mint
            )));
        }

        let accounts = curve_ix::CurveAccounts {
            mint,
            creator: curve.creator,
            token_program: mint_account.owner,
        };

        let core = if event.input_mint == WSOL {
            let expected = curve_ix::quote_buy(&curve, event.amount);
            if expected == 0 {
                return Err(ExecutionError::NoRouteFound(format!(
                    "bonding curve of {} returns nothing for {} lamports",
                    mint, event.amount
                )));
            }
            let min_tokens_out = dex::min_amount_with_slippage(expected, event.slippage_bps);
            debug!(
                target: "trade_executor",
                "[Executor] 联合曲线买入 {}: {} lamports -> 预计 {} (最少 {})",
                mint, event.amount, expected, min_tokens_out
            );
            vec![
                dex::create_ata_idempotent(&user, &mint, &mint_account.owner),
                curve_ix::buy_exact_sol_in(&user, &accounts, event.amount, min_tokens_out)
                    .map_err(|e| ExecutionError::Build(format!("{:#}", e)))?,
            ]
        } else {
            let expected = curve_ix::quote_sell(&curve, event.amount);
            let min_sol_output = dex::min_amount_with_slippage(expected, event.slippage_bps);
            debug!(
                target: "trade_executor",
                "[Executor] 联合曲线卖出 {}: {} -> 预计 {} lamports (最少 {})",
                mint, event.amount, expected, min_sol_output
            );
            vec![curve_ix::sell(&user, &accounts, event.amount, min_sol_output)
                .map_err(|e| ExecutionError::Build(format!("{:#}", e)))?]
        };

        self.with_blockhash(payer, budget, core).await
    }

    /// pump AMM 标准池交易
    async fn build_amm(
        &self,
        event: &SwapEvent,
        payer: &Keypair,
        mint: Pubkey,
        budget: &ComputeBudget,
    ) -> Result<VersionedTransaction, ExecutionError> {
        let user = payer.pubkey();
        let mint_account = self.fetch_account(&mint, "mint").await?;
        let pool_address = pump_amm::canonical_pool(&mint);
        let pool_account = self.fetch_account(&pool_address, "pump AMM pool").await?;
        let pool = PumpAmmPool::decode(&pool_account.data)?;
        let global_account = self
            .fetch_account(&pump_amm::GLOBAL_CONFIG, "pump AMM global config")
            .await?;
        let fee_bps = AmmGlobalConfig::decode(&global_account.data)?.total_fee_bps();

        let base_reserve = self
            .rpc
            .token_balance(&pool.pool_base_token_account)
            .await
            .map_err(rpc_error)?;
        let quote_reserve = self
            .rpc
            .token_balance(&pool.pool_quote_token_account)
            .await
            .map_err(rpc_error)?;

        let accounts = amm_ix::PoolAccounts {
            pool: pool_address,
            state: pool,
            base_token_program: mint_account.owner,
        };
        let build_err = |e: anyhow::Error| ExecutionError::Build(format!("{:#}", e));

        let mut core = Vec::new();
        if event.input_mint == WSOL {
            let expected = amm_ix::quote_buy(base_reserve, quote_reserve, event.amount, fee_bps);
            if expected == 0 {
                return Err(ExecutionError::NoRouteFound(format!(
                    "pump AMM pool of {} returns nothing for {} lamports",
                    mint, event.amount
                )));
            }
            let min_base_out = dex::min_amount_with_slippage(expected, event.slippage_bps);
            debug!(
                target: "trade_executor",
                "[Executor] AMM 买入 {}: {} lamports -> 预计 {} (最少 {}, 费率 {} bps)",
                mint, event.amount, expected, min_base_out, fee_bps
            );
            core.push(dex::create_ata_idempotent(&user, &mint, &mint_account.owner));
            core.extend(dex::wrap_sol_instructions(&user, event.amount).map_err(build_err)?);
            core.push(
                amm_ix::buy_exact_quote_in(&user, &accounts, event.amount, min_base_out)
                    .map_err(build_err)?,
            );
        } else {
            let expected = amm_ix::quote_sell(base_reserve, quote_reserve, event.amount, fee_bps);
            let min_quote_out = dex::min_amount_with_slippage(expected, event.slippage_bps);
            debug!(
                target: "trade_executor",
                "[Executor] AMM 卖出 {}: {} -> 预计 {} lamports (最少 {}, 费率 {} bps)",
                mint, event.amount, expected, min_quote_out, fee_bps
            );
            core.push(dex::create_ata_idempotent(&user, &WSOL_MINT, &spl_token::id()));
            core.push(
                amm_ix::sell(&user, &accounts, event.amount, min_quote_out).map_err(build_err)?,
            );
        }
        core.push(dex::unwrap_sol_instruction(&user).map_err(build_err)?);

        self.with_blockhash(payer, budget, core).await
    }

    /// Jupiter 聚合器交易
    async fn build_aggregator(
        &self,
        event: &SwapEvent,
        payer: &Keypair,
        budget: &ComputeBudget,
    ) -> Result<VersionedTransaction, ExecutionError> {
        let input_mint = parse_pubkey(&event.input_mint, "input mint")?;
        let output_mint = parse_pubkey(&event.output_mint, "output mint")?;

        let quote = self
            .jupiter
            .get_quote(
                &input_mint,
                &output_mint,
                event.amount,
                event.slippage_bps,
                event.swap_mode,
            )
            .await
            .map_err(|e| ExecutionError::NoRouteFound(format!("{:#}", e)))?;
        debug!(
            target: "trade_executor",
            "[Executor] Jupiter 报价 {} -> {}: in={} out={}",
            input_mint, output_mint, quote.in_amount, quote.out_amount
        );

        let swap = self
            .jupiter
            .get_swap_transaction(quote, &payer.pubkey(), Some(budget.unit_price_micro_lamports))
            .await
            .map_err(|e| ExecutionError::Build(format!("{:#}", e)))?;
        let tx = swap
            .decode_transaction()
            .map_err(|e| ExecutionError::Build(format!("{:#}", e)))?;

        if self.sender.tip_lamports().is_some() {
            warn!(
                target: "trade_executor",
                "[Executor] 聚合器交易无法附加小费，{} 可能拒绝该交易",
                self.sender.name()
            );
        }
        resign_transaction(payer, tx)
    }

    /// 发送通道不提供状态查询时改查节点
    async fn poll_status(
        &self,
        signature: &Signature,
        last_valid_block_height: u64,
    ) -> anyhow::Result<TxStatus> {
        match self.sender.status(signature, last_valid_block_height).await {
            Err(SendError::Unsupported(_)) => {}
            other => return Ok(other?),
        }
        let status = match self.rpc.signature_status(signature).await? {
            Some(Ok(())) => TxStatus::Confirmed,
            Some(Err(reason)) => TxStatus::Failed(reason),
            None => {
                if self.rpc.block_height().await? > last_valid_block_height {
                    TxStatus::Expired
                } else {
                    TxStatus::Pending
                }
            }
        };
        Ok(status)
    }

    async fn confirm(&self, signature: &Signature, submit_height: u64) -> Confirmation {
        let last_valid = submit_height + BLOCKHASH_VALID_BLOCKS;
        let deadline = Instant::now() + self.config.confirm_timeout;

        loop {
            match self.poll_status(signature, last_valid).await {
                Ok(TxStatus::Confirmed) => {
                    let blocks = match self.rpc.block_height().await {
                        Ok(height) => Some(height.saturating_sub(submit_height)),
                        Err(e) => {
                            warn!(target: "trade_executor", "[Executor] 读取区块高度失败: {:#}", e);
                            None
                        }
                    };
                    debug!(
                        target: "trade_executor",
                        "[Executor] {} 已确认，经过 {:?} 个区块",
                        signature, blocks
                    );
                    return Confirmation::Confirmed(blocks);
                }
                Ok(TxStatus::Failed(reason)) => return Confirmation::Failed(reason),
                Ok(TxStatus::Expired) => {
                    return Confirmation::Failed(
                        "transaction expired before confirmation".to_string(),
                    )
                }
                Ok(TxStatus::Pending) => {}
                Err(e) => {
                    debug!(target: "trade_executor", "[Executor] 查询 {} 状态失败: {:#}", signature, e)
                }
            }

            if Instant::now() >= deadline {
                return Confirmation::TimedOut;
            }
            tokio::time::sleep(self.config.confirm_poll_interval).await;
        }
    }

    async fn simulate(&self, tx: &VersionedTransaction) -> Result<(), ExecutionError> {
        match self.sender.simulate(tx).await {
            Ok(()) => Ok(()),
            Err(SendError::Unsupported(name)) => {
                debug!(target: "trade_executor", "[Executor] {} 不支持模拟，跳过", name);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl SwapHandler for SwapExecutor {
    async fn execute(&self, event: &SwapEvent) -> Result<SwapResult, ExecutionError> {
        let route = self.router.route(event).await?;
        if route != Route::Aggregator && event.swap_mode == SwapMode::ExactOut {
            return Err(ExecutionError::InvalidInput(format!(
                "{} route only supports ExactIn",
                route.as_str()
            )));
        }

        let payer = self.load_keypair(&event.user_pubkey).await?;
        let budget = self.compute_budget(event);
        let mint = TradeRouter::token_mint(event)?;

        let tx = match route {
            Route::BondingCurve => self.build_bonding_curve(event, &payer, mint, &budget).await?,
            Route::Amm => self.build_amm(event, &payer, mint, &budget).await?,
            Route::Aggregator => self.build_aggregator(event, &payer, &budget).await?,
        };

        if self.config.simulate_before_send {
            self.simulate(&tx).await?;
        }

        let signed = tx
            .signatures
            .first()
            .copied()
            .ok_or_else(|| ExecutionError::Build("transaction is not signed".to_string()))?;
        let submit_height = self.rpc.block_height().await.map_err(rpc_error)?;

        let submit_time = utils::now_millis();
        let signature = self
            .sender
            .send(&tx)
            .await
            .map_err(|source| ExecutionError::Submit {
                signature: signed.to_string(),
                source,
            })?;

        info!(
            target: "trade_executor",
            "[Executor] 已提交 {} {} -> {} amount={} via {} ({}): {}",
            event.user_pubkey,
            event.input_mint,
            event.output_mint,
            event.amount,
            self.sender.name(),
            route.as_str(),
            signature
        );

        let (blocks_passed, error) = match self.confirm(&signature, submit_height).await {
            Confirmation::Confirmed(blocks) => (blocks, None),
            Confirmation::Failed(reason) => {
                warn!(target: "trade_executor", "[Executor] {} 链上失败: {}", signature, reason);
                (None, Some(reason))
            }
            Confirmation::TimedOut => {
                warn!(
                    target: "trade_executor",
                    "[Executor] {} 在 {:?} 内未确认",
                    signature, self.config.confirm_timeout
                );
                (None, None)
            }
        };

        Ok(SwapResult {
            event: event.clone(),
            user_pubkey: event.user_pubkey.clone(),
            submit_time,
            transaction_hash: Some(signature.to_string()),
            blocks_passed,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use models::SwapOrigin;
    use parking_lot::Mutex;
    use services::{MemoryKvStore, Refresher};
    use solana_chain::LaunchStatusSource;
    use solana_sdk::hash::Hash;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 区块高度按队列依次返回，最后一个值保持不变
    #[derive(Default)]
    struct FakeRpc {
        accounts: Mutex<HashMap<Pubkey, Account>>,
        heights: Mutex<VecDeque<u64>>,
        status: Mutex<Option<std::result::Result<(), String>>>,
    }

    #[async_trait]
    impl ChainRpc for FakeRpc {
        async fn account(&self, pubkey: &Pubkey) -> Result<Option<Account>> {
            Ok(self.accounts.lock().get(pubkey).cloned())
        }

        async fn token_balance(&self, token_account: &Pubkey) -> Result<u64> {
            anyhow::bail!("no token account {}", token_account)
        }

        async fn block_height(&self) -> Result<u64> {
            let mut heights = self.heights.lock();
            let height = heights.front().copied().unwrap_or_default();
            if heights.len() > 1 {
                heights.pop_front();
            }
            Ok(height)
        }

        async fn signature_status(
            &self,
            _signature: &Signature,
        ) -> Result<Option<std::result::Result<(), String>>> {
            Ok(self.status.lock().clone())
        }
    }

    #[derive(Clone, Copy)]
    enum Simulation {
        Pass,
        Unsupported,
        Reject,
    }

    struct FakeSender {
        simulation: Simulation,
        fail_send: bool,
        sent: AtomicUsize,
    }

    impl FakeSender {
        fn sent(&self) -> usize {
            self.sent.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl TransactionSender for FakeSender {
        fn name(&self) -> &'static str {
            "fake"
        }

        async fn send(&self, tx: &VersionedTransaction) -> Result<Signature, SendError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail_send {
                return Err(SendError::TooManyRequests("fake"));
            }
            Ok(tx.signatures[0])
        }

        async fn simulate(&self, _tx: &VersionedTransaction) -> Result<(), SendError> {
            match self.simulation {
                Simulation::Pass => Ok(()),
                Simulation::Unsupported => Err(SendError::Unsupported("fake")),
                Simulation::Reject => Err(SendError::TransactionError {
                    message: "custom program error: 0x1772".to_string(),
                    logs: vec!["Program log: slippage exceeded".to_string()],
                }),
            }
        }
    }

    #[derive(Default)]
    struct FakeWallets {
        keys: Mutex<HashMap<String, String>>,
    }

    #[async_trait]
    impl WalletStore for FakeWallets {
        async fn private_key(&self, pubkey: &str) -> Result<Option<String>> {
            Ok(self.keys.lock().get(pubkey).cloned())
        }
    }

    struct NotLaunched;

    #[async_trait]
    impl LaunchStatusSource for NotLaunched {
        async fn is_launched(&self, _mint: &Pubkey) -> Result<bool> {
            Ok(false)
        }
    }

    struct FixedHash;

    #[async_trait]
    impl Refresher<String> for FixedHash {
        async fn refresh(&self) -> Result<String> {
            Ok(Hash::new_unique().to_string())
        }
    }

    fn account(owner: Pubkey, data: Vec<u8>) -> Account {
        Account {
            lamports: 1_461_600,
            data,
            owner,
            executable: false,
            rent_epoch: 0,
        }
    }

    struct Harness {
        executor: SwapExecutor,
        rpc: Arc<FakeRpc>,
        sender: Arc<FakeSender>,
        wallets: Arc<FakeWallets>,
        payer: Keypair,
        mint: Pubkey,
    }

    impl Harness {
        fn buy(&self) -> SwapEvent {
            SwapEvent {
                user_pubkey: self.payer.pubkey().to_string(),
                swap_mode: SwapMode::ExactIn,
                input_mint: WSOL.to_string(),
                output_mint: self.mint.to_string(),
                amount: 10_000_000,
                ui_amount: 0.01,
                timestamp: 0,
                slippage_bps: 500,
                priority_fee: None,
                program_id: Some(pump_fun::PROGRAM_ID.to_string()),
                origin: SwapOrigin::User,
                tx_event: None,
                by: None,
            }
        }
    }

    /// 未迁移的联合曲线代币，提交时高度 100，确认时 103
    fn harness(simulation: Simulation, fail_send: bool) -> Harness {
        let payer = Keypair::new();
        let mint = Pubkey::new_unique();

        let rpc = Arc::new(FakeRpc::default());
        let curve = BondingCurve {
            virtual_token_reserves: 1_073_000_000_000_000,
            virtual_sol_reserves: 30_000_000_000,
            real_token_reserves: 793_100_000_000_000,
            real_sol_reserves: 0,
            token_total_supply: 1_000_000_000_000_000,
            complete: false,
            creator: Pubkey::new_unique(),
        };
        rpc.accounts
            .lock()
            .insert(mint, account(spl_token::id(), vec![0u8; 82]));
        rpc.accounts.lock().insert(
            pump_fun::bonding_curve(&mint),
            account(pump_fun::PROGRAM_ID, curve.encode()),
        );
        *rpc.heights.lock() = VecDeque::from([100, 103]);
        *rpc.status.lock() = Some(Ok(()));

        let sender = Arc::new(FakeSender {
            simulation,
            fail_send,
            sent: AtomicUsize::new(0),
        });
        let wallets = Arc::new(FakeWallets::default());
        wallets
            .keys
            .lock()
            .insert(payer.pubkey().to_string(), payer.to_base58_string());
        let blockhash = Arc::new(BlockhashCache::with_refresher(
            Arc::new(FixedHash),
            Arc::new(MemoryKvStore::new()),
            Duration::from_secs(30),
        ));
        let config = ExecutorConfig {
            simulate_before_send: true,
            confirm_timeout: Duration::from_millis(100),
            confirm_poll_interval: Duration::from_millis(10),
            ..ExecutorConfig::default()
        };

        let executor = SwapExecutor::new(
            config,
            rpc.clone(),
            TradeRouter::new(Arc::new(NotLaunched)),
            wallets.clone(),
            blockhash,
            JupiterApi::with_url("http://127.0.0.1:1"),
            sender.clone(),
        );
        Harness {
            executor,
            rpc,
            sender,
            wallets,
            payer,
            mint,
        }
    }

    #[test]
    fn test_executor_config_from_trading() {
        let trading = TradingConfig {
            simulate_before_send: true,
            default_compute_unit_limit: 300_000,
            confirm_timeout_secs: 45,
            ..TradingConfig::default()
        };
        let config = ExecutorConfig::from(&trading);
        assert!(config.simulate_before_send);
        assert_eq!(config.compute_unit_limit, 300_000);
        assert_eq!(config.default_priority_fee_sol, 0.0001);
        assert_eq!(config.confirm_timeout, Duration::from_secs(45));
    }

    #[test]
    fn test_parse_pubkey_rejects_garbage() {
        assert!(matches!(
            parse_pubkey("xyz", "input mint"),
            Err(ExecutionError::InvalidInput(msg)) if msg == "input mint xyz"
        ));
        assert_eq!(parse_pubkey(WSOL, "input mint").unwrap(), WSOL_MINT);
    }

    #[tokio::test]
    async fn test_unknown_wallet_is_not_sent() {
        let h = harness(Simulation::Pass, false);
        let mut event = h.buy();
        event.user_pubkey = Pubkey::new_unique().to_string();

        let err = h.executor.execute(&event).await.unwrap_err();
        assert!(matches!(err, ExecutionError::WalletNotFound(_)));
        assert!(err.is_terminal());
        assert_eq!(h.sender.sent(), 0);
    }

    #[tokio::test]
    async fn test_stored_key_for_other_wallet_is_build_error() {
        let h = harness(Simulation::Pass, false);
        let other = Pubkey::new_unique().to_string();
        h.wallets
            .keys
            .lock()
            .insert(other.clone(), h.payer.to_base58_string());
        let mut event = h.buy();
        event.user_pubkey = other;

        let err = h.executor.execute(&event).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Build(msg) if msg.contains("does not belong")));
        assert_eq!(h.sender.sent(), 0);
    }

    #[tokio::test]
    async fn test_exact_out_rejected_on_bonding_curve() {
        let h = harness(Simulation::Pass, false);
        let mut event = h.buy();
        event.swap_mode = SwapMode::ExactOut;

        let err = h.executor.execute(&event).await.unwrap_err();
        assert!(matches!(err, ExecutionError::InvalidInput(_)));
        assert_eq!(h.sender.sent(), 0);
    }

    #[tokio::test]
    async fn test_rejected_simulation_aborts_before_send() {
        let h = harness(Simulation::Reject, false);

        let err = h.executor.execute(&h.buy()).await.unwrap_err();
        match err {
            ExecutionError::TransactionError { message, logs } => {
                assert!(message.contains("0x1772"));
                assert_eq!(logs, vec!["Program log: slippage exceeded".to_string()]);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(h.sender.sent(), 0);
    }

    #[tokio::test]
    async fn test_confirmed_swap_reports_blocks_passed() {
        let h = harness(Simulation::Unsupported, false);

        let result = h.executor.execute(&h.buy()).await.unwrap();
        assert_eq!(h.sender.sent(), 1);
        assert!(result.transaction_hash.is_some());
        assert_eq!(result.blocks_passed, Some(3));
        assert!(result.error.is_none());
        assert_eq!(result.user_pubkey, h.payer.pubkey().to_string());
    }

    #[tokio::test]
    async fn test_send_failure_carries_signature() {
        let h = harness(Simulation::Pass, true);

        let err = h.executor.execute(&h.buy()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Submit { .. }));
        assert!(err.is_terminal());
        let signature = err.signature().map(String::from).unwrap_or_default();
        assert!(Signature::from_str(&signature).is_ok());
        assert_eq!(h.sender.sent(), 1);
    }

    #[tokio::test]
    async fn test_failed_on_chain_keeps_hash() {
        let h = harness(Simulation::Pass, false);
        *h.rpc.status.lock() = Some(Err("InstructionError(2, Custom(6002))".to_string()));

        let result = h.executor.execute(&h.buy()).await.unwrap();
        assert!(result.transaction_hash.is_some());
        assert_eq!(result.blocks_passed, None);
        assert!(result.error.as_deref().unwrap_or_default().contains("6002"));
    }

    #[tokio::test]
    async fn test_unconfirmed_within_timeout_has_no_blocks() {
        let h = harness(Simulation::Pass, false);
        *h.rpc.status.lock() = None;

        let result = h.executor.execute(&h.buy()).await.unwrap();
        assert!(result.transaction_hash.is_some());
        assert_eq!(result.blocks_passed, None);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn test_expired_blockhash_reported_as_error() {
        let h = harness(Simulation::Pass, false);
        *h.rpc.status.lock() = None;
        *h.rpc.heights.lock() = VecDeque::from([100, 100 + BLOCKHASH_VALID_BLOCKS + 1]);

        let result = h.executor.execute(&h.buy()).await.unwrap();
        assert!(result.error.as_deref().unwrap_or_default().contains("expired"));
    }
}
