//! 跟单配置与持仓余额数据源

use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_chain::SolanaClient;
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;

use models::{CopyTradeFollow, MonitorTarget};
use services::{CopyTradeFollowDb, MonitorTargetDb};

/// 监控目标与跟单配置
#[async_trait]
pub trait FollowStore: Send + Sync {
    async fn monitor_targets(&self) -> Result<Vec<MonitorTarget>>;

    async fn active_follows(&self) -> Result<Vec<CopyTradeFollow>>;

    /// 跟随某钱包的启用配置
    async fn follows_of(&self, target_wallet: &str) -> Result<Vec<CopyTradeFollow>>;
}

/// MySQL 实现
pub struct DbFollowStore {
    targets: MonitorTargetDb,
    follows: CopyTradeFollowDb,
}

impl DbFollowStore {
    pub fn new(targets: MonitorTargetDb, follows: CopyTradeFollowDb) -> Self {
        Self { targets, follows }
    }
}

#[async_trait]
impl FollowStore for DbFollowStore {
    async fn monitor_targets(&self) -> Result<Vec<MonitorTarget>> {
        self.targets.get_active().await
    }

    async fn active_follows(&self) -> Result<Vec<CopyTradeFollow>> {
        self.follows.get_active().await
    }

    async fn follows_of(&self, target_wallet: &str) -> Result<Vec<CopyTradeFollow>> {
        self.follows.get_active_by_target(target_wallet).await
    }
}

/// 跟单者持仓余额
#[async_trait]
pub trait TokenBalanceSource: Send + Sync {
    /// `owner` 持有 `mint` 的数量 (最小单位)，没有账户时为 0
    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64>;
}

#[async_trait]
impl TokenBalanceSource for SolanaClient {
    async fn token_balance(&self, owner: &str, mint: &str) -> Result<u64> {
        let owner = Pubkey::from_str(owner).with_context(|| format!("invalid owner {}", owner))?;
        let mint = Pubkey::from_str(mint).with_context(|| format!("invalid mint {}", mint))?;
        self.get_owner_token_balance(&owner, &mint).await
    }
}
