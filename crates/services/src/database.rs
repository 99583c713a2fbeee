use anyhow::{Context, Result};
use sqlx::{mysql::MySqlPoolOptions, MySql, Pool};
use tracing::debug;

use models::{CopyTradeFollow, MonitorTarget, SwapResult};

pub struct Database {
    pool: Pool<MySql>,
}

impl Database {
    pub async fn new(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = MySqlPoolOptions::new()
            .max_connections(max_connections)
            .after_connect(|conn, _meta| {
                Box::pin(async move {
                    // 会话时区统一为 UTC
                    sqlx::query("SET time_zone = '+00:00'")
                        .execute(&mut *conn)
                        .await?;
                    Ok(())
                })
            })
            .connect(database_url)
            .await?;

        Ok(Self { pool })
    }

    /// 从已有连接池创建 Database 实例
    pub fn from_pool(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &Pool<MySql> {
        &self.pool
    }
}

/// 监控钱包表
pub struct MonitorTargetDb {
    pool: Pool<MySql>,
}

impl MonitorTargetDb {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    pub async fn get_active(&self) -> Result<Vec<MonitorTarget>> {
        let targets = sqlx::query_as::<_, MonitorTarget>(
            "SELECT id, wallet, alias, active FROM monitor_targets WHERE active = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("query monitor_targets")?;
        Ok(targets)
    }
}

const FOLLOW_COLUMNS: &str = "id, owner, target_wallet, target_alias, is_fixed_buy, fixed_buy_amount, \
     auto_follow, anti_sandwich, custom_slippage, priority, stop_loss, no_sell, active";

/// 跟单配置表
pub struct CopyTradeFollowDb {
    pool: Pool<MySql>,
}

impl CopyTradeFollowDb {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    pub async fn get_active(&self) -> Result<Vec<CopyTradeFollow>> {
        let sql = format!(
            "SELECT {} FROM copytrade_follows WHERE active = TRUE ORDER BY id",
            FOLLOW_COLUMNS
        );
        let follows = sqlx::query_as::<_, CopyTradeFollow>(&sql)
            .fetch_all(&self.pool)
            .await
            .context("query copytrade_follows")?;
        Ok(follows)
    }

    /// 跟随某个钱包的全部启用配置
    pub async fn get_active_by_target(&self, target_wallet: &str) -> Result<Vec<CopyTradeFollow>> {
        let sql = format!(
            "SELECT {} FROM copytrade_follows WHERE target_wallet = ? AND active = TRUE ORDER BY id",
            FOLLOW_COLUMNS
        );
        let follows = sqlx::query_as::<_, CopyTradeFollow>(&sql)
            .bind(target_wallet)
            .fetch_all(&self.pool)
            .await
            .with_context(|| format!("query follows of {}", target_wallet))?;
        debug!("[DB] {} 有 {} 个启用的跟单配置", target_wallet, follows.len());
        Ok(follows)
    }
}

/// 交易钱包表 (私钥为 base58 编码)
pub struct WalletDb {
    pool: Pool<MySql>,
}

impl WalletDb {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    pub async fn get_private_key(&self, pubkey: &str) -> Result<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT private_key FROM wallets WHERE pubkey = ? LIMIT 1")
                .bind(pubkey)
                .fetch_optional(&self.pool)
                .await
                .context("query wallets")?;
        Ok(row.map(|r| r.0))
    }
}

/// 交易结果记录表
pub struct SwapRecordDb {
    pool: Pool<MySql>,
}

impl SwapRecordDb {
    pub fn new(pool: Pool<MySql>) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, result: &SwapResult) -> Result<i64> {
        let event = &result.event;
        let source_signature = event.tx_event.as_ref().map(|e| e.signature.clone());

        let row = sqlx::query(
            r#"INSERT INTO swap_records
               (user_pubkey, swap_mode, input_mint, output_mint, amount, slippage_bps,
                origin, follow_by, source_signature, transaction_hash, blocks_passed,
                error_message, submit_time)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(&result.user_pubkey)
        .bind(event.swap_mode.as_str())
        .bind(&event.input_mint)
        .bind(&event.output_mint)
        .bind(event.amount)
        .bind(event.slippage_bps)
        .bind(event.origin.as_str())
        .bind(&event.by)
        .bind(source_signature)
        .bind(&result.transaction_hash)
        .bind(result.blocks_passed)
        .bind(&result.error)
        .bind(result.submit_time)
        .execute(&self.pool)
        .await
        .context("insert swap_records")?;

        Ok(row.last_insert_id() as i64)
    }
}
