//! Solana RPC 客户端模块

use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_client::{
    nonblocking::rpc_client::RpcClient,
    rpc_config::{RpcSendTransactionConfig, RpcSimulateTransactionConfig, RpcTransactionConfig},
    rpc_response::RpcSimulateTransactionResult,
};
use solana_sdk::{
    account::Account, commitment_config::CommitmentConfig, hash::Hash, pubkey::Pubkey,
    signature::Signature, transaction::VersionedTransaction,
};
use spl_token::solana_program::program_pack::Pack;
use solana_transaction_status::{EncodedConfirmedTransactionWithStatusMeta, UiTransactionEncoding};
use spl_associated_token_account::get_associated_token_address;
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::SolanaConfig;

/// 按地址读取原始账户数据
#[async_trait]
pub trait AccountFetcher: Send + Sync {
    async fn get_account_data(&self, pubkey: &Pubkey) -> Result<Option<Vec<u8>>>;
}

/// Solana RPC 客户端
pub struct SolanaClient {
    rpc: Arc<RpcClient>,
    commitment: CommitmentConfig,
    /// 当前 slot 缓存
    current_slot: RwLock<u64>,
}

impl SolanaClient {
    /// 创建新的 Solana 客户端
    pub fn new(config: &SolanaConfig) -> Self {
        let commitment = config.commitment_config();
        let rpc = RpcClient::new_with_commitment(config.rpc_url.clone(), commitment);

        info!("[Solana] 创建 RPC 客户端: {}", config.rpc_url);

        Self {
            rpc: Arc::new(rpc),
            commitment,
            current_slot: RwLock::new(0),
        }
    }

    /// 获取 RPC 客户端引用
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    pub fn commitment(&self) -> CommitmentConfig {
        self.commitment
    }

    /// 获取当前 slot
    pub async fn get_slot(&self) -> Result<u64> {
        let slot = self.rpc.get_slot().await?;
        *self.current_slot.write().await = slot;
        Ok(slot)
    }

    /// 获取缓存的 slot
    pub async fn cached_slot(&self) -> u64 {
        *self.current_slot.read().await
    }

    pub async fn get_block_height(&self) -> Result<u64> {
        Ok(self.rpc.get_block_height().await?)
    }

    /// 获取账户信息
    pub async fn get_account(&self, pubkey: &Pubkey) -> Result<Option<Account>> {
        let account = self
            .rpc
            .get_account_with_commitment(pubkey, self.commitment)
            .await?
            .value;
        Ok(account)
    }

    /// 获取 Token 账户余额 (最小单位)
    pub async fn get_token_balance(&self, token_account: &Pubkey) -> Result<u64> {
        let balance = self.rpc.get_token_account_balance(token_account).await?;

        let amount = balance
            .amount
            .parse::<u64>()
            .context("Failed to parse token balance")?;

        Ok(amount)
    }

    /// 钱包在某个 mint 的 ATA 余额，账户不存在时为 0
    pub async fn get_owner_token_balance(&self, owner: &Pubkey, mint: &Pubkey) -> Result<u64> {
        let ata = get_associated_token_address(owner, mint);
        match self.get_account(&ata).await? {
            Some(account) => {
                let state = spl_token::state::Account::unpack_from_slice(&account.data)
                    .with_context(|| format!("decode token account {}", ata))?;
                Ok(state.amount)
            }
            None => Ok(0),
        }
    }

    /// 获取 SOL 余额
    pub async fn get_sol_balance(&self, pubkey: &Pubkey) -> Result<u64> {
        let balance = self.rpc.get_balance(pubkey).await?;
        Ok(balance)
    }

    /// 获取最近的区块哈希
    pub async fn get_latest_blockhash(&self) -> Result<Hash> {
        let blockhash = self.rpc.get_latest_blockhash().await?;
        Ok(blockhash)
    }

    /// 免租最低余额
    pub async fn get_rent_exempt_minimum(&self, data_len: usize) -> Result<u64> {
        let lamports = self
            .rpc
            .get_minimum_balance_for_rent_exemption(data_len)
            .await?;
        Ok(lamports)
    }

    /// 获取交易详情 (jsonParsed, 支持 v0 交易)
    pub async fn get_transaction(
        &self,
        signature: &str,
    ) -> Result<EncodedConfirmedTransactionWithStatusMeta> {
        let sig = Signature::from_str(signature)?;
        let config = RpcTransactionConfig {
            encoding: Some(UiTransactionEncoding::JsonParsed),
            commitment: Some(self.commitment),
            max_supported_transaction_version: Some(0),
        };
        let tx = self
            .rpc
            .get_transaction_with_config(&sig, config)
            .await
            .with_context(|| format!("get_transaction {}", signature))?;
        Ok(tx)
    }

    /// 模拟交易
    pub async fn simulate(&self, tx: &VersionedTransaction) -> Result<RpcSimulateTransactionResult> {
        let config = RpcSimulateTransactionConfig {
            sig_verify: false,
            replace_recent_blockhash: false,
            commitment: Some(self.commitment),
            ..Default::default()
        };
        let result = self
            .rpc
            .simulate_transaction_with_config(tx, config)
            .await?
            .value;
        if let Some(err) = &result.err {
            debug!("[Solana] 模拟失败: {:?}", err);
        }
        Ok(result)
    }

    /// 发送交易 (跳过预检)
    pub async fn send(&self, tx: &VersionedTransaction) -> Result<Signature> {
        let config = RpcSendTransactionConfig {
            skip_preflight: true,
            max_retries: Some(0),
            ..Default::default()
        };
        let signature = self.rpc.send_transaction_with_config(tx, config).await?;
        Ok(signature)
    }

    /// 交易确认状态，未达到承诺级别时为 None，链上失败时为 Err(原因)
    pub async fn get_signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<std::result::Result<(), String>>> {
        let statuses = self.rpc.get_signature_statuses(&[*signature]).await?.value;
        let status = statuses
            .into_iter()
            .next()
            .flatten()
            .filter(|status| status.satisfies_commitment(self.commitment));
        Ok(status.map(|status| match status.err {
            Some(err) => Err(err.to_string()),
            None => Ok(()),
        }))
    }

    /// 检查连接状态
    pub async fn health_check(&self) -> Result<bool> {
        match self.rpc.get_health().await {
            Ok(_) => Ok(true),
            Err(e) => {
                warn!("[Solana] RPC 健康检查失败: {}", e);
                Ok(false)
            }
        }
    }
}

#[async_trait]
impl AccountFetcher for SolanaClient {
    async fn get_account_data(&self, pubkey: &Pubkey) -> Result<Option<Vec<u8>>> {
        Ok(self.get_account(pubkey).await?.map(|account| account.data))
    }
}
