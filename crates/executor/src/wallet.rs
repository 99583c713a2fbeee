//! 交易钱包与结果存储

use anyhow::{Context, Result};
use async_trait::async_trait;
use solana_sdk::signature::Keypair;

use models::SwapResult;
use services::{SwapRecordDb, WalletDb};

/// 交易钱包私钥来源
#[async_trait]
pub trait WalletStore: Send + Sync {
    /// 按公钥查找私钥 (base58)，不存在返回 None
    async fn private_key(&self, pubkey: &str) -> Result<Option<String>>;
}

#[async_trait]
impl WalletStore for WalletDb {
    async fn private_key(&self, pubkey: &str) -> Result<Option<String>> {
        self.get_private_key(pubkey).await
    }
}

/// 交易结果持久化
#[async_trait]
pub trait SwapRecordStore: Send + Sync {
    async fn save(&self, result: &SwapResult) -> Result<()>;
}

#[async_trait]
impl SwapRecordStore for SwapRecordDb {
    async fn save(&self, result: &SwapResult) -> Result<()> {
        self.insert(result).await?;
        Ok(())
    }
}

/// 解析 base58 编码的 64 字节私钥
pub fn keypair_from_base58(secret: &str) -> Result<Keypair> {
    let bytes = bs58::decode(secret.trim())
        .into_vec()
        .context("private key is not valid base58")?;
    let keypair = Keypair::from_bytes(&bytes).context("private key is not a valid keypair")?;
    Ok(keypair)
}
