//! 执行器用到的链上查询

use anyhow::Result;
use async_trait::async_trait;
use solana_chain::SolanaClient;
use solana_sdk::{account::Account, pubkey::Pubkey, signature::Signature};

#[async_trait]
pub trait ChainRpc: Send + Sync {
    async fn account(&self, pubkey: &Pubkey) -> Result<Option<Account>>;

    /// token 账户余额 (最小单位)
    async fn token_balance(&self, token_account: &Pubkey) -> Result<u64>;

    async fn block_height(&self) -> Result<u64>;

    /// None 表示尚未确认，Some(Err) 为链上执行失败
    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<std::result::Result<(), String>>>;
}

#[async_trait]
impl ChainRpc for SolanaClient {
    async fn account(&self, pubkey: &Pubkey) -> Result<Option<Account>> {
        self.get_account(pubkey).await
    }

    async fn token_balance(&self, token_account: &Pubkey) -> Result<u64> {
        self.get_token_balance(token_account).await
    }

    async fn block_height(&self) -> Result<u64> {
        self.get_block_height().await
    }

    async fn signature_status(
        &self,
        signature: &Signature,
    ) -> Result<Option<std::result::Result<(), String>>> {
        self.get_signature_status(signature).await
    }
}
