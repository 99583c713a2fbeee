//! 链上状态缓存：区块哈希、免租余额、代币迁移状态

use anyhow::{Context, Result};
use async_trait::async_trait;
use services::{AutoUpdateCache, KeyValueStore, Refresher};
use solana_sdk::{hash::Hash, pubkey::Pubkey};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::client::{AccountFetcher, SolanaClient};
use crate::layouts::{AccountLayout, BondingCurve};
use crate::types::{pump_fun, TOKEN_ACCOUNT_SIZE};

/// 未确认迁移的结果缓存时长
pub const NOT_LAUNCHED_TTL_SECS: u64 = 5;

struct BlockhashRefresher {
    client: Arc<SolanaClient>,
}

#[async_trait]
impl Refresher<String> for BlockhashRefresher {
    async fn refresh(&self) -> Result<String> {
        Ok(self.client.get_latest_blockhash().await?.to_string())
    }
}

/// 最新区块哈希 (以 base58 存储)
pub struct BlockhashCache {
    inner: Arc<AutoUpdateCache<String>>,
}

impl BlockhashCache {
    pub fn new(client: Arc<SolanaClient>, store: Arc<dyn KeyValueStore>, interval: Duration) -> Self {
        Self::with_refresher(Arc::new(BlockhashRefresher { client }), store, interval)
    }

    pub fn with_refresher(
        refresher: Arc<dyn Refresher<String>>,
        store: Arc<dyn KeyValueStore>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AutoUpdateCache::new("blockhash", "latest", store, refresher, interval)),
        }
    }

    pub async fn start(&self) {
        self.inner.start().await;
    }

    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    pub async fn get(&self) -> Result<Hash> {
        let raw = self.inner.get().await?;
        Hash::from_str(&raw).with_context(|| format!("invalid cached blockhash {}", raw))
    }
}

struct RentRefresher {
    client: Arc<SolanaClient>,
}

#[async_trait]
impl Refresher<u64> for RentRefresher {
    async fn refresh(&self) -> Result<u64> {
        self.client.get_rent_exempt_minimum(TOKEN_ACCOUNT_SIZE).await
    }
}

/// token 账户 (165 字节) 的免租最低余额
pub struct RentExemptCache {
    inner: Arc<AutoUpdateCache<u64>>,
}

impl RentExemptCache {
    pub fn new(client: Arc<SolanaClient>, store: Arc<dyn KeyValueStore>, interval: Duration) -> Self {
        Self::with_refresher(Arc::new(RentRefresher { client }), store, interval)
    }

    pub fn with_refresher(
        refresher: Arc<dyn Refresher<u64>>,
        store: Arc<dyn KeyValueStore>,
        interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(AutoUpdateCache::new(
                "rent_exempt",
                "token_account",
                store,
                refresher,
                interval,
            )),
        }
    }

    pub async fn start(&self) {
        self.inner.start().await;
    }

    pub async fn stop(&self) {
        self.inner.stop().await;
    }

    pub async fn get(&self) -> Result<u64> {
        self.inner.get().await
    }
}

/// 代币是否已迁移到 AMM
#[async_trait]
pub trait LaunchStatusSource: Send + Sync {
    async fn is_launched(&self, mint: &Pubkey) -> Result<bool>;
}

/// 迁移状态缓存
///
/// 读取联合曲线账户，`complete == true` 视为已迁移。
/// 已迁移结果缓存 `launched_ttl`，未迁移结果只缓存 5 秒，账户不存在视为未确认。
pub struct LaunchStatusCache {
    fetcher: Arc<dyn AccountFetcher>,
    store: Arc<dyn KeyValueStore>,
    launched_ttl_secs: u64,
}

impl LaunchStatusCache {
    pub fn new(
        fetcher: Arc<dyn AccountFetcher>,
        store: Arc<dyn KeyValueStore>,
        launched_ttl_secs: u64,
    ) -> Self {
        Self {
            fetcher,
            store,
            launched_ttl_secs,
        }
    }

    fn key(mint: &Pubkey) -> String {
        format!("launch_status:{}", mint)
    }

    async fn fetch(&self, mint: &Pubkey) -> Result<bool> {
        let curve_address = pump_fun::bonding_curve(mint);
        let Some(data) = self.fetcher.get_account_data(&curve_address).await? else {
            debug!("[Cache] {} 无联合曲线账户", mint);
            return Ok(false);
        };
        let curve = BondingCurve::decode(&data)?;
        Ok(curve.complete)
    }
}

#[async_trait]
impl LaunchStatusSource for LaunchStatusCache {
    async fn is_launched(&self, mint: &Pubkey) -> Result<bool> {
        let key = Self::key(mint);
        if let Some(raw) = self.store.get(&key).await? {
            return Ok(raw == "1");
        }

        let launched = self.fetch(mint).await?;
        let (value, ttl) = if launched {
            ("1", self.launched_ttl_secs)
        } else {
            ("0", NOT_LAUNCHED_TTL_SECS)
        };
        self.store.set_ex(&key, value, ttl).await?;
        Ok(launched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use services::MemoryKvStore;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct FakeFetcher {
        accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl AccountFetcher for FakeFetcher {
        async fn get_account_data(&self, pubkey: &Pubkey) -> Result<Option<Vec<u8>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.accounts.lock().get(pubkey).cloned())
        }
    }

    fn curve(complete: bool) -> Vec<u8> {
        BondingCurve {
            virtual_token_reserves: 1,
            virtual_sol_reserves: 1,
            real_token_reserves: 0,
            real_sol_reserves: 0,
            token_total_supply: 1,
            complete,
            creator: Pubkey::new_unique(),
        }
        .encode()
    }

    #[tokio::test]
    async fn test_launched_is_cached() {
        let mint = Pubkey::new_unique();
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher
            .accounts
            .lock()
            .insert(pump_fun::bonding_curve(&mint), curve(true));
        let cache = LaunchStatusCache::new(fetcher.clone(), Arc::new(MemoryKvStore::new()), 600);

        assert!(cache.is_launched(&mint).await.unwrap());
        assert!(cache.is_launched(&mint).await.unwrap());
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_curve_is_not_launched() {
        let mint = Pubkey::new_unique();
        let fetcher = Arc::new(FakeFetcher::default());
        let store = Arc::new(MemoryKvStore::new());
        let cache = LaunchStatusCache::new(fetcher, store.clone(), 600);

        assert!(!cache.is_launched(&mint).await.unwrap());
        assert_eq!(
            store.get(&LaunchStatusCache::key(&mint)).await.unwrap(),
            Some("0".to_string())
        );
    }

    #[tokio::test]
    async fn test_corrupt_curve_is_error() {
        let mint = Pubkey::new_unique();
        let fetcher = Arc::new(FakeFetcher::default());
        fetcher
            .accounts
            .lock()
            .insert(pump_fun::bonding_curve(&mint), vec![0u8; 81]);
        let cache = LaunchStatusCache::new(fetcher, Arc::new(MemoryKvStore::new()), 600);

        assert!(cache.is_launched(&mint).await.is_err());
    }

    struct FixedHash(Hash);

    #[async_trait]
    impl Refresher<String> for FixedHash {
        async fn refresh(&self) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[tokio::test]
    async fn test_blockhash_round_trips_through_store() {
        let hash = Hash::new_unique();
        let cache = BlockhashCache::with_refresher(
            Arc::new(FixedHash(hash)),
            Arc::new(MemoryKvStore::new()),
            Duration::from_secs(30),
        );
        assert_eq!(cache.get().await.unwrap(), hash);
        assert_eq!(cache.get().await.unwrap(), hash);
    }
}
