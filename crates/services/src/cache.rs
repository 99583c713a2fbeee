//! 自动刷新缓存
//!
//! 后台任务按固定间隔刷新值并写入键值存储 (TTL = 更新间隔)。
//! 冷启动时 `get()` 同步刷新一次；并发的冷读取之间不互斥，可能各自刷新。

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::kv_store::KeyValueStore;
use crate::shutdown::ShutdownSignal;

/// 默认更新间隔
pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_secs(30);

const RETRY_DELAY: Duration = Duration::from_secs(1);

/// 缓存值的数据源
#[async_trait]
pub trait Refresher<T>: Send + Sync {
    async fn refresh(&self) -> Result<T>;
}

pub struct AutoUpdateCache<T> {
    name: String,
    storage_key: String,
    store: Arc<dyn KeyValueStore>,
    refresher: Arc<dyn Refresher<T>>,
    interval: Duration,
    retry_delay: Duration,
    running: RwLock<bool>,
    shutdown: ShutdownSignal,
    handle: Mutex<Option<JoinHandle<()>>>,
    updated_at: Mutex<Option<Instant>>,
    _value: PhantomData<fn() -> T>,
}

impl<T> AutoUpdateCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// 值存放在 `<prefix>:<key>`
    pub fn new(
        prefix: &str,
        key: &str,
        store: Arc<dyn KeyValueStore>,
        refresher: Arc<dyn Refresher<T>>,
        interval: Duration,
    ) -> Self {
        Self {
            name: prefix.to_string(),
            storage_key: format!("{}:{}", prefix, key),
            store,
            refresher,
            interval,
            retry_delay: RETRY_DELAY,
            running: RwLock::new(false),
            shutdown: ShutdownSignal::new(),
            handle: Mutex::new(None),
            updated_at: Mutex::new(None),
            _value: PhantomData,
        }
    }

    /// 刷新失败后的重试间隔
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn storage_key(&self) -> &str {
        &self.storage_key
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn ttl_secs(&self) -> u64 {
        self.interval.as_secs().max(1)
    }

    /// 成功刷新后的休眠时长：比 TTL 提前 1 秒刷新
    fn refresh_wait(&self) -> Duration {
        if self.interval > Duration::from_secs(1) {
            self.interval - Duration::from_secs(1)
        } else {
            self.interval
        }
    }

    async fn refresh_and_store(&self) -> Result<T> {
        let value = self
            .refresher
            .refresh()
            .await
            .with_context(|| format!("refresh {} failed", self.name))?;
        let raw = serde_json::to_string(&value)?;
        self.store
            .set_ex(&self.storage_key, &raw, self.ttl_secs())
            .await
            .with_context(|| format!("store {} failed", self.storage_key))?;
        *self.updated_at.lock() = Some(Instant::now());
        Ok(value)
    }

    /// 读取缓存值，未命中时同步刷新
    pub async fn get(&self) -> Result<T> {
        if let Some(raw) = self.store.get(&self.storage_key).await? {
            match serde_json::from_str(&raw) {
                Ok(value) => return Ok(value),
                Err(e) => warn!("[Cache] {} 缓存值无法解析，重新刷新: {}", self.name, e),
            }
        }

        debug!("[Cache] {} 未命中，同步刷新", self.name);
        self.refresh_and_store().await
    }

    /// 启动后台刷新，重复调用只保留一个任务
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                return;
            }
            *running = true;
            self.shutdown.reset();
        }

        let cache = self.clone();
        let handle = tokio::spawn(async move {
            cache.refresh_loop().await;
        });
        *self.handle.lock() = Some(handle);
        info!("[Cache] {} 自动刷新已启动 (间隔 {:?})", self.name, self.interval);
    }

    async fn refresh_loop(&self) {
        loop {
            if !*self.running.read().await {
                break;
            }

            let wait = match self.refresh_and_store().await {
                Ok(_) => self.refresh_wait(),
                Err(e) => {
                    warn!("[Cache] {} 刷新失败，{:?} 后重试: {:#}", self.name, self.retry_delay, e);
                    self.retry_delay
                }
            };

            tokio::select! {
                _ = tokio::time::sleep(wait) => {}
                _ = self.shutdown.triggered() => {}
            }
        }
    }

    /// 停止后台刷新并等待任务退出，可重复调用
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.shutdown.trigger();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
            info!("[Cache] {} 自动刷新已停止", self.name);
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    /// 最近一次成功写入的时间
    pub fn updated_at(&self) -> Option<Instant> {
        *self.updated_at.lock()
    }
}
