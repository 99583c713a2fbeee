//! 事件总线 (Redis Streams + 消费者组)
//!
//! - `produce` 在存储确认追加后返回 (至少一次)
//! - 同一消费者组内每条消息只投递给一个成员，不同消费者组各自收到全部消息
//! - 回调成功才 ACK；未 ACK 的消息超过可见性超时后由 XAUTOCLAIM 重新认领
//! - 回调必须幂等

use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::ConnectionManager;
use redis::Value;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use models::{ControlEvent, SwapEvent, SwapResult, TxEvent};

use crate::shutdown::ShutdownSignal;

/// 交易意图
pub const SWAP_EVENT_CHANNEL: &str = "copytrade:swap_events";
/// 交易结果
pub const SWAP_RESULT_CHANNEL: &str = "copytrade:swap_results";
/// 钱包监控控制
pub const WALLET_CONTROL_CHANNEL: &str = "copytrade:wallet_control";
/// 已分类的监控交易
pub const TX_EVENT_CHANNEL: &str = "copytrade:tx_events";

const FIELD_TYPE: &str = "type";
const FIELD_DATA: &str = "data";

#[derive(Debug, Error)]
pub enum BusError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed stream reply: {0}")]
    MalformedReply(String),
}

/// 可以在总线上传递的事件
pub trait BusEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    const EVENT_TYPE: &'static str;
}

impl BusEvent for TxEvent {
    const EVENT_TYPE: &'static str = "tx_event";
}

impl BusEvent for SwapEvent {
    const EVENT_TYPE: &'static str = "swap_event";
}

impl BusEvent for SwapResult {
    const EVENT_TYPE: &'static str = "swap_result";
}

impl BusEvent for ControlEvent {
    const EVENT_TYPE: &'static str = "control_event";
}

/// Stream 中的一条记录
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEntry {
    pub id: String,
    pub fields: HashMap<String, String>,
}

impl StreamEntry {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|s| s.as_str())
    }
}

/// 追加日志 + 消费者组存储
#[async_trait]
pub trait StreamStore: Send + Sync {
    /// 追加一条记录，返回记录 id
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<String, BusError>;

    /// 创建消费者组 (已存在时忽略)，从头开始消费
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError>;

    /// 读取尚未投递给该组的新记录，最多阻塞 `block_ms`
    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, BusError>;

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), BusError>;

    /// 认领空闲时间超过 `min_idle_ms` 的未确认记录
    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BusError>;
}

// ==================== Redis 实现 ====================

/// Redis Streams 存储
#[derive(Clone)]
pub struct RedisStreamStore {
    conn: ConnectionManager,
    /// XADD MAXLEN ~ n
    maxlen: usize,
}

impl RedisStreamStore {
    pub fn new(conn: ConnectionManager, maxlen: usize) -> Self {
        Self { conn, maxlen }
    }
}

#[async_trait]
impl StreamStore for RedisStreamStore {
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<String, BusError> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XADD");
        cmd.arg(stream).arg("MAXLEN").arg("~").arg(self.maxlen).arg("*");
        for (k, v) in fields {
            cmd.arg(*k).arg(*v);
        }
        let id: String = cmd.query_async(&mut conn).await?;
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        match result {
            Ok(()) => Ok(()),
            Err(e) if e.code() == Some("BUSYGROUP") => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XREADGROUP")
            .arg("GROUP")
            .arg(group)
            .arg(consumer)
            .arg("COUNT")
            .arg(count)
            .arg("BLOCK")
            .arg(block_ms)
            .arg("STREAMS")
            .arg(stream)
            .arg(">")
            .query_async(&mut conn)
            .await?;

        // [[stream, [[id, [k, v, ...]], ...]], ...]
        let streams = match reply {
            Value::Nil => return Ok(Vec::new()),
            Value::Bulk(streams) => streams,
            other => return Err(BusError::MalformedReply(format!("{:?}", other))),
        };

        let mut entries = Vec::new();
        for item in &streams {
            match item {
                Value::Bulk(pair) if pair.len() == 2 => {
                    entries.extend(parse_entry_list(&pair[1])?);
                }
                other => return Err(BusError::MalformedReply(format!("{:?}", other))),
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), BusError> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("XACK");
        cmd.arg(stream).arg(group);
        for id in ids {
            cmd.arg(id);
        }
        cmd.query_async::<_, i64>(&mut conn).await?;
        Ok(())
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut conn = self.conn.clone();
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(consumer)
            .arg(min_idle_ms)
            .arg("0-0")
            .arg("COUNT")
            .arg(count)
            .query_async(&mut conn)
            .await?;

        // [next-start-id, [[id, [k, v, ...]], ...], (deleted-ids)]
        match reply {
            Value::Bulk(parts) if parts.len() >= 2 => parse_entry_list(&parts[1]),
            other => Err(BusError::MalformedReply(format!("{:?}", other))),
        }
    }
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::Data(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
        Value::Status(s) => Some(s.clone()),
        Value::Int(i) => Some(i.to_string()),
        _ => None,
    }
}

/// 解析 `[[id, [k, v, ...]], ...]`，跳过已被删除 (字段为 nil) 的记录
fn parse_entry_list(value: &Value) -> Result<Vec<StreamEntry>, BusError> {
    let items = match value {
        Value::Bulk(items) => items,
        Value::Nil => return Ok(Vec::new()),
        other => return Err(BusError::MalformedReply(format!("{:?}", other))),
    };

    let mut entries = Vec::with_capacity(items.len());
    for item in items {
        let pair = match item {
            Value::Bulk(pair) if pair.len() == 2 => pair,
            other => return Err(BusError::MalformedReply(format!("{:?}", other))),
        };

        let id = value_to_string(&pair[0])
            .ok_or_else(|| BusError::MalformedReply(format!("{:?}", pair[0])))?;

        let raw_fields = match &pair[1] {
            Value::Bulk(raw_fields) => raw_fields,
            Value::Nil => continue,
            other => return Err(BusError::MalformedReply(format!("{:?}", other))),
        };

        let mut fields = HashMap::new();
        for kv in raw_fields.chunks(2) {
            if let [k, v] = kv {
                if let (Some(k), Some(v)) = (value_to_string(k), value_to_string(v)) {
                    fields.insert(k, v);
                }
            }
        }
        entries.push(StreamEntry { id, fields });
    }
    Ok(entries)
}

// ==================== 内存实现 ====================

struct PendingEntry {
    consumer: String,
    delivered_at: Instant,
}

#[derive(Default)]
struct GroupState {
    /// 下一条待投递记录的下标
    next_index: usize,
    /// 记录下标 -> 未确认信息
    pending: BTreeMap<usize, PendingEntry>,
}

#[derive(Default)]
struct MemoryStream {
    entries: Vec<StreamEntry>,
    groups: HashMap<String, GroupState>,
}

/// 进程内 Stream 存储，语义与 Redis 消费者组一致
#[derive(Default)]
pub struct MemoryStreamStore {
    streams: Mutex<HashMap<String, MemoryStream>>,
    appended: Notify,
}

impl MemoryStreamStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 某个组尚未确认的记录数
    pub fn pending_count(&self, stream: &str, group: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .and_then(|s| s.groups.get(group))
            .map(|g| g.pending.len())
            .unwrap_or(0)
    }

    pub fn len(&self, stream: &str) -> usize {
        self.streams
            .lock()
            .get(stream)
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    fn take_new(&self, stream: &str, group: &str, consumer: &str, count: usize) -> Vec<StreamEntry> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(stream) else {
            return Vec::new();
        };
        let total = state.entries.len();
        let Some(group_state) = state.groups.get_mut(group) else {
            return Vec::new();
        };

        let start = group_state.next_index;
        let end = (start + count).min(total);
        let now = Instant::now();
        for index in start..end {
            group_state.pending.insert(
                index,
                PendingEntry {
                    consumer: consumer.to_string(),
                    delivered_at: now,
                },
            );
        }
        group_state.next_index = end;
        state.entries[start..end].to_vec()
    }
}

#[async_trait]
impl StreamStore for MemoryStreamStore {
    async fn append(&self, stream: &str, fields: &[(&str, &str)]) -> Result<String, BusError> {
        let id = {
            let mut streams = self.streams.lock();
            let state = streams.entry(stream.to_string()).or_default();
            let id = format!("{}-0", state.entries.len() + 1);
            state.entries.push(StreamEntry {
                id: id.clone(),
                fields: fields
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            });
            id
        };
        self.appended.notify_waiters();
        Ok(id)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), BusError> {
        let mut streams = self.streams.lock();
        streams
            .entry(stream.to_string())
            .or_default()
            .groups
            .entry(group.to_string())
            .or_default();
        Ok(())
    }

    async fn read_group(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let deadline = Instant::now() + Duration::from_millis(block_ms);
        loop {
            let notified = self.appended.notified();
            let entries = self.take_new(stream, group, consumer, count);
            if !entries.is_empty() {
                return Ok(entries);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(Vec::new());
            }
            let _ = tokio::time::timeout(deadline - now, notified).await;
        }
    }

    async fn ack(&self, stream: &str, group: &str, ids: &[String]) -> Result<(), BusError> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(());
        };
        let indexes: Vec<usize> = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| ids.contains(&e.id))
            .map(|(i, _)| i)
            .collect();
        if let Some(group_state) = state.groups.get_mut(group) {
            for index in indexes {
                group_state.pending.remove(&index);
            }
        }
        Ok(())
    }

    async fn claim_idle(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamEntry>, BusError> {
        let mut streams = self.streams.lock();
        let Some(state) = streams.get_mut(stream) else {
            return Ok(Vec::new());
        };
        let Some(group_state) = state.groups.get_mut(group) else {
            return Ok(Vec::new());
        };

        let min_idle = Duration::from_millis(min_idle_ms);
        let now = Instant::now();
        let mut claimed = Vec::new();
        for (index, pending) in group_state.pending.iter_mut() {
            if claimed.len() >= count {
                break;
            }
            if now.duration_since(pending.delivered_at) >= min_idle {
                pending.consumer = consumer.to_string();
                pending.delivered_at = now;
                claimed.push(state.entries[*index].clone());
            }
        }
        Ok(claimed)
    }
}

// ==================== Bus ====================

/// 事件总线生产端
#[derive(Clone)]
pub struct Bus {
    store: Arc<dyn StreamStore>,
}

impl Bus {
    pub fn new(store: Arc<dyn StreamStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> Arc<dyn StreamStore> {
        self.store.clone()
    }

    /// 序列化并追加事件，存储确认后返回记录 id
    pub async fn produce<E: BusEvent>(&self, channel: &str, event: &E) -> Result<String, BusError> {
        let data = serde_json::to_string(event)?;
        let id = self
            .store
            .append(channel, &[(FIELD_TYPE, E::EVENT_TYPE), (FIELD_DATA, &data)])
            .await?;
        debug!(target: "bus", "[Bus] produce {} -> {} ({})", E::EVENT_TYPE, channel, id);
        Ok(id)
    }

    /// 创建消费者组成员
    pub fn consumer(
        &self,
        channel: &str,
        group: &str,
        consumer: &str,
        options: ConsumerOptions,
    ) -> BusConsumer {
        BusConsumer::new(self.store.clone(), channel, group, consumer, options)
    }
}

/// 消费者参数
#[derive(Debug, Clone)]
pub struct ConsumerOptions {
    pub batch_size: usize,
    pub poll_timeout_ms: u64,
    pub visibility_timeout_ms: u64,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_timeout_ms: 5_000,
            visibility_timeout_ms: 30_000,
        }
    }
}

impl From<&config_crate::BusConfig> for ConsumerOptions {
    fn from(config: &config_crate::BusConfig) -> Self {
        Self {
            batch_size: config.batch_size,
            poll_timeout_ms: config.poll_timeout_ms,
            visibility_timeout_ms: config.visibility_timeout_ms,
        }
    }
}

/// 单次拉取的统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// 交给回调的条数 (含重新认领)
    pub delivered: usize,
    pub acked: usize,
    /// 回调失败，保持未确认
    pub failed: usize,
    /// 其中通过 XAUTOCLAIM 重新认领的条数
    pub reclaimed: usize,
}

enum HandleError {
    /// 无法解码，直接确认丢弃
    Decode(serde_json::Error),
    /// 回调失败，保持未确认等待重投
    Callback(anyhow::Error),
}

#[async_trait]
trait ErasedHandler: Send + Sync {
    async fn handle(&self, data: &str) -> Result<(), HandleError>;
}

struct TypedHandler<E, F> {
    callback: F,
    _event: PhantomData<fn() -> E>,
}

#[async_trait]
impl<E, F, Fut> ErasedHandler for TypedHandler<E, F>
where
    E: BusEvent,
    F: Fn(E) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn handle(&self, data: &str) -> Result<(), HandleError> {
        let event: E = serde_json::from_str(data).map_err(HandleError::Decode)?;
        (self.callback)(event).await.map_err(HandleError::Callback)
    }
}

/// 消费者组成员
pub struct BusConsumer {
    store: Arc<dyn StreamStore>,
    channel: String,
    group: String,
    consumer: String,
    options: ConsumerOptions,
    handlers: HashMap<&'static str, Arc<dyn ErasedHandler>>,
    group_ready: RwLock<bool>,
    running: RwLock<bool>,
    shutdown: ShutdownSignal,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl BusConsumer {
    pub fn new(
        store: Arc<dyn StreamStore>,
        channel: &str,
        group: &str,
        consumer: &str,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            store,
            channel: channel.to_string(),
            group: group.to_string(),
            consumer: consumer.to_string(),
            options,
            handlers: HashMap::new(),
            group_ready: RwLock::new(false),
            running: RwLock::new(false),
            shutdown: ShutdownSignal::new(),
            handle: Mutex::new(None),
        }
    }

    /// 注册某类事件的回调，回调返回 Ok 才会 ACK
    pub fn register<E, F, Fut>(mut self, callback: F) -> Self
    where
        E: BusEvent,
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.handlers.insert(
            E::EVENT_TYPE,
            Arc::new(TypedHandler {
                callback,
                _event: PhantomData,
            }),
        );
        self
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    async fn ensure_group(&self) -> Result<(), BusError> {
        if *self.group_ready.read().await {
            return Ok(());
        }
        self.store.ensure_group(&self.channel, &self.group).await?;
        *self.group_ready.write().await = true;
        Ok(())
    }

    /// 拉取一批记录并交给回调
    ///
    /// 先认领超过可见性超时的未确认记录，再读取新记录
    pub async fn poll(&self) -> Result<PollSummary, BusError> {
        self.ensure_group().await?;

        let reclaimed = self
            .store
            .claim_idle(
                &self.channel,
                &self.group,
                &self.consumer,
                self.options.visibility_timeout_ms,
                self.options.batch_size,
            )
            .await?;

        let mut summary = PollSummary {
            reclaimed: reclaimed.len(),
            ..Default::default()
        };
        if !reclaimed.is_empty() {
            info!(
                target: "bus",
                "[Bus] {}/{} 重新认领 {} 条超时未确认记录",
                self.channel, self.group, reclaimed.len()
            );
        }

        let entries = if reclaimed.is_empty() {
            self.store
                .read_group(
                    &self.channel,
                    &self.group,
                    &self.consumer,
                    self.options.batch_size,
                    self.options.poll_timeout_ms,
                )
                .await?
        } else {
            reclaimed
        };

        let mut to_ack = Vec::with_capacity(entries.len());
        for entry in &entries {
            summary.delivered += 1;
            if self.dispatch(entry).await {
                to_ack.push(entry.id.clone());
            } else {
                summary.failed += 1;
            }
        }

        summary.acked = to_ack.len();
        self.store.ack(&self.channel, &self.group, &to_ack).await?;
        Ok(summary)
    }

    /// 返回是否应当 ACK
    async fn dispatch(&self, entry: &StreamEntry) -> bool {
        let event_type = entry.field(FIELD_TYPE).unwrap_or_default();
        let Some(handler) = self.handlers.get(event_type) else {
            warn!(
                target: "bus",
                "[Bus] {} 无 {} 类型的回调，丢弃记录 {}",
                self.channel, event_type, entry.id
            );
            return true;
        };
        let data = entry.field(FIELD_DATA).unwrap_or_default();

        match handler.handle(data).await {
            Ok(()) => true,
            Err(HandleError::Decode(e)) => {
                error!(
                    target: "bus",
                    "[Bus] {} 记录 {} 解码失败，丢弃: {}",
                    self.channel, entry.id, e
                );
                true
            }
            Err(HandleError::Callback(e)) => {
                warn!(
                    target: "bus",
                    "[Bus] {} 记录 {} 处理失败，等待重投: {:#}",
                    self.channel, entry.id, e
                );
                false
            }
        }
    }

    async fn run_loop(&self) {
        info!(
            "[Bus] 消费者启动: channel={}, group={}, consumer={}",
            self.channel, self.group, self.consumer
        );

        loop {
            if !*self.running.read().await {
                break;
            }

            tokio::select! {
                result = self.poll() => {
                    if let Err(e) = result {
                        error!("[Bus] {} 拉取失败: {}", self.channel, e);
                        tokio::select! {
                            _ = tokio::time::sleep(Duration::from_secs(1)) => {}
                            _ = self.shutdown.triggered() => {}
                        }
                    }
                }
                _ = self.shutdown.triggered() => {}
            }
        }

        info!("[Bus] 消费者已停止: {}/{}", self.channel, self.consumer);
    }

    /// 在后台任务中运行，重复调用只会启动一个任务
    pub async fn start(self: &Arc<Self>) {
        {
            let mut running = self.running.write().await;
            if *running {
                return;
            }
            *running = true;
            self.shutdown.reset();
        }

        let consumer = self.clone();
        let handle = tokio::spawn(async move {
            consumer.run_loop().await;
        });
        *self.handle.lock() = Some(handle);
    }

    /// 停止并等待后台任务退出，可重复调用
    pub async fn stop(&self) {
        *self.running.write().await = false;
        self.shutdown.trigger();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
