use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub bus: BusConfig,
    pub cache: CacheConfig,
    pub trading: TradingConfig,
    pub subscription: SubscriptionConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    pub url: String,
}

/// 事件总线 (Redis Streams) 配置
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// 每次拉取的最大条数
    pub batch_size: usize,
    /// XREADGROUP 阻塞时长 (毫秒)
    pub poll_timeout_ms: u64,
    /// 未确认消息超过该时长后可被其他消费者认领 (毫秒)
    pub visibility_timeout_ms: u64,
    /// 单个 stream 近似最大长度
    pub stream_maxlen: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            poll_timeout_ms: 5_000,
            visibility_timeout_ms: 30_000,
            stream_maxlen: 100_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// 自动刷新缓存的更新间隔 (秒)，同时作为 TTL
    pub update_interval_secs: u64,
    /// 代币已迁移到 AMM 的缓存时长 (秒)
    pub launch_status_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            update_interval_secs: 30,
            launch_status_ttl_secs: 600,
        }
    }
}

/// 交易发送通道
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SenderKind {
    /// 默认 RPC 节点
    Rpc,
    /// Jito bundle
    Jito,
    /// 第三方转发服务
    Relay,
}

impl SenderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "rpc" => Some(SenderKind::Rpc),
            "jito" => Some(SenderKind::Jito),
            "relay" => Some(SenderKind::Relay),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
    /// 默认优先费 (SOL)
    pub default_priority_fee_sol: f64,
    pub default_compute_unit_limit: u32,
    /// 自动滑点 (bps)
    pub default_slippage_bps: u16,
    /// 防夹模式滑点 (bps)
    pub anti_sandwich_slippage_bps: u16,
    /// 发送前模拟
    pub simulate_before_send: bool,
    pub sender: SenderKind,
    /// Jito 小费 (lamports)
    pub jito_tip_lamports: u64,
    /// 意图创建后超过该秒数不再执行，0 表示不限
    pub max_intent_age_secs: u64,
    /// 意图认领记录保留时长 (秒)
    pub intent_claim_ttl_secs: u64,
    /// 提交后等待确认的最长时间 (秒)
    pub confirm_timeout_secs: u64,
}

impl Default for TradingConfig {
    fn default() -> Self {
        Self {
            default_priority_fee_sol: 0.0001,
            default_compute_unit_limit: 200_000,
            default_slippage_bps: 2_500,
            anti_sandwich_slippage_bps: 1_000,
            simulate_before_send: false,
            sender: SenderKind::Rpc,
            jito_tip_lamports: 100_000,
            max_intent_age_secs: 60,
            intent_claim_ttl_secs: 3_600,
            confirm_timeout_secs: 30,
        }
    }
}

/// 钱包交易订阅后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum SubscriptionBackendKind {
    /// WebSocket logsSubscribe
    Logs,
    /// Yellowstone gRPC
    Geyser,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionConfig {
    pub backend: SubscriptionBackendKind,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    pub level: String,
    /// 日志时间的 UTC 偏移 (小时)
    pub utc_offset_hours: i8,
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        // 加载 .env 文件
        dotenv::dotenv().ok();

        // 数据库配置
        let db_host = env::var("DB_HOST").context("DB_HOST not set")?;
        let db_port = env::var("DB_PORT").context("DB_PORT not set")?;
        let db_user = env::var("DB_USER").context("DB_USER not set")?;
        let db_password = env::var("DB_PASSWORD").context("DB_PASSWORD not set")?;
        let db_name = env::var("DB_NAME").context("DB_NAME not set")?;
        let db_max_connections = env::var("DB_MAX_CONNECTIONS")
            .unwrap_or_else(|_| "10".to_string())
            .parse()
            .context("Invalid DB_MAX_CONNECTIONS")?;

        // URL encode username and password to handle special characters
        let encoded_user = urlencoding::encode(&db_user);
        let encoded_password = urlencoding::encode(&db_password);

        let database_url = format!(
            "mysql://{}:{}@{}:{}/{}",
            encoded_user, encoded_password, db_host, db_port, db_name
        );

        let redis = RedisConfig {
            url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string()),
        };

        let bus_default = BusConfig::default();
        let bus = BusConfig {
            batch_size: env::var("BUS_BATCH_SIZE")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(bus_default.batch_size),
            poll_timeout_ms: env::var("BUS_POLL_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(bus_default.poll_timeout_ms),
            visibility_timeout_ms: env::var("BUS_VISIBILITY_TIMEOUT_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(bus_default.visibility_timeout_ms),
            stream_maxlen: env::var("BUS_STREAM_MAXLEN")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(bus_default.stream_maxlen),
        };

        let cache = CacheConfig {
            update_interval_secs: env::var("CACHE_UPDATE_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            launch_status_ttl_secs: env::var("LAUNCH_STATUS_TTL_SECS")
                .unwrap_or_else(|_| "600".to_string())
                .parse()
                .unwrap_or(600),
        };

        // 交易配置
        let sender_name = env::var("TRADE_SENDER").unwrap_or_else(|_| "rpc".to_string());
        let sender = SenderKind::from_str(&sender_name)
            .with_context(|| format!("Invalid TRADE_SENDER: {}", sender_name))?;

        let trading_default = TradingConfig::default();
        let trading = TradingConfig {
            default_priority_fee_sol: env::var("DEFAULT_PRIORITY_FEE_SOL")
                .unwrap_or_else(|_| "0.0001".to_string())
                .parse()
                .unwrap_or(0.0001),
            default_compute_unit_limit: env::var("DEFAULT_COMPUTE_UNIT_LIMIT")
                .unwrap_or_else(|_| "200000".to_string())
                .parse()
                .unwrap_or(200_000),
            default_slippage_bps: env::var("DEFAULT_SLIPPAGE_BPS")
                .unwrap_or_else(|_| "2500".to_string())
                .parse()
                .unwrap_or(2_500),
            anti_sandwich_slippage_bps: env::var("ANTI_SANDWICH_SLIPPAGE_BPS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1_000),
            simulate_before_send: env::var("SIMULATE_BEFORE_SEND")
                .unwrap_or_else(|_| "false".to_string())
                .parse()
                .unwrap_or(false),
            sender,
            jito_tip_lamports: env::var("JITO_TIP_LAMPORTS")
                .unwrap_or_else(|_| "100000".to_string())
                .parse()
                .unwrap_or(100_000),
            max_intent_age_secs: env::var("MAX_INTENT_AGE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(trading_default.max_intent_age_secs),
            intent_claim_ttl_secs: env::var("INTENT_CLAIM_TTL_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(trading_default.intent_claim_ttl_secs),
            confirm_timeout_secs: env::var("CONFIRM_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(trading_default.confirm_timeout_secs),
        };

        // 订阅后端
        let backend = match env::var("SUBSCRIPTION_BACKEND")
            .unwrap_or_else(|_| "logs".to_string())
            .to_lowercase()
            .as_str()
        {
            "geyser" | "grpc" => SubscriptionBackendKind::Geyser,
            _ => SubscriptionBackendKind::Logs,
        };

        // 日志配置
        let log = LogConfig {
            level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            utc_offset_hours: env::var("LOG_UTC_OFFSET_HOURS")
                .unwrap_or_else(|_| "8".to_string())
                .parse()
                .unwrap_or(8),
        };

        Ok(Self {
            database: DatabaseConfig {
                url: database_url,
                max_connections: db_max_connections,
            },
            redis,
            bus,
            cache,
            trading,
            subscription: SubscriptionConfig { backend },
            log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sender_kind_from_str() {
        assert_eq!(SenderKind::from_str("JITO"), Some(SenderKind::Jito));
        assert_eq!(SenderKind::from_str("relay"), Some(SenderKind::Relay));
        assert_eq!(SenderKind::from_str("rpc"), Some(SenderKind::Rpc));
        assert_eq!(SenderKind::from_str("flashbots"), None);
    }

    #[test]
    fn test_defaults() {
        let bus = BusConfig::default();
        assert_eq!(bus.batch_size, 10);
        assert!(bus.visibility_timeout_ms > bus.poll_timeout_ms);

        let cache = CacheConfig::default();
        assert_eq!(cache.update_interval_secs, 30);

        let trading = TradingConfig::default();
        assert_eq!(trading.max_intent_age_secs, 60);
        // 认领记录须比重投窗口长
        assert!(trading.intent_claim_ttl_secs * 1_000 > bus.visibility_timeout_ms);
        assert!(trading.confirm_timeout_secs > 0);
    }
}
