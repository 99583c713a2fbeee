use std::fs;
use time::UtcOffset;
use tracing_subscriber::filter::{EnvFilter, FilterFn, LevelFilter};
use tracing_subscriber::fmt::time::OffsetTime;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, Layer};
use tracing_appender::{non_blocking, rolling};

/// 独立输出到专用文件的 target
const DEDICATED_TARGETS: [&str; 3] = ["trade_executor", "copytrade", "bus"];

/// 日志管理器 - 基于target分类的日志系统
pub struct LoggerManager {
    _guards: Vec<non_blocking::WorkerGuard>,
}

impl LoggerManager {
    /// 初始化日志系统
    ///
    /// 日志分类：
    /// - app.log: 通用应用日志
    /// - trade.log: 交易执行日志 (路由、构建、发送)
    /// - copytrade.log: 跟单决策日志
    /// - bus.log: 事件总线投递/确认/认领日志
    pub fn init(level: &str, utc_offset_hours: i8) -> Self {
        let mut guards = Vec::new();

        // 创建日志目录
        fs::create_dir_all("logs").ok();

        let offset = UtcOffset::from_hms(utc_offset_hours, 0, 0).unwrap_or(UtcOffset::UTC);
        let timer = OffsetTime::new(offset, time::format_description::well_known::Rfc3339);

        // 1. 控制台输出 - 由 RUST_LOG 控制级别
        let env_filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
        let console_layer = fmt::layer()
            .compact()
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(env_filter);

        // 2. 通用应用日志 (app.log)
        let (app_writer, app_guard) = non_blocking(rolling::daily("logs", "app.log"));
        guards.push(app_guard);

        let app_layer = fmt::layer()
            .compact()
            .with_writer(app_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(LevelFilter::INFO)
            .with_filter(FilterFn::new(|metadata| {
                !DEDICATED_TARGETS.contains(&metadata.target())
            }));

        // 3. 交易执行日志 (trade.log)
        let (trade_writer, trade_guard) = non_blocking(rolling::daily("logs", "trade.log"));
        guards.push(trade_guard);

        let trade_layer = fmt::layer()
            .compact()
            .with_writer(trade_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(FilterFn::new(|metadata| {
                metadata.target() == "trade_executor"
            }));

        // 4. 跟单日志 (copytrade.log)
        let (copytrade_writer, copytrade_guard) =
            non_blocking(rolling::daily("logs", "copytrade.log"));
        guards.push(copytrade_guard);

        let copytrade_layer = fmt::layer()
            .compact()
            .with_writer(copytrade_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer.clone())
            .with_filter(FilterFn::new(|metadata| metadata.target() == "copytrade"));

        // 5. 事件总线日志 (bus.log)，debug 级别的投递细节只写文件
        let (bus_writer, bus_guard) = non_blocking(rolling::daily("logs", "bus.log"));
        guards.push(bus_guard);

        let bus_layer = fmt::layer()
            .compact()
            .with_writer(bus_writer)
            .with_ansi(false)
            .with_target(true)
            .with_timer(timer)
            .with_filter(FilterFn::new(|metadata| metadata.target() == "bus"));

        // 初始化tracing订阅器
        tracing_subscriber::registry()
            .with(console_layer)
            .with(app_layer)
            .with(trade_layer)
            .with(copytrade_layer)
            .with(bus_layer)
            .init();

        Self { _guards: guards }
    }
}
