mod bootstrap;

use anyhow::Result;
use config_crate::AppConfig;
use tracing::info;
use utils::LoggerManager;

use crate::bootstrap::{setup_panic_hook, Application};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = AppConfig::load()?;

    // 初始化日志系统
    let _logger = LoggerManager::init(&config.log.level, config.log.utc_offset_hours);

    // 设置 panic hook
    setup_panic_hook();

    info!("========================================");
    info!("  Solana 跟单交易系统启动");
    info!("========================================");

    let app = Application::start(config).await?;

    tokio::signal::ctrl_c().await?;
    info!("收到退出信号，开始关闭...");

    app.shutdown().await?;

    Ok(())
}
