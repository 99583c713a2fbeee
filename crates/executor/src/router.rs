//! 交易路由
//!
//! 优先级：
//! 1. 已确认迁移到 AMM 的代币走 AMM (忽略提示)
//! 2. 未确认迁移，且提示为联合曲线程序或 mint 以 `pump` 结尾，走联合曲线
//! 3. 提示为 AMM 程序走 AMM
//! 4. 没有提示 (或提示为聚合器) 走 Jupiter
//! 5. 其他提示不支持

use solana_chain::{jupiter, pump_amm, pump_fun, DecodingError, LaunchStatusSource, WSOL};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

use models::SwapEvent;

use crate::types::{ExecutionError, Route};

/// pump.fun 代币地址后缀
const PUMP_MINT_SUFFIX: &str = "pump";

pub struct TradeRouter {
    launch_status: Arc<dyn LaunchStatusSource>,
}

impl TradeRouter {
    pub fn new(launch_status: Arc<dyn LaunchStatusSource>) -> Self {
        Self { launch_status }
    }

    /// 交易中非 WSOL 一侧的代币
    pub fn token_mint(event: &SwapEvent) -> Result<Pubkey, ExecutionError> {
        let mint = if event.input_mint == WSOL {
            &event.output_mint
        } else {
            &event.input_mint
        };
        Pubkey::from_str(mint).map_err(|_| ExecutionError::InvalidInput(format!("mint {}", mint)))
    }

    pub async fn route(&self, event: &SwapEvent) -> Result<Route, ExecutionError> {
        let mint = Self::token_mint(event)?;

        let launched = self
            .launch_status
            .is_launched(&mint)
            .await
            .map_err(launch_status_error)?;

        let route = select_route(&mint.to_string(), event.program_id.as_deref(), launched)?;
        debug!(
            target: "trade_executor",
            "[Router] {} hint={:?} launched={} -> {}",
            mint,
            event.program_id,
            launched,
            route.as_str()
        );
        Ok(route)
    }
}

/// 账户解码失败重试无意义，其余按网络错误处理
fn launch_status_error(e: anyhow::Error) -> ExecutionError {
    match e.downcast::<DecodingError>() {
        Ok(decoding) => ExecutionError::Decoding(decoding),
        Err(e) => ExecutionError::Rpc(format!("{:#}", e)),
    }
}

/// 路由规则 (不含链上查询)
pub fn select_route(mint: &str, hint: Option<&str>, launched: bool) -> Result<Route, ExecutionError> {
    if launched {
        return Ok(Route::Amm);
    }

    let hint = hint.filter(|h| !h.is_empty());
    let is_program = |program: &Pubkey| hint == Some(program.to_string().as_str());

    if is_program(&pump_fun::PROGRAM_ID) || mint.ends_with(PUMP_MINT_SUFFIX) {
        return Ok(Route::BondingCurve);
    }
    if is_program(&pump_amm::PROGRAM_ID) {
        return Ok(Route::Amm);
    }
    match hint {
        None => Ok(Route::Aggregator),
        Some(_) if is_program(&jupiter::PROGRAM_ID) => Ok(Route::Aggregator),
        Some(other) => Err(ExecutionError::UnsupportedRoute(other.to_string())),
    }
}
