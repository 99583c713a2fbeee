use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 监控钱包
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MonitorTarget {
    pub id: i64,
    /// 被监控的钱包地址
    pub wallet: String,
    pub alias: Option<String>,
    pub active: bool,
}

/// 跟单滑点模式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlippageMode {
    /// 使用系统默认滑点
    Auto,
    /// 用户自定义滑点 (bps)
    Custom(u16),
    /// 防夹模式
    AntiSandwich,
}

/// 跟单配置
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CopyTradeFollow {
    pub id: i64,
    /// 跟单者钱包 (执行交易的钱包)
    pub owner: String,
    /// 被跟随的钱包
    pub target_wallet: String,
    pub target_alias: Option<String>,
    /// true: 固定金额买入; false: 按比例买入
    pub is_fixed_buy: bool,
    /// 固定买入金额 (SOL)；按比例模式下为跟单比例
    pub fixed_buy_amount: Decimal,
    /// 自动滑点
    pub auto_follow: bool,
    /// 防夹
    pub anti_sandwich: bool,
    /// 自定义滑点 (百分比, 如 5 = 5%)
    pub custom_slippage: Decimal,
    /// 优先费 (SOL)
    pub priority: Decimal,
    /// 止损：目标卖出时全部清仓
    pub stop_loss: bool,
    /// 只买不卖
    pub no_sell: bool,
    pub active: bool,
}

impl CopyTradeFollow {
    pub fn slippage_mode(&self) -> SlippageMode {
        if self.anti_sandwich {
            SlippageMode::AntiSandwich
        } else if self.auto_follow {
            SlippageMode::Auto
        } else {
            let bps = (self.custom_slippage * Decimal::from(100))
                .round()
                .to_u16()
                .unwrap_or(10_000)
                .min(10_000);
            SlippageMode::Custom(bps)
        }
    }

    /// 优先费，<= 0 时视为未设置
    pub fn priority_fee(&self) -> Option<f64> {
        if self.priority > Decimal::ZERO {
            self.priority.to_f64()
        } else {
            None
        }
    }
}

/// 需要订阅的钱包：启用的监控目标与启用的跟单目标的并集 (去重，保持顺序)
pub fn watched_wallets(targets: &[MonitorTarget], follows: &[CopyTradeFollow]) -> Vec<String> {
    let mut wallets: Vec<String> = Vec::new();
    let candidates = targets
        .iter()
        .filter(|t| t.active)
        .map(|t| &t.wallet)
        .chain(follows.iter().filter(|f| f.active).map(|f| &f.target_wallet));

    for wallet in candidates {
        if !wallets.contains(wallet) {
            wallets.push(wallet.clone());
        }
    }
    wallets
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn follow() -> CopyTradeFollow {
        CopyTradeFollow {
            id: 1,
            owner: "owner".to_string(),
            target_wallet: "target".to_string(),
            target_alias: None,
            is_fixed_buy: true,
            fixed_buy_amount: dec!(0.05),
            auto_follow: false,
            anti_sandwich: false,
            custom_slippage: dec!(5),
            priority: dec!(0),
            stop_loss: false,
            no_sell: false,
            active: true,
        }
    }

    #[test]
    fn test_slippage_mode() {
        let mut f = follow();
        assert_eq!(f.slippage_mode(), SlippageMode::Custom(500));

        f.auto_follow = true;
        assert_eq!(f.slippage_mode(), SlippageMode::Auto);

        // 防夹优先
        f.anti_sandwich = true;
        assert_eq!(f.slippage_mode(), SlippageMode::AntiSandwich);
    }

    #[test]
    fn test_custom_slippage_is_capped() {
        let mut f = follow();
        f.custom_slippage = dec!(250);
        assert_eq!(f.slippage_mode(), SlippageMode::Custom(10_000));
    }

    #[test]
    fn test_priority_fee() {
        let mut f = follow();
        assert_eq!(f.priority_fee(), None);
        f.priority = dec!(0.001);
        assert_eq!(f.priority_fee(), Some(0.001));
    }

    #[test]
    fn test_watched_wallets_union() {
        let targets = vec![
            MonitorTarget { id: 1, wallet: "A".to_string(), alias: None, active: true },
            MonitorTarget { id: 2, wallet: "B".to_string(), alias: None, active: false },
        ];
        let mut inactive = follow();
        inactive.target_wallet = "C".to_string();
        inactive.active = false;
        let mut dup = follow();
        dup.target_wallet = "A".to_string();

        let wallets = watched_wallets(&targets, &[follow(), dup, inactive]);
        assert_eq!(wallets, vec!["A".to_string(), "target".to_string()]);
    }
}
