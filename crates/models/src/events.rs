//! 事件总线上传递的事件定义

use serde::{Deserialize, Serialize};

/// 交易方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxDirection {
    Buy,
    Sell,
}

/// 持仓生命周期类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxType {
    OpenPosition,
    AddPosition,
    ReducePosition,
    ClosePosition,
}

impl TxType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TxType::OpenPosition => "open_position",
            TxType::AddPosition => "add_position",
            TxType::ReducePosition => "reduce_position",
            TxType::ClosePosition => "close_position",
        }
    }
}

/// 监控钱包的一笔已分类交易
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxEvent {
    pub signature: String,
    /// 区块时间 (unix 秒)
    pub block_time: i64,
    /// 被监控钱包
    pub who: String,
    pub mint: String,
    pub tx_direction: TxDirection,
    pub tx_type: TxType,
    /// 交易前代币数量 (最小单位)
    pub pre_token_amount: u64,
    /// 交易后代币数量 (最小单位)
    pub post_token_amount: u64,
    pub decimals: u8,
    /// SOL 变化 (lamports，含 WSOL)
    pub sol_change: i64,
    pub program_id: Option<String>,
}

impl TxEvent {
    /// 代币变化量 (最小单位, 有符号)
    pub fn token_change(&self) -> i128 {
        self.post_token_amount as i128 - self.pre_token_amount as i128
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapMode {
    ExactIn,
    ExactOut,
}

impl SwapMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapMode::ExactIn => "ExactIn",
            SwapMode::ExactOut => "ExactOut",
        }
    }
}

/// 交易意图来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapOrigin {
    User,
    Copytrade,
}

impl SwapOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwapOrigin::User => "user",
            SwapOrigin::Copytrade => "copytrade",
        }
    }
}

/// 交易意图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapEvent {
    /// 执行交易的钱包
    pub user_pubkey: String,
    pub swap_mode: SwapMode,
    pub input_mint: String,
    pub output_mint: String,
    /// 买入为 lamports，卖出为代币最小单位
    pub amount: u64,
    /// 展示用数量
    #[serde(default)]
    pub ui_amount: f64,
    pub timestamp: i64,
    pub slippage_bps: u16,
    /// 优先费 (SOL)
    #[serde(default)]
    pub priority_fee: Option<f64>,
    /// 执行程序提示 (如 pump.fun / pump AMM)
    #[serde(default)]
    pub program_id: Option<String>,
    pub origin: SwapOrigin,
    /// 跟单来源交易
    #[serde(default)]
    pub tx_event: Option<TxEvent>,
    /// 来源标识 (如跟单配置 id)
    #[serde(default)]
    pub by: Option<String>,
}

impl SwapEvent {
    /// 意图唯一标识，重投的同一意图得到相同结果
    ///
    /// 跟单意图取来源交易签名加来源标识，其余取意图字段
    pub fn intent_id(&self) -> String {
        match &self.tx_event {
            Some(tx) => format!(
                "{}:{}:{}",
                tx.signature,
                self.by.as_deref().unwrap_or(&self.user_pubkey),
                self.user_pubkey
            ),
            None => format!(
                "{}:{}:{}:{}:{}:{}",
                self.user_pubkey,
                self.swap_mode.as_str(),
                self.input_mint,
                self.output_mint,
                self.amount,
                self.timestamp
            ),
        }
    }
}

/// 交易执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwapResult {
    pub event: SwapEvent,
    pub user_pubkey: String,
    /// 提交时间 (unix 毫秒)
    pub submit_time: i64,
    pub transaction_hash: Option<String>,
    /// 提交到确认经过的区块数
    #[serde(default)]
    pub blocks_passed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlKind {
    Resume,
    Pause,
}

/// 钱包监控控制事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControlEvent {
    pub event: ControlKind,
    pub target_wallet: String,
}

impl ControlEvent {
    pub fn resume(wallet: &str) -> Self {
        Self {
            event: ControlKind::Resume,
            target_wallet: wallet.to_string(),
        }
    }

    pub fn pause(wallet: &str) -> Self {
        Self {
            event: ControlKind::Pause,
            target_wallet: wallet.to_string(),
        }
    }
}
