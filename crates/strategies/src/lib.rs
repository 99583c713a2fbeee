//! 跟单策略
//!
//! - `subscription_manager`: 钱包订阅与控制事件
//! - `orchestrator`: 由监控交易生成跟单意图

mod orchestrator;
mod store;
mod subscription_manager;

pub use orchestrator::{buy_amount, sell_amount, CopyTradeOrchestrator, DispatchSummary, OrchestratorConfig};
pub use store::{DbFollowStore, FollowStore, TokenBalanceSource};
pub use subscription_manager::{apply_control, SubscriptionManager, WALLET_MONITOR_GROUP};
