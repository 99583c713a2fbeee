//! 交易执行模块
//!
//! - `router`: 按代币状态与程序提示选择执行路径
//! - `builder`: 计算预算、小费与签名
//! - `executor`: 构建、发送并等待确认
//! - `rpc`: 执行器依赖的链上查询
//! - `consumer`: 事件总线上的交易意图消费者

mod builder;
mod consumer;
mod executor;
mod router;
mod rpc;
mod types;
mod wallet;

pub use builder::{assemble_transaction, resign_transaction, sol_to_lamports, ComputeBudget};
pub use consumer::{IntentGuard, SwapEventConsumer, SWAP_EXECUTOR_GROUP};
pub use executor::{ExecutorConfig, SwapExecutor, SwapHandler};
pub use router::{select_route, TradeRouter};
pub use rpc::ChainRpc;
pub use types::{ExecutionError, Route};
pub use wallet::{keypair_from_base58, SwapRecordStore, WalletStore};
