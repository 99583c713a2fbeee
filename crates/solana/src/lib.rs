//! Solana 链交互模块
//!
//! - 账户布局解码 (pump.fun / pump AMM / Raydium CLMM / SPL mint)
//! - 交易解析与分类
//! - 钱包交易订阅 (logsSubscribe / Geyser gRPC)
//! - 交易构建所需的 DEX 指令与缓存
//! - 交易发送 (RPC / Jito / 中继)

pub mod cache;
pub mod client;
pub mod config;
pub mod dex;
pub mod layouts;
pub mod parser;
pub mod senders;
pub mod subscription;
pub mod types;

pub use cache::{BlockhashCache, LaunchStatusCache, LaunchStatusSource, RentExemptCache};
pub use client::{AccountFetcher, SolanaClient};
pub use config::SolanaConfig;
pub use layouts::{AccountLayout, DecodingError};
pub use parser::{ParseError, ParsedTransaction, RawTransaction};
pub use senders::{SendError, SenderKind, TransactionSender, TxStatus};
pub use subscription::{
    build_subscriber, SubscriptionBackendKind, TransactionSubscriber, WalletNotification,
};
pub use types::*;
