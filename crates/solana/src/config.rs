//! Solana 链端点配置

use serde::{Deserialize, Serialize};
use solana_sdk::commitment_config::CommitmentConfig;
use std::env;

/// Solana 链端点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaConfig {
    /// RPC URL
    pub rpc_url: String,
    /// WebSocket URL
    pub ws_url: String,
    /// Yellowstone gRPC 地址
    pub geyser_grpc_url: String,
    /// Yellowstone 访问令牌
    pub geyser_x_token: Option<String>,
    /// Jupiter API URL
    pub jupiter_api_url: String,
    /// Jito block engine URL
    pub jito_block_engine_url: String,
    /// 第三方转发服务 URL
    pub relay_api_url: String,
    pub relay_api_key: Option<String>,
    /// processed / confirmed / finalized
    pub commitment: String,
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: "https://api.mainnet-beta.solana.com".to_string(),
            ws_url: "wss://api.mainnet-beta.solana.com".to_string(),
            geyser_grpc_url: "http://127.0.0.1:10000".to_string(),
            geyser_x_token: None,
            jupiter_api_url: "https://quote-api.jup.ag/v6".to_string(),
            jito_block_engine_url: "https://mainnet.block-engine.jito.wtf".to_string(),
            relay_api_url: "https://api.zan.top".to_string(),
            relay_api_key: None,
            commitment: "confirmed".to_string(),
        }
    }
}

impl SolanaConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            rpc_url: env::var("SOLANA_RPC_URL").unwrap_or(defaults.rpc_url),
            ws_url: env::var("SOLANA_WS_URL").unwrap_or(defaults.ws_url),
            geyser_grpc_url: env::var("GEYSER_GRPC_URL").unwrap_or(defaults.geyser_grpc_url),
            geyser_x_token: env::var("GEYSER_X_TOKEN").ok().filter(|s| !s.is_empty()),
            jupiter_api_url: env::var("JUPITER_API_URL").unwrap_or(defaults.jupiter_api_url),
            jito_block_engine_url: env::var("JITO_BLOCK_ENGINE_URL")
                .unwrap_or(defaults.jito_block_engine_url),
            relay_api_url: env::var("RELAY_API_URL").unwrap_or(defaults.relay_api_url),
            relay_api_key: env::var("RELAY_API_KEY").ok().filter(|s| !s.is_empty()),
            commitment: env::var("SOLANA_COMMITMENT").unwrap_or(defaults.commitment),
        }
    }

    pub fn commitment_config(&self) -> CommitmentConfig {
        match self.commitment.as_str() {
            "processed" => CommitmentConfig::processed(),
            "finalized" => CommitmentConfig::finalized(),
            _ => CommitmentConfig::confirmed(),
        }
    }

    /// 验证配置是否有效
    pub fn is_valid(&self) -> bool {
        !self.rpc_url.is_empty() && !self.ws_url.is_empty()
    }
}
