//! Jupiter 聚合器交互模块
//!
//! 没有直连路由时使用 Jupiter 报价 + swap 交易

use anyhow::{Context, Result};
use base64::{engine::general_purpose, Engine as _};
use models::SwapMode;
use serde::{Deserialize, Serialize};
use solana_sdk::{pubkey::Pubkey, transaction::VersionedTransaction};
use tracing::debug;

/// Jupiter API 基础 URL
pub const JUPITER_API_BASE: &str = "https://quote-api.jup.ag/v6";

/// Jupiter 报价响应
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoteResponse {
    pub input_mint: String,
    pub in_amount: String,
    pub output_mint: String,
    pub out_amount: String,
    pub other_amount_threshold: String,
    pub swap_mode: String,
    pub slippage_bps: u16,
    pub price_impact_pct: String,
    pub route_plan: Vec<RoutePlanStep>,
    #[serde(default)]
    pub context_slot: u64,
    #[serde(default)]
    pub time_taken: f64,
}

/// 路由计划步骤
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutePlanStep {
    pub swap_info: SwapInfo,
    pub percent: u8,
}

/// Swap 信息
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapInfo {
    pub amm_key: String,
    pub label: Option<String>,
    pub input_mint: String,
    pub output_mint: String,
    pub in_amount: String,
    pub out_amount: String,
    pub fee_amount: String,
    pub fee_mint: String,
}

/// Jupiter Swap 请求
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapRequest {
    pub quote_response: QuoteResponse,
    pub user_public_key: String,
    pub wrap_and_unwrap_sol: bool,
    pub dynamic_compute_unit_limit: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub compute_unit_price_micro_lamports: Option<u64>,
}

/// Jupiter Swap 响应
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapResponse {
    pub swap_transaction: String,
    pub last_valid_block_height: u64,
    #[serde(default)]
    pub prioritization_fee_lamports: u64,
}

impl SwapResponse {
    /// 解码 base64 交易 (签名需由调用方重新填写)
    pub fn decode_transaction(&self) -> Result<VersionedTransaction> {
        let bytes = general_purpose::STANDARD
            .decode(&self.swap_transaction)
            .context("decode jupiter swap transaction base64")?;
        let tx: VersionedTransaction =
            bincode::deserialize(&bytes).context("deserialize jupiter swap transaction")?;
        Ok(tx)
    }
}

/// Jupiter 客户端
pub struct JupiterApi {
    client: reqwest::Client,
    base_url: String,
}

impl JupiterApi {
    pub fn new() -> Self {
        Self::with_url(JUPITER_API_BASE)
    }

    pub fn with_url(base_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn quote_url(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        swap_mode: SwapMode,
    ) -> String {
        format!(
            "{}/quote?inputMint={}&outputMint={}&amount={}&slippageBps={}&swapMode={}",
            self.base_url,
            input_mint,
            output_mint,
            amount,
            slippage_bps,
            swap_mode.as_str()
        )
    }

    /// 获取报价
    pub async fn get_quote(
        &self,
        input_mint: &Pubkey,
        output_mint: &Pubkey,
        amount: u64,
        slippage_bps: u16,
        swap_mode: SwapMode,
    ) -> Result<QuoteResponse> {
        let url = self.quote_url(input_mint, output_mint, amount, slippage_bps, swap_mode);

        debug!("[Jupiter] 获取报价: {} -> {}, amount={}", input_mint, output_mint, amount);

        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Jupiter API error: {} - {}", status, text);
        }

        let quote = response.json::<QuoteResponse>().await?;

        debug!(
            "[Jupiter] 报价结果: {} -> {}, out_amount={}",
            input_mint, output_mint, quote.out_amount
        );

        Ok(quote)
    }

    /// 获取 Swap 交易
    pub async fn get_swap_transaction(
        &self,
        quote: QuoteResponse,
        user_pubkey: &Pubkey,
        compute_unit_price_micro_lamports: Option<u64>,
    ) -> Result<SwapResponse> {
        let url = format!("{}/swap", self.base_url);

        let request = SwapRequest {
            quote_response: quote,
            user_public_key: user_pubkey.to_string(),
            wrap_and_unwrap_sol: true,
            dynamic_compute_unit_limit: true,
            compute_unit_price_micro_lamports,
        };

        let response = self.client.post(&url).json(&request).send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            anyhow::bail!("Jupiter Swap API error: {} - {}", status, text);
        }

        let swap = response.json::<SwapResponse>().await?;
        Ok(swap)
    }
}

impl Default for JupiterApi {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::{
        hash::Hash, message::Message, signature::Keypair, signer::Signer,
        transaction::Transaction,
    };

    #[test]
    fn test_quote_url() {
        let api = JupiterApi::with_url("https://quote-api.jup.ag/v6/");
        let input = crate::types::WSOL_MINT;
        let output = Pubkey::new_unique();
        let url = api.quote_url(&input, &output, 50_000_000, 250, SwapMode::ExactIn);
        assert_eq!(
            url,
            format!(
                "https://quote-api.jup.ag/v6/quote?inputMint={}&outputMint={}&amount=50000000&slippageBps=250&swapMode=ExactIn",
                input, output
            )
        );
    }

    #[test]
    fn test_decode_swap_transaction() {
        let payer = Keypair::new();
        let message = Message::new(&[], Some(&payer.pubkey()));
        let tx = Transaction::new(&[&payer], message, Hash::new_unique());
        let versioned = VersionedTransaction::from(tx);
        let encoded = general_purpose::STANDARD.encode(bincode::serialize(&versioned).unwrap());

        let response = SwapResponse {
            swap_transaction: encoded,
            last_valid_block_height: 10,
            prioritization_fee_lamports: 0,
        };
        assert_eq!(response.decode_transaction().unwrap(), versioned);
    }
}
