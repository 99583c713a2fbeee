//! pump.fun 联合曲线账户与定价

use solana_sdk::pubkey::Pubkey;

use super::{anchor_reader, AccountLayout, DecodingError, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BondingCurve {
    pub virtual_token_reserves: u64,
    pub virtual_sol_reserves: u64,
    pub real_token_reserves: u64,
    pub real_sol_reserves: u64,
    pub token_total_supply: u64,
    /// 为 true 时已迁移到 AMM
    pub complete: bool,
    pub creator: Pubkey,
}

impl BondingCurve {
    pub const DISCRIMINATOR: [u8; 8] = [23, 183, 248, 55, 96, 216, 172, 96];

    /// 花费 `sol_in` lamports 可得的代币数量
    pub fn buy_quote(&self, sol_in: u64) -> u64 {
        bonding_curve_buy_amount(
            self.virtual_sol_reserves,
            self.virtual_token_reserves,
            self.real_token_reserves,
            sol_in,
        )
    }

    /// 卖出 `token_in` 可得的 lamports (未扣手续费)
    pub fn sell_quote(&self, token_in: u64) -> u64 {
        bonding_curve_sell_amount(
            self.virtual_sol_reserves,
            self.virtual_token_reserves,
            token_in,
        )
    }
}

impl AccountLayout for BondingCurve {
    const KIND: &'static str = "BondingCurve";
    const LEN: usize = 8 + 8 * 5 + 1 + 32;

    fn decode(data: &[u8]) -> Result<Self, DecodingError> {
        let mut r = anchor_reader::<Self>(data, &Self::DISCRIMINATOR)?;
        Ok(Self {
            virtual_token_reserves: r.u64()?,
            virtual_sol_reserves: r.u64()?,
            real_token_reserves: r.u64()?,
            real_sol_reserves: r.u64()?,
            token_total_supply: r.u64()?,
            complete: r.bool()?,
            creator: r.pubkey()?,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::LEN);
        w.bytes(&Self::DISCRIMINATOR)
            .u64(self.virtual_token_reserves)
            .u64(self.virtual_sol_reserves)
            .u64(self.real_token_reserves)
            .u64(self.real_sol_reserves)
            .u64(self.token_total_supply)
            .bool(self.complete)
            .pubkey(&self.creator);
        w.finish()
    }
}

/// 恒定乘积买入：`min(R_token - floor(R_sol * R_token / (R_sol + A)) - 1, real_token)`
pub fn bonding_curve_buy_amount(
    virtual_sol_reserves: u64,
    virtual_token_reserves: u64,
    real_token_reserves: u64,
    sol_in: u64,
) -> u64 {
    if sol_in == 0 {
        return 0;
    }
    let sol = virtual_sol_reserves as u128;
    let token = virtual_token_reserves as u128;
    let denominator = sol.saturating_add(sol_in as u128);
    if denominator == 0 {
        return 0;
    }
    let remaining = sol.saturating_mul(token) / denominator;
    let out = token.saturating_sub(remaining).saturating_sub(1);
    out.min(real_token_reserves as u128) as u64
}

/// 恒定乘积卖出：`floor(A * R_sol / (R_token + A))`
pub fn bonding_curve_sell_amount(
    virtual_sol_reserves: u64,
    virtual_token_reserves: u64,
    token_in: u64,
) -> u64 {
    if token_in == 0 {
        return 0;
    }
    let denominator = (virtual_token_reserves as u128).saturating_add(token_in as u128);
    if denominator == 0 {
        return 0;
    }
    let out = (token_in as u128).saturating_mul(virtual_sol_reserves as u128) / denominator;
    out.min(virtual_sol_reserves as u128) as u64
}
