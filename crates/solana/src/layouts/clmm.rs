//! Raydium CLMM 池子状态

use solana_sdk::pubkey::Pubkey;

use super::{anchor_reader, AccountLayout, DecodingError, Reader, Writer};

pub const REWARD_NUM: usize = 3;
const TICK_ARRAY_BITMAP_WORDS: usize = 16;
const PADDING1_WORDS: usize = 24;
const PADDING2_WORDS: usize = 32;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardInfo {
    pub reward_state: u8,
    pub open_time: u64,
    pub end_time: u64,
    pub last_update_time: u64,
    pub emissions_per_second_x64: u128,
    pub reward_total_emissioned: u64,
    pub reward_claimed: u64,
    pub token_mint: Pubkey,
    pub token_vault: Pubkey,
    pub authority: Pubkey,
    pub reward_growth_global_x64: u128,
}

impl RewardInfo {
    pub const LEN: usize = 1 + 8 * 3 + 16 + 8 * 2 + 32 * 3 + 16;

    fn read(r: &mut Reader<'_>) -> Result<Self, DecodingError> {
        Ok(Self {
            reward_state: r.u8()?,
            open_time: r.u64()?,
            end_time: r.u64()?,
            last_update_time: r.u64()?,
            emissions_per_second_x64: r.u128()?,
            reward_total_emissioned: r.u64()?,
            reward_claimed: r.u64()?,
            token_mint: r.pubkey()?,
            token_vault: r.pubkey()?,
            authority: r.pubkey()?,
            reward_growth_global_x64: r.u128()?,
        })
    }

    fn write(&self, w: &mut Writer) {
        w.u8(self.reward_state)
            .u64(self.open_time)
            .u64(self.end_time)
            .u64(self.last_update_time)
            .u128(self.emissions_per_second_x64)
            .u64(self.reward_total_emissioned)
            .u64(self.reward_claimed)
            .pubkey(&self.token_mint)
            .pubkey(&self.token_vault)
            .pubkey(&self.authority)
            .u128(self.reward_growth_global_x64);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClmmPoolState {
    pub bump: u8,
    pub amm_config: Pubkey,
    pub owner: Pubkey,
    pub token_mint_0: Pubkey,
    pub token_mint_1: Pubkey,
    pub token_vault_0: Pubkey,
    pub token_vault_1: Pubkey,
    pub observation_key: Pubkey,
    pub mint_decimals_0: u8,
    pub mint_decimals_1: u8,
    pub tick_spacing: u16,
    pub liquidity: u128,
    pub sqrt_price_x64: u128,
    pub tick_current: i32,
    pub fee_growth_global_0_x64: u128,
    pub fee_growth_global_1_x64: u128,
    pub protocol_fees_token_0: u64,
    pub protocol_fees_token_1: u64,
    pub swap_in_amount_token_0: u128,
    pub swap_out_amount_token_1: u128,
    pub swap_in_amount_token_1: u128,
    pub swap_out_amount_token_0: u128,
    /// bit0 开仓 / bit1 减仓 / bit2 领取 / bit4 交换 为禁用位
    pub status: u8,
    pub reward_infos: [RewardInfo; REWARD_NUM],
    pub tick_array_bitmap: [u64; TICK_ARRAY_BITMAP_WORDS],
    pub total_fees_token_0: u64,
    pub total_fees_claimed_token_0: u64,
    pub total_fees_token_1: u64,
    pub total_fees_claimed_token_1: u64,
    pub fund_fees_token_0: u64,
    pub fund_fees_token_1: u64,
    pub open_time: u64,
    pub recent_epoch: u64,
}

impl ClmmPoolState {
    pub const DISCRIMINATOR: [u8; 8] = [247, 237, 227, 245, 215, 195, 222, 70];

    /// token1/token0 价格 (按小数位调整)
    pub fn price(&self) -> f64 {
        let sqrt = self.sqrt_price_x64 as f64 / (1u128 << 64) as f64;
        let scale = 10f64.powi(self.mint_decimals_0 as i32 - self.mint_decimals_1 as i32);
        sqrt * sqrt * scale
    }

    pub fn swap_enabled(&self) -> bool {
        self.status & (1 << 4) == 0
    }
}

impl AccountLayout for ClmmPoolState {
    const KIND: &'static str = "ClmmPoolState";
    const LEN: usize = 1544;

    fn decode(data: &[u8]) -> Result<Self, DecodingError> {
        let mut r = anchor_reader::<Self>(data, &Self::DISCRIMINATOR)?;

        let bump = r.u8()?;
        let amm_config = r.pubkey()?;
        let owner = r.pubkey()?;
        let token_mint_0 = r.pubkey()?;
        let token_mint_1 = r.pubkey()?;
        let token_vault_0 = r.pubkey()?;
        let token_vault_1 = r.pubkey()?;
        let observation_key = r.pubkey()?;
        let mint_decimals_0 = r.u8()?;
        let mint_decimals_1 = r.u8()?;
        let tick_spacing = r.u16()?;
        let liquidity = r.u128()?;
        let sqrt_price_x64 = r.u128()?;
        let tick_current = r.i32()?;
        // padding3, padding4
        r.skip(4)?;
        let fee_growth_global_0_x64 = r.u128()?;
        let fee_growth_global_1_x64 = r.u128()?;
        let protocol_fees_token_0 = r.u64()?;
        let protocol_fees_token_1 = r.u64()?;
        let swap_in_amount_token_0 = r.u128()?;
        let swap_out_amount_token_1 = r.u128()?;
        let swap_in_amount_token_1 = r.u128()?;
        let swap_out_amount_token_0 = r.u128()?;
        let status = r.u8()?;
        r.skip(7)?;

        let reward_infos = [
            RewardInfo::read(&mut r)?,
            RewardInfo::read(&mut r)?,
            RewardInfo::read(&mut r)?,
        ];
        let mut tick_array_bitmap = [0u64; TICK_ARRAY_BITMAP_WORDS];
        for word in tick_array_bitmap.iter_mut() {
            *word = r.u64()?;
        }

        Ok(Self {
            bump,
            amm_config,
            owner,
            token_mint_0,
            token_mint_1,
            token_vault_0,
            token_vault_1,
            observation_key,
            mint_decimals_0,
            mint_decimals_1,
            tick_spacing,
            liquidity,
            sqrt_price_x64,
            tick_current,
            fee_growth_global_0_x64,
            fee_growth_global_1_x64,
            protocol_fees_token_0,
            protocol_fees_token_1,
            swap_in_amount_token_0,
            swap_out_amount_token_1,
            swap_in_amount_token_1,
            swap_out_amount_token_0,
            status,
            reward_infos,
            tick_array_bitmap,
            total_fees_token_0: r.u64()?,
            total_fees_claimed_token_0: r.u64()?,
            total_fees_token_1: r.u64()?,
            total_fees_claimed_token_1: r.u64()?,
            fund_fees_token_0: r.u64()?,
            fund_fees_token_1: r.u64()?,
            open_time: r.u64()?,
            recent_epoch: r.u64()?,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::LEN);
        w.bytes(&Self::DISCRIMINATOR)
            .u8(self.bump)
            .pubkey(&self.amm_config)
            .pubkey(&self.owner)
            .pubkey(&self.token_mint_0)
            .pubkey(&self.token_mint_1)
            .pubkey(&self.token_vault_0)
            .pubkey(&self.token_vault_1)
            .pubkey(&self.observation_key)
            .u8(self.mint_decimals_0)
            .u8(self.mint_decimals_1)
            .u16(self.tick_spacing)
            .u128(self.liquidity)
            .u128(self.sqrt_price_x64)
            .i32(self.tick_current)
            .zeros(4)
            .u128(self.fee_growth_global_0_x64)
            .u128(self.fee_growth_global_1_x64)
            .u64(self.protocol_fees_token_0)
            .u64(self.protocol_fees_token_1)
            .u128(self.swap_in_amount_token_0)
            .u128(self.swap_out_amount_token_1)
            .u128(self.swap_in_amount_token_1)
            .u128(self.swap_out_amount_token_0)
            .u8(self.status)
            .zeros(7);
        for reward in &self.reward_infos {
            reward.write(&mut w);
        }
        for word in &self.tick_array_bitmap {
            w.u64(*word);
        }
        w.u64(self.total_fees_token_0)
            .u64(self.total_fees_claimed_token_0)
            .u64(self.total_fees_token_1)
            .u64(self.total_fees_claimed_token_1)
            .u64(self.fund_fees_token_0)
            .u64(self.fund_fees_token_1)
            .u64(self.open_time)
            .u64(self.recent_epoch)
            .zeros(8 * (PADDING1_WORDS + PADDING2_WORDS));
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> ClmmPoolState {
        let mut pool = ClmmPoolState {
            bump: 255,
            amm_config: Pubkey::new_unique(),
            owner: Pubkey::new_unique(),
            token_mint_0: crate::types::WSOL_MINT,
            token_mint_1: Pubkey::new_unique(),
            token_vault_0: Pubkey::new_unique(),
            token_vault_1: Pubkey::new_unique(),
            observation_key: Pubkey::new_unique(),
            mint_decimals_0: 9,
            mint_decimals_1: 6,
            tick_spacing: 60,
            liquidity: u64::MAX as u128 + 12_345,
            sqrt_price_x64: 1u128 << 64,
            tick_current: -887_272,
            swap_in_amount_token_0: u128::MAX - 1,
            status: 0b1_0000,
            open_time: 1_700_000_000,
            recent_epoch: 612,
            ..Default::default()
        };
        pool.reward_infos[1] = RewardInfo {
            reward_state: 2,
            emissions_per_second_x64: 3u128 << 70,
            token_mint: Pubkey::new_unique(),
            ..Default::default()
        };
        pool.tick_array_bitmap[15] = u64::MAX;
        pool
    }

    #[test]
    fn test_layout_size() {
        assert_eq!(RewardInfo::LEN, 169);
        assert_eq!(ClmmPoolState::default().encode().len(), ClmmPoolState::LEN);
    }

    #[test]
    fn test_round_trip() {
        let pool = pool();
        let bytes = pool.encode();
        assert_eq!(ClmmPoolState::decode(&bytes).unwrap(), pool);
        assert!(!pool.swap_enabled());
    }

    #[test]
    fn test_price_with_decimals() {
        let pool = pool();
        // sqrt 价格为 1，小数位差 3
        assert!((pool.price() - 1_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_discriminator_mismatch() {
        let mut bytes = pool().encode();
        bytes[7] = 0;
        assert!(matches!(
            ClmmPoolState::decode(&bytes),
            Err(DecodingError::DiscriminatorMismatch { .. })
        ));
    }
}
