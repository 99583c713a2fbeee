//! pump AMM 交易指令与恒定乘积报价
//!
//! 池子的 quote 侧为 WSOL，买入前需要包装 SOL，卖出后关闭 WSOL 账户。

use anyhow::Result;
use borsh::BorshSerialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

use super::{anchor_data, associated_token_address, BPS_DENOMINATOR};
use crate::layouts::PumpAmmPool;
use crate::types::pump_amm::{self, PROGRAM_ID};

pub const BUY_EXACT_QUOTE_IN_DISCRIMINATOR: [u8; 8] = [198, 46, 21, 82, 180, 217, 232, 112];
pub const SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];

#[derive(BorshSerialize)]
struct BuyExactQuoteInArgs {
    spendable_quote_in: u64,
    min_base_amount_out: u64,
    track_volume: bool,
}

#[derive(BorshSerialize)]
struct SellArgs {
    base_amount_in: u64,
    min_quote_amount_out: u64,
}

/// 恒定乘积：`reserve_out * amount_in / (reserve_in + amount_in)`
pub fn constant_product_out(reserve_in: u64, reserve_out: u64, amount_in: u64) -> u64 {
    let denominator = reserve_in as u128 + amount_in as u128;
    if denominator == 0 {
        return 0;
    }
    ((reserve_out as u128) * (amount_in as u128) / denominator) as u64
}

/// 花费 `quote_in` 可得的 base 数量 (先扣手续费)
pub fn quote_buy(base_reserve: u64, quote_reserve: u64, quote_in: u64, fee_bps: u64) -> u64 {
    let net =
        (quote_in as u128) * BPS_DENOMINATOR as u128 / (BPS_DENOMINATOR + fee_bps) as u128;
    constant_product_out(quote_reserve, base_reserve, net as u64)
}

/// 卖出 `base_in` 可得的 quote 数量 (后扣手续费)
pub fn quote_sell(base_reserve: u64, quote_reserve: u64, base_in: u64, fee_bps: u64) -> u64 {
    let gross = constant_product_out(base_reserve, quote_reserve, base_in) as u128;
    let fee_bps = fee_bps.min(BPS_DENOMINATOR);
    (gross * (BPS_DENOMINATOR - fee_bps) as u128 / BPS_DENOMINATOR as u128) as u64
}

/// 交易所需的池子信息
#[derive(Debug, Clone)]
pub struct PoolAccounts {
    pub pool: Pubkey,
    pub state: PumpAmmPool,
    /// base mint 所属的代币程序
    pub base_token_program: Pubkey,
}

impl PoolAccounts {
    fn quote_token_program(&self) -> Pubkey {
        spl_token::id()
    }

    /// buy 与 sell 共用的前 19 个账户
    fn common_accounts(&self, user: &Pubkey) -> Vec<AccountMeta> {
        let state = &self.state;
        let quote_program = self.quote_token_program();
        let creator_vault_authority = pump_amm::coin_creator_vault_authority(&state.coin_creator);

        vec![
            AccountMeta::new(self.pool, false),
            AccountMeta::new(*user, true),
            AccountMeta::new_readonly(pump_amm::GLOBAL_CONFIG, false),
            AccountMeta::new_readonly(state.base_mint, false),
            AccountMeta::new_readonly(state.quote_mint, false),
            AccountMeta::new(
                associated_token_address(user, &state.base_mint, &self.base_token_program),
                false,
            ),
            AccountMeta::new(
                associated_token_address(user, &state.quote_mint, &quote_program),
                false,
            ),
            AccountMeta::new(state.pool_base_token_account, false),
            AccountMeta::new(state.pool_quote_token_account, false),
            AccountMeta::new_readonly(pump_amm::PROTOCOL_FEE_RECIPIENT, false),
            AccountMeta::new(
                associated_token_address(
                    &pump_amm::PROTOCOL_FEE_RECIPIENT,
                    &state.quote_mint,
                    &quote_program,
                ),
                false,
            ),
            AccountMeta::new_readonly(self.base_token_program, false),
            AccountMeta::new_readonly(quote_program, false),
            AccountMeta::new_readonly(system_program::id(), false),
            AccountMeta::new_readonly(spl_associated_token_account::id(), false),
            AccountMeta::new_readonly(pump_amm::event_authority(), false),
            AccountMeta::new_readonly(PROGRAM_ID, false),
            AccountMeta::new(
                associated_token_address(&creator_vault_authority, &state.quote_mint, &quote_program),
                false,
            ),
            AccountMeta::new_readonly(creator_vault_authority, false),
        ]
    }
}

/// 花费固定 quote (WSOL) 买入
pub fn buy_exact_quote_in(
    user: &Pubkey,
    pool: &PoolAccounts,
    spendable_quote_in: u64,
    min_base_amount_out: u64,
) -> Result<Instruction> {
    let data = anchor_data(
        BUY_EXACT_QUOTE_IN_DISCRIMINATOR,
        &BuyExactQuoteInArgs {
            spendable_quote_in,
            min_base_amount_out,
            track_volume: true,
        },
    )?;

    let mut accounts = pool.common_accounts(user);
    accounts.extend([
        AccountMeta::new(pump_amm::global_volume_accumulator(), false),
        AccountMeta::new(pump_amm::user_volume_accumulator(user), false),
        AccountMeta::new_readonly(pump_amm::FEE_CONFIG, false),
        AccountMeta::new_readonly(crate::types::pump_fun::FEE_PROGRAM, false),
    ]);

    Ok(Instruction {
        program_id: PROGRAM_ID,
        accounts,
        data,
    })
}

/// 卖出固定数量 base
pub fn sell(
    user: &Pubkey,
    pool: &PoolAccounts,
    base_amount_in: u64,
    min_quote_amount_out: u64,
) -> Result<Instruction> {
    let data = anchor_data(
        SELL_DISCRIMINATOR,
        &SellArgs {
            base_amount_in,
            min_quote_amount_out,
        },
    )?;

    let mut accounts = pool.common_accounts(user);
    accounts.extend([
        AccountMeta::new_readonly(pump_amm::FEE_CONFIG, false),
        AccountMeta::new_readonly(crate::types::pump_fun::FEE_PROGRAM, false),
    ]);

    Ok(Instruction {
        program_id: PROGRAM_ID,
        accounts,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WSOL_MINT;

    fn pool_accounts() -> PoolAccounts {
        let mint = Pubkey::new_unique();
        PoolAccounts {
            pool: pump_amm::canonical_pool(&mint),
            state: PumpAmmPool {
                pool_bump: 255,
                index: 0,
                creator: crate::types::pump_fun::pool_authority(&mint),
                base_mint: mint,
                quote_mint: WSOL_MINT,
                lp_mint: Pubkey::new_unique(),
                pool_base_token_account: Pubkey::new_unique(),
                pool_quote_token_account: Pubkey::new_unique(),
                lp_supply: 1,
                coin_creator: Pubkey::new_unique(),
            },
            base_token_program: spl_token::id(),
        }
    }

    #[test]
    fn test_constant_product() {
        assert_eq!(constant_product_out(1_000, 1_000, 1_000), 500);
        assert_eq!(constant_product_out(0, 0, 0), 0);
        assert_eq!(quote_buy(1_000_000, 1_000_000, 0, 25), 0);
        assert!(quote_buy(1_000_000, 1_000_000, 10_000, 25) < constant_product_out(1_000_000, 1_000_000, 10_000));
        assert!(quote_sell(1_000_000, 1_000_000, 10_000, 25) < constant_product_out(1_000_000, 1_000_000, 10_000));
    }

    #[test]
    fn test_buy_instruction_layout() {
        let user = Pubkey::new_unique();
        let pool = pool_accounts();
        let ix = buy_exact_quote_in(&user, &pool, 50_000_000, 9).unwrap();

        assert_eq!(ix.program_id, PROGRAM_ID);
        assert_eq!(ix.accounts.len(), 23);
        assert_eq!(&ix.data[..8], &BUY_EXACT_QUOTE_IN_DISCRIMINATOR);
        assert_eq!(ix.data.len(), 25);
        assert_eq!(ix.accounts[0].pubkey, pool.pool);
        assert!(ix.accounts[1].is_signer);
        assert_eq!(ix.accounts[7].pubkey, pool.state.pool_base_token_account);
        assert_eq!(ix.accounts[20].pubkey, pump_amm::user_volume_accumulator(&user));
    }

    #[test]
    fn test_sell_instruction_layout() {
        let user = Pubkey::new_unique();
        let pool = pool_accounts();
        let ix = sell(&user, &pool, 1_000, 1).unwrap();

        assert_eq!(ix.accounts.len(), 21);
        assert_eq!(&ix.data[..8], &SELL_DISCRIMINATOR);
        assert_eq!(&ix.data[8..16], &1_000u64.to_le_bytes());
        assert_eq!(ix.accounts[19].pubkey, pump_amm::FEE_CONFIG);
    }
}
