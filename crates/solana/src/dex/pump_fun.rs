//! pump.fun 联合曲线交易指令

use anyhow::Result;
use borsh::BorshSerialize;
use solana_sdk::{
    instruction::{AccountMeta, Instruction},
    pubkey::Pubkey,
    system_program,
};

use super::{anchor_data, associated_token_address, BPS_DENOMINATOR};
use crate::layouts::BondingCurve;
use crate::types::pump_fun::{self, PROGRAM_ID};

pub const BUY_EXACT_SOL_IN_DISCRIMINATOR: [u8; 8] = [56, 252, 116, 8, 158, 223, 205, 95];
pub const SELL_DISCRIMINATOR: [u8; 8] = [51, 230, 133, 164, 1, 127, 131, 173];

/// 协议费 + 创建者费 (基点)
pub const TOTAL_FEE_BPS: u64 = 125;

#[derive(BorshSerialize)]
struct BuyExactSolInArgs {
    spendable_sol_in: u64,
    min_tokens_out: u64,
    track_volume: bool,
}

#[derive(BorshSerialize)]
struct SellArgs {
    amount: u64,
    min_sol_output: u64,
}

/// 交易所需的曲线信息
#[derive(Debug, Clone, Copy)]
pub struct CurveAccounts {
    pub mint: Pubkey,
    pub creator: Pubkey,
    /// mint 所属的代币程序 (SPL Token 或 Token-2022)
    pub token_program: Pubkey,
}

impl CurveAccounts {
    fn bonding_curve(&self) -> Pubkey {
        pump_fun::bonding_curve(&self.mint)
    }

    fn associated_bonding_curve(&self) -> Pubkey {
        associated_token_address(&self.bonding_curve(), &self.mint, &self.token_program)
    }

    fn associated_user(&self, user: &Pubkey) -> Pubkey {
        associated_token_address(user, &self.mint, &self.token_program)
    }
}

/// 扣除手续费后花费 `sol_in` 可得的代币
pub fn quote_buy(curve: &BondingCurve, sol_in: u64) -> u64 {
    let net = (sol_in as u128) * BPS_DENOMINATOR as u128 / (BPS_DENOMINATOR + TOTAL_FEE_BPS) as u128;
    curve.buy_quote(net as u64)
}

/// 卖出 `token_in` 扣除手续费后可得的 lamports
pub fn quote_sell(curve: &BondingCurve, token_in: u64) -> u64 {
    let gross = curve.sell_quote(token_in) as u128;
    (gross * (BPS_DENOMINATOR - TOTAL_FEE_BPS) as u128 / BPS_DENOMINATOR as u128) as u64
}

/// 花费固定 SOL 买入
pub fn buy_exact_sol_in(
    user: &Pubkey,
    curve: &CurveAccounts,
    spendable_sol_in: u64,
    min_tokens_out: u64,
) -> Result<Instruction> {
    let data = anchor_data(
        BUY_EXACT_SOL_IN_DISCRIMINATOR,
        &BuyExactSolInArgs {
            spendable_sol_in,
            min_tokens_out,
            track_volume: true,
        },
    )?;

    let accounts = vec![
        AccountMeta::new_readonly(pump_fun::global(), false),
        AccountMeta::new(pump_fun::FEE_RECIPIENT, false),
        AccountMeta::new_readonly(curve.mint, false),
        AccountMeta::new(curve.bonding_curve(), false),
        AccountMeta::new(curve.associated_bonding_curve(), false),
        AccountMeta::new(curve.associated_user(user), false),
        AccountMeta::new(*user, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new_readonly(curve.token_program, false),
        AccountMeta::new(pump_fun::creator_vault(&curve.creator), false),
        AccountMeta::new_readonly(pump_fun::event_authority(), false),
        AccountMeta::new_readonly(PROGRAM_ID, false),
        AccountMeta::new(pump_fun::global_volume_accumulator(), false),
        AccountMeta::new(pump_fun::user_volume_accumulator(user), false),
        AccountMeta::new_readonly(pump_fun::fee_config(), false),
        AccountMeta::new_readonly(pump_fun::FEE_PROGRAM, false),
    ];

    Ok(Instruction {
        program_id: PROGRAM_ID,
        accounts,
        data,
    })
}

/// 卖出固定数量代币
pub fn sell(
    user: &Pubkey,
    curve: &CurveAccounts,
    amount: u64,
    min_sol_output: u64,
) -> Result<Instruction> {
    let data = anchor_data(SELL_DISCRIMINATOR, &SellArgs { amount, min_sol_output })?;

    let accounts = vec![
        AccountMeta::new_readonly(pump_fun::global(), false),
        AccountMeta::new(pump_fun::FEE_RECIPIENT, false),
        AccountMeta::new_readonly(curve.mint, false),
        AccountMeta::new(curve.bonding_curve(), false),
        AccountMeta::new(curve.associated_bonding_curve(), false),
        AccountMeta::new(curve.associated_user(user), false),
        AccountMeta::new(*user, true),
        AccountMeta::new_readonly(system_program::id(), false),
        AccountMeta::new(pump_fun::creator_vault(&curve.creator), false),
        AccountMeta::new_readonly(curve.token_program, false),
        AccountMeta::new_readonly(pump_fun::event_authority(), false),
        AccountMeta::new_readonly(PROGRAM_ID, false),
        AccountMeta::new_readonly(pump_fun::fee_config(), false),
        AccountMeta::new_readonly(pump_fun::FEE_PROGRAM, false),
    ];

    Ok(Instruction {
        program_id: PROGRAM_ID,
        accounts,
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve_accounts() -> CurveAccounts {
        CurveAccounts {
            mint: Pubkey::new_unique(),
            creator: Pubkey::new_unique(),
            token_program: spl_token::id(),
        }
    }

    #[test]
    fn test_buy_instruction_layout() {
        let user = Pubkey::new_unique();
        let curve = curve_accounts();
        let ix = buy_exact_sol_in(&user, &curve, 50_000_000, 1_000).unwrap();

        assert_eq!(ix.program_id, PROGRAM_ID);
        assert_eq!(ix.accounts.len(), 16);
        assert_eq!(&ix.data[..8], &BUY_EXACT_SOL_IN_DISCRIMINATOR);
        assert_eq!(&ix.data[8..16], &50_000_000u64.to_le_bytes());
        assert_eq!(&ix.data[16..24], &1_000u64.to_le_bytes());
        assert_eq!(ix.data[24], 1);
        assert_eq!(ix.data.len(), 25);

        let signers: Vec<_> = ix.accounts.iter().filter(|a| a.is_signer).collect();
        assert_eq!(signers.len(), 1);
        assert_eq!(signers[0].pubkey, user);
        assert_eq!(ix.accounts[3].pubkey, pump_fun::bonding_curve(&curve.mint));
        assert_eq!(ix.accounts[8].pubkey, spl_token::id());
    }

    #[test]
    fn test_sell_instruction_layout() {
        let user = Pubkey::new_unique();
        let curve = curve_accounts();
        let ix = sell(&user, &curve, 400, 7).unwrap();

        assert_eq!(ix.accounts.len(), 14);
        assert_eq!(&ix.data[..8], &SELL_DISCRIMINATOR);
        assert_eq!(ix.data.len(), 24);
        // sell 中 creator_vault 在 token_program 之前
        assert_eq!(ix.accounts[8].pubkey, pump_fun::creator_vault(&curve.creator));
        assert_eq!(ix.accounts[9].pubkey, spl_token::id());
    }

    #[test]
    fn test_quote_includes_fee() {
        let curve = BondingCurve {
            virtual_token_reserves: 1_073_000_000_000_000,
            virtual_sol_reserves: 30_000_000_000,
            real_token_reserves: 793_100_000_000_000,
            real_sol_reserves: 0,
            token_total_supply: 1_000_000_000_000_000,
            complete: false,
            creator: Pubkey::new_unique(),
        };
        assert!(quote_buy(&curve, 1_000_000_000) < curve.buy_quote(1_000_000_000));
        assert!(quote_sell(&curve, 1_000_000) < curve.sell_quote(1_000_000));
        assert_eq!(quote_buy(&curve, 0), 0);
    }
}
