//! DEX 交互：指令构建与报价
//!
//! - pump.fun 联合曲线
//! - pump AMM
//! - Jupiter 聚合器

pub mod jupiter;
pub mod pump_amm;
pub mod pump_fun;

pub use jupiter::JupiterApi;

use anyhow::Result;
use borsh::BorshSerialize;
use solana_sdk::{instruction::Instruction, pubkey::Pubkey, system_instruction};
use spl_associated_token_account::{
    get_associated_token_address_with_program_id,
    instruction::create_associated_token_account_idempotent,
};

use crate::types::WSOL_MINT;

/// 基点分母
pub const BPS_DENOMINATOR: u64 = 10_000;

/// 按滑点下调最小可接受数量：`amount * (10000 - bps) / 10000`
pub fn min_amount_with_slippage(amount: u64, slippage_bps: u16) -> u64 {
    let bps = (slippage_bps as u64).min(BPS_DENOMINATOR);
    ((amount as u128) * (BPS_DENOMINATOR - bps) as u128 / BPS_DENOMINATOR as u128) as u64
}

/// 按滑点上调最大可支付数量：`amount * (10000 + bps) / 10000`
pub fn max_amount_with_slippage(amount: u64, slippage_bps: u16) -> u64 {
    let scaled = (amount as u128) * (BPS_DENOMINATOR + slippage_bps as u64) as u128
        / BPS_DENOMINATOR as u128;
    scaled.min(u64::MAX as u128) as u64
}

/// Anchor 指令数据：8 字节 discriminator + borsh 参数
pub(crate) fn anchor_data<T: BorshSerialize>(discriminator: [u8; 8], args: &T) -> Result<Vec<u8>> {
    let mut data = discriminator.to_vec();
    data.extend(args.try_to_vec()?);
    Ok(data)
}

pub fn associated_token_address(owner: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Pubkey {
    get_associated_token_address_with_program_id(owner, mint, token_program)
}

/// 创建 (若不存在) 用户的代币账户
pub fn create_ata_idempotent(payer: &Pubkey, mint: &Pubkey, token_program: &Pubkey) -> Instruction {
    create_associated_token_account_idempotent(payer, payer, mint, token_program)
}

/// 把 `lamports` 包装为 WSOL：建账户、转账、sync_native
pub fn wrap_sol_instructions(owner: &Pubkey, lamports: u64) -> Result<Vec<Instruction>> {
    let wsol_account = associated_token_address(owner, &WSOL_MINT, &spl_token::id());
    Ok(vec![
        create_ata_idempotent(owner, &WSOL_MINT, &spl_token::id()),
        system_instruction::transfer(owner, &wsol_account, lamports),
        spl_token::instruction::sync_native(&spl_token::id(), &wsol_account)?,
    ])
}

/// 关闭 WSOL 账户，余额退回 SOL
pub fn unwrap_sol_instruction(owner: &Pubkey) -> Result<Instruction> {
    let wsol_account = associated_token_address(owner, &WSOL_MINT, &spl_token::id());
    let ix = spl_token::instruction::close_account(
        &spl_token::id(),
        &wsol_account,
        owner,
        owner,
        &[],
    )?;
    Ok(ix)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slippage_bounds() {
        assert_eq!(min_amount_with_slippage(1_000_000, 250), 975_000);
        assert_eq!(min_amount_with_slippage(1_000_000, 0), 1_000_000);
        assert_eq!(min_amount_with_slippage(1_000_000, 20_000), 0);
        assert_eq!(max_amount_with_slippage(1_000_000, 250), 1_025_000);
        assert_eq!(max_amount_with_slippage(u64::MAX, 100), u64::MAX);
    }

    #[test]
    fn test_wrap_sol_instructions() {
        let owner = Pubkey::new_unique();
        let ixs = wrap_sol_instructions(&owner, 50_000_000).unwrap();
        assert_eq!(ixs.len(), 3);
        assert_eq!(ixs[0].program_id, spl_associated_token_account::id());
        assert_eq!(ixs[1].program_id, solana_sdk::system_program::id());
        assert_eq!(ixs[2].program_id, spl_token::id());

        let wsol_account = associated_token_address(&owner, &WSOL_MINT, &spl_token::id());
        assert_eq!(ixs[1].accounts[1].pubkey, wsol_account);

        let close = unwrap_sol_instruction(&owner).unwrap();
        assert_eq!(close.accounts[0].pubkey, wsol_account);
        assert_eq!(close.accounts[1].pubkey, owner);
    }
}
