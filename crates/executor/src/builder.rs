//! 交易组装：计算预算 + (可选) Jito 小费 + 核心指令，签名

use solana_chain::senders::random_tip_account;
use solana_sdk::{
    compute_budget::ComputeBudgetInstruction,
    hash::Hash,
    instruction::Instruction,
    message::{Message, VersionedMessage},
    native_token::LAMPORTS_PER_SOL,
    signature::Keypair,
    signer::Signer,
    system_instruction,
    transaction::VersionedTransaction,
};

use crate::types::ExecutionError;

/// 计算预算
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeBudget {
    pub unit_limit: u32,
    /// 单价 (micro-lamports / CU)
    pub unit_price_micro_lamports: u64,
}

impl ComputeBudget {
    /// `unit_price = priority_fee_lamports * 1_000_000 / unit_limit`
    pub fn from_priority_fee(priority_fee_sol: f64, unit_limit: u32) -> Self {
        let unit_limit = unit_limit.max(1);
        let lamports = sol_to_lamports(priority_fee_sol);
        let unit_price = (lamports as u128) * 1_000_000 / unit_limit as u128;
        Self {
            unit_limit,
            unit_price_micro_lamports: unit_price.min(u64::MAX as u128) as u64,
        }
    }

    pub fn instructions(&self) -> [Instruction; 2] {
        [
            ComputeBudgetInstruction::set_compute_unit_limit(self.unit_limit),
            ComputeBudgetInstruction::set_compute_unit_price(self.unit_price_micro_lamports),
        ]
    }
}

/// SOL 转 lamports，负数与非有限值按 0 处理
pub fn sol_to_lamports(sol: f64) -> u64 {
    if !sol.is_finite() || sol <= 0.0 {
        return 0;
    }
    (sol * LAMPORTS_PER_SOL as f64).round() as u64
}

/// 组装并签名 (payer 即交易钱包)
pub fn assemble_transaction(
    payer: &Keypair,
    budget: &ComputeBudget,
    core: Vec<Instruction>,
    tip_lamports: Option<u64>,
    recent_blockhash: Hash,
) -> Result<VersionedTransaction, ExecutionError> {
    let payer_pubkey = payer.pubkey();

    let mut instructions = Vec::with_capacity(core.len() + 3);
    instructions.extend(budget.instructions());
    if let Some(tip) = tip_lamports.filter(|t| *t > 0) {
        instructions.push(system_instruction::transfer(
            &payer_pubkey,
            &random_tip_account(),
            tip,
        ));
    }
    instructions.extend(core);

    let mut message = Message::new(&instructions, Some(&payer_pubkey));
    message.recent_blockhash = recent_blockhash;
    VersionedTransaction::try_new(VersionedMessage::Legacy(message), &[payer])
        .map_err(|e| ExecutionError::Build(format!("sign transaction: {}", e)))
}

/// 用交易钱包重新签名外部构建的交易 (如 Jupiter 返回的交易)
pub fn resign_transaction(
    payer: &Keypair,
    tx: VersionedTransaction,
) -> Result<VersionedTransaction, ExecutionError> {
    let fee_payer = tx.message.static_account_keys().first().copied();
    if fee_payer != Some(payer.pubkey()) {
        return Err(ExecutionError::Build(format!(
            "transaction fee payer {:?} does not match wallet {}",
            fee_payer,
            payer.pubkey()
        )));
    }
    VersionedTransaction::try_new(tx.message, &[payer])
        .map_err(|e| ExecutionError::Build(format!("sign transaction: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_chain::JITO_TIP_ACCOUNTS;
    use solana_sdk::{compute_budget, pubkey::Pubkey, system_program};

    #[test]
    fn test_compute_budget_from_priority_fee() {
        let budget = ComputeBudget::from_priority_fee(0.0001, 200_000);
        assert_eq!(budget.unit_limit, 200_000);
        assert_eq!(budget.unit_price_micro_lamports, 500_000);

        let budget = ComputeBudget::from_priority_fee(0.0, 200_000);
        assert_eq!(budget.unit_price_micro_lamports, 0);

        let budget = ComputeBudget::from_priority_fee(-1.0, 0);
        assert_eq!(budget.unit_limit, 1);
        assert_eq!(budget.unit_price_micro_lamports, 0);
    }

    #[test]
    fn test_assemble_with_tip() {
        let payer = Keypair::new();
        let budget = ComputeBudget::from_priority_fee(0.0001, 200_000);
        let recipient = Pubkey::new_unique();
        let core = vec![system_instruction::transfer(&payer.pubkey(), &recipient, 1)];

        let tx = assemble_transaction(&payer, &budget, core, Some(100_000), Hash::new_unique())
            .unwrap();
        assert!(tx.verify_with_results().iter().all(|ok| *ok));

        let message = &tx.message;
        let keys = message.static_account_keys();
        let programs: Vec<Pubkey> = message
            .instructions()
            .iter()
            .map(|ix| keys[ix.program_id_index as usize])
            .collect();
        assert_eq!(
            programs,
            vec![
                compute_budget::id(),
                compute_budget::id(),
                system_program::id(),
                system_program::id()
            ]
        );
        assert!(keys.iter().any(|k| JITO_TIP_ACCOUNTS.contains(k)));
        assert_eq!(keys[0], payer.pubkey());
    }

    #[test]
    fn test_assemble_without_tip() {
        let payer = Keypair::new();
        let budget = ComputeBudget::from_priority_fee(0.0001, 200_000);
        let tx = assemble_transaction(&payer, &budget, vec![], None, Hash::new_unique()).unwrap();
        assert_eq!(tx.message.instructions().len(), 2);
    }

    #[test]
    fn test_resign_requires_matching_payer() {
        let payer = Keypair::new();
        let other = Keypair::new();
        let budget = ComputeBudget::from_priority_fee(0.0, 200_000);
        let tx = assemble_transaction(&other, &budget, vec![], None, Hash::new_unique()).unwrap();
        assert!(matches!(
            resign_transaction(&payer, tx.clone()),
            Err(ExecutionError::Build(_))
        ));

        let resigned = resign_transaction(&other, tx).unwrap();
        assert!(resigned.verify_with_results().iter().all(|ok| *ok));
    }
}
