//! Solana 程序地址与 PDA 推导

use solana_sdk::{pubkey, pubkey::Pubkey};

/// WSOL mint
pub const WSOL_MINT: Pubkey = pubkey!("So11111111111111111111111111111111111111112");
pub const WSOL: &str = "So11111111111111111111111111111111111111112";

/// Compute Budget 程序
pub const COMPUTE_BUDGET_PROGRAM: Pubkey =
    pubkey!("ComputeBudget111111111111111111111111111111");

/// token 账户大小 (租金豁免计算用)
pub const TOKEN_ACCOUNT_SIZE: usize = 165;

/// pump.fun 联合曲线程序
pub mod pump_fun {
    use super::*;

    pub const PROGRAM_ID: Pubkey = pubkey!("6EF8rrecthR5Dkzon8Nwu78hRvfCKubJ14M5uBEwF6P");
    pub const FEE_RECIPIENT: Pubkey = pubkey!("CebN5WGQ4jvEPvsVU4EoHEpgzq1VV7AbicfhtW4xC9iM");
    pub const FEE_PROGRAM: Pubkey = pubkey!("pfeeUxB6jkeY1Hxd7CsFCAjcbHA9rWtchMGdZ6VojVZ");

    fn find(seeds: &[&[u8]]) -> Pubkey {
        Pubkey::find_program_address(seeds, &PROGRAM_ID).0
    }

    pub fn global() -> Pubkey {
        find(&[b"global"])
    }

    pub fn bonding_curve(mint: &Pubkey) -> Pubkey {
        find(&[b"bonding-curve", mint.as_ref()])
    }

    pub fn creator_vault(creator: &Pubkey) -> Pubkey {
        find(&[b"creator-vault", creator.as_ref()])
    }

    pub fn event_authority() -> Pubkey {
        find(&[b"__event_authority"])
    }

    pub fn global_volume_accumulator() -> Pubkey {
        find(&[b"global_volume_accumulator"])
    }

    pub fn user_volume_accumulator(user: &Pubkey) -> Pubkey {
        find(&[b"user_volume_accumulator", user.as_ref()])
    }

    pub fn fee_config() -> Pubkey {
        Pubkey::find_program_address(&[b"fee_config", PROGRAM_ID.as_ref()], &FEE_PROGRAM).0
    }

    /// 迁移后 AMM 池子的 creator (pool authority)
    pub fn pool_authority(mint: &Pubkey) -> Pubkey {
        find(&[b"pool-authority", mint.as_ref()])
    }
}

/// pump AMM 程序
pub mod pump_amm {
    use super::*;

    pub const PROGRAM_ID: Pubkey = pubkey!("pAMMBay6oceH9fJKBRHGP5D4bD4sWpmSwMn52FMfXEA");
    pub const GLOBAL_CONFIG: Pubkey = pubkey!("ADyA8hdefvWN2dbGGWFotbzWxrAvLW83WG6QCVXvJKqw");
    pub const PROTOCOL_FEE_RECIPIENT: Pubkey =
        pubkey!("62qc2CNXwrYqQScmEdiZFFAnJR262PxWEuNQtxfafNgV");
    pub const FEE_CONFIG: Pubkey = pubkey!("G7HUCB9bL9QJAuvmkNB4tSiEdEgFirqGqPwLvKzWXSC7");

    fn find(seeds: &[&[u8]]) -> Pubkey {
        Pubkey::find_program_address(seeds, &PROGRAM_ID).0
    }

    pub fn event_authority() -> Pubkey {
        find(&[b"__event_authority"])
    }

    pub fn coin_creator_vault_authority(coin_creator: &Pubkey) -> Pubkey {
        find(&[b"creator_vault", coin_creator.as_ref()])
    }

    pub fn global_volume_accumulator() -> Pubkey {
        find(&[b"global_volume_accumulator"])
    }

    pub fn user_volume_accumulator(user: &Pubkey) -> Pubkey {
        find(&[b"user_volume_accumulator", user.as_ref()])
    }

    /// 从联合曲线迁移得到的标准池子 (index 0, quote 为 WSOL)
    pub fn canonical_pool(mint: &Pubkey) -> Pubkey {
        let authority = super::pump_fun::pool_authority(mint);
        find(&[
            b"pool",
            &0u16.to_le_bytes(),
            authority.as_ref(),
            mint.as_ref(),
            WSOL_MINT.as_ref(),
        ])
    }
}

/// Raydium 程序地址
pub mod raydium {
    use super::*;

    /// Raydium CLMM Program
    pub const CLMM_PROGRAM: Pubkey = pubkey!("CAMMCzo5YL8w4VFF8KVHrK22GGUsp5VTaW7grrKgrWqK");
    /// Raydium AMM V4 Program
    pub const AMM_V4_PROGRAM: Pubkey = pubkey!("675kPX9MHTjS2zt1qfr1NYHuzeLXfQM9H24wFSUt1Mp8");
}

/// Jupiter 聚合器
pub mod jupiter {
    use super::*;

    pub const PROGRAM_ID: Pubkey = pubkey!("JUP6LkbZbjS1jKKwapdHNy74zcZ3tLUZoi5QNyVTaV4");
}

/// Jito 小费账户
pub const JITO_TIP_ACCOUNTS: [Pubkey; 8] = [
    pubkey!("96gYZGLnJYVFmbjzopPSU6QiEV5fGqZNyN9nmNhvrZU5"),
    pubkey!("HFqU5x63VTqvQss8hp11i4wVV8bD44PvwucfZ2bU7gRe"),
    pubkey!("Cw8CFyM9FkoMi7K7Crf6HNQqf4uEMzpKw6QNghXLvLkY"),
    pubkey!("ADaUMid9yfUytqMBgopwjb2DTLSokTSzL1zt6iGPaS49"),
    pubkey!("DfXygSm4jCyNCybVYYK6DwvWqjKee8pbDmJGcLWNDXjh"),
    pubkey!("ADuUkR4vqLUMWXxW9gh6D6L8pMSawimctcNZ5pGwDcEt"),
    pubkey!("DttWaMuVvTiduZRnguLF7jNxTgiMBZ1hyAumKUiL2KRL"),
    pubkey!("3AVi9Tg9Uo68tJfuvoKvqKNWKkC5wPdSSdeBnizKZ6jT"),
];

/// 已知 DEX 程序 (交易分类时优先识别)
pub const KNOWN_DEX_PROGRAMS: [Pubkey; 5] = [
    pump_fun::PROGRAM_ID,
    pump_amm::PROGRAM_ID,
    raydium::AMM_V4_PROGRAM,
    raydium::CLMM_PROGRAM,
    jupiter::PROGRAM_ID,
];

pub fn is_known_dex_program(program: &Pubkey) -> bool {
    KNOWN_DEX_PROGRAMS.contains(program)
}
