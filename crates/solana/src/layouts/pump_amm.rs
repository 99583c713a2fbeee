//! pump AMM 全局配置与池子账户

use solana_sdk::pubkey::Pubkey;

use super::{anchor_reader, AccountLayout, DecodingError, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmmGlobalConfig {
    pub admin: Pubkey,
    pub lp_fee_basis_points: u64,
    pub protocol_fee_basis_points: u64,
    pub disable_flags: u8,
    pub protocol_fee_recipients: [Pubkey; 8],
    pub coin_creator_fee_basis_points: u64,
    pub admin_set_coin_creator_authority: Pubkey,
}

impl AmmGlobalConfig {
    pub const DISCRIMINATOR: [u8; 8] = [149, 8, 156, 202, 160, 252, 176, 217];

    /// 三项费率之和 (bps)
    pub fn total_fee_bps(&self) -> u64 {
        self.lp_fee_basis_points
            .saturating_add(self.protocol_fee_basis_points)
            .saturating_add(self.coin_creator_fee_basis_points)
    }
}

impl AccountLayout for AmmGlobalConfig {
    const KIND: &'static str = "AmmGlobalConfig";
    const LEN: usize = 8 + 32 + 8 + 8 + 1 + 32 * 8 + 8 + 32;

    fn decode(data: &[u8]) -> Result<Self, DecodingError> {
        let mut r = anchor_reader::<Self>(data, &Self::DISCRIMINATOR)?;
        let admin = r.pubkey()?;
        let lp_fee_basis_points = r.u64()?;
        let protocol_fee_basis_points = r.u64()?;
        let disable_flags = r.u8()?;
        let mut protocol_fee_recipients = [Pubkey::default(); 8];
        for recipient in protocol_fee_recipients.iter_mut() {
            *recipient = r.pubkey()?;
        }
        Ok(Self {
            admin,
            lp_fee_basis_points,
            protocol_fee_basis_points,
            disable_flags,
            protocol_fee_recipients,
            coin_creator_fee_basis_points: r.u64()?,
            admin_set_coin_creator_authority: r.pubkey()?,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::LEN);
        w.bytes(&Self::DISCRIMINATOR)
            .pubkey(&self.admin)
            .u64(self.lp_fee_basis_points)
            .u64(self.protocol_fee_basis_points)
            .u8(self.disable_flags);
        for recipient in &self.protocol_fee_recipients {
            w.pubkey(recipient);
        }
        w.u64(self.coin_creator_fee_basis_points)
            .pubkey(&self.admin_set_coin_creator_authority);
        w.finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpAmmPool {
    pub pool_bump: u8,
    pub index: u16,
    pub creator: Pubkey,
    pub base_mint: Pubkey,
    pub quote_mint: Pubkey,
    pub lp_mint: Pubkey,
    pub pool_base_token_account: Pubkey,
    pub pool_quote_token_account: Pubkey,
    pub lp_supply: u64,
    pub coin_creator: Pubkey,
}

impl PumpAmmPool {
    pub const DISCRIMINATOR: [u8; 8] = [241, 154, 109, 4, 17, 177, 109, 188];
}

impl AccountLayout for PumpAmmPool {
    const KIND: &'static str = "PumpAmmPool";
    const LEN: usize = 8 + 1 + 2 + 32 * 6 + 8 + 32;

    fn decode(data: &[u8]) -> Result<Self, DecodingError> {
        let mut r = anchor_reader::<Self>(data, &Self::DISCRIMINATOR)?;
        Ok(Self {
            pool_bump: r.u8()?,
            index: r.u16()?,
            creator: r.pubkey()?,
            base_mint: r.pubkey()?,
            quote_mint: r.pubkey()?,
            lp_mint: r.pubkey()?,
            pool_base_token_account: r.pubkey()?,
            pool_quote_token_account: r.pubkey()?,
            lp_supply: r.u64()?,
            coin_creator: r.pubkey()?,
        })
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::LEN);
        w.bytes(&Self::DISCRIMINATOR)
            .u8(self.pool_bump)
            .u16(self.index)
            .pubkey(&self.creator)
            .pubkey(&self.base_mint)
            .pubkey(&self.quote_mint)
            .pubkey(&self.lp_mint)
            .pubkey(&self.pool_base_token_account)
            .pubkey(&self.pool_quote_token_account)
            .u64(self.lp_supply)
            .pubkey(&self.coin_creator);
        w.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn global_config() -> AmmGlobalConfig {
        let mut recipients = [Pubkey::default(); 8];
        for recipient in recipients.iter_mut() {
            *recipient = Pubkey::new_unique();
        }
        AmmGlobalConfig {
            admin: Pubkey::new_unique(),
            lp_fee_basis_points: 20,
            protocol_fee_basis_points: 5,
            disable_flags: 0b10,
            protocol_fee_recipients: recipients,
            coin_creator_fee_basis_points: 5,
            admin_set_coin_creator_authority: Pubkey::new_unique(),
        }
    }

    fn pool() -> PumpAmmPool {
        PumpAmmPool {
            pool_bump: 254,
            index: 0,
            creator: Pubkey::new_unique(),
            base_mint: Pubkey::new_unique(),
            quote_mint: crate::types::WSOL_MINT,
            lp_mint: Pubkey::new_unique(),
            pool_base_token_account: Pubkey::new_unique(),
            pool_quote_token_account: Pubkey::new_unique(),
            lp_supply: 4_193_388_282_212,
            coin_creator: Pubkey::new_unique(),
        }
    }

    #[test]
    fn test_global_config_round_trip() {
        let config = global_config();
        let bytes = config.encode();
        assert_eq!(bytes.len(), 353);
        assert_eq!(AmmGlobalConfig::decode(&bytes).unwrap(), config);
        assert_eq!(config.total_fee_bps(), 30);
    }

    #[test]
    fn test_pool_round_trip_with_padding() {
        let pool = pool();
        let mut bytes = pool.encode();
        assert_eq!(bytes.len(), 243);
        bytes.push(0);
        assert_eq!(PumpAmmPool::decode(&bytes).unwrap(), pool);
    }

    #[test]
    fn test_wrong_kind_is_rejected() {
        let mut bytes = global_config().encode();
        bytes.truncate(PumpAmmPool::LEN);
        assert!(matches!(
            PumpAmmPool::decode(&bytes),
            Err(DecodingError::DiscriminatorMismatch { kind: "PumpAmmPool", .. })
        ));
    }
}
