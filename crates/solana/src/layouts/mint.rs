//! SPL mint 账户 (无 discriminator)

use solana_sdk::pubkey::Pubkey;

use super::{AccountLayout, DecodingError, Reader, Writer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintInfo {
    pub mint_authority: Option<Pubkey>,
    pub supply: u64,
    pub decimals: u8,
    pub is_initialized: bool,
    pub freeze_authority: Option<Pubkey>,
}

fn read_coption(r: &mut Reader<'_>) -> Result<Option<Pubkey>, DecodingError> {
    let tag = r.u32()?;
    let key = r.pubkey()?;
    match tag {
        0 => Ok(None),
        1 => Ok(Some(key)),
        other => Err(DecodingError::Invalid {
            kind: MintInfo::KIND,
            reason: format!("bad COption tag {}", other),
        }),
    }
}

fn write_coption(w: &mut Writer, key: &Option<Pubkey>) {
    match key {
        Some(key) => w.u32(1).pubkey(key),
        None => w.u32(0).zeros(32),
    };
}

impl AccountLayout for MintInfo {
    const KIND: &'static str = "MintInfo";
    const LEN: usize = 36 + 8 + 1 + 1 + 36;

    fn decode(data: &[u8]) -> Result<Self, DecodingError> {
        if data.len() < Self::LEN {
            return Err(DecodingError::TooShort {
                expected: Self::LEN,
                actual: data.len(),
            });
        }
        let mut r = Reader::new(data);
        let mint = Self {
            mint_authority: read_coption(&mut r)?,
            supply: r.u64()?,
            decimals: r.u8()?,
            is_initialized: r.bool()?,
            freeze_authority: read_coption(&mut r)?,
        };
        if !mint.is_initialized {
            return Err(DecodingError::Invalid {
                kind: Self::KIND,
                reason: "mint not initialized".to_string(),
            });
        }
        Ok(mint)
    }

    fn encode(&self) -> Vec<u8> {
        let mut w = Writer::with_capacity(Self::LEN);
        write_coption(&mut w, &self.mint_authority);
        w.u64(self.supply).u8(self.decimals).bool(self.is_initialized);
        write_coption(&mut w, &self.freeze_authority);
        w.finish()
    }
}
