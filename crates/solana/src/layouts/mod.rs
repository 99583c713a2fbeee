//! 链上账户二进制布局
//!
//! 每种账户为固定布局：8 字节 discriminator (SPL mint 除外) 后跟固定偏移的小端字段。
//! 128 位整数按低 64 位在前、高 64 位在后编码。
//! `decode` 接受不短于布局长度的数据 (链上账户可能带尾部填充)，`encode` 输出精确的布局字节。

mod clmm;
mod mint;
mod pump_amm;
mod pump_fun;

pub use clmm::*;
pub use mint::*;
pub use pump_amm::*;
pub use pump_fun::*;

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodingError {
    #[error("account data too short: expected {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },

    #[error("discriminator mismatch for {kind}: got {actual:?}")]
    DiscriminatorMismatch { kind: &'static str, actual: [u8; 8] },

    #[error("invalid {kind} account: {reason}")]
    Invalid { kind: &'static str, reason: String },
}

/// 固定布局账户
pub trait AccountLayout: Sized {
    /// 账户种类名称 (错误信息用)
    const KIND: &'static str;
    /// 布局字节长度 (含 discriminator)
    const LEN: usize;

    fn decode(data: &[u8]) -> Result<Self, DecodingError>;

    fn encode(&self) -> Vec<u8>;
}

/// 校验 Anchor discriminator 并返回跳过它的读取器
pub(crate) fn anchor_reader<'a, T: AccountLayout>(
    data: &'a [u8],
    discriminator: &[u8; 8],
) -> Result<Reader<'a>, DecodingError> {
    if data.len() < T::LEN {
        return Err(DecodingError::TooShort {
            expected: T::LEN,
            actual: data.len(),
        });
    }
    let mut reader = Reader::new(data);
    let actual: [u8; 8] = reader.array()?;
    if &actual != discriminator {
        return Err(DecodingError::DiscriminatorMismatch {
            kind: T::KIND,
            actual,
        });
    }
    Ok(reader)
}

/// 顺序小端读取器
pub(crate) struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodingError> {
        let end = self.pos + n;
        if end > self.data.len() {
            return Err(DecodingError::TooShort {
                expected: end,
                actual: self.data.len(),
            });
        }
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    pub fn array<const N: usize>(&mut self) -> Result<[u8; N], DecodingError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn skip(&mut self, n: usize) -> Result<(), DecodingError> {
        self.take(n).map(|_| ())
    }

    pub fn u8(&mut self) -> Result<u8, DecodingError> {
        Ok(self.take(1)?[0])
    }

    pub fn bool(&mut self) -> Result<bool, DecodingError> {
        Ok(self.u8()? != 0)
    }

    pub fn u16(&mut self) -> Result<u16, DecodingError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    pub fn u32(&mut self) -> Result<u32, DecodingError> {
        Ok(u32::from_le_bytes(self.array()?))
    }

    pub fn i32(&mut self) -> Result<i32, DecodingError> {
        Ok(i32::from_le_bytes(self.array()?))
    }

    pub fn u64(&mut self) -> Result<u64, DecodingError> {
        Ok(u64::from_le_bytes(self.array()?))
    }

    pub fn u128(&mut self) -> Result<u128, DecodingError> {
        let low = self.u64()? as u128;
        let high = self.u64()? as u128;
        Ok(low | (high << 64))
    }

    pub fn pubkey(&mut self) -> Result<Pubkey, DecodingError> {
        Ok(Pubkey::new_from_array(self.array()?))
    }
}

/// 顺序小端写入器
pub(crate) struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn with_capacity(len: usize) -> Self {
        Self {
            buf: Vec::with_capacity(len),
        }
    }

    pub fn bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn zeros(&mut self, n: usize) -> &mut Self {
        self.buf.resize(self.buf.len() + n, 0);
        self
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        self.u8(v as u8)
    }

    pub fn u16(&mut self, v: u16) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn i32(&mut self, v: i32) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.bytes(&v.to_le_bytes())
    }

    pub fn u128(&mut self, v: u128) -> &mut Self {
        self.u64(v as u64).u64((v >> 64) as u64)
    }

    pub fn pubkey(&mut self, key: &Pubkey) -> &mut Self {
        self.bytes(key.as_ref())
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u128_low_then_high() {
        let value: u128 = (7u128 << 64) | 9;
        let mut writer = Writer::with_capacity(16);
        writer.u128(value);
        let bytes = writer.finish();
        assert_eq!(&bytes[..8], &9u64.to_le_bytes());
        assert_eq!(&bytes[8..], &7u64.to_le_bytes());
        assert_eq!(Reader::new(&bytes).u128().unwrap(), value);
    }

    #[test]
    fn test_reader_short_input() {
        let mut reader = Reader::new(&[1, 2, 3]);
        assert!(matches!(
            reader.u32(),
            Err(DecodingError::TooShort { expected: 4, actual: 3 })
        ));
    }
}
