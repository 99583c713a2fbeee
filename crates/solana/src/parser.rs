//! 交易解析与持仓分类
//!
//! 两种原始来源 (RPC jsonParsed / Yellowstone 推送) 统一归一化为 [`TxView`]，
//! [`ParsedTransaction`] 在其上提供惰性计算、只计算一次的访问器。

use models::{TxDirection, TxEvent, TxType};
use once_cell::sync::OnceCell;
use solana_sdk::pubkey::Pubkey;
use solana_transaction_status::{
    option_serializer::OptionSerializer, EncodedConfirmedTransactionWithStatusMeta,
    EncodedTransaction, UiInstruction, UiMessage, UiParsedInstruction, UiTransactionTokenBalance,
};
use std::collections::BTreeMap;
use std::str::FromStr;
use thiserror::Error;
use yellowstone_grpc_proto::prelude::{SubscribeUpdateTransaction, TokenBalance};

use crate::types::{is_known_dex_program, COMPUTE_BUDGET_PROGRAM, WSOL};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("not a swap transaction: {0}")]
    NotSwapTransaction(String),

    #[error("unknown transaction type: {0}")]
    UnknownTransactionType(String),

    #[error("zero change amount: pre={pre} post={post}")]
    ZeroChangeAmount { pre: u64, post: u64 },
}

/// 原始交易负载
#[derive(Debug)]
pub enum RawTransaction {
    /// `getTransaction` 返回 (jsonParsed)
    Rpc(Box<EncodedConfirmedTransactionWithStatusMeta>),
    /// Yellowstone 推送，`received_at` 为接收时间 (unix 秒)
    Geyser {
        update: Box<SubscribeUpdateTransaction>,
        received_at: i64,
    },
}

/// 单条 token 余额记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBalanceEntry {
    pub account_index: usize,
    pub mint: String,
    pub owner: Option<String>,
    pub amount: u64,
    pub decimals: u8,
}

/// 归一化后的交易视图
#[derive(Debug, Clone, Default)]
pub struct TxView {
    pub signature: String,
    pub slot: u64,
    pub block_time: i64,
    pub account_keys: Vec<String>,
    pub pre_balances: Vec<u64>,
    pub post_balances: Vec<u64>,
    pub pre_token_balances: Vec<TokenBalanceEntry>,
    pub post_token_balances: Vec<TokenBalanceEntry>,
    pub log_messages: Vec<String>,
    /// 调用的程序 (外层在前，内层在后，去重)
    pub program_ids: Vec<String>,
    pub failed: bool,
}

fn parse_amount(raw: &str) -> Result<u64, ParseError> {
    raw.parse::<u64>()
        .map_err(|_| ParseError::UnknownTransactionType(format!("bad token amount {}", raw)))
}

fn push_unique(ids: &mut Vec<String>, id: String) {
    if !ids.contains(&id) {
        ids.push(id);
    }
}

fn key_to_string(bytes: &[u8]) -> Option<String> {
    let array: [u8; 32] = bytes.try_into().ok()?;
    Some(Pubkey::new_from_array(array).to_string())
}

impl TxView {
    pub fn from_raw(raw: &RawTransaction) -> Result<Self, ParseError> {
        match raw {
            RawTransaction::Rpc(tx) => Self::from_rpc(tx),
            RawTransaction::Geyser {
                update,
                received_at,
            } => Self::from_geyser(update, *received_at),
        }
    }

    fn from_rpc(tx: &EncodedConfirmedTransactionWithStatusMeta) -> Result<Self, ParseError> {
        let EncodedTransaction::Json(ui_tx) = &tx.transaction.transaction else {
            return Err(ParseError::UnknownTransactionType(
                "binary encoded transaction".to_string(),
            ));
        };
        let meta = tx
            .transaction
            .meta
            .as_ref()
            .ok_or_else(|| ParseError::UnknownTransactionType("missing meta".to_string()))?;

        let mut account_keys = Vec::new();
        let mut program_ids = Vec::new();
        match &ui_tx.message {
            UiMessage::Parsed(message) => {
                account_keys.extend(message.account_keys.iter().map(|k| k.pubkey.clone()));
                for ix in &message.instructions {
                    if let Some(id) = ui_instruction_program(ix, &account_keys) {
                        push_unique(&mut program_ids, id);
                    }
                }
            }
            UiMessage::Raw(message) => {
                account_keys.extend(message.account_keys.iter().cloned());
                if let OptionSerializer::Some(loaded) = &meta.loaded_addresses {
                    account_keys.extend(loaded.writable.iter().cloned());
                    account_keys.extend(loaded.readonly.iter().cloned());
                }
                for ix in &message.instructions {
                    if let Some(id) = account_keys.get(ix.program_id_index as usize) {
                        push_unique(&mut program_ids, id.clone());
                    }
                }
            }
        }
        if let OptionSerializer::Some(inner) = &meta.inner_instructions {
            for ix in inner.iter().flat_map(|set| set.instructions.iter()) {
                if let Some(id) = ui_instruction_program(ix, &account_keys) {
                    push_unique(&mut program_ids, id);
                }
            }
        }

        let rpc_balances = |balances: &OptionSerializer<Vec<UiTransactionTokenBalance>>| {
            let mut entries = Vec::new();
            if let OptionSerializer::Some(balances) = balances {
                for b in balances {
                    let owner = match &b.owner {
                        OptionSerializer::Some(owner) => Some(owner.clone()),
                        _ => None,
                    };
                    entries.push(TokenBalanceEntry {
                        account_index: b.account_index as usize,
                        mint: b.mint.clone(),
                        owner,
                        amount: parse_amount(&b.ui_token_amount.amount)?,
                        decimals: b.ui_token_amount.decimals,
                    });
                }
            }
            Ok::<_, ParseError>(entries)
        };

        let log_messages = match &meta.log_messages {
            OptionSerializer::Some(logs) => logs.clone(),
            _ => Vec::new(),
        };

        Ok(Self {
            signature: ui_tx.signatures.first().cloned().unwrap_or_default(),
            slot: tx.slot,
            block_time: tx
                .block_time
                .unwrap_or_else(|| chrono::Utc::now().timestamp()),
            account_keys,
            pre_balances: meta.pre_balances.clone(),
            post_balances: meta.post_balances.clone(),
            pre_token_balances: rpc_balances(&meta.pre_token_balances)?,
            post_token_balances: rpc_balances(&meta.post_token_balances)?,
            log_messages,
            program_ids,
            failed: meta.err.is_some(),
        })
    }

    fn from_geyser(update: &SubscribeUpdateTransaction, received_at: i64) -> Result<Self, ParseError> {
        let info = update
            .transaction
            .as_ref()
            .ok_or_else(|| ParseError::UnknownTransactionType("empty update".to_string()))?;
        let message = info
            .transaction
            .as_ref()
            .and_then(|tx| tx.message.as_ref())
            .ok_or_else(|| ParseError::UnknownTransactionType("missing message".to_string()))?;
        let meta = info
            .meta
            .as_ref()
            .ok_or_else(|| ParseError::UnknownTransactionType("missing meta".to_string()))?;

        let account_keys: Vec<String> = message
            .account_keys
            .iter()
            .chain(meta.loaded_writable_addresses.iter())
            .chain(meta.loaded_readonly_addresses.iter())
            .filter_map(|key| key_to_string(key))
            .collect();

        let mut program_ids = Vec::new();
        let outer = message.instructions.iter().map(|ix| ix.program_id_index);
        let inner = meta
            .inner_instructions
            .iter()
            .flat_map(|set| set.instructions.iter())
            .map(|ix| ix.program_id_index);
        for index in outer.chain(inner) {
            if let Some(id) = account_keys.get(index as usize) {
                push_unique(&mut program_ids, id.clone());
            }
        }

        let geyser_balances = |balances: &[TokenBalance]| {
            let mut entries = Vec::with_capacity(balances.len());
            for b in balances {
                let (amount, decimals) = match &b.ui_token_amount {
                    Some(ui) => (parse_amount(&ui.amount)?, ui.decimals as u8),
                    None => (0, 0),
                };
                entries.push(TokenBalanceEntry {
                    account_index: b.account_index as usize,
                    mint: b.mint.clone(),
                    owner: (!b.owner.is_empty()).then(|| b.owner.clone()),
                    amount,
                    decimals,
                });
            }
            Ok::<_, ParseError>(entries)
        };

        Ok(Self {
            signature: bs58::encode(&info.signature).into_string(),
            slot: update.slot,
            block_time: received_at,
            account_keys,
            pre_balances: meta.pre_balances.clone(),
            post_balances: meta.post_balances.clone(),
            pre_token_balances: geyser_balances(&meta.pre_token_balances)?,
            post_token_balances: geyser_balances(&meta.post_token_balances)?,
            log_messages: meta.log_messages.clone(),
            program_ids,
            failed: meta.err.is_some(),
        })
    }
}

fn ui_instruction_program(ix: &UiInstruction, account_keys: &[String]) -> Option<String> {
    match ix {
        UiInstruction::Compiled(c) => account_keys.get(c.program_id_index as usize).cloned(),
        UiInstruction::Parsed(UiParsedInstruction::Parsed(p)) => Some(p.program_id.clone()),
        UiInstruction::Parsed(UiParsedInstruction::PartiallyDecoded(p)) => {
            Some(p.program_id.clone())
        }
    }
}

/// 按持仓变化分类
pub fn classify(pre: u64, post: u64) -> Result<TxType, ParseError> {
    match (pre, post) {
        (pre, post) if pre == post => Err(ParseError::ZeroChangeAmount { pre, post }),
        (0, _) => Ok(TxType::OpenPosition),
        (_, 0) => Ok(TxType::ClosePosition),
        (pre, post) if post > pre => Ok(TxType::AddPosition),
        _ => Ok(TxType::ReducePosition),
    }
}

/// 监控钱包在某个 mint 上的余额变化
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenChange {
    pub mint: String,
    pub pre: u64,
    pub post: u64,
    pub decimals: u8,
}

impl TokenChange {
    pub fn delta(&self) -> i128 {
        self.post as i128 - self.pre as i128
    }
}

/// 单笔交易的惰性解析结果，每笔交易新建一个实例
pub struct ParsedTransaction {
    raw: RawTransaction,
    wallet: String,
    view: OnceCell<Result<TxView, ParseError>>,
    token_change: OnceCell<Result<TokenChange, ParseError>>,
    sol_change: OnceCell<Result<i64, ParseError>>,
    tx_type: OnceCell<Result<TxType, ParseError>>,
    program_id: OnceCell<Result<Option<String>, ParseError>>,
}

impl ParsedTransaction {
    pub fn new(raw: RawTransaction, watched_wallet: &str) -> Self {
        Self {
            raw,
            wallet: watched_wallet.to_string(),
            view: OnceCell::new(),
            token_change: OnceCell::new(),
            sol_change: OnceCell::new(),
            tx_type: OnceCell::new(),
            program_id: OnceCell::new(),
        }
    }

    pub fn raw(&self) -> &RawTransaction {
        &self.raw
    }

    pub fn view(&self) -> Result<&TxView, ParseError> {
        self.view
            .get_or_init(|| TxView::from_raw(&self.raw))
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn who(&self) -> &str {
        &self.wallet
    }

    pub fn tx_hash(&self) -> Result<&str, ParseError> {
        Ok(&self.view()?.signature)
    }

    pub fn block_time(&self) -> Result<i64, ParseError> {
        Ok(self.view()?.block_time)
    }

    pub fn mint(&self) -> Result<&str, ParseError> {
        Ok(&self.token_balance()?.mint)
    }

    /// 选中 mint 的余额变化 (非 WSOL 中绝对变化量最大者)
    pub fn token_balance(&self) -> Result<&TokenChange, ParseError> {
        self.token_change
            .get_or_init(|| self.compute_token_change())
            .as_ref()
            .map_err(Clone::clone)
    }

    pub fn token_change(&self) -> Result<i128, ParseError> {
        Ok(self.token_balance()?.delta())
    }

    /// 钱包 SOL 变化 (lamports，含 WSOL)
    pub fn sol_change(&self) -> Result<i64, ParseError> {
        self.sol_change
            .get_or_init(|| self.compute_sol_change())
            .clone()
    }

    pub fn tx_type(&self) -> Result<TxType, ParseError> {
        self.tx_type
            .get_or_init(|| {
                let change = self.token_balance()?;
                classify(change.pre, change.post)
            })
            .clone()
    }

    pub fn tx_direction(&self) -> Result<TxDirection, ParseError> {
        let change = self.token_balance()?;
        Ok(if change.post > change.pre {
            TxDirection::Buy
        } else {
            TxDirection::Sell
        })
    }

    /// 首个已知 DEX 程序，否则首个非 compute budget 程序
    pub fn program_id(&self) -> Result<Option<&str>, ParseError> {
        self.program_id
            .get_or_init(|| {
                let view = self.view()?;
                let known = view.program_ids.iter().find(|id| {
                    Pubkey::from_str(id)
                        .map(|key| is_known_dex_program(&key))
                        .unwrap_or(false)
                });
                let compute_budget = COMPUTE_BUDGET_PROGRAM.to_string();
                let fallback = || view.program_ids.iter().find(|id| **id != compute_budget);
                Ok(known.or_else(fallback).cloned())
            })
            .as_ref()
            .map(|id| id.as_deref())
            .map_err(Clone::clone)
    }

    pub fn parse(&self) -> Result<TxEvent, ParseError> {
        let tx_type = self.tx_type()?;
        let change = self.token_balance()?;
        Ok(TxEvent {
            signature: self.tx_hash()?.to_string(),
            block_time: self.block_time()?,
            who: self.wallet.clone(),
            mint: change.mint.clone(),
            tx_direction: self.tx_direction()?,
            tx_type,
            pre_token_amount: change.pre,
            post_token_amount: change.post,
            decimals: change.decimals,
            sol_change: self.sol_change()?,
            program_id: self.program_id()?.map(str::to_string),
        })
    }

    fn owned_by_wallet<'a>(
        &'a self,
        balances: &'a [TokenBalanceEntry],
    ) -> impl Iterator<Item = &'a TokenBalanceEntry> + 'a {
        balances
            .iter()
            .filter(move |b| b.owner.as_deref() == Some(self.wallet.as_str()))
    }

    fn compute_token_change(&self) -> Result<TokenChange, ParseError> {
        let view = self.view()?;
        if view.failed {
            return Err(ParseError::NotSwapTransaction("transaction failed".to_string()));
        }

        // mint -> (pre, post, decimals)，同一 mint 的多个账户累加
        let mut changes: BTreeMap<&str, (u64, u64, u8)> = BTreeMap::new();
        for b in self.owned_by_wallet(&view.pre_token_balances) {
            if b.mint == WSOL {
                continue;
            }
            let entry = changes.entry(b.mint.as_str()).or_insert((0, 0, b.decimals));
            entry.0 = entry.0.saturating_add(b.amount);
        }
        for b in self.owned_by_wallet(&view.post_token_balances) {
            if b.mint == WSOL {
                continue;
            }
            let entry = changes.entry(b.mint.as_str()).or_insert((0, 0, b.decimals));
            entry.1 = entry.1.saturating_add(b.amount);
            entry.2 = b.decimals;
        }

        let (mint, (pre, post, decimals)) = changes
            .into_iter()
            .max_by_key(|(_, (pre, post, _))| (*post as i128 - *pre as i128).abs())
            .ok_or_else(|| {
                ParseError::NotSwapTransaction(format!("no token balance for {}", self.wallet))
            })?;

        Ok(TokenChange {
            mint: mint.to_string(),
            pre,
            post,
            decimals,
        })
    }

    fn compute_sol_change(&self) -> Result<i64, ParseError> {
        let view = self.view()?;
        let lamports = match view.account_keys.iter().position(|k| *k == self.wallet) {
            Some(index) => {
                let pre = view.pre_balances.get(index).copied().unwrap_or(0);
                let post = view.post_balances.get(index).copied().unwrap_or(0);
                post as i64 - pre as i64
            }
            None => 0,
        };

        let wsol_sum = |balances: &[TokenBalanceEntry]| -> i64 {
            self.owned_by_wallet(balances)
                .filter(|b| b.mint == WSOL)
                .map(|b| b.amount as i64)
                .sum()
        };
        let wsol = wsol_sum(&view.post_token_balances) - wsol_sum(&view.pre_token_balances);

        Ok(lamports + wsol)
    }
}
