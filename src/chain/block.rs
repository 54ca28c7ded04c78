//! Block structure and canonical hashing

use crate::crypto::PrefixHasher;
use crate::transaction::{CanonicalWriter, Transaction};
use crate::{Address, Amount, Hash256, Nonce};
use serde::{Deserialize, Serialize};

/// Fixed genesis timestamp (ms) so every node derives the same genesis hash
pub const GENESIS_TIMESTAMP: i64 = 1_700_000_000_000;

/// An immutable, committed (or candidate) block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Block {
    pub index: u64,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub transactions: Vec<Transaction>,
    pub previous_hash: Hash256,
    pub nonce: Nonce,
    pub hash: Hash256,
}

/// Every field of the hash input except the nonce, which goes last
pub fn hash_prefix(
    index: u64,
    previous_hash: &Hash256,
    timestamp: i64,
    transactions: &[Transaction],
) -> Vec<u8> {
    let mut writer = CanonicalWriter::new();
    writer.put_bytes(previous_hash.as_bytes());
    writer.put_u64(index);
    writer.put_i64(timestamp);
    writer.put_u32(transactions.len() as u32);
    for tx in transactions {
        tx.write_canonical(&mut writer);
    }
    writer.into_bytes()
}

/// Deterministic digest of a block's content
pub fn compute_hash(
    index: u64,
    previous_hash: &Hash256,
    timestamp: i64,
    transactions: &[Transaction],
    nonce: Nonce,
) -> Hash256 {
    let prefix = hash_prefix(index, previous_hash, timestamp, transactions);
    PrefixHasher::new(&prefix).hash_nonce(nonce.value())
}

impl Block {
    /// Genesis block with an optional premine allocation
    pub fn genesis(premine: Option<(Address, Amount)>) -> Self {
        let transactions = match premine {
            Some((to, amount)) if !amount.is_zero() => {
                vec![Transaction::premine(to, amount, GENESIS_TIMESTAMP)]
            }
            _ => Vec::new(),
        };
        let previous_hash = Hash256::zero();
        let nonce = Nonce::new(0);
        let hash = compute_hash(0, &previous_hash, GENESIS_TIMESTAMP, &transactions, nonce);

        Self {
            index: 0,
            timestamp: GENESIS_TIMESTAMP,
            transactions,
            previous_hash,
            nonce,
            hash,
        }
    }

    /// Digest of the block's current fields
    pub fn recompute_hash(&self) -> Hash256 {
        compute_hash(
            self.index,
            &self.previous_hash,
            self.timestamp,
            &self.transactions,
            self.nonce,
        )
    }

    /// Minting transactions in this block
    pub fn system_transactions(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.iter().filter(|tx| tx.is_system())
    }

    /// Net effect of this block on an address: (credits, debits)
    pub fn flows_for(&self, address: &Address) -> (Amount, Amount) {
        self.transactions
            .iter()
            .fold((Amount::ZERO, Amount::ZERO), |(credit, debit), tx| {
                let credit = if &tx.to == address {
                    credit.saturating_add(tx.amount)
                } else {
                    credit
                };
                let debit = if &tx.from == address {
                    debit.saturating_add(tx.amount)
                } else {
                    debit
                };
                (credit, debit)
            })
    }
}
