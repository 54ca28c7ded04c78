//! Hash-chain model
//!
//! Block structure, canonical hashing, mining templates and structural
//! validation.

use crate::crypto::PrefixHasher;
use crate::transaction::Transaction;
use crate::{Difficulty, Hash256, Nonce, Target};
use serde::{Deserialize, Serialize};

pub mod block;
pub mod validation;

pub use block::{compute_hash, hash_prefix, Block, GENESIS_TIMESTAMP};
pub use validation::{check_chain, validate_block, validate_chain, validate_genesis};

/// Everything a miner needs to search for a nonce: the block fields minus
/// the nonce and hash
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningTask {
    pub index: u64,
    pub previous_hash: Hash256,
    pub transactions: Vec<Transaction>,
    pub difficulty: Difficulty,
    pub timestamp: i64,
}

impl MiningTask {
    /// Hasher state with the fixed prefix absorbed
    pub fn prefix_hasher(&self) -> PrefixHasher {
        PrefixHasher::new(&hash_prefix(
            self.index,
            &self.previous_hash,
            self.timestamp,
            &self.transactions,
        ))
    }

    /// Threshold the block hash must meet
    pub fn target(&self) -> Target {
        self.difficulty.target()
    }

    /// Turn a solved task into a block
    pub fn seal(&self, nonce: Nonce, hash: Hash256) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions.clone(),
            previous_hash: self.previous_hash,
            nonce,
            hash,
        }
    }
}
