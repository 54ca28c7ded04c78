//! Node facade
//!
//! The operations exposed to the HTTP layer and to remote miners, wrapping a
//! shared [`Ledger`]. Appends run on the blocking pool since they hash every
//! transaction and rewrite the chain file.

use crate::chain::{Block, MiningTask};
use crate::ledger::{AppendReceipt, ChainStats, Ledger, TransactionRecord};
use crate::transaction::Transaction;
use crate::wallet::Wallet;
use crate::{Address, Amount, Error, Hash256, Nonce, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// A solved block as submitted by a miner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitBlockRequest {
    pub index: u64,
    pub previous_hash: Hash256,
    pub transactions: Vec<Transaction>,
    pub nonce: Nonce,
    pub hash: Hash256,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner_address: Option<Address>,
    pub timestamp: i64,
}

impl SubmitBlockRequest {
    pub fn from_block(block: Block, miner_address: Option<Address>) -> Self {
        Self {
            index: block.index,
            previous_hash: block.previous_hash,
            transactions: block.transactions,
            nonce: block.nonce,
            hash: block.hash,
            miner_address,
            timestamp: block.timestamp,
        }
    }

    pub fn into_block(self) -> Block {
        Block {
            index: self.index,
            timestamp: self.timestamp,
            transactions: self.transactions,
            previous_hash: self.previous_hash,
            nonce: self.nonce,
            hash: self.hash,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmitStatus {
    Accepted,
    Rejected,
}

/// Response to a block submission
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitOutcome {
    pub status: SubmitStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Machine-readable failure kind, e.g. `link_broken`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub height: Option<u64>,
}

impl SubmitOutcome {
    pub fn accepted(height: u64) -> Self {
        Self {
            status: SubmitStatus::Accepted,
            reason: None,
            code: None,
            height: Some(height),
        }
    }

    pub fn rejected(error: &Error) -> Self {
        let code = match error {
            Error::Rejected { code, .. } => code.clone(),
            other => other.category().to_string(),
        };
        Self {
            status: SubmitStatus::Rejected,
            reason: Some(error.to_string()),
            code: Some(code),
            height: None,
        }
    }

    pub fn is_accepted(&self) -> bool {
        self.status == SubmitStatus::Accepted
    }

    /// Accepted height, or the rejection as an [`Error::Rejected`]
    pub fn into_result(self) -> Result<u64> {
        match (self.status, self.height) {
            (SubmitStatus::Accepted, Some(height)) => Ok(height),
            (SubmitStatus::Accepted, None) => Err(Error::invalid_state("accepted submission without a height")),
            (SubmitStatus::Rejected, _) => Err(Error::rejected(
                self.code.unwrap_or_else(|| "rejected".to_string()),
                self.reason.unwrap_or_default(),
            )),
        }
    }
}

/// Block lookup key: a position or a 64-hex hash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockId {
    Index(u64),
    Hash(Hash256),
}

impl FromStr for BlockId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if s.len() < 64 && !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()) {
            let index = s
                .parse()
                .map_err(|_| Error::not_found(format!("block {}", s)))?;
            return Ok(BlockId::Index(index));
        }
        s.parse().map(BlockId::Hash)
    }
}

/// Local node: ledger queries plus block and transaction intake
#[derive(Clone)]
pub struct Node {
    ledger: Arc<Ledger>,
}

impl Node {
    pub fn new(ledger: Arc<Ledger>) -> Self {
        Self { ledger }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Snapshot of the next block to mine
    pub fn get_mining_task(&self, miner: &Address) -> Result<MiningTask> {
        self.ledger.mining_task(miner)
    }

    /// Append a solved block, surfacing the failure kind as an error
    pub async fn append_block(&self, block: Block) -> Result<AppendReceipt> {
        let ledger = Arc::clone(&self.ledger);
        tokio::task::spawn_blocking(move || ledger.append(block))
            .await
            .map_err(|e| Error::invalid_state(format!("append task failed: {}", e)))?
    }

    /// Append a submitted block, reporting the failure as a tagged rejection
    #[instrument(skip(self, request), fields(index = request.index, hash = %request.hash))]
    pub async fn submit_block(&self, request: SubmitBlockRequest) -> SubmitOutcome {
        let miner = request.miner_address.clone();
        match self.append_block(request.into_block()).await {
            Ok(receipt) => {
                info!(height = receipt.height, miner = ?miner.as_ref().map(Address::as_str), "Accepted submitted block");
                SubmitOutcome::accepted(receipt.height)
            }
            Err(e) => {
                warn!(reason = %e, "Rejected submitted block");
                SubmitOutcome::rejected(&e)
            }
        }
    }

    pub fn get_balance(&self, address: &Address) -> Amount {
        self.ledger.balance(address)
    }

    pub fn get_history(&self, address: &Address) -> Vec<TransactionRecord> {
        self.ledger.history(address)
    }

    pub fn get_block(&self, id: BlockId) -> Result<Block> {
        let found = match id {
            BlockId::Index(index) => self.ledger.block_by_index(index),
            BlockId::Hash(hash) => self.ledger.block_by_hash(&hash),
        };
        found.ok_or_else(|| match id {
            BlockId::Index(index) => Error::not_found(format!("block {}", index)),
            BlockId::Hash(hash) => Error::not_found(format!("block {}", hash)),
        })
    }

    pub fn get_transaction(&self, id: &Hash256) -> Result<TransactionRecord> {
        self.ledger
            .transaction(id)
            .ok_or_else(|| Error::not_found(format!("transaction {}", id)))
    }

    pub fn create_transaction(&self, wallet: &Wallet, to: Address, amount: Amount) -> Result<Transaction> {
        self.ledger.create_transaction(wallet, to, amount)
    }

    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256> {
        self.ledger.submit_transaction(tx)
    }

    pub fn chain(&self) -> Vec<Block> {
        self.ledger.blocks()
    }

    pub fn stats(&self) -> ChainStats {
        self.ledger.stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryStore;
    use crate::policy::ChainParams;
    use crate::pow::solve;
    use crate::Difficulty;
    use tokio_util::sync::CancellationToken;

    fn node() -> Node {
        let mut params = ChainParams::default();
        params.difficulty.initial = Difficulty::new(1).unwrap();
        params.difficulty.min = Difficulty::new(1).unwrap();
        params.difficulty.max = Difficulty::new(1).unwrap();
        let ledger = Ledger::open(params, Arc::new(MemoryStore::new())).unwrap();
        Node::new(Arc::new(ledger))
    }

    #[test]
    fn test_block_id_parsing() {
        assert_eq!("17".parse::<BlockId>().unwrap(), BlockId::Index(17));
        let hex = "ab".repeat(32);
        assert_eq!(
            hex.parse::<BlockId>().unwrap(),
            BlockId::Hash(hex.parse().unwrap())
        );
        assert!("xyz".parse::<BlockId>().is_err());
    }

    #[tokio::test]
    async fn test_submit_block_accept_then_duplicate() {
        let node = node();
        let miner = Wallet::generate();
        let task = node.get_mining_task(miner.address()).unwrap();
        let block = solve(&task, &CancellationToken::new()).unwrap();
        let request = SubmitBlockRequest::from_block(block, Some(miner.address().clone()));

        let outcome = node.submit_block(request.clone()).await;
        assert_eq!(outcome, SubmitOutcome::accepted(1));

        let outcome = node.submit_block(request).await;
        assert_eq!(outcome.status, SubmitStatus::Rejected);
        assert_eq!(outcome.code.as_deref(), Some("duplicate_hash"));

        let err = outcome.into_result().unwrap_err();
        assert!(err.is_stale());
    }

    #[tokio::test]
    async fn test_get_block_not_found() {
        let node = node();
        assert!(node.get_block(BlockId::Index(0)).is_ok());
        assert!(matches!(node.get_block(BlockId::Index(5)), Err(Error::NotFound { .. })));
    }
}
