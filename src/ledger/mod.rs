//! Ledger store
//!
//! Owns the committed block sequence and the mempool. Appends are serialized
//! through a single writer lock and persisted before they become visible;
//! readers always see either the pre- or post-append chain. Balances, account
//! nonces and minted supply are replayed from committed blocks on every query.

use crate::chain::{check_chain, validate_block, validate_chain, Block, MiningTask};
use crate::policy::ChainParams;
use crate::transaction::Transaction;
use crate::utils::current_timestamp_millis;
use crate::wallet::Wallet;
use crate::{Address, Amount, Difficulty, Error, Hash256, Result};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub mod store;

pub use store::{ChainStore, JsonFileStore, MemoryStore};

/// How far a block timestamp may run ahead of the local clock
pub const MAX_FUTURE_DRIFT_MS: i64 = 2 * 60 * 1000;

/// Result of a successful append
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AppendReceipt {
    pub height: u64,
    pub hash: Hash256,
}

/// A transaction and where it landed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionRecord {
    pub transaction: Transaction,
    /// `None` while the transaction waits in the mempool
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_index: Option<u64>,
}

/// Summary of chain state
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainStats {
    pub height: u64,
    pub head_hash: Hash256,
    pub difficulty: Difficulty,
    pub current_reward: Amount,
    pub minted_supply: Amount,
    pub total_supply: Amount,
    pub mempool_size: usize,
}

struct LedgerState {
    blocks: Vec<Block>,
    /// Difficulty the next block must meet
    difficulty: Difficulty,
    mempool: Vec<Transaction>,
}

impl LedgerState {
    fn head(&self) -> &Block {
        // Never empty: open() always installs at least genesis
        &self.blocks[self.blocks.len() - 1]
    }
}

/// Sequential balance and nonce replay over committed blocks plus whatever
/// has been applied on top
struct Replay<'a> {
    blocks: &'a [Block],
    balances: HashMap<Address, Amount>,
    nonces: HashMap<Address, u64>,
}

impl<'a> Replay<'a> {
    fn new(blocks: &'a [Block]) -> Self {
        Self {
            blocks,
            balances: HashMap::new(),
            nonces: HashMap::new(),
        }
    }

    fn balance(&mut self, address: &Address) -> Amount {
        let blocks = self.blocks;
        *self
            .balances
            .entry(address.clone())
            .or_insert_with(|| balance_in(blocks, address))
    }

    fn nonce(&mut self, address: &Address) -> u64 {
        let blocks = self.blocks;
        *self
            .nonces
            .entry(address.clone())
            .or_insert_with(|| committed_nonce_in(blocks, address))
    }

    /// Apply one transaction, enforcing nonce order and solvency for transfers
    fn apply(&mut self, tx: &Transaction) -> Result<()> {
        if !tx.is_system() {
            let expected = self.nonce(&tx.from) + 1;
            if tx.nonce != expected {
                return Err(Error::InvalidNonce {
                    address: tx.from.clone(),
                    expected,
                    actual: tx.nonce,
                });
            }

            let available = self.balance(&tx.from);
            let remaining = available
                .checked_sub(tx.amount)
                .ok_or_else(|| Error::InsufficientBalance {
                    address: tx.from.clone(),
                    available,
                    required: tx.amount,
                })?;
            self.balances.insert(tx.from.clone(), remaining);
            self.nonces.insert(tx.from.clone(), expected);
        }

        let credited = self.balance(&tx.to).saturating_add(tx.amount);
        self.balances.insert(tx.to.clone(), credited);
        Ok(())
    }
}

/// Σ credits − Σ debits for `address` over `blocks`
pub fn balance_in(blocks: &[Block], address: &Address) -> Amount {
    let (credits, debits) = blocks
        .iter()
        .map(|block| block.flows_for(address))
        .fold((Amount::ZERO, Amount::ZERO), |(c, d), (bc, bd)| {
            (c.saturating_add(bc), d.saturating_add(bd))
        });
    credits.saturating_sub(debits)
}

/// Count of committed transfers sent by `address`
pub fn committed_nonce_in(blocks: &[Block], address: &Address) -> u64 {
    blocks
        .iter()
        .flat_map(|block| block.transactions.iter())
        .filter(|tx| !tx.is_system() && &tx.from == address)
        .count() as u64
}

/// Premine plus every block reward
pub fn minted_in(blocks: &[Block]) -> Amount {
    blocks
        .iter()
        .flat_map(|block| block.system_transactions())
        .fold(Amount::ZERO, |acc, tx| acc.saturating_add(tx.amount))
}

/// Transaction and reward rules for `block` on top of `committed`
pub fn check_block_economics(params: &ChainParams, committed: &[Block], block: &Block) -> Result<()> {
    let mut replay = Replay::new(committed);
    apply_block_economics(params, &mut replay, minted_in(committed), block).map(|_| ())
}

/// Apply `block` to `replay` under the reward rules, given `minted` so far.
/// Returns the supply minted once the block is included.
fn apply_block_economics(
    params: &ChainParams,
    replay: &mut Replay<'_>,
    minted: Amount,
    block: &Block,
) -> Result<Amount> {
    let mut minted_here: Vec<Amount> = Vec::new();

    for tx in &block.transactions {
        tx.check_shape()?;
        tx.verify_signature()?;
        if tx.is_system() {
            minted_here.push(tx.amount);
        }
        replay.apply(tx)?;
    }

    let expected = params.reward.expected_reward(block.index, minted);
    match minted_here.as_slice() {
        [] if expected.is_zero() => Ok(minted),
        [] => Err(Error::invalid_reward(format!(
            "block {} carries no reward, expected {}",
            block.index, expected
        ))),
        [reward] => {
            let cap = params.reward.total_supply;
            if minted.checked_add(*reward).map_or(true, |total| total > cap) {
                return Err(Error::SupplyExceeded {
                    minted,
                    reward: *reward,
                    cap,
                });
            }
            if *reward != expected {
                return Err(Error::invalid_reward(format!(
                    "block {} rewards {}, expected {}",
                    block.index, reward, expected
                )));
            }
            Ok(minted.saturating_add(*reward))
        }
        _ => Err(Error::invalid_reward(format!(
            "block {} mints {} times",
            block.index,
            minted_here.len()
        ))),
    }
}

/// The committed chain, its mempool and the store behind them
pub struct Ledger {
    params: ChainParams,
    store: Arc<dyn ChainStore>,
    state: RwLock<LedgerState>,
    append_lock: Mutex<()>,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Ledger")
            .field("store", &self.store.name())
            .field("height", &state.head().index)
            .field("difficulty", &state.difficulty)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    /// Load the stored chain, recover from a snapshot, or create genesis
    pub fn open(params: ChainParams, store: Arc<dyn ChainStore>) -> Result<Self> {
        params.validate()?;

        let blocks = match store.load() {
            Ok(Some(chain)) => match Self::verify_history(&params, &chain) {
                Ok(()) => chain,
                Err(e) => {
                    warn!(store = store.name(), error = %e, "Stored chain is invalid, trying snapshots");
                    Self::recover(&params, store.as_ref())?
                }
            },
            Ok(None) => {
                let premine = params
                    .premine_address
                    .clone()
                    .map(|to| (to, params.premine_amount()));
                let genesis = Block::genesis(premine);
                store.persist(std::slice::from_ref(&genesis))?;
                info!(hash = %genesis.hash, premine = %params.premine_amount(), "Created genesis block");
                vec![genesis]
            }
            Err(e) => {
                warn!(store = store.name(), error = %e, "Stored chain is unreadable, trying snapshots");
                Self::recover(&params, store.as_ref())?
            }
        };

        let difficulty = check_chain(&blocks, &params.difficulty)?;
        info!(
            store = store.name(),
            height = blocks.len() - 1,
            difficulty = %difficulty,
            "Ledger opened"
        );

        Ok(Self {
            params,
            store,
            state: RwLock::new(LedgerState {
                blocks,
                difficulty,
                mempool: Vec::new(),
            }),
            append_lock: Mutex::new(()),
        })
    }

    /// Structural and economic replay of a whole chain in a single pass
    fn verify_history(params: &ChainParams, chain: &[Block]) -> Result<()> {
        check_chain(chain, &params.difficulty)?;

        let Some((genesis, rest)) = chain.split_first() else {
            return Ok(());
        };
        let mut replay = Replay::new(&[]);
        for tx in &genesis.transactions {
            replay.apply(tx)?;
        }
        let mut minted = minted_in(std::slice::from_ref(genesis));
        for block in rest {
            minted = apply_block_economics(params, &mut replay, minted, block)?;
        }
        Ok(())
    }

    fn recover(params: &ChainParams, store: &dyn ChainStore) -> Result<Vec<Block>> {
        for snapshot in store.snapshots()? {
            match Self::verify_history(params, &snapshot) {
                Ok(()) => {
                    store.persist(&snapshot)?;
                    warn!(height = snapshot.len().saturating_sub(1), "Recovered chain from snapshot");
                    return Ok(snapshot);
                }
                Err(e) => debug!(error = %e, "Snapshot failed validation"),
            }
        }
        Err(Error::persistence("no valid chain file or snapshot found"))
    }

    /// Configured chain parameters
    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    /// Validate and commit a candidate block.
    ///
    /// Check order: duplicate hash, hash integrity, work, linkage, every
    /// transaction, reward. The block is persisted before it becomes
    /// visible; a failed write leaves memory and disk unchanged.
    pub fn append(&self, block: Block) -> Result<AppendReceipt> {
        let _writer = self.append_lock.lock();

        {
            let state = self.state.read();
            if let Err(e) = self.validate_candidate(&state, &block) {
                debug!(index = block.index, hash = %block.hash, reason = %e, "Rejected block");
                return Err(e);
            }
        }

        let mut state = self.state.write();
        state.blocks.push(block);
        if let Err(e) = self.store.persist(&state.blocks) {
            state.blocks.pop();
            error!(store = self.store.name(), error = %e, "Failed to persist block");
            return Err(match e {
                e @ Error::PersistenceFailure { .. } => e,
                other => Error::persistence(other.to_string()),
            });
        }

        let len = state.blocks.len();
        let (index, hash, timestamp, previous_timestamp) = {
            let block = &state.blocks[len - 1];
            (block.index, block.hash, block.timestamp, state.blocks[len - 2].timestamp)
        };

        let next = self.params.difficulty.retarget(state.difficulty, previous_timestamp, timestamp);
        if next != state.difficulty {
            info!(from = %state.difficulty, to = %next, "Difficulty retargeted");
        }
        state.difficulty = next;

        self.refresh_mempool(&mut state);

        info!(
            height = index,
            hash = %hash,
            transactions = state.blocks[len - 1].transactions.len(),
            difficulty = %state.difficulty,
            "Block appended"
        );
        Ok(AppendReceipt { height: index, hash })
    }

    fn validate_candidate(&self, state: &LedgerState, block: &Block) -> Result<()> {
        if state.blocks.iter().any(|b| b.hash == block.hash) {
            return Err(Error::DuplicateHash { hash: block.hash });
        }
        validate_block(block, state.head(), state.difficulty)?;
        let horizon = current_timestamp_millis().saturating_add(MAX_FUTURE_DRIFT_MS);
        if block.timestamp > horizon {
            return Err(Error::invalid_timestamp(format!(
                "block {} at {} is more than {}ms ahead of the node clock",
                block.index, block.timestamp, MAX_FUTURE_DRIFT_MS
            )));
        }
        check_block_economics(&self.params, &state.blocks, block)
    }

    /// Drop included transactions and anything no longer applicable
    fn refresh_mempool(&self, state: &mut LedgerState) {
        let included: HashSet<Hash256> = state
            .head()
            .transactions
            .iter()
            .map(Transaction::id)
            .collect();

        let pending = std::mem::take(&mut state.mempool);
        let mut replay = Replay::new(&state.blocks);
        let mut kept = Vec::with_capacity(pending.len());
        for tx in pending {
            if included.contains(&tx.id()) {
                continue;
            }
            match replay.apply(&tx) {
                Ok(()) => kept.push(tx),
                Err(e) => debug!(from = %tx.from, nonce = tx.nonce, reason = %e, "Pruned stale mempool transaction"),
            }
        }
        state.mempool = kept;
    }

    /// Build a mining template: reward first, then every pending transfer
    /// that still applies in order
    pub fn mining_task(&self, miner: &Address) -> Result<MiningTask> {
        if miner.is_system() {
            return Err(Error::invalid_transaction("SYSTEM cannot mine"));
        }

        let state = self.state.read();
        let head = state.head();
        let index = head.index + 1;
        let timestamp = current_timestamp_millis().max(head.timestamp);

        let mut transactions = Vec::with_capacity(state.mempool.len() + 1);
        let reward = self
            .params
            .reward
            .expected_reward(index, minted_in(&state.blocks));
        if !reward.is_zero() {
            transactions.push(Transaction::reward(miner.clone(), reward, timestamp));
        }

        let mut replay = Replay::new(&state.blocks);
        for tx in &state.mempool {
            if replay.apply(tx).is_ok() {
                transactions.push(tx.clone());
            }
        }

        Ok(MiningTask {
            index,
            previous_hash: head.hash,
            transactions,
            difficulty: state.difficulty,
            timestamp,
        })
    }

    /// Queue a pre-signed transfer
    pub fn submit_transaction(&self, tx: Transaction) -> Result<Hash256> {
        if tx.is_system() {
            return Err(Error::invalid_transaction("SYSTEM transactions are only minted by blocks"));
        }
        tx.check_shape()?;
        tx.verify_signature()?;

        let mut state = self.state.write();
        Self::admit(&mut state, tx)
    }

    /// Build, sign and queue a transfer from `wallet`
    pub fn create_transaction(&self, wallet: &Wallet, to: Address, amount: Amount) -> Result<Transaction> {
        if amount.is_zero() {
            return Err(Error::invalid_amount("Transfer amount must be positive"));
        }

        let mut state = self.state.write();
        let from = wallet.address().clone();
        let nonce = committed_nonce_in(&state.blocks, &from)
            + state.mempool.iter().filter(|tx| tx.from == from).count() as u64
            + 1;

        let mut tx = Transaction::transfer(from, to, amount, current_timestamp_millis(), nonce);
        tx.check_shape()?;
        tx.sign_with(wallet.signing_key())?;
        Self::admit(&mut state, tx.clone())?;
        Ok(tx)
    }

    /// Admission: the transfer must apply after the sender's pending transfers
    fn admit(state: &mut LedgerState, tx: Transaction) -> Result<Hash256> {
        // Only the sender's own pending spends count; pending credits do not
        let mut replay = Replay::new(&state.blocks);
        for pending in state.mempool.iter().filter(|p| p.from == tx.from) {
            if let Err(e) = replay.apply(pending) {
                debug!(from = %pending.from, nonce = pending.nonce, reason = %e, "Skipped inapplicable pending transfer");
            }
        }
        replay.apply(&tx)?;

        let id = tx.id();
        debug!(id = %id, from = %tx.from, to = %tx.to, amount = %tx.amount, nonce = tx.nonce, "Transaction queued");
        state.mempool.push(tx);
        Ok(id)
    }

    /// Height of the head block (genesis is 0)
    pub fn height(&self) -> u64 {
        self.state.read().head().index
    }

    /// The head block
    pub fn head(&self) -> Block {
        self.state.read().head().clone()
    }

    /// Difficulty the next block must meet
    pub fn difficulty(&self) -> Difficulty {
        self.state.read().difficulty
    }

    /// Block at position `index`
    pub fn block_by_index(&self, index: u64) -> Option<Block> {
        let state = self.state.read();
        usize::try_from(index).ok().and_then(|i| state.blocks.get(i).cloned())
    }

    /// Block with the given hash
    pub fn block_by_hash(&self, hash: &Hash256) -> Option<Block> {
        self.state
            .read()
            .blocks
            .iter()
            .find(|block| &block.hash == hash)
            .cloned()
    }

    /// Replayed balance of `address`
    pub fn balance(&self, address: &Address) -> Amount {
        balance_in(&self.state.read().blocks, address)
    }

    /// Committed transactions touching `address`, in block order
    pub fn history(&self, address: &Address) -> Vec<TransactionRecord> {
        let state = self.state.read();
        state
            .blocks
            .iter()
            .flat_map(|block| {
                block
                    .transactions
                    .iter()
                    .filter(|tx| &tx.from == address || &tx.to == address)
                    .map(|tx| TransactionRecord {
                        transaction: tx.clone(),
                        block_index: Some(block.index),
                    })
            })
            .collect()
    }

    /// Find a transaction by id, committed or pending
    pub fn transaction(&self, id: &Hash256) -> Option<TransactionRecord> {
        let state = self.state.read();
        for block in &state.blocks {
            if let Some(tx) = block.transactions.iter().find(|tx| &tx.id() == id) {
                return Some(TransactionRecord {
                    transaction: tx.clone(),
                    block_index: Some(block.index),
                });
            }
        }
        state
            .mempool
            .iter()
            .find(|tx| &tx.id() == id)
            .map(|tx| TransactionRecord {
                transaction: tx.clone(),
                block_index: None,
            })
    }

    /// Next account nonce for `address`, counting pending transfers
    pub fn next_nonce(&self, address: &Address) -> u64 {
        let state = self.state.read();
        committed_nonce_in(&state.blocks, address)
            + state.mempool.iter().filter(|tx| &tx.from == address).count() as u64
            + 1
    }

    /// Premine plus rewards so far
    pub fn minted_supply(&self) -> Amount {
        minted_in(&self.state.read().blocks)
    }

    /// Pending transfers in admission order
    pub fn pending_transactions(&self) -> Vec<Transaction> {
        self.state.read().mempool.clone()
    }

    /// Copy of the committed chain
    pub fn blocks(&self) -> Vec<Block> {
        self.state.read().blocks.clone()
    }

    /// Re-walk the committed chain
    pub fn validate(&self) -> bool {
        validate_chain(&self.state.read().blocks, &self.params.difficulty)
    }

    /// Summary of chain state
    pub fn stats(&self) -> ChainStats {
        let state = self.state.read();
        let head = state.head();
        ChainStats {
            height: head.index,
            head_hash: head.hash,
            difficulty: state.difficulty,
            current_reward: self.params.reward.current_reward(head.index + 1),
            minted_supply: minted_in(&state.blocks),
            total_supply: self.params.reward.total_supply,
            mempool_size: state.mempool.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{DifficultyPolicy, RewardPolicy};
    use crate::pow::solve;
    use assert_matches::assert_matches;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    struct Fixture {
        ledger: Ledger,
        store: Arc<MemoryStore>,
        premine: Wallet,
    }

    fn params(premine: &Wallet) -> ChainParams {
        ChainParams {
            reward: RewardPolicy {
                base_reward: Amount::from_coins(10),
                min_reward: Amount::from_coins(1),
                halving_interval: 100,
                total_supply: Amount::from_coins(2000),
            },
            difficulty: DifficultyPolicy {
                initial: Difficulty::new(1).unwrap(),
                min: Difficulty::new(1).unwrap(),
                max: Difficulty::new(1).unwrap(),
                target_block_time: Duration::from_secs(60),
            },
            premine_ratio: 0.05,
            premine_address: Some(premine.address().clone()),
        }
    }

    fn fixture() -> Fixture {
        let premine = Wallet::generate();
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::open(params(&premine), store.clone()).unwrap();
        Fixture {
            ledger,
            store,
            premine,
        }
    }

    fn mine(ledger: &Ledger, miner: &Address) -> Block {
        let task = ledger.mining_task(miner).unwrap();
        solve(&task, &CancellationToken::new()).unwrap()
    }

    #[test]
    fn test_genesis_premine() {
        let f = fixture();
        assert_eq!(f.ledger.height(), 0);
        assert_eq!(f.ledger.balance(f.premine.address()), Amount::from_coins(100));
        assert_eq!(f.ledger.minted_supply(), Amount::from_coins(100));
        assert_eq!(f.store.stored_len(), 1);
    }

    #[test]
    fn test_append_rewards_miner() {
        let f = fixture();
        let miner = Wallet::generate();
        let receipt = f.ledger.append(mine(&f.ledger, miner.address())).unwrap();

        assert_eq!(receipt.height, 1);
        assert_eq!(f.ledger.balance(miner.address()), Amount::from_coins(10));
        assert_eq!(f.store.stored_len(), 2);
        assert!(f.ledger.validate());
    }

    #[test]
    fn test_transfer_flow_and_replay_protection() {
        let f = fixture();
        let recipient = Wallet::generate();
        let miner = Wallet::generate();

        let tx = f
            .ledger
            .create_transaction(&f.premine, recipient.address().clone(), Amount::from_coins(40))
            .unwrap();
        assert_eq!(tx.nonce, 1);
        assert_eq!(f.ledger.pending_transactions().len(), 1);

        f.ledger.append(mine(&f.ledger, miner.address())).unwrap();
        assert_eq!(f.ledger.balance(recipient.address()), Amount::from_coins(40));
        assert_eq!(f.ledger.balance(f.premine.address()), Amount::from_coins(60));
        assert!(f.ledger.pending_transactions().is_empty());

        // Resubmitting the same signed transfer is a replay
        assert_matches!(f.ledger.submit_transaction(tx), Err(Error::InvalidNonce { expected: 2, actual: 1, .. }));
    }

    #[test]
    fn test_create_transaction_rejections() {
        let f = fixture();
        let recipient = Wallet::generate().address().clone();

        assert_matches!(
            f.ledger.create_transaction(&f.premine, recipient.clone(), Amount::ZERO),
            Err(Error::InvalidAmount { .. })
        );
        assert_matches!(
            f.ledger.create_transaction(&f.premine, recipient.clone(), Amount::from_coins(101)),
            Err(Error::InsufficientBalance { .. })
        );

        // Pending spends count against the balance
        f.ledger
            .create_transaction(&f.premine, recipient.clone(), Amount::from_coins(60))
            .unwrap();
        assert_matches!(
            f.ledger.create_transaction(&f.premine, recipient, Amount::from_coins(60)),
            Err(Error::InsufficientBalance { .. })
        );
    }

    #[test]
    fn test_rejects_insufficient_work() {
        let f = fixture();
        let miner = Wallet::generate();
        let task = f.ledger.mining_task(miner.address()).unwrap();
        let hasher = task.prefix_hasher();
        let target = task.target();

        let nonce = (0u64..).find(|n| !target.is_met_by(&hasher.hash_nonce(*n))).unwrap();
        let block = task.seal(crate::Nonce::new(nonce), hasher.hash_nonce(nonce));

        assert_matches!(f.ledger.append(block), Err(Error::InsufficientWork { .. }));
        assert_eq!(f.ledger.height(), 0);
    }

    #[test]
    fn test_rejects_tampered_block() {
        let f = fixture();
        let miner = Wallet::generate();
        let mut block = mine(&f.ledger, miner.address());
        block.transactions[0].amount = Amount::from_coins(1000);

        assert_matches!(f.ledger.append(block), Err(Error::HashMismatch { .. }));
    }

    #[test]
    fn test_rejects_wrong_reward() {
        let f = fixture();
        let miner = Wallet::generate();
        let mut task = f.ledger.mining_task(miner.address()).unwrap();
        task.transactions[0].amount = Amount::from_coins(11);
        let block = solve(&task, &CancellationToken::new()).unwrap();

        assert_matches!(f.ledger.append(block), Err(Error::InvalidReward { .. }));

        let mut task = f.ledger.mining_task(miner.address()).unwrap();
        task.transactions.clear();
        let block = solve(&task, &CancellationToken::new()).unwrap();
        assert_matches!(f.ledger.append(block), Err(Error::InvalidReward { .. }));
    }

    #[test]
    fn test_rejects_supply_overflow() {
        let f = fixture();
        let miner = Wallet::generate();
        let mut task = f.ledger.mining_task(miner.address()).unwrap();
        task.transactions[0].amount = Amount::from_coins(5000);
        let block = solve(&task, &CancellationToken::new()).unwrap();

        assert_matches!(f.ledger.append(block), Err(Error::SupplyExceeded { .. }));
    }

    #[test]
    fn test_rejects_forged_signature() {
        let f = fixture();
        let thief = Wallet::generate();
        let miner = Wallet::generate();

        let mut forged = Transaction::transfer(
            f.premine.address().clone(),
            thief.address().clone(),
            Amount::from_coins(50),
            current_timestamp_millis(),
            1,
        );
        forged.signature = Some(crate::transaction::sign(thief.signing_key(), &forged));

        assert_matches!(f.ledger.submit_transaction(forged.clone()), Err(Error::InvalidSignature { .. }));

        let mut task = f.ledger.mining_task(miner.address()).unwrap();
        task.transactions.push(forged);
        let block = solve(&task, &CancellationToken::new()).unwrap();
        assert_matches!(f.ledger.append(block), Err(Error::InvalidSignature { .. }));
    }

    #[test]
    fn test_retarget_after_first_block() {
        let premine = Wallet::generate();
        let mut params = params(&premine);
        params.difficulty.initial = Difficulty::new(2).unwrap();
        params.difficulty.max = Difficulty::new(2).unwrap();
        let ledger = Ledger::open(params, Arc::new(MemoryStore::new())).unwrap();
        assert_eq!(ledger.difficulty(), Difficulty::new(2).unwrap());

        // Genesis is dated years before block 1, far beyond twice the target
        let miner = Wallet::generate();
        ledger.append(mine(&ledger, miner.address())).unwrap();
        assert_eq!(ledger.difficulty(), Difficulty::new(1).unwrap());
        assert!(ledger.validate());
    }

    #[test]
    fn test_rejects_out_of_range_timestamps() {
        let f = fixture();
        let miner = Wallet::generate();

        let mut task = f.ledger.mining_task(miner.address()).unwrap();
        task.timestamp = current_timestamp_millis() + MAX_FUTURE_DRIFT_MS + 60_000;
        let ahead = solve(&task, &CancellationToken::new()).unwrap();
        assert_matches!(f.ledger.append(ahead), Err(Error::InvalidTimestamp { .. }));

        task.timestamp = f.ledger.head().timestamp - 1;
        let backdated = solve(&task, &CancellationToken::new()).unwrap();
        assert_matches!(f.ledger.append(backdated), Err(Error::InvalidTimestamp { .. }));

        assert_eq!(f.ledger.height(), 0);
        f.ledger.append(mine(&f.ledger, miner.address())).unwrap();
    }

    #[test]
    fn test_admission_skips_inapplicable_pending_spend() {
        let f = fixture();
        let recipient = Wallet::generate().address().clone();

        // A pending transfer with a skipped nonce never applies, so it does
        // not count against the sender
        let mut gap = Transaction::transfer(
            f.premine.address().clone(),
            recipient.clone(),
            Amount::from_coins(90),
            current_timestamp_millis(),
            5,
        );
        gap.sign_with(f.premine.signing_key()).unwrap();
        f.ledger.state.write().mempool.push(gap);

        let mut tx = Transaction::transfer(
            f.premine.address().clone(),
            recipient,
            Amount::from_coins(50),
            current_timestamp_millis(),
            1,
        );
        tx.sign_with(f.premine.signing_key()).unwrap();
        assert!(f.ledger.submit_transaction(tx).is_ok());
    }

    #[test]
    fn test_persistence_failure_leaves_state_unchanged() {
        let f = fixture();
        let miner = Wallet::generate();
        let block = mine(&f.ledger, miner.address());

        f.store.set_fail_writes(true);
        assert_matches!(f.ledger.append(block.clone()), Err(Error::PersistenceFailure { .. }));
        assert_eq!(f.ledger.height(), 0);
        assert_eq!(f.store.stored_len(), 1);

        f.store.set_fail_writes(false);
        assert_eq!(f.ledger.append(block).unwrap().height, 1);
    }

    #[test]
    fn test_reopen_replays_state() {
        let premine = Wallet::generate();
        let store = Arc::new(MemoryStore::new());
        let miner = Wallet::generate();
        {
            let ledger = Ledger::open(params(&premine), store.clone()).unwrap();
            for _ in 0..3 {
                ledger.append(mine(&ledger, miner.address())).unwrap();
            }
        }

        let reopened = Ledger::open(params(&premine), store).unwrap();
        assert_eq!(reopened.height(), 3);
        assert_eq!(reopened.balance(miner.address()), Amount::from_coins(30));
    }

    #[test]
    fn test_reopen_rejects_overspend_across_blocks() {
        let f = fixture();
        let recipient = Wallet::generate();
        let miner = Wallet::generate();

        f.ledger
            .create_transaction(&f.premine, recipient.address().clone(), Amount::from_coins(80))
            .unwrap();
        f.ledger.append(mine(&f.ledger, miner.address())).unwrap();

        // Each spend fits the premine alone, but not after the first one landed
        let mut second = Transaction::transfer(
            f.premine.address().clone(),
            recipient.address().clone(),
            Amount::from_coins(80),
            current_timestamp_millis(),
            2,
        );
        second.sign_with(f.premine.signing_key()).unwrap();
        let mut task = f.ledger.mining_task(miner.address()).unwrap();
        task.transactions.push(second);
        let overspend = solve(&task, &CancellationToken::new()).unwrap();
        assert_matches!(f.ledger.append(overspend.clone()), Err(Error::InsufficientBalance { .. }));

        let mut chain = f.ledger.blocks();
        chain.push(overspend);
        let store = Arc::new(MemoryStore::with_chain(chain));
        assert_matches!(
            Ledger::open(params(&f.premine), store).err(),
            Some(Error::PersistenceFailure { .. })
        );
    }

    #[test]
    fn test_lookups() {
        let f = fixture();
        let miner = Wallet::generate();
        let block = mine(&f.ledger, miner.address());
        let reward_id = block.transactions[0].id();
        f.ledger.append(block.clone()).unwrap();

        assert_eq!(f.ledger.block_by_index(1), Some(block.clone()));
        assert_eq!(f.ledger.block_by_hash(&block.hash), Some(block));
        assert!(f.ledger.block_by_index(9).is_none());

        let record = f.ledger.transaction(&reward_id).unwrap();
        assert_eq!(record.block_index, Some(1));

        let history = f.ledger.history(miner.address());
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].block_index, Some(1));

        let stats = f.ledger.stats();
        assert_eq!(stats.height, 1);
        assert_eq!(stats.minted_supply, Amount::from_coins(110));
    }
}
