//! Structural chain validation
//!
//! Checks hash integrity, work and linkage. Economic rules (balances, nonces,
//! rewards) need chain state and live in the ledger.

use super::Block;
use crate::policy::DifficultyPolicy;
use crate::{Difficulty, Error, Result};

/// Validate `block` as the successor of `previous` under `difficulty`
pub fn validate_block(block: &Block, previous: &Block, difficulty: Difficulty) -> Result<()> {
    let computed = block.recompute_hash();
    if computed != block.hash {
        return Err(Error::HashMismatch {
            claimed: block.hash,
            computed,
        });
    }

    if !difficulty.target().is_met_by(&block.hash) {
        return Err(Error::InsufficientWork {
            hash: block.hash,
            difficulty,
        });
    }

    if block.previous_hash != previous.hash {
        return Err(Error::link_broken(format!(
            "block {} points at {}, head is {}",
            block.index, block.previous_hash, previous.hash
        )));
    }

    if block.index != previous.index + 1 {
        return Err(Error::link_broken(format!(
            "expected index {}, got {}",
            previous.index + 1,
            block.index
        )));
    }

    if block.timestamp < previous.timestamp {
        return Err(Error::invalid_timestamp(format!(
            "block {} at {} precedes its parent at {}",
            block.index, block.timestamp, previous.timestamp
        )));
    }

    Ok(())
}

/// Genesis is checked for position and integrity but not for work
pub fn validate_genesis(block: &Block) -> Result<()> {
    if block.index != 0 || !block.previous_hash.is_zero() {
        return Err(Error::link_broken("genesis must have index 0 and a zero previous hash"));
    }
    let computed = block.recompute_hash();
    if computed != block.hash {
        return Err(Error::HashMismatch {
            claimed: block.hash,
            computed,
        });
    }
    if block.transactions.iter().any(|tx| !tx.is_system()) {
        return Err(Error::invalid_transaction("genesis may only mint"));
    }
    Ok(())
}

/// Walk the chain once, replaying the difficulty policy so each block is
/// checked against the target active when it was accepted.
///
/// Returns the difficulty the next block must meet.
pub fn check_chain(chain: &[Block], policy: &DifficultyPolicy) -> Result<Difficulty> {
    let genesis = chain
        .first()
        .ok_or_else(|| Error::link_broken("chain is empty"))?;
    validate_genesis(genesis)?;

    let mut difficulty = policy.initial;
    for pair in chain.windows(2) {
        let (previous, block) = (&pair[0], &pair[1]);
        validate_block(block, previous, difficulty)?;
        for tx in &block.transactions {
            tx.check_shape()?;
            tx.verify_signature()?;
        }
        difficulty = policy.retarget(difficulty, previous.timestamp, block.timestamp);
    }
    Ok(difficulty)
}

/// Whether the chain passes [`check_chain`]
pub fn validate_chain(chain: &[Block], policy: &DifficultyPolicy) -> bool {
    check_chain(chain, policy).is_ok()
}
