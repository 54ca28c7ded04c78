//! Error handling for the ledger
//!
//! One error type covers validation rejections, storage failures and the
//! infrastructure around them (HTTP, configuration, workers).

use crate::types::{Address, Amount, Difficulty, Hash256};
use thiserror::Error;

/// Result type alias for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the ledger
#[derive(Error, Debug)]
pub enum Error {
    /// Stored hash does not match the recomputed digest
    #[error("Hash mismatch: block claims {claimed}, recomputed {computed}")]
    HashMismatch { claimed: Hash256, computed: Hash256 },

    /// Hash does not satisfy the active difficulty target
    #[error("Insufficient work: {hash} does not satisfy difficulty {difficulty}")]
    InsufficientWork { hash: Hash256, difficulty: Difficulty },

    /// Block does not extend the current head
    #[error("Link broken: {message}")]
    LinkBroken { message: String },

    /// Block timestamp precedes its parent or runs ahead of the clock
    #[error("Invalid timestamp: {message}")]
    InvalidTimestamp { message: String },

    /// A block with this hash is already committed
    #[error("Duplicate hash: {hash} is already committed")]
    DuplicateHash { hash: Hash256 },

    /// Missing or invalid transaction signature
    #[error("Invalid signature: {message}")]
    InvalidSignature { message: String },

    /// Sender cannot cover the transfer
    #[error("Insufficient balance: {address} has {available}, needs {required}")]
    InsufficientBalance {
        address: Address,
        available: Amount,
        required: Amount,
    },

    /// Non-positive or malformed amount
    #[error("Invalid amount: {message}")]
    InvalidAmount { message: String },

    /// Account nonce out of sequence (replayed or skipped)
    #[error("Invalid nonce for {address}: expected {expected}, got {actual}")]
    InvalidNonce {
        address: Address,
        expected: u64,
        actual: u64,
    },

    /// Reward transaction missing, duplicated or wrongly sized
    #[error("Invalid reward: {message}")]
    InvalidReward { message: String },

    /// Minting would exceed the total supply cap
    #[error("Supply exceeded: minted {minted} + {reward} is above cap {cap}")]
    SupplyExceeded {
        minted: Amount,
        reward: Amount,
        cap: Amount,
    },

    /// Transaction shape is not acceptable (e.g. transfer to SYSTEM)
    #[error("Invalid transaction: {message}")]
    InvalidTransaction { message: String },

    /// Chain could not be written to or read from the store
    #[error("Persistence failure: {message}")]
    PersistenceFailure { message: String },

    /// Rejection reported by a remote node
    #[error("Rejected by node ({code}): {reason}")]
    Rejected { code: String, reason: String },

    /// HTTP request errors
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML configuration parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Worker errors
    #[error("Worker error: worker {worker_id}: {message}")]
    Worker { worker_id: usize, message: String },

    /// Crypto errors
    #[error("Cryptographic error: {message}")]
    Crypto { message: String },

    /// Network errors
    #[error("Network error: {message}")]
    Network { message: String },

    /// Lookup misses
    #[error("Not found: {what}")]
    NotFound { what: String },

    /// Invalid state errors
    #[error("Invalid state: {message}")]
    InvalidState { message: String },
}

impl Error {
    /// Create a link broken error
    pub fn link_broken(message: impl Into<String>) -> Self {
        Self::LinkBroken {
            message: message.into(),
        }
    }

    /// Create an invalid signature error
    pub fn invalid_signature(message: impl Into<String>) -> Self {
        Self::InvalidSignature {
            message: message.into(),
        }
    }

    /// Create an invalid amount error
    pub fn invalid_amount(message: impl Into<String>) -> Self {
        Self::InvalidAmount {
            message: message.into(),
        }
    }

    /// Create an invalid reward error
    pub fn invalid_reward(message: impl Into<String>) -> Self {
        Self::InvalidReward {
            message: message.into(),
        }
    }

    /// Create an invalid transaction error
    pub fn invalid_transaction(message: impl Into<String>) -> Self {
        Self::InvalidTransaction {
            message: message.into(),
        }
    }

    /// Create an invalid timestamp error
    pub fn invalid_timestamp(message: impl Into<String>) -> Self {
        Self::InvalidTimestamp {
            message: message.into(),
        }
    }

    /// Create a persistence failure
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::PersistenceFailure {
            message: message.into(),
        }
    }

    /// Create a remote rejection
    pub fn rejected(code: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            code: code.into(),
            reason: reason.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Create a worker error
    pub fn worker(worker_id: usize, message: impl Into<String>) -> Self {
        Self::Worker {
            worker_id,
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Create an invalid state error
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState {
            message: message.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Http(e) => {
                if let Some(status) = e.status() {
                    status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS
                } else {
                    e.is_timeout() || e.is_connect() || e.is_request()
                }
            }
            Error::Network { .. } => true,
            Error::Io(_) => true,
            Error::PersistenceFailure { .. } => true,
            Error::Rejected { code, .. } => code == "persistence_failure",
            _ => false,
        }
    }

    /// True for the local, non-fatal rejections returned by block and
    /// transaction validation
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Error::HashMismatch { .. }
                | Error::InsufficientWork { .. }
                | Error::LinkBroken { .. }
                | Error::InvalidTimestamp { .. }
                | Error::DuplicateHash { .. }
                | Error::InvalidSignature { .. }
                | Error::InsufficientBalance { .. }
                | Error::InvalidAmount { .. }
                | Error::InvalidNonce { .. }
                | Error::InvalidReward { .. }
                | Error::SupplyExceeded { .. }
                | Error::InvalidTransaction { .. }
                | Error::Rejected { .. }
        )
    }

    /// True when a solved block lost the race against another append
    pub fn is_stale(&self) -> bool {
        match self {
            Error::DuplicateHash { .. } | Error::LinkBroken { .. } => true,
            Error::Rejected { code, .. } => code == "duplicate_hash" || code == "link_broken",
            _ => false,
        }
    }

    /// True when the store could not be written
    pub fn is_persistence_failure(&self) -> bool {
        match self {
            Error::PersistenceFailure { .. } => true,
            Error::Rejected { code, .. } => code == "persistence_failure",
            _ => false,
        }
    }

    /// Get error category for logging and wire responses
    pub fn category(&self) -> &'static str {
        match self {
            Error::HashMismatch { .. } => "hash_mismatch",
            Error::InsufficientWork { .. } => "insufficient_work",
            Error::LinkBroken { .. } => "link_broken",
            Error::InvalidTimestamp { .. } => "invalid_timestamp",
            Error::DuplicateHash { .. } => "duplicate_hash",
            Error::InvalidSignature { .. } => "invalid_signature",
            Error::InsufficientBalance { .. } => "insufficient_balance",
            Error::InvalidAmount { .. } => "invalid_amount",
            Error::InvalidNonce { .. } => "invalid_nonce",
            Error::InvalidReward { .. } => "invalid_reward",
            Error::SupplyExceeded { .. } => "supply_exceeded",
            Error::InvalidTransaction { .. } => "invalid_transaction",
            Error::PersistenceFailure { .. } => "persistence_failure",
            Error::Rejected { .. } => "rejected",
            Error::Http(_) => "http",
            Error::Json(_) => "json",
            Error::Yaml(_) => "yaml",
            Error::Io(_) => "io",
            Error::Config { .. } => "config",
            Error::Worker { .. } => "worker",
            Error::Crypto { .. } => "crypto",
            Error::Network { .. } => "network",
            Error::NotFound { .. } => "not_found",
            Error::InvalidState { .. } => "invalid_state",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::link_broken("expected index 3, got 5");
        assert_eq!(err.to_string(), "Link broken: expected index 3, got 5");

        let err = Error::DuplicateHash {
            hash: Hash256::zero(),
        };
        assert!(err.to_string().starts_with("Duplicate hash: 0000"));
    }

    #[test]
    fn test_stale_classification() {
        assert!(Error::link_broken("head moved").is_stale());
        assert!(Error::DuplicateHash { hash: Hash256::zero() }.is_stale());
        assert!(Error::rejected("link_broken", "head moved").is_stale());
        assert!(!Error::invalid_signature("bad").is_stale());
        assert!(!Error::persistence("disk full").is_stale());
    }

    #[test]
    fn test_persistence_classification() {
        let err = Error::persistence("disk full");
        assert!(err.is_persistence_failure());
        assert!(err.is_retryable());
        assert!(!err.is_rejection());

        let remote = Error::rejected("persistence_failure", "disk full");
        assert!(remote.is_persistence_failure());
        assert!(remote.is_retryable());
    }

    #[test]
    fn test_category() {
        assert_eq!(Error::invalid_amount("zero").category(), "invalid_amount");
        assert_eq!(Error::config("bad").category(), "config");
        assert_eq!(Error::not_found("block 9").category(), "not_found");
        assert_eq!(Error::invalid_timestamp("ahead").category(), "invalid_timestamp");
        assert!(Error::invalid_reward("missing").is_rejection());
    }
}
