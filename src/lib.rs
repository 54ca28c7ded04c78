//! Proof-of-Work Ledger
//!
//! A single-node proof-of-work ledger supporting:
//! - Hash-linked blocks with Blake2s-256 proof of work
//! - Ed25519-signed transfers with per-account replay protection
//! - Halving block rewards under a fixed supply cap
//! - A parallel CPU mining pool with cooperative cancellation
//! - Crash-safe JSON persistence with periodic snapshots
//! - A JSON HTTP API for remote miners and wallets

pub mod api;
pub mod chain;
pub mod client;
pub mod config;
pub mod crypto;
pub mod error;
pub mod ledger;
pub mod node;
pub mod policy;
pub mod pow;
pub mod transaction;
pub mod types;
pub mod utils;
pub mod wallet;
pub mod worker;

pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

/// Application information
pub const APP_NAME: &str = "powledger";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
pub const APP_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");
