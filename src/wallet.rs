//! Wallet key files
//!
//! A wallet is an Ed25519 signing key plus the address derived from it. The
//! ledger never stores wallets; they are loaded by whoever holds the key.

use crate::crypto::{address_of, generate_keypair, signing_key_from_hex};
use crate::{Address, Error, Result};
use ed25519_dalek::SigningKey;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Signing key and its address
#[derive(Clone)]
pub struct Wallet {
    signing_key: SigningKey,
    address: Address,
}

/// On-disk wallet representation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalletFile {
    pub address: Address,
    pub secret_key: String,
}

impl Wallet {
    /// Generate a fresh wallet
    pub fn generate() -> Self {
        let (signing_key, _) = generate_keypair();
        Self::from_signing_key(signing_key)
    }

    /// Wrap an existing signing key
    pub fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = address_of(&signing_key.verifying_key());
        Self {
            signing_key,
            address,
        }
    }

    /// Restore from a hex-encoded secret key
    pub fn from_secret_hex(secret: &str) -> Result<Self> {
        Ok(Self::from_signing_key(signing_key_from_hex(secret)?))
    }

    /// The wallet's address
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// The wallet's signing key
    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    /// Hex-encoded secret key
    pub fn secret_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }

    /// Serializable form
    pub fn to_file(&self) -> WalletFile {
        WalletFile {
            address: self.address.clone(),
            secret_key: self.secret_hex(),
        }
    }

    /// Write the wallet as JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.to_file())?;
        std::fs::write(path, json)?;
        info!(address = %self.address, path = %path.display(), "Saved wallet");
        Ok(())
    }

    /// Read a wallet written by [`Wallet::save`]
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let file: WalletFile = serde_json::from_str(&content)?;
        let wallet = Self::from_secret_hex(&file.secret_key)?;
        if wallet.address != file.address {
            return Err(Error::crypto(format!(
                "Wallet file {} address does not match its key",
                path.display()
            )));
        }
        Ok(wallet)
    }
}

impl std::fmt::Debug for Wallet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wallet")
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_wallet_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.json");

        let wallet = Wallet::generate();
        wallet.save(&path).unwrap();

        let loaded = Wallet::load(&path).unwrap();
        assert_eq!(loaded.address(), wallet.address());
        assert_eq!(loaded.secret_hex(), wallet.secret_hex());
    }

    #[test]
    fn test_wallet_file_mismatch_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("wallet.json");

        let mut file = Wallet::generate().to_file();
        file.address = Wallet::generate().address().clone();
        std::fs::write(&path, serde_json::to_string(&file).unwrap()).unwrap();

        assert!(matches!(Wallet::load(&path), Err(Error::Crypto { .. })));
    }

    #[test]
    fn test_debug_hides_secret() {
        let wallet = Wallet::generate();
        let debug = format!("{:?}", wallet);
        assert!(!debug.contains(&wallet.secret_hex()));
    }
}
