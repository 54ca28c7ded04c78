//! Transfers, their canonical encoding and signatures
//!
//! A transaction's signed payload is its canonical byte encoding without the
//! signature. `SYSTEM` transactions (premine and block rewards) carry no
//! signature and always verify.

use crate::crypto::{address_of, sign_message, verify_message, verifying_key_of, blake2s};
use crate::{Address, Amount, Error, Hash256, Result};
use byteorder::{ByteOrder, LittleEndian};
use ed25519_dalek::{SigningKey, VerifyingKey};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Append-only little-endian encoder for hashed and signed payloads
#[derive(Debug, Default)]
pub(crate) struct CanonicalWriter {
    buf: Vec<u8>,
}

impl CanonicalWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn put_u16(&mut self, value: u16) {
        let mut word = [0u8; 2];
        LittleEndian::write_u16(&mut word, value);
        self.buf.extend_from_slice(&word);
    }

    pub(crate) fn put_u32(&mut self, value: u32) {
        let mut word = [0u8; 4];
        LittleEndian::write_u32(&mut word, value);
        self.buf.extend_from_slice(&word);
    }

    pub(crate) fn put_u64(&mut self, value: u64) {
        let mut word = [0u8; 8];
        LittleEndian::write_u64(&mut word, value);
        self.buf.extend_from_slice(&word);
    }

    pub(crate) fn put_i64(&mut self, value: i64) {
        let mut word = [0u8; 8];
        LittleEndian::write_i64(&mut word, value);
        self.buf.extend_from_slice(&word);
    }

    pub(crate) fn put_bytes(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Length-prefixed (u16) UTF-8 string
    pub(crate) fn put_str(&mut self, value: &str) {
        self.put_u16(value.len() as u16);
        self.buf.extend_from_slice(value.as_bytes());
    }

    pub(crate) fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

/// Detached Ed25519 signature, hex encoded on the wire
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct TxSignature([u8; 64]);

impl TxSignature {
    pub fn from_bytes(bytes: [u8; 64]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 64] {
        &self.0
    }
}

impl fmt::Debug for TxSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxSignature({})", hex::encode(self.0))
    }
}

impl Serialize for TxSignature {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for TxSignature {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let mut bytes = [0u8; 64];
        hex::decode_to_slice(&s, &mut bytes).map_err(de::Error::custom)?;
        Ok(Self(bytes))
    }
}

/// A value transfer between two accounts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    pub from: Address,
    pub to: Address,
    pub amount: Amount,
    /// Creation time, milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Per-sender sequence number; zero for `SYSTEM`
    #[serde(default)]
    pub nonce: u64,
    /// Uniqueness salt for reward transactions
    #[serde(default)]
    pub salt: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<TxSignature>,
}

impl Transaction {
    /// Unsigned transfer
    pub fn transfer(from: Address, to: Address, amount: Amount, timestamp: i64, nonce: u64) -> Self {
        Self {
            from,
            to,
            amount,
            timestamp,
            nonce,
            salt: 0,
            signature: None,
        }
    }

    /// Block reward with a fresh random salt
    pub fn reward(to: Address, amount: Amount, timestamp: i64) -> Self {
        Self {
            from: Address::system(),
            to,
            amount,
            timestamp,
            nonce: 0,
            salt: rand::random(),
            signature: None,
        }
    }

    /// Genesis allocation
    pub fn premine(to: Address, amount: Amount, timestamp: i64) -> Self {
        Self {
            from: Address::system(),
            to,
            amount,
            timestamp,
            nonce: 0,
            salt: 0,
            signature: None,
        }
    }

    /// Whether this is a minting transaction
    pub fn is_system(&self) -> bool {
        self.from.is_system()
    }

    /// Bytes covered by the signature
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut writer = CanonicalWriter::new();
        self.write_fields(&mut writer);
        writer.into_bytes()
    }

    fn write_fields(&self, writer: &mut CanonicalWriter) {
        writer.put_str(self.from.as_str());
        writer.put_str(self.to.as_str());
        writer.put_u64(self.amount.units());
        writer.put_i64(self.timestamp);
        writer.put_u64(self.nonce);
        writer.put_u64(self.salt);
    }

    /// Full encoding, signature included, as fed into the block hash
    pub(crate) fn write_canonical(&self, writer: &mut CanonicalWriter) {
        self.write_fields(writer);
        match &self.signature {
            Some(signature) => {
                writer.put_bytes(&[1]);
                writer.put_bytes(signature.as_bytes());
            }
            None => writer.put_bytes(&[0]),
        }
    }

    /// Transaction id: digest of the full canonical encoding
    pub fn id(&self) -> Hash256 {
        let mut writer = CanonicalWriter::new();
        self.write_canonical(&mut writer);
        blake2s(&writer.into_bytes())
    }

    /// Sign in place; the key must belong to `from`
    pub fn sign_with(&mut self, signing_key: &SigningKey) -> Result<()> {
        let signer = address_of(&signing_key.verifying_key());
        if signer != self.from {
            return Err(Error::invalid_signature(format!(
                "Key for {} cannot sign for {}",
                signer, self.from
            )));
        }
        self.signature = Some(sign(signing_key, self));
        Ok(())
    }

    /// Verify against the key encoded in `from`; `SYSTEM` always verifies
    pub fn verify_signature(&self) -> Result<()> {
        if self.is_system() {
            return Ok(());
        }
        let signature = self
            .signature
            .as_ref()
            .ok_or_else(|| Error::invalid_signature(format!("Transfer from {} is unsigned", self.from)))?;
        let key = verifying_key_of(&self.from)?;
        if verify(&key, self, signature) {
            Ok(())
        } else {
            Err(Error::invalid_signature(format!(
                "Signature does not match sender {}",
                self.from
            )))
        }
    }

    /// Structural checks that need no chain state
    pub fn check_shape(&self) -> Result<()> {
        if self.to.is_system() {
            return Err(Error::invalid_transaction("SYSTEM cannot receive transfers"));
        }
        if !self.is_system() && self.amount.is_zero() {
            return Err(Error::invalid_amount("Transfer amount must be positive"));
        }
        if !self.is_system() && self.from == self.to {
            return Err(Error::invalid_transaction("Sender and recipient are the same"));
        }
        Ok(())
    }
}

/// Signature over the transaction's canonical fields
pub fn sign(signing_key: &SigningKey, tx: &Transaction) -> TxSignature {
    TxSignature(sign_message(signing_key, &tx.signing_payload()))
}

/// Check a signature over the transaction's canonical fields
pub fn verify(verifying_key: &VerifyingKey, tx: &Transaction, signature: &TxSignature) -> bool {
    if tx.is_system() {
        return true;
    }
    verify_message(verifying_key, &tx.signing_payload(), signature.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_keypair;

    fn signed_transfer(amount: u64) -> (SigningKey, Transaction) {
        let (secret, public) = generate_keypair();
        let (_, recipient) = generate_keypair();
        let mut tx = Transaction::transfer(
            address_of(&public),
            address_of(&recipient),
            Amount::from_coins(amount),
            1_700_000_000_123,
            1,
        );
        tx.sign_with(&secret).unwrap();
        (secret, tx)
    }

    #[test]
    fn test_sign_and_verify() {
        let (_, tx) = signed_transfer(5);
        assert!(tx.verify_signature().is_ok());
    }

    #[test]
    fn test_tampered_amount_fails() {
        let (_, mut tx) = signed_transfer(5);
        tx.amount = Amount::from_coins(500);
        assert!(matches!(tx.verify_signature(), Err(Error::InvalidSignature { .. })));
    }

    #[test]
    fn test_tampered_nonce_fails() {
        let (_, mut tx) = signed_transfer(5);
        tx.nonce = 2;
        assert!(tx.verify_signature().is_err());
    }

    #[test]
    fn test_unsigned_transfer_fails() {
        let (_, mut tx) = signed_transfer(5);
        tx.signature = None;
        assert!(tx.verify_signature().is_err());
    }

    #[test]
    fn test_wrong_key_cannot_sign() {
        let (_, mut tx) = signed_transfer(5);
        let (other, _) = generate_keypair();
        assert!(tx.sign_with(&other).is_err());
    }

    #[test]
    fn test_system_always_verifies() {
        let (_, miner) = generate_keypair();
        let reward = Transaction::reward(address_of(&miner), Amount::from_coins(10), 0);
        assert!(reward.verify_signature().is_ok());

        // Even a garbage signature is ignored for SYSTEM
        let (_, public) = generate_keypair();
        let garbage = TxSignature::from_bytes([7u8; 64]);
        assert!(verify(&public, &reward, &garbage));
    }

    #[test]
    fn test_reward_salts_differ() {
        let (_, miner) = generate_keypair();
        let a = Transaction::reward(address_of(&miner), Amount::from_coins(10), 0);
        let b = Transaction::reward(address_of(&miner), Amount::from_coins(10), 0);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_signature_excluded_from_payload_but_not_id() {
        let (_, tx) = signed_transfer(5);
        let mut unsigned = tx.clone();
        unsigned.signature = None;
        assert_eq!(tx.signing_payload(), unsigned.signing_payload());
        assert_ne!(tx.id(), unsigned.id());
    }

    #[test]
    fn test_check_shape() {
        let (_, tx) = signed_transfer(5);
        assert!(tx.check_shape().is_ok());

        let mut zero = tx.clone();
        zero.amount = Amount::ZERO;
        assert!(matches!(zero.check_shape(), Err(Error::InvalidAmount { .. })));

        let mut to_system = tx.clone();
        to_system.to = Address::system();
        assert!(matches!(to_system.check_shape(), Err(Error::InvalidTransaction { .. })));
    }

    #[test]
    fn test_json_shape() {
        let (_, tx) = signed_transfer(5);
        let json = serde_json::to_value(&tx).unwrap();
        assert_eq!(json["amount"], "5");
        assert!(json["signature"].is_string());

        let parsed: Transaction = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, tx);
    }
}
