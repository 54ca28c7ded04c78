//! Cryptographic primitives
//!
//! Blake2s-256 hashing (with a reusable prefix state for nonce search) and
//! Ed25519 key handling.

use crate::{Address, Error, Hash256, Result};
use blake2::{Blake2s256, Digest};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

/// One-shot Blake2s-256 digest
pub fn blake2s(data: &[u8]) -> Hash256 {
    Hash256::from_bytes(Blake2s256::digest(data).into())
}

/// Hasher state with the fixed block prefix already absorbed
///
/// Each attempt clones the state and feeds only the nonce, so the prefix
/// bytes are hashed once per job instead of once per nonce.
#[derive(Clone)]
pub struct PrefixHasher {
    state: Blake2s256,
}

impl std::fmt::Debug for PrefixHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrefixHasher").finish_non_exhaustive()
    }
}

impl PrefixHasher {
    /// Absorb the fixed prefix
    pub fn new(prefix: &[u8]) -> Self {
        let mut state = Blake2s256::new();
        state.update(prefix);
        Self { state }
    }

    /// Digest of `prefix ∥ nonce(u64 LE)`
    pub fn hash_nonce(&self, nonce: u64) -> Hash256 {
        let mut state = self.state.clone();
        state.update(nonce.to_le_bytes());
        Hash256::from_bytes(state.finalize().into())
    }
}

/// Generate a new Ed25519 key pair
pub fn generate_keypair() -> (SigningKey, VerifyingKey) {
    let seed: [u8; 32] = rand::random();
    let signing_key = SigningKey::from_bytes(&seed);
    let verifying_key = signing_key.verifying_key();
    (signing_key, verifying_key)
}

/// Address derived from a verifying key
pub fn address_of(verifying_key: &VerifyingKey) -> Address {
    Address::from_key_bytes(verifying_key.as_bytes())
}

/// Parse a hex-encoded 32-byte secret key
pub fn signing_key_from_hex(secret: &str) -> Result<SigningKey> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(secret.trim(), &mut bytes)
        .map_err(|e| Error::crypto(format!("Invalid secret key hex: {}", e)))?;
    Ok(SigningKey::from_bytes(&bytes))
}

/// Recover the verifying key an address encodes
pub fn verifying_key_of(address: &Address) -> Result<VerifyingKey> {
    if address.is_system() {
        return Err(Error::invalid_signature("SYSTEM has no public key"));
    }
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(address.as_str(), &mut bytes)
        .map_err(|e| Error::invalid_signature(format!("Address is not a public key: {}", e)))?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|e| Error::invalid_signature(format!("Address is not a valid Ed25519 key: {}", e)))
}

/// Sign a message
pub fn sign_message(signing_key: &SigningKey, message: &[u8]) -> [u8; 64] {
    signing_key.sign(message).to_bytes()
}

/// Verify a detached signature
pub fn verify_message(verifying_key: &VerifyingKey, message: &[u8], signature: &[u8; 64]) -> bool {
    let signature = Signature::from_bytes(signature);
    verifying_key.verify(message, &signature).is_ok()
}
