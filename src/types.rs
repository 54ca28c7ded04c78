//! Core types for the ledger
//!
//! Fundamental value types used throughout the crate with validation,
//! canonical text forms and JSON serialization.

use crate::{Error, Result};
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// 32-byte digest used for block hashes and transaction ids
///
/// Ordering is byte-lexicographic, which is the big-endian numeric order the
/// difficulty target comparison relies on.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Hash256([u8; 32]);

impl Hash256 {
    /// Hex length of a rendered digest
    pub const HEX_LEN: usize = 64;

    /// All-zero digest, used as the genesis previous hash
    pub const fn zero() -> Self {
        Self([0u8; 32])
    }

    /// Wrap raw digest bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex rendering
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Whether this is the genesis sentinel
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Count of leading zero hex digits
    pub fn leading_zero_digits(&self) -> u32 {
        let mut count = 0;
        for byte in self.0 {
            if byte == 0 {
                count += 2;
                continue;
            }
            if byte < 0x10 {
                count += 1;
            }
            break;
        }
        count
    }
}

impl FromStr for Hash256 {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        // "0" is the legacy spelling of the genesis sentinel
        if s == "0" {
            return Ok(Self::zero());
        }
        if s.len() != Self::HEX_LEN {
            return Err(Error::invalid_transaction(format!(
                "Invalid hash length: expected {} hex chars, got {}",
                Self::HEX_LEN,
                s.len()
            )));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| Error::invalid_transaction(format!("Invalid hex in hash: {}", e)))?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for Hash256 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash256({})", self.to_hex())
    }
}

impl Serialize for Hash256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Hash256::from_str(&s).map_err(de::Error::custom)
    }
}

/// Account identifier: hex-encoded Ed25519 verifying key, or `SYSTEM`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(String);

impl Address {
    /// Sender of premine and block rewards
    pub const SYSTEM: &'static str = "SYSTEM";

    /// The minting pseudo-account
    pub fn system() -> Self {
        Self(Self::SYSTEM.to_string())
    }

    /// Parse and normalize an address
    pub fn new(value: impl AsRef<str>) -> Result<Self> {
        let value = value.as_ref().trim();
        if value == Self::SYSTEM {
            return Ok(Self::system());
        }
        if value.len() != 64 {
            return Err(Error::invalid_transaction(format!(
                "Invalid address length: expected 64 hex chars, got {}",
                value.len()
            )));
        }
        if !value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(Error::invalid_transaction(
                "Address contains non-hexadecimal characters",
            ));
        }
        Ok(Self(value.to_ascii_lowercase()))
    }

    /// Build an address from raw verifying key bytes
    pub fn from_key_bytes(bytes: &[u8; 32]) -> Self {
        Self(hex::encode(bytes))
    }

    /// Whether this is the minting pseudo-account
    pub fn is_system(&self) -> bool {
        self.0 == Self::SYSTEM
    }

    /// Get the address as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Address {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Address {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Address::new(s).map_err(de::Error::custom)
    }
}

/// Fixed-point currency amount with eight decimal places
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(u64);

impl Amount {
    /// Number of decimal places
    pub const DECIMALS: u32 = 8;
    /// Base units per whole coin
    pub const UNIT: u64 = 100_000_000;
    /// Zero amount
    pub const ZERO: Amount = Amount(0);

    /// Create from base units
    pub const fn from_units(units: u64) -> Self {
        Self(units)
    }

    /// Create from whole coins, saturating on overflow
    pub const fn from_coins(coins: u64) -> Self {
        Self(coins.saturating_mul(Self::UNIT))
    }

    /// Raw base units
    pub const fn units(&self) -> u64 {
        self.0
    }

    /// Whether the amount is zero
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Checked addition
    pub fn checked_add(self, other: Amount) -> Option<Amount> {
        self.0.checked_add(other.0).map(Amount)
    }

    /// Checked subtraction
    pub fn checked_sub(self, other: Amount) -> Option<Amount> {
        self.0.checked_sub(other.0).map(Amount)
    }

    /// Saturating addition
    pub fn saturating_add(self, other: Amount) -> Amount {
        Amount(self.0.saturating_add(other.0))
    }

    /// Saturating subtraction
    pub fn saturating_sub(self, other: Amount) -> Amount {
        Amount(self.0.saturating_sub(other.0))
    }

    /// Halve `n` times, flooring at base-unit precision
    pub fn halved(self, n: u64) -> Amount {
        if n >= 64 {
            Amount::ZERO
        } else {
            Amount(self.0 >> n)
        }
    }

    /// Whole-coin floor of `self * ratio`
    pub fn whole_fraction(self, ratio: f64) -> Amount {
        let coins = (self.0 / Self::UNIT) as f64 * ratio;
        Amount::from_coins(coins.floor().max(0.0) as u64)
    }

    fn from_f64(value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::invalid_amount(format!("Amount must be non-negative, got {}", value)));
        }
        let units = (value * Self::UNIT as f64).round();
        if units > u64::MAX as f64 {
            return Err(Error::invalid_amount("Amount overflows"));
        }
        Ok(Self(units as u64))
    }
}

impl FromStr for Amount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(Error::invalid_amount("Empty amount"));
        }
        if s.starts_with('-') {
            return Err(Error::invalid_amount(format!("Amount must be non-negative, got {}", s)));
        }

        let (whole, frac) = match s.split_once('.') {
            Some((whole, frac)) => (whole, frac),
            None => (s, ""),
        };
        if frac.len() > Self::DECIMALS as usize {
            return Err(Error::invalid_amount(format!(
                "Amount supports at most {} decimal places: {}",
                Self::DECIMALS,
                s
            )));
        }
        let all_digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
        if (whole.is_empty() && frac.is_empty()) || !all_digits(whole) || !all_digits(frac) {
            return Err(Error::invalid_amount(format!("Invalid amount: {}", s)));
        }

        let whole: u64 = if whole.is_empty() {
            0
        } else {
            whole
                .parse()
                .map_err(|e| Error::invalid_amount(format!("Invalid amount {}: {}", s, e)))?
        };
        let mut frac_units: u64 = 0;
        for (i, digit) in frac.bytes().enumerate() {
            frac_units += u64::from(digit - b'0') * 10u64.pow(Self::DECIMALS - 1 - i as u32);
        }

        whole
            .checked_mul(Self::UNIT)
            .and_then(|w| w.checked_add(frac_units))
            .map(Amount)
            .ok_or_else(|| Error::invalid_amount(format!("Amount overflows: {}", s)))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.0 / Self::UNIT;
        let frac = self.0 % Self::UNIT;
        if frac == 0 {
            write!(f, "{}", whole)
        } else {
            let digits = format!("{:08}", frac);
            write!(f, "{}.{}", whole, digits.trim_end_matches('0'))
        }
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct AmountVisitor;

        impl<'de> Visitor<'de> for AmountVisitor {
            type Value = Amount;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a decimal string or a non-negative number")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> std::result::Result<Amount, E> {
                Amount::from_str(v).map_err(E::custom)
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> std::result::Result<Amount, E> {
                v.checked_mul(Amount::UNIT)
                    .map(Amount)
                    .ok_or_else(|| E::custom("amount overflows"))
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> std::result::Result<Amount, E> {
                let v = u64::try_from(v).map_err(|_| E::custom("amount must be non-negative"))?;
                self.visit_u64(v)
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> std::result::Result<Amount, E> {
                Amount::from_f64(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_any(AmountVisitor)
    }
}

/// Proof-of-work nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Nonce(pub u64);

impl Nonce {
    /// Create a new nonce
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Get the nonce value
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Required count of leading zero hex digits in a block hash
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Difficulty(u8);

impl Difficulty {
    /// Hardest expressible difficulty (every digit zero)
    pub const MAX: u8 = 64;

    /// Create a difficulty, rejecting values above 64 digits
    pub fn new(value: u8) -> Result<Self> {
        if value > Self::MAX {
            return Err(Error::config(format!(
                "Difficulty must be between 0 and {}, got {}",
                Self::MAX,
                value
            )));
        }
        Ok(Self(value))
    }

    /// Create a difficulty, capping at 64 digits
    pub const fn saturating(value: u8) -> Self {
        if value > Self::MAX {
            Self(Self::MAX)
        } else {
            Self(value)
        }
    }

    /// Get the digit count
    pub fn value(&self) -> u8 {
        self.0
    }

    /// Numeric threshold a hash must not exceed
    pub fn target(&self) -> Target {
        Target::from_difficulty(*self)
    }
}

impl TryFrom<u8> for Difficulty {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl From<Difficulty> for u8 {
    fn from(d: Difficulty) -> u8 {
        d.0
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 256-bit big-endian threshold; a hash meets it when `hash <= target`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Target([u8; 32]);

impl Target {
    /// Target for `d` leading zero hex digits: `2^(256 - 4d) - 1`
    pub fn from_difficulty(difficulty: Difficulty) -> Self {
        let digits = difficulty.value() as usize;
        let mut bytes = [0xFFu8; 32];
        for byte in bytes.iter_mut().take(digits / 2) {
            *byte = 0;
        }
        if digits % 2 == 1 {
            bytes[digits / 2] = 0x0F;
        }
        Self(bytes)
    }

    /// Maximum possible target (every hash qualifies)
    pub fn max() -> Self {
        Self([0xFF; 32])
    }

    /// Minimum possible target (only the zero hash qualifies)
    pub fn min() -> Self {
        Self([0; 32])
    }

    /// Raw threshold bytes (big-endian)
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Numeric comparison of a digest against the threshold
    pub fn is_met_by(&self, hash: &Hash256) -> bool {
        hash.as_bytes() <= &self.0
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

/// Hash rate in hashes per second
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HashRate(pub f64);

impl HashRate {
    /// Create new hash rate
    pub fn new(rate: f64) -> Self {
        Self(rate)
    }

    /// Get the rate value
    pub fn value(&self) -> f64 {
        self.0
    }
}

impl std::iter::Sum for HashRate {
    fn sum<I: Iterator<Item = HashRate>>(iter: I) -> Self {
        HashRate(iter.map(|r| r.0).sum())
    }
}

impl fmt::Display for HashRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&crate::utils::format_hash_rate(self.0))
    }
}
