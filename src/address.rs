//! 20-byte account addresses.

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

/// EVM account or contract address, displayed as lowercase `0x` hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address(pub [u8; 20]);

impl Address {
    /// The zero address.
    pub const ZERO: Address = Address([0u8; 20]);

    /// Parses a `0x`-prefixed 40 hex digit string; case is ignored.
    pub fn parse(value: &str) -> Result<Self, String> {
        let trimmed = value.trim();
        let raw = trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
            .ok_or_else(|| format!("address must start with 0x: {trimmed}"))?;
        if raw.len() != 40 {
            return Err(format!("address must be 20 bytes: {trimmed}"));
        }
        let bytes = hex::decode(raw).map_err(|err| format!("invalid address {trimmed}: {err}"))?;
        let mut out = [0u8; 20];
        out.copy_from_slice(&bytes);
        Ok(Self(out))
    }

    /// Left-aligns the address into the last 20 bytes of an ABI word.
    pub fn to_word(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out[12..].copy_from_slice(&self.0);
        out
    }

    /// Reads an address from an ABI word, rejecting dirty high bytes.
    pub fn from_word(word: &[u8]) -> Result<Self, String> {
        if word.len() != 32 {
            return Err(format!("address word must be 32 bytes, got {}", word.len()));
        }
        if word[..12].iter().any(|b| *b != 0) {
            return Err("address word has non-zero padding".to_string());
        }
        let mut out = [0u8; 20];
        out.copy_from_slice(&word[12..]);
        Ok(Self(out))
    }

    /// Whether this is the zero address.
    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        Address::parse(&text).map_err(de::Error::custom)
    }
}
