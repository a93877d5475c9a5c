//! Event positions within a contract's stream.
//!
//! A [`Position`] is the total order key `(ledger, tx_hash, event_index)`.
//! It identifies one event uniquely within a contract's event stream.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Length of the sortable byte key produced by [`Position::to_key`].
pub const POSITION_KEY_LEN: usize = 4 + 32 + 4;

/// Contract address (Stellar strkey, e.g. `CA3D...`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContractId(String);

impl ContractId {
    /// Creates a contract id from its string address.
    #[must_use]
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ContractId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ContractId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// A 32-byte transaction hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxHash(#[serde(with = "hex::serde")] [u8; 32]);

impl TxHash {
    /// Creates a hash from raw bytes.
    #[must_use]
    pub const fn new(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Returns the raw bytes.
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl FromStr for TxHash {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Self(bytes))
    }
}

impl TryFrom<&[u8]> for TxHash {
    type Error = PositionKeyError;

    fn try_from(value: &[u8]) -> Result<Self, Self::Error> {
        let bytes: [u8; 32] = value
            .try_into()
            .map_err(|_| PositionKeyError::InvalidLength(value.len()))?;
        Ok(Self(bytes))
    }
}

/// Total order key of an event within a contract's stream.
///
/// Ordering is lexicographic over `(ledger, tx_hash, event_index)`, which is
/// the field declaration order used by the derived [`Ord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// Ledger sequence number.
    pub ledger: u32,
    /// Hash of the transaction that emitted the event.
    pub tx_hash: TxHash,
    /// Index of the event within the transaction.
    pub event_index: u32,
}

impl Position {
    /// Creates a new position.
    #[must_use]
    pub const fn new(ledger: u32, tx_hash: TxHash, event_index: u32) -> Self {
        Self {
            ledger,
            tx_hash,
            event_index,
        }
    }

    /// Encodes the position as a fixed-width big-endian key.
    ///
    /// Byte-wise comparison of two keys matches [`Ord`] on positions, so the
    /// key can be used directly as a sortable storage column.
    #[must_use]
    pub fn to_key(&self) -> [u8; POSITION_KEY_LEN] {
        let mut key = [0u8; POSITION_KEY_LEN];
        key[..4].copy_from_slice(&self.ledger.to_be_bytes());
        key[4..36].copy_from_slice(self.tx_hash.as_bytes());
        key[36..].copy_from_slice(&self.event_index.to_be_bytes());
        key
    }

    /// Decodes a key produced by [`Position::to_key`].
    ///
    /// # Errors
    ///
    /// Returns an error if the key does not have the expected length.
    pub fn from_key(key: &[u8]) -> Result<Self, PositionKeyError> {
        if key.len() != POSITION_KEY_LEN {
            return Err(PositionKeyError::InvalidLength(key.len()));
        }

        let (ledger, rest) = key.split_at(4);
        let (hash, index) = rest.split_at(32);

        let ledger: [u8; 4] = ledger
            .try_into()
            .map_err(|_| PositionKeyError::InvalidLength(key.len()))?;
        let index: [u8; 4] = index
            .try_into()
            .map_err(|_| PositionKeyError::InvalidLength(key.len()))?;

        Ok(Self {
            ledger: u32::from_be_bytes(ledger),
            tx_hash: TxHash::try_from(hash)?,
            event_index: u32::from_be_bytes(index),
        })
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.ledger, self.tx_hash, self.event_index)
    }
}

/// Errors decoding a stored position key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PositionKeyError {
    /// The byte slice has the wrong length.
    #[error("invalid position key length: {0}")]
    InvalidLength(usize),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hash(byte: u8) -> TxHash {
        TxHash::new([byte; 32])
    }

    #[test]
    fn test_position_ordering() {
        let a = Position::new(10, hash(9), 5);
        let b = Position::new(11, hash(0), 0);
        let c = Position::new(11, hash(1), 0);
        let d = Position::new(11, hash(1), 1);

        assert!(a < b);
        assert!(b < c);
        assert!(c < d);
    }

    #[test]
    fn test_position_key_preserves_order() {
        let positions = [
            Position::new(1, hash(0xff), u32::MAX),
            Position::new(2, hash(0), 0),
            Position::new(2, hash(0), 1),
            Position::new(256, hash(3), 0),
        ];

        for pair in positions.windows(2) {
            assert!(pair[0] < pair[1]);
            assert!(pair[0].to_key() < pair[1].to_key());
        }
    }

    #[test]
    fn test_position_key_decode() {
        let position = Position::new(77, hash(4), 3);
        let decoded = Position::from_key(&position.to_key()).expect("key");
        assert_eq!(decoded, position);

        assert_eq!(
            Position::from_key(&[0u8; 12]),
            Err(PositionKeyError::InvalidLength(12))
        );
    }

    #[test]
    fn test_tx_hash_hex() {
        let hash = hash(0xab);
        let text = hash.to_string();
        assert_eq!(text.len(), 64);
        assert!(text.starts_with("abab"));
        assert_eq!(text.parse::<TxHash>().expect("hex"), hash);
        assert!("zz".parse::<TxHash>().is_err());
    }

    #[test]
    fn test_position_serde() {
        let position = Position::new(5, hash(1), 2);
        let json = serde_json::to_value(position).expect("serialize");
        assert_eq!(json["ledger"], 5);
        assert_eq!(json["tx_hash"], "01".repeat(32));

        let back: Position = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, position);
    }
}
