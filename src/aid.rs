//! Application identifiers.
//!
//! An AID names an installed applet: a 5-byte registered application
//! provider identifier (RID) followed by up to 11 bytes of proprietary
//! extension (PIX).

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Minimum AID length in bytes (RID only).
pub const AID_MIN_LEN: usize = 5;

/// Maximum AID length in bytes.
pub const AID_MAX_LEN: usize = 16;

/// Length of the RID prefix.
pub const RID_LEN: usize = 5;

/// Errors raised while building an AID.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AidError {
    #[error("AID length {0} outside 5..=16")]
    InvalidLength(usize),

    #[error("AID slice {offset}+{len} exceeds source of {available} bytes")]
    OutOfBounds {
        offset: usize,
        len: usize,
        available: usize,
    },

    #[error("invalid hex in AID: {0}")]
    InvalidHex(String),
}

/// An application identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Aid(Vec<u8>);

impl Aid {
    /// Build an AID from its raw bytes.
    pub fn new(bytes: &[u8]) -> Result<Self, AidError> {
        if !(AID_MIN_LEN..=AID_MAX_LEN).contains(&bytes.len()) {
            return Err(AidError::InvalidLength(bytes.len()));
        }
        Ok(Aid(bytes.to_vec()))
    }

    /// Build an AID from `len` bytes of `bytes` starting at `offset`.
    pub fn from_slice(bytes: &[u8], offset: usize, len: usize) -> Result<Self, AidError> {
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= bytes.len())
            .ok_or(AidError::OutOfBounds {
                offset,
                len,
                available: bytes.len(),
            })?;
        Self::new(&bytes[offset..end])
    }

    /// The raw AID bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; an AID has at least [`AID_MIN_LEN`] bytes.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The registered application provider identifier.
    pub fn rid(&self) -> &[u8] {
        &self.0[..RID_LEN]
    }

    /// The proprietary extension (may be empty).
    pub fn pix(&self) -> &[u8] {
        &self.0[RID_LEN..]
    }

    /// True if `prefix` selects this AID by partial name.
    ///
    /// The prefix must itself be a plausible AID fragment (at least a RID).
    pub fn partial_matches(&self, prefix: &[u8]) -> bool {
        prefix.len() >= AID_MIN_LEN && self.0.starts_with(prefix)
    }
}

impl fmt::Display for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode_upper(&self.0))
    }
}

impl fmt::Debug for Aid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aid({})", self)
    }
}

impl FromStr for Aid {
    type Err = AidError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s.trim()).map_err(|e| AidError::InvalidHex(e.to_string()))?;
        Aid::new(&bytes)
    }
}

impl AsRef<[u8]> for Aid {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        let aid: Aid = "F000000001".parse().unwrap();
        assert_eq!(aid.as_bytes(), &[0xF0, 0x00, 0x00, 0x00, 0x01]);
        assert_eq!(aid.to_string(), "F000000001");
        assert!(aid.pix().is_empty());
    }

    #[test]
    fn test_length_bounds() {
        assert_eq!(Aid::new(&[1, 2, 3, 4]), Err(AidError::InvalidLength(4)));
        assert!(Aid::new(&[0u8; 16]).is_ok());
        assert_eq!(Aid::new(&[0u8; 17]), Err(AidError::InvalidLength(17)));
    }

    #[test]
    fn test_from_slice() {
        let raw = [0xAA, 0xA0, 0x00, 0x00, 0x00, 0x62, 0x03, 0xBB];
        let aid = Aid::from_slice(&raw, 1, 6).unwrap();
        assert_eq!(aid.rid(), &[0xA0, 0x00, 0x00, 0x00, 0x62]);
        assert_eq!(aid.pix(), &[0x03]);

        assert!(matches!(
            Aid::from_slice(&raw, 4, 6),
            Err(AidError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_partial_match() {
        let aid: Aid = "A0000000620301".parse().unwrap();
        assert!(aid.partial_matches(&[0xA0, 0x00, 0x00, 0x00, 0x62]));
        assert!(!aid.partial_matches(&[0xA0, 0x00]));
        assert!(!aid.partial_matches(&[0xA0, 0x00, 0x00, 0x00, 0x63]));
    }

    #[test]
    fn test_bad_hex() {
        assert!(matches!("F00Z000001".parse::<Aid>(), Err(AidError::InvalidHex(_))));
    }
}
