//! Content identifiers
//!
//! A CID is the SHA-256 digest of the content bytes. Identical bytes always
//! produce the identical CID, which is what lets the content store share one
//! entry between every slice version that carries the same payload.

use std::fmt;
use std::str::FromStr;

use alloy_primitives::B256;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{SliceError, SliceResult};

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(B256);

impl Cid {
    /// Compute the CID of `bytes`.
    pub fn of(bytes: &[u8]) -> Self {
        Cid(B256::from_slice(Sha256::digest(bytes).as_slice()))
    }

    /// Wrap a raw digest without hashing.
    pub const fn from_digest(digest: B256) -> Self {
        Cid(digest)
    }

    pub fn digest(&self) -> &B256 {
        &self.0
    }

    /// True when this CID is the digest of `bytes`.
    pub fn matches(&self, bytes: &[u8]) -> bool {
        Cid::of(bytes) == *self
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cid({})", self.0)
    }
}

impl FromStr for Cid {
    type Err = SliceError;

    fn from_str(s: &str) -> SliceResult<Self> {
        B256::from_str(s)
            .map(Cid::from_digest)
            .map_err(|e| SliceError::invalid(format!("malformed cid `{}`: {}", s, e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cid_deterministic() {
        assert_eq!(Cid::of(b"hero"), Cid::of(b"hero"));
        assert_ne!(Cid::of(b"hero"), Cid::of(b"villain"));
    }

    #[test]
    fn test_empty_payload_has_cid() {
        // SHA-256 of the empty string
        let expected: Cid = "0xe3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
            .parse()
            .unwrap();
        assert_eq!(Cid::of(b""), expected);
    }

    #[test]
    fn test_display_parse_cycle() {
        let cid = Cid::of(b"party");
        let text = cid.to_string();
        assert!(text.starts_with("0x"));
        assert_eq!(text.len(), 66);
        assert_eq!(text.parse::<Cid>().unwrap(), cid);
    }

    #[test]
    fn test_matches() {
        let cid = Cid::of(b"abc");
        assert!(cid.matches(b"abc"));
        assert!(!cid.matches(b"abd"));
    }

    #[test]
    fn test_malformed_cid_rejected() {
        assert!("0x1234".parse::<Cid>().is_err());
    }
}
