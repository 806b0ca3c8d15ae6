use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// A stable SHA-256 fingerprint stored as a lowercase hex string.
///
/// Persisted artifacts embed the fingerprint of their payload so that silent
/// bit rot is detected on open instead of surfacing as garbage query results.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

/// Length of the hex encoding of a SHA-256 digest.
pub const FINGERPRINT_HEX_LEN: usize = 64;

impl Fingerprint {
    /// Compute the SHA-256 fingerprint of an arbitrary byte slice.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Reconstruct a fingerprint from its hex form, if well-formed.
    pub fn from_hex(hex_str: &str) -> Option<Self> {
        if hex_str.len() != FINGERPRINT_HEX_LEN
            || !hex_str.bytes().all(|b| b.is_ascii_hexdigit())
        {
            return None;
        }
        Some(Self(hex_str.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
