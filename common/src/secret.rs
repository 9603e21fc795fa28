//! Shared inter-service secret (§6 "Environment configuration"): a 32-byte hex value
//! both services load from `GATEWAY_SHARED_SECRET` and use to authenticate the
//! payment→upload and upload→payment inter-service API (§2, §4.2).

use std::fmt;

use subtle::ConstantTimeEq;
use thiserror::Error;

pub const SHARED_SECRET_SIZE: usize = 32;

#[derive(Clone)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

#[derive(Debug, Error)]
pub enum SharedSecretError {
    #[error("shared secret must be {SHARED_SECRET_SIZE} bytes of hex, got {0} bytes")]
    WrongLength(usize),
    #[error("shared secret is not valid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}

impl SharedSecret {
    pub fn from_hex(s: &str) -> Result<Self, SharedSecretError> {
        let bytes = hex::decode(s.trim())?;
        let len = bytes.len();
        let arr: [u8; SHARED_SECRET_SIZE] = bytes
            .try_into()
            .map_err(|_| SharedSecretError::WrongLength(len))?;
        Ok(Self(arr))
    }

    /// Constant-time comparison against a header value, so a timing side channel on
    /// the inter-service secret can't be used to brute-force it byte by byte.
    pub fn matches_header(&self, header_value: &str) -> bool {
        match hex::decode(header_value.trim()) {
            Ok(bytes) if bytes.len() == SHARED_SECRET_SIZE => bool::from(bytes.ct_eq(&self.0)),
            _ => false,
        }
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret(***)")
    }
}

/// Header carrying the shared secret on inter-service calls.
pub const SHARED_SECRET_HEADER: &str = "X-Gateway-Shared-Secret";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_length() {
        assert!(SharedSecret::from_hex("abcd").is_err());
    }

    #[test]
    fn round_trips_and_matches() {
        let hex_val = "a".repeat(64);
        let secret = SharedSecret::from_hex(&hex_val).unwrap();
        assert!(secret.matches_header(&hex_val));
        assert!(!secret.matches_header(&"b".repeat(64)));
    }
}
