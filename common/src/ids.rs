//! Identity newtypes shared across both services.

use std::{convert::TryInto, fmt, str::FromStr};

use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer};

/// Size in bytes of a content id (the hash of an envelope's signature area, §4.5 step 3).
pub const CONTENT_ID_SIZE: usize = 32;

/// The content id of a data item: `blake3(signature_bytes)`, base64url-encoded on the wire.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId([u8; CONTENT_ID_SIZE]);

impl ContentId {
    pub const fn new(bytes: [u8; CONTENT_ID_SIZE]) -> Self {
        Self(bytes)
    }

    pub fn from_signature(signature: &[u8]) -> Self {
        Self(*blake3::hash(signature).as_bytes())
    }

    /// Same digest as [`Self::from_signature`], computed through blake3's streaming
    /// `Hasher` (§4.4 "streamable for items >= 10 KiB, hash signature area on the fly").
    pub fn from_signature_streamed(signature: &[u8]) -> Self {
        let mut hasher = blake3::Hasher::new();
        for chunk in signature.chunks(8192) {
            hasher.update(chunk);
        }
        Self(*hasher.finalize().as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; CONTENT_ID_SIZE] {
        &self.0
    }

    pub fn to_base64url(&self) -> String {
        base64_url_encode(&self.0)
    }
}

impl fmt::Debug for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentId({})", self.to_base64url())
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_base64url())
    }
}

impl FromStr for ContentId {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = base64_url_decode(s).map_err(|_| "invalid base64url content id")?;
        let bytes: [u8; CONTENT_ID_SIZE] = bytes.try_into().map_err(|_| "content id must be 32 bytes")?;
        Ok(Self(bytes))
    }
}

impl Serialize for ContentId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64url())
    }
}

impl<'de> Deserialize<'de> for ContentId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(D::Error::custom)
    }
}

/// An owning wallet address, tagged with the signature scheme that produced it (§4.4).
/// Addresses are opaque strings to this system — only the envelope verifier knows how
/// to derive one per scheme.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Address(String);

impl Address {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Address {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

fn base64_url_encode(bytes: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.encode(bytes)
}

fn base64_url_decode(s: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
    URL_SAFE_NO_PAD.decode(s)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_id_round_trips_through_base64url() {
        let id = ContentId::from_signature(b"some signature bytes");
        let s = id.to_base64url();
        let parsed: ContentId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn content_id_rejects_wrong_length() {
        let s = base64_url_encode(&[0u8; 16]);
        assert!(s.parse::<ContentId>().is_err());
    }
}
