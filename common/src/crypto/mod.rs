//! Signature scheme dispatch for envelope verification (§4.4).
//!
//! The envelope's first two bytes are a scheme tag. Each recognizer owns the byte
//! layout for its scheme (public key size, signature size, address derivation) and
//! reports back where its fixed-size fields end so the envelope parser can resume
//! reading the tag array at the right offset. This mirrors the teacher's per-scheme
//! module split (`crypto::ed25519`, `crypto::ecdsa` in the discovery stack) rather
//! than one monolithic byte-twiddler.

mod cosmos;
mod ecdsa_secp256k1;
mod ed25519;
mod move_vm;
mod native_rsa;
mod personal_sign;
mod typed_data;

use thiserror::Error;

pub use cosmos::CosmosRecognizer;
pub use ecdsa_secp256k1::EcdsaSecp256k1Recognizer;
pub use ed25519::Ed25519Recognizer;
pub use move_vm::{MoveVmRecognizerV1, MoveVmRecognizerV2};
pub use native_rsa::NativeRsaRecognizer;
pub use personal_sign::PersonalSignRecognizer;
pub use typed_data::TypedDataRecognizer;

/// One of the eight scheme tags an envelope's first bytes may carry (§4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum SignatureScheme {
    NativeRsa = 1,
    Ed25519 = 2,
    EcdsaSecp256k1 = 3,
    Cosmos = 4,
    MoveVmV1 = 5,
    MoveVmV2 = 6,
    PersonalSign = 7,
    TypedStructuredData = 8,
}

impl SignatureScheme {
    pub fn from_tag(tag: u16) -> Result<Self, CryptoError> {
        Ok(match tag {
            1 => Self::NativeRsa,
            2 => Self::Ed25519,
            3 => Self::EcdsaSecp256k1,
            4 => Self::Cosmos,
            5 => Self::MoveVmV1,
            6 => Self::MoveVmV2,
            7 => Self::PersonalSign,
            8 => Self::TypedStructuredData,
            other => return Err(CryptoError::UnknownScheme(other)),
        })
    }
}

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("unknown signature scheme tag {0}")]
    UnknownScheme(u16),
    #[error("envelope truncated: need {need} bytes at offset {offset}, have {have}")]
    Truncated { offset: usize, need: usize, have: usize },
    #[error("signature verification failed")]
    VerificationFailed,
    #[error("malformed public key")]
    MalformedPublicKey,
    #[error("malformed signature")]
    MalformedSignature,
}

/// What a scheme recognizer extracts from the fixed-size header region of an
/// envelope, per §4.4: "(owner_public_key, owner_address, signature_length,
/// envelope_body_offset)".
#[derive(Debug, Clone)]
pub struct RecognizedSigner {
    pub owner_public_key: Vec<u8>,
    pub owner_address: String,
    pub signature_length: usize,
    /// Byte offset into the envelope where the tag array begins.
    pub envelope_body_offset: usize,
}

/// Implemented once per scheme tag. `recognize` only parses and verifies the fixed
/// header region (public key + signature); it never interprets the payload that
/// follows, per §4.4 "it does not interpret payload".
pub trait SchemeRecognizer {
    fn scheme(&self) -> SignatureScheme;

    /// `bytes` is the whole envelope starting at the scheme tag. `signed_region` is
    /// the byte range covered by the signature (everything except the signature
    /// bytes themselves), computed by the caller once the signature length is known.
    fn recognize(&self, bytes: &[u8]) -> Result<RecognizedSigner, CryptoError>;
}

/// Dispatches on the leading scheme tag and returns the matching recognizer.
pub fn recognizer_for(scheme: SignatureScheme) -> Box<dyn SchemeRecognizer> {
    match scheme {
        SignatureScheme::NativeRsa => Box::new(NativeRsaRecognizer),
        SignatureScheme::Ed25519 => Box::new(Ed25519Recognizer),
        SignatureScheme::EcdsaSecp256k1 => Box::new(EcdsaSecp256k1Recognizer),
        SignatureScheme::Cosmos => Box::new(CosmosRecognizer),
        SignatureScheme::MoveVmV1 => Box::new(MoveVmRecognizerV1),
        SignatureScheme::MoveVmV2 => Box::new(MoveVmRecognizerV2),
        SignatureScheme::PersonalSign => Box::new(PersonalSignRecognizer),
        SignatureScheme::TypedStructuredData => Box::new(TypedDataRecognizer),
    }
}

/// Reads the two-byte little-endian scheme tag at the start of an envelope.
pub fn read_scheme_tag(bytes: &[u8]) -> Result<SignatureScheme, CryptoError> {
    if bytes.len() < 2 {
        return Err(CryptoError::Truncated { offset: 0, need: 2, have: bytes.len() });
    }
    let tag = u16::from_le_bytes([bytes[0], bytes[1]]);
    SignatureScheme::from_tag(tag)
}

pub(crate) fn require_len(bytes: &[u8], offset: usize, need: usize) -> Result<(), CryptoError> {
    if bytes.len() < offset + need {
        return Err(CryptoError::Truncated { offset, need, have: bytes.len().saturating_sub(offset) });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scheme_tags_round_trip() {
        for tag in 1u16..=8 {
            let scheme = SignatureScheme::from_tag(tag).unwrap();
            assert_eq!(scheme as u16, tag);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(SignatureScheme::from_tag(9).is_err());
        assert!(SignatureScheme::from_tag(0).is_err());
    }

    #[test]
    fn truncated_tag_is_rejected() {
        assert!(read_scheme_tag(&[1]).is_err());
    }
}
