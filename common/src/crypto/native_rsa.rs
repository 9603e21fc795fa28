use rsa::pkcs1v15::Pkcs1v15Sign;
use rsa::pss::Pss;
use rsa::{BigUint, RsaPublicKey};
use sha2::{Digest, Sha256};

use super::{require_len, CryptoError, RecognizedSigner, SchemeRecognizer, SignatureScheme};

/// Scheme 1: the ecosystem's native RSA scheme, key size bounded to 4096 bits.
/// Both the modulus and the signature occupy a fixed 512-byte slot sized for the
/// maximum key; shorter keys are left-padded with zero bytes exactly like the
/// reference binary encoding this format is modeled on.
const SLOT_SIZE: usize = 512;
const PUBLIC_EXPONENT: u64 = 65_537;
const HEADER_SIZE: usize = 2 + SLOT_SIZE + SLOT_SIZE;

pub struct NativeRsaRecognizer;

impl SchemeRecognizer for NativeRsaRecognizer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::NativeRsa
    }

    fn recognize(&self, bytes: &[u8]) -> Result<RecognizedSigner, CryptoError> {
        require_len(bytes, 0, HEADER_SIZE)?;
        let sig_slot = &bytes[2..2 + SLOT_SIZE];
        let pk_offset = 2 + SLOT_SIZE;
        let pk_slot = &bytes[pk_offset..pk_offset + SLOT_SIZE];
        let signed_region = &bytes[HEADER_SIZE..];

        let modulus = BigUint::from_bytes_be(pk_slot);
        let public_key = RsaPublicKey::new(modulus, BigUint::from(PUBLIC_EXPONENT))
            .map_err(|_| CryptoError::MalformedPublicKey)?;

        let digest = Sha256::digest(signed_region);
        public_key
            .verify(Pss::new::<Sha256>(), &digest, sig_slot)
            .or_else(|_| {
                public_key.verify(Pkcs1v15Sign::new::<Sha256>(), &digest, sig_slot)
            })
            .map_err(|_| CryptoError::VerificationFailed)?;

        Ok(RecognizedSigner {
            owner_public_key: pk_slot.to_vec(),
            owner_address: wallet_address(pk_slot),
            signature_length: SLOT_SIZE,
            envelope_body_offset: HEADER_SIZE,
        })
    }
}

/// Wallet address derivation: base64url of sha256(modulus), matching the
/// ecosystem's own "address is a hash of the public key" convention.
fn wallet_address(modulus: &[u8]) -> String {
    use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
    let digest = Sha256::digest(modulus);
    URL_SAFE_NO_PAD.encode(digest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_envelope() {
        let recognizer = NativeRsaRecognizer;
        assert!(recognizer.recognize(&[1, 0, 1, 2, 3]).is_err());
    }
}
