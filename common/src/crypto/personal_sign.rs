use super::ecdsa_secp256k1::{eth_address_from_uncompressed, recover_eth_style};
use super::{require_len, CryptoError, RecognizedSigner, SchemeRecognizer, SignatureScheme};

const SIGNATURE_SIZE: usize = 65;
const HEADER_SIZE: usize = 2 + SIGNATURE_SIZE;
const ETH_PERSONAL_SIGN_PREFIX: &str = "\x19Ethereum Signed Message:\n";

/// Scheme 7: personal-sign, the `eth_sign`/`personal_sign` convention of hashing
/// `"\x19Ethereum Signed Message:\n" || len(message) || message` before recovery.
pub struct PersonalSignRecognizer;

impl SchemeRecognizer for PersonalSignRecognizer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::PersonalSign
    }

    fn recognize(&self, bytes: &[u8]) -> Result<RecognizedSigner, CryptoError> {
        require_len(bytes, 0, HEADER_SIZE)?;
        let sig_region = &bytes[2..2 + SIGNATURE_SIZE];
        let message = &bytes[HEADER_SIZE..];

        let mut prefixed = Vec::with_capacity(ETH_PERSONAL_SIGN_PREFIX.len() + 20 + message.len());
        prefixed.extend_from_slice(ETH_PERSONAL_SIGN_PREFIX.as_bytes());
        prefixed.extend_from_slice(message.len().to_string().as_bytes());
        prefixed.extend_from_slice(message);

        let public_key = recover_eth_style(sig_region, &prefixed)?;
        let uncompressed = public_key.serialize();

        Ok(RecognizedSigner {
            owner_public_key: uncompressed.to_vec(),
            owner_address: eth_address_from_uncompressed(&uncompressed),
            signature_length: SIGNATURE_SIZE,
            envelope_body_offset: HEADER_SIZE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_envelope() {
        assert!(PersonalSignRecognizer.recognize(&[7, 0]).is_err());
    }
}
