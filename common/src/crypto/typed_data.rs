use sha3::{Digest, Keccak256};

use super::ecdsa_secp256k1::eth_address_from_uncompressed;
use super::{require_len, CryptoError, RecognizedSigner, SchemeRecognizer, SignatureScheme};

const SIGNATURE_SIZE: usize = 65;
const DOMAIN_SEPARATOR_SIZE: usize = 32;
const STRUCT_HASH_SIZE: usize = 32;
const HEADER_SIZE: usize = 2 + SIGNATURE_SIZE + DOMAIN_SEPARATOR_SIZE + STRUCT_HASH_SIZE;
const EIP191_PREFIX: [u8; 2] = [0x19, 0x01];

/// Scheme 8: EIP-712 typed structured data. The envelope carries the already
/// computed domain separator and struct hash (the client is responsible for EIP-712
/// type encoding); this recognizer only assembles and verifies the final digest
/// `keccak256(0x1901 || domainSeparator || structHash)`, the same construction used
/// for ERC-3009 `transferWithAuthorization` verification in the gasless payment flow.
pub struct TypedDataRecognizer;

impl SchemeRecognizer for TypedDataRecognizer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::TypedStructuredData
    }

    fn recognize(&self, bytes: &[u8]) -> Result<RecognizedSigner, CryptoError> {
        require_len(bytes, 0, HEADER_SIZE)?;
        let sig_region = &bytes[2..2 + SIGNATURE_SIZE];
        let domain_offset = 2 + SIGNATURE_SIZE;
        let domain_separator = &bytes[domain_offset..domain_offset + DOMAIN_SEPARATOR_SIZE];
        let struct_offset = domain_offset + DOMAIN_SEPARATOR_SIZE;
        let struct_hash = &bytes[struct_offset..struct_offset + STRUCT_HASH_SIZE];

        let mut preimage = Vec::with_capacity(2 + DOMAIN_SEPARATOR_SIZE + STRUCT_HASH_SIZE);
        preimage.extend_from_slice(&EIP191_PREFIX);
        preimage.extend_from_slice(domain_separator);
        preimage.extend_from_slice(struct_hash);
        let digest = Keccak256::digest(&preimage);

        let public_key = recover_prehashed(sig_region, &digest)?;
        let uncompressed = public_key.serialize();

        Ok(RecognizedSigner {
            owner_public_key: uncompressed.to_vec(),
            owner_address: eth_address_from_uncompressed(&uncompressed),
            signature_length: SIGNATURE_SIZE,
            envelope_body_offset: HEADER_SIZE,
        })
    }
}

fn recover_prehashed(
    sig_region: &[u8],
    digest: &[u8],
) -> Result<libsecp256k1::PublicKey, CryptoError> {
    let message =
        libsecp256k1::Message::parse_slice(digest).map_err(|_| CryptoError::MalformedSignature)?;
    let signature = libsecp256k1::Signature::parse_standard_slice(&sig_region[..64])
        .map_err(|_| CryptoError::MalformedSignature)?;
    let recovery_id = libsecp256k1::RecoveryId::parse(sig_region[64].saturating_sub(27).min(3))
        .map_err(|_| CryptoError::MalformedSignature)?;
    libsecp256k1::recover(&message, &signature, &recovery_id)
        .map_err(|_| CryptoError::VerificationFailed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_envelope() {
        assert!(TypedDataRecognizer.recognize(&[8, 0]).is_err());
    }
}
