use sha2::{Digest, Sha256};

use super::{require_len, CryptoError, RecognizedSigner, SchemeRecognizer, SignatureScheme};

const SIGNATURE_SIZE: usize = 64;
const PUBLIC_KEY_SIZE: usize = 33; // compressed secp256k1, Cosmos SDK convention
const HEADER_SIZE: usize = 2 + SIGNATURE_SIZE + PUBLIC_KEY_SIZE;

/// Scheme 4: Cosmos-style, compressed secp256k1 key + compact (r,s) signature as
/// used by the Cosmos SDK's `secp256k1.PubKey`/`StdSignature` pair.
pub struct CosmosRecognizer;

impl SchemeRecognizer for CosmosRecognizer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Cosmos
    }

    fn recognize(&self, bytes: &[u8]) -> Result<RecognizedSigner, CryptoError> {
        require_len(bytes, 0, HEADER_SIZE)?;
        let sig_bytes = &bytes[2..2 + SIGNATURE_SIZE];
        let pk_offset = 2 + SIGNATURE_SIZE;
        let pk_bytes = &bytes[pk_offset..pk_offset + PUBLIC_KEY_SIZE];
        let signed_region = &bytes[HEADER_SIZE..];

        let public_key =
            libsecp256k1::PublicKey::parse_compressed(pk_bytes.try_into().unwrap())
                .map_err(|_| CryptoError::MalformedPublicKey)?;
        let digest = Sha256::digest(signed_region);
        let message =
            libsecp256k1::Message::parse_slice(&digest).map_err(|_| CryptoError::MalformedSignature)?;
        let signature = libsecp256k1::Signature::parse_standard_slice(sig_bytes)
            .map_err(|_| CryptoError::MalformedSignature)?;
        if !libsecp256k1::verify(&message, &signature, &public_key) {
            return Err(CryptoError::VerificationFailed);
        }

        Ok(RecognizedSigner {
            owner_public_key: pk_bytes.to_vec(),
            // Simplified bech32-less address: real Cosmos addresses are bech32(sha256(pk)[..20]).
            // We keep the raw ripemd-style prefix hex since bech32 encoding is outside this
            // crate's dependency set.
            owner_address: format!("cosmos1{}", hex::encode(&Sha256::digest(pk_bytes)[..20])),
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
        let recognizer = CosmosRecognizer;
        assert!(recognizer.recognize(&[4, 0]).is_err());
    }
}
