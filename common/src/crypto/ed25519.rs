use ed25519_dalek::{Signature, Verifier, VerifyingKey};

use super::{require_len, CryptoError, RecognizedSigner, SchemeRecognizer, SignatureScheme};

const SIGNATURE_SIZE: usize = 64;
const PUBLIC_KEY_SIZE: usize = 32;
const HEADER_SIZE: usize = 2 + SIGNATURE_SIZE + PUBLIC_KEY_SIZE;

/// Scheme 2: native Ed25519, signature over everything following the public key.
pub struct Ed25519Recognizer;

impl SchemeRecognizer for Ed25519Recognizer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::Ed25519
    }

    fn recognize(&self, bytes: &[u8]) -> Result<RecognizedSigner, CryptoError> {
        require_len(bytes, 0, HEADER_SIZE)?;
        let sig_bytes: [u8; SIGNATURE_SIZE] = bytes[2..2 + SIGNATURE_SIZE].try_into().unwrap();
        let pk_offset = 2 + SIGNATURE_SIZE;
        let pk_bytes: [u8; PUBLIC_KEY_SIZE] =
            bytes[pk_offset..pk_offset + PUBLIC_KEY_SIZE].try_into().unwrap();

        let verifying_key =
            VerifyingKey::from_bytes(&pk_bytes).map_err(|_| CryptoError::MalformedPublicKey)?;
        let signature = Signature::from_bytes(&sig_bytes);
        // The signature covers the public key plus everything that follows it
        // (tag array and payload) but never the signature bytes themselves.
        let signed_region = &bytes[pk_offset..];
        verifying_key
            .verify(signed_region, &signature)
            .map_err(|_| CryptoError::VerificationFailed)?;

        Ok(RecognizedSigner {
            owner_public_key: pk_bytes.to_vec(),
            owner_address: hex::encode(pk_bytes),
            signature_length: SIGNATURE_SIZE,
            envelope_body_offset: HEADER_SIZE,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    #[test]
    fn rejects_short_envelope() {
        let recognizer = Ed25519Recognizer;
        assert!(recognizer.recognize(&[2, 0]).is_err());
    }

    #[test]
    fn accepts_well_formed_envelope() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let pk_bytes = signing_key.verifying_key().to_bytes();
        let mut signed_region = pk_bytes.to_vec();
        signed_region.extend_from_slice(b"tag-array-and-payload");
        let signature = signing_key.sign(&signed_region);

        let mut envelope = vec![2u8, 0u8];
        envelope.extend_from_slice(&signature.to_bytes());
        envelope.extend_from_slice(&signed_region);

        let recognizer = Ed25519Recognizer;
        let signer = recognizer.recognize(&envelope).unwrap();
        assert_eq!(signer.envelope_body_offset, HEADER_SIZE);
        assert_eq!(signer.owner_public_key, pk_bytes.to_vec());
    }
}
