use libsecp256k1::{recover, Message, RecoveryId, Signature};
use sha3::{Digest, Keccak256};

use super::{require_len, CryptoError, RecognizedSigner, SchemeRecognizer, SignatureScheme};

const SIGNATURE_SIZE: usize = 65; // r (32) || s (32) || recovery id (1)
const HEADER_SIZE: usize = 2 + SIGNATURE_SIZE;

/// Scheme 3: raw ECDSA-secp256k1, recoverable signature over the remainder of the
/// envelope. The public key is recovered rather than carried explicitly, so the
/// header is just the scheme tag plus the 65-byte signature.
pub struct EcdsaSecp256k1Recognizer;

impl SchemeRecognizer for EcdsaSecp256k1Recognizer {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::EcdsaSecp256k1
    }

    fn recognize(&self, bytes: &[u8]) -> Result<RecognizedSigner, CryptoError> {
        require_len(bytes, 0, HEADER_SIZE)?;
        let sig_region = &bytes[2..2 + SIGNATURE_SIZE];
        let signed_region = &bytes[HEADER_SIZE..];

        let public_key = recover_eth_style(sig_region, signed_region)?;
        let uncompressed = public_key.serialize();
        let address = eth_address_from_uncompressed(&uncompressed);

        Ok(RecognizedSigner {
            owner_public_key: uncompressed.to_vec(),
            owner_address: address,
            signature_length: SIGNATURE_SIZE,
            envelope_body_offset: HEADER_SIZE,
        })
    }
}

pub(crate) fn recover_eth_style(
    sig_region: &[u8],
    signed_region: &[u8],
) -> Result<libsecp256k1::PublicKey, CryptoError> {
    let digest = Keccak256::digest(signed_region);
    let message = Message::parse_slice(&digest).map_err(|_| CryptoError::MalformedSignature)?;
    let signature =
        Signature::parse_standard_slice(&sig_region[..64]).map_err(|_| CryptoError::MalformedSignature)?;
    let recovery_byte = sig_region[64];
    let recovery_id = RecoveryId::parse(recovery_byte.saturating_sub(27).min(3))
        .map_err(|_| CryptoError::MalformedSignature)?;
    recover(&message, &signature, &recovery_id).map_err(|_| CryptoError::VerificationFailed)
}

pub(crate) fn eth_address_from_uncompressed(uncompressed: &[u8; 65]) -> String {
    let hash = Keccak256::digest(&uncompressed[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsecp256k1::{sign, Message, SecretKey};
    use rand::rngs::OsRng;

    #[test]
    fn rejects_short_envelope() {
        let recognizer = EcdsaSecp256k1Recognizer;
        assert!(recognizer.recognize(&[3, 0]).is_err());
    }

    #[test]
    fn accepts_well_formed_envelope() {
        let secret_key = SecretKey::random(&mut OsRng);
        let public_key = libsecp256k1::PublicKey::from_secret_key(&secret_key);
        let body = b"tag-array-and-payload".to_vec();
        let digest = Keccak256::digest(&body);
        let message = Message::parse_slice(&digest).unwrap();
        let (signature, recovery_id) = sign(&message, &secret_key);

        let mut envelope = vec![3u8, 0u8];
        envelope.extend_from_slice(&signature.serialize());
        envelope.push(recovery_id.serialize() + 27);
        envelope.extend_from_slice(&body);

        let recognizer = EcdsaSecp256k1Recognizer;
        let signer = recognizer.recognize(&envelope).unwrap();
        assert_eq!(signer.owner_public_key, public_key.serialize().to_vec());
        assert!(signer.owner_address.starts_with("0x"));
    }
}
