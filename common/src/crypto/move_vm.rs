use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha3::{Digest, Sha3_256};

use super::{require_len, CryptoError, RecognizedSigner, SchemeRecognizer, SignatureScheme};

const SIGNATURE_SIZE: usize = 64;
const PUBLIC_KEY_SIZE: usize = 32;
const HEADER_SIZE: usize = 2 + SIGNATURE_SIZE + PUBLIC_KEY_SIZE;

/// Move authentication keys are `sha3_256(public_key || scheme_byte)`; the byte
/// distinguishes single-key (0x00) from multi-key (0x01) authenticators so the two
/// variants below don't collide on the same 32-byte address space.
fn move_auth_key(public_key: &[u8], scheme_byte: u8) -> String {
    let mut hasher = Sha3_256::new();
    hasher.update(public_key);
    hasher.update([scheme_byte]);
    format!("0x{}", hex::encode(hasher.finalize()))
}

/// Scheme 5: Move-VM single-signer Ed25519 authenticator.
pub struct MoveVmRecognizerV1;

impl SchemeRecognizer for MoveVmRecognizerV1 {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::MoveVmV1
    }

    fn recognize(&self, bytes: &[u8]) -> Result<RecognizedSigner, CryptoError> {
        require_len(bytes, 0, HEADER_SIZE)?;
        let sig_bytes: [u8; SIGNATURE_SIZE] = bytes[2..2 + SIGNATURE_SIZE].try_into().unwrap();
        let pk_offset = 2 + SIGNATURE_SIZE;
        let pk_bytes: [u8; PUBLIC_KEY_SIZE] =
            bytes[pk_offset..pk_offset + PUBLIC_KEY_SIZE].try_into().unwrap();
        let signed_region = &bytes[pk_offset..];

        let verifying_key =
            VerifyingKey::from_bytes(&pk_bytes).map_err(|_| CryptoError::MalformedPublicKey)?;
        verifying_key
            .verify(signed_region, &Signature::from_bytes(&sig_bytes))
            .map_err(|_| CryptoError::VerificationFailed)?;

        Ok(RecognizedSigner {
            owner_public_key: pk_bytes.to_vec(),
            owner_address: move_auth_key(&pk_bytes, 0x00),
            signature_length: SIGNATURE_SIZE,
            envelope_body_offset: HEADER_SIZE,
        })
    }
}

const MULTI_MAX_KEYS: usize = 32;
const MULTI_HEADER_SIZE: usize = 2 + 1 + 1; // tag + threshold + key count

/// Scheme 6: Move-VM multi-signer Ed25519 authenticator (K-of-N threshold). The
/// header carries a threshold byte and a key-count byte, followed by that many
/// 32-byte public keys, a bitmap of which keys signed, and one 64-byte signature
/// per participating key.
pub struct MoveVmRecognizerV2;

impl SchemeRecognizer for MoveVmRecognizerV2 {
    fn scheme(&self) -> SignatureScheme {
        SignatureScheme::MoveVmV2
    }

    fn recognize(&self, bytes: &[u8]) -> Result<RecognizedSigner, CryptoError> {
        require_len(bytes, 0, MULTI_HEADER_SIZE)?;
        let threshold = bytes[2];
        let key_count = bytes[3] as usize;
        if key_count == 0 || key_count > MULTI_MAX_KEYS || threshold == 0 || threshold as usize > key_count {
            return Err(CryptoError::MalformedPublicKey);
        }

        let keys_offset = MULTI_HEADER_SIZE;
        let keys_size = key_count * PUBLIC_KEY_SIZE;
        require_len(bytes, keys_offset, keys_size)?;
        let bitmap_offset = keys_offset + keys_size;
        require_len(bytes, bitmap_offset, 4)?;
        let bitmap = u32::from_le_bytes(bytes[bitmap_offset..bitmap_offset + 4].try_into().unwrap());
        let signer_count = bitmap.count_ones() as usize;
        if signer_count < threshold as usize {
            return Err(CryptoError::VerificationFailed);
        }

        let sigs_offset = bitmap_offset + 4;
        let sigs_size = signer_count * SIGNATURE_SIZE;
        require_len(bytes, sigs_offset, sigs_size)?;
        let envelope_body_offset = sigs_offset + sigs_size;
        let signed_region = &bytes[envelope_body_offset..];

        let mut combined_keys = Vec::with_capacity(keys_size);
        let mut signer_index = 0usize;
        for i in 0..key_count {
            if bitmap & (1 << i) == 0 {
                continue;
            }
            let pk_bytes: [u8; PUBLIC_KEY_SIZE] = bytes
                [keys_offset + i * PUBLIC_KEY_SIZE..keys_offset + (i + 1) * PUBLIC_KEY_SIZE]
                .try_into()
                .unwrap();
            let verifying_key =
                VerifyingKey::from_bytes(&pk_bytes).map_err(|_| CryptoError::MalformedPublicKey)?;
            let sig_bytes: [u8; SIGNATURE_SIZE] = bytes[sigs_offset + signer_index * SIGNATURE_SIZE
                ..sigs_offset + (signer_index + 1) * SIGNATURE_SIZE]
                .try_into()
                .unwrap();
            verifying_key
                .verify(signed_region, &Signature::from_bytes(&sig_bytes))
                .map_err(|_| CryptoError::VerificationFailed)?;
            combined_keys.extend_from_slice(&pk_bytes);
            signer_index += 1;
        }

        Ok(RecognizedSigner {
            owner_address: move_auth_key(&bytes[keys_offset..keys_offset + keys_size], 0x01),
            owner_public_key: combined_keys,
            signature_length: sigs_size + 4,
            envelope_body_offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_signer_rejects_short_envelope() {
        assert!(MoveVmRecognizerV1.recognize(&[5, 0]).is_err());
    }

    #[test]
    fn multi_signer_rejects_zero_threshold() {
        let mut bytes = vec![6u8, 0u8, 0u8, 1u8];
        bytes.extend(std::iter::repeat(0u8).take(PUBLIC_KEY_SIZE));
        assert!(MoveVmRecognizerV2.recognize(&bytes).is_err());
    }
}
