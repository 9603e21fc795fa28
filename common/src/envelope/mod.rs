//! Envelope parsing (§4.4, §6 "Envelope format"): scheme byte(s), signature, public
//! key, optional target, optional anchor, length-prefixed tag array, payload.
//!
//! Parsing is split from signature recognition: [`crate::crypto`] owns the
//! scheme-specific header layout and produces the public key / address / body
//! offset, and this module picks up from there to read the scheme-independent
//! target/anchor/tags/payload framing that is common to every scheme.

use crate::config::{MAX_ITEM_SIZE_BYTES, STREAMING_VERIFY_THRESHOLD_BYTES};
use crate::crypto::{self, CryptoError, RecognizedSigner, SignatureScheme};
use crate::ids::ContentId;
use crate::tags::{DecodedTags, Tag, TagList};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("envelope exceeds maximum item size ({size} > {max})")]
    TooLarge { size: u64, max: u64 },
    #[error("envelope is empty")]
    Empty,
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("malformed target/anchor presence byte")]
    MalformedOptionalField,
    #[error("malformed tag array: {0}")]
    MalformedTags(String),
    #[error("envelope truncated while reading {0}")]
    Truncated(&'static str),
}

const FIELD_SIZE: usize = 32;

/// A fully parsed envelope. `payload_offset` lets the caller stream the payload
/// straight from the original buffer instead of copying it again.
#[derive(Debug, Clone)]
pub struct ParsedEnvelope {
    pub scheme: SignatureScheme,
    pub content_id: ContentId,
    pub owner_public_key: Vec<u8>,
    pub owner_address: String,
    pub target: Option<[u8; FIELD_SIZE]>,
    pub anchor: Option<[u8; FIELD_SIZE]>,
    pub tags: TagList,
    pub decoded_tags: DecodedTags,
    pub payload_offset: usize,
    pub payload_len: usize,
}

impl ParsedEnvelope {
    pub fn total_size(&self) -> usize {
        self.payload_offset + self.payload_len
    }
}

/// Parses and verifies an envelope. `declared_size`, when known up front (e.g. from
/// `Content-Length`), is checked before any signature work per §4.4 "rejected
/// before any IO".
pub fn parse(bytes: &[u8], declared_size: Option<u64>) -> Result<ParsedEnvelope, EnvelopeError> {
    if let Some(size) = declared_size {
        if size > MAX_ITEM_SIZE_BYTES {
            return Err(EnvelopeError::TooLarge { size, max: MAX_ITEM_SIZE_BYTES });
        }
        if size == 0 {
            return Err(EnvelopeError::Empty);
        }
    }
    if bytes.is_empty() {
        return Err(EnvelopeError::Empty);
    }
    if bytes.len() as u64 > MAX_ITEM_SIZE_BYTES {
        return Err(EnvelopeError::TooLarge { size: bytes.len() as u64, max: MAX_ITEM_SIZE_BYTES });
    }

    let scheme = crypto::read_scheme_tag(bytes)?;
    let recognizer = crypto::recognizer_for(scheme);
    let RecognizedSigner { owner_public_key, owner_address, signature_length, envelope_body_offset } =
        recognizer.recognize(bytes)?;

    let content_id = if bytes.len() as u64 >= STREAMING_VERIFY_THRESHOLD_BYTES {
        ContentId::from_signature_streamed(&bytes[2..2 + signature_length])
    } else {
        ContentId::from_signature(&bytes[2..2 + signature_length])
    };

    let mut offset = envelope_body_offset;
    let target = read_optional_field(bytes, &mut offset)?;
    let anchor = read_optional_field(bytes, &mut offset)?;
    let tags = read_tags(bytes, &mut offset)?;
    let decoded_tags = DecodedTags::from(&tags);

    let payload_offset = offset;
    let payload_len = bytes.len() - offset;

    Ok(ParsedEnvelope {
        scheme,
        content_id,
        owner_public_key,
        owner_address,
        target,
        anchor,
        tags,
        decoded_tags,
        payload_offset,
        payload_len,
    })
}

fn read_optional_field(
    bytes: &[u8],
    offset: &mut usize,
) -> Result<Option<[u8; FIELD_SIZE]>, EnvelopeError> {
    if *offset >= bytes.len() {
        return Err(EnvelopeError::Truncated("presence byte"));
    }
    let present = bytes[*offset];
    *offset += 1;
    match present {
        0 => Ok(None),
        1 => {
            if *offset + FIELD_SIZE > bytes.len() {
                return Err(EnvelopeError::Truncated("target/anchor"));
            }
            let field: [u8; FIELD_SIZE] = bytes[*offset..*offset + FIELD_SIZE].try_into().unwrap();
            *offset += FIELD_SIZE;
            Ok(Some(field))
        }
        _ => Err(EnvelopeError::MalformedOptionalField),
    }
}

fn read_tags(bytes: &[u8], offset: &mut usize) -> Result<TagList, EnvelopeError> {
    if *offset + 4 > bytes.len() {
        return Err(EnvelopeError::Truncated("tag array length"));
    }
    let tag_bytes_len =
        u32::from_le_bytes(bytes[*offset..*offset + 4].try_into().unwrap()) as usize;
    *offset += 4;
    if *offset + tag_bytes_len > bytes.len() {
        return Err(EnvelopeError::Truncated("tag array body"));
    }
    let tag_region = &bytes[*offset..*offset + tag_bytes_len];
    *offset += tag_bytes_len;

    let mut tags = TagList::default();
    let mut cursor = 0usize;
    while cursor < tag_region.len() {
        let (name, next) = read_length_prefixed_string(tag_region, cursor)?;
        let (value, next) = read_length_prefixed_string(tag_region, next)?;
        tags.0.push(Tag::new(name, value));
        cursor = next;
    }
    Ok(tags)
}

fn read_length_prefixed_string(region: &[u8], offset: usize) -> Result<(String, usize), EnvelopeError> {
    if offset + 2 > region.len() {
        return Err(EnvelopeError::MalformedTags("truncated tag field length".into()));
    }
    let len = u16::from_le_bytes(region[offset..offset + 2].try_into().unwrap()) as usize;
    let start = offset + 2;
    if start + len > region.len() {
        return Err(EnvelopeError::MalformedTags("truncated tag field body".into()));
    }
    let value = String::from_utf8(region[start..start + len].to_vec())
        .map_err(|e| EnvelopeError::MalformedTags(e.to_string()))?;
    Ok((value, start + len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ed25519_dalek::{Signer, SigningKey};
    use rand::rngs::OsRng;

    fn encode_tags(tags: &[(&str, &str)]) -> Vec<u8> {
        let mut region = Vec::new();
        for (name, value) in tags {
            region.extend_from_slice(&(name.len() as u16).to_le_bytes());
            region.extend_from_slice(name.as_bytes());
            region.extend_from_slice(&(value.len() as u16).to_le_bytes());
            region.extend_from_slice(value.as_bytes());
        }
        let mut out = Vec::new();
        out.extend_from_slice(&(region.len() as u32).to_le_bytes());
        out.extend_from_slice(&region);
        out
    }

    #[test]
    fn parses_ed25519_envelope_with_no_target_no_anchor() {
        let signing_key = SigningKey::generate(&mut OsRng);
        let pk_bytes = signing_key.verifying_key().to_bytes();

        let mut signed_region = pk_bytes.to_vec();
        signed_region.push(0); // no target
        signed_region.push(0); // no anchor
        signed_region.extend_from_slice(&encode_tags(&[("Content-Type", "text/plain")]));
        signed_region.extend_from_slice(b"hello world");

        let signature = signing_key.sign(&signed_region);

        let mut envelope = vec![2u8, 0u8];
        envelope.extend_from_slice(&signature.to_bytes());
        envelope.extend_from_slice(&signed_region);

        let parsed = parse(&envelope, None).unwrap();
        assert!(parsed.target.is_none());
        assert!(parsed.anchor.is_none());
        assert_eq!(parsed.decoded_tags.content_type.as_deref(), Some("text/plain"));
        assert_eq!(&envelope[parsed.payload_offset..], b"hello world");
    }

    #[test]
    fn rejects_oversized_declared_length() {
        let result = parse(&[2, 0, 0], Some(MAX_ITEM_SIZE_BYTES + 1));
        assert!(matches!(result, Err(EnvelopeError::TooLarge { .. })));
    }

    #[test]
    fn rejects_empty_body() {
        assert!(matches!(parse(&[], None), Err(EnvelopeError::Empty)));
    }
}
