//! Bundle wire format (§6 "Wire format for the bundle"): a 32-byte little-endian
//! item count, `count * 64` bytes of `(size, content id)` pairs, then each item's
//! raw envelope bytes concatenated in declared order.

use thiserror::Error;

use crate::ids::{ContentId, CONTENT_ID_SIZE};

const ITEM_COUNT_SIZE: usize = 32;
const ENTRY_SIZE: usize = 64;
const ENTRY_SIZE_FIELD: usize = ENTRY_SIZE - CONTENT_ID_SIZE;

#[derive(Debug, Error)]
pub enum BundleError {
    #[error("bundle truncated while reading {0}")]
    Truncated(&'static str),
    #[error("declared item count {0} overflows usize")]
    ItemCountOverflow(u64),
    #[error("entry {index} declares size {declared} but only {available} bytes remain")]
    EntrySizeMismatch { index: usize, declared: u64, available: u64 },
}

/// One entry in the bundle header: an item's byte length and content id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BundleEntry {
    pub size: u64,
    pub content_id: ContentId,
}

/// A parsed bundle: the header entries plus byte ranges into the original buffer
/// for each item's raw envelope, so callers can slice without copying.
#[derive(Debug, Clone)]
pub struct ParsedBundle {
    pub entries: Vec<BundleEntry>,
    /// `(start, end)` byte range of each item within the original buffer, in the
    /// same order as `entries`.
    pub item_ranges: Vec<(usize, usize)>,
}

impl ParsedBundle {
    pub fn item_count(&self) -> usize {
        self.entries.len()
    }

    pub fn payload_size(&self) -> u64 {
        self.entries.iter().map(|e| e.size).sum()
    }
}

/// Encodes a bundle header followed by the concatenated item bytes, in the order
/// the caller supplies `items`.
pub fn encode(items: &[(ContentId, Vec<u8>)]) -> Vec<u8> {
    let mut out = Vec::with_capacity(ITEM_COUNT_SIZE + items.len() * ENTRY_SIZE);
    let count = items.len() as u64;
    let mut count_bytes = [0u8; ITEM_COUNT_SIZE];
    count_bytes[..8].copy_from_slice(&count.to_le_bytes());
    out.extend_from_slice(&count_bytes);

    for (content_id, bytes) in items {
        let mut size_bytes = [0u8; ENTRY_SIZE_FIELD];
        size_bytes[..8].copy_from_slice(&(bytes.len() as u64).to_le_bytes());
        out.extend_from_slice(&size_bytes);
        out.extend_from_slice(content_id.as_bytes());
    }
    for (_, bytes) in items {
        out.extend_from_slice(bytes);
    }
    out
}

/// Parses a bundle's header and locates each item's byte range without copying
/// item bytes.
pub fn parse(bytes: &[u8]) -> Result<ParsedBundle, BundleError> {
    if bytes.len() < ITEM_COUNT_SIZE {
        return Err(BundleError::Truncated("item count"));
    }
    let mut count_low = [0u8; 8];
    count_low.copy_from_slice(&bytes[..8]);
    let item_count = u64::from_le_bytes(count_low);
    let item_count: usize = item_count
        .try_into()
        .map_err(|_| BundleError::ItemCountOverflow(item_count))?;

    let header_len = ITEM_COUNT_SIZE + item_count * ENTRY_SIZE;
    if bytes.len() < header_len {
        return Err(BundleError::Truncated("entry table"));
    }

    let mut entries = Vec::with_capacity(item_count);
    for i in 0..item_count {
        let entry_offset = ITEM_COUNT_SIZE + i * ENTRY_SIZE;
        let mut size_low = [0u8; 8];
        size_low.copy_from_slice(&bytes[entry_offset..entry_offset + 8]);
        let size = u64::from_le_bytes(size_low);
        let content_id_offset = entry_offset + ENTRY_SIZE_FIELD;
        let content_id_bytes: [u8; CONTENT_ID_SIZE] = bytes
            [content_id_offset..content_id_offset + CONTENT_ID_SIZE]
            .try_into()
            .unwrap();
        entries.push(BundleEntry { size, content_id: ContentId::new(content_id_bytes) });
    }

    let mut item_ranges = Vec::with_capacity(item_count);
    let mut cursor = header_len;
    for (i, entry) in entries.iter().enumerate() {
        let available = bytes.len() - cursor;
        if entry.size > available as u64 {
            return Err(BundleError::EntrySizeMismatch {
                index: i,
                declared: entry.size,
                available: available as u64,
            });
        }
        let end = cursor + entry.size as usize;
        item_ranges.push((cursor, end));
        cursor = end;
    }

    Ok(ParsedBundle { entries, item_ranges })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_encode_and_parse() {
        let items = vec![
            (ContentId::from_signature(b"item one"), b"first item bytes".to_vec()),
            (ContentId::from_signature(b"item two"), b"second".to_vec()),
        ];
        let encoded = encode(&items);
        let parsed = parse(&encoded).unwrap();

        assert_eq!(parsed.item_count(), 2);
        assert_eq!(parsed.entries[0].content_id, items[0].0);
        assert_eq!(parsed.entries[0].size, items[0].1.len() as u64);

        let (start, end) = parsed.item_ranges[1];
        assert_eq!(&encoded[start..end], items[1].1.as_slice());
    }

    #[test]
    fn rejects_truncated_header() {
        assert!(matches!(parse(&[0u8; 10]), Err(BundleError::Truncated(_))));
    }

    #[test]
    fn rejects_entry_size_larger_than_remaining_bytes() {
        let mut count_bytes = [0u8; ITEM_COUNT_SIZE];
        count_bytes[0] = 1;
        let mut entry = vec![0u8; ENTRY_SIZE_FIELD];
        entry[..8].copy_from_slice(&1_000_000u64.to_le_bytes());
        entry.extend_from_slice(&[0u8; CONTENT_ID_SIZE]);

        let mut bytes = count_bytes.to_vec();
        bytes.extend_from_slice(&entry);
        bytes.extend_from_slice(b"too short");

        assert!(matches!(parse(&bytes), Err(BundleError::EntrySizeMismatch { .. })));
    }
}
