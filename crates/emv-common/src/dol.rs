//! Data Object Lists (PDOL, CDOL1, CDOL2)
//!
//! A DOL is a sequence of tag + single-byte length pairs. The card sends the
//! list, and the terminal answers with the concatenated values, each padded or
//! truncated to the requested width.

use crate::store::TagStore;
use crate::tlv::{read_tag, Tag, TlvError};

/// One requested data object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DolEntry {
    pub tag: Tag,
    pub length: usize,
}

impl DolEntry {
    pub const fn new(tag: Tag, length: usize) -> Self {
        Self { tag, length }
    }
}

/// Parse a DOL value into its entries
pub fn parse_dol(data: &[u8]) -> Result<Vec<DolEntry>, TlvError> {
    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let (tag, tag_len) = read_tag(data, pos, 0)?;
        pos += tag_len;
        let length = *data
            .get(pos)
            .ok_or(TlvError::TruncatedLength { offset: pos })?;
        pos += 1;
        entries.push(DolEntry::new(tag, usize::from(length)));
    }

    Ok(entries)
}

/// Total number of bytes the DOL asks for
pub fn dol_data_len(entries: &[DolEntry]) -> usize {
    entries.iter().map(|e| e.length).sum()
}

/// Concatenate the values requested by `entries`, looked up in `values`.
pub fn build_dol_data(entries: &[DolEntry], values: &dyn TagStore) -> Vec<u8> {
    build_dol_data_with(entries, |tag| values.get(tag))
}

/// As [`build_dol_data`], with an arbitrary lookup.
///
/// A missing value becomes `length` zero bytes. A short value is left-padded
/// with zeros, a long one keeps its rightmost `length` bytes.
pub fn build_dol_data_with<'v, F>(entries: &[DolEntry], lookup: F) -> Vec<u8>
where
    F: Fn(Tag) -> Option<&'v [u8]>,
{
    let mut out = Vec::with_capacity(dol_data_len(entries));

    for entry in entries {
        match lookup(entry.tag) {
            Some(value) if value.len() >= entry.length => {
                out.extend_from_slice(&value[value.len() - entry.length..]);
            }
            Some(value) => {
                out.resize(out.len() + entry.length - value.len(), 0x00);
                out.extend_from_slice(value);
            }
            None => out.resize(out.len() + entry.length, 0x00),
        }
    }

    out
}
