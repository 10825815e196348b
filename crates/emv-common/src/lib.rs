//! EMV Common - Shared data structures and utilities for EMV processing
//!
//! - [`tlv`]: BER-TLV decoding, encoding and a tree builder
//! - [`tags`]: tag identifiers and the human-readable tag dictionary
//! - [`dol`]: Data Object List parsing and value materialisation
//! - [`store`]: the tag → value store used across the workspace

pub mod dol;
pub mod store;
pub mod tags;
pub mod tlv;

pub use dol::{build_dol_data, parse_dol, DolEntry};
pub use store::{TagMap, TagStore};
pub use tags::tag_name;
pub use tlv::{decode, encode, Tag, TlvBuilder, TlvError, TlvNode};

/// Search EMV-encoded data for a tag and return its value.
///
/// Constructed objects are searched depth-first. Malformed data yields `None`;
/// callers that need the decode error use [`tlv::decode`] directly.
pub fn find_tag(data: &[u8], tag: Tag) -> Option<Vec<u8>> {
    let nodes = decode(data).ok()?;
    tlv::find_in(&nodes, tag).map(|node| node.value().to_vec())
}
