//! BER-TLV codec
//!
//! Decodes byte buffers into trees of [`TlvNode`] and encodes builder-made
//! trees back into bytes. Tag numbering follows ISO/IEC 7816-4: a first byte
//! whose low five bits are all set is followed by continuation bytes until
//! one with bit 8 clear. Lengths use the short form (0-127) or the long form
//! with up to three length bytes.

use std::fmt;

use thiserror::Error;

/// Widest tag accepted, in bytes.
const MAX_TAG_LEN: usize = 4;

/// Widest long-form length prefix accepted, in bytes (after the 0x8N byte).
const MAX_LENGTH_BYTES: usize = 3;

/// Largest value length the long form can express with three bytes.
pub const MAX_VALUE_LEN: usize = 0xFF_FFFF;

/// Nesting guard for constructed objects.
const MAX_DEPTH: usize = 32;

/// Errors raised while decoding or encoding TLV data
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TlvError {
    #[error("unexpected end of data while reading tag at offset {offset}")]
    TruncatedTag { offset: usize },

    #[error("unexpected end of data while reading length at offset {offset}")]
    TruncatedLength { offset: usize },

    #[error("value at offset {offset} needs {needed} bytes but only {available} remain")]
    TruncatedValue {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("indefinite length form at offset {offset} is not supported")]
    IndefiniteLength { offset: usize },

    #[error("length at offset {offset} uses {count} length bytes, at most 3 are supported")]
    LengthTooLong { offset: usize, count: usize },

    #[error("tag at offset {offset} is wider than 4 bytes")]
    TagTooLong { offset: usize },

    #[error("constructed data nested too deeply at offset {offset}")]
    NestingTooDeep { offset: usize },

    #[error("value of {0} bytes cannot be encoded")]
    ValueTooLong(usize),

    #[error("invalid tag {0:?}")]
    InvalidTag(String),
}

/// Tag class, taken from bits 8-7 of the first tag byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagClass {
    Universal,
    Application,
    ContextSpecific,
    Private,
}

/// A BER-TLV tag, stored as the big-endian integer of its bytes
/// (`9F38` is `0x9F38`, `DF8101` is `0xDF8101`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(u32);

impl Tag {
    pub const fn new(value: u32) -> Self {
        Self(value)
    }

    pub const fn value(self) -> u32 {
        self.0
    }

    /// Number of bytes in the encoded tag.
    pub const fn len(self) -> usize {
        match self.0 {
            0..=0xFF => 1,
            0x100..=0xFFFF => 2,
            0x1_0000..=0xFF_FFFF => 3,
            _ => 4,
        }
    }

    /// Encoded tag bytes, most significant first.
    pub fn bytes(self) -> Vec<u8> {
        self.0.to_be_bytes()[4 - self.len()..].to_vec()
    }

    pub const fn first_byte(self) -> u8 {
        (self.0 >> ((self.len() - 1) * 8)) as u8
    }

    /// Whether the tag denotes a constructed object.
    ///
    /// Only bit 6 of the *first* byte is examined, whatever the tag width.
    /// Every tag in the EMV dictionary keeps its class and constructed bits
    /// in that byte, so continuation bytes are treated purely numerically.
    pub const fn is_constructed(self) -> bool {
        self.first_byte() & 0x20 != 0
    }

    pub const fn class(self) -> TagClass {
        match self.first_byte() >> 6 {
            0 => TagClass::Universal,
            1 => TagClass::Application,
            2 => TagClass::ContextSpecific,
            _ => TagClass::Private,
        }
    }

    pub fn to_hex(self) -> String {
        hex::encode_upper(self.bytes())
    }

    /// Parse a complete tag from its hex form, e.g. `"9F38"`.
    pub fn from_hex(text: &str) -> Result<Self, TlvError> {
        let bytes = hex::decode(text.trim()).map_err(|_| TlvError::InvalidTag(text.to_string()))?;
        Self::from_bytes(&bytes).map_err(|_| TlvError::InvalidTag(text.to_string()))
    }

    /// Parse a tag that must span exactly `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, TlvError> {
        let (tag, consumed) = read_tag(bytes, 0, 0)?;
        if consumed != bytes.len() {
            return Err(TlvError::InvalidTag(hex::encode_upper(bytes)));
        }
        Ok(tag)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl From<u32> for Tag {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// One decoded (or builder-made) tag-length-value unit.
///
/// Nodes are immutable. For constructed nodes `value` holds the encoded
/// children, so `length()` always equals the value byte count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvNode {
    tag: Tag,
    value: Vec<u8>,
    children: Vec<TlvNode>,
}

impl TlvNode {
    /// A primitive node carrying raw value bytes
    pub fn primitive(tag: Tag, value: impl Into<Vec<u8>>) -> Self {
        Self {
            tag,
            value: value.into(),
            children: Vec::new(),
        }
    }

    /// A constructed node; its value is the encoding of `children`
    pub fn constructed(tag: Tag, children: Vec<TlvNode>) -> Result<Self, TlvError> {
        let value = encode(&children)?;
        Ok(Self {
            tag,
            value,
            children,
        })
    }

    pub fn tag(&self) -> Tag {
        self.tag
    }

    pub fn length(&self) -> usize {
        self.value.len()
    }

    pub fn value(&self) -> &[u8] {
        &self.value
    }

    pub fn children(&self) -> &[TlvNode] {
        &self.children
    }

    pub fn is_constructed(&self) -> bool {
        self.tag.is_constructed()
    }

    /// Depth-first search through this node and its descendants
    pub fn find(&self, tag: Tag) -> Option<&TlvNode> {
        if self.tag == tag {
            return Some(self);
        }
        find_in(&self.children, tag)
    }

    /// Walk this node and every descendant, parents before children
    pub fn iter(&self) -> Walk<'_> {
        Walk { stack: vec![self] }
    }
}

/// Depth-first iterator over a node tree
#[derive(Debug)]
pub struct Walk<'a> {
    stack: Vec<&'a TlvNode>,
}

impl<'a> Iterator for Walk<'a> {
    type Item = &'a TlvNode;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.stack.pop()?;
        self.stack.extend(node.children.iter().rev());
        Some(node)
    }
}

/// Depth-first search across a sequence of sibling nodes
pub fn find_in(nodes: &[TlvNode], tag: Tag) -> Option<&TlvNode> {
    nodes.iter().find_map(|node| node.find(tag))
}

/// Decode a buffer into its top-level nodes, recursing into constructed tags.
///
/// Filler bytes (0x00, 0xFF) between top-level objects are skipped.
pub fn decode(data: &[u8]) -> Result<Vec<TlvNode>, TlvError> {
    decode_level(data, 0, 0)
}

fn decode_level(data: &[u8], base: usize, depth: usize) -> Result<Vec<TlvNode>, TlvError> {
    if depth > MAX_DEPTH {
        return Err(TlvError::NestingTooDeep { offset: base });
    }

    let mut nodes = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        if depth == 0 && matches!(data[pos], 0x00 | 0xFF) {
            pos += 1;
            continue;
        }
        let (node, consumed) = decode_one(data, pos, base, depth)?;
        nodes.push(node);
        pos += consumed;
    }

    Ok(nodes)
}

fn decode_one(
    data: &[u8],
    pos: usize,
    base: usize,
    depth: usize,
) -> Result<(TlvNode, usize), TlvError> {
    let (tag, tag_len) = read_tag(data, pos, base)?;
    let (length, len_len) = read_length(data, pos + tag_len, base)?;

    let start = pos + tag_len + len_len;
    let available = data.len() - start;
    if length > available {
        return Err(TlvError::TruncatedValue {
            offset: base + start,
            needed: length,
            available,
        });
    }

    let value = data[start..start + length].to_vec();
    let children = if tag.is_constructed() {
        decode_level(&value, base + start, depth + 1)?
    } else {
        Vec::new()
    };

    Ok((
        TlvNode {
            tag,
            value,
            children,
        },
        tag_len + len_len + length,
    ))
}

/// Read one tag starting at `pos`. `base` only shifts reported offsets.
pub(crate) fn read_tag(data: &[u8], pos: usize, base: usize) -> Result<(Tag, usize), TlvError> {
    let offset = base + pos;
    let first = *data.get(pos).ok_or(TlvError::TruncatedTag { offset })?;
    let mut value = u32::from(first);
    let mut len = 1;

    if first & 0x1F == 0x1F {
        loop {
            let byte = *data.get(pos + len).ok_or(TlvError::TruncatedTag { offset })?;
            len += 1;
            if len > MAX_TAG_LEN {
                return Err(TlvError::TagTooLong { offset });
            }
            value = (value << 8) | u32::from(byte);
            if byte & 0x80 == 0 {
                break;
            }
        }
    }

    Ok((Tag(value), len))
}

fn read_length(data: &[u8], pos: usize, base: usize) -> Result<(usize, usize), TlvError> {
    let offset = base + pos;
    let first = *data.get(pos).ok_or(TlvError::TruncatedLength { offset })?;

    if first & 0x80 == 0 {
        return Ok((usize::from(first), 1));
    }

    let count = usize::from(first & 0x7F);
    if count == 0 {
        return Err(TlvError::IndefiniteLength { offset });
    }
    if count > MAX_LENGTH_BYTES {
        return Err(TlvError::LengthTooLong { offset, count });
    }

    let bytes = data
        .get(pos + 1..pos + 1 + count)
        .ok_or(TlvError::TruncatedLength { offset })?;
    let length = bytes
        .iter()
        .fold(0usize, |acc, &b| (acc << 8) | usize::from(b));

    Ok((length, 1 + count))
}

/// Decode a length field at the start of `data`, returning the length and
/// the number of bytes it occupied.
pub fn decode_length(data: &[u8]) -> Result<(usize, usize), TlvError> {
    read_length(data, 0, 0)
}

/// Minimal length encoding: short form below 128, then 0x81, 0x82, 0x83.
pub fn encode_length(length: usize) -> Result<Vec<u8>, TlvError> {
    let encoded = if length < 0x80 {
        vec![length as u8]
    } else if length <= 0xFF {
        vec![0x81, length as u8]
    } else if length <= 0xFFFF {
        vec![0x82, (length >> 8) as u8, length as u8]
    } else if length <= MAX_VALUE_LEN {
        vec![0x83, (length >> 16) as u8, (length >> 8) as u8, length as u8]
    } else {
        return Err(TlvError::ValueTooLong(length));
    };
    Ok(encoded)
}

/// Encode a sequence of nodes back to bytes
pub fn encode(nodes: &[TlvNode]) -> Result<Vec<u8>, TlvError> {
    let mut out = Vec::new();
    for node in nodes {
        out.extend(node.tag.bytes());
        out.extend(encode_length(node.value.len())?);
        out.extend_from_slice(&node.value);
    }
    Ok(out)
}

/// Encode a single primitive object
pub fn encode_primitive(tag: Tag, value: &[u8]) -> Result<Vec<u8>, TlvError> {
    encode(&[TlvNode::primitive(tag, value)])
}

/// Builder for TLV trees that are encoded afterwards
///
/// ```
/// use emv_common::tlv::{decode, TlvBuilder};
/// use emv_common::tags;
///
/// let bytes = TlvBuilder::new()
///     .constructed(tags::FCI_TEMPLATE, |fci| {
///         fci.primitive(tags::DF_NAME, [0xA0, 0x00, 0x00, 0x00, 0x03, 0x10, 0x10])
///     })
///     .build()
///     .unwrap();
///
/// let nodes = decode(&bytes).unwrap();
/// assert_eq!(nodes[0].children().len(), 1);
/// ```
#[derive(Debug, Default)]
pub struct TlvBuilder {
    nodes: Vec<TlvNode>,
    error: Option<TlvError>,
}

impl TlvBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a primitive leaf
    pub fn primitive(mut self, tag: Tag, value: impl AsRef<[u8]>) -> Self {
        self.nodes.push(TlvNode::primitive(tag, value.as_ref()));
        self
    }

    /// Append a primitive leaf only when a value is present
    pub fn optional(self, tag: Tag, value: Option<&[u8]>) -> Self {
        match value {
            Some(value) => self.primitive(tag, value),
            None => self,
        }
    }

    /// Append a constructed node whose children are produced by `build`
    pub fn constructed<F>(mut self, tag: Tag, build: F) -> Self
    where
        F: FnOnce(TlvBuilder) -> TlvBuilder,
    {
        if self.error.is_some() {
            return self;
        }
        match build(TlvBuilder::new())
            .into_nodes()
            .and_then(|children| TlvNode::constructed(tag, children))
        {
            Ok(node) => self.nodes.push(node),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Append an already built node
    pub fn node(mut self, node: TlvNode) -> Self {
        self.nodes.push(node);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn into_nodes(self) -> Result<Vec<TlvNode>, TlvError> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.nodes),
        }
    }

    pub fn build(self) -> Result<Vec<u8>, TlvError> {
        encode(&self.into_nodes()?)
    }
}

#[cfg(test)]
mod tests {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::*;

    #[test]
    fn test_simple_tlv() {
        let data = hex::decode("5A084761739001010010").unwrap();
        let nodes = decode(&data).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].tag(), Tag::new(0x5A));
        assert_eq!(nodes[0].length(), 8);
        assert!(!nodes[0].is_constructed());
    }

    #[test]
    fn test_multi_byte_tags() {
        let data = hex::decode("9F38039F6604DF8101021234").unwrap();
        let nodes = decode(&data).unwrap();
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].tag().to_hex(), "9F38");
        assert_eq!(nodes[1].tag(), Tag::new(0xDF8101));
        assert_eq!(nodes[1].tag().len(), 3);
        assert_eq!(nodes[1].value(), &[0x12, 0x34]);
    }

    #[test]
    fn test_constructed_children() {
        // 6F { 84 07 A0000000031010, A5 { 50 04 "VISA" } }
        let data = hex::decode("6F118407A0000000031010A5065004564953410000").unwrap();
        let nodes = decode(&data).unwrap();
        assert_eq!(nodes.len(), 1);
        let fci = &nodes[0];
        assert!(fci.is_constructed());
        assert_eq!(fci.children().len(), 2);
        let label = fci.find(Tag::new(0x50)).unwrap();
        assert_eq!(label.value(), b"VISA");
        assert_eq!(fci.iter().count(), 4);
    }

    #[test]
    fn test_filler_bytes_skipped_at_top_level() {
        let data = hex::decode("00FF8201190000").unwrap();
        let nodes = decode(&data).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].tag(), Tag::new(0x82));
    }

    #[test]
    fn test_truncated_value_names_offset() {
        let data = hex::decode("820219").unwrap();
        let err = decode(&data).unwrap_err();
        assert_eq!(
            err,
            TlvError::TruncatedValue {
                offset: 2,
                needed: 2,
                available: 1
            }
        );
    }

    #[test]
    fn test_truncated_nested_offset_is_absolute() {
        // 70 04 { 57 05 ... } - child claims more than the parent holds
        let data = hex::decode("7004570511223344").unwrap();
        let err = decode(&data[..6]).unwrap_err();
        assert!(matches!(err, TlvError::TruncatedValue { .. }));

        let data = hex::decode("70035705").unwrap();
        let err = decode(&data).unwrap_err();
        assert_eq!(err, TlvError::TruncatedValue { offset: 2, needed: 3, available: 2 });
    }

    #[test]
    fn test_truncated_tag() {
        assert_eq!(decode(&[0x9F]).unwrap_err(), TlvError::TruncatedTag { offset: 0 });
        assert_eq!(decode(&[0x5A]).unwrap_err(), TlvError::TruncatedLength { offset: 1 });
    }

    #[test]
    fn test_indefinite_length_rejected() {
        let err = decode(&[0x70, 0x80, 0x00, 0x00]).unwrap_err();
        assert_eq!(err, TlvError::IndefiniteLength { offset: 1 });
    }

    #[test]
    fn test_length_prefix_too_wide() {
        let err = decode(&[0x5A, 0x84, 0x00, 0x00, 0x00, 0x01, 0x00]).unwrap_err();
        assert_eq!(err, TlvError::LengthTooLong { offset: 1, count: 4 });
    }

    #[test]
    fn test_encode_length_bands() {
        assert_eq!(encode_length(0).unwrap(), vec![0x00]);
        assert_eq!(encode_length(127).unwrap(), vec![0x7F]);
        assert_eq!(encode_length(128).unwrap(), vec![0x81, 0x80]);
        assert_eq!(encode_length(255).unwrap(), vec![0x81, 0xFF]);
        assert_eq!(encode_length(256).unwrap(), vec![0x82, 0x01, 0x00]);
        assert_eq!(encode_length(65535).unwrap(), vec![0x82, 0xFF, 0xFF]);
        assert_eq!(encode_length(65536).unwrap(), vec![0x83, 0x01, 0x00, 0x00]);
        assert_eq!(encode_length(MAX_VALUE_LEN).unwrap(), vec![0x83, 0xFF, 0xFF, 0xFF]);
        assert_eq!(
            encode_length(MAX_VALUE_LEN + 1).unwrap_err(),
            TlvError::ValueTooLong(MAX_VALUE_LEN + 1)
        );
    }

    #[test]
    fn test_length_decodes_what_it_encodes() {
        for n in [0, 1, 127, 128, 200, 255, 256, 4096, 65535, 65536, 1 << 20, MAX_VALUE_LEN] {
            let encoded = encode_length(n).unwrap();
            assert_eq!(decode_length(&encoded).unwrap(), (n, encoded.len()));
        }
    }

    #[test]
    fn test_length_sweep_round_trips() {
        for n in 0..=0xFFFF {
            let encoded = encode_length(n).unwrap();
            let expected_width = match n {
                0..=0x7F => 1,
                0x80..=0xFF => 2,
                _ => 3,
            };
            assert_eq!(encoded.len(), expected_width, "length {n}");
            assert_eq!(decode_length(&encoded).unwrap(), (n, encoded.len()));
        }
    }

    const PRIMITIVE_TAGS: [u32; 7] = [0x5A, 0x82, 0x5F2A, 0x9F02, 0x9F4D, 0x9F6E, 0xDF8101];
    const CONSTRUCTED_TAGS: [u32; 6] = [0x61, 0x6F, 0x70, 0x77, 0xA5, 0xBF0C];

    fn random_node(rng: &mut StdRng, depth: usize) -> TlvNode {
        if depth < 3 && rng.random_bool(0.3) {
            let tag = CONSTRUCTED_TAGS[rng.random_range(0..CONSTRUCTED_TAGS.len())];
            let children = (0..rng.random_range(0..4))
                .map(|_| random_node(rng, depth + 1))
                .collect();
            TlvNode::constructed(Tag::new(tag), children).unwrap()
        } else {
            let tag = PRIMITIVE_TAGS[rng.random_range(0..PRIMITIVE_TAGS.len())];
            // Long enough now and then to need the 0x81 and 0x82 forms
            let len = match rng.random_range(0..10) {
                0 => rng.random_range(128..600),
                _ => rng.random_range(0..40),
            };
            let mut value = vec![0u8; len];
            rng.fill(value.as_mut_slice());
            TlvNode::primitive(Tag::new(tag), value)
        }
    }

    #[test]
    fn test_random_trees_round_trip() {
        let mut rng = StdRng::seed_from_u64(0x9F6E);
        for _ in 0..500 {
            let nodes: Vec<TlvNode> = (0..rng.random_range(1..5))
                .map(|_| random_node(&mut rng, 0))
                .collect();
            let bytes = encode(&nodes).unwrap();
            assert_eq!(decode(&bytes).unwrap(), nodes);
        }
    }

    #[test]
    fn test_builder_tree_survives_decode() {
        let nodes = TlvBuilder::new()
            .constructed(Tag::new(0x77), |t| {
                t.primitive(Tag::new(0x82), [0x19, 0x80])
                    .primitive(Tag::new(0x94), [0x08, 0x01, 0x01, 0x00])
                    .constructed(Tag::new(0xBF0C), |inner| {
                        inner.primitive(Tag::new(0x9F4D), [0x0B, 0x0A])
                    })
            })
            .primitive(Tag::new(0x9F10), vec![0xAB; 200])
            .into_nodes()
            .unwrap();

        let bytes = encode(&nodes).unwrap();
        assert_eq!(decode(&bytes).unwrap(), nodes);
    }

    #[test]
    fn test_tag_hex_and_class() {
        let tag = Tag::from_hex("9f6e").unwrap();
        assert_eq!(tag, Tag::new(0x9F6E));
        assert_eq!(tag.class(), TagClass::ContextSpecific);
        assert_eq!(Tag::new(0x6F).class(), TagClass::Application);
        assert_eq!(Tag::new(0xDF8101).class(), TagClass::Private);
        assert!(Tag::new(0xBF0C).is_constructed());
        assert!(!Tag::new(0xDF8101).is_constructed());
        assert!(Tag::from_hex("9F").is_err());
        assert!(Tag::from_hex("5A5A").is_err());
        assert!(Tag::from_hex("zz").is_err());
    }

    #[test]
    fn test_tag_too_wide() {
        let err = decode(&[0x9F, 0x81, 0x81, 0x81, 0x01, 0x00]).unwrap_err();
        assert_eq!(err, TlvError::TagTooLong { offset: 0 });
    }
}
