//! Tag-keyed value storage shared by profiles, emulators and the engine

use std::collections::BTreeMap;

use crate::tlv::Tag;

/// Mutable tag → bytes store
///
/// Code that reads or writes EMV data objects depends on this trait rather
/// than on a concrete container.
pub trait TagStore {
    fn get(&self, tag: Tag) -> Option<&[u8]>;

    fn set(&mut self, tag: Tag, value: Vec<u8>);

    fn remove(&mut self, tag: Tag) -> Option<Vec<u8>>;

    /// All entries in ascending tag order
    fn entries(&self) -> Vec<(Tag, &[u8])>;

    fn contains(&self, tag: Tag) -> bool {
        self.get(tag).is_some()
    }

    /// Entries rendered as uppercase hex strings, keyed by tag hex
    fn to_hex_map(&self) -> BTreeMap<String, String> {
        self.entries()
            .into_iter()
            .map(|(tag, value)| (tag.to_hex(), hex::encode_upper(value)))
            .collect()
    }
}

/// Ordered in-memory [`TagStore`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagMap {
    values: BTreeMap<Tag, Vec<u8>>,
}

impl TagMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, tag: Tag, value: impl Into<Vec<u8>>) -> Self {
        self.values.insert(tag, value.into());
        self
    }

    /// Copy every entry of `other` into this map, overwriting duplicates
    pub fn merge(&mut self, other: &dyn TagStore) {
        for (tag, value) in other.entries() {
            self.values.insert(tag, value.to_vec());
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl TagStore for TagMap {
    fn get(&self, tag: Tag) -> Option<&[u8]> {
        self.values.get(&tag).map(Vec::as_slice)
    }

    fn set(&mut self, tag: Tag, value: Vec<u8>) {
        self.values.insert(tag, value);
    }

    fn remove(&mut self, tag: Tag) -> Option<Vec<u8>> {
        self.values.remove(&tag)
    }

    fn entries(&self) -> Vec<(Tag, &[u8])> {
        self.values
            .iter()
            .map(|(tag, value)| (*tag, value.as_slice()))
            .collect()
    }
}

/// Looks a tag up in several stores, first match wins
#[derive(Clone, Copy)]
pub struct Layered<'a> {
    layers: &'a [&'a dyn TagStore],
}

impl<'a> Layered<'a> {
    pub fn new(layers: &'a [&'a dyn TagStore]) -> Self {
        Self { layers }
    }

    pub fn get(&self, tag: Tag) -> Option<&'a [u8]> {
        self.layers.iter().find_map(|layer| layer.get(tag))
    }
}

impl std::fmt::Debug for Layered<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Layered")
            .field("layers", &self.layers.len())
            .finish()
    }
}
