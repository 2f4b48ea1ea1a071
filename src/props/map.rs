//! Property maps.
//!
//! A [`PropertyMap`] is a fixed 256-bucket hash table of shared
//! [`PropertyEntry`] values. Entries are `Arc`s: merging two maps copies
//! references, never values, so a multiplexer can forward every upstream
//! property next to its own at the cost of a pointer copy per entry.
//!
//! Maps are published behind an `Arc<PropertyMap>`. Once another holder
//! (a sent packet, a configured input) shares the `Arc`, writers go through
//! [`Arc::make_mut`] and get their own copy; the shared map stays frozen.

use super::codes;
use super::key::PropertyKey;
use super::value::PropertyValue;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;

/// Number of hash buckets in a property map.
pub const HASH_TABLE_SIZE: usize = 256;

/// djb2 hash of a property key, reduced to a bucket index.
///
/// Codes hash their four bytes (big endian), names hash their UTF-8 bytes.
pub fn bucket_of(key: &PropertyKey) -> usize {
    let mut hash: u32 = 5381;
    let mut feed = |byte: u8| hash = (hash << 5).wrapping_add(hash).wrapping_add(byte as u32);
    match key {
        PropertyKey::Code(code) => code.to_be_bytes().into_iter().for_each(&mut feed),
        PropertyKey::Name(name) => name.bytes().for_each(&mut feed),
    }
    (hash as usize) % HASH_TABLE_SIZE
}

/// One key/value pair of a property map.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyEntry {
    key: PropertyKey,
    value: PropertyValue,
}

impl PropertyEntry {
    /// Create a new entry.
    pub fn new(key: PropertyKey, value: PropertyValue) -> Self {
        Self { key, value }
    }

    /// Entry key.
    pub fn key(&self) -> &PropertyKey {
        &self.key
    }

    /// Entry value.
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Display name of the key.
    pub fn name(&self) -> String {
        self.key.display_name()
    }
}

type Bucket = SmallVec<[Arc<PropertyEntry>; 2]>;

/// A hashed set of properties.
#[derive(Clone)]
pub struct PropertyMap {
    buckets: Box<[Bucket]>,
    len: usize,
    timescale: u32,
}

impl PropertyMap {
    /// Create an empty map.
    pub fn new() -> Self {
        Self {
            buckets: (0..HASH_TABLE_SIZE).map(|_| Bucket::new()).collect(),
            len: 0,
            timescale: 0,
        }
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the map holds no property.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Timescale cached from the [`codes::TIMESCALE`] property (0 if unset).
    pub fn timescale(&self) -> u32 {
        self.timescale
    }

    /// Set a property, replacing any previous value for the key.
    pub fn set(&mut self, key: impl Into<PropertyKey>, value: impl Into<PropertyValue>) {
        let key = key.into();
        self.remove(&key);
        self.insert_entry(Arc::new(PropertyEntry::new(key, value.into())));
    }

    /// Set or remove a property.
    pub fn set_opt(&mut self, key: impl Into<PropertyKey>, value: Option<PropertyValue>) {
        match value {
            Some(v) => self.set(key, v),
            None => {
                self.remove(&key.into());
            }
        }
    }

    /// Get a property value.
    pub fn get(&self, key: &PropertyKey) -> Option<&PropertyValue> {
        self.entry(key).map(|e| e.value())
    }

    /// Get a built-in property value by code.
    pub fn get_code(&self, code: u32) -> Option<&PropertyValue> {
        self.get(&PropertyKey::Code(code))
    }

    /// Get a property by textual name; built-in names resolve to their code.
    pub fn get_str(&self, name: &str) -> Option<&PropertyValue> {
        self.get(&PropertyKey::from_name(name))
    }

    /// Get the shared entry for a key.
    pub fn entry(&self, key: &PropertyKey) -> Option<&Arc<PropertyEntry>> {
        self.buckets[bucket_of(key)].iter().find(|e| &e.key == key)
    }

    /// Whether the map holds the key.
    pub fn contains(&self, key: &PropertyKey) -> bool {
        self.entry(key).is_some()
    }

    /// Remove a property, returning its entry.
    pub fn remove(&mut self, key: &PropertyKey) -> Option<Arc<PropertyEntry>> {
        let bucket = &mut self.buckets[bucket_of(key)];
        let pos = bucket.iter().position(|e| &e.key == key)?;
        let entry = bucket.remove(pos);
        self.len -= 1;
        if *key == PropertyKey::Code(codes::TIMESCALE) {
            self.timescale = 0;
        }
        Some(entry)
    }

    /// Remove every property.
    pub fn clear(&mut self) {
        self.buckets.iter_mut().for_each(|b| b.clear());
        self.len = 0;
        self.timescale = 0;
    }

    /// Append by reference every entry of `src` whose key is not already
    /// present. Existing entries of `self` are left untouched.
    pub fn merge(&mut self, src: &PropertyMap) {
        self.merge_filtered(src, |_| true);
    }

    /// Like [`merge`](Self::merge), but only for entries accepted by `filter`.
    pub fn merge_filtered(&mut self, src: &PropertyMap, mut filter: impl FnMut(&PropertyEntry) -> bool) {
        for entry in src.iter_shared() {
            if self.contains(&entry.key) || !filter(entry) {
                continue;
            }
            self.insert_entry(Arc::clone(entry));
        }
    }

    /// Iterate over entries in bucket order.
    pub fn iter(&self) -> impl Iterator<Item = &PropertyEntry> {
        self.iter_shared().map(|e| e.as_ref())
    }

    /// Iterate over the shared entries in bucket order.
    pub fn iter_shared(&self) -> impl Iterator<Item = &Arc<PropertyEntry>> {
        self.buckets.iter().flat_map(|b| b.iter())
    }

    /// Whether both maps hold the very same entry for `key` (or both lack it).
    pub fn shares_entry(&self, other: &PropertyMap, key: &PropertyKey) -> bool {
        match (self.entry(key), other.entry(key)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        }
    }

    fn insert_entry(&mut self, entry: Arc<PropertyEntry>) {
        if entry.key == PropertyKey::Code(codes::TIMESCALE) {
            self.timescale = entry.value.as_u32().unwrap_or(0);
        }
        let index = bucket_of(&entry.key);
        self.buckets[index].push(entry);
        self.len += 1;
    }
}

impl Default for PropertyMap {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PropertyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.iter().map(|e| (e.name(), e.value())))
            .finish()
    }
}

impl PartialEq for PropertyMap {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().all(|e| other.get(&e.key) == Some(&e.value))
    }
}
