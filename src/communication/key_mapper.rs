//! KeyMapper
//!
//! Bidirectional mapping between items and the opaque string keys handed to
//! the client. Keys come from a counter that only moves forward, so a dropped
//! key string is never handed out again for a different item.

use crate::data::GridItem;
use crate::error::{Error, Result};
use ahash::AHashMap;

/// Item ↔ key cache
#[derive(Debug)]
pub struct KeyMapper<T: GridItem> {
    id_to_key: AHashMap<T::Id, String>,
    key_to_item: AHashMap<String, T>,
    last_key: u64,
}

impl<T: GridItem> KeyMapper<T> {
    pub fn new() -> Self {
        Self {
            id_to_key: AHashMap::new(),
            key_to_item: AHashMap::new(),
            last_key: 0,
        }
    }

    /// Key for an item, creating one if the item is not mapped yet.
    ///
    /// A mapped item's stored copy is replaced by `item`, so the latest
    /// fetched data is what [`KeyMapper::get`] returns.
    pub fn key(&mut self, item: &T) -> String {
        let id = item.id();
        if let Some(key) = self.id_to_key.get(&id) {
            self.key_to_item.insert(key.clone(), item.clone());
            return key.clone();
        }
        self.last_key += 1;
        let key = self.last_key.to_string();
        self.id_to_key.insert(id, key.clone());
        self.key_to_item.insert(key.clone(), item.clone());
        key
    }

    /// Existing key of an item, without creating one
    pub fn key_of(&self, item: &T) -> Option<&str> {
        self.key_of_id(&item.id())
    }

    /// Existing key for an id
    pub fn key_of_id(&self, id: &T::Id) -> Option<&str> {
        self.id_to_key.get(id).map(String::as_str)
    }

    /// Item mapped to a key
    pub fn get(&self, key: &str) -> Result<&T> {
        self.key_to_item.get(key).ok_or_else(|| Error::UnknownKey {
            key: key.to_string(),
        })
    }

    pub fn has(&self, item: &T) -> bool {
        self.id_to_key.contains_key(&item.id())
    }

    pub fn has_key(&self, key: &str) -> bool {
        self.key_to_item.contains_key(key)
    }

    /// Replace the stored copy of an already mapped item; returns its key
    pub fn refresh(&mut self, item: &T) -> Option<String> {
        let key = self.id_to_key.get(&item.id())?.clone();
        self.key_to_item.insert(key.clone(), item.clone());
        Some(key)
    }

    /// Drop the mapping of an item, returning the released key
    pub fn remove(&mut self, item: &T) -> Option<String> {
        self.remove_id(&item.id())
    }

    /// Drop the mapping of an id
    pub fn remove_id(&mut self, id: &T::Id) -> Option<String> {
        let key = self.id_to_key.remove(id)?;
        self.key_to_item.remove(&key);
        Some(key)
    }

    /// Drop the mapping of a key
    pub fn remove_key(&mut self, key: &str) -> Option<T> {
        let item = self.key_to_item.remove(key)?;
        self.id_to_key.remove(&item.id());
        Some(item)
    }

    /// Drop every mapping; the key counter keeps going
    pub fn remove_all(&mut self) {
        self.id_to_key.clear();
        self.key_to_item.clear();
    }

    pub fn len(&self) -> usize {
        self.key_to_item.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_to_item.is_empty()
    }
}

impl<T: GridItem> Default for KeyMapper<T> {
    fn default() -> Self {
        Self::new()
    }
}
