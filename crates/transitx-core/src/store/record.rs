use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use crate::errors::RecordStoreError;

/// One stored entity. Shared between every version that did not change it.
pub type Record = Arc<serde_json::Value>;

/// Ordered, key-unique mapping backing one entity collection
///
/// Cloning copies the key index and record pointers, never record bodies.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionMap {
    name: String,
    entries: BTreeMap<String, Record>,
}

impl CollectionMap {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&Record> {
        self.entries.get(key)
    }

    /// Decode the record at `key` into `T`
    pub fn get_as<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, RecordStoreError> {
        match self.entries.get(key) {
            None => Ok(None),
            Some(record) => T::deserialize(record.as_ref())
                .map(Some)
                .map_err(|e| RecordStoreError::Decode {
                    collection: self.name.clone(),
                    key: key.to_string(),
                    message: e.to_string(),
                }),
        }
    }

    /// Insert or replace; returns the previous record
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) -> Option<Record> {
        self.entries.insert(key.into(), Arc::new(value))
    }

    /// Insert an already shared record without copying it
    pub fn insert_record(&mut self, key: impl Into<String>, record: Record) -> Option<Record> {
        self.entries.insert(key.into(), record)
    }

    /// Encode `value` and store it under `key`
    pub fn put_as<T: Serialize>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<Option<Record>, RecordStoreError> {
        let key = key.into();
        let encoded = serde_json::to_value(value).map_err(|e| RecordStoreError::Encode {
            collection: self.name.clone(),
            key: key.clone(),
            message: e.to_string(),
        })?;
        Ok(self.insert(key, encoded))
    }

    pub fn remove(&mut self, key: &str) -> Option<Record> {
        self.entries.remove(key)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Record)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Records with `start <= key < end`, in key order
    ///
    /// An inverted range yields nothing.
    pub fn range<'a>(
        &'a self,
        start: &'a str,
        end: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a Record)> + 'a {
        let start = if start <= end { start } else { end };
        self.entries
            .range::<str, _>((Bound::Included(start), Bound::Excluded(end)))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// Records whose key starts with `prefix`, in key order
    pub fn prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = (&'a str, &'a Record)> + 'a {
        self.entries
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.as_str(), v))
    }

    /// True when both maps point at the very same record for `key`
    pub fn shares_record(&self, other: &CollectionMap, key: &str) -> bool {
        match (self.entries.get(key), other.entries.get(key)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
