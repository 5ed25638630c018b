use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::Arc;
use transitx_core_types::Version;

use super::record::CollectionMap;

/// Immutable image of one dataset version
///
/// Collections are shared by pointer with every other version that did not
/// modify them.
#[derive(Debug, Clone)]
pub struct VersionState {
    version: Version,
    base_version: Option<Version>,
    collections: BTreeMap<String, Arc<CollectionMap>>,
    committed_at: DateTime<Utc>,
}

impl VersionState {
    /// The state of a dataset nothing has been committed to yet
    pub fn empty() -> Self {
        Self {
            version: Version::ZERO,
            base_version: None,
            collections: BTreeMap::new(),
            committed_at: Utc::now(),
        }
    }

    pub fn new(
        version: Version,
        base_version: Option<Version>,
        collections: BTreeMap<String, Arc<CollectionMap>>,
        committed_at: DateTime<Utc>,
    ) -> Self {
        Self {
            version,
            base_version,
            collections,
            committed_at,
        }
    }

    pub fn version(&self) -> Version {
        self.version
    }

    /// Version this one was derived from
    pub fn base_version(&self) -> Option<Version> {
        self.base_version
    }

    pub fn committed_at(&self) -> DateTime<Utc> {
        self.committed_at
    }

    pub fn collection(&self, name: &str) -> Option<&Arc<CollectionMap>> {
        self.collections.get(name)
    }

    pub fn collections(&self) -> &BTreeMap<String, Arc<CollectionMap>> {
        &self.collections
    }

    pub fn collection_names(&self) -> impl Iterator<Item = &str> {
        self.collections.keys().map(String::as_str)
    }

    pub fn record_count(&self) -> usize {
        self.collections.values().map(|c| c.len()).sum()
    }

    /// A copy of this state under another version number, sharing all collections
    pub fn rebased(&self, version: Version) -> Self {
        Self {
            version,
            base_version: Some(self.version),
            collections: self.collections.clone(),
            committed_at: Utc::now(),
        }
    }

    /// Same collections with the same records, ignoring version numbers
    ///
    /// Empty collections are treated as absent.
    pub fn same_content(&self, other: &VersionState) -> bool {
        let non_empty = |s: &VersionState| {
            s.collections
                .iter()
                .filter(|(_, c)| !c.is_empty())
                .map(|(n, c)| (n.clone(), c.clone()))
                .collect::<Vec<_>>()
        };
        let (a, b) = (non_empty(self), non_empty(other));
        a.len() == b.len()
            && a.iter()
                .zip(b.iter())
                .all(|((na, ca), (nb, cb))| na == nb && (Arc::ptr_eq(ca, cb) || ca == cb))
    }

    /// True when both versions hold the very same collection allocation
    pub fn shares_collection(&self, other: &VersionState, name: &str) -> bool {
        match (self.collections.get(name), other.collections.get(name)) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
