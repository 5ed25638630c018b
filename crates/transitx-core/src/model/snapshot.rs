use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use transitx_core_types::{DatasetId, Version};

use crate::errors::{ExError, ExErrorKind, Result};

/// Identity of a snapshot: `(dataset, version)`
///
/// Orders by dataset id, then numerically by version, so all snapshots of
/// one dataset form a contiguous range.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotKey {
    pub dataset_id: DatasetId,
    pub version: Version,
}

impl SnapshotKey {
    pub fn new(dataset_id: impl Into<DatasetId>, version: impl Into<Version>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            version: version.into(),
        }
    }
}

impl std::fmt::Display for SnapshotKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.dataset_id, self.version)
    }
}

/// Parses `"<dataset>:<version>"`; the dataset part may itself contain colons
impl FromStr for SnapshotKey {
    type Err = ExError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || {
            ExError::new(ExErrorKind::InvalidInput)
                .with_op("parse_snapshot_key")
                .with_message(format!(
                    "Snapshot key '{}' is not of the form <dataset>:<version>",
                    s
                ))
        };
        let (dataset, version) = s.rsplit_once(':').ok_or_else(invalid)?;
        if dataset.trim().is_empty() {
            return Err(invalid());
        }
        let version: u64 = version.parse().map_err(|_| invalid())?;
        Ok(SnapshotKey::new(dataset, version))
    }
}

/// Caller-editable snapshot metadata
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotMetadata {
    pub name: String,
    pub comment: Option<String>,
    /// First service day for which the contained schedules are authoritative
    pub valid_from: Option<NaiveDate>,
    /// Last service day for which the contained schedules are authoritative
    pub valid_to: Option<NaiveDate>,
    /// Published feed version the snapshot was loaded from, if any
    pub feed_version_id: Option<String>,
}

impl SnapshotMetadata {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_valid_range(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.valid_from = Some(from);
        self.valid_to = Some(to);
        self
    }

    pub fn with_feed_version_id(mut self, id: impl Into<String>) -> Self {
        self.feed_version_id = Some(id.into());
        self
    }

    /// Reject inverted date ranges
    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.valid_from, self.valid_to) {
            if from > to {
                return Err(ExError::new(ExErrorKind::InvalidInput)
                    .with_op("validate_snapshot_metadata")
                    .with_message(format!(
                        "validFrom {} is after validTo {}",
                        from, to
                    )));
            }
        }
        Ok(())
    }
}

/// A named, retrievable point in a dataset's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub key: SnapshotKey,
    #[serde(flatten)]
    pub metadata: SnapshotMetadata,
    pub current: bool,
    /// Soft-deleted: kept for history, never promoted or restored again
    pub obsolete: bool,
    pub snapshot_time: DateTime<Utc>,
}

impl Snapshot {
    pub fn dataset_id(&self) -> &DatasetId {
        &self.key.dataset_id
    }

    pub fn version(&self) -> Version {
        self.key.version
    }

    pub fn is_current(&self) -> bool {
        self.current
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_ordering_groups_by_dataset() {
        let mut keys = vec![
            SnapshotKey::new("MUNI", 1u64),
            SnapshotKey::new("BART", 10u64),
            SnapshotKey::new("BART", 2u64),
        ];
        keys.sort();
        let rendered: Vec<String> = keys.iter().map(|k| k.to_string()).collect();
        assert_eq!(rendered, vec!["BART:2", "BART:10", "MUNI:1"]);
    }

    #[test]
    fn test_key_parse() {
        let key: SnapshotKey = "BART:3".parse().unwrap();
        assert_eq!(key, SnapshotKey::new("BART", 3u64));

        let key: SnapshotKey = "urn:feed:7".parse().unwrap();
        assert_eq!(key.dataset_id.as_str(), "urn:feed");
        assert_eq!(key.version, Version::new(7));
    }

    #[test]
    fn test_key_parse_rejects_garbage() {
        for bad in ["BART", "BART:x", ":3", "BART:-1"] {
            let err = bad.parse::<SnapshotKey>().unwrap_err();
            assert_eq!(err.kind(), ExErrorKind::InvalidInput, "input {}", bad);
        }
    }

    #[test]
    fn test_metadata_rejects_inverted_range() {
        let from = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        let to = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let meta = SnapshotMetadata::new("summer").with_valid_range(from, to);
        assert_eq!(meta.validate().unwrap_err().kind(), ExErrorKind::InvalidInput);

        let meta = SnapshotMetadata::new("summer").with_valid_range(to, from);
        assert!(meta.validate().is_ok());
    }
}
