//! Row-level snapshot queries.
//!
//! Plain functions over a connection or transaction. The registry composes
//! them; nothing here takes locks or logs.

#![allow(clippy::result_large_err)]

use crate::errors::{from_rusqlite, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use transitx_core::model::{Snapshot, SnapshotKey, SnapshotMetadata};
use transitx_core_types::{DatasetId, Version};

const SNAPSHOT_COLUMNS: &str = "dataset_id, version, name, comment, valid_from, valid_to,
     feed_version_id, snapshot_time, is_current, is_obsolete";

/// Insert a new snapshot row (never current)
pub fn insert_snapshot(
    conn: &Connection,
    key: &SnapshotKey,
    metadata: &SnapshotMetadata,
    snapshot_time: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO snapshots (
            dataset_id, version, name, comment, valid_from, valid_to,
            feed_version_id, snapshot_time, is_current, is_obsolete
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0)
        "#,
        rusqlite::params![
            key.dataset_id.as_str(),
            key.version.get() as i64,
            metadata.name,
            metadata.comment,
            metadata.valid_from.map(|d| d.to_string()),
            metadata.valid_to.map(|d| d.to_string()),
            metadata.feed_version_id,
            snapshot_time.timestamp_millis(),
        ],
    )
    .map_err(from_rusqlite)?;
    Ok(())
}

pub fn snapshot_exists(conn: &Connection, key: &SnapshotKey) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM snapshots WHERE dataset_id = ?1 AND version = ?2",
            rusqlite::params![key.dataset_id.as_str(), key.version.get() as i64],
            |_| Ok(()),
        )
        .optional()
        .map_err(from_rusqlite)?;
    Ok(found.is_some())
}

pub fn fetch_snapshot(conn: &Connection, key: &SnapshotKey) -> Result<Option<Snapshot>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM snapshots WHERE dataset_id = ?1 AND version = ?2",
            SNAPSHOT_COLUMNS
        ),
        rusqlite::params![key.dataset_id.as_str(), key.version.get() as i64],
        row_to_snapshot,
    )
    .optional()
    .map_err(from_rusqlite)
}

pub fn fetch_current(conn: &Connection, dataset_id: &DatasetId) -> Result<Option<Snapshot>> {
    conn.query_row(
        &format!(
            "SELECT {} FROM snapshots WHERE dataset_id = ?1 AND is_current = 1",
            SNAPSHOT_COLUMNS
        ),
        [dataset_id.as_str()],
        row_to_snapshot,
    )
    .optional()
    .map_err(from_rusqlite)
}

/// Up to `limit` snapshots of a dataset with version greater than `after`
///
/// Walks the primary key, so each page is a bounded range scan.
pub fn fetch_page(
    conn: &Connection,
    dataset_id: &DatasetId,
    after: Version,
    limit: usize,
) -> Result<Vec<Snapshot>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {} FROM snapshots
             WHERE dataset_id = ?1 AND version > ?2
             ORDER BY version
             LIMIT ?3",
            SNAPSHOT_COLUMNS
        ))
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map(
            rusqlite::params![dataset_id.as_str(), after.get() as i64, limit as i64],
            row_to_snapshot,
        )
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    Ok(rows)
}

pub fn update_metadata(
    conn: &Connection,
    key: &SnapshotKey,
    metadata: &SnapshotMetadata,
) -> Result<usize> {
    conn.execute(
        r#"
        UPDATE snapshots
        SET name = ?3, comment = ?4, valid_from = ?5, valid_to = ?6, feed_version_id = ?7
        WHERE dataset_id = ?1 AND version = ?2
        "#,
        rusqlite::params![
            key.dataset_id.as_str(),
            key.version.get() as i64,
            metadata.name,
            metadata.comment,
            metadata.valid_from.map(|d| d.to_string()),
            metadata.valid_to.map(|d| d.to_string()),
            metadata.feed_version_id,
        ],
    )
    .map_err(from_rusqlite)
}

pub fn set_obsolete(conn: &Connection, key: &SnapshotKey) -> Result<usize> {
    conn.execute(
        "UPDATE snapshots SET is_obsolete = 1 WHERE dataset_id = ?1 AND version = ?2",
        rusqlite::params![key.dataset_id.as_str(), key.version.get() as i64],
    )
    .map_err(from_rusqlite)
}

/// Clear every current flag of the dataset except the one on `keep`
pub fn clear_current(conn: &Connection, dataset_id: &DatasetId, keep: Version) -> Result<usize> {
    conn.execute(
        "UPDATE snapshots SET is_current = 0
         WHERE dataset_id = ?1 AND is_current = 1 AND version <> ?2",
        rusqlite::params![dataset_id.as_str(), keep.get() as i64],
    )
    .map_err(from_rusqlite)
}

pub fn set_current(conn: &Connection, key: &SnapshotKey) -> Result<usize> {
    conn.execute(
        "UPDATE snapshots SET is_current = 1 WHERE dataset_id = ?1 AND version = ?2",
        rusqlite::params![key.dataset_id.as_str(), key.version.get() as i64],
    )
    .map_err(from_rusqlite)
}

/// Number of current snapshots per dataset that has any
pub fn current_counts(conn: &Connection) -> Result<Vec<(String, i64)>> {
    let mut stmt = conn
        .prepare(
            "SELECT dataset_id, COUNT(*) FROM snapshots
             WHERE is_current = 1 GROUP BY dataset_id ORDER BY dataset_id",
        )
        .map_err(from_rusqlite)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(from_rusqlite)?
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(from_rusqlite)?;
    Ok(rows)
}

fn row_to_snapshot(row: &rusqlite::Row<'_>) -> rusqlite::Result<Snapshot> {
    let version: i64 = row.get(1)?;
    let snapshot_time_ms: i64 = row.get(7)?;
    let snapshot_time = DateTime::<Utc>::from_timestamp_millis(snapshot_time_ms)
        .ok_or_else(|| conversion_error(7, Type::Integer, "snapshot_time out of range"))?;

    Ok(Snapshot {
        key: SnapshotKey::new(row.get::<_, String>(0)?, version as u64),
        metadata: SnapshotMetadata {
            name: row.get(2)?,
            comment: row.get(3)?,
            valid_from: parse_date(row, 4)?,
            valid_to: parse_date(row, 5)?,
            feed_version_id: row.get(6)?,
        },
        current: row.get::<_, i64>(8)? == 1,
        obsolete: row.get::<_, i64>(9)? == 1,
        snapshot_time,
    })
}

fn parse_date(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<NaiveDate>> {
    match row.get::<_, Option<String>>(idx)? {
        None => Ok(None),
        Some(text) => NaiveDate::parse_from_str(&text, "%Y-%m-%d")
            .map(Some)
            .map_err(|_| conversion_error(idx, Type::Text, "invalid ISO date")),
    }
}

fn conversion_error(idx: usize, ty: Type, message: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, ty, message.to_string().into())
}
