//! Referential integrity check over one dataset version
//!
//! Feed business rules live elsewhere; this only checks that trips point at
//! known routes and stops and routes at known agencies.

#![allow(clippy::result_large_err)]

use serde::Serialize;
use std::sync::Arc;
use transitx_core::errors::{ExError, ExErrorKind};
use transitx_core::model::transit::{AGENCIES, ROUTES, STOPS, TRIPS};
use transitx_core::model::{Route, Trip};
use transitx_core::store::{ReadTx, VersionedStore};
use transitx_core_types::{DatasetId, Version};

use crate::errors::Result;
use crate::jobs::{JobContext, JobLogic};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub version: u64,
    pub agencies: usize,
    pub routes: usize,
    pub stops: usize,
    pub trips: usize,
    pub issues: Vec<String>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "Validated {} routes, {} stops, {} trips: {} issues",
            self.routes,
            self.stops,
            self.trips,
            self.issues.len()
        )
    }
}

/// Check references inside the version `read` is pinned to
pub fn validate_dataset(read: &ReadTx) -> ValidationReport {
    let count = |name: &str| read.get_map(name).map_or(0, |m| m.len());
    let has = |name: &str, key: &str| read.get_map(name).is_some_and(|m| m.contains_key(key));

    let mut report = ValidationReport {
        version: read.version().get(),
        agencies: count(AGENCIES),
        routes: count(ROUTES),
        stops: count(STOPS),
        trips: count(TRIPS),
        issues: Vec::new(),
    };

    if let Some(routes) = read.get_map(ROUTES) {
        for (key, record) in routes.iter() {
            match serde_json::from_value::<Route>(record.as_ref().clone()) {
                Ok(route) => {
                    if let Some(agency) = &route.agency_id {
                        if report.agencies > 0 && !has(AGENCIES, agency.as_str()) {
                            report
                                .issues
                                .push(format!("route {} references unknown agency {}", key, agency));
                        }
                    }
                }
                Err(e) => report.issues.push(format!("route {} is malformed: {}", key, e)),
            }
        }
    }

    if let Some(trips) = read.get_map(TRIPS) {
        for (key, record) in trips.iter() {
            let trip = match serde_json::from_value::<Trip>(record.as_ref().clone()) {
                Ok(trip) => trip,
                Err(e) => {
                    report.issues.push(format!("trip {} is malformed: {}", key, e));
                    continue;
                }
            };
            if !has(ROUTES, trip.route_id.as_str()) {
                report
                    .issues
                    .push(format!("trip {} references unknown route {}", key, trip.route_id));
            }
            for stop in trip.stop_ids.iter().filter(|s| !has(STOPS, s.as_str())) {
                report
                    .issues
                    .push(format!("trip {} references unknown stop {}", key, stop));
            }
        }
    }

    report
}

/// Validates a dataset version and reports counts in its status
pub struct ValidateFeedJob {
    store: Arc<VersionedStore>,
    dataset_id: DatasetId,
    version: Option<Version>,
    fail_on_issues: bool,
}

impl ValidateFeedJob {
    pub fn new(store: Arc<VersionedStore>, dataset_id: impl Into<DatasetId>) -> Self {
        Self {
            store,
            dataset_id: dataset_id.into(),
            version: None,
            fail_on_issues: false,
        }
    }

    pub fn at_version(mut self, version: Version) -> Self {
        self.version = Some(version);
        self
    }

    /// Finish as failed when any issue is found
    pub fn strict(mut self) -> Self {
        self.fail_on_issues = true;
        self
    }
}

impl JobLogic for ValidateFeedJob {
    fn run(&mut self, ctx: &mut JobContext) -> Result<()> {
        ctx.update(format!("Validating {}...", self.dataset_id), 10.0);
        let read = match self.version {
            Some(version) => self.store.open_read_at(&self.dataset_id, version)?,
            None => self.store.open_read(&self.dataset_id)?,
        };
        ctx.checkpoint()?;

        let report = validate_dataset(&read);
        for issue in report.issues.iter().take(20) {
            tracing::debug!(dataset_id = %self.dataset_id, issue = %issue, "Validation issue");
        }
        ctx.set_completed_name(serde_json::to_string(&report)?);

        if self.fail_on_issues && !report.is_clean() {
            let err = ExError::new(ExErrorKind::InvalidInput)
                .with_op("validate_feed")
                .with_dataset_id(self.dataset_id.clone())
                .with_message(format!("{} referential issues", report.issues.len()));
            ctx.fail(report.summary(), &err);
        } else {
            ctx.complete(report.summary());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use transitx_core::WriteConflictPolicy;

    fn seeded() -> (Arc<VersionedStore>, DatasetId) {
        let store = Arc::new(VersionedStore::in_memory(WriteConflictPolicy::Fail));
        let bart = DatasetId::from("BART");
        let mut tx = store.open_write(&bart).unwrap();
        tx.get_map_mut(AGENCIES).insert(
            "BART",
            json!({ "id": "BART", "name": "BART", "timezone": "America/Los_Angeles" }),
        );
        tx.get_map_mut(ROUTES)
            .insert("R1", json!({ "id": "R1", "agencyId": "BART", "routeType": 1 }));
        tx.get_map_mut(STOPS)
            .insert("EMBR", json!({ "id": "EMBR", "name": "Embarcadero", "lat": 37.79, "lon": -122.39 }));
        tx.get_map_mut(TRIPS)
            .insert("T1", json!({ "id": "T1", "routeId": "R1", "stopIds": ["EMBR"] }));
        tx.commit().unwrap();
        (store, bart)
    }

    #[test]
    fn test_clean_dataset() {
        let (store, bart) = seeded();
        let report = validate_dataset(&store.open_read(&bart).unwrap());
        assert!(report.is_clean(), "{:?}", report.issues);
        assert_eq!((report.routes, report.stops, report.trips), (1, 1, 1));
    }

    #[test]
    fn test_malformed_trip_is_an_issue() {
        let (store, bart) = seeded();
        let mut tx = store.open_write(&bart).unwrap();
        tx.get_map_mut(TRIPS).insert("T3", json!({ "id": "T3" }));
        tx.commit().unwrap();

        let report = validate_dataset(&store.open_read(&bart).unwrap());
        assert_eq!(report.issues.len(), 1);
        assert!(report.issues[0].starts_with("trip T3 is malformed"));
    }

    #[test]
    fn test_dangling_references_are_reported() {
        let (store, bart) = seeded();
        let mut tx = store.open_write(&bart).unwrap();
        tx.get_map_mut(TRIPS)
            .insert("T2", json!({ "id": "T2", "routeId": "R9", "stopIds": ["EMBR", "XXXX"] }));
        tx.get_map_mut(ROUTES)
            .insert("R2", json!({ "id": "R2", "agencyId": "AC", "routeType": 3 }));
        tx.commit().unwrap();

        let report = validate_dataset(&store.open_read(&bart).unwrap());
        assert_eq!(report.issues.len(), 3);
        assert!(report.issues.iter().any(|i| i.contains("unknown route R9")));
        assert!(report.issues.iter().any(|i| i.contains("unknown stop XXXX")));
        assert!(report.issues.iter().any(|i| i.contains("unknown agency AC")));
    }
}
