//! Transit feed entities stored in dataset collections
//!
//! Records are stored as JSON, so these types are a typed view for callers
//! that want one; the store accepts any serde-serializable value.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

pub const AGENCIES: &str = "agencies";
pub const ROUTES: &str = "routes";
pub const STOPS: &str = "stops";
pub const CALENDARS: &str = "calendars";
pub const EXCEPTIONS: &str = "exceptions";
pub const TRIP_PATTERNS: &str = "trip_patterns";
pub const TRIPS: &str = "trips";
pub const FARES: &str = "fares";

/// The collections every feed dataset is expected to carry
pub const ALL_COLLECTIONS: [&str; 8] = [
    AGENCIES,
    ROUTES,
    STOPS,
    CALENDARS,
    EXCEPTIONS,
    TRIP_PATTERNS,
    TRIPS,
    FARES,
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Agency {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
    pub timezone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Route {
    pub id: String,
    pub agency_id: Option<String>,
    pub short_name: Option<String>,
    pub long_name: Option<String>,
    /// GTFS route_type (0 tram, 1 subway, 3 bus, ...)
    pub route_type: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stop {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Trip {
    pub id: String,
    pub route_id: String,
    pub service_id: Option<String>,
    pub headsign: Option<String>,
    /// Stops served, in visiting order
    #[serde(default)]
    pub stop_ids: Vec<String>,
}

/// Weekly service pattern over a date range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceCalendar {
    pub id: String,
    pub description: Option<String>,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    /// Monday first
    pub days: [bool; 7],
}

impl ServiceCalendar {
    /// Whether the calendar runs on `date`
    pub fn runs_on(&self, date: NaiveDate) -> bool {
        use chrono::Datelike;
        date >= self.start_date
            && date <= self.end_date
            && self.days[date.weekday().num_days_from_monday() as usize]
    }
}
