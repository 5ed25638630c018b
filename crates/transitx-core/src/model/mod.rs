pub mod snapshot;
pub mod status;
pub mod transit;

pub use snapshot::{Snapshot, SnapshotKey, SnapshotMetadata};
pub use status::Status;
pub use transit::{Agency, Route, ServiceCalendar, Stop, Trip};
