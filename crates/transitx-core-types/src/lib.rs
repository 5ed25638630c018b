//! Core types shared across TransitX crates
//!
//! This crate provides the identifier types and canonical constants used by
//! the record store, the snapshot registry and the job framework:
//!
//! - **Identifiers**: DatasetId, Version, OwnerId, JobId
//! - **Schema constants**: Canonical field keys and event names for logging

pub mod ids;
pub mod schema;

pub use ids::{DatasetId, JobId, OwnerId, Version};
