//! Durable record storage.
//!
//! Record bodies and per-collection manifests live in the CAS; SQLite keeps
//! the version index, the head pointer and the version counter.

pub mod sqlite_storage;

pub use sqlite_storage::SqliteVersionStorage;
