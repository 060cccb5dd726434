//! facegate-store — Persistence for enrollment templates, the access ledger
//! and stored images.

pub mod snapshots;
pub mod sqlite;

pub use snapshots::FsSnapshotStore;
pub use sqlite::SqliteStore;
