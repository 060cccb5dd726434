//! Storage contracts used by the pipeline. Implementations live in `facegate-store`.

use thiserror::Error;

use crate::error::StorageError;
use crate::types::{AccessEvent, EventId, Identity, IdentityId, NewAccessEvent, NewIdentity, SnapshotRef};

#[derive(Error, Debug)]
pub enum InsertError {
    /// Another identity already holds this credential token.
    #[error("credential token already in use")]
    DuplicateCredential,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Enrollment records, one per identity.
///
/// Token uniqueness is enforced by the store on insert, never by a
/// caller-side lookup beforehand.
pub trait TemplateStore: Send + Sync {
    fn find_by_credential(&self, token: &str) -> Result<Option<Identity>, StorageError>;
    fn insert(&self, identity: NewIdentity) -> Result<Identity, InsertError>;
    fn delete(&self, id: IdentityId) -> Result<Option<Identity>, StorageError>;
    fn list_all(&self) -> Result<Vec<Identity>, StorageError>;
}

/// Append-only record of access decisions.
pub trait AuditLedger: Send + Sync {
    /// Append atomically. Rejects events whose snapshot presence disagrees with the outcome.
    fn append(&self, event: NewAccessEvent) -> Result<AccessEvent, StorageError>;
    /// Most recent first.
    fn recent(&self, limit: usize) -> Result<Vec<AccessEvent>, StorageError>;
    fn get(&self, id: EventId) -> Result<Option<AccessEvent>, StorageError>;
}

/// Durable image storage for incident snapshots and enrollment photos.
pub trait SnapshotStore: Send + Sync {
    /// Persist `bytes` durably. The returned name never collides with an
    /// existing object, even for identical `suggested_name`s.
    fn save(&self, bytes: &[u8], suggested_name: &str) -> Result<SnapshotRef, StorageError>;
    fn remove(&self, snapshot: &SnapshotRef) -> Result<(), StorageError>;
}
