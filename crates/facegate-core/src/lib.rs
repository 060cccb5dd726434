//! facegate-core — Two-factor access decisions.
//!
//! Combines a presented credential token with a live face match against an
//! enrollment template, then records the outcome in an append-only ledger.
//! Storage, image decoding and feature extraction are reached through the
//! traits in [`store`] and [`extractor`].

pub mod admin;
pub mod error;
pub mod extractor;
pub mod image_source;
pub mod matcher;
pub mod pipeline;
pub mod store;
pub mod template;
pub mod types;

pub use error::{GateError, StorageError};
pub use extractor::{ExtractError, Extraction, FeatureExtractor};
pub use image_source::{Frame, ImageSource};
pub use matcher::{score, MatchResult, MATCH_THRESHOLD_PERCENT};
pub use pipeline::{AccessDecision, AccessPipeline};
pub use store::{AuditLedger, InsertError, SnapshotStore, TemplateStore};
pub use template::{FeatureVector, Template, TemplateError};
pub use types::{AccessEvent, EventId, FaceRegion, Identity, IdentityId, NewAccessEvent, NewIdentity, Outcome, SnapshotRef};
