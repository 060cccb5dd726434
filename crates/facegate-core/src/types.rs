use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::template::Template;

/// Display name recorded for decisions where the credential matched no identity.
pub const UNKNOWN_SUBJECT: &str = "Unknown credential";

/// Row id of an enrolled identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityId(pub i64);

/// Row id of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub i64);

impl fmt::Display for IdentityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque pointer to a stored image (incident snapshot or enrollment photo).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SnapshotRef(pub String);

impl SnapshotRef {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SnapshotRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Face rectangle in pixel coordinates of the source frame.
///
/// Only used for operator feedback; never stored in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceRegion {
    pub x: u32,
    pub y: u32,
    #[serde(rename = "w")]
    pub width: u32,
    #[serde(rename = "h")]
    pub height: u32,
}

/// An enrollment record: one template and one credential token per person.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: IdentityId,
    pub display_name: String,
    pub credential_token: String,
    #[serde(skip_serializing)]
    pub template: Template,
    pub photo_ref: Option<SnapshotRef>,
    pub created_at: DateTime<Utc>,
}

/// Identity fields supplied at insert time; the store assigns the id.
#[derive(Debug, Clone)]
pub struct NewIdentity {
    pub display_name: String,
    pub credential_token: String,
    pub template: Template,
    pub photo_ref: Option<SnapshotRef>,
    pub created_at: DateTime<Utc>,
}

/// Terminal outcome of one access decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Granted,
    DeniedUnknownCredential,
    DeniedBiometricMismatch,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Granted => "GRANTED",
            Outcome::DeniedUnknownCredential => "DENIED_UNKNOWN_CREDENTIAL",
            Outcome::DeniedBiometricMismatch => "DENIED_BIOMETRIC_MISMATCH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "GRANTED" => Some(Outcome::Granted),
            "DENIED_UNKNOWN_CREDENTIAL" => Some(Outcome::DeniedUnknownCredential),
            "DENIED_BIOMETRIC_MISMATCH" => Some(Outcome::DeniedBiometricMismatch),
            _ => None,
        }
    }

    pub fn is_granted(&self) -> bool {
        matches!(self, Outcome::Granted)
    }

    /// HTTP-style status: 200 for entry, 403 for either denial.
    pub fn status_code(&self) -> u16 {
        if self.is_granted() {
            200
        } else {
            403
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable ledger record of one decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessEvent {
    pub id: EventId,
    pub timestamp: DateTime<Utc>,
    /// Display name at decision time; survives deletion of the identity.
    pub subject_name: String,
    pub outcome: Outcome,
    pub snapshot_ref: Option<SnapshotRef>,
}

/// Ledger entry before the ledger assigns its id and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAccessEvent {
    pub subject_name: String,
    pub outcome: Outcome,
    pub snapshot_ref: Option<SnapshotRef>,
}

impl NewAccessEvent {
    pub fn granted(subject_name: impl Into<String>) -> Self {
        Self {
            subject_name: subject_name.into(),
            outcome: Outcome::Granted,
            snapshot_ref: None,
        }
    }

    pub fn denied(subject_name: impl Into<String>, outcome: Outcome, snapshot: SnapshotRef) -> Self {
        Self {
            subject_name: subject_name.into(),
            outcome,
            snapshot_ref: Some(snapshot),
        }
    }

    /// A snapshot is present exactly when the outcome is a denial.
    pub fn is_consistent(&self) -> bool {
        self.outcome.is_granted() == self.snapshot_ref.is_none()
    }
}
