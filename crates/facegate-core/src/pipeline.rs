//! Access decision pipeline.
//!
//! ```text
//! START → CREDENTIAL_LOOKUP → UNKNOWN_CREDENTIAL                       → DENIED
//!                           → FEATURE_EXTRACTION → NO_FACE_DETECTED   → DENIED
//!                                                → MATCH_EVALUATION   → GRANTED | DENIED
//! ```
//!
//! Every run ends in exactly one ledger append. Denials store an incident
//! snapshot first; the ledger entry is only written once the snapshot is
//! durable. No stage retries.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;

use crate::error::GateError;
use crate::extractor::{ExtractError, FeatureExtractor};
use crate::image_source::{Frame, ImageSource};
use crate::matcher;
use crate::store::{AuditLedger, InsertError, SnapshotStore, TemplateStore};
use crate::types::{
    EventId, FaceRegion, Identity, NewAccessEvent, NewIdentity, Outcome, SnapshotRef, UNKNOWN_SUBJECT,
};

/// Length of a generated credential token.
pub const TOKEN_LEN: usize = 8;

/// Fresh tokens tried per enrollment before giving up with `DuplicateCredential`.
const MAX_TOKEN_ATTEMPTS: usize = 3;

/// What the caller learns from one decision.
#[derive(Debug, Clone, Serialize)]
pub struct AccessDecision {
    pub outcome: Outcome,
    /// `None` when the credential matched no identity.
    pub subject_name: Option<String>,
    /// 0 whenever no score could be computed.
    pub similarity_percent: u8,
    pub face_region: Option<FaceRegion>,
    /// Human-readable denial reason; `None` when granted.
    pub reason: Option<String>,
    pub event_id: EventId,
    pub snapshot_ref: Option<SnapshotRef>,
}

impl AccessDecision {
    pub fn status_code(&self) -> u16 {
        self.outcome.status_code()
    }
}

/// Result of the evaluation stages, before side effects.
struct Evaluation {
    outcome: Outcome,
    subject: Option<String>,
    similarity_percent: u8,
    face_region: Option<FaceRegion>,
    reason: Option<String>,
}

type TokenSource = Box<dyn Fn() -> String + Send + Sync>;

/// Orchestrates credential lookup, extraction, matching and the audit trail.
///
/// Holds no mutable state of its own; concurrent calls only meet at the
/// storage layer.
pub struct AccessPipeline {
    extractor: Arc<dyn FeatureExtractor>,
    templates: Arc<dyn TemplateStore>,
    ledger: Arc<dyn AuditLedger>,
    incidents: Arc<dyn SnapshotStore>,
    photos: Arc<dyn SnapshotStore>,
    token_source: TokenSource,
}

impl AccessPipeline {
    pub fn new(
        extractor: Arc<dyn FeatureExtractor>,
        templates: Arc<dyn TemplateStore>,
        ledger: Arc<dyn AuditLedger>,
        incidents: Arc<dyn SnapshotStore>,
        photos: Arc<dyn SnapshotStore>,
    ) -> Self {
        Self {
            extractor,
            templates,
            ledger,
            incidents,
            photos,
            token_source: Box::new(generate_token),
        }
    }

    /// Replace the credential token generator.
    pub fn with_token_source(mut self, source: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.token_source = Box::new(source);
        self
    }

    /// Decide whether the holder of `credential_token` may enter.
    pub fn decide(&self, credential_token: &str, live: ImageSource) -> Result<AccessDecision, GateError> {
        if credential_token.trim().is_empty() {
            return Err(GateError::Input("credential token is missing".into()));
        }
        let frame = live.resolve("frame")?;

        let evaluation = match self.templates.find_by_credential(credential_token)? {
            None => self.evaluate_unknown(credential_token, &frame),
            Some(identity) => self.evaluate_identity(&identity, &frame)?,
        };

        let snapshot = if evaluation.outcome.is_granted() {
            None
        } else {
            Some(self.capture_incident(&evaluation, &frame)?)
        };

        let subject_name = evaluation
            .subject
            .clone()
            .unwrap_or_else(|| UNKNOWN_SUBJECT.to_string());
        let event = match &snapshot {
            None => NewAccessEvent::granted(subject_name),
            Some(s) => NewAccessEvent::denied(subject_name, evaluation.outcome, s.clone()),
        };

        let event = match self.ledger.append(event) {
            Ok(event) => event,
            Err(e) => {
                if let Some(s) = &snapshot {
                    self.discard(&*self.incidents, s);
                }
                return Err(e.into());
            }
        };

        tracing::info!(
            event = %event.id,
            outcome = %evaluation.outcome,
            similarity = evaluation.similarity_percent,
            "access decision recorded"
        );

        Ok(AccessDecision {
            outcome: evaluation.outcome,
            subject_name: evaluation.subject,
            similarity_percent: evaluation.similarity_percent,
            face_region: evaluation.face_region,
            reason: evaluation.reason,
            event_id: event.id,
            snapshot_ref: event.snapshot_ref,
        })
    }

    /// Enroll a new identity from one photo.
    ///
    /// Nothing is persisted unless a face is found. The photo and the
    /// identity are stored together: if the insert fails the photo is removed.
    pub fn enroll(&self, display_name: &str, photo: ImageSource) -> Result<Identity, GateError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(GateError::Input("name is missing".into()));
        }
        let frame = photo.resolve("photo")?;

        let extraction = match self.extractor.extract(&frame) {
            Ok(extraction) => extraction,
            Err(ExtractError::NoFaceDetected) => {
                tracing::info!(name = display_name, "enroll: no face detected");
                return Err(GateError::NoFaceDetected);
            }
            Err(ExtractError::Undecodable(e)) => {
                return Err(GateError::Input(format!("photo is not a readable image: {e}")));
            }
            Err(ExtractError::Backend(e)) => return Err(GateError::Extractor(e)),
        };
        let template = extraction.features.encode();

        let photo_ref = self.photos.save(&frame.bytes, "face")?;

        for attempt in 1..=MAX_TOKEN_ATTEMPTS {
            let candidate = NewIdentity {
                display_name: display_name.to_string(),
                credential_token: (self.token_source)(),
                template: template.clone(),
                photo_ref: Some(photo_ref.clone()),
                created_at: Utc::now(),
            };
            match self.templates.insert(candidate) {
                Ok(identity) => {
                    tracing::info!(
                        id = %identity.id,
                        name = display_name,
                        dims = extraction.features.len(),
                        "identity enrolled"
                    );
                    return Ok(identity);
                }
                Err(InsertError::DuplicateCredential) => {
                    tracing::warn!(attempt, "generated credential token collided; regenerating");
                }
                Err(InsertError::Storage(e)) => {
                    self.discard(&*self.photos, &photo_ref);
                    return Err(e.into());
                }
            }
        }

        self.discard(&*self.photos, &photo_ref);
        Err(GateError::DuplicateCredential)
    }

    fn evaluate_unknown(&self, credential_token: &str, frame: &Frame) -> Evaluation {
        tracing::info!(token = %redact(credential_token), "unknown credential presented");

        // Face position only feeds operator feedback; failures here never change the outcome.
        let face_region = match self.extractor.extract(frame) {
            Ok(extraction) => Some(extraction.region),
            Err(ExtractError::Backend(e)) => {
                tracing::warn!(error = %e, "extractor backend failed on unknown credential");
                None
            }
            Err(e) => {
                tracing::debug!(error = %e, "no face region for unknown credential");
                None
            }
        };

        Evaluation {
            outcome: Outcome::DeniedUnknownCredential,
            subject: None,
            similarity_percent: 0,
            face_region,
            reason: Some("unknown credential".into()),
        }
    }

    fn evaluate_identity(&self, identity: &Identity, frame: &Frame) -> Result<Evaluation, GateError> {
        let reference = identity.template.decode()?;

        let extraction = match self.extractor.extract(frame) {
            Ok(extraction) => extraction,
            Err(ExtractError::NoFaceDetected) | Err(ExtractError::Undecodable(_)) => {
                tracing::info!(id = %identity.id, "verify: no face in live frame");
                return Ok(Evaluation {
                    outcome: Outcome::DeniedBiometricMismatch,
                    subject: Some(identity.display_name.clone()),
                    similarity_percent: 0,
                    face_region: None,
                    reason: Some("no face detected".into()),
                });
            }
            Err(ExtractError::Backend(e)) => return Err(GateError::Extractor(e)),
        };

        let result = matcher::score(&reference, &extraction.features)?;
        tracing::debug!(
            id = %identity.id,
            similarity = result.similarity_percent,
            matched = result.is_match,
            "verify: match evaluated"
        );

        let (outcome, reason) = if result.is_match {
            (Outcome::Granted, None)
        } else {
            (
                Outcome::DeniedBiometricMismatch,
                Some(format!("low similarity ({}%)", result.similarity_percent)),
            )
        };

        Ok(Evaluation {
            outcome,
            subject: Some(identity.display_name.clone()),
            similarity_percent: result.similarity_percent,
            face_region: Some(extraction.region),
            reason,
        })
    }

    fn capture_incident(&self, evaluation: &Evaluation, frame: &Frame) -> Result<SnapshotRef, GateError> {
        let suggested = match &evaluation.subject {
            None => "unknown".to_string(),
            Some(name) => format!("fail_{name}"),
        };
        let snapshot = self.incidents.save(&frame.bytes, &suggested)?;
        tracing::debug!(snapshot = %snapshot, "incident snapshot stored");
        Ok(snapshot)
    }

    /// Remove an object written earlier in a failed operation. Logs on failure.
    fn discard(&self, store: &dyn SnapshotStore, snapshot: &SnapshotRef) {
        if let Err(e) = store.remove(snapshot) {
            tracing::warn!(snapshot = %snapshot, error = %e, "failed to remove orphaned file");
        }
    }
}

/// Random 8-character lowercase hex token.
pub fn generate_token() -> String {
    let mut token = uuid::Uuid::new_v4().simple().to_string();
    token.truncate(TOKEN_LEN);
    token
}

/// First two characters of a token, for logs.
fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(2).collect();
    format!("{prefix}…")
}
