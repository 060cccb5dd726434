use thiserror::Error;

use crate::matcher::IncompatibleTemplate;
use crate::template::TemplateError;

/// Persistence layer failure. Always fatal for the operation that hit it.
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(String),
    #[error("file store error: {0}")]
    Io(#[from] std::io::Error),
    #[error("record rejected: {0}")]
    Rejected(String),
}

/// Failures of a decision or enrollment.
///
/// Expected biometric results (unknown credential, low score, no face on the
/// live frame) are decision outcomes, not errors.
#[derive(Error, Debug)]
pub enum GateError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("no face detected in enrollment photo")]
    NoFaceDetected,
    #[error("incompatible template: {0}")]
    IncompatibleTemplate(String),
    #[error("credential token already in use")]
    DuplicateCredential,
    #[error("storage failure: {0}")]
    Storage(#[from] StorageError),
    #[error("feature extractor failed: {0}")]
    Extractor(String),
}

impl GateError {
    /// HTTP-style status for callers that surface errors over a request/response transport.
    pub fn status_code(&self) -> u16 {
        match self {
            GateError::Input(_) | GateError::NoFaceDetected => 400,
            GateError::DuplicateCredential => 409,
            GateError::IncompatibleTemplate(_) | GateError::Storage(_) | GateError::Extractor(_) => 500,
        }
    }
}

impl From<IncompatibleTemplate> for GateError {
    fn from(e: IncompatibleTemplate) -> Self {
        GateError::IncompatibleTemplate(e.to_string())
    }
}

impl From<TemplateError> for GateError {
    fn from(e: TemplateError) -> Self {
        GateError::IncompatibleTemplate(e.to_string())
    }
}
