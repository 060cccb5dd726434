use std::path::PathBuf;

use crate::error::GateError;

/// Where an image comes from. Resolved once, before any extraction.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Bytes(Vec<u8>),
    FilePath(PathBuf),
}

/// An encoded image held in memory for the duration of one operation.
///
/// Extraction borrows it and snapshot persistence writes the same bytes, so
/// no stage consumes the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub bytes: Vec<u8>,
}

impl ImageSource {
    pub fn resolve(self, field: &str) -> Result<Frame, GateError> {
        let bytes = match self {
            ImageSource::Bytes(bytes) => bytes,
            ImageSource::FilePath(path) => std::fs::read(&path).map_err(|e| {
                GateError::Input(format!("{field}: cannot read {}: {e}", path.display()))
            })?,
        };
        if bytes.is_empty() {
            return Err(GateError::Input(format!("{field} is missing")));
        }
        Ok(Frame { bytes })
    }
}

impl From<Vec<u8>> for ImageSource {
    fn from(bytes: Vec<u8>) -> Self {
        ImageSource::Bytes(bytes)
    }
}

impl From<PathBuf> for ImageSource {
    fn from(path: PathBuf) -> Self {
        ImageSource::FilePath(path)
    }
}
