//! Feature vectors and their at-rest binary encoding.
//!
//! Layout (all integers little-endian):
//!
//! ```text
//! 0..4   magic "FGFV"
//! 4      format version
//! 5      element kind (1 = f32)
//! 6..10  element count N (u32)
//! 10..   N * 4 bytes of f32 values
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

const TEMPLATE_MAGIC: [u8; 4] = *b"FGFV";
const TEMPLATE_VERSION: u8 = 1;
const ELEMENT_F32_LE: u8 = 1;
const HEADER_LEN: usize = 10;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum TemplateError {
    #[error("not a feature template (bad magic)")]
    BadMagic,
    #[error("unsupported template version {0}")]
    UnsupportedVersion(u8),
    #[error("unsupported element kind {0}")]
    UnsupportedElement(u8),
    #[error("template length mismatch: header says {expected} bytes of values, found {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("template contains a non-finite value at index {0}")]
    NonFinite(usize),
}

/// Fixed-length face feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub values: Vec<f32>,
}

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Encode into the versioned at-rest format.
    pub fn encode(&self) -> Template {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.values.len() * 4);
        bytes.extend_from_slice(&TEMPLATE_MAGIC);
        bytes.push(TEMPLATE_VERSION);
        bytes.push(ELEMENT_F32_LE);
        bytes.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        for v in &self.values {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        Template(bytes)
    }
}

/// Encoded feature vector as stored alongside an identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template(pub Vec<u8>);

impl Template {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn decode(&self) -> Result<FeatureVector, TemplateError> {
        let bytes = &self.0;
        if bytes.len() < HEADER_LEN || bytes[0..4] != TEMPLATE_MAGIC {
            return Err(TemplateError::BadMagic);
        }
        if bytes[4] != TEMPLATE_VERSION {
            return Err(TemplateError::UnsupportedVersion(bytes[4]));
        }
        if bytes[5] != ELEMENT_F32_LE {
            return Err(TemplateError::UnsupportedElement(bytes[5]));
        }

        let count = u32::from_le_bytes([bytes[6], bytes[7], bytes[8], bytes[9]]) as usize;
        let body = &bytes[HEADER_LEN..];
        let expected = count.saturating_mul(4);
        if body.len() != expected {
            return Err(TemplateError::LengthMismatch {
                expected,
                actual: body.len(),
            });
        }

        let mut values = Vec::with_capacity(count);
        for (i, chunk) in body.chunks_exact(4).enumerate() {
            let v = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
            if !v.is_finite() {
                return Err(TemplateError::NonFinite(i));
            }
            values.push(v);
        }

        Ok(FeatureVector { values })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let t = FeatureVector::new(vec![1.0, -2.5]).encode();
        let b = t.as_bytes();
        assert_eq!(&b[0..4], b"FGFV");
        assert_eq!(b[4], 1);
        assert_eq!(b[5], 1);
        assert_eq!(&b[6..10], &2u32.to_le_bytes());
        assert_eq!(&b[10..14], &1.0f32.to_le_bytes());
        assert_eq!(&b[14..18], &(-2.5f32).to_le_bytes());
        assert_eq!(b.len(), 18);
    }

    #[test]
    fn test_decode_preserves_bits() {
        let fv = FeatureVector::new(vec![0.1, 0.2, 0.3, f32::MIN_POSITIVE]);
        let decoded = fv.encode().decode().unwrap();
        let a: Vec<u32> = fv.values.iter().map(|v| v.to_bits()).collect();
        let b: Vec<u32> = decoded.values.iter().map(|v| v.to_bits()).collect();
        assert_eq!(a, b);
    }

    #[test]
    fn test_decode_rejects_legacy_blob() {
        // Arbitrary bytes, e.g. a language-specific serialized object.
        let t = Template(vec![0x80, 0x04, 0x95, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
        assert_eq!(t.decode(), Err(TemplateError::BadMagic));
        assert_eq!(Template(vec![]).decode(), Err(TemplateError::BadMagic));
    }

    #[test]
    fn test_decode_rejects_future_version() {
        let mut bytes = FeatureVector::new(vec![1.0]).encode().0;
        bytes[4] = 2;
        assert_eq!(Template(bytes).decode(), Err(TemplateError::UnsupportedVersion(2)));
    }

    #[test]
    fn test_decode_rejects_truncated_and_trailing() {
        let mut bytes = FeatureVector::new(vec![1.0, 2.0]).encode().0;
        bytes.pop();
        assert!(matches!(
            Template(bytes.clone()).decode(),
            Err(TemplateError::LengthMismatch { expected: 8, actual: 7 })
        ));
        bytes.extend_from_slice(&[0, 0]);
        assert!(matches!(
            Template(bytes).decode(),
            Err(TemplateError::LengthMismatch { expected: 8, actual: 9 })
        ));
    }

    #[test]
    fn test_decode_rejects_nan() {
        let mut bytes = FeatureVector::new(vec![1.0, 2.0]).encode().0;
        bytes[14..18].copy_from_slice(&f32::NAN.to_le_bytes());
        assert_eq!(Template(bytes).decode(), Err(TemplateError::NonFinite(1)));
    }
}
