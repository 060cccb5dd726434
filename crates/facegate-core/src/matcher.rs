//! Match engine: distance between two feature vectors mapped to a percent score.
//!
//! Calibration for L2-normalised ArcFace embeddings: Euclidean distance `d`,
//! similarity `floor((1 - d²/2) * 100)` clamped to [0, 100]. For unit vectors
//! `1 - d²/2` is their cosine, so the score reads as cosine × 100. Accept at
//! 40% (cosine ≥ 0.40, `d <= sqrt(1.2) ≈ 1.095`). This threshold is the
//! security boundary of the whole system and is not configurable.

use crate::template::FeatureVector;
use serde::Serialize;
use thiserror::Error;

/// Minimum similarity percent for a positive match.
pub const MATCH_THRESHOLD_PERCENT: u8 = 40;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("incompatible template: reference has {reference} values, candidate has {candidate}")]
pub struct IncompatibleTemplate {
    pub reference: usize,
    pub candidate: usize,
}

/// Outcome of comparing a live feature vector with an enrolled one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MatchResult {
    pub similarity_percent: u8,
    pub is_match: bool,
}

/// Euclidean distance, accumulated in f64 in index order.
///
/// Always visits every dimension. Fails on a length mismatch rather than
/// truncating or padding.
pub fn distance(reference: &FeatureVector, candidate: &FeatureVector) -> Result<f64, IncompatibleTemplate> {
    if reference.len() != candidate.len() || reference.is_empty() {
        return Err(IncompatibleTemplate {
            reference: reference.len(),
            candidate: candidate.len(),
        });
    }

    let mut sum = 0.0f64;
    for (a, b) in reference.values.iter().zip(candidate.values.iter()) {
        let d = f64::from(*a) - f64::from(*b);
        sum += d * d;
    }
    Ok(sum.sqrt())
}

/// Map a distance onto the 0..=100 similarity scale.
pub fn similarity_percent(distance: f64) -> u8 {
    if !distance.is_finite() {
        return 0;
    }
    let cosine = 1.0 - distance * distance / 2.0;
    (cosine * 100.0).floor().clamp(0.0, 100.0) as u8
}

/// Score a candidate against a reference template.
pub fn score(reference: &FeatureVector, candidate: &FeatureVector) -> Result<MatchResult, IncompatibleTemplate> {
    let d = distance(reference, candidate)?;
    let similarity_percent = similarity_percent(d);
    Ok(MatchResult {
        similarity_percent,
        is_match: similarity_percent >= MATCH_THRESHOLD_PERCENT,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fv(values: &[f32]) -> FeatureVector {
        FeatureVector::new(values.to_vec())
    }

    #[test]
    fn test_identical_vectors_score_100() {
        let a = fv(&[0.6, 0.8, 0.0]);
        let r = score(&a, &a.clone()).unwrap();
        assert_eq!(r.similarity_percent, 100);
        assert!(r.is_match);
    }

    #[test]
    fn test_orthogonal_unit_vectors_rejected() {
        // distance sqrt(2), cosine 0
        let r = score(&fv(&[1.0, 0.0]), &fv(&[0.0, 1.0])).unwrap();
        assert_eq!(r.similarity_percent, 0);
        assert!(!r.is_match);
    }

    #[test]
    fn test_threshold_boundary() {
        // d² = 1.0 → cosine 0.5 → 50% → match
        let r = score(&fv(&[1.0, 0.0]), &fv(&[0.0, 0.0])).unwrap();
        assert_eq!(r.similarity_percent, 50);
        assert!(r.is_match);

        // d² = 1.125 → cosine 0.4375 → 43% → match
        let r = score(&fv(&[1.0, 0.0]), &fv(&[0.25, 0.75])).unwrap();
        assert_eq!(r.similarity_percent, 43);
        assert!(r.is_match);

        // d² = 1.25 → cosine 0.375 → 37% → no match
        let r = score(&fv(&[1.0, 0.0]), &fv(&[0.0, 0.5])).unwrap();
        assert_eq!(r.similarity_percent, 37);
        assert!(!r.is_match);
    }

    #[test]
    fn test_typical_genuine_pairs_are_accepted() {
        // Unit vectors at cosine 0.6 and 0.85, the range same-person ArcFace pairs land in.
        let r = score(&fv(&[1.0, 0.0]), &fv(&[0.6, 0.8])).unwrap();
        assert!(r.is_match);
        assert!((59..=60).contains(&r.similarity_percent));

        let c = 0.85f32;
        let r = score(&fv(&[1.0, 0.0]), &fv(&[c, (1.0 - c * c).sqrt()])).unwrap();
        assert!(r.is_match);
        assert!((84..=85).contains(&r.similarity_percent));
    }

    #[test]
    fn test_unrelated_unit_vectors_rejected() {
        // cosine 0.2
        let c = 0.2f32;
        let r = score(&fv(&[1.0, 0.0]), &fv(&[c, (1.0 - c * c).sqrt()])).unwrap();
        assert!(!r.is_match);
        assert!(r.similarity_percent < MATCH_THRESHOLD_PERCENT);
    }

    #[test]
    fn test_similarity_is_monotonic_and_clamped() {
        let mut last = 100u8;
        for step in 0..40 {
            let s = similarity_percent(step as f64 * 0.05);
            assert!(s <= last);
            last = s;
        }
        assert_eq!(similarity_percent(0.0), 100);
        assert_eq!(similarity_percent(5.0), 0);
        assert_eq!(similarity_percent(f64::NAN), 0);
    }

    #[test]
    fn test_length_mismatch_is_incompatible() {
        let err = score(&fv(&[1.0, 0.0, 0.0]), &fv(&[1.0, 0.0])).unwrap_err();
        assert_eq!(err, IncompatibleTemplate { reference: 3, candidate: 2 });
        assert!(score(&fv(&[]), &fv(&[])).is_err());
    }

    #[test]
    fn test_repeated_scoring_is_bit_identical() {
        let a: Vec<f32> = (0..512).map(|i| ((i * 37 % 101) as f32 / 101.0) - 0.5).collect();
        let b: Vec<f32> = (0..512).map(|i| ((i * 53 % 97) as f32 / 97.0) - 0.5).collect();
        let (a, b) = (fv(&a), fv(&b));
        let d1 = distance(&a, &b).unwrap();
        let d2 = distance(&a, &b).unwrap();
        assert_eq!(d1.to_bits(), d2.to_bits());
        assert_eq!(score(&a, &b).unwrap(), score(&a, &b).unwrap());
    }
}
