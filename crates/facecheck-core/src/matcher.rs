//! Match decisions over face embeddings.
//!
//! [`compare`] is the primary verify operation: Euclidean distance plus the
//! fixed [`MATCH_THRESHOLD`]. [`compare_faces`] is the separate boolean-only
//! mode that takes a caller or oracle supplied tolerance. All functions are
//! pure and check dimensionality before touching any component.

use crate::types::{Embedding, VerificationResult};
use thiserror::Error;

/// Euclidean distance at or below which two embeddings are the same identity.
///
/// Calibrated for dlib-style 128-d face descriptors. On unit-length
/// embeddings it is equivalent to cosine similarity >= 0.82.
pub const MATCH_THRESHOLD: f32 = 0.6;

/// Tolerance used by [`compare_faces`] when the oracle does not override it.
pub const DEFAULT_TOLERANCE: f32 = 0.6;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MatchError {
    #[error("embedding dimension mismatch: {left} vs {right} (both must be equal and non-zero)")]
    EncodingDimensionMismatch { left: usize, right: usize },
}

fn check_dimensions(a: &[f32], b: &[f32]) -> Result<(), MatchError> {
    if a.is_empty() || b.is_empty() || a.len() != b.len() {
        return Err(MatchError::EncodingDimensionMismatch {
            left: a.len(),
            right: b.len(),
        });
    }
    Ok(())
}

/// L2 norm of the element-wise difference.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Result<f32, MatchError> {
    check_dimensions(a, b)?;
    Ok(a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).powi(2))
        .sum::<f32>()
        .sqrt())
}

/// The fixed-threshold decision. NaN distances never match.
pub fn is_match(distance: f32) -> bool {
    distance <= MATCH_THRESHOLD
}

/// Distance and match decision for two embeddings.
pub fn compare(a: &Embedding, b: &Embedding) -> Result<VerificationResult, MatchError> {
    let distance = euclidean_distance(&a.values, &b.values)?;
    Ok(VerificationResult {
        distance,
        matched: is_match(distance),
    })
}

/// Boolean-only decisions, one per `known` embedding, against `tolerance`.
///
/// Distances are not exposed. An empty `known` slice yields an empty result.
pub fn compare_faces(
    known: &[Embedding],
    candidate: &Embedding,
    tolerance: f32,
) -> Result<Vec<bool>, MatchError> {
    known
        .iter()
        .map(|k| -> Result<bool, MatchError> {
            Ok(euclidean_distance(&k.values, &candidate.values)? <= tolerance)
        })
        .collect()
}

/// Nearest gallery entry to `candidate` with its verification result.
///
/// Every entry is compared even after a match is found. Ties keep the
/// earliest entry.
pub fn best_match(
    candidate: &Embedding,
    gallery: &[Embedding],
) -> Result<Option<(usize, VerificationResult)>, MatchError> {
    let mut best: Option<(usize, VerificationResult)> = None;
    for (idx, entry) in gallery.iter().enumerate() {
        let result = compare(candidate, entry)?;
        let closer = match &best {
            None => true,
            Some((_, prev)) => result.distance < prev.distance,
        };
        if closer {
            best = Some((idx, result));
        }
    }
    Ok(best)
}
