//! Embedding extraction: ask the oracle for every face, keep exactly one.

use crate::oracle::{EmbeddingOracle, OracleError};
use crate::types::{DetectedFace, Embedding, Raster};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("oracle {oracle} returned a {actual}-dim embedding, expected {expected}")]
    UnexpectedDimension {
        oracle: String,
        expected: usize,
        actual: usize,
    },
    #[error(transparent)]
    Oracle(#[from] OracleError),
}

/// Which face to keep when the oracle reports more than one.
///
/// `FirstDetected` is the default: the first face in the oracle's own order.
/// For [`crate::OnnxOracle`] that order is descending detector confidence.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionPolicy {
    #[default]
    #[serde(rename = "first")]
    FirstDetected,
    #[serde(rename = "largest")]
    LargestFace,
    #[serde(rename = "confidence")]
    HighestConfidence,
}

#[derive(Error, Debug, PartialEq)]
#[error("unknown selection policy '{0}' (expected first, largest or confidence)")]
pub struct UnknownPolicy(pub String);

impl SelectionPolicy {
    /// Index of the chosen face, `None` only when `faces` is empty.
    ///
    /// Ties (and NaN scores) keep the earlier face.
    pub fn select(&self, faces: &[DetectedFace]) -> Option<usize> {
        match self {
            SelectionPolicy::FirstDetected => (!faces.is_empty()).then_some(0),
            SelectionPolicy::LargestFace => argmax(faces, |f| f.bbox.area()),
            SelectionPolicy::HighestConfidence => argmax(faces, |f| f.bbox.confidence),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SelectionPolicy::FirstDetected => "first",
            SelectionPolicy::LargestFace => "largest",
            SelectionPolicy::HighestConfidence => "confidence",
        }
    }
}

fn argmax(faces: &[DetectedFace], key: impl Fn(&DetectedFace) -> f32) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, face) in faces.iter().enumerate() {
        let score = key(face);
        let better = match best {
            None => true,
            Some((_, top)) => score > top || (top.is_nan() && !score.is_nan()),
        };
        if better {
            best = Some((idx, score));
        }
    }
    best.map(|(idx, _)| idx)
}

impl FromStr for SelectionPolicy {
    type Err = UnknownPolicy;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" | "first-detected" => Ok(SelectionPolicy::FirstDetected),
            "largest" | "largest-face" => Ok(SelectionPolicy::LargestFace),
            "confidence" | "highest-confidence" => Ok(SelectionPolicy::HighestConfidence),
            other => Err(UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs an [`EmbeddingOracle`] and applies a [`SelectionPolicy`].
///
/// Only "at least one face" is enforced; a crowd photo silently yields the
/// face the policy picks.
pub struct EmbeddingExtractor {
    oracle: Box<dyn EmbeddingOracle>,
    policy: SelectionPolicy,
}

impl EmbeddingExtractor {
    pub fn new(oracle: Box<dyn EmbeddingOracle>) -> Self {
        Self {
            oracle,
            policy: SelectionPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: SelectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> SelectionPolicy {
        self.policy
    }

    pub fn oracle(&self) -> &dyn EmbeddingOracle {
        self.oracle.as_ref()
    }

    /// Every face the oracle reports, in oracle order.
    pub fn extract_all(&self, raster: &Raster) -> Result<Vec<DetectedFace>, ExtractError> {
        Ok(self.oracle.detect_faces(raster)?)
    }

    /// The single embedding chosen by the policy.
    pub fn extract(&self, raster: &Raster) -> Result<Embedding, ExtractError> {
        let mut faces = self.extract_all(raster)?;
        let index = self
            .policy
            .select(&faces)
            .ok_or(ExtractError::NoFaceDetected)?;

        tracing::debug!(
            oracle = self.oracle.name(),
            faces = faces.len(),
            selected = index,
            policy = %self.policy,
            "face selected"
        );
        if faces.len() > 1 {
            tracing::info!(
                faces = faces.len(),
                policy = %self.policy,
                "multiple faces detected; using one"
            );
        }

        let face = faces.swap_remove(index);
        let expected = self.oracle.dimension();
        if face.embedding.dimension() != expected {
            return Err(ExtractError::UnexpectedDimension {
                oracle: self.oracle.name().to_string(),
                expected,
                actual: face.embedding.dimension(),
            });
        }
        Ok(face.embedding)
    }
}
