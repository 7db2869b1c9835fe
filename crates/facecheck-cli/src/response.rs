//! JSON response envelopes written to stdout.

use crate::dispatch::{DispatchError, ErrorKind};
use facecheck_core::{Embedding, VerificationResult};
use serde::Serialize;
use std::process::ExitCode;

/// Emitted when even the error payload cannot be encoded.
const LAST_RESORT: &str =
    r#"{"status":"error","kind":"SerializationError","message":"response could not be encoded"}"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// One response per request. Every variant carries `status`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Response {
    Saved {
        status: Status,
        encoding: Vec<f32>,
    },
    Verified {
        status: Status,
        #[serde(rename = "match")]
        matched: bool,
        distance: f32,
    },
    Compared {
        status: Status,
        matches: Vec<bool>,
    },
    Error {
        status: Status,
        kind: ErrorKind,
        message: String,
    },
}

impl Response {
    pub fn saved(embedding: Embedding) -> Self {
        Response::Saved {
            status: Status::Success,
            encoding: embedding.values,
        }
    }

    pub fn verified(result: VerificationResult) -> Self {
        Response::Verified {
            status: Status::Success,
            matched: result.matched,
            distance: result.distance,
        }
    }

    pub fn compared(matches: Vec<bool>) -> Self {
        Response::Compared {
            status: Status::Success,
            matches,
        }
    }

    pub fn error(err: &DispatchError) -> Self {
        Response::Error {
            status: Status::Error,
            kind: err.kind(),
            message: err.to_string(),
        }
    }

    pub fn status(&self) -> Status {
        match self {
            Response::Saved { status, .. }
            | Response::Verified { status, .. }
            | Response::Compared { status, .. }
            | Response::Error { status, .. } => *status,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status() == Status::Success
    }

    /// Numeric process status: 0 on success, the kind's code otherwise.
    pub fn code(&self) -> u8 {
        match self {
            Response::Error { kind, .. } => kind.code(),
            _ => 0,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }

    /// Fails with `Serialization` when a float has no JSON representation.
    ///
    /// `serde_json` would otherwise write `null` for NaN and infinity.
    pub fn ensure_representable(&self) -> Result<(), DispatchError> {
        let bad = match self {
            Response::Saved { encoding, .. } => encoding.iter().position(|v| !v.is_finite()),
            Response::Verified { distance, .. } => (!distance.is_finite()).then_some(0),
            Response::Compared { .. } | Response::Error { .. } => None,
        };
        match bad {
            Some(idx) => Err(DispatchError::Serialization(format!(
                "non-finite float at position {idx}"
            ))),
            None => Ok(()),
        }
    }

    pub fn to_json(&self) -> Result<String, DispatchError> {
        self.ensure_representable()?;
        serde_json::to_string(self).map_err(|e| DispatchError::Serialization(e.to_string()))
    }

    /// JSON text and exit code, degrading to an error payload if this
    /// response cannot be encoded.
    pub fn render(&self) -> (String, ExitCode) {
        match self.to_json() {
            Ok(json) => (json, self.exit_code()),
            Err(err) => {
                let fallback = Response::error(&err);
                let json = serde_json::to_string(&fallback).unwrap_or_else(|_| LAST_RESORT.into());
                (json, fallback.exit_code())
            }
        }
    }
}
