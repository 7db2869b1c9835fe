//! Request routing: operation tags, operand parsing, and the single place
//! where failures become error payloads.

use crate::config::Config;
use crate::response::Response;
use facecheck_core::matcher;
use facecheck_core::{
    Embedding, EmbeddingExtractor, ExtractError, ImageNormalizer, MatchError, NormalizeError,
    OnnxOracle, OnnxOracleOptions, OracleError, SelectionPolicy,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{self, Read};
use std::path::PathBuf;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;
use uuid::Uuid;

/// Operand that reads an image from stdin.
pub const STDIN_OPERAND: &str = "-";

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error(transparent)]
    Extract(#[from] ExtractError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error("embedding oracle: {0}")]
    Oracle(#[from] OracleError),
    #[error("no embedding oracle loaded; {0} needs one")]
    OracleMissing(&'static str),
    #[error("unsupported operation '{0}' (expected save_face, verify_face, verify_image or compare_faces)")]
    UnsupportedOperation(String),
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    #[error("failed to serialize response: {0}")]
    Serialization(String),
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Failure categories reported in the `kind` field of error payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ErrorKind {
    InvalidImage,
    NoFaceDetected,
    EncodingDimensionMismatch,
    SerializationError,
    UnsupportedOperation,
    InvalidArguments,
    Oracle,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidImage => "InvalidImage",
            ErrorKind::NoFaceDetected => "NoFaceDetected",
            ErrorKind::EncodingDimensionMismatch => "EncodingDimensionMismatch",
            ErrorKind::SerializationError => "SerializationError",
            ErrorKind::UnsupportedOperation => "UnsupportedOperation",
            ErrorKind::InvalidArguments => "InvalidArguments",
            ErrorKind::Oracle => "Oracle",
            ErrorKind::Io => "Io",
        }
    }

    pub fn code(&self) -> u8 {
        match self {
            ErrorKind::InvalidImage | ErrorKind::InvalidArguments | ErrorKind::Io => 2,
            ErrorKind::NoFaceDetected => 3,
            ErrorKind::EncodingDimensionMismatch => 4,
            ErrorKind::UnsupportedOperation => 5,
            ErrorKind::Oracle => 6,
            ErrorKind::SerializationError => 7,
        }
    }

    pub fn exit_code(&self) -> ExitCode {
        ExitCode::from(self.code())
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Normalize(NormalizeError::InvalidImage(_)) => ErrorKind::InvalidImage,
            DispatchError::Extract(ExtractError::NoFaceDetected) => ErrorKind::NoFaceDetected,
            DispatchError::Extract(ExtractError::UnexpectedDimension { .. })
            | DispatchError::Extract(ExtractError::Oracle(_))
            | DispatchError::Oracle(_)
            | DispatchError::OracleMissing(_) => ErrorKind::Oracle,
            DispatchError::Match(MatchError::EncodingDimensionMismatch { .. }) => {
                ErrorKind::EncodingDimensionMismatch
            }
            DispatchError::UnsupportedOperation(_) => ErrorKind::UnsupportedOperation,
            DispatchError::InvalidArguments(_) => ErrorKind::InvalidArguments,
            DispatchError::Serialization(_) => ErrorKind::SerializationError,
            DispatchError::Io { .. } => ErrorKind::Io,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    SaveFace,
    VerifyFace,
    VerifyImage,
    CompareFaces,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::SaveFace => "save_face",
            Operation::VerifyFace => "verify_face",
            Operation::VerifyImage => "verify_image",
            Operation::CompareFaces => "compare_faces",
        }
    }
}

impl FromStr for Operation {
    type Err = DispatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "save_face" => Ok(Operation::SaveFace),
            "verify_face" => Ok(Operation::VerifyFace),
            "verify_image" => Ok(Operation::VerifyImage),
            "compare_faces" => Ok(Operation::CompareFaces),
            other => Err(DispatchError::UnsupportedOperation(other.to_string())),
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    SaveFace {
        image: Vec<u8>,
    },
    VerifyFace {
        probe: Embedding,
        reference: Embedding,
    },
    VerifyImage {
        image: Vec<u8>,
        reference: Embedding,
    },
    CompareFaces {
        image: Vec<u8>,
        known: Vec<Embedding>,
        tolerance: Option<f32>,
    },
}

impl Request {
    pub fn operation(&self) -> Operation {
        match self {
            Request::SaveFace { .. } => Operation::SaveFace,
            Request::VerifyFace { .. } => Operation::VerifyFace,
            Request::VerifyImage { .. } => Operation::VerifyImage,
            Request::CompareFaces { .. } => Operation::CompareFaces,
        }
    }

    /// Build a request from command-line operands.
    ///
    /// Images are file paths, or `-` for stdin. Embeddings are inline JSON,
    /// or `@path` to read the JSON from a file.
    pub fn from_operands(op: Operation, operands: &[String]) -> Result<Self, DispatchError> {
        match (op, operands) {
            (Operation::SaveFace, [image]) => Ok(Request::SaveFace {
                image: read_image(image)?,
            }),
            (Operation::VerifyFace, [probe, reference]) => Ok(Request::VerifyFace {
                probe: read_embedding(probe)?,
                reference: read_embedding(reference)?,
            }),
            (Operation::VerifyImage, [image, reference]) => Ok(Request::VerifyImage {
                image: read_image(image)?,
                reference: read_embedding(reference)?,
            }),
            (Operation::CompareFaces, [image, known @ ..]) => Ok(Request::CompareFaces {
                image: read_image(image)?,
                known: known
                    .iter()
                    .map(|raw| read_embedding(raw))
                    .collect::<Result<_, _>>()?,
                tolerance: None,
            }),
            (op, _) => Err(DispatchError::InvalidArguments(format!(
                "{op} expects {}, got {} operand(s)",
                usage(op),
                operands.len()
            ))),
        }
    }

    /// Set the `compare_faces` tolerance. Other requests ignore it.
    pub fn with_tolerance(mut self, value: Option<f32>) -> Result<Self, DispatchError> {
        if let Some(t) = value {
            if !t.is_finite() || t < 0.0 {
                return Err(DispatchError::InvalidArguments(format!(
                    "tolerance must be a non-negative number, got {t}"
                )));
            }
        }
        if let Request::CompareFaces { tolerance, .. } = &mut self {
            *tolerance = value;
        }
        Ok(self)
    }
}

fn usage(op: Operation) -> &'static str {
    match op {
        Operation::SaveFace => "<IMAGE>",
        Operation::VerifyFace => "<EMBEDDING> <EMBEDDING>",
        Operation::VerifyImage => "<IMAGE> <EMBEDDING>",
        Operation::CompareFaces => "<IMAGE> [EMBEDDING]...",
    }
}

fn read_image(operand: &str) -> Result<Vec<u8>, DispatchError> {
    if operand == STDIN_OPERAND {
        let mut buf = Vec::new();
        io::stdin()
            .lock()
            .read_to_end(&mut buf)
            .map_err(|source| DispatchError::Io {
                path: PathBuf::from("<stdin>"),
                source,
            })?;
        return Ok(buf);
    }
    std::fs::read(operand).map_err(|source| DispatchError::Io {
        path: PathBuf::from(operand),
        source,
    })
}

fn read_embedding(operand: &str) -> Result<Embedding, DispatchError> {
    match operand.strip_prefix('@') {
        Some(path) => {
            let raw = std::fs::read_to_string(path).map_err(|source| DispatchError::Io {
                path: PathBuf::from(path),
                source,
            })?;
            parse_embedding(&raw)
        }
        None => parse_embedding(operand),
    }
}

/// Accepted embedding encodings: a bare array, or a stored `save_face`
/// response carrying `encoding`.
#[derive(Deserialize)]
#[serde(untagged)]
enum EmbeddingPayload {
    Bare(Vec<f32>),
    Stored { encoding: Vec<f32> },
}

pub fn parse_embedding(raw: &str) -> Result<Embedding, DispatchError> {
    let payload: EmbeddingPayload = serde_json::from_str(raw.trim()).map_err(|_| {
        DispatchError::InvalidArguments(
            "embedding must be a JSON number array or an object with an \"encoding\" array".into(),
        )
    })?;
    let values = match payload {
        EmbeddingPayload::Bare(values) | EmbeddingPayload::Stored { encoding: values } => values,
    };
    let embedding = Embedding::new(values);
    if !embedding.is_finite() {
        return Err(DispatchError::InvalidArguments(
            "embedding contains a value outside the f32 range".into(),
        ));
    }
    Ok(embedding)
}

/// Where the dispatcher gets its ONNX oracle from on first use.
#[derive(Debug, Clone)]
struct OracleSource {
    options: OnnxOracleOptions,
    policy: SelectionPolicy,
}

/// Executes requests against an oracle that is supplied up front or loaded
/// on the first image that needs one.
///
/// Holds no per-request state, so one dispatcher can serve concurrent calls.
#[derive(Default)]
pub struct Dispatcher {
    normalizer: ImageNormalizer,
    extractor: OnceLock<EmbeddingExtractor>,
    source: Option<OracleSource>,
}

impl Dispatcher {
    pub fn new(normalizer: ImageNormalizer) -> Self {
        Self {
            normalizer,
            extractor: OnceLock::new(),
            source: None,
        }
    }

    /// Dispatcher built from `config`.
    ///
    /// Models are not touched here. They load when the first decoded image
    /// reaches the extractor, so `verify_face` never needs them and an
    /// undecodable image is reported as such even without models installed.
    pub fn from_config(config: &Config) -> Self {
        Self {
            source: Some(OracleSource {
                options: config.oracle_options(),
                policy: config.selection_policy,
            }),
            ..Self::new(ImageNormalizer::new(config.normalizer_options()))
        }
    }

    pub fn with_extractor(self, extractor: EmbeddingExtractor) -> Self {
        let _ = self.extractor.set(extractor);
        self
    }

    /// Parse `operation` and its operands and run the request.
    pub fn run(
        config: &Config,
        operation: &str,
        operands: &[String],
        tolerance: Option<f32>,
    ) -> Response {
        let request = operation
            .parse::<Operation>()
            .and_then(|op| Request::from_operands(op, operands))
            .and_then(|request| request.with_tolerance(tolerance));
        match request {
            Ok(request) => Self::from_config(config).handle(request),
            Err(err) => {
                tracing::warn!(kind = %err.kind(), error = %err, "request rejected");
                Response::error(&err)
            }
        }
    }

    /// Run one request. Every failure comes back as [`Response::Error`].
    pub fn handle(&self, request: Request) -> Response {
        let op = request.operation();
        let span = tracing::info_span!("request", id = %Uuid::new_v4(), op = op.as_str());
        let _guard = span.enter();

        match self.execute(request) {
            Ok(response) => {
                tracing::info!("request succeeded");
                response
            }
            Err(err) => {
                tracing::warn!(kind = %err.kind(), error = %err, "request failed");
                Response::error(&err)
            }
        }
    }

    fn execute(&self, request: Request) -> Result<Response, DispatchError> {
        let response = match request {
            Request::SaveFace { image } => Response::saved(self.embed(&image, Operation::SaveFace)?),
            Request::VerifyFace { probe, reference } => {
                Response::verified(matcher::compare(&probe, &reference)?)
            }
            Request::VerifyImage { image, reference } => {
                let probe = self.embed(&image, Operation::VerifyImage)?;
                Response::verified(matcher::compare(&probe, &reference)?)
            }
            Request::CompareFaces {
                image,
                known,
                tolerance,
            } => {
                let probe = self.embed(&image, Operation::CompareFaces)?;
                let tolerance = match tolerance {
                    Some(t) => t,
                    None => self.extractor(Operation::CompareFaces)?.oracle().default_tolerance(),
                };
                let matches = matcher::compare_faces(&known, &probe, tolerance)?;
                if let Some((index, best)) = matcher::best_match(&probe, &known)? {
                    tracing::debug!(index, distance = best.distance, tolerance, "nearest known face");
                }
                Response::compared(matches)
            }
        };
        response.ensure_representable()?;
        Ok(response)
    }

    /// Validate, normalize and embed one image.
    fn embed(&self, image: &[u8], op: Operation) -> Result<Embedding, DispatchError> {
        self.normalizer.validate(image)?;
        let raster = self.normalizer.normalize(image)?;
        Ok(self.extractor(op)?.extract(&raster)?)
    }

    fn extractor(&self, op: Operation) -> Result<&EmbeddingExtractor, DispatchError> {
        if let Some(extractor) = self.extractor.get() {
            return Ok(extractor);
        }
        let source = self
            .source
            .as_ref()
            .ok_or(DispatchError::OracleMissing(op.as_str()))?;
        let oracle = OnnxOracle::load(&source.options)?;
        let extractor = EmbeddingExtractor::new(Box::new(oracle)).with_policy(source.policy);
        // A concurrent first call may have won the race; keep whichever landed.
        Ok(self.extractor.get_or_init(|| extractor))
    }
}
