use facecheck_core::detector::{DetectorOptions, DEFAULT_CONFIDENCE_THRESHOLD};
use facecheck_core::normalizer::DEFAULT_MAX_DIMENSION;
use facecheck_core::{NormalizerOptions, OnnxOracleOptions, SelectionPolicy};
use serde::Deserialize;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CONFIG_ENV: &str = "FACECHECK_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid configuration file {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

/// Runtime configuration.
///
/// Layered as defaults, then an optional TOML file, then `FACECHECK_*`
/// environment variables. CLI flags are applied last by the binary.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Directory containing the ONNX model files.
    pub model_dir: PathBuf,
    /// Which face to keep when an image contains several.
    pub selection_policy: SelectionPolicy,
    /// Largest accepted image width or height.
    pub max_image_dimension: u32,
    /// ONNX Runtime intra-op threads per session.
    pub intra_threads: usize,
    /// Minimum SCRFD score for a detection.
    pub detection_confidence: f32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model_dir: facecheck_core::default_model_dir(),
            selection_policy: SelectionPolicy::default(),
            max_image_dimension: DEFAULT_MAX_DIMENSION,
            intra_threads: DetectorOptions::default().intra_threads,
            detection_confidence: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// On-disk shape; every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    model_dir: Option<PathBuf>,
    selection_policy: Option<SelectionPolicy>,
    max_image_dimension: Option<u32>,
    intra_threads: Option<usize>,
    detection_confidence: Option<f32>,
}

impl Config {
    /// Load from the default file location and the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = config_file_path()? {
            config.apply_file(&path)?;
        }
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Overlay values from a TOML file.
    pub fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = toml::from_str(&raw).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.selection_policy {
            self.selection_policy = v;
        }
        if let Some(v) = file.max_image_dimension {
            self.max_image_dimension = v;
        }
        if let Some(v) = file.intra_threads {
            self.intra_threads = v;
        }
        if let Some(v) = file.detection_confidence {
            self.detection_confidence = v;
        }
        tracing::debug!(path = %path.display(), "applied configuration file");
        Ok(())
    }

    /// Overlay `FACECHECK_*` variables resolved through `lookup`.
    ///
    /// Unparsable values are ignored with a warning and the previous value kept.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(dir) = lookup("FACECHECK_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        env_parse(&lookup, "FACECHECK_SELECTION_POLICY", &mut self.selection_policy);
        env_parse(&lookup, "FACECHECK_MAX_IMAGE_DIMENSION", &mut self.max_image_dimension);
        env_parse(&lookup, "FACECHECK_INTRA_THREADS", &mut self.intra_threads);
        env_parse(&lookup, "FACECHECK_DETECTION_CONFIDENCE", &mut self.detection_confidence);
    }

    pub fn normalizer_options(&self) -> NormalizerOptions {
        NormalizerOptions {
            max_dimension: self.max_image_dimension,
        }
    }

    pub fn oracle_options(&self) -> OnnxOracleOptions {
        let mut options = OnnxOracleOptions::new(&self.model_dir);
        options.detector.confidence_threshold = self.detection_confidence;
        options.detector.intra_threads = self.intra_threads.max(1);
        options
    }
}

fn env_parse<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    slot: &mut T,
) {
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.parse() {
        Ok(v) => *slot = v,
        Err(_) => tracing::warn!(key, value = %raw, "ignoring unparsable environment override"),
    }
}

/// `$FACECHECK_CONFIG` if set (it must then exist), otherwise
/// `$XDG_CONFIG_HOME/facecheck/config.toml` when present.
fn config_file_path() -> Result<Option<PathBuf>, ConfigError> {
    if let Ok(explicit) = std::env::var(CONFIG_ENV) {
        let path = PathBuf::from(explicit);
        if !path.exists() {
            return Err(ConfigError::Read {
                source: io::Error::new(io::ErrorKind::NotFound, "file does not exist"),
                path,
            });
        }
        return Ok(Some(path));
    }

    let base = std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|_| std::env::var("HOME").map(|home| PathBuf::from(home).join(".config")));
    Ok(base
        .ok()
        .map(|dir| dir.join("facecheck").join("config.toml"))
        .filter(|path| path.exists()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn file_values_override_defaults() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(
            &path,
            "model_dir = \"/srv/models\"\nselection_policy = \"largest\"\nmax_image_dimension = 2048\n",
        )
        .unwrap();

        let mut config = Config::default();
        config.apply_file(&path).unwrap();
        assert_eq!(config.model_dir, PathBuf::from("/srv/models"));
        assert_eq!(config.selection_policy, SelectionPolicy::LargestFace);
        assert_eq!(config.max_image_dimension, 2048);
        assert_eq!(config.intra_threads, Config::default().intra_threads);
    }

    #[test]
    fn unknown_file_keys_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "threshold = 0.4\n").unwrap();

        let err = Config::default().apply_file(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn missing_file_reports_read_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent.toml");
        let err = Config::default().apply_file(&path).unwrap_err();
        match err {
            ConfigError::Read { path: reported, .. } => assert_eq!(reported, path),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn env_overrides_file_values() {
        let mut config = Config {
            selection_policy: SelectionPolicy::LargestFace,
            ..Config::default()
        };
        config.apply_env(lookup_from(&[
            ("FACECHECK_MODEL_DIR", "/env/models"),
            ("FACECHECK_SELECTION_POLICY", "confidence"),
            ("FACECHECK_DETECTION_CONFIDENCE", "0.7"),
        ]));
        assert_eq!(config.model_dir, PathBuf::from("/env/models"));
        assert_eq!(config.selection_policy, SelectionPolicy::HighestConfidence);
        assert!((config.detection_confidence - 0.7).abs() < 1e-6);
    }

    #[test]
    fn unparsable_env_values_are_ignored() {
        let mut config = Config::default();
        config.apply_env(lookup_from(&[
            ("FACECHECK_MAX_IMAGE_DIMENSION", "huge"),
            ("FACECHECK_SELECTION_POLICY", "tallest"),
        ]));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn oracle_options_follow_config() {
        let config = Config {
            model_dir: PathBuf::from("/m"),
            intra_threads: 0,
            detection_confidence: 0.65,
            ..Config::default()
        };
        let options = config.oracle_options();
        assert_eq!(options.detector_path(), PathBuf::from("/m/det_10g.onnx"));
        assert_eq!(options.detector.intra_threads, 1);
        assert!((options.detector.confidence_threshold - 0.65).abs() < 1e-6);
    }
}
