//! Engine configuration: built-in defaults, then an optional TOML file, then
//! `FACEGATE_*` environment overrides.

use facegate_core::{LocatorConfig, TieBreak, DEFAULT_MATCH_THRESHOLD};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

const CASCADE_FILE: &str = "haarcascade_frontalface_default.xml";
const DESCRIPTOR_MODEL_FILE: &str = "dlib_face_recognition_resnet_model_v1.onnx";
const LANDMARK_MODEL_FILE: &str = "det_10g.onnx";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("{0}")]
    OutOfRange(String),
}

/// Engine configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Path to the SQLite credential database.
    pub db_path: PathBuf,
    /// Directory holding the cascade and both ONNX models.
    pub model_dir: PathBuf,
    /// Explicit cascade path; defaults to a file inside `model_dir`.
    pub cascade_path: Option<PathBuf>,
    /// Explicit descriptor model path; defaults to a file inside `model_dir`.
    pub descriptor_model_path: Option<PathBuf>,
    /// Explicit SCRFD landmark model path; defaults to a file inside `model_dir`.
    pub landmark_model_path: Option<PathBuf>,
    /// Euclidean distance below which a face is accepted.
    pub match_threshold: f64,
    pub scale_factor: f64,
    pub min_neighbors: usize,
    pub min_face_size: u32,
    pub tie_break: TieBreak,
}

/// On-disk TOML layout. Every key is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    db_path: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    cascade_path: Option<PathBuf>,
    descriptor_model_path: Option<PathBuf>,
    landmark_model_path: Option<PathBuf>,
    match_threshold: Option<f64>,
    scale_factor: Option<f64>,
    min_neighbors: Option<usize>,
    min_face_size: Option<u32>,
    tie_break: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        let locator = LocatorConfig::default();
        let data_dir = data_dir();
        Self {
            db_path: data_dir.join("faces.db"),
            model_dir: data_dir.join("models"),
            cascade_path: None,
            descriptor_model_path: None,
            landmark_model_path: None,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            scale_factor: locator.scale_factor,
            min_neighbors: locator.min_neighbors,
            min_face_size: locator.min_size,
            tie_break: locator.tie_break,
        }
    }
}

impl Config {
    /// Defaults, then the file named by `FACEGATE_CONFIG` (if set), then
    /// `FACEGATE_*` environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let file = std::env::var_os("FACEGATE_CONFIG").map(PathBuf::from);
        Self::load_from(file.as_deref())
    }

    /// Like [`Config::load`] with an explicit config file.
    pub fn load_from(file: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        if let Some(path) = file {
            config.apply_file(path)?;
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let file: ConfigFile = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;

        if let Some(v) = file.db_path {
            self.db_path = v;
        }
        if let Some(v) = file.model_dir {
            self.model_dir = v;
        }
        if let Some(v) = file.cascade_path {
            self.cascade_path = Some(v);
        }
        if let Some(v) = file.descriptor_model_path {
            self.descriptor_model_path = Some(v);
        }
        if let Some(v) = file.landmark_model_path {
            self.landmark_model_path = Some(v);
        }
        if let Some(v) = file.match_threshold {
            self.match_threshold = v;
        }
        if let Some(v) = file.scale_factor {
            self.scale_factor = v;
        }
        if let Some(v) = file.min_neighbors {
            self.min_neighbors = v;
        }
        if let Some(v) = file.min_face_size {
            self.min_face_size = v;
        }
        if let Some(v) = file.tie_break {
            self.tie_break = parse_tie_break("tie_break", &v)?;
        }
        Ok(())
    }

    /// Apply `FACEGATE_*` overrides read through `lookup`.
    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("FACEGATE_DB_PATH") {
            self.db_path = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_MODEL_DIR") {
            self.model_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("FACEGATE_CASCADE_PATH") {
            self.cascade_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEGATE_DESCRIPTOR_MODEL_PATH") {
            self.descriptor_model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEGATE_LANDMARK_MODEL_PATH") {
            self.landmark_model_path = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACEGATE_MATCH_THRESHOLD") {
            self.match_threshold = parse_env("FACEGATE_MATCH_THRESHOLD", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_SCALE_FACTOR") {
            self.scale_factor = parse_env("FACEGATE_SCALE_FACTOR", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_MIN_NEIGHBORS") {
            self.min_neighbors = parse_env("FACEGATE_MIN_NEIGHBORS", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_MIN_FACE_SIZE") {
            self.min_face_size = parse_env("FACEGATE_MIN_FACE_SIZE", &v)?;
        }
        if let Some(v) = lookup("FACEGATE_TIE_BREAK") {
            self.tie_break = parse_tie_break("FACEGATE_TIE_BREAK", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold > 0.0 && self.match_threshold.is_finite()) {
            return Err(ConfigError::OutOfRange(format!(
                "match threshold must be positive, got {}",
                self.match_threshold
            )));
        }
        if !(self.scale_factor > 1.0 && self.scale_factor.is_finite()) {
            return Err(ConfigError::OutOfRange(format!(
                "scale factor must be greater than 1.0, got {}",
                self.scale_factor
            )));
        }
        if self.min_face_size == 0 {
            return Err(ConfigError::OutOfRange("minimum face size must be at least 1".into()));
        }
        Ok(())
    }

    pub fn locator_config(&self) -> LocatorConfig {
        LocatorConfig {
            scale_factor: self.scale_factor,
            min_neighbors: self.min_neighbors,
            min_size: self.min_face_size,
            tie_break: self.tie_break,
        }
    }

    /// Path to the OpenCV Haar cascade XML.
    pub fn cascade_path(&self) -> PathBuf {
        self.cascade_path
            .clone()
            .unwrap_or_else(|| self.model_dir.join(CASCADE_FILE))
    }

    /// Path to the face descriptor ONNX model.
    pub fn descriptor_model_path(&self) -> PathBuf {
        self.descriptor_model_path
            .clone()
            .unwrap_or_else(|| self.model_dir.join(DESCRIPTOR_MODEL_FILE))
    }

    /// Path to the SCRFD landmark ONNX model.
    pub fn landmark_model_path(&self) -> PathBuf {
        self.landmark_model_path
            .clone()
            .unwrap_or_else(|| self.model_dir.join(LANDMARK_MODEL_FILE))
    }
}

fn data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("facegate")
}

fn parse_env<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_tie_break(key: &'static str, value: &str) -> Result<TieBreak, ConfigError> {
    match value.trim() {
        "detector-order" | "first" => Ok(TieBreak::DetectorOrder),
        "largest" => Ok(TieBreak::Largest),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}
