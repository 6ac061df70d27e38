use rollcall_core::LbphParams;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const DEFAULT_MATCH_THRESHOLD: f64 = 60.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Optional TOML overrides; every key may be omitted.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    data_dir: Option<PathBuf>,
    dataset_dir: Option<PathBuf>,
    model_path: Option<PathBuf>,
    labels_path: Option<PathBuf>,
    ledger_dir: Option<PathBuf>,
    model_dir: Option<PathBuf>,
    match_threshold: Option<f64>,
    detection_threshold: Option<f32>,
    face_size: Option<u32>,
    system_bus: Option<bool>,
}

impl FileConfig {
    fn read(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Sample store root: one directory per person label.
    pub dataset_dir: PathBuf,
    /// Trained classifier artifact.
    pub model_path: PathBuf,
    /// Label index mapping bound to `model_path`.
    pub labels_path: PathBuf,
    /// Directory holding one attendance ledger file per day.
    pub ledger_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Distance below which a recognition is accepted.
    pub match_threshold: f64,
    /// Minimum SCRFD score for a face region.
    pub detection_threshold: f32,
    /// Side length faces are normalised to before LBPH encoding.
    pub face_size: u32,
    /// Register on the system bus instead of the session bus.
    pub system_bus: bool,
}

impl Config {
    /// Load configuration: optional TOML file named by `ROLLCALL_CONFIG`,
    /// then `ROLLCALL_*` environment overrides, then defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let file = match std::env::var("ROLLCALL_CONFIG") {
            Ok(path) => FileConfig::read(Path::new(&path))?,
            Err(_) => FileConfig::default(),
        };
        Self::resolve(file, |key| std::env::var(key).ok())
    }

    fn resolve(
        file: FileConfig,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let path = |key: &str, from_file: Option<PathBuf>| env(key).map(PathBuf::from).or(from_file);

        let data_dir = path("ROLLCALL_DATA_DIR", file.data_dir).unwrap_or_else(|| {
            env("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = env("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("rollcall")
        });

        let config = Self {
            dataset_dir: path("ROLLCALL_DATASET_DIR", file.dataset_dir)
                .unwrap_or_else(|| data_dir.join("dataset")),
            model_path: path("ROLLCALL_MODEL_PATH", file.model_path)
                .unwrap_or_else(|| data_dir.join("model.json")),
            labels_path: path("ROLLCALL_LABELS_PATH", file.labels_path)
                .unwrap_or_else(|| data_dir.join("labels.json")),
            ledger_dir: path("ROLLCALL_LEDGER_DIR", file.ledger_dir)
                .unwrap_or_else(|| data_dir.clone()),
            model_dir: path("ROLLCALL_MODEL_DIR", file.model_dir)
                .unwrap_or_else(rollcall_core::default_model_dir),
            match_threshold: parsed(&env, "ROLLCALL_MATCH_THRESHOLD")
                .or(file.match_threshold)
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            detection_threshold: parsed(&env, "ROLLCALL_DETECTION_THRESHOLD")
                .or(file.detection_threshold)
                .unwrap_or(rollcall_core::detector::DEFAULT_CONFIDENCE_THRESHOLD),
            face_size: parsed(&env, "ROLLCALL_FACE_SIZE")
                .or(file.face_size)
                .unwrap_or(rollcall_core::lbph::DEFAULT_FACE_SIZE),
            system_bus: env("ROLLCALL_SYSTEM_BUS")
                .map(|v| v != "0")
                .or(file.system_bus)
                .unwrap_or(false),
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but would make recognition meaningless.
    fn validate(&self) -> Result<(), ConfigError> {
        if !(self.match_threshold.is_finite() && self.match_threshold > 0.0) {
            return Err(ConfigError::Invalid {
                key: "match_threshold",
                reason: format!("{} is not a positive distance", self.match_threshold),
            });
        }
        if !(self.detection_threshold > 0.0 && self.detection_threshold < 1.0) {
            return Err(ConfigError::Invalid {
                key: "detection_threshold",
                reason: format!("{} is outside (0, 1)", self.detection_threshold),
            });
        }
        self.lbph_params()
            .validate()
            .map_err(|e| ConfigError::Invalid {
                key: "face_size",
                reason: e.to_string(),
            })
    }

    /// Classifier parameters for the configured face size.
    pub fn lbph_params(&self) -> LbphParams {
        LbphParams {
            face_size: self.face_size,
            ..LbphParams::default()
        }
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> PathBuf {
        self.model_dir.join("det_10g.onnx")
    }
}

fn parsed<T: FromStr>(env: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    env(key).and_then(|v| v.parse().ok())
}
