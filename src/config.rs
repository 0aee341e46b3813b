//! TOML configuration. Every field has a default, so an empty file is valid.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::faq::{DEFAULT_DIMENSION, DEFAULT_THRESHOLD};
use crate::integration::{DEFAULT_CONFIDENCE, RAW_CONFIDENCE_FLOOR};
use crate::tracker::{TrackError, TrackerConfig};
use crate::translate::TranslatorConfig;
use crate::video::VideoConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid listen address `{0}`")]
    Address(String),
    #[error("detector confidence must lie in [0, 1], got {0}")]
    Confidence(f32),
    #[error("`[faq] model` and `[faq] tokenizer` must be set together")]
    SentenceModel,
    #[error(transparent)]
    Tracker(#[from] TrackError),
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub detector: DetectorConfig,
    pub tracker: TrackerConfig,
    pub faq: FaqConfig,
    pub annotate: AnnotateConfig,
    pub video: VideoConfig,
    pub translator: TranslatorConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Upper bound for uploaded videos.
    pub max_upload_mb: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            max_upload_mb: 512,
        }
    }
}

impl ServerConfig {
    /// Resolve `host` (an IP literal or a host name) to the first listen address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        let address = || ConfigError::Address(format!("{}:{}", self.host, self.port));
        (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| address())?
            .next()
            .ok_or_else(address)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// ONNX export of a YOLOv8 model.
    pub model: Option<PathBuf>,
    pub confidence: f32,
    /// NMS IoU threshold.
    pub iou_threshold: f32,
    /// Square model input side in pixels.
    pub input_size: u32,
}

/// What a loaded detector is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorUse {
    /// Detections feed the tracker and the JSON report.
    Service,
    /// Raw model predictions are scored against labels.
    Evaluation,
}

/// Thresholds a detector is built with.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorThresholds {
    /// Candidate floor inside the model decoder.
    pub decode: f32,
    /// Confidence filter applied to the decoder output, if any.
    pub filter: Option<f32>,
}

impl DetectorConfig {
    pub fn thresholds(&self, usage: DetectorUse) -> DetectorThresholds {
        match usage {
            DetectorUse::Service => DetectorThresholds {
                decode: self.confidence.min(RAW_CONFIDENCE_FLOOR),
                filter: Some(self.confidence),
            },
            DetectorUse::Evaluation => DetectorThresholds {
                decode: RAW_CONFIDENCE_FLOOR,
                filter: None,
            },
        }
    }
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            model: None,
            confidence: DEFAULT_CONFIDENCE,
            iou_threshold: 0.45,
            input_size: 640,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FaqConfig {
    /// JSON list of questions and answers; the chat endpoint is disabled without it.
    pub path: Option<PathBuf>,
    pub threshold: f32,
    /// Hashing embedder width, used when no sentence model is configured.
    pub dimension: usize,
    /// ONNX sentence-transformer export (e.g. all-MiniLM-L6-v2).
    pub model: Option<PathBuf>,
    /// `tokenizer.json` matching `model`.
    pub tokenizer: Option<PathBuf>,
}

impl Default for FaqConfig {
    fn default() -> Self {
        Self {
            path: None,
            threshold: DEFAULT_THRESHOLD,
            dimension: DEFAULT_DIMENSION,
            model: None,
            tokenizer: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnnotateConfig {
    /// TrueType font for labels; boxes are drawn without it.
    pub font: Option<PathBuf>,
}

impl AppConfig {
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&text)
    }

    /// Load `path` when given, defaults otherwise.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.detector.confidence) {
            return Err(ConfigError::Confidence(self.detector.confidence));
        }
        if self.faq.model.is_some() != self.faq.tokenizer.is_some() {
            return Err(ConfigError::SentenceModel);
        }
        self.tracker.validate()?;
        self.server.socket_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = AppConfig::from_toml("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.tracker.n_init, 3);
        assert_eq!(config.detector.confidence, 0.5);
    }

    #[test]
    fn test_partial_sections_merge_with_defaults() {
        let config = AppConfig::from_toml(
            r#"
            [server]
            port = 9000

            [tracker]
            track_buffer = 60
            n_init = 1

            [faq]
            path = "qaf.json"
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.tracker.track_buffer, 60);
        assert_eq!(config.tracker.match_thresh, 0.8);
        assert_eq!(config.faq.path, Some(PathBuf::from("qaf.json")));
    }

    #[test]
    fn test_invalid_values_rejected() {
        assert!(matches!(
            AppConfig::from_toml("[detector]\nconfidence = 2.0"),
            Err(ConfigError::Confidence(_))
        ));
        assert!(matches!(
            AppConfig::from_toml("[tracker]\nn_init = 0"),
            Err(ConfigError::Tracker(TrackError::ZeroInit))
        ));
        assert!(matches!(
            AppConfig::from_toml("[server]\nhost = \"not a host\""),
            Err(ConfigError::Address(_))
        ));
        assert!(matches!(AppConfig::from_toml("server = 3"), Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_host_names_resolve() {
        let config = AppConfig::from_toml("[server]\nhost = \"localhost\"\nport = 8080").unwrap();
        let addr = config.server.socket_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 8080);

        let server = ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..ServerConfig::default()
        };
        assert_eq!(server.socket_addr().unwrap(), "127.0.0.1:0".parse().unwrap());
    }

    #[test]
    fn test_evaluation_scores_raw_predictions() {
        let config = DetectorConfig::default();
        assert_eq!(
            config.thresholds(DetectorUse::Service),
            DetectorThresholds {
                decode: 0.25,
                filter: Some(0.5)
            }
        );
        assert_eq!(
            config.thresholds(DetectorUse::Evaluation),
            DetectorThresholds {
                decode: 0.25,
                filter: None
            }
        );

        let permissive = DetectorConfig {
            confidence: 0.1,
            ..DetectorConfig::default()
        };
        assert_eq!(permissive.thresholds(DetectorUse::Service).decode, 0.1);
        assert_eq!(permissive.thresholds(DetectorUse::Evaluation).decode, 0.25);
    }

    #[test]
    fn test_sentence_model_needs_tokenizer() {
        assert!(matches!(
            AppConfig::from_toml("[faq]\nmodel = \"minilm.onnx\""),
            Err(ConfigError::SentenceModel)
        ));
        let config = AppConfig::from_toml(
            "[faq]\nmodel = \"minilm.onnx\"\ntokenizer = \"tokenizer.json\"",
        )
        .unwrap();
        assert_eq!(config.faq.tokenizer, Some(PathBuf::from("tokenizer.json")));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(matches!(
            AppConfig::load(Path::new("/definitely/missing.toml")),
            Err(ConfigError::Read { .. })
        ));
        assert!(AppConfig::load_or_default(None).is_ok());
    }

    #[test]
    fn test_sample_config_matches_defaults() {
        let config = AppConfig::from_toml(include_str!("../vidtrack.toml")).unwrap();
        let expected = AppConfig {
            faq: FaqConfig {
                path: Some(PathBuf::from("qaf.json")),
                ..FaqConfig::default()
            },
            ..AppConfig::default()
        };
        assert_eq!(config, expected);
    }
}
