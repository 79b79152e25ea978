use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::Deserialize;
use thiserror::Error;

use crate::{action::ConfidencePolicy, model_download};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub pipeline: PipelineConfig,
    pub landmarks: LandmarkConfig,
    pub resolver: ResolverConfig,
    pub display: DisplayConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CameraConfig {
    pub index: u32,
    /// Flip frames horizontally so the preview acts like a mirror.
    pub mirror: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            mirror: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PipelineConfig {
    /// How long `start` waits for the worker to open the camera.
    pub open_timeout_ms: u64,
    pub join_timeout_ms: u64,
    /// Pause after a failed camera read before trying again.
    pub read_retry_ms: u64,
    pub decision_capacity: usize,
    pub frame_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            open_timeout_ms: 5_000,
            join_timeout_ms: 1_000,
            read_retry_ms: 5,
            decision_capacity: 1,
            frame_capacity: 2,
        }
    }
}

impl PipelineConfig {
    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn read_retry(&self) -> Duration {
        Duration::from_millis(self.read_retry_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LandmarkConfig {
    pub handpose_model: PathBuf,
    pub palm_model: PathBuf,
    pub max_hands: usize,
    pub min_hand_confidence: f32,
    pub palm_score_threshold: f32,
    pub palm_nms_threshold: f32,
    pub intra_threads: usize,
}

impl Default for LandmarkConfig {
    fn default() -> Self {
        Self {
            handpose_model: model_download::default_handpose_estimator_model_path(),
            palm_model: model_download::default_palm_detector_model_path(),
            max_hands: 2,
            min_hand_confidence: 0.5,
            palm_score_threshold: 0.5,
            palm_nms_threshold: 0.3,
            intra_threads: 2,
        }
    }
}

#[derive(Debug, Default, Deserialize, Clone)]
#[serde(default)]
pub struct ResolverConfig {
    pub policy: ConfidencePolicy,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub tick_rate_hz: u32,
    pub preview_width: u32,
    pub preview_height: u32,
    pub status_interval_ms: u64,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            preview_width: 320,
            preview_height: 240,
            status_interval_ms: 1_000,
        }
    }
}

impl DisplayConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.tick_rate_hz.max(1)))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&content).map_err(|err| match err {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })?;
        log::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: PathBuf::from("<inline>"),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipeline.frame_capacity == 0 || self.pipeline.decision_capacity == 0 {
            return Err(ConfigError::Invalid(
                "channel capacities must be at least 1".to_string(),
            ));
        }
        if self.landmarks.max_hands == 0 {
            return Err(ConfigError::Invalid("max_hands must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.landmarks.min_hand_confidence) {
            return Err(ConfigError::Invalid(format!(
                "min_hand_confidence {} is outside [0, 1]",
                self.landmarks.min_hand_confidence
            )));
        }
        if self.display.tick_rate_hz == 0 {
            return Err(ConfigError::Invalid("tick_rate_hz must be positive".to_string()));
        }
        Ok(())
    }
}
