use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;
use tracing::warn;

use crate::frame::Rotation;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub camera: CameraConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub permission: PermissionConfig,
    #[serde(default)]
    pub ui: UiConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which way a camera points relative to the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LensFacing {
    #[default]
    Back,
    Front,
}

impl std::fmt::Display for LensFacing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LensFacing::Back => f.write_str("back"),
            LensFacing::Front => f.write_str("front"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    #[serde(default)]
    pub lens_facing: LensFacing,
    pub sources: Vec<SourceConfig>,
}

/// How frames are pulled from a camera source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    /// Multipart MJPEG stream (`--frame` boundary).
    #[default]
    Mjpeg,
    /// One HTTP GET per frame at `fps`.
    Polling,
    /// Replay image files from a local directory at `fps`.
    Directory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    pub id: String,
    #[serde(default)]
    pub facing: LensFacing,
    /// Stream URL, frame URL or directory path depending on `mode`.
    pub url: String,
    #[serde(default)]
    pub mode: SourceMode,
    #[serde(default = "default_fps")]
    pub fps: f64,
    #[serde(default = "default_quality")]
    pub quality: u32,
    /// Clockwise rotation needed to bring the sensor image upright.
    #[serde(default)]
    pub rotation_degrees: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AnalysisConfig {
    #[serde(default = "default_target_width")]
    pub target_width: u32,
    #[serde(default = "default_target_height")]
    pub target_height: u32,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            target_width: default_target_width(),
            target_height: default_target_height(),
        }
    }
}

/// Preset answer for the camera capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Prompt on the controlling terminal.
    #[default]
    Ask,
    Granted,
    Denied,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermissionConfig {
    #[serde(default)]
    pub camera: PermissionMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e))?;
        let config = Self::parse(&content)?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.analysis.target_width == 0 || self.analysis.target_height == 0 {
            return Err(ConfigError::Invalid(
                "analysis target resolution must be non-zero".into(),
            ));
        }

        let mut ids = HashSet::new();
        for source in &self.camera.sources {
            if !ids.insert(source.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate camera source id {:?}",
                    source.id
                )));
            }
            if Rotation::from_degrees(source.rotation_degrees).is_none() {
                return Err(ConfigError::Invalid(format!(
                    "camera {:?}: rotation_degrees must be 0, 90, 180 or 270, got {}",
                    source.id, source.rotation_degrees
                )));
            }
            if !(MIN_FPS..=MAX_FPS).contains(&source.fps) {
                return Err(ConfigError::Invalid(format!(
                    "camera {:?}: fps must be between {MIN_FPS} and {MAX_FPS}, got {}",
                    source.id, source.fps
                )));
            }
        }

        if !self
            .camera
            .sources
            .iter()
            .any(|s| s.facing == self.camera.lens_facing)
        {
            warn!(
                lens_facing = %self.camera.lens_facing,
                "no camera source matches the selected lens facing; binding will fail"
            );
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    ReadFile(String, std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(String),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Frame-rate bounds for a source; outside them the tick period is not a usable duration.
pub const MIN_FPS: f64 = 0.001;
pub const MAX_FPS: f64 = 1000.0;

// Default value functions
fn default_fps() -> f64 {
    10.0
}
fn default_quality() -> u32 {
    80
}
fn default_target_width() -> u32 {
    100
}
fn default_target_height() -> u32 {
    100
}
fn default_bind() -> String {
    "0.0.0.0:8080".into()
}
fn default_log_level() -> String {
    "info".into()
}
