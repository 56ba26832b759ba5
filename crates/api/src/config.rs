//! Layered application configuration

use alerting::ToneConfig;
use camera_capture::CameraConfig;
use ::config::{Config, ConfigError, Environment, File};
use dms::{DetectorOptions, DmsConfig, SimulationConfig};
use frame_pipeline::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Used when no path is given; may be absent
pub const DEFAULT_CONFIG_PATH: &str = "config/monitor.toml";

/// Detector section
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub options: DetectorOptions,
    pub simulation: SimulationConfig,
}

/// HTTP status server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,
    pub bind_addr: String,
    /// Install the Prometheus recorder and serve `/metrics`
    pub metrics: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_addr: "0.0.0.0:8080".to_string(),
            metrics: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Filter used when `RUST_LOG` is not set
    pub level: String,
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete monitor configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub dms: DmsConfig,
    pub pipeline: PipelineConfig,
    pub alert: ToneConfig,
    pub server: ServerConfig,
    pub log: LogConfig,
}

impl AppConfig {
    /// Defaults, then the TOML file, then `MONITOR__SECTION__KEY` environment variables.
    ///
    /// An explicit `path` must exist; the default path is optional.
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        let file = path.unwrap_or(DEFAULT_CONFIG_PATH);

        Config::builder()
            .add_source(Config::try_from(&AppConfig::default())?)
            .add_source(File::with_name(file).required(path.is_some()))
            .add_source(
                Environment::with_prefix("MONITOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        self.camera.validate()?;
        self.dms.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }
}
