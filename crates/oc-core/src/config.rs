//! Configuration system for the oxidized-runahead frontend

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub general: GeneralConfig,
    pub runahead: RunAheadConfig,
    pub input: InputConfig,
    pub paths: PathConfig,
    pub debug: DebugConfig,
}

/// General frontend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub start_paused: bool,
    /// Frames per second to pace to, 0 runs unthrottled
    pub frame_limit: u32,
}

/// Run-ahead settings
///
/// Re-read by the orchestrator every frame.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RunAheadConfig {
    pub enabled: bool,
    /// Number of frames to run ahead of real time
    pub frames: u32,
    /// Use a second instance of the core instead of rolling back the primary
    pub secondary_instance: bool,
    /// Do not surface run-ahead warnings on screen
    pub hide_warnings: bool,
    /// Where the secondary instance's library copy is written.
    /// Defaults to the platform temporary directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temp_directory: Option<PathBuf>,
}

/// When input is sampled relative to `run()`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum PollType {
    /// Poll before the core runs
    Early,
    /// The core decides when to poll
    #[default]
    Normal,
    /// Poll on the first input query of the frame
    Late,
}

/// Input settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    pub poll_type: PollType,
    pub max_users: u32,
}

/// Path configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub cores: PathBuf,
    pub content: PathBuf,
}

/// Debug settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    pub log_level: LogLevel,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

// Default implementations

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            start_paused: false,
            frame_limit: 60,
        }
    }
}

impl Default for RunAheadConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            frames: 1,
            secondary_instance: true,
            hide_warnings: false,
            temp_directory: None,
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            poll_type: PollType::default(),
            max_users: 4,
        }
    }
}

impl Default for PathConfig {
    fn default() -> Self {
        let base = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-runahead");

        Self {
            cores: base.join("cores"),
            content: base.join("content"),
        }
    }
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::default(),
        }
    }
}

impl RunAheadConfig {
    /// Frames to run ahead this frame, 0 when the feature is off
    pub fn effective_frames(&self) -> u32 {
        if self.enabled {
            self.frames
        } else {
            0
        }
    }

    /// Directory the secondary instance's library copy goes into
    pub fn temp_root(&self) -> PathBuf {
        self.temp_directory
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join("oxidized-runahead"))
    }
}

impl Config {
    /// Load configuration from file, or create default if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            Ok(toml::from_str(&content)?)
        } else {
            let config = Self::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<(), Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("oxidized-runahead")
            .join("config.toml")
    }
}
