//! Configuration parsing and management for mocopi-tracker

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, TrackerError};
use crate::skeleton::{PartialPolicy, PositionMode, TrackerMapping};
use crate::tracker::TrackerMode;
use crate::transport::HandoffMode;

/// Default mocopi UDP port
pub const DEFAULT_PORT: u16 = 12351;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Update loop rate in Hz
    pub tick_rate_hz: u32,
    /// Seconds between status log lines, 0 disables them
    pub status_interval_secs: u64,
    pub trackers: Vec<TrackerConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_rate_hz: 60,
            status_interval_secs: 10,
            trackers: vec![TrackerConfig::default()],
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, TrackerError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ConfigError::ReadFile(format!("{}: {}", path.as_ref().display(), e))
        })?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string
    pub fn from_str(s: &str) -> Result<Self, TrackerError> {
        toml::from_str(s).map_err(|e| ConfigError::Parse(e.to_string()).into())
    }

    /// Load configuration from default paths
    pub fn load() -> Result<Self, TrackerError> {
        let paths = [
            PathBuf::from("config.toml"),
            PathBuf::from("config/default.toml"),
            dirs_path().join("config.toml"),
        ];

        for path in &paths {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), TrackerError> {
        if self.tick_rate_hz == 0 {
            return Err(invalid("tick_rate_hz", "Tick rate must be greater than 0"));
        }

        if self.trackers.is_empty() {
            return Err(invalid("trackers", "At least one tracker must be configured"));
        }

        let mut names = HashSet::new();
        for tracker in &self.trackers {
            if !names.insert(tracker.name.as_str()) {
                return Err(invalid(
                    "trackers.name",
                    &format!("Duplicate tracker name '{}'", tracker.name),
                ));
            }
            tracker.validate()?;
        }

        Ok(())
    }
}

fn invalid(field: &str, message: &str) -> TrackerError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.to_string(),
    }
    .into()
}

/// One mocopi consumer: where it listens, how it resolves, what it drives
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub name: String,
    pub listen_address: String,
    pub port: u16,
    /// Frame handoff between the receive thread and the tick
    pub handoff: HandoffMode,
    /// Capacity of the frame queue when `handoff = "queue"`
    pub queue_capacity: usize,
    /// Initial mode
    pub mode: TrackerMode,
    pub position_mode: PositionMode,
    pub partial_policy: PartialPolicy,
    pub mappings: Vec<TrackerMapping>,
    pub recording: RecordingConfig,
    pub playback: PlaybackConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            name: "mocopi".to_string(),
            listen_address: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            handoff: HandoffMode::default(),
            queue_capacity: 64,
            mode: TrackerMode::default(),
            position_mode: PositionMode::default(),
            partial_policy: PartialPolicy::default(),
            mappings: Vec::new(),
            recording: RecordingConfig::default(),
            playback: PlaybackConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Socket address to bind
    pub fn endpoint(&self) -> Result<SocketAddr, ConfigError> {
        let ip: IpAddr = self.listen_address.parse().map_err(|_| ConfigError::InvalidValue {
            field: format!("trackers.{}.listen_address", self.name),
            message: format!("'{}' is not an IP address", self.listen_address),
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }

    /// Where recordings are written
    pub fn recording_path(&self) -> PathBuf {
        self.recording.folder.join(&self.recording.file_name)
    }

    /// Where the initialization snapshot lives
    pub fn initialization_path(&self) -> PathBuf {
        self.recording.folder.join(&self.recording.initialization_file)
    }

    /// Recording replayed in playback mode
    pub fn playback_path(&self) -> PathBuf {
        self.recording.folder.join(&self.playback.file_name)
    }

    fn validate(&self) -> Result<(), TrackerError> {
        let field = |name: &str| format!("trackers.{}.{}", self.name, name);

        if self.name.trim().is_empty() {
            return Err(invalid("trackers.name", "Tracker name must not be empty"));
        }

        if self.port == 0 {
            return Err(invalid(&field("port"), "Port must be greater than 0"));
        }

        self.endpoint()?;

        if self.queue_capacity == 0 {
            return Err(invalid(
                &field("queue_capacity"),
                "Queue capacity must be greater than 0",
            ));
        }

        if self.playback.frame_rate.is_nan() || self.playback.frame_rate <= 0.0 {
            return Err(invalid(
                &field("playback.frame_rate"),
                "Playback frame rate must be greater than 0",
            ));
        }

        if self.playback.speed.is_nan() || self.playback.speed < 0.0 {
            return Err(invalid(
                &field("playback.speed"),
                "Playback speed must not be negative",
            ));
        }

        if self.recording.file_name.trim().is_empty() {
            return Err(invalid(
                &field("recording.file_name"),
                "Recording file name must not be empty",
            ));
        }

        if self.mappings.iter().any(|m| m.target.trim().is_empty()) {
            tracing::warn!(
                "Tracker '{}' has mappings without a target; they will be ignored",
                self.name
            );
        }

        Ok(())
    }
}

/// Session recording configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    /// Start recording as soon as live frames arrive
    pub enabled: bool,
    /// Directory for recordings and the initialization snapshot
    pub folder: PathBuf,
    pub file_name: String,
    pub initialization_file: String,
    /// Keep only bones with a mapping
    pub record_only_mapped_bones: bool,
    /// Stop automatically after this many seconds
    pub max_duration_secs: Option<f64>,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            folder: PathBuf::from("recordings"),
            file_name: "mocopi_recording.json".to_string(),
            initialization_file: "mocopi_initialization.json".to_string(),
            record_only_mapped_bones: true,
            max_duration_secs: None,
        }
    }
}

/// Session playback configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Recording to replay, relative to the recording folder
    pub file_name: String,
    /// Frames per second
    pub frame_rate: f32,
    /// Time scale, 1.0 is real time
    pub speed: f32,
    pub loop_playback: bool,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            file_name: "mocopi_recording.json".to_string(),
            frame_rate: 60.0,
            speed: 1.0,
            loop_playback: true,
        }
    }
}

/// Get the platform-specific configuration directory
fn dirs_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        if let Some(config_dir) = std::env::var_os("XDG_CONFIG_HOME") {
            return PathBuf::from(config_dir).join("mocopi-tracker");
        }
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(".config/mocopi-tracker");
        }
    }

    #[cfg(target_os = "macos")]
    {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join("Library/Application Support/mocopi-tracker");
        }
    }

    #[cfg(target_os = "windows")]
    {
        if let Some(appdata) = std::env::var_os("APPDATA") {
            return PathBuf::from(appdata).join("mocopi-tracker");
        }
    }

    PathBuf::from(".")
}
