//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
    /// Configuration parsed but failed validation
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
            ConfigError::Invalid(msg) => write!(f, "Invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Optical drive configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriveConfig {
    /// Block device of the drive (default /dev/sr0)
    #[serde(default = "default_drive_path")]
    pub path: PathBuf,
    /// Seconds between drive status polls
    #[serde(default = "default_two_secs")]
    pub poll_interval_secs: u64,
    /// Seconds to wait after a ready transition before trusting it
    #[serde(default = "default_two_secs")]
    pub settle_delay_secs: u64,
}

fn default_drive_path() -> PathBuf {
    PathBuf::from("/dev/sr0")
}

fn default_two_secs() -> u64 {
    2
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self {
            path: default_drive_path(),
            poll_interval_secs: default_two_secs(),
            settle_delay_secs: default_two_secs(),
        }
    }
}

/// Duration thresholds driving title selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Thresholds {
    /// Any title at least this long switches to movie mode (default 60)
    #[serde(default = "default_movie_min_minutes")]
    pub movie_min_minutes: u64,
    /// Minimum length of an episode in episode mode (default 18)
    #[serde(default = "default_episode_min_minutes")]
    pub episode_min_minutes: u64,
}

fn default_movie_min_minutes() -> u64 {
    60
}

fn default_episode_min_minutes() -> u64 {
    18
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            movie_min_minutes: default_movie_min_minutes(),
            episode_min_minutes: default_episode_min_minutes(),
        }
    }
}

impl Thresholds {
    pub fn movie(&self) -> Duration {
        Duration::from_secs(self.movie_min_minutes * 60)
    }

    pub fn episode(&self) -> Duration {
        Duration::from_secs(self.episode_min_minutes * 60)
    }
}

/// MakeMKV-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MakeMkvConfig {
    #[serde(default = "default_makemkv_binary")]
    pub binary_path: PathBuf,
}

fn default_makemkv_binary() -> PathBuf {
    PathBuf::from("makemkvcon")
}

impl Default for MakeMkvConfig {
    fn default() -> Self {
        Self {
            binary_path: default_makemkv_binary(),
        }
    }
}

/// Encoding profile applied to one kind of disc
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct HandBrakeProfile {
    /// Preset file name, resolved against `presets_dir` when set
    #[serde(default)]
    pub preset_file: Option<String>,
    /// Preset inside the file; HandBrake picks the first one when unset
    #[serde(default)]
    pub preset_name: Option<String>,
    #[serde(default)]
    pub audio_languages: Vec<String>,
    #[serde(default)]
    pub subtitle_languages: Vec<String>,
}

/// HandBrake-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct HandBrakeConfig {
    #[serde(default = "default_handbrake_binary")]
    pub binary_path: PathBuf,
    #[serde(default)]
    pub presets_dir: Option<PathBuf>,
    /// Encoder thread count (0 = leave to the encoder)
    #[serde(default)]
    pub threads: u32,
    #[serde(default)]
    pub bluray: HandBrakeProfile,
    #[serde(default)]
    pub dvd: HandBrakeProfile,
}

fn default_handbrake_binary() -> PathBuf {
    PathBuf::from("HandBrakeCLI")
}

impl Default for HandBrakeConfig {
    fn default() -> Self {
        Self {
            binary_path: default_handbrake_binary(),
            presets_dir: None,
            threads: 0,
            bluray: HandBrakeProfile::default(),
            dvd: HandBrakeProfile::default(),
        }
    }
}

/// Encode worker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Milliseconds between queue polls (default 1000)
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,
}

fn default_tick_interval_ms() -> u64 {
    1000
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Root directory for ripped and encoded discs
    #[serde(default)]
    pub output_dir: PathBuf,
    /// Directory for queue state, lock file and session log
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub drive: DriveConfig,
    #[serde(default)]
    pub thresholds: Thresholds,
    #[serde(default)]
    pub makemkv: MakeMkvConfig,
    #[serde(default)]
    pub handbrake: HandBrakeConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
}


impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - RIPLINE_OUTPUT_DIR -> output_dir
    /// - RIPLINE_STATE_DIR -> state_dir
    /// - RIPLINE_DRIVE_PATH -> drive.path
    /// - RIPLINE_MOVIE_MIN_MINUTES -> thresholds.movie_min_minutes
    /// - RIPLINE_EPISODE_MIN_MINUTES -> thresholds.episode_min_minutes
    /// - RIPLINE_MAKEMKV_BINARY -> makemkv.binary_path
    /// - RIPLINE_HANDBRAKE_BINARY -> handbrake.binary_path
    /// - RIPLINE_HANDBRAKE_THREADS -> handbrake.threads
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RIPLINE_OUTPUT_DIR") {
            if !val.is_empty() {
                self.output_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("RIPLINE_STATE_DIR") {
            if !val.is_empty() {
                self.state_dir = Some(PathBuf::from(val));
            }
        }

        if let Ok(val) = env::var("RIPLINE_DRIVE_PATH") {
            if !val.is_empty() {
                self.drive.path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("RIPLINE_MOVIE_MIN_MINUTES") {
            if let Ok(minutes) = val.parse::<u64>() {
                self.thresholds.movie_min_minutes = minutes;
            }
        }

        if let Ok(val) = env::var("RIPLINE_EPISODE_MIN_MINUTES") {
            if let Ok(minutes) = val.parse::<u64>() {
                self.thresholds.episode_min_minutes = minutes;
            }
        }

        if let Ok(val) = env::var("RIPLINE_MAKEMKV_BINARY") {
            if !val.is_empty() {
                self.makemkv.binary_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("RIPLINE_HANDBRAKE_BINARY") {
            if !val.is_empty() {
                self.handbrake.binary_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("RIPLINE_HANDBRAKE_THREADS") {
            if let Ok(threads) = val.parse::<u32>() {
                self.handbrake.threads = threads;
            }
        }
    }

    /// Check the values that cannot be defaulted
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.output_dir.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("output_dir is required".to_string()));
        }
        if self.drive.path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("drive.path is required".to_string()));
        }
        if self.thresholds.movie_min_minutes == 0 || self.thresholds.episode_min_minutes == 0 {
            return Err(ConfigError::Invalid(
                "thresholds must be greater than zero".to_string(),
            ));
        }
        if self.thresholds.episode_min_minutes > self.thresholds.movie_min_minutes {
            return Err(ConfigError::Invalid(format!(
                "episode_min_minutes ({}) exceeds movie_min_minutes ({})",
                self.thresholds.episode_min_minutes, self.thresholds.movie_min_minutes
            )));
        }
        if self.drive.poll_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "drive.poll_interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.worker.tick_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "worker.tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding the queue file, lock file and session log.
    ///
    /// Falls back to `$HOME/.ripline`, or `./.ripline` when HOME is unset.
    pub fn resolved_state_dir(&self) -> PathBuf {
        if let Some(dir) = &self.state_dir {
            return dir.clone();
        }
        env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ripline")
    }

    /// Load configuration from file, apply environment overrides and validate
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }
}
