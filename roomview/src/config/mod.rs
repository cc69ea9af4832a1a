//! Configuration system for the `roomview` client.
//!
//! Supports layered configuration with the following priority (highest first):
//! 1. CLI arguments
//! 2. Environment variables (via clap `env` attribute)
//! 3. TOML config file (`~/.config/roomview/config.toml`)
//! 4. Compiled defaults
//!
//! Missing config file is not an error (defaults are used). An explicit
//! `--config` path that doesn't exist is an error.

use std::path::PathBuf;
use std::time::Duration;

use crate::timeline::render::is_valid_timestamp_format;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadFile {
        /// Path that was attempted.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Failed to parse the TOML configuration.
    #[error("failed to parse config file: {0}")]
    ParseToml(#[from] toml::de::Error),

    /// The timestamp format is not a valid strftime string.
    #[error("invalid timestamp format: {0:?}")]
    InvalidTimestampFormat(String),

    /// A size that must be positive was zero.
    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),
}

// ---------------------------------------------------------------------------
// TOML file structs (all fields Option for partial overrides)
// ---------------------------------------------------------------------------

/// Top-level TOML config file structure.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct ConfigFile {
    session: SessionFileConfig,
    timeline: TimelineFileConfig,
    ui: UiFileConfig,
}

/// `[session]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct SessionFileConfig {
    user_id: Option<String>,
    room: Option<String>,
}

/// `[timeline]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct TimelineFileConfig {
    initial_window: Option<usize>,
    backfill_batch_size: Option<usize>,
    backfill_settle_ms: Option<u64>,
    anchor_threshold_px: Option<f64>,
    scroll_debounce_ms: Option<u64>,
    receipt_debounce_ms: Option<u64>,
}

/// `[ui]` section of the config file.
#[derive(Debug, Default, serde::Deserialize)]
#[serde(default)]
struct UiFileConfig {
    timestamp_format: Option<String>,
    channel_capacity: Option<usize>,
}

// ---------------------------------------------------------------------------
// Resolved configuration (concrete types, all fields populated)
// ---------------------------------------------------------------------------

/// Tuning of the timeline engine (used by the session loop).
#[derive(Debug, Clone, PartialEq)]
pub struct TimelineConfig {
    /// Number of events loaded when a room is focused.
    pub initial_window: usize,
    /// Number of older events requested per backfill batch.
    pub backfill_batch_size: usize,
    /// Delay after a batch before the scroll geometry is evaluated again.
    pub backfill_settle: Duration,
    /// Distance from the viewport top within which the anchor triggers
    /// backfill.
    pub anchor_threshold_px: f64,
    /// Scroll quiescence required before evaluating backfill.
    pub scroll_debounce: Duration,
    /// Quiescence after a window update before reconciling receipts.
    pub receipt_debounce: Duration,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            initial_window: 20,
            backfill_batch_size: 10,
            backfill_settle: Duration::from_millis(200),
            anchor_threshold_px: 5.0,
            scroll_debounce: Duration::from_millis(200),
            receipt_debounce: Duration::from_millis(200),
        }
    }
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    // -- Session --
    /// Local user id.
    pub user_id: Option<String>,
    /// Room focused at startup.
    pub room: Option<String>,

    // -- Timeline --
    /// Timeline engine tuning.
    pub timeline: TimelineConfig,

    // -- UI --
    /// Timestamp display format string (chrono).
    pub timestamp_format: String,
    /// Capacity of the session command channel.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_id: None,
            room: None,
            timeline: TimelineConfig::default(),
            timestamp_format: "%H:%M".to_string(),
            channel_capacity: 256,
        }
    }
}

impl ClientConfig {
    /// Load configuration by merging CLI args, env vars, and a TOML file.
    ///
    /// CLI args and env vars are parsed via `clap`. If `--config` is given
    /// and the file does not exist, returns an error. If no `--config` is
    /// given, the default path (`~/.config/roomview/config.toml`) is tried
    /// and silently ignored if missing.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the explicit config file cannot be read
    /// or parsed, or if the resolved values are invalid.
    pub fn load(cli: &CliArgs) -> Result<Self, ConfigError> {
        let file = load_config_file(cli.config.as_deref())?;
        let config = Self::resolve(cli, &file);
        config.validate()?;
        Ok(config)
    }

    /// Resolve a `ClientConfig` from CLI args and a parsed config file.
    ///
    /// Priority: CLI > file > default.
    #[must_use]
    fn resolve(cli: &CliArgs, file: &ConfigFile) -> Self {
        let defaults = Self::default();
        let timeline = &file.timeline;

        Self {
            user_id: cli
                .user_id
                .clone()
                .or_else(|| file.session.user_id.clone()),
            room: cli.room.clone().or_else(|| file.session.room.clone()),
            timeline: TimelineConfig {
                initial_window: timeline
                    .initial_window
                    .unwrap_or(defaults.timeline.initial_window),
                backfill_batch_size: timeline
                    .backfill_batch_size
                    .unwrap_or(defaults.timeline.backfill_batch_size),
                backfill_settle: timeline
                    .backfill_settle_ms
                    .map_or(defaults.timeline.backfill_settle, Duration::from_millis),
                anchor_threshold_px: timeline
                    .anchor_threshold_px
                    .unwrap_or(defaults.timeline.anchor_threshold_px),
                scroll_debounce: timeline
                    .scroll_debounce_ms
                    .map_or(defaults.timeline.scroll_debounce, Duration::from_millis),
                receipt_debounce: timeline
                    .receipt_debounce_ms
                    .map_or(defaults.timeline.receipt_debounce, Duration::from_millis),
            },
            timestamp_format: cli
                .timestamp_format
                .clone()
                .or_else(|| file.ui.timestamp_format.clone())
                .unwrap_or(defaults.timestamp_format),
            channel_capacity: file
                .ui
                .channel_capacity
                .unwrap_or(defaults.channel_capacity),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_timestamp_format(&self.timestamp_format) {
            return Err(ConfigError::InvalidTimestampFormat(
                self.timestamp_format.clone(),
            ));
        }
        if self.timeline.initial_window == 0 {
            return Err(ConfigError::ZeroValue("timeline.initial_window"));
        }
        if self.timeline.backfill_batch_size == 0 {
            return Err(ConfigError::ZeroValue("timeline.backfill_batch_size"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::ZeroValue("ui.channel_capacity"));
        }
        Ok(())
    }
}

/// CLI arguments parsed by clap.
#[derive(clap::Parser, Debug, Default)]
#[command(version, about = "Room timeline viewer")]
pub struct CliArgs {
    /// Local user id.
    #[arg(long, env = "ROOMVIEW_USER")]
    pub user_id: Option<String>,

    /// Room to focus at startup.
    #[arg(long, env = "ROOMVIEW_ROOM")]
    pub room: Option<String>,

    /// Path to config file (default: `~/.config/roomview/config.toml`).
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Timestamp display format (chrono format string).
    #[arg(long)]
    pub timestamp_format: Option<String>,

    /// Log level filter (trace, debug, info, warn, error).
    #[arg(long, default_value = "info", env = "ROOMVIEW_LOG")]
    pub log_level: String,

    /// Path to log file (default: `$TMPDIR/roomview.log`).
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Load and parse a TOML config file.
///
/// If `explicit_path` is `Some`, the file must exist (error if not).
/// If `explicit_path` is `None`, the default path is tried and missing file
/// is treated as empty config.
fn load_config_file(explicit_path: Option<&std::path::Path>) -> Result<ConfigFile, ConfigError> {
    if let Some(p) = explicit_path {
        let contents = std::fs::read_to_string(p).map_err(|e| ConfigError::ReadFile {
            path: p.to_path_buf(),
            source: e,
        })?;
        return Ok(toml::from_str(&contents)?);
    }

    let Some(config_dir) = dirs::config_dir() else {
        return Ok(ConfigFile::default());
    };
    let path = config_dir.join("roomview").join("config.toml");
    match std::fs::read_to_string(&path) {
        Ok(contents) => Ok(toml::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(ConfigFile::default()),
        Err(e) => Err(ConfigError::ReadFile { path, source: e }),
    }
}
