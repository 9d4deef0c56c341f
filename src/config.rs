//! Configuration module for persistent settings.
//!
//! This module handles loading, saving, and validating the demo
//! configuration, and merging command-line overrides on top of it.

use crate::core_logic::ControllerSettings;
use crate::effects::EffectKind;
use crate::error::ConfigError;
use crate::ipc_server::DEFAULT_SOCKET_PATH;
use crate::resolution::{default_table, Resolution};
use crate::scheduler::SchedulerKind;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;
use tracing::warn;

/// Demo configuration.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Maximum processing rate, 0 disables pacing.
    pub fps_max: u16,
    /// Frames to process before exiting, 0 for no limit.
    pub num_frames: u64,
    pub camera_id: u8,
    /// Directory of still frames used instead of the camera.
    pub input: Option<PathBuf>,
    pub effect: EffectKind,
    /// Index into `resolutions` used at startup.
    pub initial_resolution: usize,
    /// Capture presets from lowest to highest.
    pub resolutions: Vec<Resolution>,
    pub stability_threshold: f64,
    pub check_interval_ms: u64,
    pub pending_check_interval_ms: u64,
    /// Step the ladder up when the deviation reaches this value.
    pub upscale_threshold: Option<f64>,
    pub rate_window_ms: u64,
    /// Level granted at startup.
    pub awm_start: u8,
    /// Highest level the constraint may allow.
    pub awm_upper: u8,
    pub socket_path: PathBuf,
    pub ipc_enabled: bool,
    pub snapshot_dir: Option<PathBuf>,
    pub scheduler: SchedulerKind,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fps_max: 25,
            num_frames: 0,
            camera_id: 0,
            input: None,
            effect: EffectKind::None,
            initial_resolution: 1,
            resolutions: default_table(),
            stability_threshold: 0.85,
            check_interval_ms: 1000,
            pending_check_interval_ms: 1000,
            upscale_threshold: None,
            rate_window_ms: 250,
            awm_start: 1,
            awm_upper: 2,
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            ipc_enabled: true,
            snapshot_dir: None,
            scheduler: SchedulerKind::Affinity,
        }
    }
}

impl Config {
    /// Validate configuration values.
    /// Returns Ok(()) if valid, Err with descriptive message if invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.resolutions.is_empty() {
            return Err(ConfigError::ValidationError(
                "resolutions must contain at least one preset".to_string(),
            ));
        }

        if let Some(bad) = self.resolutions.iter().find(|r| r.width == 0 || r.height == 0) {
            return Err(ConfigError::ValidationError(format!(
                "resolution {} has a zero dimension",
                bad
            )));
        }

        if self.initial_resolution >= self.resolutions.len() {
            return Err(ConfigError::ValidationError(format!(
                "initial_resolution ({}) is outside the table [0-{})",
                self.initial_resolution,
                self.resolutions.len()
            )));
        }

        if !(self.stability_threshold > 0.0 && self.stability_threshold <= 1.0) {
            return Err(ConfigError::ValidationError(format!(
                "stability_threshold ({}) must be in (0, 1]",
                self.stability_threshold
            )));
        }

        if let Some(upscale) = self.upscale_threshold {
            if !(upscale > self.stability_threshold) {
                return Err(ConfigError::ValidationError(format!(
                    "upscale_threshold ({}) must be greater than stability_threshold ({})",
                    upscale, self.stability_threshold
                )));
            }
        }

        if self.check_interval_ms == 0 {
            return Err(ConfigError::ValidationError(
                "check_interval_ms must be at least 1".to_string(),
            ));
        }

        if self.pending_check_interval_ms < self.check_interval_ms {
            return Err(ConfigError::ValidationError(format!(
                "pending_check_interval_ms ({}) cannot be shorter than check_interval_ms ({})",
                self.pending_check_interval_ms, self.check_interval_ms
            )));
        }

        if self.rate_window_ms == 0 {
            return Err(ConfigError::ValidationError(
                "rate_window_ms must be at least 1".to_string(),
            ));
        }

        if self.awm_start > self.awm_upper {
            return Err(ConfigError::ValidationError(format!(
                "awm_start ({}) cannot be greater than awm_upper ({})",
                self.awm_start, self.awm_upper
            )));
        }

        Ok(())
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            stability_threshold: self.stability_threshold,
            check_interval: Duration::from_millis(self.check_interval_ms),
            pending_check_interval: Duration::from_millis(self.pending_check_interval_ms),
            upscale_threshold: self.upscale_threshold,
        }
    }

    pub fn rate_window(&self) -> Duration {
        Duration::from_millis(self.rate_window_ms)
    }
}

/// Configuration manager with file I/O.
pub struct ConfigManager {
    config: RwLock<Config>,
    path: PathBuf,
}

impl ConfigManager {
    /// Load configuration from file or use defaults.
    /// If the file doesn't exist, returns a manager with default config.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let config = if path.exists() {
            let contents = fs::read_to_string(path).map_err(|e| {
                ConfigError::ParseError(format!("Failed to read config file: {}", e))
            })?;

            let config: Config = serde_json::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(format!("Invalid JSON: {}", e)))?;

            config.validate()?;
            config
        } else {
            Config::default()
        };

        Ok(Self {
            config: RwLock::new(config),
            path: path.to_path_buf(),
        })
    }

    /// Save configuration to file using atomic write.
    pub fn save(&self) -> Result<(), ConfigError> {
        let config = self.config.read().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire read lock".to_string())
        })?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Write to a temp file, then rename over the target.
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&*config)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Get current configuration.
    pub fn get(&self) -> Config {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|_| Config::default())
    }

    /// Update configuration with validation.
    pub fn update(&self, config: Config) -> Result<(), ConfigError> {
        config.validate()?;

        let mut current = self.config.write().map_err(|_| {
            ConfigError::ValidationError("Failed to acquire write lock".to_string())
        })?;
        *current = config;
        drop(current);

        self.save()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the default config path (`<config dir>/vidpace/config.json`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("vidpace")
            .join("config.json")
    }
}

/// Command-line arguments. Every value set here overrides the file.
#[derive(Parser, Debug, Clone, Default)]
#[command(author, version, about = "Frame grabbing demo with adaptive frame-rate control")]
pub struct CliArgs {
    /// Configuration file.
    #[arg(long, value_name = "PATH", env = "VIDPACE_CONFIG")]
    pub config: Option<PathBuf>,
    /// Camera id.
    #[arg(short = 'c', long = "cam", value_name = "ID")]
    pub camera_id: Option<u8>,
    /// Directory of still frames to play instead of the camera.
    #[arg(short, long, value_name = "DIR")]
    pub input: Option<PathBuf>,
    /// Maximum processing rate, 0 disables pacing.
    #[arg(short, long, value_name = "FPS")]
    pub fps_max: Option<u16>,
    /// Frames to process before exiting, 0 for no limit.
    #[arg(short, long = "num", value_name = "FRAMES")]
    pub num_frames: Option<u64>,
    /// Effect: none, edges, corners, blur (or 0-3).
    #[arg(short, long, value_name = "EFFECT")]
    pub effect: Option<String>,
    /// IPC socket path.
    #[arg(long = "socket", value_name = "PATH")]
    pub socket_path: Option<PathBuf>,
    /// Do not start the IPC server.
    #[arg(long)]
    pub no_ipc: bool,
    /// Directory snapshots are written to.
    #[arg(long, value_name = "DIR")]
    pub snapshot_dir: Option<PathBuf>,
    /// Resource scheduler.
    #[arg(long, value_enum)]
    pub scheduler: Option<SchedulerKind>,
    /// Log filter, overrides RUST_LOG.
    #[arg(long, value_name = "FILTER")]
    pub log_level: Option<String>,
    /// Persist the merged configuration before starting.
    #[arg(long)]
    pub save_config: bool,
}

impl CliArgs {
    /// Config file to load.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(ConfigManager::default_path)
    }

    /// Override `config` with every value given on the command line.
    pub fn merge_into(&self, config: &mut Config) {
        if let Some(id) = self.camera_id {
            config.camera_id = id;
        }
        if let Some(input) = &self.input {
            config.input = Some(input.clone());
        }
        if let Some(fps) = self.fps_max {
            config.fps_max = fps;
        }
        if let Some(num) = self.num_frames {
            config.num_frames = num;
        }
        if let Some(effect) = &self.effect {
            config.effect = effect.parse().unwrap_or_else(|e| {
                warn!("{}, falling back to none", e);
                EffectKind::None
            });
        }
        if let Some(path) = &self.socket_path {
            config.socket_path = path.clone();
        }
        if self.no_ipc {
            config.ipc_enabled = false;
        }
        if let Some(dir) = &self.snapshot_dir {
            config.snapshot_dir = Some(dir.clone());
        }
        if let Some(kind) = self.scheduler {
            config.scheduler = kind;
        }
    }
}
