//! Configuration management
//!
//! Loads an immutable [`Config`] value from an optional TOML file, with
//! serde defaults for every field so a missing file is never an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub vad: VadConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub transcript: TranscriptConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            vad: VadConfig::default(),
            session: SessionConfig::default(),
            transcript: TranscriptConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VadConfig {
    #[serde(default = "default_base_energy_threshold")]
    pub base_energy_threshold: f32,
    #[serde(default = "default_pause_short_ms")]
    pub pause_short_ms: u64,
    #[serde(default = "default_pause_hold_ms")]
    pub pause_hold_ms: u64,
    #[serde(default = "default_pause_trigger_ms")]
    pub pause_trigger_ms: u64,
    #[serde(default = "default_pause_timeout_ms")]
    pub pause_timeout_ms: u64,
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

fn default_base_energy_threshold() -> f32 {
    0.01
}
fn default_pause_short_ms() -> u64 {
    300
}
fn default_pause_hold_ms() -> u64 {
    1_000
}
fn default_pause_trigger_ms() -> u64 {
    3_000
}
fn default_pause_timeout_ms() -> u64 {
    10_000
}
fn default_history_size() -> usize {
    50
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            base_energy_threshold: default_base_energy_threshold(),
            pause_short_ms: default_pause_short_ms(),
            pause_hold_ms: default_pause_hold_ms(),
            pause_trigger_ms: default_pause_trigger_ms(),
            pause_timeout_ms: default_pause_timeout_ms(),
            history_size: default_history_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

fn default_idle_timeout_ms() -> u64 {
    5 * 60 * 1000
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranscriptConfig {
    #[serde(default = "default_confirmed_bound")]
    pub confirmed_bound: usize,
}

fn default_confirmed_bound() -> usize {
    500
}

impl Default for TranscriptConfig {
    fn default() -> Self {
        Self {
            confirmed_bound: default_confirmed_bound(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Optional shared bearer token required on `/ws/stream`. `None` disables the check.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8787".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            bearer_token: None,
        }
    }
}

impl Config {
    /// Load configuration from the platform config directory, creating a
    /// default file there if none exists yet.
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("failed to read config file at {}", path.display()))?;
            let config: Config = toml::from_str(&contents).context("failed to parse config.toml")?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save()?;
            Ok(config)
        }
    }

    /// Load from an explicit path, ignoring the platform config directory.
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file at {}", path.display()))?;
        toml::from_str(&contents).context("failed to parse config file")
    }

    pub fn save(&self) -> Result<()> {
        let path = config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).context("failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("failed to serialize config")?;
        std::fs::write(&path, contents).context("failed to write config file")?;
        Ok(())
    }
}

pub fn config_path() -> Result<PathBuf> {
    let base = directories::ProjectDirs::from("com", "convo-orchestrator", "convo-orchestrator")
        .context("failed to resolve project directories")?;
    Ok(base.config_dir().join("config.toml"))
}
