//! Application settings management

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main application settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    /// General settings
    #[serde(default)]
    pub general: GeneralSettings,

    /// Transcription engine settings
    #[serde(default)]
    pub engine: EngineSettings,

    /// Job orchestration settings
    #[serde(default)]
    pub jobs: JobSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralSettings {
    /// Data directory for models and transcription outputs
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Directory holding ggml model files
    #[serde(default = "default_models_dir")]
    pub models_dir: PathBuf,

    /// Directory the engine writes finished transcriptions into
    #[serde(default = "default_outputs_dir")]
    pub outputs_dir: PathBuf,

    /// Number of threads for inference (0 = auto)
    #[serde(default)]
    pub threads: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSettings {
    /// How many events a slow observer may fall behind before skipping
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,

    /// Bytes of worker stderr kept for crash reports
    #[serde(default = "default_stderr_capture_bytes")]
    pub stderr_capture_bytes: usize,
}

// Default value functions

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("com", "scribe", "scribe")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.local/share/scribe"))
}

fn default_models_dir() -> PathBuf {
    default_data_dir().join("models")
}

fn default_outputs_dir() -> PathBuf {
    default_data_dir().join("transcriptions")
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_capacity() -> usize {
    256
}

fn default_stderr_capture_bytes() -> usize {
    64 * 1024
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            models_dir: default_models_dir(),
            outputs_dir: default_outputs_dir(),
            threads: 0,
        }
    }
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            stderr_capture_bytes: default_stderr_capture_bytes(),
        }
    }
}

impl Settings {
    /// Default log filter when `RUST_LOG` is unset; `--verbose` wins over
    /// the configured level
    pub fn log_directive(&self, verbose: bool) -> &str {
        if verbose {
            "debug"
        } else {
            &self.general.log_level
        }
    }

    /// Load settings from the configuration file
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::debug!("No config file found, using defaults");
            let mut settings = Self::default();
            settings.apply_env_overrides();
            return Ok(settings);
        }

        let mut settings = Self::load_from(&config_path)?;
        settings.apply_env_overrides();

        Ok(settings)
    }

    /// Parse settings from a specific file, without env overrides
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Apply environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Some(dir) = non_empty_env("SCRIBE_MODELS_DIR") {
            self.engine.models_dir = PathBuf::from(dir);
        }
        if let Some(dir) = non_empty_env("SCRIBE_OUTPUTS_DIR") {
            self.engine.outputs_dir = PathBuf::from(dir);
        }
    }

    /// Get the path to the configuration file
    pub fn config_path() -> Result<PathBuf> {
        let dirs = ProjectDirs::from("com", "scribe", "scribe")
            .context("Could not determine config directory")?;

        let config_dir = dirs.config_dir();
        Ok(config_dir.join("config.toml"))
    }

    /// Write default configuration to a file
    pub fn write_default(path: &Path) -> Result<()> {
        let settings = Self::default();
        let content = toml::to_string_pretty(&settings)?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the Unix socket path for IPC
    pub fn socket_path(&self) -> PathBuf {
        runtime_dir().join("scribe.sock")
    }

    /// Get the PID file path
    pub fn pid_path(&self) -> PathBuf {
        runtime_dir().join("scribe.pid")
    }

    /// Ensure all required directories exist
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.general.data_dir)?;
        std::fs::create_dir_all(&self.engine.models_dir)?;
        std::fs::create_dir_all(&self.engine.outputs_dir)?;
        Ok(())
    }
}

fn runtime_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/tmp"))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_keep_outputs_under_data_dir() {
        let settings = Settings::default();
        assert!(settings
            .engine
            .outputs_dir
            .starts_with(&settings.general.data_dir));
        assert_eq!(settings.jobs.event_capacity, 256);
    }

    #[test]
    fn partial_file_falls_back_to_defaults() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[jobs]\nevent_capacity = 8\n")?;

        let settings = Settings::load_from(&path)?;
        assert_eq!(settings.jobs.event_capacity, 8);
        assert_eq!(settings.jobs.stderr_capture_bytes, 64 * 1024);
        assert_eq!(settings.general.log_level, "info");
        Ok(())
    }

    #[test]
    fn configured_log_level_is_the_default_filter() -> Result<()> {
        let tmp = tempfile::tempdir()?;
        let path = tmp.path().join("config.toml");
        std::fs::write(&path, "[general]\nlog_level = \"warn\"\n")?;

        let settings = Settings::load_from(&path)?;
        assert_eq!(settings.log_directive(false), "warn");
        assert_eq!(settings.log_directive(true), "debug");
        assert_eq!(Settings::default().log_directive(false), "info");
        Ok(())
    }
}
