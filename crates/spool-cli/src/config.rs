//! Configuration file management for spool.
//!
//! Provides a TOML-based config file at `~/.config/spool/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use spool_core::ExecutorConfig;

/// Env var overriding the jobs directory.
pub const JOBS_DIR_ENV: &str = "SPOOL_JOBS_DIR";

// -----------------------------------------------------------------------
// Config file types
// -----------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Root directory for job logs and status records.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jobs_dir: Option<PathBuf>,
    #[serde(default)]
    pub timeouts: TimeoutSection,
    /// Binary path per harness name, e.g. `claude = "/opt/bin/claude"`.
    #[serde(default)]
    pub binaries: HashMap<String, String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub struct TimeoutSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_duration_secs: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idle_timeout_secs: Option<u64>,
}

// -----------------------------------------------------------------------
// Paths
// -----------------------------------------------------------------------

/// Return the spool config directory.
///
/// Always uses XDG layout: `$XDG_CONFIG_HOME/spool` or `~/.config/spool`.
/// The platform-specific `dirs::config_dir()` is ignored (it returns
/// `~/Library/Application Support` on macOS).
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("spool");
    }
    home().join(".config").join("spool")
}

/// Return the path to the spool config file.
pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Default jobs directory: `$XDG_DATA_HOME/spool/jobs` or
/// `~/.local/share/spool/jobs`.
pub fn default_jobs_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg).join("spool").join("jobs");
    }
    home().join(".local").join("share").join("spool").join("jobs")
}

fn home() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

// -----------------------------------------------------------------------
// Read / write
// -----------------------------------------------------------------------

/// Load and parse the config file at `path`.
pub fn load_config_from(path: &Path) -> Result<ConfigFile> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents).context("failed to parse config file")
}

/// Load and parse the config file. Returns an error if it does not exist.
pub fn load_config() -> Result<ConfigFile> {
    load_config_from(&config_path())
}

/// Serialize and write the config file to `path`, creating parent dirs as
/// needed.
pub fn save_config_to(config: &ConfigFile, path: &Path) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create config directory {}", dir.display()))?;
    }
    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;
    Ok(())
}

// -----------------------------------------------------------------------
// Resolved config
// -----------------------------------------------------------------------

/// Fully resolved configuration, ready for use.
#[derive(Debug)]
pub struct SpoolConfig {
    pub executor: ExecutorConfig,
}

impl SpoolConfig {
    /// Resolve configuration using the chain: CLI flag > env var > config
    /// file > default.
    ///
    /// - Jobs dir: `cli_jobs_dir` > `SPOOL_JOBS_DIR` env > `jobs_dir` in the
    ///   config file > [`default_jobs_dir`]
    /// - Timeouts and binaries: config file > built-in defaults
    pub fn resolve(cli_jobs_dir: Option<&Path>) -> Result<Self> {
        let path = config_path();
        let file_config = if path.exists() {
            Some(load_config_from(&path)?)
        } else {
            None
        };
        Ok(Self::resolve_with(cli_jobs_dir, file_config))
    }

    pub fn resolve_with(cli_jobs_dir: Option<&Path>, file_config: Option<ConfigFile>) -> Self {
        let file_config = file_config.unwrap_or_default();

        let jobs_dir = if let Some(dir) = cli_jobs_dir {
            dir.to_path_buf()
        } else if let Ok(dir) = std::env::var(JOBS_DIR_ENV) {
            PathBuf::from(dir)
        } else if let Some(dir) = file_config.jobs_dir {
            dir
        } else {
            default_jobs_dir()
        };

        let mut executor = ExecutorConfig::new(jobs_dir);
        if let Some(secs) = file_config.timeouts.max_duration_secs {
            executor.max_duration = Duration::from_secs(secs);
        }
        executor.idle_timeout = file_config.timeouts.idle_timeout_secs.map(Duration::from_secs);
        executor.binaries = file_config.binaries;

        Self { executor }
    }
}

// -----------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------
