//! Configuration management for the reload server.
//!
//! Defaults, then an optional TOML file, then environment variable overrides.
//! Command-line flags are applied on top by `main`.

use crate::utils::errors::{ReloadError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub app: AppConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// TCP port to listen on (all interfaces)
    pub port: u16,

    /// Directory that receives the application files
    pub work_dir: PathBuf,

    /// Upper bound on how long a single accept waits before re-checking shutdown
    pub accept_poll_ms: u64,

    /// Inactivity timeout while receiving a package
    pub read_timeout_secs: u64,

    /// Socket read buffer size
    pub read_chunk_size: usize,

    /// Grace period given to the app on server shutdown
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Manifest file name, relative to the working directory
    pub manifest: PathBuf,

    /// Launcher binary used to run the manifest script
    pub launcher: PathBuf,

    /// Pass `--reinstall` to the launcher
    pub reinstall: bool,

    /// Value of `DISPLAY` for the launched app
    pub display: String,

    /// Directory prepended to the app's `PATH`
    pub extra_path: PathBuf,

    /// Grace period given to a running app before it is replaced
    pub restart_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Forward the app's stdout/stderr into the log
    pub app_output: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8050,
            work_dir: PathBuf::from("/work"),
            accept_poll_ms: 1000,
            read_timeout_secs: 5,
            read_chunk_size: 256 * 1024,
            shutdown_timeout_secs: 5,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            manifest: PathBuf::from("pyproject.toml"),
            launcher: PathBuf::from("/root/.local/bin/uv"),
            reinstall: true,
            display: ":99".to_string(),
            extra_path: PathBuf::from("/root/.local/bin"),
            restart_timeout_secs: 3,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            app_output: true,
        }
    }
}

impl ServerConfig {
    pub fn accept_poll(&self) -> Duration {
        Duration::from_millis(self.accept_poll_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl AppConfig {
    pub fn restart_timeout(&self) -> Duration {
        Duration::from_secs(self.restart_timeout_secs)
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| ReloadError::Config(e.to_string()))
    }

    /// Apply overrides from the process environment (and `.env`, if present)
    pub fn apply_env(&mut self) {
        let _ = dotenvy::dotenv();
        self.apply_vars(|key| std::env::var(key).ok());
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) {
        if let Some(port) = var("RELOADER_PORT").and_then(|v| v.parse().ok()) {
            self.server.port = port;
        }
        if let Some(dir) = var("WORK_DIR") {
            self.server.work_dir = PathBuf::from(dir);
        }
        if let Some(launcher) = var("RELOADER_LAUNCHER") {
            self.app.launcher = PathBuf::from(launcher);
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.log.level = level;
        }
        if let Some(enabled) = var("RELOADER_APP_OUTPUT").and_then(|v| parse_flag(&v)) {
            self.log.app_output = enabled;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.server.read_chunk_size == 0 {
            return Err(ReloadError::Config("server.read_chunk_size must be > 0".into()));
        }
        if self.server.accept_poll_ms == 0 || self.server.read_timeout_secs == 0 {
            return Err(ReloadError::Config(
                "server.accept_poll_ms and server.read_timeout_secs must be > 0".into(),
            ));
        }
        if self.app.manifest.is_absolute() {
            return Err(ReloadError::Config(
                "app.manifest must be relative to the working directory".into(),
            ));
        }
        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
