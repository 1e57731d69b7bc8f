//! Configuration loading for mmsearchd.
//!
//! An optional TOML file with `[daemon]`, `[resources]`, `[indexing]`
//! sections, each field `Option`-wrapped with a sensible default applied
//! when absent or when the file itself is missing, generalized from the
//! code-search settings this grew from to indexing/resource settings.
//! Environment variables always take precedence over the file.

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    pub daemon: Option<DaemonConfig>,
    pub resources: Option<ResourceConfig>,
    pub indexing: Option<IndexingConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct DaemonConfig {
    pub socket: Option<PathBuf>,
    pub data_dir: Option<PathBuf>,
    pub models_dir: Option<PathBuf>,
    pub autostart: Option<bool>,
    pub watched_dirs: Option<Vec<PathBuf>>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ResourceConfig {
    pub max_concurrent_tasks: Option<usize>,
    pub device: Option<String>,
    pub offline: Option<bool>,
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct IndexingConfig {
    pub frame_interval_ms: Option<u64>,
    pub accuracy_requirement_ms: Option<u64>,
    pub watch_debounce_ms: Option<u64>,
}

impl Config {
    pub fn daemon_socket_path(&self) -> Option<PathBuf> {
        self.daemon.as_ref().and_then(|d| d.socket.clone())
    }

    /// Root for catalog.db / vectors / cache. `DATA_DIR` overrides the file.
    pub fn data_dir(&self) -> PathBuf {
        std::env::var("DATA_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| self.daemon.as_ref().and_then(|d| d.data_dir.clone()))
            .unwrap_or_else(default_data_dir)
    }

    /// Root for local model weights. `MODELS_DIR` overrides the file.
    pub fn models_dir(&self) -> PathBuf {
        std::env::var("MODELS_DIR")
            .ok()
            .map(PathBuf::from)
            .or_else(|| self.daemon.as_ref().and_then(|d| d.models_dir.clone()))
            .unwrap_or_else(|| self.data_dir().join("models"))
    }

    /// `cpu|cuda|auto`. `DEVICE` overrides the file; defaults to `auto`.
    pub fn device(&self) -> String {
        std::env::var("DEVICE")
            .ok()
            .or_else(|| self.resources.as_ref().and_then(|r| r.device.clone()))
            .unwrap_or_else(|| "auto".to_string())
    }

    /// `OFFLINE=1` disables any network fetch regardless of the file.
    pub fn offline(&self) -> bool {
        if std::env::var("OFFLINE").as_deref() == Ok("1") {
            return true;
        }
        self.resources.as_ref().and_then(|r| r.offline).unwrap_or(false)
    }

    /// `MAX_CONCURRENT_TASKS` overrides the file; defaults to
    /// [`mm_core::constants::DEFAULT_MAX_CONCURRENT_TASKS`].
    pub fn max_concurrent_tasks(&self) -> usize {
        if let Ok(raw) = std::env::var("MAX_CONCURRENT_TASKS") {
            if let Ok(n) = raw.parse() {
                return n;
            }
        }
        self.resources
            .as_ref()
            .and_then(|r| r.max_concurrent_tasks)
            .unwrap_or(mm_core::constants::DEFAULT_MAX_CONCURRENT_TASKS)
    }

    pub fn frame_interval_ms(&self) -> u64 {
        self.indexing
            .as_ref()
            .and_then(|i| i.frame_interval_ms)
            .unwrap_or(2000)
    }

    pub fn accuracy_requirement_ms(&self) -> u64 {
        self.indexing
            .as_ref()
            .and_then(|i| i.accuracy_requirement_ms)
            .unwrap_or(mm_core::constants::ACCURACY_REQUIREMENT_MS)
    }

    pub fn watch_debounce_ms(&self) -> u64 {
        self.indexing
            .as_ref()
            .and_then(|i| i.watch_debounce_ms)
            .unwrap_or(mm_core::constants::DEFAULT_WATCH_DEBOUNCE_MS)
    }

    /// Directories watched for live ingestion in addition to whatever the
    /// admin socket is told to index explicitly.
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        self.daemon
            .as_ref()
            .and_then(|d| d.watched_dirs.clone())
            .unwrap_or_default()
    }
}

/// Default admin socket path, `DATA_DIR`-relative so a custom data dir moves
/// the socket with it.
pub fn default_socket_path(config: &Config) -> PathBuf {
    config.data_dir().join("mmsearchd.sock")
}

/// Default PID file path, alongside the socket.
pub fn default_pid_path(config: &Config) -> PathBuf {
    config.data_dir().join("mmsearchd.pid")
}

fn default_data_dir() -> PathBuf {
    ProjectDirs::from("", "", "mmsearch")
        .map(|dirs| dirs.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".mmsearch"))
}

pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("", "", "mmsearch").context("could not determine config directory")?;
    Ok(dirs.config_dir().join("config.toml"))
}

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        return Ok(Config::default());
    }

    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&contents).context("failed to parse config file as TOML")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_sections_absent() {
        let config = Config::default();
        assert_eq!(config.device(), "auto");
        assert!(!config.offline());
        assert_eq!(
            config.max_concurrent_tasks(),
            mm_core::constants::DEFAULT_MAX_CONCURRENT_TASKS
        );
    }

    #[test]
    fn resource_config_values_are_honored() {
        let config = Config {
            resources: Some(ResourceConfig {
                max_concurrent_tasks: Some(8),
                device: Some("cuda".into()),
                offline: Some(true),
            }),
            ..Default::default()
        };
        assert_eq!(config.max_concurrent_tasks(), 8);
        assert_eq!(config.device(), "cuda");
        assert!(config.offline());
    }

    #[test]
    fn indexing_config_values_are_honored() {
        let config = Config {
            indexing: Some(IndexingConfig {
                frame_interval_ms: Some(500),
                accuracy_requirement_ms: Some(1000),
                watch_debounce_ms: Some(250),
            }),
            ..Default::default()
        };
        assert_eq!(config.frame_interval_ms(), 500);
        assert_eq!(config.accuracy_requirement_ms(), 1000);
        assert_eq!(config.watch_debounce_ms(), 250);
    }

    #[test]
    fn daemon_socket_path_configured() {
        let config = Config {
            daemon: Some(DaemonConfig {
                socket: Some(PathBuf::from("/tmp/mmsearchd-test.sock")),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            config.daemon_socket_path().as_deref(),
            Some(Path::new("/tmp/mmsearchd-test.sock"))
        );
    }

    #[test]
    fn watched_dirs_defaults_to_empty() {
        let config = Config::default();
        assert!(config.watched_dirs().is_empty());
    }

    #[test]
    fn default_socket_and_pid_paths_live_under_data_dir() {
        let config = Config {
            daemon: Some(DaemonConfig {
                data_dir: Some(PathBuf::from("/tmp/mmsearchd-data")),
                ..Default::default()
            }),
            ..Default::default()
        };
        assert_eq!(
            default_socket_path(&config),
            PathBuf::from("/tmp/mmsearchd-data/mmsearchd.sock")
        );
        assert_eq!(
            default_pid_path(&config),
            PathBuf::from("/tmp/mmsearchd-data/mmsearchd.pid")
        );
    }
}
