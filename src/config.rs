//! Service configuration and document discovery
//!
//! The configuration lives in `~/.config/opencomposite/config.toml`. Every key is
//! optional, a missing file means defaults.

use crate::matching::HostInfo;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn, Level};

const CONFIG_DIR: &str = "opencomposite";
const CONFIG_FILE: &str = "config.toml";
const DOCUMENT_EXTENSIONS: [&str; 2] = ["yaml", "yml"];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Unknown log level '{0}'")]
    InvalidLogLevel(String),

    #[error("Axis threshold {0} is outside 0.0..1.0")]
    InvalidAxisThreshold(f64),

    #[error("Emulator needs at least one write attempt")]
    NoWriteAttempts,
}

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceConfig {
    /// Directories with CompositeDevice documents, in priority order
    pub device_dirs: Vec<PathBuf>,
    /// Directories with CapabilityMap documents
    pub capability_map_dirs: Vec<PathBuf>,
    pub log_level: String,
    pub axis_threshold: f64,
    pub channels: ChannelConfig,
    pub emulator: EmulatorConfig,
    /// DMI identity used when the caller supplies none
    pub host: HostInfo,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            device_dirs: vec![
                PathBuf::from("/etc/opencomposite/devices.d"),
                PathBuf::from("/usr/share/opencomposite/devices"),
            ],
            capability_map_dirs: vec![
                PathBuf::from("/etc/opencomposite/capability_maps.d"),
                PathBuf::from("/usr/share/opencomposite/capability_maps"),
            ],
            log_level: "info".to_string(),
            axis_threshold: crate::mapping::DEFAULT_AXIS_THRESHOLD,
            channels: ChannelConfig::default(),
            emulator: EmulatorConfig::default(),
            host: HostInfo::default(),
        }
    }
}

// Kanalgrößen
#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ChannelConfig {
    pub instance_buffer: usize,
    pub source_buffer: usize,
    pub manager_buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            instance_buffer: 2048,
            source_buffer: 512,
            manager_buffer: 256,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Copy, Debug, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EmulatorConfig {
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl EmulatorConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for EmulatorConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay_ms: 5,
        }
    }
}

impl ServiceConfig {
    pub fn default_path() -> PathBuf {
        let mut path = dirs::config_dir().unwrap_or_else(|| {
            warn!("Could not determine config directory, using current directory");
            PathBuf::from(".")
        });
        path.push(CONFIG_DIR);
        path.push(CONFIG_FILE);
        path
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: ServiceConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `path`; a missing file yields the defaults
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let exists = tokio::fs::try_exists(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        if !exists {
            info!("No config file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let config = Self::from_toml(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn level(&self) -> Result<Level, ConfigError> {
        Level::from_str(&self.log_level)
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        self.level()?;
        if !(0.0..1.0).contains(&self.axis_threshold) {
            return Err(ConfigError::InvalidAxisThreshold(self.axis_threshold));
        }
        if self.emulator.max_attempts == 0 {
            return Err(ConfigError::NoWriteAttempts);
        }
        Ok(())
    }
}

/// Collects the YAML documents of `dirs`. Files are sorted by name within
/// each directory; directories keep their given order. Missing directories
/// are skipped.
pub async fn document_paths(dirs: &[PathBuf]) -> Vec<PathBuf> {
    let mut paths = Vec::new();
    for dir in dirs {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) => {
                debug!("Skipping document directory {}: {}", dir.display(), e);
                continue;
            }
        };

        let mut found = Vec::new();
        loop {
            match entries.next_entry().await {
                Ok(Some(entry)) => {
                    let path = entry.path();
                    if is_document(&path) {
                        found.push(path);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("Failed to read entry in {}: {}", dir.display(), e);
                    break;
                }
            }
        }
        found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
        paths.extend(found);
    }
    paths
}

fn is_document(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| DOCUMENT_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}
