//! Configuration loading from and saving to disk.

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::schema::NetConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
    Validation(Vec<ValidationError>),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "IO error: {}", e),
            ConfigError::Parse(e) => write!(f, "Parse error: {}", e),
            ConfigError::Serialize(e) => write!(f, "Serialize error: {}", e),
            ConfigError::Validation(errors) => {
                write!(f, "Validation failed: ")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 { write!(f, ", ")?; }
                    write!(f, "{}", err)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<NetConfig, ConfigError> {
    let content = fs::read_to_string(path).map_err(ConfigError::Io)?;
    let config: NetConfig = toml::from_str(&content).map_err(ConfigError::Parse)?;

    validate_config(&config).map_err(ConfigError::Validation)?;

    Ok(config)
}

/// Write `config` to `path` as pretty TOML.
pub fn save_config(path: &Path, config: &NetConfig) -> Result<(), ConfigError> {
    let content = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    fs::write(path, content).map_err(ConfigError::Io)
}

/// Persists the pid of the process serving the game port.
pub trait RunPidStore: Send + Sync {
    fn persist_run_pid(&self, pid: u32) -> Result<(), ConfigError>;
}

/// A configuration file on disk.
///
/// Writes are read-modify-write so fields edited by hand since startup survive.
#[derive(Debug)]
pub struct ConfigFile {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ConfigFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the file, or write and return the defaults when it does not exist.
    pub fn load_or_create(&self) -> Result<NetConfig, ConfigError> {
        if self.path.exists() {
            return load_config(&self.path);
        }
        let config = NetConfig::default();
        save_config(&self.path, &config)?;
        tracing::info!(path = ?self.path, "Wrote default configuration");
        Ok(config)
    }
}

impl RunPidStore for ConfigFile {
    fn persist_run_pid(&self, pid: u32) -> Result<(), ConfigError> {
        let _guard = self.write_lock.lock();
        let mut config = if self.path.exists() {
            load_config(&self.path)?
        } else {
            NetConfig::default()
        };
        config.server.run_pid = Some(pid);
        save_config(&self.path, &config)?;
        tracing::debug!(path = ?self.path, pid, "Persisted run pid");
        Ok(())
    }
}
