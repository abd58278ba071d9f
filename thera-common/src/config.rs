//! Configuration loading and root folder resolution

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Database file name inside the root folder
pub const DATABASE_FILE_NAME: &str = "thera.db";

/// Lifecycle service settings read from the TOML config file
///
/// Every field has a default so a missing file or a partial file is valid.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Root folder override (the `root_folder` key)
    pub root_folder: Option<PathBuf>,
    /// HTTP listen port
    pub port: u16,
    /// Run the overdue sweeper inside the service process
    pub sweep_enabled: bool,
    /// Seconds between overdue sweeps
    pub sweep_interval_secs: u64,
    /// Maximum assignments promoted per sweep transaction
    pub sweep_batch_size: u32,
    /// SQLite busy timeout applied to every connection
    pub busy_timeout_ms: u64,
    /// Upper bound on retrying a transaction that hit a locked database
    pub max_lock_wait_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            root_folder: None,
            port: 5830,
            sweep_enabled: true,
            sweep_interval_secs: 300,
            sweep_batch_size: 200,
            busy_timeout_ms: 5000,
            max_lock_wait_ms: 10_000,
        }
    }
}

impl LifecycleConfig {
    /// Parse config from TOML text and validate it
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: LifecycleConfig = toml::from_str(content)
            .map_err(|e| Error::Config(format!("Invalid config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from an explicit path, or from the platform config file if present
    ///
    /// Falls back to defaults when no path is given and no config file exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => match load_config_file() {
                Ok(p) => p,
                Err(_) => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Reject values the sweeper and pool cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.sweep_interval_secs == 0 {
            return Err(Error::Config("sweep_interval_secs must be greater than 0".to_string()));
        }
        if self.sweep_batch_size == 0 {
            return Err(Error::Config("sweep_batch_size must be greater than 0".to_string()));
        }
        if self.port == 0 {
            return Err(Error::Config("port must be greater than 0".to_string()));
        }
        Ok(())
    }

    /// Database file path for a resolved root folder
    pub fn database_path(root_folder: &Path) -> PathBuf {
        root_folder.join(DATABASE_FILE_NAME)
    }
}

/// Root folder resolution priority order:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. TOML config file `root_folder` key
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    config: Option<&LifecycleConfig>,
) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(root_folder) = config.and_then(|c| c.root_folder.as_ref()) {
        return root_folder.clone();
    }

    // Priority 4: OS-dependent compiled default
    get_default_root_folder()
}

/// Get default configuration file path for the platform
fn load_config_file() -> Result<PathBuf> {
    if cfg!(target_os = "linux") {
        // Try ~/.config/thera/config.toml first, then /etc/thera/config.toml
        let user_config = dirs::config_dir().map(|d| d.join("thera").join("config.toml"));
        let system_config = PathBuf::from("/etc/thera/config.toml");

        if let Some(path) = user_config {
            if path.exists() {
                return Ok(path);
            }
        }
        if system_config.exists() {
            return Ok(system_config);
        }
        return Err(Error::Config("No config file found".to_string()));
    }

    let config_path = dirs::config_dir()
        .map(|d| d.join("thera").join("config.toml"))
        .ok_or_else(|| Error::Config("Could not determine config directory".to_string()))?;

    if config_path.exists() {
        Ok(config_path)
    } else {
        Err(Error::Config(format!("Config file not found: {:?}", config_path)))
    }
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/thera (or /var/lib/thera for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("thera"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/thera"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("thera"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/thera"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("thera"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\thera"))
    } else {
        PathBuf::from("./thera_data")
    }
}
