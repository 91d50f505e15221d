use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Default number of observers handed to a notifier per page.
pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config: {0}")]
    ReadError(String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Runtime settings for cascade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CascadeConfig {
    /// How observer pages are delivered
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Worker process executing remotely delivered pages
    #[serde(default)]
    pub worker: WorkerConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Execute pages inline on the mutating thread
    #[default]
    Local,
    /// Forward pages to a worker over TCP
    Remote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Page size used when an `observes` declaration sets none
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub backend: BackendKind,

    /// Worker address used by the remote backend
    #[serde(default = "default_remote_addr")]
    pub remote_addr: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            backend: BackendKind::Local,
            remote_addr: default_remote_addr(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerConfig {
    #[serde(default = "default_remote_addr")]
    pub listen_addr: String,

    /// Capacity of the channel between connections and the processor
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Work items executed together
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Longest wait for a chunk to fill (ms)
    #[serde(default = "default_chunk_timeout_ms")]
    pub chunk_timeout_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_remote_addr(),
            buffer_size: default_buffer_size(),
            chunk_size: default_chunk_size(),
            chunk_timeout_ms: default_chunk_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "pretty", "compact", "full"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}
fn default_remote_addr() -> String {
    "127.0.0.1:8787".to_string()
}
fn default_buffer_size() -> usize {
    1024
}
fn default_chunk_size() -> usize {
    16
}
fn default_chunk_timeout_ms() -> u64 {
    50
}
fn default_log_level() -> String {
    "warn".to_string()
}
fn default_log_format() -> String {
    "pretty".to_string()
}

/// Loads [`CascadeConfig`] from files and the environment.
pub struct ConfigManager {
    config: CascadeConfig,
    config_path: Option<PathBuf>,
}

impl ConfigManager {
    /// Load configuration with the following precedence:
    /// 1. Environment variables (`CASCADE_*`, after reading `.env`)
    /// 2. Config file (`./.cascade.toml`, then `~/.cascade/config.toml`)
    /// 3. Defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_dotenv();
        let (config, config_path) = Self::load_config_file()?;
        Self::finish(config, config_path)
    }

    /// Same as [`ConfigManager::load`] but reads the given file.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        Self::load_dotenv();
        let config = Self::read_toml_file(path)?;
        Self::finish(config, Some(path.to_path_buf()))
    }

    fn finish(config: CascadeConfig, config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let config = Self::apply_overrides(config, |key| std::env::var(key).ok());
        Self::validate_config(&config)?;

        info!(
            config_file = ?config_path,
            backend = ?config.dispatch.backend,
            batch_size = config.dispatch.batch_size,
            "configuration loaded"
        );
        Ok(Self {
            config,
            config_path,
        })
    }

    fn load_dotenv() {
        if Path::new(".env").exists() {
            if let Err(e) = dotenv::from_filename(".env") {
                warn!("Failed to load .env file: {}", e);
            }
            return;
        }

        if let Some(home) = dirs::home_dir() {
            let home_env = home.join(".cascade.env");
            if home_env.exists() {
                if let Err(e) = dotenv::from_path(&home_env) {
                    warn!("Failed to load .cascade.env: {}", e);
                }
            }
        }
    }

    fn load_config_file() -> Result<(CascadeConfig, Option<PathBuf>), ConfigError> {
        let local_config = Path::new(".cascade.toml");
        if local_config.exists() {
            let config = Self::read_toml_file(local_config)?;
            return Ok((config, Some(local_config.to_path_buf())));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".cascade").join("config.toml");
            if user_config.exists() {
                let config = Self::read_toml_file(&user_config)?;
                return Ok((config, Some(user_config)));
            }
        }

        Ok((CascadeConfig::default(), None))
    }

    fn read_toml_file(path: &Path) -> Result<CascadeConfig, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn apply_overrides(
        mut config: CascadeConfig,
        var: impl Fn(&str) -> Option<String>,
    ) -> CascadeConfig {
        if let Some(size) = var("CASCADE_BATCH_SIZE") {
            match size.parse() {
                Ok(n) => config.dispatch.batch_size = n,
                Err(_) => warn!("Ignoring CASCADE_BATCH_SIZE={}", size),
            }
        }
        if let Some(backend) = var("CASCADE_BACKEND") {
            match backend.to_lowercase().as_str() {
                "local" => config.dispatch.backend = BackendKind::Local,
                "remote" => config.dispatch.backend = BackendKind::Remote,
                _ => warn!("Ignoring CASCADE_BACKEND={}", backend),
            }
        }
        if let Some(addr) = var("CASCADE_REMOTE_ADDR") {
            config.dispatch.remote_addr = addr;
        }
        if let Some(addr) = var("CASCADE_WORKER_ADDR") {
            config.worker.listen_addr = addr;
        }
        if let Some(buffer) = var("CASCADE_WORKER_BUFFER") {
            if let Ok(n) = buffer.parse() {
                config.worker.buffer_size = n;
            }
        }
        if let Some(level) = var("CASCADE_LOG_LEVEL") {
            config.logging.level = level;
        }
        if let Some(format) = var("CASCADE_LOG_FORMAT") {
            config.logging.format = format;
        }
        config
    }

    fn validate_config(config: &CascadeConfig) -> Result<(), ConfigError> {
        if config.dispatch.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "dispatch.batch_size must be at least 1".to_string(),
            ));
        }
        if config.worker.buffer_size == 0 || config.worker.chunk_size == 0 {
            return Err(ConfigError::ValidationError(
                "worker.buffer_size and worker.chunk_size must be at least 1".to_string(),
            ));
        }

        match config.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log level: {}. Must be one of: trace, debug, info, warn, error",
                    other
                )))
            }
        }
        match config.logging.format.as_str() {
            "pretty" | "compact" | "full" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format: {}. Must be one of: pretty, compact, full",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn config(&self) -> &CascadeConfig {
        &self.config
    }

    /// Path of the file that was loaded, if any
    pub fn config_path(&self) -> Option<&Path> {
        self.config_path.as_deref()
    }

    pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
        let toml_str = toml::to_string_pretty(&CascadeConfig::default())
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        }

        std::fs::write(path, toml_str).map_err(|e| ConfigError::ReadError(e.to_string()))?;
        Ok(())
    }
}
