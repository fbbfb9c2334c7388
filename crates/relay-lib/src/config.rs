// Relay configuration
//
// Loaded from defaults, then an optional TOML file, then environment
// overrides. The binary loads `.env` before calling `RelayConfig::load`.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::models::provider::ProviderId;

/// Directory name under the platform config dir
pub const APP_IDENTIFIER: &str = "relay";

const DEFAULT_ENGINE_BINARY: &str = "claude";
const DEFAULT_TIMEOUT_SECS: u64 = 600;
const DEFAULT_STALL_SECS: u64 = 120;
const DEFAULT_MAX_OUTPUT_BYTES: usize = 2 * 1024 * 1024;

/// Upper bound for engine deadlines (one week)
pub const MAX_TIMEOUT_SECS: u64 = 7 * 24 * 60 * 60;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {message}")]
    Io { path: String, message: String },

    #[error("Invalid config file: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    InvalidValue(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Reasoning engine subprocess settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Binary name or path; bare names are resolved through the path resolver
    pub binary: String,
    /// Flags selecting line-delimited JSON streaming output
    pub args: Vec<String>,
    pub resume_flag: String,
    pub timeout_secs: u64,
    pub stall_secs: u64,
    pub max_output_bytes: usize,
    pub working_dir: Option<PathBuf>,
    pub env: HashMap<String, String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            binary: DEFAULT_ENGINE_BINARY.to_string(),
            args: vec![
                "-p".to_string(),
                "--output-format".to_string(),
                "stream-json".to_string(),
                "--verbose".to_string(),
                "--include-partial-messages".to_string(),
            ],
            resume_flag: "--resume".to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            stall_secs: DEFAULT_STALL_SECS,
            max_output_bytes: DEFAULT_MAX_OUTPUT_BYTES,
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

impl EngineConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stall_window(&self) -> Duration {
        Duration::from_secs(self.stall_secs)
    }
}

/// Connection settings for one remote provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct ProviderEndpoint {
    pub endpoint: Option<String>,
    pub model: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    pub timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Routing preference, first is tried first
    pub order: Vec<ProviderId>,
    pub gemini: Option<ProviderEndpoint>,
    pub groq: Option<ProviderEndpoint>,
    pub open_router: Option<ProviderEndpoint>,
    pub ollama: Option<ProviderEndpoint>,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            order: ProviderId::all(),
            gemini: None,
            groq: None,
            open_router: None,
            ollama: None,
        }
    }
}

impl ProvidersConfig {
    pub fn endpoint(&self, provider: ProviderId) -> Option<&ProviderEndpoint> {
        match provider {
            ProviderId::Gemini => self.gemini.as_ref(),
            ProviderId::Groq => self.groq.as_ref(),
            ProviderId::OpenRouter => self.open_router.as_ref(),
            ProviderId::Ollama => self.ollama.as_ref(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct RelayConfig {
    pub engine: EngineConfig,
    pub providers: ProvidersConfig,
}

impl RelayConfig {
    /// Load configuration from `path`, or from the default location when it exists
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => match default_config_path() {
                Some(p) if p.exists() => Self::from_file(&p)?,
                _ => Self::default(),
            },
        };

        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        log::debug!("[Config] Loaded {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> ConfigResult<Self> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Apply `RELAY_*` overrides; unparseable values are logged and ignored
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(bin) = lookup("RELAY_ENGINE_BIN").filter(|v| !v.trim().is_empty()) {
            self.engine.binary = bin;
        }

        let parse_u64 = |key: &str| -> Option<u64> {
            let raw = lookup(key)?;
            match raw.trim().parse::<u64>() {
                Ok(v) => Some(v),
                Err(_) => {
                    log::warn!("[Config] Ignoring {}={}: not a number", key, raw);
                    None
                }
            }
        };

        if let Some(v) = parse_u64("RELAY_ENGINE_TIMEOUT_SECS") {
            self.engine.timeout_secs = v;
        }
        if let Some(v) = parse_u64("RELAY_ENGINE_STALL_SECS") {
            self.engine.stall_secs = v;
        }
        if let Some(v) = parse_u64("RELAY_MAX_OUTPUT_BYTES") {
            self.engine.max_output_bytes = v as usize;
        }
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let engine = &self.engine;
        if engine.binary.trim().is_empty() {
            return Err(ConfigError::InvalidValue("engine.binary cannot be empty".to_string()));
        }
        if engine.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue("engine.timeout_secs must be > 0".to_string()));
        }
        if engine.timeout_secs > MAX_TIMEOUT_SECS {
            return Err(ConfigError::InvalidValue(format!(
                "engine.timeout_secs cannot exceed {}",
                MAX_TIMEOUT_SECS
            )));
        }
        if engine.stall_secs == 0 {
            return Err(ConfigError::InvalidValue("engine.stall_secs must be > 0".to_string()));
        }
        if engine.stall_secs > engine.timeout_secs {
            return Err(ConfigError::InvalidValue(format!(
                "engine.stall_secs ({}) cannot exceed engine.timeout_secs ({})",
                engine.stall_secs, engine.timeout_secs
            )));
        }
        if engine.max_output_bytes == 0 {
            return Err(ConfigError::InvalidValue(
                "engine.max_output_bytes must be > 0".to_string(),
            ));
        }
        if engine.resume_flag.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "engine.resume_flag cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// `<config dir>/relay/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_IDENTIFIER).join("config.toml"))
}
