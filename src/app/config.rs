//! Application configuration management

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::engine::{AnalysisOption, MatchSpec};
use crate::error::ConfigError;
use crate::generator::GenerationMode;
use crate::http::{HttpSettings, RequestDefaults};

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Worker pool and generator settings
    pub engine: EngineConfig,

    /// Transport settings
    pub http: HttpSettings,

    /// Defaults merged into every request
    pub request: RequestDefaults,

    /// Match rules and analysis options
    pub analysis: AnalysisConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of workers draining the request queue
    pub workers: usize,

    /// Requests per second (unlimited if unset)
    pub rate_limit: Option<u32>,

    /// Maximum in-flight requests; only used with `rate_limit`
    pub concurrency_limit: Option<usize>,

    /// Which value classes the generator produces
    pub generation_mode: GenerationMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            rate_limit: None,
            concurrency_limit: None,
            generation_mode: GenerationMode::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub matcher: Option<MatchSpec>,

    pub options: Vec<AnalysisOption>,
}

impl Config {
    /// Load configuration from file
    pub fn load(path: Option<&str>) -> Result<Self> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if config_path.exists() {
            let contents = std::fs::read_to_string(&config_path).map_err(|source| ConfigError::ReadError {
                path: config_path.display().to_string(),
                source,
            })?;

            let config = Self::from_toml(&contents)?;

            tracing::info!("Loaded configuration from {:?}", config_path);
            Ok(config)
        } else if path.is_some() {
            Err(ConfigError::NotFound(config_path.display().to_string()).into())
        } else {
            tracing::info!("No configuration file found, using defaults");
            Ok(Self::default())
        }
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<&str>) -> Result<()> {
        let config_path = match path {
            Some(p) => PathBuf::from(p),
            None => Self::default_config_path()?,
        };

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(&config_path, self.to_toml()?)?;

        tracing::info!("Saved configuration to {:?}", config_path);
        Ok(())
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, reason: &str) -> ConfigError {
            ConfigError::ValidationError {
                field: field.into(),
                reason: reason.into(),
            }
        }

        if self.engine.workers == 0 {
            return Err(invalid("engine.workers", "at least one worker is required"));
        }
        if self.engine.rate_limit == Some(0) {
            return Err(invalid("engine.rate_limit", "must be a positive number"));
        }
        if self.engine.concurrency_limit == Some(0) {
            return Err(invalid("engine.concurrency_limit", "must be a positive number"));
        }
        if self.http.timeout_secs == 0 {
            return Err(invalid("http.timeout_secs", "must be a positive number"));
        }
        if let Some(base) = &self.request.base_url {
            url::Url::parse(base).map_err(|e| invalid("request.base_url", &e.to_string()))?;
        }
        if let Some(proxy) = &self.http.proxy {
            url::Url::parse(proxy).map_err(|e| invalid("http.proxy", &e.to_string()))?;
        }
        Ok(())
    }

    /// Get default configuration file path
    pub fn default_config_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("io", "api-fuzzer", "api-fuzzer")
            .context("Failed to determine config directory")?;

        Ok(dirs.config_dir().join("config.toml"))
    }
}
