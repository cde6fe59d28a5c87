//! Configuration loading for the ROWCALL CLI.
//!
//! The file is TOML. `[endpoint]`, `input` and `output` are required; a missing
//! `[engine]` table falls back to `ROWCALL_*` environment variables.

use rowcall_core::EngineConfig;
use rowcall_engine::{BatchResponseKeys, ExtractField, JsonPointerFormatter};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CliConfig {
    pub input: PathBuf,
    pub output: PathBuf,
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub engine: Option<EngineConfig>,
    #[serde(default)]
    pub json_logs: bool,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EndpointConfig {
    pub url: String,
    pub service: String,
    /// Name of the environment variable holding the bearer token.
    pub api_key_env: Option<String>,
    /// Send only this column as `{"text": ..}` instead of the whole row.
    pub text_column: Option<String>,
    #[serde(default)]
    pub batch_keys: BatchResponseKeys,
    /// Extra columns pulled out of each response by JSON pointer.
    #[serde(default)]
    pub extract: Vec<ExtractField>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or ROWCALL_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
    #[error(transparent)]
    Engine(#[from] rowcall_core::RowcallError),
}

impl CliConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        let config = Self::from_path(&path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: CliConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// The engine settings: the `[engine]` table, or the environment.
    pub fn engine(&self) -> Result<EngineConfig, ConfigError> {
        match &self.engine {
            Some(engine) => Ok(engine.clone()),
            None => Ok(EngineConfig::from_env()?),
        }
    }

    /// Formatter for the `[[endpoint.extract]]` entries, if any.
    pub fn formatter(&self) -> Option<JsonPointerFormatter> {
        if self.endpoint.extract.is_empty() {
            None
        } else {
            Some(JsonPointerFormatter::new(self.endpoint.extract.clone()))
        }
    }

    /// Bearer token read from the variable named by `endpoint.api_key_env`.
    pub fn api_key(&self) -> Result<Option<String>, ConfigError> {
        match &self.endpoint.api_key_env {
            None => Ok(None),
            Some(var) => std::env::var(var)
                .map(Some)
                .map_err(|_| ConfigError::InvalidValue {
                    field: "endpoint.api_key_env",
                    reason: format!("environment variable {} is not set", var),
                }),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoint.url.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "endpoint.url",
                reason: "must not be empty".to_string(),
            });
        }
        if !self.endpoint.url.starts_with("http://") && !self.endpoint.url.starts_with("https://")
        {
            return Err(ConfigError::InvalidValue {
                field: "endpoint.url",
                reason: "must be an http:// or https:// URL".to_string(),
            });
        }
        if self.endpoint.service.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "endpoint.service",
                reason: "must not be empty".to_string(),
            });
        }
        if let Some(column) = &self.endpoint.text_column {
            if column.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "endpoint.text_column",
                    reason: "must not be empty when set".to_string(),
                });
            }
        }
        for field in &self.endpoint.extract {
            if field.column.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "endpoint.extract.column",
                    reason: "must not be empty".to_string(),
                });
            }
            if !field.pointer.is_empty() && !field.pointer.starts_with('/') {
                return Err(ConfigError::InvalidValue {
                    field: "endpoint.extract.pointer",
                    reason: format!("'{}' is not a JSON pointer", field.pointer),
                });
            }
        }
        if self.input.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "input",
                reason: "must not be empty".to_string(),
            });
        }
        if self.output.as_os_str().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "output",
                reason: "must not be empty".to_string(),
            });
        }
        if self.input == self.output {
            return Err(ConfigError::InvalidValue {
                field: "output",
                reason: "must differ from input".to_string(),
            });
        }
        self.engine()?.validate()?;
        Ok(())
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(rowcall_core::constants::ENV_CONFIG_PATH)
        .ok()
        .map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}
