//! Configuration management for the ReAct loop.
//!
//! Configuration can be set via environment variables:
//! - `LLM_API_KEY` - Required. API key for the chat-completion endpoint.
//! - `LLM_BASE_URL` - Optional. OpenAI-compatible base URL. Defaults to `https://openrouter.ai/api/v1`.
//! - `DEFAULT_MODEL` - Optional. Model identifier. Defaults to `openai/gpt-4o-mini`.
//! - `LLM_TEMPERATURE` - Optional. Sampling temperature. Defaults to `0.0`.
//! - `MAX_ITERATIONS` - Optional. Maximum agent loop iterations. Defaults to `10`.
//! - `PARSE_RETRIES` - Optional. Extra completions per step on unparseable output. Defaults to `0`.
//! - `TOOL_TIMEOUT_SECS` - Optional. Per tool invocation. Defaults to `30`.
//! - `COMPLETION_TIMEOUT_SECS` - Optional. Per completion call. Defaults to `120`.
//!
//! The same fields can be read from a YAML file with [`Config::from_yaml_file`].

use std::path::Path;
use std::str::FromStr;

use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_MODEL: &str = "openai/gpt-4o-mini";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Loop configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// API key for the completion endpoint
    pub api_key: String,

    /// OpenAI-compatible base URL (without `/chat/completions`)
    pub base_url: String,

    /// Model identifier
    pub default_model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Maximum iterations for the agent loop
    pub max_iterations: usize,

    /// Extra completions allowed per step when the reply cannot be parsed
    pub parse_retries: usize,

    /// Timeout for a single tool invocation
    pub tool_timeout_secs: u64,

    /// Timeout for a single completion call
    pub completion_timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            default_model: DEFAULT_MODEL.to_string(),
            temperature: 0.0,
            max_iterations: 10,
            parse_retries: 0,
            tool_timeout_secs: 30,
            completion_timeout_secs: 120,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::MissingEnvVar` if `LLM_API_KEY` is not set.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source shaped like the environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let api_key = lookup("LLM_API_KEY")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("LLM_API_KEY".to_string()))?;

        let config = Self {
            api_key,
            base_url: lookup("LLM_BASE_URL").unwrap_or(defaults.base_url),
            default_model: lookup("DEFAULT_MODEL").unwrap_or(defaults.default_model),
            temperature: parse_var(&lookup, "LLM_TEMPERATURE", defaults.temperature)?,
            max_iterations: parse_var(&lookup, "MAX_ITERATIONS", defaults.max_iterations)?,
            parse_retries: parse_var(&lookup, "PARSE_RETRIES", defaults.parse_retries)?,
            tool_timeout_secs: parse_var(&lookup, "TOOL_TIMEOUT_SECS", defaults.tool_timeout_secs)?,
            completion_timeout_secs: parse_var(
                &lookup,
                "COMPLETION_TIMEOUT_SECS",
                defaults.completion_timeout_secs,
            )?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file.
    ///
    /// Missing fields take their defaults; `api_key` falls back to
    /// `LLM_API_KEY` so secrets can stay out of the file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        Self::from_yaml_str(&text, |key| std::env::var(key).ok())
    }

    fn from_yaml_str(
        text: &str,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(text)?;
        if config.api_key.trim().is_empty() {
            config.api_key = lookup("LLM_API_KEY")
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar("LLM_API_KEY".to_string()))?;
        }
        config.validate()?;
        tracing::info!("Loaded configuration file (model={})", config.default_model);
        Ok(config)
    }

    /// Create a config with custom values (useful for testing).
    pub fn new(api_key: String, default_model: String) -> Self {
        Self {
            api_key,
            default_model,
            ..Self::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iterations == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_ITERATIONS".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue(
                "LLM_TEMPERATURE".to_string(),
                format!("{} is outside 0.0..=2.0", self.temperature),
            ));
        }
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::InvalidValue(
                "LLM_BASE_URL".to_string(),
                "cannot be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), format!("{}", e))),
        None => Ok(default),
    }
}
