//! Configuration for an LLM client.
//!
//! Loadable from TOML (`quill.toml`) or from `QUILL_*` environment variables.
//! The rest of the crate only consumes the resolved [`LlmConfig`].

use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LlmError, Result};
use crate::retry::RetryPolicy;
use crate::types::RequestParams;

/// Prefix for environment variables read by [`LlmConfig::from_env`].
pub const ENV_PREFIX: &str = "QUILL";

/// Minimum level of log events to emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Nothing.
    Off,
    /// Errors only.
    Error,
    /// Warnings and errors.
    #[default]
    Warn,
    /// Progress information.
    Info,
    /// Pipeline stage events.
    Debug,
    /// Everything.
    Trace,
}

impl LogLevel {
    /// Directive understood by `tracing_subscriber::EnvFilter`.
    #[must_use]
    pub fn as_filter(self) -> &'static str {
        match self {
            Self::Off => "off",
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_filter())
    }
}

impl FromStr for LogLevel {
    type Err = LlmError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "off" | "none" => Ok(Self::Off),
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(LlmError::Config(format!("unknown log level: '{other}'"))),
        }
    }
}

/// Whether an LLM keeps conversation history, resolved once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryMode {
    /// Every call is independent.
    None,
    /// History bounded by a token budget.
    Bounded {
        /// Token budget for retained history.
        max_tokens: usize,
    },
}

/// Settings for one LLM client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Registered provider name: "openai", "anthropic", "ollama", ...
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Model identifier passed to the provider.
    #[serde(default = "default_model")]
    pub model: String,
    /// API key. Empty means "look up `<PROVIDER>_API_KEY`" in [`LlmConfig::from_env`].
    #[serde(default)]
    pub api_key: String,
    /// Endpoint override; requires a provider with the custom-endpoint capability.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fixed pause between attempts.
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Per-request HTTP timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    /// Default sampling temperature.
    #[serde(default = "default_temperature")]
    pub temperature: Option<f32>,
    /// Default token cap.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: Option<u32>,
    /// Default nucleus mass.
    #[serde(default)]
    pub top_p: Option<f32>,
    /// Default sampling seed.
    #[serde(default)]
    pub seed: Option<u64>,
    /// Token budget for conversation memory; unset disables memory.
    #[serde(default)]
    pub memory_max_tokens: Option<usize>,
    /// Minimum log level.
    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_provider() -> String {
    "openai".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    2000
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
#[allow(clippy::unnecessary_wraps)]
fn default_temperature() -> Option<f32> {
    Some(0.7)
}
#[allow(clippy::unnecessary_wraps)]
fn default_max_tokens() -> Option<u32> {
    Some(300)
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            api_key: String::new(),
            endpoint: None,
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            top_p: None,
            seed: None,
            memory_max_tokens: None,
            log_level: LogLevel::default(),
        }
    }
}

impl LlmConfig {
    /// Load configuration from a TOML string.
    ///
    /// # Errors
    /// Returns `LlmError::Config` if the TOML is invalid.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str).map_err(|e| LlmError::Config(e.to_string()))
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| LlmError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_toml(&content)
    }

    /// Load configuration from `QUILL_*` process environment variables.
    ///
    /// # Errors
    /// Returns `LlmError::Config` if a variable has the wrong type.
    pub fn from_env() -> Result<Self> {
        Self::from_vars(std::env::vars())
    }

    /// Load configuration from an explicit set of environment-style variables.
    ///
    /// `QUILL_MODEL=gpt-4o` sets `model`; when `api_key` stays empty the
    /// provider-specific `<PROVIDER>_API_KEY` variable is used instead.
    ///
    /// # Errors
    /// Returns `LlmError::Config` if a variable has the wrong type.
    pub fn from_vars<I>(vars: I) -> Result<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars.into_iter().collect();

        let source = config::Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .source(Some(vars.clone()));
        let mut cfg: Self = config::Config::builder()
            .add_source(source)
            .build()
            .and_then(|c| c.try_deserialize::<Self>())
            .map_err(|e| LlmError::Config(e.to_string()))?;

        if cfg.api_key.is_empty() {
            let fallback = format!("{}_API_KEY", cfg.provider.to_ascii_uppercase());
            if let Some(key) = vars.get(&fallback) {
                cfg.api_key.clone_from(key);
            }
        }

        Ok(cfg)
    }

    /// Check the configuration for values no client could work with.
    ///
    /// # Errors
    /// Returns `LlmError::Config` describing the first problem.
    pub fn validate(&self) -> Result<()> {
        if self.provider.trim().is_empty() {
            return Err(LlmError::Config("provider must not be empty".into()));
        }
        if self.model.trim().is_empty() {
            return Err(LlmError::Config("model must not be empty".into()));
        }
        if self.memory_max_tokens == Some(0) {
            return Err(LlmError::Config("memory_max_tokens must be positive".into()));
        }
        if matches!(&self.endpoint, Some(e) if e.trim().is_empty()) {
            return Err(LlmError::Config("endpoint override must not be blank".into()));
        }
        Ok(())
    }

    /// Retry policy derived from `max_retries` and `retry_delay_ms`.
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, Duration::from_millis(self.retry_delay_ms))
    }

    /// Construction-time request defaults.
    #[must_use]
    pub fn request_params(&self) -> RequestParams {
        RequestParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            top_p: self.top_p,
            seed: self.seed,
            stop: Vec::new(),
            json_mode: false,
        }
    }

    /// Memory mode implied by `memory_max_tokens`.
    #[must_use]
    pub fn memory_mode(&self) -> MemoryMode {
        match self.memory_max_tokens {
            Some(max_tokens) => MemoryMode::Bounded { max_tokens },
            None => MemoryMode::None,
        }
    }

    /// Builder: set provider and model.
    #[must_use]
    pub fn with_provider(mut self, provider: impl Into<String>, model: impl Into<String>) -> Self {
        self.provider = provider.into();
        self.model = model.into();
        self
    }

    /// Builder: set the API key.
    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = api_key.into();
        self
    }

    /// Builder: override the endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    /// Builder: retry settings.
    #[must_use]
    pub fn with_retries(mut self, max_retries: u32, delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Builder: enable bounded conversation memory.
    #[must_use]
    pub fn with_memory(mut self, max_tokens: usize) -> Self {
        self.memory_max_tokens = Some(max_tokens);
        self
    }
}
