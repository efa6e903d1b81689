//! Configuration file support

use mate_agent::{ModelRates, PricingTable};
use mate_ai::Backend;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use tracing::warn;

pub const DEFAULT_TEMPERATURE: f32 = 0.1;

/// Configuration for mate
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Backend wire protocol (gemini, openrouter)
    pub backend: Option<String>,
    /// Model used by the router and every specialist
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// Turn ceiling per agent run
    pub max_turns: Option<u32>,
    /// Attempts per backend call, including the first
    pub max_retries: Option<u32>,
    /// Idle seconds before a session may be evicted
    pub session_timeout_secs: Option<u64>,
    /// Session count past which idle sessions are evicted
    pub session_capacity: Option<usize>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
    /// Pricing per model id, USD per million tokens
    #[serde(default)]
    pub costs: PricingTable,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub google: Option<String>,
    pub openrouter: Option<String>,
    pub serpapi: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mate")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("MATE_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file. A missing or unreadable file yields the defaults.
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "Failed to parse config file");
                Self::default()
            }),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to read config file");
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Write the commented example file if none exists yet
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }
        fs::write(&path, example_config())?;
        Ok(path)
    }

    pub fn backend(&self) -> Option<Backend> {
        self.backend.as_deref().and_then(Backend::parse)
    }

    /// API key for a backend, checking config then env
    pub fn api_key(&self, backend: Backend) -> Option<String> {
        let from_config = match backend {
            Backend::Gemini => self.api_keys.google.clone(),
            Backend::OpenAICompat => self.api_keys.openrouter.clone(),
        };
        non_empty(from_config).or_else(|| non_empty(std::env::var(backend.api_key_env_var()).ok()))
    }

    /// Web search key, checking config then `SERP_API_KEY`
    pub fn serpapi_key(&self) -> Option<String> {
        non_empty(self.api_keys.serpapi.clone())
            .or_else(|| non_empty(std::env::var("SERP_API_KEY").ok()))
    }

    /// Pricing for a model id, if configured
    pub fn rates_for(&self, model_id: &str) -> Option<ModelRates> {
        self.costs.get(model_id).cloned()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Default model id for a backend
pub fn default_model(backend: Backend) -> &'static str {
    match backend {
        Backend::Gemini => "gemini-2.5-flash",
        Backend::OpenAICompat => "openai/gpt-4o-mini",
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# mate configuration file
# Place at ~/.config/mate/config.toml (Linux/Mac) or %APPDATA%\mate\config.toml (Windows),
# or point MATE_CONFIG_PATH at it.

# Backend wire protocol (gemini, openrouter)
backend = "gemini"

# Model used by the router and every specialist
model = "gemini-2.5-flash"

# Sampling temperature
temperature = 0.1

# Turn ceiling per agent run
max_turns = 10

# Attempts per backend call, including the first
max_retries = 3

# Sessions idle longer than this may be evicted once there are more than
# session_capacity of them
session_timeout_secs = 3600
session_capacity = 100

# API keys (optional - can also use GOOGLE_GENAI_API_KEY, OPENROUTER_API_KEY
# and SERP_API_KEY)
[api_keys]
# google = "..."
# openrouter = "sk-or-..."
# serpapi = "..."

# Pricing in USD per million tokens. A single rate is flat; tiered rates need
# one threshold less than rates.
[costs."gemini-2.5-flash"]
in_rates = [0.30]
out_rates = [2.50]

# [costs."gemini-2.5-pro"]
# in_rates = [1.25, 2.50]
# in_thresholds = [200000]
# out_rates = [10.0, 15.0]
# out_thresholds = [200000]
"#
}
