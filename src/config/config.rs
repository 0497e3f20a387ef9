//! # Gateway Configuration
//!
//! Configuration structures and validation for the vision gateway. One
//! `GatewayConfig` value is passed into the gateway constructor; there is no
//! global configuration state.
//!
//! ## Configuration Parameters
//!
//! | Section | Parameter | Default | Description |
//! |---------|-----------|---------|-------------|
//! | `providers` | list | local → openai → anthropic | Fallback chain |
//! | `budget` | `daily_limit` | 5.00 | USD per UTC day, 0 disables |
//! | `budget` | `monthly_limit` | 100.00 | USD per UTC month, 0 disables |
//! | `cache` | `ttl_days` | 30 | Entry time-to-live |
//! | `cache` | `memory_capacity` | 500 | In-memory LRU entry cap |
//! | `cache` | `database_path` | `.vision-gateway/gateway.db` | SQLite file, `null` = in-memory |
//! | `preprocess` | `max_width`, `max_height` | 2048 | Bounding box |
//! | `preprocess` | `quality` | 85 | JPEG quality (1-100) |
//! | `retry` | `max_retries` | 1 | Retries per provider for transient errors |
//! | `retry` | `timeout_secs` | 30 | Per-call timeout |
//! | `batch_concurrency` | | 3 | Simultaneous requests in `analyze_batch` |
//!
//! Every section is optional in a JSON file; missing fields take defaults.
//!
//! ## Examples
//!
//! ```rust
//! use vision_gateway::config::GatewayConfig;
//!
//! let config = GatewayConfig::default();
//! assert!(config.validate().is_ok());
//!
//! let partial: GatewayConfig =
//!     serde_json::from_str(r#"{ "budget": { "daily_limit": 1.0 } }"#).unwrap();
//! assert_eq!(partial.budget.daily_limit, 1.0);
//! assert_eq!(partial.cache.ttl_days, 30);
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vgate_scale::plan::ResizeFilter;

use crate::error::GatewayError;
use crate::model::ImageFormat;

/// Backend family; selects the concrete adapter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Local inference server speaking the Ollama API; free
    Ollama,
    /// Any OpenAI-compatible chat completions endpoint
    OpenAi,
    /// Anthropic messages API
    Anthropic,
}

/// One entry in the fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Unique name used in logs, ledger rows and errors
    pub id: String,
    pub kind: ProviderKind,
    pub model: String,
    /// Base URL, e.g. `http://localhost:11434` or `https://api.openai.com/v1`
    pub endpoint: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
    /// USD per successful call; 0 marks the provider as free
    pub cost_per_call: f64,
    /// Lower runs first; providers without one follow, ordered by cost
    pub priority: Option<u32>,
    /// Overrides `retry.max_retries`
    pub max_retries: Option<u32>,
    /// Overrides `retry.timeout_secs`
    pub timeout_secs: Option<u64>,
    pub enabled: bool,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            id: String::new(),
            kind: ProviderKind::OpenAi,
            model: String::new(),
            endpoint: String::new(),
            api_key_env: None,
            cost_per_call: 0.0,
            priority: None,
            max_retries: None,
            timeout_secs: None,
            enabled: true,
        }
    }
}

impl ProviderConfig {
    pub fn is_free(&self) -> bool {
        self.cost_per_call <= 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    pub daily_limit: f64,
    pub monthly_limit: f64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            daily_limit: 5.0,
            monthly_limit: 100.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub ttl_days: u32,
    pub memory_capacity: usize,
    pub database_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_days: 30,
            memory_capacity: 500,
            database_path: Some(PathBuf::from(".vision-gateway/gateway.db")),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.ttl_days))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub max_width: u32,
    pub max_height: u32,
    pub quality: u8,
    pub format: ImageFormat,
    pub filter: ResizeFilter,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self {
            max_width: 2048,
            max_height: 2048,
            quality: 85,
            format: ImageFormat::Jpeg,
            filter: ResizeFilter::Lanczos3,
        }
    }
}

/// Defaults applied to every provider unless overridden per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 1,
            retry_delay_ms: 500,
            timeout_secs: 30,
        }
    }
}

/// Effective retry policy for one provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub timeout: Duration,
}

impl RetryConfig {
    /// Policy for a provider with no overrides.
    pub fn default_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            timeout: Duration::from_secs(self.timeout_secs),
        }
    }

    pub fn policy_for(&self, provider: &ProviderConfig) -> RetryPolicy {
        RetryPolicy {
            max_retries: provider.max_retries.unwrap_or(self.max_retries),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
            timeout: Duration::from_secs(provider.timeout_secs.unwrap_or(self.timeout_secs)),
        }
    }
}

/// Top-level gateway configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub providers: Vec<ProviderConfig>,
    pub budget: BudgetConfig,
    pub cache: CacheConfig,
    pub preprocess: PreprocessConfig,
    pub retry: RetryConfig,
    pub batch_concurrency: usize,
}

impl Default for GatewayConfig {
    /// Local Ollama first, then OpenAI, then Anthropic.
    fn default() -> Self {
        Self {
            providers: default_providers(),
            budget: BudgetConfig::default(),
            cache: CacheConfig::default(),
            preprocess: PreprocessConfig::default(),
            retry: RetryConfig::default(),
            batch_concurrency: 3,
        }
    }
}

/// The default fallback chain.
pub fn default_providers() -> Vec<ProviderConfig> {
    vec![
        ProviderConfig {
            id: "local".to_string(),
            kind: ProviderKind::Ollama,
            model: "llava:13b".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            timeout_secs: Some(60),
            ..ProviderConfig::default()
        },
        ProviderConfig {
            id: "openai".to_string(),
            kind: ProviderKind::OpenAi,
            model: "gpt-4o-mini".to_string(),
            endpoint: "https://api.openai.com/v1".to_string(),
            api_key_env: Some("OPENAI_API_KEY".to_string()),
            cost_per_call: 0.01,
            ..ProviderConfig::default()
        },
        ProviderConfig {
            id: "anthropic".to_string(),
            kind: ProviderKind::Anthropic,
            model: "claude-3-5-haiku-latest".to_string(),
            endpoint: "https://api.anthropic.com".to_string(),
            api_key_env: Some("ANTHROPIC_API_KEY".to_string()),
            cost_per_call: 0.015,
            ..ProviderConfig::default()
        },
    ]
}

impl GatewayConfig {
    /// Load a JSON configuration file; absent fields take defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, GatewayError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            GatewayError::config("config_file", path.display().to_string(), e.to_string())
        })?;
        serde_json::from_str(&text).map_err(|e| {
            GatewayError::config("config_file", path.display().to_string(), e.to_string())
        })
    }

    /// Validates the configuration parameters.
    ///
    /// # Validation Rules
    ///
    /// - provider ids must be non-empty and unique
    /// - provider costs must be finite and not negative
    /// - budget limits must be finite and not negative
    /// - `memory_capacity`, `max_width`, `max_height` must be greater than 0
    /// - `quality` must be between 1 and 100
    /// - `batch_concurrency` must be greater than 0
    pub fn validate(&self) -> Result<(), String> {
        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() {
                return Err("Provider id must not be empty".to_string());
            }
            if !seen.insert(provider.id.as_str()) {
                return Err(format!("Duplicate provider id '{}'", provider.id));
            }
            if !provider.cost_per_call.is_finite() || provider.cost_per_call < 0.0 {
                return Err(format!(
                    "Provider '{}' cost_per_call must be a non-negative number",
                    provider.id
                ));
            }
        }
        for (name, limit) in [
            ("daily_limit", self.budget.daily_limit),
            ("monthly_limit", self.budget.monthly_limit),
        ] {
            if !limit.is_finite() || limit < 0.0 {
                return Err(format!("Budget {} must be a non-negative number", name));
            }
        }
        if self.cache.memory_capacity == 0 {
            return Err("Cache memory_capacity must be greater than 0".to_string());
        }
        if self.preprocess.max_width == 0 || self.preprocess.max_height == 0 {
            return Err("Preprocess max_width and max_height must be greater than 0".to_string());
        }
        if !(1..=100).contains(&self.preprocess.quality) {
            return Err("Preprocess quality must be between 1 and 100".to_string());
        }
        if self.batch_concurrency == 0 {
            return Err("batch_concurrency must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Enabled providers in fallback order: explicit priority first, then
    /// ascending cost (free before paid); ties keep configuration order.
    pub fn ordered_providers(&self) -> Vec<&ProviderConfig> {
        let mut providers: Vec<&ProviderConfig> =
            self.providers.iter().filter(|p| p.enabled).collect();
        providers.sort_by(|a, b| {
            a.priority
                .unwrap_or(u32::MAX)
                .cmp(&b.priority.unwrap_or(u32::MAX))
                .then(a.cost_per_call.total_cmp(&b.cost_per_call))
        });
        providers
    }
}
