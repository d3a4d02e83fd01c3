use std::env;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::discovery::search::SearchStrategy;
use crate::error::ConfigError;

pub const CONFIG_PATH_ENV: &str = "ACCU_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "accu.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Remote aggregator (OpenAI-compatible wire format).
    Openrouter,
    Openai,
    Anthropic,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Openrouter => "openrouter",
            Self::Openai => "openai",
            Self::Anthropic => "anthropic",
        }
    }

    pub fn default_api_key_env(&self) -> &'static str {
        match self {
            Self::Openrouter => "OPENROUTER_API_KEY",
            Self::Openai => "OPENAI_API_KEY",
            Self::Anthropic => "ANTHROPIC_API_KEY",
        }
    }

    pub fn default_model(&self) -> &'static str {
        match self {
            Self::Openrouter => "anthropic/claude-3-haiku",
            Self::Openai => "gpt-4o-mini",
            Self::Anthropic => "claude-3-haiku-20240307",
        }
    }
}

/// One provider in the chain. Keys are referenced by environment variable name only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ProviderEntry {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    pub model: Option<String>,
    pub api_key_env: Option<String>,
    pub base_url: Option<String>,
}

impl ProviderEntry {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            model: None,
            api_key_env: None,
            base_url: None,
        }
    }

    pub fn model(&self) -> &str {
        self.model
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.kind.default_model())
    }

    pub fn api_key_env(&self) -> &str {
        self.api_key_env
            .as_deref()
            .unwrap_or_else(|| self.kind.default_api_key_env())
    }

    /// Resolve the secret from the environment.
    pub fn api_key(&self) -> Result<String, ConfigError> {
        let var = self.api_key_env();
        env::var(var)
            .ok()
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingSecret {
                var: var.to_string(),
                provider: self.kind.as_str().to_string(),
            })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct ProviderSection {
    pub primary: ProviderEntry,
    pub fallbacks: Vec<ProviderEntry>,
    /// Per-attempt timeout. An attempt that exceeds it is cancelled and counts as a timeout.
    pub timeout_secs: u64,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            primary: ProviderEntry::new(ProviderKind::Openrouter),
            fallbacks: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl ProviderSection {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct RateLimits {
    /// Outbound attempts per minute across all providers. 0 disables the limit.
    pub requests_per_minute: u32,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CostTracking {
    #[serde(rename = "dailyBudgetUSD")]
    pub daily_budget_usd: f64,
}

impl Default for CostTracking {
    fn default() -> Self {
        Self {
            daily_budget_usd: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct DiscoverySection {
    pub min_stars: u32,
    pub max_stars: u32,
    pub languages: Vec<String>,
    pub cooldown_hours: u64,
    /// Concurrent candidate analyses per run.
    pub max_concurrency: usize,
    pub max_repos_per_run: usize,
    pub strategies: Vec<SearchStrategy>,
}

impl Default for DiscoverySection {
    fn default() -> Self {
        Self {
            min_stars: 5,
            max_stars: 500,
            languages: ["python", "javascript", "typescript", "go", "rust"]
                .into_iter()
                .map(String::from)
                .collect(),
            cooldown_hours: 24,
            max_concurrency: 5,
            max_repos_per_run: 50,
            strategies: vec![SearchStrategy::AbandonedStars, SearchStrategy::SoloDeveloper],
        }
    }
}

impl DiscoverySection {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_hours.saturating_mul(3600))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
pub struct Config {
    pub provider: ProviderSection,
    pub rate_limits: RateLimits,
    pub cost_tracking: CostTracking,
    pub discovery: DiscoverySection,
}

impl Config {
    /// Load from `$ACCU_CONFIG`, else `./accu.toml`, else defaults.
    /// An explicitly named file that does not exist is an error.
    pub fn load() -> Result<Self, ConfigError> {
        match env::var(CONFIG_PATH_ENV) {
            Ok(path) => Self::from_path(Path::new(&path)),
            Err(_) => {
                let path = Path::new(DEFAULT_CONFIG_PATH);
                if path.exists() {
                    Self::from_path(path)
                } else {
                    tracing::info!("no {DEFAULT_CONFIG_PATH} found, using default configuration");
                    let config = Self::default();
                    config.validate()?;
                    Ok(config)
                }
            }
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        Self::from_toml_str(&text, &display)
    }

    pub fn from_toml_str(text: &str, origin: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let budget = self.cost_tracking.daily_budget_usd;
        if !budget.is_finite() || budget < 0.0 {
            return Err(ConfigError::Invalid(
                "costTracking.dailyBudgetUSD must be a non-negative number".to_string(),
            ));
        }
        if self.provider.timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "provider.timeoutSecs must be positive".to_string(),
            ));
        }
        let d = &self.discovery;
        if d.min_stars > d.max_stars {
            return Err(ConfigError::Invalid(format!(
                "discovery.minStars ({}) exceeds discovery.maxStars ({})",
                d.min_stars, d.max_stars
            )));
        }
        if d.max_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "discovery.maxConcurrency must be at least 1".to_string(),
            ));
        }
        if d.max_repos_per_run == 0 {
            return Err(ConfigError::Invalid(
                "discovery.maxReposPerRun must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Primary first, then fallbacks in file order.
    pub fn provider_chain(&self) -> impl Iterator<Item = &ProviderEntry> {
        std::iter::once(&self.provider.primary).chain(self.provider.fallbacks.iter())
    }
}
