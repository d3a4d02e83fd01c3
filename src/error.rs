use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

/// Classified failure from a single completion provider.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    #[error("rate limited by {provider}")]
    RateLimited {
        provider: String,
        retry_after_secs: Option<u64>,
    },

    #[error("{provider} timed out after {elapsed_ms}ms")]
    Timeout { provider: String, elapsed_ms: u64 },

    #[error("invalid request for {provider}: {message}")]
    InvalidRequest { provider: String, message: String },

    #[error("{provider} unavailable: {message}")]
    Unavailable {
        provider: String,
        message: String,
        status: Option<u16>,
    },
}

impl ProviderError {
    pub fn provider(&self) -> &str {
        match self {
            Self::RateLimited { provider, .. }
            | Self::Timeout { provider, .. }
            | Self::InvalidRequest { provider, .. }
            | Self::Unavailable { provider, .. } => provider,
        }
    }

    /// Returns true when another provider in the chain may still succeed.
    /// A malformed request fails the same way everywhere.
    pub fn allows_fallback(&self) -> bool {
        !matches!(self, Self::InvalidRequest { .. })
    }

    /// Short machine-readable classification.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RateLimited { .. } => "rate_limited",
            Self::Timeout { .. } => "timeout",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::Unavailable { .. } => "unavailable",
        }
    }

    /// Sanitized message safe for returning to tool clients.
    /// Does not leak upstream response bodies.
    pub fn user_message(&self) -> String {
        match self {
            Self::RateLimited {
                provider,
                retry_after_secs: Some(secs),
            } => format!("rate limited by {provider}, retry after {secs}s"),
            Self::RateLimited { provider, .. } => format!("rate limited by {provider}"),
            Self::Timeout {
                provider,
                elapsed_ms,
            } => format!("{provider} timed out after {elapsed_ms}ms"),
            Self::InvalidRequest { provider, message } => {
                format!("invalid request for {provider}: {message}")
            }
            Self::Unavailable {
                provider,
                status: Some(status),
                ..
            } => format!("{provider} unavailable (HTTP {status})"),
            Self::Unavailable { provider, .. } => format!("{provider} unavailable"),
        }
    }

    pub(crate) fn from_reqwest(provider: &str, err: reqwest::Error, elapsed: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout {
                provider: provider.to_string(),
                elapsed_ms: elapsed.as_millis() as u64,
            }
        } else if err.is_builder() {
            Self::InvalidRequest {
                provider: provider.to_string(),
                message: err.to_string(),
            }
        } else {
            Self::Unavailable {
                provider: provider.to_string(),
                message: err.to_string(),
                status: err.status().map(|s| s.as_u16()),
            }
        }
    }
}

/// One entry in the ordered failure list of an exhausted fallback chain.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProviderFailure {
    pub provider: String,
    pub kind: &'static str,
    pub message: String,
}

impl From<&ProviderError> for ProviderFailure {
    fn from(e: &ProviderError) -> Self {
        Self {
            provider: e.provider().to_string(),
            kind: e.kind(),
            message: e.user_message(),
        }
    }
}

/// Terminal outcome of one `ProviderManager` call.
#[derive(Debug, Clone, Error)]
pub enum CompletionError {
    #[error("all providers failed: {}", summarize(.failures))]
    AllProvidersFailed { failures: Vec<ProviderFailure> },

    #[error("daily budget of ${budget_usd:.2} exceeded (spent ${spent_usd:.4})")]
    BudgetExceeded { spent_usd: f64, budget_usd: f64 },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("no providers configured")]
    NoProviders,
}

impl CompletionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::AllProvidersFailed { .. } => "providers_failed",
            Self::BudgetExceeded { .. } => "budget_exceeded",
            Self::Provider(e) => e.kind(),
            Self::NoProviders => "no_providers",
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Provider(e) => e.user_message(),
            other => other.to_string(),
        }
    }
}

fn summarize(failures: &[ProviderFailure]) -> String {
    failures
        .iter()
        .map(|f| format!("{}={}", f.provider, f.kind))
        .collect::<Vec<_>>()
        .join(", ")
}

/// The model answered, but not in the shape the analyzer expects.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("failed to parse analysis response: {0}")]
pub struct AnalysisParseError(pub String);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("environment variable {var} is not set (required by provider {provider})")]
    MissingSecret { var: String, provider: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("discovery cooldown active, next run allowed in {}s", .remaining.as_secs())]
    CooldownActive { remaining: Duration },

    #[error("candidate not found: {0}")]
    CandidateNotFound(String),

    #[error("run not found: {0}")]
    RunNotFound(String),

    #[error("invalid status transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: String,
        from: &'static str,
        to: &'static str,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl DiscoveryError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CooldownActive { .. } => "cooldown_active",
            Self::CandidateNotFound(_) => "candidate_not_found",
            Self::RunNotFound(_) => "run_not_found",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::Config(_) => "config",
        }
    }
}
