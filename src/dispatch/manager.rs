use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::catalog::ModelCatalog;
use crate::config::Config;
use crate::dispatch::registry;
use crate::dispatch::{CompletionProvider, CompletionRequest, CompletionResponse, CompletionStream};
use crate::error::{CompletionError, ConfigError, ProviderError, ProviderFailure};
use crate::usage::UsageTracker;

pub const DEFAULT_DAILY_BUDGET_USD: f64 = 50.0;
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Spaces outbound attempts evenly so at most `rpm` start in any minute.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Option<Duration>,
    next_slot: Mutex<Instant>,
}

impl RateLimiter {
    pub fn per_minute(rpm: u32) -> Self {
        Self {
            interval: (rpm > 0).then(|| Duration::from_secs(60) / rpm),
            next_slot: Mutex::new(Instant::now()),
        }
    }

    pub fn unlimited() -> Self {
        Self::per_minute(0)
    }

    /// Reserve the next slot and sleep until it opens.
    pub async fn acquire(&self) {
        let Some(interval) = self.interval else {
            return;
        };
        let slot = {
            let mut next = self.next_slot.lock().await;
            let slot = (*next).max(Instant::now());
            *next = slot + interval;
            slot
        };
        tokio::time::sleep_until(slot).await;
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProviderHealth {
    pub provider: String,
    pub default_model: String,
    pub healthy: bool,
}

/// Executes completions against an ordered provider chain with automatic failover.
///
/// - Configuration order is fixed at construction and never changes at runtime.
/// - Each provider is attempted at most once per call.
/// - Every success is recorded in the shared `UsageTracker` before it is returned.
/// - Spend at or above the daily budget fails closed before any request is placed.
pub struct ProviderManager {
    providers: Vec<Arc<dyn CompletionProvider>>,
    catalog: Arc<ModelCatalog>,
    tracker: Arc<UsageTracker>,
    daily_budget_usd: f64,
    attempt_timeout: Duration,
    limiter: RateLimiter,
}

impl ProviderManager {
    /// `providers[0]` is the primary; the rest are fallbacks in order.
    pub fn new(
        providers: Vec<Arc<dyn CompletionProvider>>,
        catalog: Arc<ModelCatalog>,
        tracker: Arc<UsageTracker>,
    ) -> Self {
        Self {
            providers,
            catalog,
            tracker,
            daily_budget_usd: DEFAULT_DAILY_BUDGET_USD,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            limiter: RateLimiter::unlimited(),
        }
    }

    pub fn from_config(
        config: &Config,
        catalog: Arc<ModelCatalog>,
        tracker: Arc<UsageTracker>,
    ) -> Result<Self, ConfigError> {
        let providers = registry::build_chain(config, catalog.clone())?;
        Ok(Self::new(providers, catalog, tracker)
            .with_daily_budget(config.cost_tracking.daily_budget_usd)
            .with_attempt_timeout(config.provider.timeout())
            .with_rate_limit(config.rate_limits.requests_per_minute))
    }

    pub fn with_daily_budget(mut self, usd: f64) -> Self {
        self.daily_budget_usd = usd;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    pub fn with_rate_limit(mut self, requests_per_minute: u32) -> Self {
        self.limiter = RateLimiter::per_minute(requests_per_minute);
        self
    }

    pub fn tracker(&self) -> &Arc<UsageTracker> {
        &self.tracker
    }

    pub fn catalog(&self) -> &Arc<ModelCatalog> {
        &self.catalog
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.name().to_string()).collect()
    }

    /// `(provider, default model)` pairs in configuration order.
    pub fn default_models(&self) -> Vec<(String, String)> {
        self.providers
            .iter()
            .map(|p| (p.name().to_string(), p.default_model().to_string()))
            .collect()
    }

    pub fn daily_budget_usd(&self) -> f64 {
        self.daily_budget_usd
    }

    pub fn daily_cost(&self) -> f64 {
        self.tracker.daily_cost(Utc::now())
    }

    pub fn budget_remaining(&self) -> f64 {
        (self.daily_budget_usd - self.daily_cost()).max(0.0)
    }

    /// Attempt order for one request.
    ///
    /// With `prefer_cheap`, providers are stable-sorted by the blended catalog
    /// price of the model each would serve this request with. Unknown prices
    /// sort last; equal prices keep configuration order.
    pub fn candidate_order(
        &self,
        request: &CompletionRequest,
        prefer_cheap: bool,
    ) -> Vec<Arc<dyn CompletionProvider>> {
        let mut ordered = self.providers.clone();
        if prefer_cheap {
            ordered.sort_by(|a, b| {
                let pa = self.blended_price(a.as_ref(), request);
                let pb = self.blended_price(b.as_ref(), request);
                pa.total_cmp(&pb)
            });
        }
        ordered
    }

    fn blended_price(&self, provider: &dyn CompletionProvider, request: &CompletionRequest) -> f64 {
        self.catalog
            .price(&provider.resolve_model(request))
            .map_or(f64::INFINITY, |p| p.blended())
    }

    fn check_budget(&self) -> Result<(), CompletionError> {
        let spent = self.daily_cost();
        if spent >= self.daily_budget_usd {
            tracing::warn!(
                spent_usd = spent,
                budget_usd = self.daily_budget_usd,
                "daily budget exhausted, refusing request"
            );
            return Err(CompletionError::BudgetExceeded {
                spent_usd: spent,
                budget_usd: self.daily_budget_usd,
            });
        }
        Ok(())
    }

    /// Run one attempt under the per-attempt timeout. On expiry the provider
    /// future is dropped, which aborts its in-flight HTTP request.
    async fn attempt(
        &self,
        provider: &dyn CompletionProvider,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        self.limiter.acquire().await;
        match tokio::time::timeout(self.attempt_timeout, provider.complete(request)).await {
            Ok(result) => result,
            Err(_) => Err(ProviderError::Timeout {
                provider: provider.name().to_string(),
                elapsed_ms: self.attempt_timeout.as_millis() as u64,
            }),
        }
    }

    pub async fn complete(
        &self,
        request: &CompletionRequest,
        prefer_cheap: bool,
    ) -> Result<CompletionResponse, CompletionError> {
        if self.providers.is_empty() {
            return Err(CompletionError::NoProviders);
        }
        if request.is_stream() {
            return Err(CompletionError::Provider(ProviderError::InvalidRequest {
                provider: "manager".to_string(),
                message: "request is marked streaming; use stream()".to_string(),
            }));
        }
        self.check_budget()?;

        let mut failures = Vec::new();
        for provider in self.candidate_order(request, prefer_cheap) {
            match self.attempt(provider.as_ref(), request).await {
                Ok(response) => {
                    tracing::info!(
                        provider = %response.provider,
                        model = %response.model,
                        tokens = response.usage.total_tokens(),
                        cost_usd = response.cost.total_cost(),
                        latency_ms = response.latency_ms,
                        fallbacks_used = failures.len(),
                        "completion succeeded"
                    );
                    self.tracker.record(&response);
                    return Ok(response);
                }
                Err(e) if !e.allows_fallback() => {
                    tracing::warn!("{e}; not trying remaining providers");
                    return Err(CompletionError::Provider(e));
                }
                Err(e) => {
                    tracing::warn!("provider {} failed: {e}", provider.name());
                    failures.push(ProviderFailure::from(&e));
                }
            }
        }

        Err(CompletionError::AllProvidersFailed { failures })
    }

    /// Open a stream on the first provider (configuration order) that accepts it.
    /// Failures after the first fragment belong to the returned stream.
    pub async fn stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, CompletionError> {
        if self.providers.is_empty() {
            return Err(CompletionError::NoProviders);
        }
        self.check_budget()?;

        let mut failures = Vec::new();
        for provider in &self.providers {
            self.limiter.acquire().await;
            let opened =
                tokio::time::timeout(self.attempt_timeout, provider.complete_stream(request)).await;
            let result = opened.unwrap_or_else(|_| {
                Err(ProviderError::Timeout {
                    provider: provider.name().to_string(),
                    elapsed_ms: self.attempt_timeout.as_millis() as u64,
                })
            });
            match result {
                Ok(stream) => return Ok(stream),
                Err(e) if !e.allows_fallback() => return Err(CompletionError::Provider(e)),
                Err(e) => {
                    tracing::warn!("provider {} failed to open stream: {e}", provider.name());
                    failures.push(ProviderFailure::from(&e));
                }
            }
        }
        Err(CompletionError::AllProvidersFailed { failures })
    }

    /// Check every provider concurrently.
    pub async fn health(&self) -> Vec<ProviderHealth> {
        let checks = self.providers.iter().map(|p| async move {
            ProviderHealth {
                provider: p.name().to_string(),
                default_model: p.default_model().to_string(),
                healthy: p.health_check().await,
            }
        });
        futures_util::future::join_all(checks).await
    }
}
