//! Provider manager: fallback order, short-circuiting, budget gate, timeouts,
//! prefer-cheap ordering and usage recording.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use accu::catalog::{ModelCatalog, ModelPrice};
use accu::dispatch::manager::{ProviderManager, RateLimiter};
use accu::dispatch::{
    CompletionProvider, CompletionRequest, CompletionResponse, CompletionStream, Cost, Message,
    TokenUsage,
};
use accu::error::{CompletionError, ProviderError};
use accu::usage::UsageTracker;
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
enum Script {
    Reply(&'static str),
    Fail(fn(&str) -> ProviderError),
    Hang,
}

struct ScriptedProvider {
    name: &'static str,
    model: &'static str,
    script: Script,
    catalog: Arc<ModelCatalog>,
    calls: AtomicUsize,
}

impl ScriptedProvider {
    fn new(name: &'static str, model: &'static str, script: Script, catalog: &Arc<ModelCatalog>) -> Arc<Self> {
        Arc::new(Self {
            name,
            model,
            script,
            catalog: catalog.clone(),
            calls: AtomicUsize::new(0),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for ScriptedProvider {
    fn name(&self) -> &str {
        self.name
    }

    fn default_model(&self) -> &str {
        self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<CompletionResponse, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Reply(text) => {
                let model = self.resolve_model(request);
                let usage = TokenUsage::new(1_000, 500);
                Ok(CompletionResponse {
                    content: text.to_string(),
                    cost: self.catalog.cost_for(&model, &usage),
                    model,
                    usage,
                    latency_ms: 12,
                    provider: self.name.to_string(),
                    request_id: None,
                })
            }
            Script::Fail(make) => Err(make(self.name)),
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<CompletionStream, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &self.script {
            Script::Reply(text) => {
                let fragments: Vec<Result<String, ProviderError>> =
                    text.split(' ').map(|w| Ok(w.to_string())).collect();
                Ok(CompletionStream::new(
                    Box::pin(futures_util::stream::iter(fragments)),
                    CancellationToken::new(),
                    self.name,
                    self.resolve_model(request),
                ))
            }
            Script::Fail(make) => Err(make(self.name)),
            Script::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    async fn health_check(&self) -> bool {
        !matches!(self.script, Script::Fail(_))
    }
}

fn rate_limited(provider: &str) -> ProviderError {
    ProviderError::RateLimited {
        provider: provider.to_string(),
        retry_after_secs: Some(7),
    }
}

fn unavailable(provider: &str) -> ProviderError {
    ProviderError::Unavailable {
        provider: provider.to_string(),
        message: "503 Service Unavailable".to_string(),
        status: Some(503),
    }
}

fn invalid(provider: &str) -> ProviderError {
    ProviderError::InvalidRequest {
        provider: provider.to_string(),
        message: "400 Bad Request: context too long".to_string(),
    }
}

fn timeout(provider: &str) -> ProviderError {
    ProviderError::Timeout {
        provider: provider.to_string(),
        elapsed_ms: 30_000,
    }
}

fn test_catalog() -> Arc<ModelCatalog> {
    Arc::new(
        ModelCatalog::empty()
            .with_price("expensive", "test", ModelPrice::new(10.0, 30.0))
            .with_price("cheap-a", "test", ModelPrice::new(0.15, 0.60))
            .with_price("cheap-b", "test", ModelPrice::new(0.15, 0.60)),
    )
}

fn request() -> CompletionRequest {
    CompletionRequest::new(vec![Message::user("hello")])
}

fn manager(providers: Vec<Arc<ScriptedProvider>>, catalog: &Arc<ModelCatalog>) -> ProviderManager {
    let providers: Vec<Arc<dyn CompletionProvider>> = providers
        .into_iter()
        .map(|p| p as Arc<dyn CompletionProvider>)
        .collect();
    ProviderManager::new(providers, catalog.clone(), Arc::new(UsageTracker::new()))
}

// ---------------------------------------------------------------------------
// Fallback chain
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limited_primary_falls_back_and_records_once() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Fail(rate_limited), &catalog);
    let b = ScriptedProvider::new("b", "cheap-a", Script::Reply("from b"), &catalog);
    let c = ScriptedProvider::new("c", "cheap-b", Script::Reply("from c"), &catalog);
    let mgr = manager(vec![a.clone(), b.clone(), c.clone()], &catalog);

    let response = mgr.complete(&request(), false).await.unwrap();

    assert_eq!(response.content, "from b");
    assert_eq!(response.provider, "b");
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    assert_eq!(c.calls(), 0);

    let records = mgr.tracker().records();
    assert_eq!(records.len(), 1, "exactly one usage record per success");
    assert_eq!(records[0].provider, "b");
    assert_eq!(records[0].model, "cheap-a");
}

#[tokio::test]
async fn first_success_stops_the_chain() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Reply("from a"), &catalog);
    let b = ScriptedProvider::new("b", "cheap-a", Script::Reply("from b"), &catalog);
    let mgr = manager(vec![a.clone(), b.clone()], &catalog);

    let response = mgr.complete(&request(), false).await.unwrap();
    assert_eq!(response.provider, "a");
    assert_eq!(b.calls(), 0, "fallback must not be tried after a success");
}

#[tokio::test]
async fn invalid_request_short_circuits_the_chain() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Fail(invalid), &catalog);
    let b = ScriptedProvider::new("b", "cheap-a", Script::Reply("from b"), &catalog);
    let c = ScriptedProvider::new("c", "cheap-b", Script::Reply("from c"), &catalog);
    let mgr = manager(vec![a.clone(), b.clone(), c.clone()], &catalog);

    let err = mgr.complete(&request(), false).await.unwrap_err();

    assert!(
        matches!(err, CompletionError::Provider(ProviderError::InvalidRequest { ref provider, .. }) if provider == "a"),
        "got {err:?}"
    );
    assert_eq!(b.calls() + c.calls(), 0, "an invalid request fails the same everywhere");
    assert!(mgr.tracker().is_empty());
}

#[tokio::test]
async fn all_failures_are_reported_in_attempt_order() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Fail(rate_limited), &catalog);
    let b = ScriptedProvider::new("b", "cheap-a", Script::Fail(unavailable), &catalog);
    let mgr = manager(vec![a, b], &catalog);

    let err = mgr.complete(&request(), false).await.unwrap_err();
    let CompletionError::AllProvidersFailed { failures } = err else {
        panic!("expected AllProvidersFailed, got {err:?}");
    };
    assert_eq!(failures.len(), 2);
    assert_eq!(failures[0].provider, "a");
    assert_eq!(failures[0].kind, "rate_limited");
    assert!(failures[0].message.contains("retry after 7s"));
    assert_eq!(failures[1].provider, "b");
    assert_eq!(failures[1].kind, "unavailable");
    assert!(!failures[1].message.contains("Service Unavailable"), "upstream text must not leak");
}

#[tokio::test]
async fn empty_chain_reports_no_providers() {
    let catalog = test_catalog();
    let mgr = manager(Vec::new(), &catalog);
    let err = mgr.complete(&request(), false).await.unwrap_err();
    assert!(matches!(err, CompletionError::NoProviders));
}

#[tokio::test]
async fn streaming_request_is_refused_by_complete() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Reply("from a"), &catalog);
    let mgr = manager(vec![a.clone()], &catalog);

    let err = mgr.complete(&request().streaming(true), false).await.unwrap_err();
    assert_eq!(err.kind(), "invalid_request");
    assert_eq!(a.calls(), 0);
    assert!(mgr.tracker().is_empty());

    let stream = mgr.stream(&request().streaming(true)).await;
    assert!(stream.is_ok());
}

// ---------------------------------------------------------------------------
// Per-attempt timeout
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hung_attempt_times_out_and_falls_back() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Hang, &catalog);
    let b = ScriptedProvider::new("b", "cheap-a", Script::Reply("from b"), &catalog);
    let mgr = manager(vec![a.clone(), b], &catalog).with_attempt_timeout(Duration::from_millis(50));

    let start = Instant::now();
    let response = mgr.complete(&request(), false).await.unwrap();
    assert_eq!(response.provider, "b");
    assert_eq!(a.calls(), 1);
    assert!(start.elapsed() < Duration::from_secs(5));
}

#[tokio::test]
async fn every_provider_timing_out_is_reported_as_timeouts() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Hang, &catalog);
    let b = ScriptedProvider::new("b", "cheap-a", Script::Fail(timeout), &catalog);
    let mgr = manager(vec![a, b], &catalog).with_attempt_timeout(Duration::from_millis(30));

    let err = mgr.complete(&request(), false).await.unwrap_err();
    let CompletionError::AllProvidersFailed { failures } = err else {
        panic!("expected AllProvidersFailed, got {err:?}");
    };
    assert!(failures.iter().all(|f| f.kind == "timeout"), "{failures:?}");
}

// ---------------------------------------------------------------------------
// prefer_cheap ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn prefer_cheap_sorts_by_price_and_keeps_configuration_order_on_ties() {
    let catalog = test_catalog();
    let pricey = ScriptedProvider::new("pricey", "expensive", Script::Fail(unavailable), &catalog);
    let unknown = ScriptedProvider::new("unknown", "not-in-catalog", Script::Fail(unavailable), &catalog);
    let first_cheap = ScriptedProvider::new("first-cheap", "cheap-a", Script::Fail(unavailable), &catalog);
    let second_cheap = ScriptedProvider::new("second-cheap", "cheap-b", Script::Fail(unavailable), &catalog);
    let mgr = manager(vec![pricey, unknown, first_cheap, second_cheap], &catalog);

    let order: Vec<String> = mgr
        .candidate_order(&request(), true)
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(order, ["first-cheap", "second-cheap", "pricey", "unknown"]);

    let unsorted: Vec<String> = mgr
        .candidate_order(&request(), false)
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(unsorted, ["pricey", "unknown", "first-cheap", "second-cheap"]);

    let err = mgr.complete(&request(), true).await.unwrap_err();
    let CompletionError::AllProvidersFailed { failures } = err else {
        panic!("expected AllProvidersFailed, got {err:?}");
    };
    let attempted: Vec<&str> = failures.iter().map(|f| f.provider.as_str()).collect();
    assert_eq!(attempted, ["first-cheap", "second-cheap", "pricey", "unknown"]);
}

#[tokio::test]
async fn prefer_cheap_prices_the_model_override() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "cheap-a", Script::Reply("a"), &catalog);
    let b = ScriptedProvider::new("b", "expensive", Script::Reply("b"), &catalog);
    let mgr = manager(vec![a, b], &catalog);

    // Every provider resolves the same override, so prices tie and configuration order wins.
    let req = request().with_model("expensive");
    let order: Vec<String> = mgr
        .candidate_order(&req, true)
        .iter()
        .map(|p| p.name().to_string())
        .collect();
    assert_eq!(order, ["a", "b"]);
}

// ---------------------------------------------------------------------------
// Budget gate and cost
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exhausted_budget_fails_closed_before_any_attempt() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Reply("a"), &catalog);
    let mgr = manager(vec![a.clone()], &catalog).with_daily_budget(0.02);

    // 1000 prompt + 500 completion tokens on "expensive" = 0.01 + 0.015 = 0.025 USD
    let first = mgr.complete(&request(), false).await.unwrap();
    assert!((first.cost.total_cost() - 0.025).abs() < 1e-12);

    let err = mgr.complete(&request(), false).await.unwrap_err();
    match err {
        CompletionError::BudgetExceeded { spent_usd, budget_usd } => {
            assert!((spent_usd - 0.025).abs() < 1e-12);
            assert_eq!(budget_usd, 0.02);
        }
        other => panic!("expected BudgetExceeded, got {other:?}"),
    }
    assert_eq!(a.calls(), 1, "no request may be placed once the budget is spent");
    assert_eq!(mgr.budget_remaining(), 0.0);
}

#[tokio::test]
async fn response_cost_is_reproducible_from_usage_and_catalog() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "cheap-a", Script::Reply("a"), &catalog);
    let mgr = manager(vec![a], &catalog);

    let response = mgr.complete(&request(), false).await.unwrap();
    let recomputed = catalog.cost_for(&response.model, &response.usage);
    assert_eq!(response.cost, recomputed);
    assert_eq!(response.usage.total_tokens(), 1_500);
}

#[tokio::test]
async fn unknown_model_costs_zero() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "mystery-model", Script::Reply("a"), &catalog);
    let mgr = manager(vec![a], &catalog);

    let response = mgr.complete(&request(), false).await.unwrap();
    assert_eq!(response.cost.total_cost(), 0.0);
    assert_eq!(mgr.tracker().len(), 1);
}

// ---------------------------------------------------------------------------
// Streaming and health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stream_opens_on_first_accepting_provider() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Fail(unavailable), &catalog);
    let b = ScriptedProvider::new("b", "cheap-a", Script::Reply("one two three"), &catalog);
    let mgr = manager(vec![a, b], &catalog);

    let mut stream = mgr.stream(&request()).await.unwrap();
    assert_eq!(stream.provider(), "b");
    let mut fragments = Vec::new();
    while let Some(fragment) = stream.next().await {
        fragments.push(fragment.unwrap());
    }
    assert_eq!(fragments, ["one", "two", "three"]);
}

#[tokio::test]
async fn stream_invalid_request_is_not_retried() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Fail(invalid), &catalog);
    let b = ScriptedProvider::new("b", "cheap-a", Script::Reply("b"), &catalog);
    let mgr = manager(vec![a, b.clone()], &catalog);

    let err = mgr.stream(&request()).await.err().unwrap();
    assert_eq!(err.kind(), "invalid_request");
    assert_eq!(b.calls(), 0);
}

#[tokio::test]
async fn health_reports_every_provider_in_order() {
    let catalog = test_catalog();
    let a = ScriptedProvider::new("a", "expensive", Script::Reply("a"), &catalog);
    let b = ScriptedProvider::new("b", "cheap-a", Script::Fail(unavailable), &catalog);
    let mgr = manager(vec![a, b], &catalog);

    let health = mgr.health().await;
    assert_eq!(health.len(), 2);
    assert_eq!((health[0].provider.as_str(), health[0].healthy), ("a", true));
    assert_eq!((health[1].provider.as_str(), health[1].healthy), ("b", false));
    assert_eq!(health[1].default_model, "cheap-a");
}

// ---------------------------------------------------------------------------
// Rate limiter
// ---------------------------------------------------------------------------

#[tokio::test]
async fn rate_limiter_spaces_attempts_evenly() {
    // 1200 rpm = one slot every 50ms
    let limiter = RateLimiter::per_minute(1200);
    let start = Instant::now();
    for _ in 0..3 {
        limiter.acquire().await;
    }
    assert!(
        start.elapsed() >= Duration::from_millis(95),
        "three acquisitions need two full intervals, took {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn unlimited_rate_limiter_never_waits() {
    let limiter = RateLimiter::unlimited();
    let start = Instant::now();
    for _ in 0..100 {
        limiter.acquire().await;
    }
    assert!(start.elapsed() < Duration::from_millis(50));
}

// ---------------------------------------------------------------------------
// Request and value types
// ---------------------------------------------------------------------------

#[test]
fn request_validation_rejects_malformed_shapes() {
    let empty = CompletionRequest::new(Vec::new());
    assert!(matches!(empty.validate("p"), Err(ProviderError::InvalidRequest { .. })));

    let zero_tokens = request().with_max_tokens(0);
    assert!(zero_tokens.validate("p").is_err());

    let too_hot = request().with_temperature(2.5);
    assert!(too_hot.validate("p").is_err());

    let nan = request().with_temperature(f64::NAN);
    assert!(nan.validate("p").is_err());

    assert!(request().with_temperature(2.0).validate("p").is_ok());
    assert!(request().validate("p").is_ok());
}

#[test]
fn request_defaults_and_stop_dedupe() {
    let req = request().with_stop(vec!["END".into(), "STOP".into(), "END".into()]);
    assert_eq!(req.max_tokens(), 4096);
    assert_eq!(req.temperature(), 0.7);
    assert_eq!(req.stop(), ["END", "STOP"]);
    assert!(!req.is_stream());
}

#[test]
fn cost_clamps_negative_and_non_finite_components() {
    let cost = Cost::new(-1.0, f64::NAN);
    assert_eq!(cost.total_cost(), 0.0);

    let cost = Cost::new(0.25, 0.5);
    assert_eq!(cost.total_cost(), 0.75);
}

#[test]
fn token_usage_total_is_always_the_sum() {
    let usage = TokenUsage::new(120, 30);
    assert_eq!(usage.total_tokens(), 150);
}

#[test]
fn provider_error_user_messages_are_sanitized() {
    let err = unavailable("openrouter");
    assert_eq!(err.user_message(), "openrouter unavailable (HTTP 503)");
    assert!(err.allows_fallback());
    assert!(!invalid("openrouter").allows_fallback());
}
