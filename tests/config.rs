//! Configuration file parsing, defaults, validation and provider chain assembly.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use accu::catalog::ModelCatalog;
use accu::config::{Config, ProviderEntry, ProviderKind};
use accu::discovery::pipeline::PipelineSettings;
use accu::discovery::search::SearchStrategy;
use accu::dispatch::manager::ProviderManager;
use accu::dispatch::registry;
use accu::error::ConfigError;
use accu::usage::UsageTracker;

const FULL: &str = r#"
[provider]
timeoutSecs = 45

[provider.primary]
type = "openrouter"
model = "openai/gpt-4o-mini"
apiKeyEnv = "ACCU_TEST_FULL_OPENROUTER"

[[provider.fallbacks]]
type = "anthropic"
apiKeyEnv = "ACCU_TEST_FULL_ANTHROPIC"

[[provider.fallbacks]]
type = "openai"
model = "gpt-4o"
baseUrl = "http://localhost:9999/v1"

[rateLimits]
requestsPerMinute = 120

[costTracking]
dailyBudgetUSD = 12.5

[discovery]
minStars = 20
maxStars = 300
languages = ["rust", "zig"]
cooldownHours = 6
maxConcurrency = 3
maxReposPerRun = 25
strategies = ["abandoned_stars", "unfinished_ideas"]
"#;

fn catalog() -> Arc<ModelCatalog> {
    Arc::new(ModelCatalog::builtin())
}

#[test]
fn parses_every_section() {
    let config = Config::from_toml_str(FULL, "inline").unwrap();

    assert_eq!(config.provider.timeout(), Duration::from_secs(45));
    assert_eq!(config.provider.primary.kind, ProviderKind::Openrouter);
    assert_eq!(config.provider.primary.model(), "openai/gpt-4o-mini");
    assert_eq!(config.provider.primary.api_key_env(), "ACCU_TEST_FULL_OPENROUTER");

    assert_eq!(config.provider.fallbacks.len(), 2);
    let anthropic = &config.provider.fallbacks[0];
    assert_eq!(anthropic.kind, ProviderKind::Anthropic);
    assert_eq!(anthropic.model(), "claude-3-haiku-20240307");
    let openai = &config.provider.fallbacks[1];
    assert_eq!(openai.api_key_env(), "OPENAI_API_KEY");
    assert_eq!(openai.base_url.as_deref(), Some("http://localhost:9999/v1"));

    assert_eq!(config.rate_limits.requests_per_minute, 120);
    assert_eq!(config.cost_tracking.daily_budget_usd, 12.5);

    let d = &config.discovery;
    assert_eq!((d.min_stars, d.max_stars), (20, 300));
    assert_eq!(d.languages, ["rust", "zig"]);
    assert_eq!(d.cooldown(), Duration::from_secs(6 * 3600));
    assert_eq!(d.max_concurrency, 3);
    assert_eq!(d.max_repos_per_run, 25);
    assert_eq!(
        d.strategies,
        [SearchStrategy::AbandonedStars, SearchStrategy::UnfinishedIdeas]
    );
}

#[test]
fn empty_file_yields_defaults() {
    let config = Config::from_toml_str("", "inline").unwrap();
    assert_eq!(config, Config::default());
    assert_eq!(config.provider.primary.kind, ProviderKind::Openrouter);
    assert!(config.provider.fallbacks.is_empty());
    assert_eq!(config.provider.timeout(), Duration::from_secs(30));
    assert_eq!(config.rate_limits.requests_per_minute, 60);
    assert_eq!(config.cost_tracking.daily_budget_usd, 50.0);
    assert_eq!(config.discovery.cooldown_hours, 24);
    assert_eq!(config.discovery.max_repos_per_run, 50);
}

#[test]
fn partial_sections_keep_remaining_defaults() {
    let config = Config::from_toml_str("[discovery]\nmaxConcurrency = 9\n", "inline").unwrap();
    assert_eq!(config.discovery.max_concurrency, 9);
    assert_eq!(config.discovery.min_stars, 5);
    assert_eq!(config.discovery.max_stars, 500);
}

#[test]
fn unknown_keys_are_rejected() {
    let err = Config::from_toml_str("[costTracking]\ndailyBudget = 3.0\n", "accu.toml").unwrap_err();
    match err {
        ConfigError::Parse { path, .. } => assert_eq!(path, "accu.toml"),
        other => panic!("expected parse error, got {other:?}"),
    }
}

#[test]
fn unknown_provider_type_is_rejected() {
    let err = Config::from_toml_str("[provider.primary]\ntype = \"cohere\"\n", "inline").unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }));
}

#[test]
fn invalid_values_fail_validation() {
    let cases = [
        ("[costTracking]\ndailyBudgetUSD = -1.0\n", "dailyBudgetUSD"),
        ("[provider]\ntimeoutSecs = 0\n", "timeoutSecs"),
        ("[discovery]\nminStars = 600\nmaxStars = 500\n", "minStars"),
        ("[discovery]\nmaxConcurrency = 0\n", "maxConcurrency"),
        ("[discovery]\nmaxReposPerRun = 0\n", "maxReposPerRun"),
    ];
    for (toml, field) in cases {
        match Config::from_toml_str(toml, "inline") {
            Err(ConfigError::Invalid(msg)) => assert!(msg.contains(field), "{msg}"),
            other => panic!("{field}: expected validation error, got {other:?}"),
        }
    }
}

#[test]
fn missing_file_is_a_read_error() {
    let err = Config::from_path(Path::new("/nonexistent/accu-test.toml")).unwrap_err();
    assert!(matches!(err, ConfigError::Read { .. }));
}

#[test]
fn blank_model_falls_back_to_provider_default() {
    let mut entry = ProviderEntry::new(ProviderKind::Openai);
    entry.model = Some("  ".to_string());
    assert_eq!(entry.model(), "gpt-4o-mini");
}

#[test]
fn chain_lists_primary_then_fallbacks() {
    let config = Config::from_toml_str(FULL, "inline").unwrap();
    let kinds: Vec<ProviderKind> = config.provider_chain().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        [ProviderKind::Openrouter, ProviderKind::Anthropic, ProviderKind::Openai]
    );
}

#[test]
fn pipeline_settings_follow_discovery_section() {
    let config = Config::from_toml_str(FULL, "inline").unwrap();
    let settings = PipelineSettings::from(&config.discovery);
    assert_eq!(settings.max_concurrency, 3);
    assert_eq!(settings.max_repos_per_run, 25);
    assert_eq!(settings.cooldown, Duration::from_secs(6 * 3600));
}

#[test]
fn huge_cooldown_saturates() {
    let config = Config::from_toml_str("[discovery]\ncooldownHours = 9223372036854775807\n", "inline").unwrap();
    assert_eq!(config.discovery.cooldown(), Duration::from_secs(u64::MAX));
    let settings = PipelineSettings::from(&config.discovery);
    assert_eq!(settings.cooldown, Duration::from_secs(u64::MAX));
}

// ---------------------------------------------------------------------------
// Secrets and chain assembly. Each test uses its own variable names.
// ---------------------------------------------------------------------------

fn entry(kind: ProviderKind, var: &str) -> ProviderEntry {
    ProviderEntry {
        api_key_env: Some(var.to_string()),
        ..ProviderEntry::new(kind)
    }
}

#[test]
fn missing_primary_secret_is_an_error() {
    let mut config = Config::default();
    config.provider.primary = entry(ProviderKind::Openrouter, "ACCU_TEST_UNSET_PRIMARY");

    let err = registry::build_chain(&config, catalog()).err().unwrap();
    match err {
        ConfigError::MissingSecret { var, provider } => {
            assert_eq!(var, "ACCU_TEST_UNSET_PRIMARY");
            assert_eq!(provider, "openrouter");
        }
        other => panic!("expected missing secret, got {other:?}"),
    }
}

#[test]
fn blank_secret_counts_as_missing() {
    unsafe { std::env::set_var("ACCU_TEST_BLANK_KEY", "   ") };
    let err = entry(ProviderKind::Openai, "ACCU_TEST_BLANK_KEY").api_key().unwrap_err();
    assert!(matches!(err, ConfigError::MissingSecret { .. }));
}

#[test]
fn fallback_without_secret_is_skipped() {
    unsafe {
        std::env::set_var("ACCU_TEST_SKIP_PRIMARY", "sk-primary");
        std::env::set_var("ACCU_TEST_SKIP_OPENAI", "sk-openai");
    }
    let mut config = Config::default();
    config.provider.primary = entry(ProviderKind::Openrouter, "ACCU_TEST_SKIP_PRIMARY");
    config.provider.fallbacks = vec![
        entry(ProviderKind::Anthropic, "ACCU_TEST_SKIP_UNSET"),
        entry(ProviderKind::Openai, "ACCU_TEST_SKIP_OPENAI"),
    ];

    let chain = registry::build_chain(&config, catalog()).unwrap();
    let names: Vec<&str> = chain.iter().map(|p| p.name()).collect();
    assert_eq!(names, ["openrouter", "openai"]);
}

#[test]
fn manager_from_config_carries_budget_and_chain() {
    unsafe { std::env::set_var("ACCU_TEST_MANAGER_KEY", "sk-manager") };
    let mut config = Config::from_toml_str("[costTracking]\ndailyBudgetUSD = 7.0\n", "inline").unwrap();
    config.provider.primary = entry(ProviderKind::Anthropic, "ACCU_TEST_MANAGER_KEY");

    let manager =
        ProviderManager::from_config(&config, catalog(), Arc::new(UsageTracker::new())).unwrap();
    assert_eq!(manager.daily_budget_usd(), 7.0);
    assert_eq!(manager.provider_names(), ["anthropic"]);
    assert_eq!(
        manager.default_models(),
        [("anthropic".to_string(), "claude-3-haiku-20240307".to_string())]
    );
    assert_eq!(manager.budget_remaining(), 7.0);
}
