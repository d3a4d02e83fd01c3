use std::sync::Arc;
use std::time::Duration;

use crate::catalog::ModelCatalog;
use crate::config::{Config, ProviderEntry, ProviderKind};
use crate::dispatch::CompletionProvider;
use crate::dispatch::anthropic::AnthropicProvider;
use crate::dispatch::http::ChatCompletionsProvider;
use crate::error::ConfigError;

/// Construct the concrete backend for one configured entry.
pub fn build_provider(
    entry: &ProviderEntry,
    timeout: Duration,
    catalog: Arc<ModelCatalog>,
) -> Result<Arc<dyn CompletionProvider>, ConfigError> {
    let api_key = entry.api_key()?;
    let model = entry.model().to_string();
    let base_url = entry.base_url.clone();

    if catalog.price(&model).is_none() {
        tracing::warn!(
            provider = entry.kind.as_str(),
            model,
            "configured model has no catalog price, its requests will be costed at zero"
        );
    }

    let provider: Arc<dyn CompletionProvider> = match entry.kind {
        ProviderKind::Openrouter => Arc::new(ChatCompletionsProvider::openrouter(
            api_key, model, base_url, timeout, catalog,
        )),
        ProviderKind::Openai => Arc::new(ChatCompletionsProvider::openai(
            api_key, model, base_url, timeout, catalog,
        )),
        ProviderKind::Anthropic => Arc::new(AnthropicProvider::new(
            api_key, model, base_url, timeout, catalog,
        )),
    };
    Ok(provider)
}

/// Build the ordered chain (primary, then fallbacks).
///
/// A fallback whose secret is missing is skipped with a warning; a missing
/// primary secret is a configuration error.
pub fn build_chain(
    config: &Config,
    catalog: Arc<ModelCatalog>,
) -> Result<Vec<Arc<dyn CompletionProvider>>, ConfigError> {
    let timeout = config.provider.timeout();
    let mut chain = vec![build_provider(
        &config.provider.primary,
        timeout,
        catalog.clone(),
    )?];

    for entry in &config.provider.fallbacks {
        match build_provider(entry, timeout, catalog.clone()) {
            Ok(provider) => chain.push(provider),
            Err(e @ ConfigError::MissingSecret { .. }) => {
                tracing::warn!("skipping fallback {}: {e}", entry.kind.as_str());
            }
            Err(e) => return Err(e),
        }
    }

    tracing::info!(
        providers = ?chain.iter().map(|p| p.name().to_string()).collect::<Vec<_>>(),
        "provider chain configured"
    );
    Ok(chain)
}
