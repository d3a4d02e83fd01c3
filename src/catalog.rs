use std::collections::HashMap;

use serde::Serialize;

use crate::dispatch::{Cost, TokenUsage};

/// USD per one million tokens.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ModelPrice {
    pub input_per_million: f64,
    pub output_per_million: f64,
}

impl ModelPrice {
    pub const fn new(input_per_million: f64, output_per_million: f64) -> Self {
        Self {
            input_per_million,
            output_per_million,
        }
    }

    /// Single figure used to rank providers when cheapness is preferred.
    pub fn blended(&self) -> f64 {
        self.input_per_million + self.output_per_million
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub model: String,
    pub vendor: &'static str,
    pub price: ModelPrice,
}

/// Built-in price table. OpenRouter ids are `vendor/model`; direct vendor ids are bare.
const BUILTIN: &[(&str, &str, f64, f64)] = &[
    // OpenRouter
    ("anthropic/claude-3-haiku", "anthropic", 0.25, 1.25),
    ("anthropic/claude-3-5-haiku", "anthropic", 1.0, 5.0),
    ("anthropic/claude-3-5-sonnet", "anthropic", 3.0, 15.0),
    ("anthropic/claude-3-opus", "anthropic", 15.0, 75.0),
    ("openai/gpt-4o-mini", "openai", 0.15, 0.60),
    ("openai/gpt-4o", "openai", 2.50, 10.0),
    ("openai/gpt-4-turbo", "openai", 10.0, 30.0),
    ("google/gemini-pro", "google", 0.125, 0.375),
    ("google/gemini-pro-1.5", "google", 1.25, 5.0),
    ("meta-llama/llama-3-70b-instruct", "meta-llama", 0.59, 0.79),
    ("mistralai/mistral-7b-instruct", "mistralai", 0.06, 0.06),
    ("mistralai/mixtral-8x7b-instruct", "mistralai", 0.24, 0.24),
    // OpenAI direct
    ("gpt-4o-mini", "openai", 0.15, 0.60),
    ("gpt-4o", "openai", 2.50, 10.0),
    ("gpt-4-turbo", "openai", 10.0, 30.0),
    // Anthropic direct
    ("claude-3-haiku-20240307", "anthropic", 0.25, 1.25),
    ("claude-3-5-haiku-20241022", "anthropic", 1.0, 5.0),
    ("claude-3-5-sonnet-20241022", "anthropic", 3.0, 15.0),
    ("claude-3-opus-20240229", "anthropic", 15.0, 75.0),
];

/// Read-only model price table. Built once at startup and shared behind an `Arc`.
#[derive(Debug, Clone)]
pub struct ModelCatalog {
    prices: HashMap<String, CatalogEntry>,
}

impl Default for ModelCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl ModelCatalog {
    pub fn builtin() -> Self {
        let prices = BUILTIN
            .iter()
            .map(|&(model, vendor, input, output)| {
                (
                    model.to_string(),
                    CatalogEntry {
                        model: model.to_string(),
                        vendor,
                        price: ModelPrice::new(input, output),
                    },
                )
            })
            .collect();
        Self { prices }
    }

    pub fn empty() -> Self {
        Self {
            prices: HashMap::new(),
        }
    }

    /// Adds or replaces an entry. Only used while building the catalog.
    pub fn with_price(mut self, model: &str, vendor: &'static str, price: ModelPrice) -> Self {
        self.prices.insert(
            model.to_string(),
            CatalogEntry {
                model: model.to_string(),
                vendor,
                price,
            },
        );
        self
    }

    pub fn price(&self, model: &str) -> Option<ModelPrice> {
        self.prices.get(model).map(|e| e.price)
    }

    /// Entries sorted by model id.
    pub fn entries(&self) -> Vec<&CatalogEntry> {
        let mut entries: Vec<&CatalogEntry> = self.prices.values().collect();
        entries.sort_by(|a, b| a.model.cmp(&b.model));
        entries
    }

    /// The one cost function every provider uses, so a response's cost is
    /// reproducible from its usage and resolved model.
    /// Unknown models cost zero.
    pub fn cost_for(&self, model: &str, usage: &TokenUsage) -> Cost {
        match self.price(model) {
            Some(price) => Cost::new(
                usage.prompt_tokens() as f64 / 1_000_000.0 * price.input_per_million,
                usage.completion_tokens() as f64 / 1_000_000.0 * price.output_per_million,
            ),
            None => {
                tracing::debug!(model, "model missing from catalog, reporting zero cost");
                Cost::zero()
            }
        }
    }
}
