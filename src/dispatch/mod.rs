pub mod anthropic;
pub mod http;
pub mod manager;
pub mod registry;
pub mod sse;

use std::pin::Pin;
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures_util::Stream;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::error::ProviderError;

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f64 = 0.7;
const MAX_TEMPERATURE: f64 = 2.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completion request. Built once with the consuming `with_*` methods and
/// never mutated afterwards; message order is preserved on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    messages: Vec<Message>,
    model: Option<String>,
    max_tokens: u32,
    temperature: f64,
    stop: Vec<String>,
    stream: bool,
}

impl CompletionRequest {
    pub fn new(messages: Vec<Message>) -> Self {
        Self {
            messages,
            model: None,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: DEFAULT_TEMPERATURE,
            stop: Vec::new(),
            stream: false,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    /// Duplicate stop sequences are dropped, first occurrence wins.
    pub fn with_stop(mut self, stop: Vec<String>) -> Self {
        let mut seen = std::collections::HashSet::new();
        self.stop = stop.into_iter().filter(|s| seen.insert(s.clone())).collect();
        self
    }

    /// Marks the request for [`ProviderManager::stream`](crate::dispatch::manager::ProviderManager::stream).
    /// `ProviderManager::complete` refuses streaming requests.
    pub fn streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn stop(&self) -> &[String] {
        &self.stop
    }

    pub fn is_stream(&self) -> bool {
        self.stream
    }

    /// Checks the request shape before anything goes over the network.
    pub fn validate(&self, provider: &str) -> Result<(), ProviderError> {
        let invalid = |message: &str| ProviderError::InvalidRequest {
            provider: provider.to_string(),
            message: message.to_string(),
        };
        if self.messages.is_empty() {
            return Err(invalid("messages must not be empty"));
        }
        if self.max_tokens == 0 {
            return Err(invalid("max_tokens must be positive"));
        }
        if !self.temperature.is_finite() || !(0.0..=MAX_TEMPERATURE).contains(&self.temperature) {
            return Err(invalid("temperature must be between 0.0 and 2.0"));
        }
        if self.model.as_deref().is_some_and(|m| m.trim().is_empty()) {
            return Err(invalid("model override must not be blank"));
        }
        Ok(())
    }
}

/// Token counts for one completion. `total_tokens` is derived, never supplied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TokenUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: u64,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u64, completion_tokens: u64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn completion_tokens(&self) -> u64 {
        self.completion_tokens
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }
}

/// Cost breakdown in USD. Components are clamped to be finite and non-negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Cost {
    input_cost: f64,
    output_cost: f64,
    total_cost: f64,
}

impl Cost {
    pub fn new(input_cost: f64, output_cost: f64) -> Self {
        let input_cost = non_negative(input_cost);
        let output_cost = non_negative(output_cost);
        Self {
            input_cost,
            output_cost,
            total_cost: input_cost + output_cost,
        }
    }

    pub fn zero() -> Self {
        Self::default()
    }

    pub fn input_cost(&self) -> f64 {
        self.input_cost
    }

    pub fn output_cost(&self) -> f64 {
        self.output_cost
    }

    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompletionResponse {
    pub content: String,
    /// Model that actually produced the text (after override/default resolution).
    pub model: String,
    pub usage: TokenUsage,
    pub cost: Cost,
    pub latency_ms: u64,
    /// Provider that served the request, which differs from the primary after fallback.
    pub provider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Ordered, finite sequence of text fragments from a streaming completion.
///
/// Cancelling the token (or dropping the stream) ends the sequence and drops the
/// underlying HTTP response, which releases the connection.
pub struct CompletionStream {
    inner: Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>,
    cancel: CancellationToken,
    provider: String,
    model: String,
}

impl CompletionStream {
    pub fn new(
        inner: Pin<Box<dyn Stream<Item = Result<String, ProviderError>> + Send>>,
        cancel: CancellationToken,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            inner,
            cancel,
            provider: provider.into(),
            model: model.into(),
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drains the stream into a single string.
    pub async fn collect_text(mut self) -> Result<String, ProviderError> {
        use futures_util::StreamExt;

        let mut text = String::new();
        while let Some(fragment) = self.next().await {
            text.push_str(&fragment?);
        }
        Ok(text)
    }
}

impl Stream for CompletionStream {
    type Item = Result<String, ProviderError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl Drop for CompletionStream {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// A backend that can serve completions.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider identifier recorded on responses and usage records.
    fn name(&self) -> &str;

    /// Model used when the request carries no override.
    fn default_model(&self) -> &str;

    fn resolve_model(&self, request: &CompletionRequest) -> String {
        request
            .model()
            .unwrap_or_else(|| self.default_model())
            .to_string()
    }

    async fn complete(&self, request: &CompletionRequest)
    -> Result<CompletionResponse, ProviderError>;

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError>;

    /// Liveness check. Any failure reads as `false`.
    async fn health_check(&self) -> bool;
}
