use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::catalog::ModelCatalog;
use crate::dispatch::http::{build_client, check_status, read_capped, usage_from_wire};
use crate::dispatch::sse::{self, SseStep};
use crate::dispatch::{
    CompletionProvider, CompletionRequest, CompletionResponse, CompletionStream, Role,
};
use crate::error::ProviderError;

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Anthropic Messages API. System messages travel in the top-level `system` field.
pub struct AnthropicProvider {
    base_url: String,
    api_key: String,
    default_model: String,
    timeout: Duration,
    catalog: Arc<ModelCatalog>,
    client: Client,
}

#[derive(Deserialize)]
struct MessagesResponse {
    id: Option<String>,
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    usage: Option<AnthropicUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    text: Option<String>,
}

#[derive(Deserialize)]
struct AnthropicUsage {
    input_tokens: u64,
    output_tokens: u64,
}

#[derive(Deserialize)]
struct StreamFrame {
    #[serde(rename = "type", default)]
    kind: String,
    delta: Option<StreamDelta>,
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct StreamDelta {
    text: Option<String>,
}

impl AnthropicProvider {
    pub fn new(
        api_key: String,
        default_model: String,
        base_url: Option<String>,
        timeout: Duration,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        Self {
            base_url: base_url.unwrap_or_else(|| ANTHROPIC_BASE_URL.to_string()),
            api_key,
            default_model,
            timeout,
            catalog,
            client: build_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
    }

    fn body(&self, request: &CompletionRequest, model: &str, stream: bool) -> serde_json::Value {
        let system: Vec<&str> = request
            .messages()
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect();
        let messages: Vec<serde_json::Value> = request
            .messages()
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens(),
            "temperature": request.temperature(),
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = serde_json::json!(system.join("\n\n"));
        }
        if !request.stop().is_empty() {
            body["stop_sequences"] = serde_json::json!(request.stop());
        }
        body
    }

    async fn send(
        &self,
        request: &CompletionRequest,
        model: &str,
        stream: bool,
        start: Instant,
    ) -> Result<Response, ProviderError> {
        request.validate(self.name())?;
        if request.messages().iter().all(|m| m.role == Role::System) {
            return Err(ProviderError::InvalidRequest {
                provider: self.name().to_string(),
                message: "at least one user or assistant message is required".to_string(),
            });
        }
        let response = self
            .authorized(self.client.post(self.url("/messages")))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&self.body(request, model, stream))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(self.name(), e, start.elapsed()))?;
        check_status(self.name(), response, start).await
    }
}

fn parse_frame(event: &str, data: &str) -> Result<SseStep, String> {
    let frame: StreamFrame =
        serde_json::from_str(data).map_err(|e| format!("malformed stream event: {e}"))?;
    let kind = if frame.kind.is_empty() { event } else { frame.kind.as_str() };
    match kind {
        "content_block_delta" => Ok(frame
            .delta
            .and_then(|d| d.text)
            .map_or(SseStep::Skip, SseStep::Text)),
        "message_stop" => Ok(SseStep::Stop),
        "error" => Err(format!(
            "stream error: {}",
            frame.error.unwrap_or(serde_json::Value::Null)
        )),
        _ => Ok(SseStep::Skip),
    }
}

#[async_trait]
impl CompletionProvider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let start = Instant::now();
        let model = self.resolve_model(request);

        let response = self.send(request, &model, false, start).await?;
        let bytes = read_capped(self.name(), response, start).await?;

        let parsed: MessagesResponse =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::Unavailable {
                provider: self.name().to_string(),
                message: format!("failed to parse response: {e}"),
                status: None,
            })?;

        let content: String = parsed
            .content
            .iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text.as_deref())
            .collect();
        if content.is_empty() {
            return Err(ProviderError::Unavailable {
                provider: self.name().to_string(),
                message: "response contained no text blocks".to_string(),
                status: None,
            });
        }

        let usage = parsed
            .usage
            .map(|u| usage_from_wire(self.name(), u.input_tokens, u.output_tokens, None))
            .unwrap_or_default();

        let resolved = if self.catalog.price(&model).is_some() {
            model
        } else {
            parsed.model.unwrap_or(model)
        };
        let cost = self.catalog.cost_for(&resolved, &usage);

        Ok(CompletionResponse {
            content,
            model: resolved,
            usage,
            cost,
            latency_ms: start.elapsed().as_millis() as u64,
            provider: self.name().to_string(),
            request_id: parsed.id,
        })
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let start = Instant::now();
        let model = self.resolve_model(request);
        let response = self.send(request, &model, true, start).await?;
        Ok(sse::fragment_stream(response, self.name(), &model, parse_frame))
    }

    async fn health_check(&self) -> bool {
        let result = self
            .authorized(self.client.get(self.url("/models")))
            .timeout(self.timeout)
            .send()
            .await;
        match result {
            Ok(response) => response.status() == StatusCode::OK,
            Err(e) => {
                tracing::debug!(provider = self.name(), "health check failed: {e}");
                false
            }
        }
    }
}
