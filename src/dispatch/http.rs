use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;

use crate::catalog::ModelCatalog;
use crate::dispatch::sse::{self, SseStep};
use crate::dispatch::{
    CompletionProvider, CompletionRequest, CompletionResponse, CompletionStream, TokenUsage,
};
use crate::error::ProviderError;

pub(crate) const MAX_RESPONSE_BYTES: usize = 2 * 1024 * 1024; // 2MB

pub const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const APP_NAME: &str = "ACCU";
const APP_URL: &str = "https://github.com/CreatmanCEO/accu";

pub(crate) fn build_client() -> Client {
    Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .pool_max_idle_per_host(4)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!("failed to build tuned HTTP client, using defaults: {e}");
            Client::new()
        })
}

/// Provider speaking the OpenAI chat-completions wire format.
/// Serves both the OpenRouter aggregator and OpenAI direct.
pub struct ChatCompletionsProvider {
    name: String,
    base_url: String,
    api_key: String,
    default_model: String,
    timeout: Duration,
    /// OpenRouter attribution headers.
    attribution: bool,
    catalog: Arc<ModelCatalog>,
    client: Client,
}

#[derive(Deserialize)]
struct ChatCompletion {
    id: Option<String>,
    model: Option<String>,
    choices: Vec<Choice>,
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    total_tokens: Option<u64>,
}

#[derive(Deserialize)]
struct ChunkFrame {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: ChunkDelta,
    finish_reason: Option<String>,
}

#[derive(Deserialize, Default)]
struct ChunkDelta {
    content: Option<String>,
}

impl ChatCompletionsProvider {
    pub fn openrouter(
        api_key: String,
        default_model: String,
        base_url: Option<String>,
        timeout: Duration,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        Self {
            name: "openrouter".to_string(),
            base_url: base_url.unwrap_or_else(|| OPENROUTER_BASE_URL.to_string()),
            api_key,
            default_model,
            timeout,
            attribution: true,
            catalog,
            client: build_client(),
        }
    }

    pub fn openai(
        api_key: String,
        default_model: String,
        base_url: Option<String>,
        timeout: Duration,
        catalog: Arc<ModelCatalog>,
    ) -> Self {
        Self {
            name: "openai".to_string(),
            base_url: base_url.unwrap_or_else(|| OPENAI_BASE_URL.to_string()),
            api_key,
            default_model,
            timeout,
            attribution: false,
            catalog,
            client: build_client(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }

    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let builder = builder.header("Authorization", format!("Bearer {}", self.api_key));
        if self.attribution {
            builder
                .header("HTTP-Referer", APP_URL)
                .header("X-Title", APP_NAME)
        } else {
            builder
        }
    }

    fn body(&self, request: &CompletionRequest, model: &str, stream: bool) -> serde_json::Value {
        let messages: Vec<serde_json::Value> = request
            .messages()
            .iter()
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();
        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": request.max_tokens(),
            "temperature": request.temperature(),
            "stream": stream,
        });
        if !request.stop().is_empty() {
            body["stop"] = serde_json::json!(request.stop());
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
        request.validate(&self.name)?;
        let response = self
            .authorized(self.client.post(self.url("/chat/completions")))
            .header("Content-Type", "application/json")
            .timeout(self.timeout)
            .json(&self.body(request, model, stream))
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(&self.name, e, start.elapsed()))?;
        check_status(&self.name, response, start).await
    }
}

/// Classify a non-success HTTP status. Success responses pass through untouched.
pub(crate) async fn check_status(
    provider: &str,
    response: Response,
    start: Instant,
) -> Result<Response, ProviderError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    if status == StatusCode::TOO_MANY_REQUESTS {
        let retry_after_secs = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok());
        return Err(ProviderError::RateLimited {
            provider: provider.to_string(),
            retry_after_secs,
        });
    }

    // Only the first MAX_RESPONSE_BYTES of an error body reach the message
    let error_bytes = response.bytes().await.unwrap_or_default();
    let truncated = &error_bytes[..error_bytes.len().min(MAX_RESPONSE_BYTES)];
    let text = String::from_utf8_lossy(truncated);
    let message = format!("{status}: {text}");

    match status {
        StatusCode::BAD_REQUEST
        | StatusCode::NOT_FOUND
        | StatusCode::PAYLOAD_TOO_LARGE
        | StatusCode::UNPROCESSABLE_ENTITY => Err(ProviderError::InvalidRequest {
            provider: provider.to_string(),
            message,
        }),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => Err(ProviderError::Timeout {
            provider: provider.to_string(),
            elapsed_ms: start.elapsed().as_millis() as u64,
        }),
        _ => Err(ProviderError::Unavailable {
            provider: provider.to_string(),
            message,
            status: Some(status.as_u16()),
        }),
    }
}

/// Read a success body with the size cap enforced before parsing.
pub(crate) async fn read_capped(
    provider: &str,
    response: Response,
    start: Instant,
) -> Result<Vec<u8>, ProviderError> {
    let bytes = response
        .bytes()
        .await
        .map_err(|e| ProviderError::from_reqwest(provider, e, start.elapsed()))?;

    if bytes.len() > MAX_RESPONSE_BYTES {
        return Err(ProviderError::Unavailable {
            provider: provider.to_string(),
            message: format!(
                "response too large: {} bytes (max {})",
                bytes.len(),
                MAX_RESPONSE_BYTES
            ),
            status: None,
        });
    }
    Ok(bytes.to_vec())
}

/// Reconcile upstream token counts; the total is always recomputed.
pub(crate) fn usage_from_wire(
    provider: &str,
    prompt: u64,
    completion: u64,
    reported_total: Option<u64>,
) -> TokenUsage {
    let usage = TokenUsage::new(prompt, completion);
    if reported_total.is_some_and(|total| total != usage.total_tokens()) {
        tracing::warn!(
            provider,
            reported = reported_total,
            computed = usage.total_tokens(),
            "upstream total_tokens disagrees with prompt + completion, using computed total"
        );
    }
    usage
}

fn parse_chunk(_event: &str, data: &str) -> Result<SseStep, String> {
    let frame: ChunkFrame =
        serde_json::from_str(data).map_err(|e| format!("malformed stream chunk: {e}"))?;
    let Some(choice) = frame.choices.into_iter().next() else {
        return Ok(SseStep::Skip);
    };
    match (choice.delta.content, choice.finish_reason) {
        (Some(text), _) if !text.is_empty() => Ok(SseStep::Text(text)),
        (_, Some(_)) => Ok(SseStep::Stop),
        _ => Ok(SseStep::Skip),
    }
}

#[async_trait]
impl CompletionProvider for ChatCompletionsProvider {
    fn name(&self) -> &str {
        &self.name
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
        let bytes = read_capped(&self.name, response, start).await?;

        let completion: ChatCompletion =
            serde_json::from_slice(&bytes).map_err(|e| ProviderError::Unavailable {
                provider: self.name.clone(),
                message: format!("failed to parse response: {e}"),
                status: None,
            })?;

        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| ProviderError::Unavailable {
                provider: self.name.clone(),
                message: "empty choices or null content".to_string(),
                status: None,
            })?;

        let usage = completion
            .usage
            .map(|u| usage_from_wire(&self.name, u.prompt_tokens, u.completion_tokens, u.total_tokens))
            .unwrap_or_default();

        // Price against the model we asked for; OpenRouter echoes dated ids that miss the catalog.
        let resolved = if self.catalog.price(&model).is_some() {
            model
        } else {
            completion.model.unwrap_or(model)
        };
        let cost = self.catalog.cost_for(&resolved, &usage);

        Ok(CompletionResponse {
            content,
            model: resolved,
            usage,
            cost,
            latency_ms: start.elapsed().as_millis() as u64,
            provider: self.name.clone(),
            request_id: completion.id,
        })
    }

    async fn complete_stream(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionStream, ProviderError> {
        let start = Instant::now();
        let model = self.resolve_model(request);
        let response = self.send(request, &model, true, start).await?;
        Ok(sse::fragment_stream(response, &self.name, &model, parse_chunk))
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
                tracing::debug!(provider = %self.name, "health check failed: {e}");
                false
            }
        }
    }
}
