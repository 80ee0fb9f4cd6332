use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Proxy, RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::database::provider::Provider;
use crate::schema::enum_def::ProviderType;
use crate::utils::sse::SseParser;
use cyder_tools::log::{debug, error, warn};

/// Sent when a provider has no credential; self-hosted servers ignore it.
pub const PLACEHOLDER_API_KEY: &str = "not-needed";

const RETRY_BACKOFF_MS: u64 = 200;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
    #[error("backend returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode backend response: {0}")]
    Decode(String),
    #[error("backend returned no completion choices")]
    EmptyResponse,
}

impl ClientError {
    fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { .. } => true,
            ClientError::Status { status, .. } => {
                *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
            }
            _ => false,
        }
    }
}

/// Adds the `/v1` API prefix for self-hosted and generic OpenAI-compatible
/// servers when it is missing. Hosted endpoints are used as written.
pub fn normalize_base_url(provider_type: &ProviderType, base_url: &str) -> String {
    let trimmed = base_url.trim_end_matches('/');
    match provider_type {
        ProviderType::Vllm | ProviderType::OpenaiCompatible => {
            if trimmed.ends_with("/v1") {
                trimmed.to_string()
            } else {
                format!("{}/v1", trimmed)
            }
        }
        ProviderType::Openai => trimmed.to_string(),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        ChatMessage { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        ChatMessage { role: "user".to_string(), content: content.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ChatCompletion {
    pub content: String,
    pub model: Option<String>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StreamSummary {
    pub chunk_count: usize,
    pub content: String,
    pub first_chunk_ms: Option<u64>,
    pub total_ms: u64,
}

/// One configured completion backend speaking the OpenAI chat wire format.
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn list_models(&self) -> Result<Vec<String>, ClientError>;
    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatCompletion, ClientError>;
    async fn chat_completion_stream(&self, request: &ChatRequest) -> Result<StreamSummary, ClientError>;
}

pub trait ClientFactory: Send + Sync {
    /// Never fails: a missing credential or a bad proxy setting degrades
    /// to a working client rather than an error.
    fn build_client(&self, provider: &Provider) -> Arc<dyn CompletionClient>;
}

#[derive(Debug, Clone, Default)]
pub struct HttpClientFactory {
    proxy: Option<String>,
}

impl HttpClientFactory {
    pub fn new(proxy: Option<String>) -> Self {
        HttpClientFactory { proxy }
    }

    fn build_reqwest_client(&self, provider: &Provider) -> reqwest::Client {
        let mut builder = reqwest::Client::builder()
            .timeout(Duration::from_millis(provider.timeout_ms.max(1) as u64));
        if provider.use_proxy {
            if let Some(proxy_url) = &self.proxy {
                match Proxy::https(proxy_url) {
                    Ok(proxy) => builder = builder.proxy(proxy),
                    Err(e) => error!("Invalid proxy URL '{}': {}", proxy_url, e),
                }
            }
        }
        builder.build().unwrap_or_else(|e| {
            warn!(
                "Failed to build HTTP client for provider {}: {}. Falling back to defaults.",
                provider.name, e
            );
            reqwest::Client::new()
        })
    }
}

impl ClientFactory for HttpClientFactory {
    fn build_client(&self, provider: &Provider) -> Arc<dyn CompletionClient> {
        let api_key = provider
            .api_key
            .as_deref()
            .filter(|k| !k.trim().is_empty())
            .unwrap_or(PLACEHOLDER_API_KEY)
            .to_string();
        Arc::new(OpenAiCompatClient {
            http: self.build_reqwest_client(provider),
            base_url: normalize_base_url(&provider.provider_type, &provider.base_url),
            api_key,
            max_retries: provider.max_retries.max(0) as u32,
        })
    }
}

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    max_retries: u32,
}

impl OpenAiCompatClient {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn send_with_retry<F>(&self, url: &str, build: F) -> Result<reqwest::Response, ClientError>
    where
        F: Fn() -> RequestBuilder + Send + Sync,
    {
        let mut attempt = 0u32;
        loop {
            let result = match build().bearer_auth(&self.api_key).send().await {
                Ok(response) if response.status().is_success() => return Ok(response),
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Could not retrieve error body".to_string());
                    ClientError::Status { status, body }
                }
                Err(e) => ClientError::Transport { url: url.to_string(), message: e.to_string() },
            };

            if attempt >= self.max_retries || !result.is_retryable() {
                return Err(result);
            }
            attempt += 1;
            warn!("Retrying {} (attempt {}/{}): {}", url, attempt, self.max_retries, result);
            tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64)).await;
        }
    }
}

fn parse_completion(body: &Value) -> Result<ChatCompletion, ClientError> {
    let choice = body
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .ok_or(ClientError::EmptyResponse)?;
    let content = choice
        .pointer("/message/content")
        .or_else(|| choice.get("text"))
        .and_then(|c| c.as_str())
        .unwrap_or_default()
        .to_string();
    let usage = body
        .get("usage")
        .filter(|u| !u.is_null())
        .map(|u| serde_json::from_value::<Usage>(u.clone()))
        .transpose()
        .map_err(|e| ClientError::Decode(e.to_string()))?;
    Ok(ChatCompletion {
        content,
        model: body.get("model").and_then(|m| m.as_str()).map(str::to_string),
        usage,
    })
}

fn delta_text(data: &str) -> Option<String> {
    let chunk: Value = serde_json::from_str(data).ok()?;
    let choice = chunk.get("choices")?.as_array()?.first()?;
    choice
        .pointer("/delta/content")
        .or_else(|| choice.get("text"))
        .and_then(|c| c.as_str())
        .map(str::to_string)
}

#[async_trait]
impl CompletionClient for OpenAiCompatClient {
    async fn list_models(&self) -> Result<Vec<String>, ClientError> {
        let url = format!("{}/models", self.base_url);
        let response = self.send_with_retry(&url, || self.http.get(&url)).await?;
        let body: Value = response.json().await.map_err(|e| ClientError::Decode(e.to_string()))?;
        let ids = body
            .get("data")
            .and_then(|d| d.as_array())
            .ok_or_else(|| ClientError::Decode("missing `data` array in model list".to_string()))?
            .iter()
            .filter_map(|m| m.get("id").and_then(|id| id.as_str()).map(str::to_string))
            .collect();
        Ok(ids)
    }

    async fn chat_completion(&self, request: &ChatRequest) -> Result<ChatCompletion, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = request.clone();
        body.stream = false;
        debug!("chat completion -> {} (model {})", url, body.model);

        let response = self
            .send_with_retry(&url, || self.http.post(&url).json(&body))
            .await?;
        let value: Value = response.json().await.map_err(|e| ClientError::Decode(e.to_string()))?;
        parse_completion(&value)
    }

    async fn chat_completion_stream(&self, request: &ChatRequest) -> Result<StreamSummary, ClientError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut body = request.clone();
        body.stream = true;

        let started = Instant::now();
        let response = self
            .send_with_retry(&url, || self.http.post(&url).json(&body))
            .await?;

        let mut parser = SseParser::new();
        let mut summary = StreamSummary::default();
        let mut stream = response.bytes_stream();
        let mut frames = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| ClientError::Transport {
                url: url.clone(),
                message: e.to_string(),
            })?;
            frames.extend(parser.feed(&chunk));
            for frame in frames.drain(..) {
                if frame.is_done() {
                    continue;
                }
                if let Some(text) = delta_text(&frame.data) {
                    if summary.first_chunk_ms.is_none() {
                        summary.first_chunk_ms = Some(started.elapsed().as_millis() as u64);
                    }
                    summary.chunk_count += 1;
                    summary.content.push_str(&text);
                }
            }
        }
        if let Some(frame) = parser.finish() {
            if let Some(text) = delta_text(&frame.data) {
                summary.chunk_count += 1;
                summary.content.push_str(&text);
            }
        }
        summary.total_ms = started.elapsed().as_millis() as u64;
        Ok(summary)
    }
}

#[cfg(test)]
pub(crate) mod test_backend {
    use axum::{
        extract::State,
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
        Json, Router,
    };
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// Canned OpenAI-style backend on an ephemeral port.
    pub struct FakeBackend {
        pub base_url: String,
        pub chat_calls: Arc<AtomicUsize>,
    }

    #[derive(Clone)]
    struct BackendState {
        reply: String,
        fail_first: usize,
        chat_calls: Arc<AtomicUsize>,
    }

    async fn models() -> Json<Value> {
        Json(json!({ "object": "list", "data": [{ "id": "sqlcoder-7b" }, { "id": "llama-3" }] }))
    }

    async fn chat(State(state): State<BackendState>, Json(body): Json<Value>) -> Response {
        let n = state.chat_calls.fetch_add(1, Ordering::SeqCst);
        if n < state.fail_first {
            return (StatusCode::SERVICE_UNAVAILABLE, "warming up").into_response();
        }
        if body.get("stream").and_then(|s| s.as_bool()).unwrap_or(false) {
            let mut sse = String::new();
            for word in state.reply.split_inclusive(' ') {
                let chunk = json!({ "choices": [{ "delta": { "content": word } }] });
                sse.push_str(&format!("data: {}\n\n", chunk));
            }
            sse.push_str("data: [DONE]\n\n");
            return ([("content-type", "text/event-stream")], sse).into_response();
        }
        Json(json!({
            "model": body.get("model").cloned().unwrap_or(Value::Null),
            "choices": [{ "message": { "role": "assistant", "content": state.reply } }],
            "usage": { "prompt_tokens": 12, "completion_tokens": 8, "total_tokens": 20 }
        }))
        .into_response()
    }

    pub async fn spawn(reply: &str, fail_first: usize) -> FakeBackend {
        let chat_calls = Arc::new(AtomicUsize::new(0));
        let state = BackendState {
            reply: reply.to_string(),
            fail_first,
            chat_calls: chat_calls.clone(),
        };
        let app = Router::new()
            .route("/v1/models", get(models))
            .route("/v1/chat/completions", post(chat))
            .with_state(state);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        FakeBackend { base_url: format!("http://{}", addr), chat_calls }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    fn provider(base_url: &str, max_retries: i32) -> Provider {
        Provider {
            id: 1,
            name: "local".into(),
            provider_type: ProviderType::Vllm,
            base_url: base_url.into(),
            timeout_ms: 5_000,
            max_retries,
            is_active: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_normalize_base_url() {
        assert_eq!(normalize_base_url(&ProviderType::Vllm, "http://gpu:8000"), "http://gpu:8000/v1");
        assert_eq!(normalize_base_url(&ProviderType::OpenaiCompatible, "http://x/v1/"), "http://x/v1");
        assert_eq!(
            normalize_base_url(&ProviderType::Openai, "https://api.example.com/openai/"),
            "https://api.example.com/openai"
        );
    }

    #[test]
    fn test_retry_classification() {
        assert!(ClientError::Status { status: 429, body: String::new() }.is_retryable());
        assert!(ClientError::Status { status: 502, body: String::new() }.is_retryable());
        assert!(!ClientError::Status { status: 401, body: String::new() }.is_retryable());
        assert!(!ClientError::EmptyResponse.is_retryable());
    }

    #[test]
    fn test_parse_completion_without_usage() {
        let body = serde_json::json!({ "choices": [{ "message": { "content": "SELECT 1;" } }] });
        let completion = parse_completion(&body).unwrap();
        assert_eq!(completion.content, "SELECT 1;");
        assert!(completion.usage.is_none());
        assert!(matches!(
            parse_completion(&serde_json::json!({ "choices": [] })),
            Err(ClientError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn test_chat_completion_against_live_backend() {
        let backend = test_backend::spawn("SELECT 1;", 0).await;
        let client = HttpClientFactory::default().build_client(&provider(&backend.base_url, 0));

        let models = client.list_models().await.unwrap();
        assert_eq!(models, vec!["sqlcoder-7b", "llama-3"]);

        let request = ChatRequest {
            model: "sqlcoder-7b".into(),
            messages: vec![ChatMessage::user("ping")],
            ..Default::default()
        };
        let completion = client.chat_completion(&request).await.unwrap();
        assert_eq!(completion.content, "SELECT 1;");
        assert_eq!(completion.usage.unwrap().completion_tokens, 8);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried_within_budget() {
        let backend = test_backend::spawn("ok", 2).await;
        let request = ChatRequest { model: "m".into(), messages: vec![ChatMessage::user("x")], ..Default::default() };

        let strict = HttpClientFactory::default().build_client(&provider(&backend.base_url, 1));
        let err = strict.chat_completion(&request).await.unwrap_err();
        assert!(matches!(err, ClientError::Status { status: 503, .. }));
        assert_eq!(backend.chat_calls.load(Ordering::SeqCst), 2);

        let patient = HttpClientFactory::default().build_client(&provider(&backend.base_url, 2));
        assert_eq!(patient.chat_completion(&request).await.unwrap().content, "ok");
    }

    #[tokio::test]
    async fn test_streaming_summary() {
        let backend = test_backend::spawn("one two three", 0).await;
        let client = HttpClientFactory::default().build_client(&provider(&backend.base_url, 0));
        let request = ChatRequest { model: "m".into(), messages: vec![ChatMessage::user("count")], ..Default::default() };

        let summary = client.chat_completion_stream(&request).await.unwrap();
        assert_eq!(summary.chunk_count, 3);
        assert_eq!(summary.content, "one two three");
        assert!(summary.first_chunk_ms.is_some());
    }
}
