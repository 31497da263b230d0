//! HTTP client for the inference gateway.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::stream::{StreamEventStream, ingest};
use crate::wire::{ChatRequest, ChatResponse, ErrorBody, LoginRequest, ModelList};

/// Chat completions can run long; the gateway itself enforces nothing.
const CHAT_TIMEOUT: Duration = Duration::from_secs(180);
/// Model listing should answer immediately or not at all.
const MODELS_TIMEOUT: Duration = Duration::from_secs(5);

/// Client for a local OpenAI-compatible inference gateway.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    client: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    /// Create a client for the gateway at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            client: reqwest::Client::new(),
            base_url,
        }
    }

    /// Check a password against the gateway. `Ok(false)` means rejected,
    /// `Err` means the gateway could not be reached.
    pub async fn login(&self, password: &str) -> Result<bool> {
        let response = self
            .client
            .post(format!("{}/api/login", self.base_url))
            .json(&LoginRequest { password })
            .send()
            .await?;
        Ok(response.status().is_success())
    }

    /// List the model ids the gateway currently serves.
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(format!("{}/api/models", self.base_url))
            .timeout(MODELS_TIMEOUT)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        let list: ModelList = response.json().await?;
        Ok(list.data.into_iter().map(|m| m.id).collect())
    }

    /// Run a non-streaming chat completion, returning the answer text.
    pub async fn chat(&self, request: &ChatRequest) -> Result<String> {
        let response = self.post_chat(request).await?;
        let body: ChatResponse = response.json().await?;
        Ok(body
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .unwrap_or_default())
    }

    /// Run a streaming chat completion, returning the event stream.
    pub async fn chat_stream(&self, request: &ChatRequest) -> Result<StreamEventStream> {
        let response = self.post_chat(request).await?;
        Ok(Box::pin(ingest(response.bytes_stream())))
    }

    async fn post_chat(&self, request: &ChatRequest) -> Result<reqwest::Response> {
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            stream = request.stream,
            "sending chat request"
        );
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .timeout(CHAT_TIMEOUT)
            .json(request)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(error_from_response(response).await);
        }
        Ok(response)
    }
}

/// Turn a non-2xx response into an error, reading the standard
/// `{error, details?}` envelope when the body carries one.
async fn error_from_response(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    match serde_json::from_str::<ErrorBody>(&text) {
        Ok(body) => Error::gateway(status, body.error, body.details),
        Err(_) => Error::gateway(
            status,
            format!("HTTP {status}"),
            (!text.is_empty()).then_some(text),
        ),
    }
}
