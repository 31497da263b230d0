//! Gateway abstraction so the orchestrator can run against a mock.

use async_trait::async_trait;
use charla_gateway::wire::ChatRequest;
use charla_gateway::{GatewayClient, StreamEventStream};

/// Operations the application needs from the inference gateway.
#[async_trait]
pub trait Gateway: Send + Sync {
    /// Non-streaming chat completion; returns the answer text.
    async fn chat(&self, request: &ChatRequest) -> charla_gateway::Result<String>;

    /// Streaming chat completion.
    async fn chat_stream(&self, request: &ChatRequest)
    -> charla_gateway::Result<StreamEventStream>;

    /// Available model ids.
    async fn list_models(&self) -> charla_gateway::Result<Vec<String>>;

    /// Password check. `Ok(false)` means rejected.
    async fn login(&self, password: &str) -> charla_gateway::Result<bool>;
}

#[async_trait]
impl Gateway for GatewayClient {
    async fn chat(&self, request: &ChatRequest) -> charla_gateway::Result<String> {
        GatewayClient::chat(self, request).await
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
    ) -> charla_gateway::Result<StreamEventStream> {
        GatewayClient::chat_stream(self, request).await
    }

    async fn list_models(&self) -> charla_gateway::Result<Vec<String>> {
        GatewayClient::list_models(self).await
    }

    async fn login(&self, password: &str) -> charla_gateway::Result<bool> {
        GatewayClient::login(self, password).await
    }
}
