//! Anthropic Messages API.
//!
//! One user turn per call: the role's system prompt goes into `system`, the
//! problem and earlier contributions into the user message. Text blocks of
//! the reply are concatenated.

use async_trait::async_trait;
use conclave_core::{ProviderId, TokenUsage};
use serde::{Deserialize, Serialize};

use super::secrets::ApiCredential;
use super::{
    retry_after, transport_error, CompletionRequest, CompletionResponse, LlmProvider,
    ProviderError,
};
use crate::config::ProviderSettings;

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const DEFAULT_MODEL: &str = "claude-sonnet-4-5-20250514";
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    credential: ApiCredential,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("credential", &self.credential)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_credential(ApiCredential::direct(ProviderId::Anthropic, api_key))
    }

    /// Build from provider settings; fails when no key can be resolved.
    pub fn from_settings(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let mut provider =
            Self::with_credential(ApiCredential::require(ProviderId::Anthropic, settings)?);
        if let Some(url) = &settings.base_url {
            provider.base_url = url.clone();
        }
        if let Some(model) = &settings.model {
            provider.model = model.clone();
        }
        Ok(provider)
    }

    fn with_credential(credential: ApiCredential) -> Self {
        Self {
            credential,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    system: &'a str,
    messages: [Turn<'a>; 1],
    max_tokens: u32,
    temperature: f32,
}

#[derive(Serialize)]
struct Turn<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesReply {
    model: String,
    content: Vec<Block>,
    stop_reason: Option<String>,
    usage: Usage,
}

#[derive(Deserialize)]
struct Block {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    input_tokens: u32,
    output_tokens: u32,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Turn a non-2xx reply into a provider error.
async fn status_error(response: reqwest::Response) -> ProviderError {
    let status = response.status();
    if status.as_u16() == 429 {
        return ProviderError::RateLimited {
            retry_after: retry_after(&response),
        };
    }
    let message = match response.json::<ErrorEnvelope>().await {
        Ok(envelope) => envelope.error.message,
        Err(_) => status.to_string(),
    };
    ProviderError::from_status(status.as_u16(), message)
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = MessagesRequest {
            model: &self.model,
            system: &request.system_prompt,
            messages: [Turn {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        };

        let response = self
            .client
            .post(format!("{}/messages", self.base_url))
            .header("x-api-key", self.credential.expose())
            .header("anthropic-version", API_VERSION)
            .timeout(request.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| transport_error(e, request.timeout))?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let reply: MessagesReply = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let content: String = reply.content.into_iter().filter_map(|b| b.text).collect();
        Ok(CompletionResponse::text(content, reply.model)
            .with_usage(TokenUsage::new(reply.usage.input_tokens, reply.usage.output_tokens))
            .with_finish_reason(reply.stop_reason))
    }

    async fn health_check(&self) -> bool {
        !self.credential.is_empty()
    }
}
