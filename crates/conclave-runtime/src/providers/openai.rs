//! OpenAI chat completions provider.
//!
//! The same client serves local OpenAI-compatible servers (Ollama, vLLM,
//! llama.cpp): construct it with [`ProviderId::Local`] and a `base_url`.
//! Local servers usually need no key, so a missing credential is only an
//! error for the hosted API.

use async_trait::async_trait;
use conclave_core::{ProviderId, TokenUsage};
use serde::{Deserialize, Serialize};

use super::secrets::ApiCredential;
use super::{
    retry_after, transport_error, CompletionRequest, CompletionResponse, LlmProvider,
    ProviderError,
};
use crate::config::ProviderSettings;

const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const LOCAL_BASE_URL: &str = "http://localhost:11434/v1";
const OPENAI_MODEL: &str = "gpt-4o";
const LOCAL_MODEL: &str = "llama3.1";

/// OpenAI-compatible chat completions provider.
pub struct OpenAiProvider {
    id: ProviderId,
    credential: Option<ApiCredential>,
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for OpenAiProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiProvider")
            .field("id", &self.id)
            .field("credential", &self.credential)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl OpenAiProvider {
    /// Hosted OpenAI with the default model.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            id: ProviderId::OpenAi,
            credential: Some(ApiCredential::direct(ProviderId::OpenAi, api_key)),
            base_url: OPENAI_BASE_URL.to_string(),
            model: OPENAI_MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Local OpenAI-compatible server, no key.
    pub fn local(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            id: ProviderId::Local,
            credential: None,
            base_url: base_url.into(),
            model: model.into(),
            client: reqwest::Client::new(),
        }
    }

    /// Create from settings for either [`ProviderId::OpenAi`] or [`ProviderId::Local`].
    pub fn from_settings(id: ProviderId, settings: &ProviderSettings) -> Result<Self, ProviderError> {
        let (credential, default_url, default_model) = match id {
            ProviderId::Local => (
                ApiCredential::resolve(id, settings),
                LOCAL_BASE_URL,
                LOCAL_MODEL,
            ),
            _ => (
                Some(ApiCredential::require(id, settings)?),
                OPENAI_BASE_URL,
                OPENAI_MODEL,
            ),
        };

        Ok(Self {
            id,
            credential,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| default_url.to_string()),
            model: settings
                .model
                .clone()
                .unwrap_or_else(|| default_model.to_string()),
            client: reqwest::Client::new(),
        })
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

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    #[serde(default)]
    model: Option<String>,
    usage: Option<ChatUsage>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .timeout(request.timeout)
            .json(&body);
        if let Some(credential) = &self.credential {
            builder = builder.bearer_auth(credential.expose());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| transport_error(e, request.timeout))?;

        let status = response.status();
        if status.as_u16() == 429 {
            return Err(ProviderError::RateLimited {
                retry_after: retry_after(&response),
            });
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), message));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let choice = body
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ParseError("response has no choices".into()))?;

        let usage = body
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default();

        Ok(CompletionResponse {
            content: choice.message.content.unwrap_or_default(),
            usage,
            model: body.model.unwrap_or_else(|| self.model.clone()),
            finish_reason: choice.finish_reason,
            quality: None,
            confidence: None,
        })
    }

    async fn health_check(&self) -> bool {
        match (&self.credential, self.id) {
            (Some(credential), _) => !credential.is_empty(),
            (None, ProviderId::Local) => true,
            (None, _) => false,
        }
    }
}
