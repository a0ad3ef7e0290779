//! Mock / lower-cost endpoint provider.
//!
//! Speaks a minimal contract:
//!
//! ```text
//! POST {base}/v1/chat/completions
//! {"builder": "<role>", "topic": "<problem>", "prompt": "<prompt>"}
//! -> {"response": "<text>", "quality": 7.2, "confidence": 0.8}
//! ```
//!
//! The endpoint scores its own output, so the reported quality and
//! confidence are carried through on the response.

use async_trait::async_trait;
use conclave_core::ProviderId;
use serde::{Deserialize, Serialize};

use super::{
    retry_after, transport_error, CompletionRequest, CompletionResponse, LlmProvider,
    ProviderError,
};
use crate::config::ProviderSettings;

const DEFAULT_BASE_URL: &str = "http://localhost:8080";
const MODEL: &str = "mock-endpoint";

/// Client for the mock endpoint.
#[derive(Debug)]
pub struct MockEndpointProvider {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl MockEndpointProvider {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            model: MODEL.to_string(),
            client: reqwest::Client::new(),
        }
    }

    pub fn from_settings(settings: &ProviderSettings) -> Self {
        let mut provider =
            Self::new(settings.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string()));
        if let Some(model) = &settings.model {
            provider.model = model.clone();
        }
        provider
    }
}

#[derive(Debug, Serialize)]
struct MockRequest<'a> {
    builder: &'a str,
    topic: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Deserialize)]
struct MockResponse {
    response: String,
    #[serde(default)]
    quality: Option<f64>,
    #[serde(default)]
    confidence: Option<f64>,
}

#[async_trait]
impl LlmProvider for MockEndpointProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Mock
    }

    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let body = MockRequest {
            builder: request.role.as_str(),
            topic: &request.topic,
            prompt: &request.prompt,
        };

        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .timeout(request.timeout)
            .json(&body)
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

        let body: MockResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))?;

        let mut completion = CompletionResponse::text(body.response, self.model.clone());
        completion.finish_reason = Some("stop".to_string());
        completion.quality = body.quality;
        completion.confidence = body.confidence;
        Ok(completion)
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conclave_core::RoleId;
    use std::time::Duration;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn request() -> CompletionRequest {
        CompletionRequest {
            role: RoleId::Synthesizer,
            topic: "rate limiting".into(),
            system_prompt: String::new(),
            prompt: "Combine the proposals.".into(),
            temperature: 0.7,
            max_tokens: 256,
            timeout: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn test_contract_round_trip() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/chat/completions"))
            .and(body_json(serde_json::json!({
                "builder": "synthesizer",
                "topic": "rate limiting",
                "prompt": "Combine the proposals."
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "response": "Use a token bucket per tenant.",
                "quality": 7.5,
                "confidence": 0.8
            })))
            .mount(&server)
            .await;

        let provider = MockEndpointProvider::new(server.uri());
        let response = provider.complete(&request()).await.unwrap();
        assert_eq!(response.content, "Use a token bucket per tenant.");
        assert_eq!(response.quality, Some(7.5));
        assert_eq!(response.confidence, Some(0.8));
    }

    #[tokio::test]
    async fn test_429_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let provider = MockEndpointProvider::new(server.uri());
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::RateLimited { .. }));
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let provider = MockEndpointProvider::new(server.uri());
        let err = provider.complete(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::ParseError(_)));
    }
}
