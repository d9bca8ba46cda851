//! Client for OpenAI-compatible `/chat/completions` endpoints.
//!
//! Works against OpenAI itself and any service that mirrors its chat API
//! (Groq, OpenRouter, vLLM, LM Studio, ...).
//!
//! # Example
//!
//! ```rust,ignore
//! use llm::remote::OpenAiCompatibleClient;
//! use llm::config::RemoteLlmConfig;
//! use pipeline_core::{GenerationRequest, TextGenerator};
//!
//! let config = RemoteLlmConfig::from_env(
//!     "GROQ_API_KEY",
//!     "https://api.groq.com/openai/v1",
//!     "llama-3.1-8b-instant",
//! )?;
//! let client = OpenAiCompatibleClient::new(config)?;
//!
//! let result = client
//!     .generate(GenerationRequest::prompt("What is the capital of Italy?"))
//!     .await?;
//! ```

use crate::config::RemoteLlmConfig;
use crate::error::{LlmError, Result};
use async_trait::async_trait;
use pipeline_core::{
    GenerationError, GenerationRequest, GenerationResult, Message, TextGenerator, UsageMetadata,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// OpenAI-compatible chat completions client.
#[derive(Clone)]
pub struct OpenAiCompatibleClient {
    config: RemoteLlmConfig,
    client: Client,
    name: String,
}

impl OpenAiCompatibleClient {
    /// Create a client.
    ///
    /// # Errors
    ///
    /// [`LlmError::HttpError`] if the HTTP client cannot be initialized.
    pub fn new(config: RemoteLlmConfig) -> Result<Self> {
        let client = Client::builder().build()?;
        let name = format!("openai-compatible:{}", config.model);
        Ok(Self {
            config,
            client,
            name,
        })
    }

    /// Override the name reported in logs.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn config(&self) -> &RemoteLlmConfig {
        &self.config
    }

    fn convert_message(msg: &Message) -> OpenAiMessage {
        OpenAiMessage {
            role: msg.role.as_str().to_string(),
            content: Some(msg.text().to_string()),
            name: msg.name.clone(),
        }
    }

    fn build_body(&self, request: &GenerationRequest) -> OpenAiRequest {
        OpenAiRequest {
            model: request
                .options
                .model
                .clone()
                .unwrap_or_else(|| self.config.model.clone()),
            messages: request.messages.iter().map(Self::convert_message).collect(),
            temperature: request.options.temperature,
            max_tokens: request.options.max_tokens,
            stream: false,
        }
    }

    fn convert_response(resp: OpenAiResponse) -> Result<GenerationResult> {
        let choice = resp
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| LlmError::InvalidResponse("response has no choices".to_string()))?;

        let text = choice.message.content.unwrap_or_default();
        let mut result = GenerationResult::new(text, resp.model);
        if let Some(usage) = resp.usage {
            result = result.with_usage(UsageMetadata::new(
                usage.prompt_tokens,
                usage.completion_tokens,
            ));
        }
        if let Some(reason) = choice.finish_reason {
            result = result.with_metadata("finish_reason", reason);
        }
        Ok(result)
    }

    async fn chat(&self, request: GenerationRequest) -> Result<GenerationResult> {
        let url = format!("{}/chat/completions", self.config.base_url);
        let body = self.build_body(&request);
        let timeout = request.options.timeout.unwrap_or(self.config.timeout);

        debug!(
            provider = %self.name,
            model = %body.model,
            messages = body.messages.len(),
            "Sending chat completion request"
        );

        let mut req = self
            .client
            .post(&url)
            .timeout(timeout)
            .bearer_auth(&self.config.api_key)
            .json(&body);

        if let Some(org) = &self.config.organization {
            req = req.header("OpenAI-Organization", org);
        }

        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(LlmError::from_status("OpenAI", status, error_text));
        }

        let openai_resp: OpenAiResponse = response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))?;

        Self::convert_response(openai_resp)
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleClient {
    async fn generate(
        &self,
        request: GenerationRequest,
    ) -> std::result::Result<GenerationResult, GenerationError> {
        self.chat(request).await.map_err(GenerationError::from)
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// OpenAI API types
#[derive(Debug, Serialize)]
struct OpenAiRequest {
    model: String,
    messages: Vec<OpenAiMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<usize>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct OpenAiMessage {
    role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiResponse {
    model: String,
    choices: Vec<OpenAiChoice>,
    usage: Option<OpenAiUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAiUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pipeline_core::GenerationOptions;
    use std::time::Duration;

    fn client() -> OpenAiCompatibleClient {
        let config = RemoteLlmConfig::new("test-key", "https://api.openai.com/v1", "gpt-4o-mini");
        OpenAiCompatibleClient::new(config).unwrap()
    }

    #[test]
    fn test_client_name() {
        let client = client();
        assert_eq!(client.name(), "openai-compatible:gpt-4o-mini");
        assert_eq!(client.with_name("groq").name(), "groq");
    }

    #[test]
    fn test_message_conversion_all_roles() {
        let system = OpenAiCompatibleClient::convert_message(&Message::system("You are helpful"));
        assert_eq!(system.role, "system");
        assert_eq!(system.content.as_deref(), Some("You are helpful"));

        let user = OpenAiCompatibleClient::convert_message(&Message::human("Hello"));
        assert_eq!(user.role, "user");

        let assistant = OpenAiCompatibleClient::convert_message(&Message::assistant("Hi there!"));
        assert_eq!(assistant.role, "assistant");
    }

    #[test]
    fn test_request_body_uses_options() {
        let client = client();
        let request = GenerationRequest::prompt("Hello").with_options(
            GenerationOptions::new()
                .with_model("gpt-4o")
                .with_temperature(0.2)
                .with_max_tokens(64)
                .with_timeout(Duration::from_secs(5)),
        );

        let body = serde_json::to_value(client.build_body(&request)).unwrap();
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["max_tokens"], 64);
        assert_eq!(body["stream"], false);
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "Hello");
    }

    #[test]
    fn test_request_body_defaults_to_configured_model() {
        let body = client().build_body(&GenerationRequest::prompt("Hello"));
        let json = serde_json::to_value(body).unwrap();
        assert_eq!(json["model"], "gpt-4o-mini");
        assert!(json.get("temperature").is_none());
    }

    #[test]
    fn test_response_conversion() {
        let raw = r#"{
            "id": "chatcmpl-123",
            "object": "chat.completion",
            "created": 1677652288,
            "model": "gpt-4o-mini-2024-07-18",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Rome."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 12, "completion_tokens": 2, "total_tokens": 14}
        }"#;
        let resp: OpenAiResponse = serde_json::from_str(raw).unwrap();
        let result = OpenAiCompatibleClient::convert_response(resp).unwrap();

        assert_eq!(result.text(), "Rome.");
        assert_eq!(result.model(), "gpt-4o-mini-2024-07-18");
        assert_eq!(result.usage().map(|u| u.total_tokens), Some(14));
        assert_eq!(
            result.metadata_value("finish_reason"),
            Some(&serde_json::Value::from("stop"))
        );
    }

    #[test]
    fn test_response_without_choices_is_malformed() {
        let resp: OpenAiResponse =
            serde_json::from_str(r#"{"model": "gpt-4o-mini", "choices": []}"#).unwrap();
        let err = OpenAiCompatibleClient::convert_response(resp).unwrap_err();
        assert!(matches!(
            GenerationError::from(err),
            GenerationError::MalformedResponse(_)
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_retryable() {
        let config = RemoteLlmConfig::new("test-key", "http://127.0.0.1:9", "gpt-4o-mini")
            .with_timeout(Duration::from_secs(2));
        let client = OpenAiCompatibleClient::new(config).unwrap();

        let err = client
            .generate(GenerationRequest::prompt("Hello"))
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }
}
