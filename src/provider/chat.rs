//! Chat-completions provider for machine translation
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint: hosted APIs
//! as well as local servers (llama.cpp, Ollama, LM Studio).
//!
//! # Authentication
//!
//! [`ChatCompletionProvider::from_env`] reads:
//!
//! - `LUDO_TRANSLATE_API_KEY` (required)
//! - `LUDO_TRANSLATE_API_URL` (optional, defaults to the OpenAI API)
//! - `LUDO_TRANSLATE_MODEL` (optional)
//!
//! Local servers usually need no key; build those with
//! [`ChatCompletionProvider::new`] and `api_key: None`.

use super::prompt::{system_prompt, user_prompt};
use super::{ProviderRequest, TranslationProvider, validate_language};
use crate::error::{TranslateError, TranslateResult};
use crate::settings::ProviderSettings;
use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// OpenAI-compatible chat-completions provider
#[derive(Clone)]
pub struct ChatCompletionProvider {
    /// Bearer token, `None` for servers without authentication
    api_key: Option<String>,
    /// HTTP client for async requests
    client: reqwest::Client,
    /// Base URL, without the `/chat/completions` suffix
    base_url: String,
    model: String,
}

impl ChatCompletionProvider {
    /// Sampling temperature; translation wants determinism over creativity
    const TEMPERATURE: f64 = 0.2;

    /// Create a provider for an explicit endpoint
    ///
    /// # Arguments
    ///
    /// * `api_key` - Bearer token, or `None`
    /// * `base_url` - Endpoint base, e.g. `http://localhost:11434/v1`
    /// * `model` - Model name sent with every request
    /// * `timeout` - Per-request timeout; expiry fails the request like any other error
    ///
    /// # Returns
    ///
    /// * `Ok(Self)` - New provider instance
    /// * `Err(TranslateError)` - Empty URL/model or HTTP client creation failure
    pub fn new(
        api_key: Option<String>,
        base_url: &str,
        model: &str,
        timeout: Duration,
    ) -> TranslateResult<Self> {
        if base_url.trim().is_empty() {
            return Err(TranslateError::Config("Base URL cannot be empty".to_string()));
        }
        if model.trim().is_empty() {
            return Err(TranslateError::Config("Model cannot be empty".to_string()));
        }
        let api_key = api_key.filter(|k| !k.trim().is_empty());

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TranslateError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            api_key,
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
        })
    }

    /// Create a provider from `LUDO_TRANSLATE_*` environment variables
    pub fn from_env() -> TranslateResult<Self> {
        let api_key = std::env::var("LUDO_TRANSLATE_API_KEY").map_err(|_| {
            TranslateError::Config("LUDO_TRANSLATE_API_KEY environment variable not set".to_string())
        })?;
        if api_key.trim().is_empty() {
            return Err(TranslateError::Config("API key cannot be empty".to_string()));
        }
        let base_url =
            std::env::var("LUDO_TRANSLATE_API_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());
        let model =
            std::env::var("LUDO_TRANSLATE_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());

        Self::new(Some(api_key), &base_url, &model, Duration::from_secs(60))
    }

    /// Create a provider from settings; the key still comes from the environment
    pub fn from_settings(settings: &ProviderSettings) -> TranslateResult<Self> {
        let api_key = std::env::var("LUDO_TRANSLATE_API_KEY").ok();
        let base_url = std::env::var("LUDO_TRANSLATE_API_URL")
            .unwrap_or_else(|_| settings.base_url.clone());
        let model =
            std::env::var("LUDO_TRANSLATE_MODEL").unwrap_or_else(|_| settings.model.clone());
        Self::new(
            api_key,
            &base_url,
            &model,
            Duration::from_secs(settings.timeout_secs),
        )
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn request_body(&self, request: &ProviderRequest) -> serde_json::Value {
        json!({
            "model": self.model,
            "temperature": Self::TEMPERATURE,
            "messages": [
                {"role": "system", "content": system_prompt(request)},
                {"role": "user", "content": user_prompt(request)}
            ]
        })
    }
}

impl std::fmt::Debug for ChatCompletionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionProvider")
            .field("api_key", &self.api_key.as_ref().map(|_| "***"))
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

#[async_trait]
impl TranslationProvider for ChatCompletionProvider {
    async fn translate(&self, request: &ProviderRequest) -> TranslateResult<String> {
        validate_language(&request.target_language)?;
        if let Some(source) = &request.source_language {
            validate_language(source)?;
        }

        if request.text.is_empty() {
            return Ok(String::new());
        }

        let mut builder = self.client.post(self.endpoint()).json(&self.request_body(request));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());

            return Err(if status.is_client_error() {
                TranslateError::Config(format!("API client error ({}): {}", status, error_text))
            } else {
                TranslateError::Provider(format!("API server error ({}): {}", status, error_text))
            });
        }

        let json: serde_json::Value = response.json().await.map_err(|e| {
            TranslateError::Provider(format!("Failed to parse API response: {}", e))
        })?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(|s| s.to_string())
            .ok_or_else(|| {
                TranslateError::Provider(
                    "Invalid API response: missing 'choices[0].message.content'".to_string(),
                )
            })
    }

    fn provider_name(&self) -> &str {
        "Chat Completions"
    }
}
