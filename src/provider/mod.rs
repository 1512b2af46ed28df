//! External translation providers
//!
//! This module defines the `TranslationProvider` trait for provider abstraction,
//! so the dispatch pipeline can run against an HTTP model endpoint, a mock,
//! or anything else that turns a request into text.
//!
//! A provider receives text whose numbers were already replaced by
//! placeholder tokens (`[v0]`, `[v1]`, ...) and must hand those tokens back
//! verbatim. When the text is not in the source language it answers with
//! [`SKIP_SENTINEL`] instead of a translation.
//!
//! # Example
//!
//! ```ignore
//! use ludo_translate::provider::{ChatCompletionProvider, ProviderRequest, TranslationProvider};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = ChatCompletionProvider::from_env()?;
//!     let request = ProviderRequest::new("Level [v0] reached", "fr");
//!     let result = provider.translate(&request).await?;
//!     println!("{}", result); // "Niveau [v0] atteint"
//!     Ok(())
//! }
//! ```

pub mod chat;
pub mod mock;
pub mod prompt;

pub use chat::ChatCompletionProvider;
pub use mock::{MockMode, MockProvider};

use crate::error::{TranslateError, TranslateResult};
use crate::text_type::TextType;
use async_trait::async_trait;

/// Reply meaning "this text is not in the source language, leave it alone"
pub const SKIP_SENTINEL: &str = "[[SKIP]]";

/// Everything a provider needs to translate one text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderRequest {
    /// Normalized text with numeric placeholder tokens
    pub text: String,
    /// Source language code, `None` to let the provider detect it
    pub source_language: Option<String>,
    /// Target language code
    pub target_language: String,
    /// Short description of the game or setting
    pub domain_context: String,
    /// The text belongs to our own interface rather than the game's
    pub own_ui: bool,
    pub text_type: TextType,
}

impl ProviderRequest {
    /// Build a request with defaults derived from the text
    pub fn new(text: impl Into<String>, target_language: impl Into<String>) -> Self {
        let text = text.into();
        let text_type = TextType::classify(&text);
        Self {
            text,
            source_language: None,
            target_language: target_language.into(),
            domain_context: String::new(),
            own_ui: false,
            text_type,
        }
    }

    pub fn with_source_language(mut self, language: Option<String>) -> Self {
        self.source_language = language;
        self
    }

    pub fn with_domain_context(mut self, context: impl Into<String>) -> Self {
        self.domain_context = context.into();
        self
    }

    pub fn with_own_ui(mut self, own_ui: bool) -> Self {
        self.own_ui = own_ui;
        self
    }
}

/// Generic trait for translation providers
///
/// All methods are async to support I/O-bound operations like network requests.
#[async_trait]
pub trait TranslationProvider: Send + Sync {
    /// Translate a single request
    ///
    /// # Returns
    ///
    /// * `Ok(String)` - The raw provider output (translation or [`SKIP_SENTINEL`],
    ///   possibly wrapped in scaffolding the caller strips)
    /// * `Err(TranslateError)` - If the call failed
    async fn translate(&self, request: &ProviderRequest) -> TranslateResult<String>;

    /// Name used in logs
    fn provider_name(&self) -> &str;
}

/// Normalize a language code by stripping region information
///
/// - `en-US` → `en`
/// - `zh-Hans` → `zh`
/// - `FR` → `fr`
pub fn normalize_language(language: &str) -> String {
    language
        .split(['-', '_'])
        .next()
        .unwrap_or(language)
        .to_lowercase()
}

/// Validate that a language code is in acceptable format
///
/// Only ASCII alphanumerics, hyphens and underscores are accepted.
pub fn validate_language(language: &str) -> TranslateResult<()> {
    if language.is_empty() {
        return Err(TranslateError::Config(
            "Language code is empty".to_string(),
        ));
    }

    if !language
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(TranslateError::Config(format!(
            "Invalid characters in language code: {}",
            language
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_language_with_region() {
        assert_eq!(normalize_language("en-US"), "en");
        assert_eq!(normalize_language("pt_BR"), "pt");
        assert_eq!(normalize_language("zh-Hans"), "zh");
    }

    #[test]
    fn test_normalize_language_case_insensitive() {
        assert_eq!(normalize_language("EN"), "en");
        assert_eq!(normalize_language("fr"), "fr");
    }

    #[test]
    fn test_validate_language() {
        assert!(validate_language("en").is_ok());
        assert!(validate_language("zh-Hans").is_ok());
        assert!(validate_language("de_DE").is_ok());
        assert!(validate_language("").is_err());
        assert!(validate_language("en@US").is_err());
    }

    #[test]
    fn test_validate_language_error_message() {
        match validate_language("fr#bad") {
            Err(TranslateError::Config(msg)) => assert!(msg.contains("Invalid characters")),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn test_request_builder() {
        let request = ProviderRequest::new("Open the door", "de")
            .with_source_language(Some("en".to_string()))
            .with_domain_context("fantasy RPG")
            .with_own_ui(true);
        assert_eq!(request.text_type, TextType::Phrase);
        assert_eq!(request.source_language.as_deref(), Some("en"));
        assert_eq!(request.domain_context, "fantasy RPG");
        assert!(request.own_ui);
    }
}
