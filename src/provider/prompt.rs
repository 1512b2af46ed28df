//! Prompt rendering for chat-style model providers

use super::{ProviderRequest, SKIP_SENTINEL};
use crate::text_type::TextType;

/// System instructions for a request
///
/// Framing differs for our own interface and for game text; the amount of
/// guidance grows with the text type. The reply protocol is the same.
pub fn system_prompt(request: &ProviderRequest) -> String {
    let mut lines = Vec::new();

    let source = request
        .source_language
        .as_deref()
        .map(|l| format!("from {} ", l))
        .unwrap_or_default();
    if request.own_ui {
        lines.push(format!(
            "You translate the interface of a game translation tool {}into {}.",
            source, request.target_language
        ));
    } else {
        lines.push(format!(
            "You translate text from a video game {}into {}.",
            source, request.target_language
        ));
    }

    if !request.domain_context.trim().is_empty() {
        lines.push(format!("Game context: {}.", request.domain_context.trim()));
    }

    lines.push(
        "Reply with the translation only: no quotes, no explanations, no notes.".to_string(),
    );
    lines.push(
        "Tokens like [v0], [v1] stand for numbers. Copy every token unchanged; you may move them."
            .to_string(),
    );
    if let Some(source) = request.source_language.as_deref() {
        lines.push(format!(
            "If the text is not written in {}, reply with exactly {}.",
            source, SKIP_SENTINEL
        ));
    } else {
        lines.push(format!(
            "If the text is already written in {}, reply with exactly {}.",
            request.target_language, SKIP_SENTINEL
        ));
    }

    match request.text_type {
        TextType::SingleWord => {
            lines.push("The text is a single word or short label; keep it short.".to_string());
        }
        TextType::Phrase => {
            lines.push("The text is a short phrase from the game's interface or dialogue.".to_string());
        }
        TextType::Paragraph => {
            lines.push(
                "The text spans several lines. Keep the same line breaks, translate every line, \
                 and preserve any markup tags such as <color> or <b> exactly."
                    .to_string(),
            );
            lines.push("Keep the tone and register of the original.".to_string());
        }
    }

    lines.join("\n")
}

/// User message carrying the text itself
pub fn user_prompt(request: &ProviderRequest) -> String {
    request.text.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_framing() {
        let request = ProviderRequest::new("Start", "fr").with_domain_context("space shooter");
        let prompt = system_prompt(&request);
        assert!(prompt.contains("video game"));
        assert!(prompt.contains("into fr"));
        assert!(prompt.contains("space shooter"));
        assert!(prompt.contains(SKIP_SENTINEL));
        assert!(prompt.contains("single word"));
    }

    #[test]
    fn test_own_ui_framing() {
        let request = ProviderRequest::new("Settings", "de").with_own_ui(true);
        assert!(system_prompt(&request).contains("translation tool"));
    }

    #[test]
    fn test_paragraph_gets_more_guidance() {
        let short = system_prompt(&ProviderRequest::new("Start", "fr"));
        let long = system_prompt(&ProviderRequest::new("Line one\nLine two", "fr"));
        assert!(long.len() > short.len());
        assert!(long.contains("line breaks"));
    }

    #[test]
    fn test_source_language_drives_skip_instruction() {
        let request = ProviderRequest::new("Start", "fr").with_source_language(Some("en".to_string()));
        let prompt = system_prompt(&request);
        assert!(prompt.contains("from en into fr"));
        assert!(prompt.contains("not written in en"));
    }
}
