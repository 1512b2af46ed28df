//! Stripping of provider scaffolding from raw responses
//!
//! Chat-style models like to wrap the answer: a reasoning block, a
//! "Here is the translation:" preamble, quotes around the result, a trailing
//! "Note:" paragraph. Only the translation itself should reach the store.
//!
//! Game texts are full of labels ("Result: Victory", "Output: 5 MW"), so a
//! bare label is only treated as a preamble when a line break or a quoted
//! answer follows it, and never when the source text has the same shape.

use regex::Regex;
use std::borrow::Cow;
use std::sync::LazyLock;

static REASONING_BLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(think|thinking|reasoning|analysis)>.*?</(think|thinking|reasoning|analysis)>")
        .expect("valid reasoning regex")
});

static ASSISTANT_PREAMBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*here(?:'s| is) (?:the |your |my )?translation(?: of [^:\n]*)?\s*:\s*")
        .expect("valid preamble regex")
});

static LABEL_PREAMBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(?:translation|translated text|output|result)\s*:[ \t]*(?:\r?\n\s*)?")
        .expect("valid label regex")
});

static TRAILER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)\n\s*(?:\(?\s*(?:note|explanation|notes)\s*:|\*\*note).*$")
        .expect("valid trailer regex")
});

const QUOTE_PAIRS: &[(char, char)] = &[
    ('"', '"'),
    ('\'', '\''),
    ('“', '”'),
    ('「', '」'),
    ('『', '』'),
    ('«', '»'),
    ('`', '`'),
];

/// Reduce a raw provider response to the bare translation
///
/// `source` is the text that was sent; label-shaped sources keep their
/// label, and multi-line sources keep every line of the answer.
///
/// # Example
/// ```ignore
/// let raw = "<think>short UI label</think>Translation: \"Démarrer\"";
/// assert_eq!(clean_response(raw, "Start"), "Démarrer");
/// assert_eq!(clean_response("Result: Victory", "結果：勝利"), "Result: Victory");
/// ```
pub fn clean_response(raw: &str, source: &str) -> String {
    let without_reasoning = REASONING_BLOCK_RE.replace_all(raw, "");
    // An unterminated reasoning block leaves nothing usable before the closing tag.
    let text = match without_reasoning.rfind("</think>") {
        Some(pos) => &without_reasoning[pos + "</think>".len()..],
        None => &without_reasoning[..],
    };

    let text = text.trim();
    let text = ASSISTANT_PREAMBLE_RE.replace(text, "");
    let text = strip_label_preamble(&text, source);
    let text = if source.contains('\n') {
        Cow::Borrowed(text)
    } else {
        TRAILER_RE.replace(text, "")
    };
    strip_wrapping_quotes(text.trim()).trim().to_string()
}

/// Drop a leading "Translation:" style label that sits before the answer
fn strip_label_preamble<'a>(text: &'a str, source: &str) -> &'a str {
    let Some(label) = LABEL_PREAMBLE_RE.find(text) else {
        return text;
    };
    if LABEL_PREAMBLE_RE.is_match(source) {
        return text;
    }
    let rest = &text[label.end()..];
    let before_break = label.as_str().contains('\n');
    let before_quote = rest.starts_with(|c: char| QUOTE_PAIRS.iter().any(|(open, _)| c == *open));
    if before_break || before_quote { rest } else { text }
}

/// Remove one layer of matching quotes around the whole text
pub fn strip_wrapping_quotes(text: &str) -> &str {
    let mut chars = text.chars();
    let (Some(first), Some(last)) = (chars.next(), chars.next_back()) else {
        return text;
    };
    for (open, close) in QUOTE_PAIRS {
        if first == *open && last == *close {
            let inner = &text[first.len_utf8()..text.len() - last.len_utf8()];
            // "a" and "b" is two quoted strings, not one wrapped string.
            if open == close && inner.contains(*open) {
                return text;
            }
            return inner;
        }
    }
    text
}
