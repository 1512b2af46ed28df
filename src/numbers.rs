/// Numeric placeholder tokens for protecting numbers during machine translation
///
/// Numbers in game text change constantly ("Level 5", "Level 6", "+12% damage"),
/// while the sentence around them does not. Replacing every number with a
/// positional token before translation lets one translation serve all of them,
/// and keeps the provider from rewriting the numbers themselves.
///
/// Format: `[v{index}]`, zero-based in source order.
/// Example: `"Deal 12.5% more damage for 3 turns"` → `"Deal [v0] more damage for [v1] turns"`
///
/// Digits that belong to a hex color (`#FF00AA`, `#1a2b3c`) stay in place.
use regex::{Captures, Regex};
use std::sync::LazyLock;

/// Longest run of hex characters between `#` and a digit that still counts as a color
const HEX_LOOKBEHIND: usize = 8;

static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[+-]?\d+(?:[.,]\d+)?%?").expect("valid number regex"));

static TOKEN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[v(\d+)\]").expect("valid token regex"));

/// Regex fragment matching one number, as captured by the pattern index
pub const NUMBER_PATTERN: &str = r"([+-]?\d+(?:[.,]\d+)?%?)";

/// Text with its numbers lifted out into placeholder tokens
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedNumbers {
    /// The text with `[v0]`, `[v1]`, ... in place of numbers
    pub text: String,
    /// The numbers, in token order
    pub numbers: Vec<String>,
}

impl ExtractedNumbers {
    pub fn has_numbers(&self) -> bool {
        !self.numbers.is_empty()
    }

    /// Put the original numbers back into a (translated) text
    pub fn restore(&self, translated: &str) -> String {
        restore_numbers(translated, &self.numbers)
    }
}

/// Token for the placeholder at `index`
pub fn placeholder_token(index: usize) -> String {
    format!("[v{}]", index)
}

/// Replace every number in `text` with a positional placeholder token
///
/// # Example
/// ```ignore
/// let extracted = extract_numbers("Gold: 1,500 (+20%)");
/// assert_eq!(extracted.text, "Gold: [v0] ([v1])");
/// assert_eq!(extracted.numbers, vec!["1,500", "+20%"]);
/// ```
pub fn extract_numbers(text: &str) -> ExtractedNumbers {
    let mut result = String::with_capacity(text.len());
    let mut numbers = Vec::new();
    let mut last = 0;

    for m in NUMBER_RE.find_iter(text) {
        let mut start = m.start();

        // "HP-5": the dash is a hyphen, not a sign
        let first = text[start..].chars().next().unwrap_or('0');
        if (first == '+' || first == '-') && preceded_by_alphanumeric(text, start) {
            start += 1;
        }

        if is_hex_color_digit(text, start) {
            continue;
        }

        result.push_str(&text[last..start]);
        result.push_str(&placeholder_token(numbers.len()));
        numbers.push(text[start..m.end()].to_string());
        last = m.end();
    }

    result.push_str(&text[last..]);
    ExtractedNumbers {
        text: result,
        numbers,
    }
}

/// Replace placeholder tokens with the numbers at their index
///
/// Tokens whose index has no number are left as they are.
pub fn restore_numbers(text: &str, numbers: &[String]) -> String {
    if numbers.is_empty() {
        return text.to_string();
    }
    TOKEN_RE
        .replace_all(text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| numbers.get(i))
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Indices of the placeholder tokens in `text`, in order of appearance
pub fn placeholder_indices(text: &str) -> Vec<usize> {
    TOKEN_RE
        .captures_iter(text)
        .filter_map(|caps| caps[1].parse().ok())
        .collect()
}

/// The regex used to find placeholder tokens
pub(crate) fn token_regex() -> &'static Regex {
    &TOKEN_RE
}

fn preceded_by_alphanumeric(text: &str, pos: usize) -> bool {
    text[..pos]
        .chars()
        .next_back()
        .is_some_and(|c| c.is_alphanumeric())
}

/// A digit preceded by `#` with only hex characters (at most 8) in between
fn is_hex_color_digit(text: &str, pos: usize) -> bool {
    for (seen, c) in text[..pos].chars().rev().enumerate() {
        if c == '#' {
            return true;
        }
        if !c.is_ascii_hexdigit() || seen >= HEX_LOOKBEHIND {
            return false;
        }
    }
    false
}
