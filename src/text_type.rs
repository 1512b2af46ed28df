//! Rough shape of a text, used to tune how much instruction the provider gets

use serde::{Deserialize, Serialize};
use std::fmt;

/// Up to this many characters, text in an unspaced script counts as a single word
const UNSPACED_WORD_MAX_CHARS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TextType {
    SingleWord,
    Phrase,
    Paragraph,
}

impl TextType {
    /// Classify a text by line breaks and word spacing
    ///
    /// Scripts written without spaces between words (CJK, kana, Thai, ...)
    /// cannot be split on whitespace, so their length decides instead.
    pub fn classify(text: &str) -> TextType {
        let trimmed = text.trim();
        if trimmed.contains('\n') || trimmed.contains('\r') {
            return TextType::Paragraph;
        }

        if uses_unspaced_script(trimmed) {
            if trimmed.chars().count() <= UNSPACED_WORD_MAX_CHARS {
                TextType::SingleWord
            } else {
                TextType::Phrase
            }
        } else if trimmed.contains(char::is_whitespace) {
            TextType::Phrase
        } else {
            TextType::SingleWord
        }
    }
}

impl fmt::Display for TextType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TextType::SingleWord => "single word",
            TextType::Phrase => "phrase",
            TextType::Paragraph => "paragraph",
        };
        f.write_str(name)
    }
}

/// Whether most letters of `text` come from a script without inter-word spacing
pub fn uses_unspaced_script(text: &str) -> bool {
    let mut unspaced = 0;
    let mut letters = 0;
    for c in text.chars().filter(|c| c.is_alphabetic()) {
        letters += 1;
        if is_unspaced_script_char(c) {
            unspaced += 1;
        }
    }
    letters > 0 && unspaced * 2 >= letters
}

fn is_unspaced_script_char(c: char) -> bool {
    matches!(c as u32,
        0x0E00..=0x0E7F      // Thai
        | 0x0E80..=0x0EFF    // Lao
        | 0x1000..=0x109F    // Myanmar
        | 0x1780..=0x17FF    // Khmer
        | 0x3040..=0x30FF    // Hiragana, Katakana
        | 0x3400..=0x4DBF    // CJK Extension A
        | 0x4E00..=0x9FFF    // CJK Unified Ideographs
        | 0xF900..=0xFAFF    // CJK Compatibility Ideographs
        | 0xFF66..=0xFF9F    // Halfwidth Katakana
        | 0x20000..=0x2FA1F  // CJK Extensions B+
    )
}
