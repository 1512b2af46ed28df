//! Translation entries and their provenance tags
//!
//! Every source string in the store maps to exactly one [`Entry`]: the
//! translated value plus a [`Tag`] recording where the value came from.
//! Tags carry a total priority order that the merge engine uses to settle
//! updates that do not need a human decision.
//!
//! On disk an entry is the compact object `{"v": "...", "t": "A"}`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Keys starting with this prefix hold store metadata, never translations
pub const METADATA_PREFIX: char = '_';

/// Whether a key is reserved for metadata
pub fn is_metadata_key(key: &str) -> bool {
    key.starts_with(METADATA_PREFIX)
}

/// Source text → entry, ordered by byte-ordinal key comparison
pub type Entries = BTreeMap<String, Entry>;

/// Provenance of a translation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    /// Produced by the machine translation provider
    #[serde(rename = "A")]
    Ai,
    /// Written (or captured for later writing) by a person
    #[serde(rename = "H")]
    Human,
    /// Machine output reviewed and accepted by a person
    #[serde(rename = "V")]
    Validated,
    /// Provider reported the text is not in the source language
    #[serde(rename = "S")]
    Skipped,
    /// Text belonging to our own interface
    #[serde(rename = "M")]
    ModUi,
}

impl Tag {
    /// Single-letter code used in the store file
    pub fn code(&self) -> &'static str {
        match self {
            Tag::Ai => "A",
            Tag::Human => "H",
            Tag::Validated => "V",
            Tag::Skipped => "S",
            Tag::ModUi => "M",
        }
    }

    pub fn from_code(code: &str) -> Option<Tag> {
        match code {
            "A" => Some(Tag::Ai),
            "H" => Some(Tag::Human),
            "V" => Some(Tag::Validated),
            "S" => Some(Tag::Skipped),
            "M" => Some(Tag::ModUi),
            _ => None,
        }
    }

    /// `Skipped` and `ModUI` entries are never replaced by another tag
    pub fn is_immutable(&self) -> bool {
        matches!(self, Tag::Skipped | Tag::ModUi)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Ai => "AI",
            Tag::Human => "Human",
            Tag::Validated => "Validated",
            Tag::Skipped => "Skipped",
            Tag::ModUi => "ModUI",
        };
        f.write_str(name)
    }
}

/// Replacement priority of an entry, lowest first
///
/// `HumanEmpty < Ai < Validated < Human < Immutable`
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    HumanEmpty = 0,
    Ai = 1,
    Validated = 2,
    Human = 3,
    Immutable = 4,
}

/// A translated value with its provenance tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "v")]
    pub value: String,
    #[serde(rename = "t")]
    pub tag: Tag,
}

impl Entry {
    pub fn new(value: impl Into<String>, tag: Tag) -> Self {
        Self {
            value: value.into(),
            tag,
        }
    }

    pub fn ai(value: impl Into<String>) -> Self {
        Self::new(value, Tag::Ai)
    }

    pub fn human(value: impl Into<String>) -> Self {
        Self::new(value, Tag::Human)
    }

    /// A human entry with no value yet, recorded by capture-only mode
    pub fn is_placeholder(&self) -> bool {
        self.tag == Tag::Human && self.value.is_empty()
    }

    pub fn priority(&self) -> Priority {
        match self.tag {
            Tag::Human if self.value.is_empty() => Priority::HumanEmpty,
            Tag::Human => Priority::Human,
            Tag::Ai => Priority::Ai,
            Tag::Validated => Priority::Validated,
            Tag::Skipped | Tag::ModUi => Priority::Immutable,
        }
    }

    pub fn is_immutable(&self) -> bool {
        self.tag.is_immutable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(Entry::human("").priority() < Entry::ai("x").priority());
        assert!(Entry::ai("x").priority() < Entry::new("x", Tag::Validated).priority());
        assert!(Entry::new("x", Tag::Validated).priority() < Entry::human("x").priority());
        assert!(Entry::human("x").priority() < Entry::new("x", Tag::Skipped).priority());
        assert_eq!(
            Entry::new("x", Tag::Skipped).priority(),
            Entry::new("y", Tag::ModUi).priority()
        );
    }

    #[test]
    fn test_placeholder_detection() {
        assert!(Entry::human("").is_placeholder());
        assert!(!Entry::human("hola").is_placeholder());
        assert!(!Entry::ai("").is_placeholder());
    }

    #[test]
    fn test_immutable_tags() {
        assert!(Tag::Skipped.is_immutable());
        assert!(Tag::ModUi.is_immutable());
        assert!(!Tag::Human.is_immutable());
        assert!(!Tag::Validated.is_immutable());
        assert!(!Tag::Ai.is_immutable());
    }

    #[test]
    fn test_tag_codes() {
        for tag in [Tag::Ai, Tag::Human, Tag::Validated, Tag::Skipped, Tag::ModUi] {
            assert_eq!(Tag::from_code(tag.code()), Some(tag));
        }
        assert_eq!(Tag::from_code("X"), None);
    }

    #[test]
    fn test_entry_serialization_is_compact() {
        let json = serde_json::to_string(&Entry::ai("Bonjour")).unwrap();
        assert_eq!(json, r#"{"v":"Bonjour","t":"A"}"#);
        let back: Entry = serde_json::from_str(r#"{"v":"Hallo","t":"H"}"#).unwrap();
        assert_eq!(back, Entry::human("Hallo"));
    }

    #[test]
    fn test_metadata_keys() {
        assert!(is_metadata_key("_uuid"));
        assert!(!is_metadata_key("Start Game"));
    }
}
