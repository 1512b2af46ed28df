//! Reuse of cached translations for texts that differ only in their numbers
//!
//! A store key such as `"Level [v0] reached"` with the value
//! `"Niveau [v0] atteint"` is compiled into the matcher
//! `^Level ([+-]?\d+(?:[.,]\d+)?%?) reached$`. A new text like
//! `"Level 12 reached"` matches it, and the captured `12` is substituted
//! back into the cached value: `"Niveau 12 atteint"`.
//!
//! Matchers are tried in insertion order and the first hit wins. Texts
//! that match nothing are remembered so a repeated miss costs one set
//! lookup instead of a scan over every matcher.

use crate::entry::{Entries, Entry, Tag};
use crate::error::{TranslateError, TranslateResult};
use crate::numbers::{NUMBER_PATTERN, placeholder_indices, restore_numbers, token_regex};
use regex::Regex;
use std::collections::HashSet;
use tracing::debug;

/// A compiled matcher for one templated store entry
#[derive(Debug, Clone)]
pub struct NumericPattern {
    matcher: Regex,
    key: String,
    value: String,
    /// Placeholder index captured by each regex group, in group order
    group_indices: Vec<usize>,
}

impl NumericPattern {
    /// Compile a matcher for `key`, if the entry is eligible
    ///
    /// # Returns
    ///
    /// * `Ok(Some(pattern))` - The key is templated and the value uses the same placeholders
    /// * `Ok(None)` - Nothing to compile (no placeholders, mismatched placeholders, skipped entry)
    /// * `Err(TranslateError::Pattern)` - The regex failed to compile
    pub fn compile(key: &str, entry: &Entry) -> TranslateResult<Option<Self>> {
        if entry.value.is_empty() || entry.tag == Tag::Skipped {
            return Ok(None);
        }

        let group_indices = placeholder_indices(key);
        if group_indices.is_empty() {
            return Ok(None);
        }

        let key_set: HashSet<usize> = group_indices.iter().copied().collect();
        let value_set: HashSet<usize> = placeholder_indices(&entry.value).into_iter().collect();
        if key_set.len() != group_indices.len() || key_set != value_set {
            return Ok(None);
        }

        let mut source = String::from("^");
        let mut last = 0;
        for m in token_regex().find_iter(key) {
            source.push_str(&regex::escape(&key[last..m.start()]));
            source.push_str(NUMBER_PATTERN);
            last = m.end();
        }
        source.push_str(&regex::escape(&key[last..]));
        source.push('$');

        let matcher = Regex::new(&source)
            .map_err(|e| TranslateError::Pattern(format!("{}: {}", key, e)))?;

        Ok(Some(Self {
            matcher,
            key: key.to_string(),
            value: entry.value.clone(),
            group_indices,
        }))
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Translate `text` through this pattern, if it matches
    pub fn apply(&self, text: &str) -> Option<String> {
        let caps = self.matcher.captures(text)?;
        let max_index = self.group_indices.iter().copied().max().unwrap_or(0);
        let mut numbers = vec![String::new(); max_index + 1];
        for (group, index) in self.group_indices.iter().enumerate() {
            numbers[*index] = caps.get(group + 1)?.as_str().to_string();
        }
        Some(restore_numbers(&self.value, &numbers))
    }
}

#[derive(Debug, Default)]
pub struct PatternIndex {
    patterns: Vec<NumericPattern>,
    misses: HashSet<String>,
}

impl PatternIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compile matchers for every eligible entry
    pub fn build(entries: &Entries) -> Self {
        let mut index = Self::new();
        for (key, entry) in entries {
            index.insert(key, entry);
        }
        debug!(patterns = index.patterns.len(), "Built numeric pattern index");
        index
    }

    /// Add a matcher for a newly stored entry
    ///
    /// Entries that fail to compile are logged and skipped.
    pub fn insert(&mut self, key: &str, entry: &Entry) {
        match NumericPattern::compile(key, entry) {
            Ok(Some(pattern)) => {
                self.patterns.push(pattern);
                // A remembered miss may match the new pattern.
                self.misses.clear();
            }
            Ok(None) => {}
            Err(e) => debug!(error = %e, "Skipping numeric pattern"),
        }
    }

    /// Find a cached translation for `text` by numeric pattern
    pub fn lookup(&mut self, text: &str) -> Option<String> {
        if self.patterns.is_empty() || self.misses.contains(text) {
            return None;
        }
        for pattern in &self.patterns {
            if let Some(translated) = pattern.apply(text) {
                return Some(translated);
            }
        }
        self.misses.insert(text.to_string());
        None
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn miss_count(&self) -> usize {
        self.misses.len()
    }
}
