//! Settings and storage layout
//!
//! Settings live in `settings.json` inside the base storage directory. Every
//! field has a default, so a partial file works and a missing or broken one
//! yields the defaults. The provider API key is deliberately not part of
//! the file; see [`crate::provider::ChatCompletionProvider::from_env`].

use crate::error::TranslateResult;
use crate::provider::chat::{DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::provider::validate_language;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

pub const STORE_FILE_NAME: &str = "translations.json";
pub const SETTINGS_FILE_NAME: &str = "settings.json";

/// Where the store, its ancestor and the settings live
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoragePaths {
    pub base_dir: PathBuf,
}

impl StoragePaths {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn store_file(&self) -> PathBuf {
        self.base_dir.join(STORE_FILE_NAME)
    }

    pub fn ancestor_file(&self) -> PathBuf {
        crate::store::ancestor_path_for(&self.store_file())
    }

    pub fn settings_file(&self) -> PathBuf {
        self.base_dir.join(SETTINGS_FILE_NAME)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub target_language: String,
    /// `None` lets the provider detect the source language
    pub source_language: Option<String>,
    /// Short description of the game, passed to the provider
    pub domain_context: String,
    /// Longer texts are never sent to the provider
    pub max_text_chars: usize,
    /// Record untranslated texts as empty human entries instead of translating
    pub capture_only: bool,
    pub flush_interval_secs: u64,
    pub idle_poll_ms: u64,
    pub provider: ProviderSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            target_language: "en".to_string(),
            source_language: None,
            domain_context: String::new(),
            max_text_chars: 2000,
            capture_only: false,
            flush_interval_secs: 30,
            idle_poll_ms: 100,
            provider: ProviderSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings, falling back to defaults on any problem
    pub fn load(path: &Path) -> Self {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Settings unreadable, using defaults");
                return Self::default();
            }
        };
        match serde_json::from_str(&content) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Settings are corrupt, using defaults");
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> TranslateResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check language codes and limits
    pub fn validate(&self) -> TranslateResult<()> {
        validate_language(&self.target_language)?;
        if let Some(source) = &self.source_language {
            validate_language(source)?;
        }
        if self.max_text_chars == 0 {
            return Err(crate::error::TranslateError::Config(
                "max_text_chars must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn flush_interval(&self) -> Duration {
        Duration::from_secs(self.flush_interval_secs.max(1))
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let settings = Settings::load(&dir.path().join("settings.json"));
        assert_eq!(settings, Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{"target_language": "ja", "provider": {"model": "local"}}"#).unwrap();
        let settings = Settings::load(&path);
        assert_eq!(settings.target_language, "ja");
        assert_eq!(settings.provider.model, "local");
        assert_eq!(settings.provider.timeout_secs, 60);
        assert_eq!(settings.max_text_chars, 2000);
    }

    #[test]
    fn test_corrupt_file_gives_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "not json").unwrap();
        assert_eq!(Settings::load(&path), Settings::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            target_language: "de".to_string(),
            capture_only: true,
            ..Settings::default()
        };
        settings.save(&path).unwrap();
        assert_eq!(Settings::load(&path), settings);
    }

    #[test]
    fn test_validate() {
        assert!(Settings::default().validate().is_ok());
        let bad = Settings {
            target_language: "f r".to_string(),
            ..Settings::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_storage_paths() {
        let paths = StoragePaths::new("/games/example");
        assert_eq!(paths.store_file(), PathBuf::from("/games/example/translations.json"));
        assert_eq!(
            paths.ancestor_file(),
            PathBuf::from("/games/example/translations.ancestor.json")
        );
        assert_eq!(paths.settings_file(), PathBuf::from("/games/example/settings.json"));
    }
}
