//! Mock translation provider for testing
//!
//! This module provides a deterministic, API-free provider for testing
//! the dispatch pipeline without requiring API keys or network access.
//!
//! # Example
//!
//! ```ignore
//! use ludo_translate::provider::{MockMode, MockProvider, ProviderRequest, TranslationProvider};
//!
//! #[tokio::test]
//! async fn test_translation() {
//!     let mock = MockProvider::new(MockMode::Suffix);
//!     let result = mock.translate(&ProviderRequest::new("hello", "fr")).await.unwrap();
//!     assert_eq!(result, "hello_fr");
//! }
//! ```

use super::{ProviderRequest, SKIP_SENTINEL, TranslationProvider};
use crate::error::{TranslateError, TranslateResult};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Mock translation modes for testing different scenarios
#[derive(Debug, Clone)]
pub enum MockMode {
    /// Append target suffix: "hello" → "hello_fr"
    /// This preserves placeholder tokens perfectly for testing
    Suffix,

    /// Use predefined mappings, falling back to suffix mode
    /// text → translation
    Mappings(HashMap<String, String>),

    /// Return the same raw reply for everything (to exercise cleanup)
    Fixed(String),

    /// Reply with the skip sentinel
    Skip,

    /// Simulate provider errors
    Error(String),

    /// No-op: return input unchanged
    NoOp,
}

/// Mock provider that simulates various translation scenarios
///
/// Clones share the call counter and request log, so a test can keep a
/// handle while the engine owns another.
#[derive(Debug, Clone)]
pub struct MockProvider {
    mode: MockMode,
    /// Optional simulated network delay (in milliseconds)
    delay_ms: u64,
    calls: Arc<AtomicUsize>,
    requests: Arc<Mutex<Vec<ProviderRequest>>>,
}

impl MockProvider {
    /// Create a new MockProvider with the given mode
    pub fn new(mode: MockMode) -> Self {
        Self::with_delay(mode, 0)
    }

    /// Create a MockProvider with simulated network delay
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mock = MockProvider::with_delay(MockMode::Suffix, 50);
    /// // Each translation will have ~50ms delay
    /// ```
    pub fn with_delay(mode: MockMode, delay_ms: u64) -> Self {
        Self {
            mode,
            delay_ms,
            calls: Arc::new(AtomicUsize::new(0)),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Number of `translate` calls so far
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    async fn apply_delay(&self) {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
    }

    fn apply_translation(&self, request: &ProviderRequest) -> TranslateResult<String> {
        let suffixed = || format!("{}_{}", request.text, request.target_language);
        match &self.mode {
            MockMode::Suffix => Ok(suffixed()),
            MockMode::Mappings(map) => Ok(map.get(&request.text).cloned().unwrap_or_else(suffixed)),
            MockMode::Fixed(reply) => Ok(reply.clone()),
            MockMode::Skip => Ok(SKIP_SENTINEL.to_string()),
            MockMode::Error(msg) => Err(TranslateError::Provider(msg.clone())),
            MockMode::NoOp => Ok(request.text.clone()),
        }
    }
}

#[async_trait]
impl TranslationProvider for MockProvider {
    async fn translate(&self, request: &ProviderRequest) -> TranslateResult<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request.clone());
        }

        self.apply_delay().await;
        self.apply_translation(request)
    }

    fn provider_name(&self) -> &str {
        "Mock Provider"
    }
}
