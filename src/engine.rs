//! Translation engine: cache lookups, request dispatch and persistence
//!
//! A [`TranslationEngine`] is constructed explicitly around one
//! [`TranslationStore`], one [`TranslationProvider`] and one
//! [`TranslationHost`]. Callers use [`TranslationEngine::request`] from any
//! thread: it answers from the cache when it can and otherwise returns the
//! original text at once, while a background worker asks the provider and
//! reports the result through [`TranslationHost::on_translation_complete`].
//!
//! Store, pattern index and dispatch queue sit behind a single lock. The
//! lock is never held across an `.await`, and host callbacks run after it
//! is released.
//!
//! # Example
//!
//! ```ignore
//! use ludo_translate::{Settings, TranslationEngine, TranslationStore};
//! use ludo_translate::provider::{MockMode, MockProvider};
//! use std::sync::Arc;
//!
//! let store = TranslationStore::load("ludo-data/translations.json");
//! let engine = TranslationEngine::new(
//!     store,
//!     Arc::new(MockProvider::new(MockMode::Suffix)),
//!     Arc::new(MyHost),
//!     Settings::default(),
//! );
//! engine.start()?;
//! let shown = engine.request("Level 5", widget_id); // "Level 5" until translated
//! ```

use crate::cleanup::clean_response;
use crate::dispatch::{Consumer, DispatchQueue, Dequeued, RequestState, group_consumers};
use crate::entry::{Entry, Tag};
use crate::error::{TranslateError, TranslateResult};
use crate::numbers::{extract_numbers, restore_numbers};
use crate::pattern::PatternIndex;
use crate::provider::{ProviderRequest, SKIP_SENTINEL, TranslationProvider};
use crate::settings::Settings;
use crate::store::TranslationStore;
use std::collections::HashSet;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Callbacks supplied by the application embedding the engine
pub trait TranslationHost<H>: Send + Sync {
    /// A queued text was resolved
    ///
    /// `translated` equals `original` when the provider said the text is not
    /// in the source language.
    fn on_translation_complete(&self, original: &str, translated: &str, handles: Vec<H>);

    /// Whether `handle` belongs to the translation tool's own interface
    ///
    /// Only changes prompt framing and the tag of the stored entry.
    fn is_own_ui(&self, _handle: &H) -> bool {
        false
    }
}

/// Explicit registration of handles that belong to our own interface
#[derive(Debug)]
pub struct OwnUiRegistry<H> {
    handles: Mutex<HashSet<H>>,
}

impl<H> Default for OwnUiRegistry<H> {
    fn default() -> Self {
        Self {
            handles: Mutex::new(HashSet::new()),
        }
    }
}

impl<H: Eq + Hash> OwnUiRegistry<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: H) {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(handle);
    }

    pub fn unregister(&self, handle: &H) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(handle)
    }

    pub fn contains(&self, handle: &H) -> bool {
        self.handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(handle)
    }
}

struct EngineState<H> {
    store: TranslationStore,
    patterns: PatternIndex,
    queue: DispatchQueue<H>,
}

struct EngineInner<H> {
    state: Mutex<EngineState<H>>,
    provider: Arc<dyn TranslationProvider>,
    host: Arc<dyn TranslationHost<H>>,
    settings: Settings,
    running: AtomicBool,
    closed: AtomicBool,
    wake: Notify,
    worker: Mutex<WorkerSlot>,
}

/// Handle of the spawned worker and whether it is still inside its loop
#[derive(Default)]
struct WorkerSlot {
    handle: Option<JoinHandle<()>>,
    active: bool,
}

/// Outcome of a translation attempt for one queued text
enum Outcome {
    /// Store the translation under the normalized key
    Translated(String),
    /// Provider declined: not in the source language
    Skipped,
    /// Already resolved while waiting in the queue
    Cached,
}

/// Cheaply cloneable handle to a running translation engine
pub struct TranslationEngine<H> {
    inner: Arc<EngineInner<H>>,
}

impl<H> Clone for TranslationEngine<H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<H: Send + 'static> TranslationEngine<H> {
    /// Build an engine around a loaded store
    ///
    /// The worker is not started; see [`TranslationEngine::start`].
    pub fn new(
        store: TranslationStore,
        provider: Arc<dyn TranslationProvider>,
        host: Arc<dyn TranslationHost<H>>,
        settings: Settings,
    ) -> Self {
        let patterns = PatternIndex::build(store.entries());
        Self {
            inner: Arc::new(EngineInner {
                state: Mutex::new(EngineState {
                    store,
                    patterns,
                    queue: DispatchQueue::new(),
                }),
                provider,
                host,
                settings,
                running: AtomicBool::new(false),
                closed: AtomicBool::new(false),
                wake: Notify::new(),
                worker: Mutex::new(WorkerSlot::default()),
            }),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    /// Answer from the cache only
    ///
    /// Tries the exact key, then the number-normalized key (numbers put back
    /// into the cached value), then the numeric pattern index. `Skipped`
    /// entries answer with `text` itself; empty human placeholders are misses.
    pub fn lookup(&self, text: &str) -> Option<String> {
        let mut state = self.inner.lock_state();
        lookup_locked(&mut state, text)
    }

    /// Translate `text` for the caller identified by `handle`
    ///
    /// # Returns
    ///
    /// The cached translation, or `text` unchanged on a miss. A miss is
    /// queued for the worker (joining an outstanding request for the same
    /// normalized text if there is one) unless capture-only mode is on, in
    /// which case an empty human entry is recorded instead.
    pub fn request(&self, text: &str, handle: H) -> String {
        if text.trim().is_empty() {
            return text.to_string();
        }

        let own_ui = self.inner.host.is_own_ui(&handle);
        let mut state = self.inner.lock_state();
        if let Some(hit) = lookup_locked(&mut state, text) {
            return hit;
        }

        let extracted = extract_numbers(text);
        let len = extracted.text.chars().count();
        if len > self.inner.settings.max_text_chars {
            debug!(len, max = self.inner.settings.max_text_chars, "Text too long, not queued");
            return text.to_string();
        }

        if self.inner.settings.capture_only {
            if state.store.add_entry(&extracted.text, "", Tag::Human) {
                debug!(key = %extracted.text, "Captured untranslated text");
            }
            return text.to_string();
        }

        let consumer = Consumer::new(text, extracted.numbers, handle);
        if state.queue.enqueue(&extracted.text, consumer, own_ui) {
            debug!(key = %extracted.text, "Queued text for translation");
            drop(state);
            self.inner.wake.notify_one();
        }
        text.to_string()
    }

    /// Start the background worker if it is not running
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start(&self) -> TranslateResult<()> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(TranslateError::Config("Engine has been shut down".to_string()));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| TranslateError::Config(format!("No Tokio runtime: {}", e)))?;
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut worker = self.inner.lock_worker();
        // An active worker re-reads the flag under this lock before it exits.
        let panicked = worker.handle.as_ref().is_some_and(JoinHandle::is_finished);
        if worker.active && !panicked {
            return Ok(());
        }
        let inner = Arc::clone(&self.inner);
        worker.active = true;
        worker.handle = Some(runtime.spawn(worker_loop(inner)));
        Ok(())
    }

    /// Ask the worker to stop after its current iteration
    pub fn stop(&self) {
        if self.inner.running.swap(false, Ordering::SeqCst) {
            self.inner.wake.notify_one();
        }
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Texts pending or in flight
    pub fn outstanding(&self) -> usize {
        self.inner.lock_state().queue.outstanding()
    }

    /// Dispatch state of a normalized text, `None` when absent
    pub fn request_state(&self, normalized: &str) -> Option<RequestState> {
        self.inner.lock_state().queue.state(normalized)
    }

    /// Save the store if it has unsaved changes
    ///
    /// Failures are logged and leave the store dirty for the next attempt.
    pub fn flush_if_dirty(&self) -> bool {
        let mut state = self.inner.lock_state();
        if !state.store.is_dirty() {
            return false;
        }
        match state.store.save() {
            Ok(()) => {
                debug!(entries = state.store.len(), "Flushed translation store");
                true
            }
            Err(e) => {
                error!(error = %e, "Failed to flush translation store");
                false
            }
        }
    }

    /// Spawn a task flushing the store every `flush_interval`
    ///
    /// The task ends after [`TranslationEngine::shutdown`].
    pub fn spawn_autosave(&self) -> JoinHandle<()> {
        let engine = self.clone();
        let period = self.inner.settings.flush_interval();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // The first tick completes immediately.
            interval.tick().await;
            loop {
                interval.tick().await;
                if engine.inner.closed.load(Ordering::SeqCst) {
                    break;
                }
                engine.flush_if_dirty();
            }
            debug!("Autosave task stopped");
        })
    }

    /// Stop the worker, wait for it, and save unconditionally
    pub async fn shutdown(&self) -> TranslateResult<()> {
        self.inner.closed.store(true, Ordering::SeqCst);
        self.stop();
        let worker = self.inner.lock_worker().handle.take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                warn!(error = %e, "Translation worker ended abnormally");
            }
        }
        let mut state = self.inner.lock_state();
        state.store.save()?;
        info!(entries = state.store.len(), "Translation store saved on shutdown");
        Ok(())
    }

    /// Read access to the store under the engine lock
    pub fn with_store<R>(&self, f: impl FnOnce(&TranslationStore) -> R) -> R {
        let state = self.inner.lock_state();
        f(&state.store)
    }

    /// Write access to the store; the pattern index is rebuilt afterwards
    pub fn with_store_mut<R>(&self, f: impl FnOnce(&mut TranslationStore) -> R) -> R {
        let mut state = self.inner.lock_state();
        let result = f(&mut state.store);
        state.patterns = PatternIndex::build(state.store.entries());
        result
    }
}

impl<H> EngineInner<H> {
    fn lock_state(&self) -> MutexGuard<'_, EngineState<H>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_worker(&self) -> MutexGuard<'_, WorkerSlot> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn lookup_locked<H>(state: &mut EngineState<H>, text: &str) -> Option<String> {
    cached_translation(&state.store, &mut state.patterns, text)
}

/// Cache lookup against a store and its pattern index
///
/// Exact key first, then the number-normalized key with the numbers put
/// back, then the pattern index.
pub fn cached_translation(
    store: &TranslationStore,
    patterns: &mut PatternIndex,
    text: &str,
) -> Option<String> {
    if let Some(entry) = store.get(text) {
        if let Some(hit) = cached_value(entry, text) {
            return Some(hit);
        }
    }

    let extracted = extract_numbers(text);
    if extracted.has_numbers() {
        if let Some(entry) = store.get(&extracted.text) {
            if entry.tag == Tag::Skipped {
                return Some(text.to_string());
            }
            if !entry.is_placeholder() {
                return Some(extracted.restore(&entry.value));
            }
        }
        return patterns.lookup(text);
    }
    None
}

fn cached_value(entry: &Entry, text: &str) -> Option<String> {
    if entry.tag == Tag::Skipped {
        Some(text.to_string())
    } else if entry.is_placeholder() {
        None
    } else {
        Some(entry.value.clone())
    }
}

async fn worker_loop<H: Send + 'static>(inner: Arc<EngineInner<H>>) {
    info!(provider = inner.provider.provider_name(), "Translation worker started");
    loop {
        while inner.running.load(Ordering::SeqCst) {
            let next = inner.lock_state().queue.next();
            match next {
                Some(dequeued) => process(&inner, dequeued).await,
                None => {
                    let _ =
                        tokio::time::timeout(inner.settings.idle_poll(), inner.wake.notified()).await;
                }
            }
        }

        // A start() racing with this exit saw `active` and relies on us to resume.
        let restarted = {
            let mut worker = inner.lock_worker();
            let restarted = inner.running.load(Ordering::SeqCst);
            if !restarted {
                worker.active = false;
            }
            restarted
        };
        if !restarted {
            break;
        }
        debug!("Translation worker restarted before exiting");
    }
    info!("Translation worker stopped");
}

/// Resolve one in-flight text and notify its consumers
async fn process<H: Send + 'static>(inner: &EngineInner<H>, dequeued: Dequeued) {
    let key = dequeued.text;

    let cached = {
        let mut state = inner.lock_state();
        recheck_cache(&mut state, &key)
    };

    let outcome = if cached {
        Outcome::Cached
    } else {
        let request = build_request(&inner.settings, &key, dequeued.own_ui);
        match translate(inner, &request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                let dropped = inner.lock_state().queue.fail(&key);
                debug!(key = %key, consumers = dropped, error = %e, "Translation failed");
                return;
            }
        }
    };

    let (consumers, stored) = {
        let mut state = inner.lock_state();
        match &outcome {
            Outcome::Translated(value) => {
                let tag = if dequeued.own_ui { Tag::ModUi } else { Tag::Ai };
                store_result(&mut state, &key, value, tag);
            }
            Outcome::Skipped => store_result(&mut state, &key, &key, Tag::Skipped),
            Outcome::Cached => {}
        }
        let stored = state.store.get(&key).cloned();
        (state.queue.complete(&key), stored)
    };

    for group in group_consumers(consumers) {
        let translated = match (&outcome, &stored) {
            (Outcome::Skipped, _) => group.original.clone(),
            (_, Some(entry)) if entry.tag == Tag::Skipped => group.original.clone(),
            (_, Some(entry)) if !entry.is_placeholder() => {
                restore_numbers(&entry.value, &group.numbers)
            }
            (Outcome::Translated(value), _) => restore_numbers(value, &group.numbers),
            _ => {
                let mut state = inner.lock_state();
                state
                    .patterns
                    .lookup(&group.original)
                    .unwrap_or_else(|| group.original.clone())
            }
        };
        inner
            .host
            .on_translation_complete(&group.original, &translated, group.handles);
    }
}

/// Whether another writer resolved `key` while it waited in the queue
fn recheck_cache<H>(state: &mut EngineState<H>, key: &str) -> bool {
    if state
        .store
        .get(key)
        .is_some_and(|entry| !entry.is_placeholder())
    {
        return true;
    }
    let Some(original) = state.queue.first_consumer(key).map(|c| c.original.clone()) else {
        return false;
    };
    original != key && state.patterns.lookup(&original).is_some()
}

fn build_request(settings: &Settings, key: &str, own_ui: bool) -> ProviderRequest {
    ProviderRequest::new(key, settings.target_language.as_str())
        .with_source_language(settings.source_language.clone())
        .with_domain_context(settings.domain_context.as_str())
        .with_own_ui(own_ui)
}

async fn translate<H>(
    inner: &EngineInner<H>,
    request: &ProviderRequest,
) -> TranslateResult<Outcome> {
    let len = request.text.chars().count();
    let max = inner.settings.max_text_chars;
    if len > max {
        return Err(TranslateError::InputTooLong { len, max });
    }

    let raw = inner.provider.translate(request).await?;
    let cleaned = clean_response(&raw, &request.text);
    if cleaned == SKIP_SENTINEL {
        debug!(key = %request.text, "Provider skipped text");
        return Ok(Outcome::Skipped);
    }
    if cleaned.is_empty() {
        return Err(TranslateError::Provider("Empty translation".to_string()));
    }
    Ok(Outcome::Translated(cleaned))
}

fn store_result<H>(state: &mut EngineState<H>, key: &str, value: &str, tag: Tag) {
    let replaces_placeholder = state.store.get(key).is_some_and(Entry::is_placeholder);
    let stored = if replaces_placeholder {
        state.store.set_entry(key, value, tag)
    } else {
        state.store.add_entry(key, value, tag)
    };
    if stored {
        let entry = Entry::new(value, tag);
        state.patterns.insert(key, &entry);
        debug!(key = %key, tag = %tag, "Stored translation");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{MockMode, MockProvider};
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::tempdir;

    #[derive(Default)]
    struct RecordingHost {
        completions: Mutex<Vec<(String, String, Vec<u32>)>>,
        own_ui: OwnUiRegistry<u32>,
    }

    impl RecordingHost {
        fn completions(&self) -> Vec<(String, String, Vec<u32>)> {
            self.completions.lock().unwrap().clone()
        }
    }

    impl TranslationHost<u32> for RecordingHost {
        fn on_translation_complete(&self, original: &str, translated: &str, handles: Vec<u32>) {
            self.completions.lock().unwrap().push((
                original.to_string(),
                translated.to_string(),
                handles,
            ));
        }

        fn is_own_ui(&self, handle: &u32) -> bool {
            self.own_ui.contains(handle)
        }
    }

    fn settings() -> Settings {
        Settings {
            target_language: "fr".to_string(),
            idle_poll_ms: 5,
            ..Settings::default()
        }
    }

    fn engine_with(
        store: TranslationStore,
        mock: &MockProvider,
        settings: Settings,
    ) -> (TranslationEngine<u32>, Arc<RecordingHost>) {
        let host = Arc::new(RecordingHost::default());
        let engine = TranslationEngine::new(
            store,
            Arc::new(mock.clone()),
            host.clone() as Arc<dyn TranslationHost<u32>>,
            settings,
        );
        (engine, host)
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    // ========== Lookup Tests ==========

    #[test]
    fn test_lookup_exact_and_normalized() {
        let dir = tempdir().unwrap();
        let mut store = TranslationStore::new(dir.path().join("t.json"));
        store.add_entry("Start", "Commencer", Tag::Ai);
        store.add_entry("Level [v0]", "Niveau [v0]", Tag::Ai);
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, _) = engine_with(store, &mock, settings());

        assert_eq!(engine.lookup("Start").as_deref(), Some("Commencer"));
        assert_eq!(engine.lookup("Level 12").as_deref(), Some("Niveau 12"));
        assert_eq!(engine.lookup("Quit"), None);
    }

    #[test]
    fn test_lookup_skipped_and_placeholder() {
        let dir = tempdir().unwrap();
        let mut store = TranslationStore::new(dir.path().join("t.json"));
        store.add_entry("Bonjour", "Bonjour", Tag::Skipped);
        store.add_entry("Empty", "", Tag::Human);
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, _) = engine_with(store, &mock, settings());

        assert_eq!(engine.lookup("Bonjour").as_deref(), Some("Bonjour"));
        assert_eq!(engine.lookup("Empty"), None);
    }

    #[test]
    fn test_lookup_through_pattern_index() {
        let dir = tempdir().unwrap();
        let mut store = TranslationStore::new(dir.path().join("t.json"));
        store.add_entry("[v0] gold", "[v0] or", Tag::Ai);
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, _) = engine_with(store, &mock, settings());
        assert_eq!(engine.lookup("250 gold").as_deref(), Some("250 or"));
    }

    // ========== Request Tests ==========

    #[test]
    fn test_request_miss_returns_original_and_queues() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, _) = engine_with(store, &mock, settings());

        assert_eq!(engine.request("Level 5", 1), "Level 5");
        assert_eq!(engine.request_state("Level [v0]"), Some(RequestState::Pending));
        assert_eq!(engine.request("Level 6", 2), "Level 6");
        assert_eq!(engine.outstanding(), 1);
    }

    #[test]
    fn test_request_too_long_is_not_queued() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let settings = Settings {
            max_text_chars: 5,
            ..settings()
        };
        let (engine, _) = engine_with(store, &mock, settings);
        assert_eq!(engine.request("Far too long", 1), "Far too long");
        assert_eq!(engine.outstanding(), 0);
    }

    #[test]
    fn test_capture_only_records_placeholder() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let settings = Settings {
            capture_only: true,
            ..settings()
        };
        let (engine, _) = engine_with(store, &mock, settings);

        assert_eq!(engine.request("Wave 3", 1), "Wave 3");
        assert_eq!(engine.outstanding(), 0);
        let entry = engine.with_store(|s| s.get("Wave [v0]").cloned()).unwrap();
        assert!(entry.is_placeholder());
    }

    #[test]
    fn test_blank_text_is_ignored() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, _) = engine_with(store, &mock, settings());
        assert_eq!(engine.request("  ", 1), "  ");
        assert_eq!(engine.outstanding(), 0);
    }

    // ========== Worker Tests ==========

    #[tokio::test]
    async fn test_duplicate_requests_make_one_call() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, host) = engine_with(store, &mock, settings());

        engine.request("Start", 1);
        engine.request("Start", 2);
        engine.start().unwrap();
        wait_until(|| !host.completions().is_empty()).await;

        assert_eq!(mock.call_count(), 1);
        let completions = host.completions();
        assert_eq!(completions.len(), 1);
        assert_eq!(completions[0].0, "Start");
        assert_eq!(completions[0].1, "Start_fr");
        assert_eq!(completions[0].2, vec![1, 2]);
        assert_eq!(engine.lookup("Start").as_deref(), Some("Start_fr"));
        assert_eq!(engine.request_state("Start"), None);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_numbers_restored_per_consumer() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, host) = engine_with(store, &mock, settings());

        engine.request("Level 5", 1);
        engine.request("Level 6", 2);
        engine.start().unwrap();
        wait_until(|| host.completions().len() == 2).await;

        assert_eq!(mock.call_count(), 1);
        let completions = host.completions();
        assert_eq!(completions[0].1, "Level 5_fr");
        assert_eq!(completions[1].1, "Level 6_fr");
        let entry = engine.with_store(|s| s.get("Level [v0]").cloned()).unwrap();
        assert_eq!(entry.value, "Level [v0]_fr");
        assert_eq!(entry.tag, Tag::Ai);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_provider_error_makes_text_retryable() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Error("offline".to_string()));
        let (engine, host) = engine_with(store, &mock, settings());

        engine.request("Start", 1);
        engine.start().unwrap();
        wait_until(|| mock.call_count() == 1 && engine.outstanding() == 0).await;

        assert!(host.completions().is_empty());
        assert!(engine.with_store(|s| s.get("Start").is_none()));
        engine.request("Start", 2);
        wait_until(|| mock.call_count() == 2).await;
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_skip_sentinel_stores_skipped() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Skip);
        let (engine, host) = engine_with(store, &mock, settings());

        engine.request("Bonjour", 1);
        engine.start().unwrap();
        wait_until(|| !host.completions().is_empty()).await;

        assert_eq!(host.completions()[0].1, "Bonjour");
        let entry = engine.with_store(|s| s.get("Bonjour").cloned()).unwrap();
        assert_eq!(entry.tag, Tag::Skipped);
        assert_eq!(engine.request("Bonjour", 2), "Bonjour");
        assert_eq!(mock.call_count(), 1);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_own_ui_requests_are_tagged_mod_ui() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, host) = engine_with(store, &mock, settings());
        host.own_ui.register(7);

        engine.request("Settings", 7);
        engine.start().unwrap();
        wait_until(|| !host.completions().is_empty()).await;

        let entry = engine.with_store(|s| s.get("Settings").cloned()).unwrap();
        assert_eq!(entry.tag, Tag::ModUi);
        assert!(mock.requests()[0].own_ui);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_response_is_cleaned_before_storing() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mut map = HashMap::new();
        map.insert("Start".to_string(), "<think>easy</think>\"Commencer\"".to_string());
        let mock = MockProvider::new(MockMode::Mappings(map));
        let (engine, host) = engine_with(store, &mock, settings());

        engine.request("Start", 1);
        engine.start().unwrap();
        wait_until(|| !host.completions().is_empty()).await;
        assert_eq!(host.completions()[0].1, "Commencer");
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_stop_leaves_queue_untouched() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, _) = engine_with(store, &mock, settings());

        engine.start().unwrap();
        assert!(engine.is_running());
        engine.stop();
        assert!(!engine.is_running());
        tokio::time::sleep(Duration::from_millis(30)).await;

        engine.request("Start", 1);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(mock.call_count(), 0);
        assert_eq!(engine.request_state("Start"), Some(RequestState::Pending));
    }

    #[tokio::test]
    async fn test_restart_right_after_stop_keeps_a_worker() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, host) = engine_with(store, &mock, settings());

        engine.start().unwrap();
        tokio::task::yield_now().await;
        for _ in 0..20 {
            engine.stop();
            tokio::task::yield_now().await;
            engine.start().unwrap();
        }
        assert!(engine.is_running());

        engine.request("Start", 1);
        wait_until(|| !host.completions().is_empty()).await;
        assert_eq!(mock.call_count(), 1);
        engine.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_start_after_worker_exited_spawns_new_one() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, host) = engine_with(store, &mock, settings());

        engine.start().unwrap();
        engine.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;
        engine.request("Start", 1);
        assert_eq!(engine.request_state("Start"), Some(RequestState::Pending));

        engine.start().unwrap();
        wait_until(|| !host.completions().is_empty()).await;
        assert_eq!(mock.call_count(), 1);
        engine.shutdown().await.unwrap();
    }

    #[test]
    fn test_start_requires_runtime() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, _) = engine_with(store, &mock, settings());
        assert!(matches!(engine.start(), Err(TranslateError::Config(_))));
    }

    // ========== Persistence Tests ==========

    #[tokio::test]
    async fn test_flush_if_dirty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.json");
        let store = TranslationStore::new(&path);
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, _) = engine_with(store, &mock, settings());

        assert!(engine.flush_if_dirty());
        assert!(path.exists());
        assert!(!engine.flush_if_dirty());
    }

    #[tokio::test]
    async fn test_shutdown_persists_translations() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.json");
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, host) = engine_with(TranslationStore::new(&path), &mock, settings());

        engine.request("Start", 1);
        engine.start().unwrap();
        wait_until(|| !host.completions().is_empty()).await;
        engine.shutdown().await.unwrap();

        let reloaded = TranslationStore::load(&path);
        assert_eq!(reloaded.get("Start").unwrap().value, "Start_fr");
        assert!(engine.start().is_err());
    }

    #[test]
    fn test_with_store_mut_rebuilds_patterns() {
        let dir = tempdir().unwrap();
        let store = TranslationStore::new(dir.path().join("t.json"));
        let mock = MockProvider::new(MockMode::Suffix);
        let (engine, _) = engine_with(store, &mock, settings());

        assert_eq!(engine.lookup("7 lives"), None);
        engine.with_store_mut(|s| s.set_entry("[v0] lives", "[v0] vies", Tag::Human));
        assert_eq!(engine.lookup("7 lives").as_deref(), Some("7 vies"));
    }

    #[test]
    fn test_own_ui_registry() {
        let registry = OwnUiRegistry::new();
        registry.register(3u32);
        assert!(registry.contains(&3));
        assert!(registry.unregister(&3));
        assert!(!registry.contains(&3));
    }
}
