//! Per-game translation dictionaries with three-way sync and a
//! deduplicating machine translation pipeline
//!
//! # Overview
//!
//! 1. **Entry Store** ([`store`]) - one game's source → translation mapping,
//!    with provenance tags, a stable identity, a content hash and the
//!    ancestor snapshot taken at the last sync
//! 2. **Merge Engine** ([`merge`]) - tag-aware three-way merge producing a
//!    merged mapping, conflicts and statistics
//! 3. **Pattern Index** ([`pattern`]) - reuses cached translations for texts
//!    that differ only in their numbers
//! 4. **Dispatch Pipeline** ([`dispatch`], [`engine`]) - a single worker that
//!    sends each distinct text to a [`provider::TranslationProvider`] at most
//!    once at a time and notifies every waiting caller
//! 5. **Sync** ([`sync`]) - pull from and push to a remote copy
//!
//! # Example
//!
//! ```ignore
//! use ludo_translate::{Settings, StoragePaths, TranslationEngine, TranslationStore};
//! use ludo_translate::provider::ChatCompletionProvider;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let paths = StoragePaths::new("ludo-data");
//!     let settings = Settings::load(&paths.settings_file());
//!     let provider = ChatCompletionProvider::from_settings(&settings.provider)?;
//!     let engine = TranslationEngine::new(
//!         TranslationStore::load(paths.store_file()),
//!         Arc::new(provider),
//!         Arc::new(MyHost::default()),
//!         settings,
//!     );
//!     engine.start()?;
//!     let autosave = engine.spawn_autosave();
//!
//!     println!("{}", engine.request("Level 5", 1)); // "Level 5" until the worker answers
//!
//!     engine.shutdown().await?;
//!     autosave.abort();
//!     Ok(())
//! }
//! ```

pub mod canonical;
pub mod cleanup;
pub mod dispatch;
pub mod engine;
pub mod entry;
pub mod error;
pub mod merge;
pub mod numbers;
pub mod pattern;
pub mod provider;
pub mod settings;
pub mod store;
pub mod sync;
pub mod text_type;


pub use canonical::content_hash;
pub use cleanup::clean_response;
pub use dispatch::{DispatchQueue, RequestState};
pub use engine::{OwnUiRegistry, TranslationEngine, TranslationHost, cached_translation};
pub use entry::{Entries, Entry, Priority, Tag};
pub use error::{TranslateError, TranslateResult};
pub use merge::{
    Conflict, ConflictKind, MergeResult, MergeStatistics, Resolution, apply_resolutions,
    merge, merge_entries, merge_values, resolve_all,
};
pub use numbers::{ExtractedNumbers, extract_numbers, restore_numbers};
pub use pattern::PatternIndex;
pub use settings::{Settings, StoragePaths};
pub use store::{GameInfo, TranslationStore};
pub use sync::{
    DirectoryRemote, MemoryRemote, PullReport, RemoteSnapshot, RemoteStatus, RemoteStore,
    apply_pull, check_remote, pull, push,
};
pub use text_type::TextType;
