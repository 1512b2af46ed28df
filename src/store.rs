//! Persistent translation store
//!
//! The store keeps one game's dictionary together with the bookkeeping the
//! sync flow needs:
//!
//! - a stable identity (`_uuid`), regenerated only by [`TranslationStore::fork`]
//!   and taken over from the remote on the first complete pull
//! - the identity it was forked away from, if any (`_forked_from`)
//! - the hash of the remote copy at the last successful sync (`_source.hash`)
//! - the ancestor snapshot: the mapping as it was right after the last
//!   download or upload, persisted in a sibling `*.ancestor.json` file
//! - the number of keys that differ from that ancestor
//!
//! # File format
//!
//! ```json
//! {
//!   "_uuid": "6f1c…",
//!   "_local_changes": 2,
//!   "_source": {"hash": "9a0e…"},
//!   "_game": {"name": "Example Game", "steam_id": "123"},
//!   "New Game": {"v": "Nouvelle partie", "t": "A"},
//!   "Quit": {"v": "Quitter", "t": "V"}
//! }
//! ```
//!
//! Metadata comes first, entries follow in byte-ordinal key order. Older
//! files mapping a key straight to a string are upgraded to AI entries.
//!
//! Loading never fails: a missing or unreadable file yields an empty store
//! with a fresh identity.

use crate::canonical::content_hash;
use crate::entry::{Entries, Entry, Tag, is_metadata_key};
use crate::error::TranslateResult;
use serde_json::{Map, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// Game the dictionary belongs to
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GameInfo {
    pub name: Option<String>,
    pub steam_id: Option<String>,
}

/// Contents of a store file after parsing
#[derive(Debug, Default)]
struct ParsedFile {
    entries: Entries,
    uuid: Option<String>,
    source_hash: Option<String>,
    forked_from: Option<String>,
    game: GameInfo,
    upgraded_legacy: bool,
}

/// Generate a fresh store identity
pub fn new_identity() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Path of the ancestor file that sits next to a store file
///
/// `translations.json` → `translations.ancestor.json`
pub fn ancestor_path_for(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("translations");
    path.with_file_name(format!("{}.ancestor.json", stem))
}

#[derive(Debug, Clone)]
pub struct TranslationStore {
    path: PathBuf,
    entries: Entries,
    ancestor: Option<Entries>,
    uuid: String,
    forked_from: Option<String>,
    last_synced_hash: Option<String>,
    local_changes: usize,
    game: GameInfo,
    dirty: bool,
}

impl TranslationStore {
    /// Create an empty store with a fresh identity, bound to `path`
    ///
    /// The store starts dirty so the new identity reaches disk on the next flush.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            entries: Entries::new(),
            ancestor: None,
            uuid: new_identity(),
            forked_from: None,
            last_synced_hash: None,
            local_changes: 0,
            game: GameInfo::default(),
            dirty: true,
        }
    }

    /// Load a store file and its ancestor
    ///
    /// # Arguments
    ///
    /// * `path` - Location of the main store file
    ///
    /// # Returns
    ///
    /// The loaded store. Missing or corrupt files are logged and replaced by
    /// an empty store that still picks up an existing ancestor file; the
    /// ancestor is optional and silently absent when its file does not exist.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let parsed = match fs::read_to_string(&path) {
            Ok(content) => match parse_store_file(&content) {
                Ok(parsed) => Some(parsed),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Store file is corrupt, starting fresh");
                    None
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No store file yet, starting fresh");
                None
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Store file unreadable, starting fresh");
                None
            }
        };

        let ancestor = load_ancestor(&ancestor_path_for(&path));
        let Some(parsed) = parsed else {
            let mut store = Self::new(path);
            store.ancestor = ancestor;
            store.recalculate_local_changes();
            return store;
        };

        let (uuid, fresh_identity) = match parsed.uuid {
            Some(uuid) if !uuid.is_empty() => (uuid, false),
            _ => {
                warn!(path = %path.display(), "Store file has no identity, generating one");
                (new_identity(), true)
            }
        };

        let mut store = Self {
            path,
            entries: parsed.entries,
            ancestor,
            uuid,
            forked_from: parsed.forked_from,
            last_synced_hash: parsed.source_hash,
            local_changes: 0,
            game: parsed.game,
            dirty: fresh_identity || parsed.upgraded_legacy,
        };
        store.recalculate_local_changes();
        debug!(
            entries = store.entries.len(),
            local_changes = store.local_changes,
            "Loaded translation store"
        );
        store
    }

    /// Write the store to its own path and mark it clean
    pub fn save(&mut self) -> TranslateResult<()> {
        let path = self.path.clone();
        self.save_to(&path)?;
        self.dirty = false;
        Ok(())
    }

    /// Write the store (and its ancestor file) to `path`
    ///
    /// Each file is written to a temporary sibling and renamed over the
    /// target, so a failed write leaves the previous copy untouched.
    pub fn save_to(&self, path: &Path) -> TranslateResult<()> {
        write_atomically(path, &self.render())?;

        let ancestor_path = ancestor_path_for(path);
        match &self.ancestor {
            Some(ancestor) => {
                let rendered =
                    render_file(ancestor, &self.uuid, 0, None, None, &GameInfo::default());
                write_atomically(&ancestor_path, &rendered)?;
            }
            None => {
                if ancestor_path.exists() {
                    fs::remove_file(&ancestor_path)?;
                }
            }
        }
        Ok(())
    }

    /// Render the main store file
    pub fn render(&self) -> String {
        render_file(
            &self.entries,
            &self.uuid,
            self.local_changes,
            self.last_synced_hash.as_deref(),
            self.forked_from.as_deref(),
            &self.game,
        )
    }

    /// Deterministic SHA-256 over the entries and identity
    pub fn compute_content_hash(&self) -> String {
        content_hash(&self.entries, &self.uuid)
    }

    /// Mark the current mapping as the new reconciliation baseline
    pub fn pin_ancestor(&mut self) {
        self.ancestor = Some(self.entries.clone());
        self.local_changes = 0;
        self.dirty = true;
    }

    /// Mark an externally supplied mapping (a fresh pull) as the baseline
    pub fn pin_ancestor_from_remote(&mut self, remote: &Entries) {
        let ancestor = remote
            .iter()
            .filter(|(k, _)| !is_metadata_key(k))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        self.ancestor = Some(ancestor);
        self.local_changes = 0;
        self.dirty = true;
    }

    /// Break lineage with the remote copy
    ///
    /// Assigns a new identity, drops the ancestor so every entry becomes a
    /// local change, and persists immediately.
    pub fn fork(&mut self) -> TranslateResult<()> {
        let old = std::mem::replace(&mut self.uuid, new_identity());
        debug!(old_uuid = %old, new_uuid = %self.uuid, "Forked translation store");
        self.forked_from = Some(old);
        self.ancestor = None;
        self.last_synced_hash = None;
        self.local_changes = self.entries.len();
        self.dirty = true;
        self.save()
    }

    /// Take over the identity of the copy this store now tracks
    pub fn adopt_identity(&mut self, uuid: &str) {
        if self.uuid != uuid {
            self.uuid = uuid.to_string();
            self.dirty = true;
        }
    }

    /// Insert an entry unless the key is already present
    ///
    /// # Returns
    ///
    /// `true` when the entry was inserted. Existing keys are left alone (the
    /// first writer wins), as are metadata-prefixed keys.
    pub fn add_entry(&mut self, key: &str, value: &str, tag: Tag) -> bool {
        if is_metadata_key(key) || self.entries.contains_key(key) {
            return false;
        }
        let entry = Entry::new(value, tag);
        let differs = match &self.ancestor {
            Some(ancestor) => ancestor.get(key) != Some(&entry),
            None => true,
        };
        if differs {
            self.local_changes += 1;
        }
        self.entries.insert(key.to_string(), entry);
        self.dirty = true;
        true
    }

    /// Explicit edit (human translation, validation) of a key
    ///
    /// Overwrites whatever is stored unless the stored entry is immutable.
    /// Returns `false` when the edit was refused.
    pub fn set_entry(&mut self, key: &str, value: &str, tag: Tag) -> bool {
        if is_metadata_key(key) {
            return false;
        }
        let entry = Entry::new(value, tag);
        if let Some(existing) = self.entries.get(key) {
            if existing.is_immutable() && *existing != entry {
                return false;
            }
            if *existing == entry {
                return true;
            }
        }
        self.entries.insert(key.to_string(), entry);
        self.dirty = true;
        self.recalculate_local_changes();
        true
    }

    /// Explicitly delete a key
    pub fn remove_entry(&mut self, key: &str) -> Option<Entry> {
        let removed = self.entries.remove(key);
        if removed.is_some() {
            self.dirty = true;
            self.recalculate_local_changes();
        }
        removed
    }

    /// Replace every entry at once, e.g. with a merge result
    pub fn replace_entries(&mut self, entries: Entries) {
        self.entries = entries
            .into_iter()
            .filter(|(k, _)| !is_metadata_key(k))
            .collect();
        self.dirty = true;
        self.recalculate_local_changes();
    }

    /// Recount keys that differ from the ancestor, deletions included
    pub fn recalculate_local_changes(&mut self) {
        self.local_changes = count_local_changes(&self.entries, self.ancestor.as_ref());
    }

    pub fn get(&self, key: &str) -> Option<&Entry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn entries(&self) -> &Entries {
        &self.entries
    }

    pub fn ancestor(&self) -> Option<&Entries> {
        self.ancestor.as_ref()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Entry)> {
        self.entries.iter()
    }

    pub fn uuid(&self) -> &str {
        &self.uuid
    }

    /// Identity this store was forked away from
    pub fn forked_from(&self) -> Option<&str> {
        self.forked_from.as_deref()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn local_changes(&self) -> usize {
        self.local_changes
    }

    pub fn last_synced_hash(&self) -> Option<&str> {
        self.last_synced_hash.as_deref()
    }

    pub fn set_last_synced_hash(&mut self, hash: Option<String>) {
        self.last_synced_hash = hash;
        self.dirty = true;
    }

    pub fn game(&self) -> &GameInfo {
        &self.game
    }

    pub fn set_game(&mut self, game: GameInfo) {
        self.game = game;
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn mark_clean(&mut self) {
        self.dirty = false;
    }
}

/// Count keys whose entry differs between `current` and `ancestor`
///
/// Without an ancestor every entry is a local change.
pub fn count_local_changes(current: &Entries, ancestor: Option<&Entries>) -> usize {
    let Some(ancestor) = ancestor else {
        return current.keys().filter(|k| !is_metadata_key(k)).count();
    };
    let changed = current
        .iter()
        .filter(|(k, _)| !is_metadata_key(k))
        .filter(|(k, v)| ancestor.get(*k) != Some(*v))
        .count();
    let deleted = ancestor
        .keys()
        .filter(|k| !is_metadata_key(k) && !current.contains_key(*k))
        .count();
    changed + deleted
}

/// Parse the entries of a store-shaped JSON document
///
/// Used for both store files and remote copies.
pub fn parse_entries(content: &str) -> TranslateResult<(Entries, Option<String>)> {
    let parsed = parse_store_file(content)?;
    Ok((parsed.entries, parsed.uuid))
}

/// Write a bare store file holding only `entries` and their identity
///
/// Used for copies that carry no sync bookkeeping of their own, such as a
/// published remote.
pub fn write_snapshot(path: &Path, entries: &Entries, uuid: &str) -> TranslateResult<()> {
    write_atomically(path, &render_file(entries, uuid, 0, None, None, &GameInfo::default()))
}

fn parse_store_file(content: &str) -> TranslateResult<ParsedFile> {
    let json: Value = serde_json::from_str(content)?;
    let obj = json.as_object().ok_or_else(|| {
        crate::error::TranslateError::Config("store root must be a JSON object".to_string())
    })?;

    let mut parsed = ParsedFile::default();
    for (key, value) in obj {
        if is_metadata_key(key) {
            read_metadata(key, value, &mut parsed);
            continue;
        }

        match value {
            Value::String(legacy) => {
                parsed.entries.insert(key.clone(), Entry::ai(legacy.as_str()));
                parsed.upgraded_legacy = true;
            }
            Value::Object(fields) => match parse_entry_object(fields) {
                Some(entry) => {
                    parsed.entries.insert(key.clone(), entry);
                }
                None => warn!(key = %key, "Skipping malformed store entry"),
            },
            _ => warn!(key = %key, "Skipping store entry that is neither string nor object"),
        }
    }
    Ok(parsed)
}

fn parse_entry_object(fields: &Map<String, Value>) -> Option<Entry> {
    let value = fields.get("v")?.as_str()?;
    let tag = fields
        .get("t")
        .and_then(|t| t.as_str())
        .and_then(Tag::from_code)
        .unwrap_or(Tag::Ai);
    Some(Entry::new(value, tag))
}

fn read_metadata(key: &str, value: &Value, parsed: &mut ParsedFile) {
    let as_string = |v: &Value| v.as_str().map(str::to_string);
    match key {
        "_uuid" => parsed.uuid = as_string(value),
        "_source" => parsed.source_hash = value.get("hash").and_then(as_string),
        "_source.hash" => parsed.source_hash = as_string(value),
        "_forked_from" => parsed.forked_from = as_string(value),
        "_game" => {
            parsed.game.name = value.get("name").and_then(as_string);
            parsed.game.steam_id = value.get("steam_id").and_then(as_string);
        }
        "_game.name" => parsed.game.name = as_string(value),
        "_game.steam_id" => parsed.game.steam_id = as_string(value),
        // Recomputed from the ancestor on load.
        "_local_changes" => {}
        other => debug!(key = %other, "Ignoring unknown metadata key"),
    }
}

fn load_ancestor(path: &Path) -> Option<Entries> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ancestor file unreadable, ignoring it");
            return None;
        }
    };
    match parse_store_file(&content) {
        Ok(parsed) => Some(parsed.entries),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Ancestor file is corrupt, ignoring it");
            None
        }
    }
}

fn render_file(
    entries: &Entries,
    uuid: &str,
    local_changes: usize,
    source_hash: Option<&str>,
    forked_from: Option<&str>,
    game: &GameInfo,
) -> String {
    let quote = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string());

    let mut lines = Vec::with_capacity(entries.len() + 4);
    lines.push(format!("  \"_uuid\": {}", quote(uuid)));
    if local_changes > 0 {
        lines.push(format!("  \"_local_changes\": {}", local_changes));
    }
    if let Some(hash) = source_hash {
        lines.push(format!("  \"_source\": {{\"hash\": {}}}", quote(hash)));
    }
    if let Some(forked_from) = forked_from {
        lines.push(format!("  \"_forked_from\": {}", quote(forked_from)));
    }
    if game.name.is_some() || game.steam_id.is_some() {
        let mut fields = Vec::new();
        if let Some(name) = &game.name {
            fields.push(format!("\"name\": {}", quote(name)));
        }
        if let Some(steam_id) = &game.steam_id {
            fields.push(format!("\"steam_id\": {}", quote(steam_id)));
        }
        lines.push(format!("  \"_game\": {{{}}}", fields.join(", ")));
    }

    // BTreeMap<String, _> iterates in byte-ordinal order.
    for (key, entry) in entries.iter().filter(|(k, _)| !is_metadata_key(k)) {
        lines.push(format!(
            "  {}: {{\"v\": {}, \"t\": \"{}\"}}",
            quote(key),
            quote(&entry.value),
            entry.tag.code()
        ));
    }

    format!("{{\n{}\n}}\n", lines.join(",\n"))
}

fn write_atomically(path: &Path, content: &str) -> TranslateResult<()> {
    let parent_dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent_dir)?;

    let mut temp_file = NamedTempFile::new_in(parent_dir)?;
    temp_file.write_all(content.as_bytes())?;
    temp_file.flush()?;
    temp_file.persist(path)?;
    Ok(())
}
