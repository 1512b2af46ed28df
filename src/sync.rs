//! Synchronization with a remote copy of the store
//!
//! The remote copy is authoritative. Drift is detected by comparing the
//! remote content hash with the hash recorded at the last sync; a pull merges
//! the remote mapping into the local one against the ancestor snapshot, and a
//! push publishes the local mapping and makes it the new baseline.
//!
//! Pulling is split into [`RemoteStore::fetch`] (async, no store access) and
//! [`apply_pull`] (synchronous), so callers holding the store behind a lock,
//! like [`crate::TranslationEngine::with_store_mut`], never await while
//! holding it.

use crate::canonical::content_hash;
use crate::entry::{Entries, Entry};
use crate::error::{TranslateError, TranslateResult};
use crate::merge::{Conflict, MergeStatistics, Resolution, apply_resolutions, merge_entries};
use crate::settings::STORE_FILE_NAME;
use crate::store::{TranslationStore, parse_entries, write_snapshot};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use tracing::{debug, info};

/// The remote mapping together with its identity and content hash
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    pub entries: Entries,
    pub uuid: String,
    pub hash: String,
}

impl RemoteSnapshot {
    pub fn new(entries: Entries, uuid: impl Into<String>) -> Self {
        let uuid = uuid.into();
        let hash = content_hash(&entries, &uuid);
        Self {
            entries,
            uuid,
            hash,
        }
    }

    /// Snapshot of the local store as it would be published
    pub fn from_store(store: &TranslationStore) -> Self {
        Self::new(store.entries().clone(), store.uuid())
    }
}

/// Somewhere a store can be published to and pulled from
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Current remote copy, `None` when nothing has been published yet
    async fn fetch(&self) -> TranslateResult<Option<RemoteSnapshot>>;

    /// Replace the remote copy
    async fn publish(&self, snapshot: &RemoteSnapshot) -> TranslateResult<()>;
}

/// A remote copy kept as a store file in another directory
#[derive(Debug, Clone)]
pub struct DirectoryRemote {
    dir: PathBuf,
}

impl DirectoryRemote {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn file(&self) -> PathBuf {
        self.dir.join(STORE_FILE_NAME)
    }
}

#[async_trait]
impl RemoteStore for DirectoryRemote {
    async fn fetch(&self) -> TranslateResult<Option<RemoteSnapshot>> {
        let path = self.file();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let (entries, uuid) = parse_entries(&content)?;
        let uuid = uuid.filter(|u| !u.is_empty()).ok_or_else(|| {
            TranslateError::Sync(format!("Remote copy {} has no identity", path.display()))
        })?;
        Ok(Some(RemoteSnapshot::new(entries, uuid)))
    }

    async fn publish(&self, snapshot: &RemoteSnapshot) -> TranslateResult<()> {
        write_snapshot(&self.file(), &snapshot.entries, &snapshot.uuid)
    }
}

/// In-memory remote, for tests and embedding
#[derive(Debug, Default)]
pub struct MemoryRemote {
    snapshot: Mutex<Option<RemoteSnapshot>>,
}

impl MemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: RemoteSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Option<RemoteSnapshot> {
        self.snapshot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryRemote {
    async fn fetch(&self) -> TranslateResult<Option<RemoteSnapshot>> {
        Ok(self.snapshot())
    }

    async fn publish(&self, snapshot: &RemoteSnapshot) -> TranslateResult<()> {
        *self.snapshot.lock().unwrap_or_else(PoisonError::into_inner) = Some(snapshot.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteStatus {
    /// The remote hash matches the one recorded at the last sync
    UpToDate,
    /// The remote changed since the last sync (or was never synced)
    RemoteChanged { remote_hash: String },
    NoRemote,
}

/// Compare the remote hash with the last synced one
pub fn remote_status(store: &TranslationStore, snapshot: Option<&RemoteSnapshot>) -> RemoteStatus {
    match snapshot {
        None => RemoteStatus::NoRemote,
        Some(snapshot) if store.last_synced_hash() == Some(snapshot.hash.as_str()) => {
            RemoteStatus::UpToDate
        }
        Some(snapshot) => RemoteStatus::RemoteChanged {
            remote_hash: snapshot.hash.clone(),
        },
    }
}

pub async fn check_remote(
    store: &TranslationStore,
    remote: &dyn RemoteStore,
) -> TranslateResult<RemoteStatus> {
    let snapshot = remote.fetch().await?;
    Ok(remote_status(store, snapshot.as_ref()))
}

/// What a pull did
#[derive(Debug, Clone, PartialEq)]
pub struct PullReport {
    pub statistics: MergeStatistics,
    /// Conflicts left without a decision; the store keeps the local entry
    pub unresolved: Vec<Conflict<Entry>>,
    /// Merged mapping with each undecided key holding its default value,
    /// for display until the pull is repeated with decisions
    pub display: Entries,
    /// Whether the remote copy became the new ancestor
    pub baseline_updated: bool,
    /// Whether the store took over the remote identity
    pub adopted_identity: bool,
    pub remote_hash: String,
}

impl PullReport {
    pub fn is_complete(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Merge a fetched remote copy into the store
///
/// # Arguments
///
/// * `store` - Local store; cleanly merged keys are replaced by the merge result
/// * `snapshot` - The remote copy
/// * `decisions` - Caller decisions for conflicting keys
///
/// # Returns
///
/// The merge statistics and any conflicts still undecided. Undecided keys
/// keep their local entry in the store, so the same conflict comes back on
/// the next pull. Only a clean or fully decided merge moves the ancestor to
/// the remote mapping and records the remote hash.
///
/// A store that has never synced takes over the remote identity on its
/// first complete pull, unless it was forked away from that identity.
pub fn apply_pull(
    store: &mut TranslationStore,
    snapshot: &RemoteSnapshot,
    decisions: &HashMap<String, Resolution>,
) -> PullReport {
    let mut result = merge_entries(store.entries(), &snapshot.entries, store.ancestor());
    let resolved = apply_resolutions(&mut result, decisions);
    debug!(
        conflicts = result.statistics.conflict,
        resolved,
        "Merged remote copy"
    );

    let mut applied = result.merged.clone();
    for conflict in &result.conflicts {
        match &conflict.local {
            Some(local) => applied.insert(conflict.key.clone(), local.clone()),
            None => applied.remove(&conflict.key),
        };
    }
    store.replace_entries(applied);

    let baseline_updated = result.conflicts.is_empty();
    let mut adopted_identity = false;
    if baseline_updated {
        if store.last_synced_hash().is_none()
            && store.uuid() != snapshot.uuid
            && store.forked_from() != Some(snapshot.uuid.as_str())
        {
            debug!(old_uuid = %store.uuid(), new_uuid = %snapshot.uuid, "Adopting remote identity");
            store.adopt_identity(&snapshot.uuid);
            adopted_identity = true;
        }
        store.pin_ancestor_from_remote(&snapshot.entries);
        store.set_last_synced_hash(Some(snapshot.hash.clone()));
    }
    store.recalculate_local_changes();

    info!(
        unchanged = result.statistics.unchanged,
        remote_added = result.statistics.remote_added,
        remote_updated = result.statistics.remote_updated,
        unresolved = result.conflicts.len(),
        local_changes = store.local_changes(),
        "Pulled remote translations"
    );

    PullReport {
        statistics: result.statistics,
        unresolved: result.conflicts,
        display: result.merged,
        baseline_updated,
        adopted_identity,
        remote_hash: snapshot.hash.clone(),
    }
}

/// Fetch the remote copy and merge it into the store
pub async fn pull(
    store: &mut TranslationStore,
    remote: &dyn RemoteStore,
    decisions: &HashMap<String, Resolution>,
) -> TranslateResult<PullReport> {
    let snapshot = remote
        .fetch()
        .await?
        .ok_or_else(|| TranslateError::Sync("No remote copy to pull from".to_string()))?;
    Ok(apply_pull(store, &snapshot, decisions))
}

/// Publish the store and make it the new baseline
///
/// Refuses when the remote changed since the last sync; pull first.
///
/// # Returns
///
/// The hash of the published copy
pub async fn push(store: &mut TranslationStore, remote: &dyn RemoteStore) -> TranslateResult<String> {
    let current = remote.fetch().await?;
    if let RemoteStatus::RemoteChanged { remote_hash } = remote_status(store, current.as_ref()) {
        // A remote identical to what we are about to publish is not drift.
        let snapshot = RemoteSnapshot::from_store(store);
        if remote_hash != snapshot.hash {
            return Err(TranslateError::Sync(
                "Remote copy changed since the last sync; pull before pushing".to_string(),
            ));
        }
    }

    let snapshot = RemoteSnapshot::from_store(store);
    remote.publish(&snapshot).await?;
    store.pin_ancestor();
    store.set_last_synced_hash(Some(snapshot.hash.clone()));
    info!(entries = snapshot.entries.len(), hash = %snapshot.hash, "Pushed translations");
    Ok(snapshot.hash)
}
