//! Three-way merge of translation mappings
//!
//! Reconciles a local mapping with a remote one using the ancestor snapshot
//! (the mapping as of the last sync) as the common base. Every key in the
//! union of the three mappings is classified by where it is present:
//!
//! | present in             | outcome                                                    |
//! |------------------------|------------------------------------------------------------|
//! | local only             | local addition                                             |
//! | remote only            | remote addition                                            |
//! | ancestor only          | deleted on both sides                                      |
//! | local + remote         | unchanged / priority winner / one-sided update / conflict  |
//! | local + ancestor       | accepted remote deletion, or conflict if local changed     |
//! | remote + ancestor      | accepted local deletion, or conflict if remote changed     |
//!
//! The merge is a pure function: it never touches a live store. It works on
//! anything implementing [`MergeValue`]; plain strings all share one priority,
//! while [`Entry`] values let higher-priority tags win without a conflict.
//!
//! Merge is not commutative. Wherever a conflict needs a display value before
//! a decision is made, the remote side is preferred (except when the remote
//! deleted the key).

use crate::entry::{Entry, Priority, is_metadata_key};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

/// A value the merge engine can compare and rank
pub trait MergeValue: Clone + PartialEq + fmt::Debug {
    /// Replacement priority; the higher side wins without a conflict
    fn merge_priority(&self) -> Priority;

    /// Immutable values never lose a priority comparison
    fn is_immutable(&self) -> bool {
        false
    }
}

impl MergeValue for String {
    fn merge_priority(&self) -> Priority {
        Priority::Ai
    }
}

impl MergeValue for Entry {
    fn merge_priority(&self) -> Priority {
        self.priority()
    }

    fn is_immutable(&self) -> bool {
        Entry::is_immutable(self)
    }
}

/// Why a key could not be merged automatically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConflictKind {
    /// Both sides changed the key since the ancestor
    BothModified,
    /// Both sides have the key, with different values, and there is no ancestor for it
    NoAncestor,
    /// Local changed the key, remote deleted it
    LocalModifiedRemoteDeleted,
    /// Remote changed the key, local deleted it
    RemoteModifiedLocalDeleted,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConflictKind::BothModified => "both modified",
            ConflictKind::NoAncestor => "no common ancestor",
            ConflictKind::LocalModifiedRemoteDeleted => "modified locally, deleted remotely",
            ConflictKind::RemoteModifiedLocalDeleted => "modified remotely, deleted locally",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Conflict<V> {
    pub key: String,
    pub local: Option<V>,
    pub remote: Option<V>,
    pub ancestor: Option<V>,
    pub kind: ConflictKind,
}

impl<V: MergeValue> Conflict<V> {
    /// Value shown until someone decides: remote, unless remote deleted the key
    pub fn default_value(&self) -> Option<&V> {
        match self.kind {
            ConflictKind::LocalModifiedRemoteDeleted => self.local.as_ref(),
            _ => self.remote.as_ref(),
        }
    }
}

/// One counter per classification outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStatistics {
    pub unchanged: usize,
    pub local_only: usize,
    pub local_modified: usize,
    pub remote_added: usize,
    pub remote_updated: usize,
    pub deleted: usize,
    pub conflict: usize,
    /// Conflicts settled afterwards through [`apply_resolutions`]
    pub resolved: usize,
}

impl MergeStatistics {
    /// Number of keys classified (resolutions not included)
    pub fn total(&self) -> usize {
        self.unchanged
            + self.local_only
            + self.local_modified
            + self.remote_added
            + self.remote_updated
            + self.deleted
            + self.conflict
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MergeResult<V> {
    /// Merged mapping; conflicting keys hold their default display value
    pub merged: BTreeMap<String, V>,
    /// Conflicts still waiting for a decision
    pub conflicts: Vec<Conflict<V>>,
    pub statistics: MergeStatistics,
}

impl<V> MergeResult<V> {
    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

/// Decision for a single conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Resolution {
    KeepLocal,
    TakeRemote,
    /// Currently behaves like `KeepLocal`
    KeepBoth,
}

enum Outcome<V> {
    Take(V),
    Drop,
    Conflict(ConflictKind),
}

/// Merge `local` and `remote` against `ancestor`
///
/// # Arguments
///
/// * `local` - The mapping on this device
/// * `remote` - The authoritative remote copy
/// * `ancestor` - The mapping at the last sync, `None` if there never was one
///
/// # Returns
///
/// The merged mapping, the conflicts needing a decision, and statistics.
/// Metadata-prefixed keys are ignored on all three sides.
///
/// # Example
///
/// ```ignore
/// let result = merge(&local, &remote, Some(&ancestor));
/// if result.has_conflicts() {
///     // ask the user, then apply_resolutions(&mut result, &decisions)
/// }
/// ```
pub fn merge<V: MergeValue>(
    local: &BTreeMap<String, V>,
    remote: &BTreeMap<String, V>,
    ancestor: Option<&BTreeMap<String, V>>,
) -> MergeResult<V> {
    let mut keys: BTreeSet<&String> = BTreeSet::new();
    keys.extend(local.keys());
    keys.extend(remote.keys());
    if let Some(ancestor) = ancestor {
        keys.extend(ancestor.keys());
    }

    let mut merged = BTreeMap::new();
    let mut conflicts = Vec::new();
    let mut stats = MergeStatistics::default();

    for key in keys.into_iter().filter(|k| !is_metadata_key(k)) {
        let l = local.get(key);
        let r = remote.get(key);
        let a = ancestor.and_then(|m| m.get(key));

        let outcome = classify(l, r, a, &mut stats);
        match outcome {
            Outcome::Take(value) => {
                merged.insert(key.clone(), value);
            }
            Outcome::Drop => {}
            Outcome::Conflict(kind) => {
                stats.conflict += 1;
                let conflict = Conflict {
                    key: key.clone(),
                    local: l.cloned(),
                    remote: r.cloned(),
                    ancestor: a.cloned(),
                    kind,
                };
                if let Some(value) = conflict.default_value() {
                    merged.insert(key.clone(), value.clone());
                }
                conflicts.push(conflict);
            }
        }
    }

    MergeResult {
        merged,
        conflicts,
        statistics: stats,
    }
}

fn classify<V: MergeValue>(
    local: Option<&V>,
    remote: Option<&V>,
    ancestor: Option<&V>,
    stats: &mut MergeStatistics,
) -> Outcome<V> {
    match (local, remote, ancestor) {
        (Some(l), None, None) => {
            stats.local_only += 1;
            Outcome::Take(l.clone())
        }
        (None, Some(r), None) => {
            stats.remote_added += 1;
            Outcome::Take(r.clone())
        }
        (None, None, Some(_)) => {
            stats.deleted += 1;
            Outcome::Drop
        }
        (Some(l), Some(r), a) => classify_both_present(l, r, a, stats),
        (Some(l), None, Some(a)) => {
            if l == a {
                stats.deleted += 1;
                Outcome::Drop
            } else {
                Outcome::Conflict(ConflictKind::LocalModifiedRemoteDeleted)
            }
        }
        (None, Some(r), Some(a)) => {
            if r == a {
                stats.deleted += 1;
                Outcome::Drop
            } else {
                Outcome::Conflict(ConflictKind::RemoteModifiedLocalDeleted)
            }
        }
        // Keys come from the union, so at least one side is present.
        (None, None, None) => Outcome::Drop,
    }
}

fn classify_both_present<V: MergeValue>(
    local: &V,
    remote: &V,
    ancestor: Option<&V>,
    stats: &mut MergeStatistics,
) -> Outcome<V> {
    if local == remote {
        stats.unchanged += 1;
        return Outcome::Take(local.clone());
    }

    let local_priority = local.merge_priority();
    let remote_priority = remote.merge_priority();
    if local_priority > remote_priority && !remote.is_immutable() {
        stats.local_modified += 1;
        return Outcome::Take(local.clone());
    }
    if remote_priority > local_priority && !local.is_immutable() {
        stats.remote_updated += 1;
        return Outcome::Take(remote.clone());
    }

    match ancestor {
        Some(a) if local == a => {
            stats.remote_updated += 1;
            Outcome::Take(remote.clone())
        }
        Some(a) if remote == a => {
            stats.local_modified += 1;
            Outcome::Take(local.clone())
        }
        Some(_) => Outcome::Conflict(ConflictKind::BothModified),
        None => Outcome::Conflict(ConflictKind::NoAncestor),
    }
}

/// Merge bare string mappings (every value has the same priority)
pub fn merge_values(
    local: &BTreeMap<String, String>,
    remote: &BTreeMap<String, String>,
    ancestor: Option<&BTreeMap<String, String>>,
) -> MergeResult<String> {
    merge(local, remote, ancestor)
}

/// Tag-aware merge of store entries
pub fn merge_entries(
    local: &BTreeMap<String, Entry>,
    remote: &BTreeMap<String, Entry>,
    ancestor: Option<&BTreeMap<String, Entry>>,
) -> MergeResult<Entry> {
    merge(local, remote, ancestor)
}

/// Settle conflicts with the caller's decisions
///
/// Each decided conflict writes the chosen side into `merged` (or removes
/// the key if the chosen side deleted it), leaves the pending list and bumps
/// `statistics.resolved`. Conflicts without a decision stay pending.
///
/// # Returns
///
/// The number of conflicts resolved by this call
pub fn apply_resolutions<V: MergeValue>(
    result: &mut MergeResult<V>,
    decisions: &HashMap<String, Resolution>,
) -> usize {
    let pending = std::mem::take(&mut result.conflicts);
    let mut resolved = 0;

    for conflict in pending {
        let Some(resolution) = decisions.get(&conflict.key) else {
            result.conflicts.push(conflict);
            continue;
        };
        let chosen = match resolution {
            Resolution::KeepLocal | Resolution::KeepBoth => conflict.local,
            Resolution::TakeRemote => conflict.remote,
        };
        match chosen {
            Some(value) => {
                result.merged.insert(conflict.key, value);
            }
            None => {
                result.merged.remove(&conflict.key);
            }
        }
        resolved += 1;
    }

    result.statistics.resolved += resolved;
    resolved
}

/// Settle every pending conflict the same way
pub fn resolve_all<V: MergeValue>(result: &mut MergeResult<V>, resolution: Resolution) -> usize {
    let decisions: HashMap<String, Resolution> = result
        .conflicts
        .iter()
        .map(|c| (c.key.clone(), resolution))
        .collect();
    apply_resolutions(result, &decisions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::Tag;

    fn strings(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn entries(pairs: &[(&str, &str, Tag)]) -> BTreeMap<String, Entry> {
        pairs
            .iter()
            .map(|(k, v, t)| (k.to_string(), Entry::new(*v, *t)))
            .collect()
    }

    // ========== Presence Cases ==========

    #[test]
    fn test_idempotent_merge() {
        let s = strings(&[("a", "1"), ("b", "2"), ("c", "3")]);
        let result = merge_values(&s, &s, Some(&s));
        assert_eq!(result.merged, s);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.statistics.unchanged, 3);
        assert_eq!(result.statistics.total(), 3);
    }

    #[test]
    fn test_local_addition() {
        let result = merge_values(&strings(&[("k", "x")]), &strings(&[]), Some(&strings(&[])));
        assert_eq!(result.merged, strings(&[("k", "x")]));
        assert_eq!(result.statistics.local_only, 1);
    }

    #[test]
    fn test_remote_addition() {
        let result = merge_values(&strings(&[]), &strings(&[("k", "y")]), None);
        assert_eq!(result.merged, strings(&[("k", "y")]));
        assert_eq!(result.statistics.remote_added, 1);
    }

    #[test]
    fn test_deleted_on_both_sides() {
        let result = merge_values(&strings(&[]), &strings(&[]), Some(&strings(&[("k", "x")])));
        assert!(!result.merged.contains_key("k"));
        assert_eq!(result.statistics.deleted, 1);
        assert!(result.conflicts.is_empty());
    }

    #[test]
    fn test_remote_updated_when_local_untouched() {
        let result = merge_values(
            &strings(&[("k", "x")]),
            &strings(&[("k", "y")]),
            Some(&strings(&[("k", "x")])),
        );
        assert_eq!(result.merged, strings(&[("k", "y")]));
        assert!(result.conflicts.is_empty());
        assert_eq!(result.statistics.remote_updated, 1);
    }

    #[test]
    fn test_local_updated_when_remote_untouched() {
        let result = merge_values(
            &strings(&[("k", "y")]),
            &strings(&[("k", "x")]),
            Some(&strings(&[("k", "x")])),
        );
        assert_eq!(result.merged, strings(&[("k", "y")]));
        assert_eq!(result.statistics.local_modified, 1);
    }

    #[test]
    fn test_not_commutative() {
        let local = strings(&[("k", "x")]);
        let remote = strings(&[("k", "y")]);
        let ancestor = strings(&[("k", "x")]);
        let forward = merge_values(&local, &remote, Some(&ancestor));
        let backward = merge_values(&remote, &local, Some(&ancestor));
        assert_eq!(forward.merged["k"], "y");
        assert_eq!(backward.merged["k"], "y");
        assert_eq!(forward.statistics.remote_updated, 1);
        assert_eq!(backward.statistics.local_modified, 1);
    }

    // ========== Conflict Cases ==========

    #[test]
    fn test_no_ancestor_conflict_defaults_to_remote() {
        let result = merge_values(&strings(&[("k", "x")]), &strings(&[("k", "y")]), None);
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].kind, ConflictKind::NoAncestor);
        assert_eq!(result.merged["k"], "y");
        assert_eq!(result.statistics.conflict, 1);
    }

    #[test]
    fn test_key_missing_from_ancestor_is_no_ancestor_conflict() {
        let result = merge_values(
            &strings(&[("k", "x")]),
            &strings(&[("k", "y")]),
            Some(&strings(&[("other", "z")])),
        );
        assert_eq!(result.conflicts[0].kind, ConflictKind::NoAncestor);
    }

    #[test]
    fn test_both_modified_conflict() {
        let result = merge_values(
            &strings(&[("k", "x")]),
            &strings(&[("k", "y")]),
            Some(&strings(&[("k", "z")])),
        );
        let conflict = &result.conflicts[0];
        assert_eq!(conflict.kind, ConflictKind::BothModified);
        assert_eq!(conflict.local.as_deref(), Some("x"));
        assert_eq!(conflict.remote.as_deref(), Some("y"));
        assert_eq!(conflict.ancestor.as_deref(), Some("z"));
        assert_eq!(result.merged["k"], "y");
    }

    #[test]
    fn test_remote_deletion_accepted() {
        let result = merge_values(&strings(&[("k", "x")]), &strings(&[]), Some(&strings(&[("k", "x")])));
        assert!(result.merged.is_empty());
        assert_eq!(result.statistics.deleted, 1);
    }

    #[test]
    fn test_local_modified_remote_deleted() {
        let result = merge_values(&strings(&[("k", "new")]), &strings(&[]), Some(&strings(&[("k", "old")])));
        assert_eq!(result.conflicts[0].kind, ConflictKind::LocalModifiedRemoteDeleted);
        assert_eq!(result.merged["k"], "new", "default keeps the local value");
    }

    #[test]
    fn test_local_deletion_accepted() {
        let result = merge_values(&strings(&[]), &strings(&[("k", "x")]), Some(&strings(&[("k", "x")])));
        assert!(result.merged.is_empty());
        assert_eq!(result.statistics.deleted, 1);
    }

    #[test]
    fn test_remote_modified_local_deleted() {
        let result = merge_values(&strings(&[]), &strings(&[("k", "new")]), Some(&strings(&[("k", "old")])));
        assert_eq!(result.conflicts[0].kind, ConflictKind::RemoteModifiedLocalDeleted);
        assert_eq!(result.merged["k"], "new");
    }

    #[test]
    fn test_metadata_keys_are_ignored() {
        let local = strings(&[("_uuid", "a"), ("k", "x")]);
        let remote = strings(&[("_uuid", "b"), ("k", "x")]);
        let result = merge_values(&local, &remote, None);
        assert!(!result.merged.contains_key("_uuid"));
        assert_eq!(result.statistics.total(), 1);
    }

    // ========== Tag Priority ==========

    #[test]
    fn test_human_outranks_ai() {
        let local = entries(&[("k", "a", Tag::Human)]);
        let remote = entries(&[("k", "b", Tag::Ai)]);
        let result = merge_entries(&local, &remote, None);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.merged["k"], Entry::human("a"));
        assert_eq!(result.statistics.local_modified, 1);
    }

    #[test]
    fn test_validated_remote_beats_local_ai() {
        let local = entries(&[("k", "a", Tag::Ai)]);
        let remote = entries(&[("k", "b", Tag::Validated)]);
        let result = merge_entries(&local, &remote, Some(&local));
        assert_eq!(result.merged["k"], Entry::new("b", Tag::Validated));
        assert_eq!(result.statistics.remote_updated, 1);
    }

    #[test]
    fn test_same_value_different_tag_is_not_unchanged() {
        let local = entries(&[("k", "a", Tag::Ai)]);
        let remote = entries(&[("k", "a", Tag::Validated)]);
        let result = merge_entries(&local, &remote, None);
        assert_eq!(result.merged["k"].tag, Tag::Validated);
        assert_eq!(result.statistics.unchanged, 0);
    }

    #[test]
    fn test_human_placeholder_loses_to_ai() {
        let local = entries(&[("k", "", Tag::Human)]);
        let remote = entries(&[("k", "hola", Tag::Ai)]);
        let result = merge_entries(&local, &remote, None);
        assert_eq!(result.merged["k"], Entry::ai("hola"));
    }

    #[test]
    fn test_immutable_never_loses() {
        for immutable in [Tag::Skipped, Tag::ModUi] {
            for other in [Tag::Ai, Tag::Human, Tag::Validated] {
                let local = entries(&[("k", "orig", immutable)]);
                let remote = entries(&[("k", "changed", other)]);
                let result = merge_entries(&local, &remote, Some(&remote));
                assert_eq!(result.merged["k"].tag, immutable);
                assert!(result.conflicts.is_empty());

                let result = merge_entries(&remote, &local, Some(&remote));
                assert_eq!(result.merged["k"].tag, immutable);
                assert!(result.conflicts.is_empty());
            }
        }
    }

    #[test]
    fn test_equal_priority_falls_back_to_ancestor() {
        let local = entries(&[("k", "x", Tag::Ai)]);
        let remote = entries(&[("k", "y", Tag::Ai)]);
        let result = merge_entries(&local, &remote, Some(&local));
        assert_eq!(result.merged["k"], Entry::ai("y"));
        assert!(result.conflicts.is_empty());
    }

    // ========== Resolutions ==========

    fn conflicted() -> MergeResult<String> {
        merge_values(
            &strings(&[("a", "la"), ("b", "lb"), ("c", "lc")]),
            &strings(&[("a", "ra"), ("b", "rb")]),
            Some(&strings(&[("a", "aa"), ("b", "ab"), ("c", "ac")])),
        )
    }

    #[test]
    fn test_apply_resolutions() {
        let mut result = conflicted();
        assert_eq!(result.conflicts.len(), 3);

        let mut decisions = HashMap::new();
        decisions.insert("a".to_string(), Resolution::KeepLocal);
        decisions.insert("c".to_string(), Resolution::TakeRemote);
        let resolved = apply_resolutions(&mut result, &decisions);

        assert_eq!(resolved, 2);
        assert_eq!(result.statistics.resolved, 2);
        assert_eq!(result.merged["a"], "la");
        assert!(!result.merged.contains_key("c"), "remote deleted c");
        assert_eq!(result.conflicts.len(), 1);
        assert_eq!(result.conflicts[0].key, "b");
        assert_eq!(result.merged["b"], "rb");
    }

    #[test]
    fn test_keep_both_degrades_to_keep_local() {
        let mut result = conflicted();
        let mut decisions = HashMap::new();
        decisions.insert("b".to_string(), Resolution::KeepBoth);
        apply_resolutions(&mut result, &decisions);
        assert_eq!(result.merged["b"], "lb");
    }

    #[test]
    fn test_resolve_all() {
        let mut result = conflicted();
        assert_eq!(resolve_all(&mut result, Resolution::TakeRemote), 3);
        assert!(!result.has_conflicts());
        assert_eq!(result.merged, strings(&[("a", "ra"), ("b", "rb")]));
    }
}
