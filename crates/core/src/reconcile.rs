//! Reconciliation: the minimal upload/remove sets turning a reference state into the local one

use std::collections::BTreeSet;
use std::fmt::Display;

use serde::Serialize;
use tracing::{debug, info};

use crate::archive::ArchiveEntryDiff;
use crate::snapshot::Snapshot;

/// How many items [`log_paths`] prints at `info` before falling back to `debug`
pub const MAX_LOGGED_PATHS: usize = 10;

/// Entry-level explanation of why an archive is re-uploaded (diagnostics only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveChange {
    pub path: String,
    pub diff: ArchiveEntryDiff,
}

/// Paths to transfer and paths to delete, both sorted and disjoint
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconciliationResult {
    pub to_upload: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub archive_changes: Vec<ArchiveChange>,
}

impl ReconciliationResult {
    /// No-op deployment
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.to_upload.is_empty() && self.to_remove.is_empty()
    }

    /// Total number of paths to act on
    #[must_use]
    pub fn len(&self) -> usize {
        self.to_upload.len() + self.to_remove.len()
    }

    /// Log the outcome the way an operator wants to read it
    pub fn log_summary(&self) {
        if self.is_empty() {
            info!("Nothing to do: local files are identical to the reference");
            return;
        }

        for change in &self.archive_changes {
            info!("Archive {} contains changed entries", change.path);
            log_paths("new entries in archive", &change.diff.added);
            log_paths("entries removed from archive", &change.diff.removed);
            log_paths(
                "entries modified in archive",
                change.diff.modified.iter().map(|m| &m.name),
            );
        }
        log_paths("paths to upload", &self.to_upload);
        log_paths("paths to remove", &self.to_remove);
    }
}

/// Compare `reference` (what the destination has) against `local` (what it should have).
///
/// Keys on the relative path; records are equal when kind and digest agree,
/// modification times never matter. Directories reconcile on presence alone.
/// A changed archive is uploaded whole; its entry-level diff is only recorded
/// in [`ReconciliationResult::archive_changes`].
#[must_use]
pub fn reconcile(reference: &Snapshot, local: &Snapshot) -> ReconciliationResult {
    let mut result = ReconciliationResult::default();

    for record in reference.records() {
        if !local.contains(&record.path) {
            result.to_remove.insert(record.path.clone());
        }
    }

    for record in local.records() {
        match reference.get(&record.path) {
            None => {
                result.to_upload.insert(record.path.clone());
            }
            Some(previous) if previous == record => {}
            Some(previous) => {
                if let (Some(old), Some(new)) = (previous.kind.entries(), record.kind.entries()) {
                    result.archive_changes.push(ArchiveChange {
                        path: record.path.clone(),
                        diff: old.diff(new),
                    });
                }
                result.to_upload.insert(record.path.clone());
            }
        }
    }

    debug_assert!(result.to_upload.is_disjoint(&result.to_remove));
    debug!(
        upload = result.to_upload.len(),
        remove = result.to_remove.len(),
        "reconciled {} reference records against {} local records",
        reference.len(),
        local.len()
    );
    result
}

/// Print a banner with the count, the first [`MAX_LOGGED_PATHS`] items at `info`
/// and the rest at `debug`. Empty collections print nothing.
pub fn log_paths<I>(header: &str, items: I)
where
    I: IntoIterator,
    I::Item: Display,
{
    let items: Vec<_> = items.into_iter().collect();
    if items.is_empty() {
        return;
    }

    info!("-------- {header}: {} --------", items.len());
    for (idx, item) in items.iter().enumerate() {
        if idx < MAX_LOGGED_PATHS {
            info!("{item}");
        } else {
            debug!("{item}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{ArchiveEntryMap, ModifiedEntry};
    use crate::hash::ContentHash;
    use crate::snapshot::FingerprintRecord;

    fn plain(path: &str, content: &[u8], mtime: i64) -> FingerprintRecord {
        FingerprintRecord::plain(path, ContentHash::from_bytes(content), mtime)
    }

    fn snapshot(records: Vec<FingerprintRecord>) -> Snapshot {
        Snapshot::from_records(records).unwrap()
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn test_reconcile_against_self_is_empty() {
        let local = snapshot(vec![
            plain("a.txt", b"a", 1),
            FingerprintRecord::directory("b", 1),
            plain("b/c.txt", b"c", 1),
        ]);
        let result = reconcile(&local, &local);
        assert!(result.is_empty());
        assert_eq!(result.len(), 0);
    }

    #[test]
    fn test_first_run_uploads_everything() {
        let local = snapshot(vec![
            plain("a.txt", b"a", 1),
            FingerprintRecord::directory("b", 1),
            plain("b/c.txt", b"c", 1),
        ]);
        let result = reconcile(&Snapshot::empty(), &local);
        assert_eq!(result.to_upload, set(&["a.txt", "b", "b/c.txt"]));
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn test_modify_and_delete() {
        let reference = snapshot(vec![plain("a.txt", b"d1", 1), plain("old.txt", b"d2", 1)]);
        let local = snapshot(vec![plain("a.txt", b"d1-prime", 1)]);

        let result = reconcile(&reference, &local);
        assert_eq!(result.to_upload, set(&["a.txt"]));
        assert_eq!(result.to_remove, set(&["old.txt"]));
        assert!(result.to_upload.is_disjoint(&result.to_remove));
    }

    #[test]
    fn test_mtime_only_change_is_not_a_diff() {
        let reference = snapshot(vec![plain("a.txt", b"same", 1_000)]);
        let local = snapshot(vec![plain("a.txt", b"same", 2_000)]);
        assert!(reconcile(&reference, &local).is_empty());
    }

    #[test]
    fn test_directories_reconcile_on_presence() {
        let reference = snapshot(vec![
            FingerprintRecord::directory("gone", 1),
            FingerprintRecord::directory("kept", 1),
        ]);
        let local = snapshot(vec![
            FingerprintRecord::directory("kept", 99),
            FingerprintRecord::directory("fresh", 1),
        ]);

        let result = reconcile(&reference, &local);
        assert_eq!(result.to_upload, set(&["fresh"]));
        assert_eq!(result.to_remove, set(&["gone"]));
    }

    #[test]
    fn test_file_replaced_by_directory_is_uploaded() {
        let reference = snapshot(vec![plain("x", b"file", 1)]);
        let local = snapshot(vec![FingerprintRecord::directory("x", 1)]);
        let result = reconcile(&reference, &local);
        assert_eq!(result.to_upload, set(&["x"]));
        assert!(result.to_remove.is_empty());
    }

    #[test]
    fn test_archive_with_one_changed_entry_is_uploaded_once() {
        let old = ArchiveEntryMap::from_entries("app.jar", [("A.class", 1), ("B.class", 2)])
            .unwrap();
        let new = ArchiveEntryMap::from_entries("app.jar", [("A.class", 1), ("B.class", 3)])
            .unwrap();
        let reference = snapshot(vec![FingerprintRecord::archive("lib/app.jar", old, 1)]);
        let local = snapshot(vec![FingerprintRecord::archive("lib/app.jar", new, 1)]);

        let result = reconcile(&reference, &local);
        assert_eq!(result.to_upload, set(&["lib/app.jar"]));
        assert_eq!(result.archive_changes.len(), 1);
        assert_eq!(
            result.archive_changes[0].diff.modified,
            vec![ModifiedEntry {
                name: "B.class".to_string(),
                old_crc: 2,
                new_crc: 3
            }]
        );
    }

    #[test]
    fn test_identical_archive_entries_produce_no_diff() {
        let entries = ArchiveEntryMap::from_entries("app.jar", [("A.class", 1)]).unwrap();
        let reference = snapshot(vec![FingerprintRecord::archive("app.jar", entries.clone(), 1)]);
        let local = snapshot(vec![FingerprintRecord::archive("app.jar", entries, 555)]);
        let result = reconcile(&reference, &local);
        assert!(result.is_empty());
        assert!(result.archive_changes.is_empty());
    }

    #[test]
    fn test_results_are_sorted() {
        let local = snapshot(vec![plain("z", b"z", 1), plain("a", b"a", 1), plain("m", b"m", 1)]);
        let result = reconcile(&Snapshot::empty(), &local);
        let ordered: Vec<_> = result.to_upload.iter().map(String::as_str).collect();
        assert_eq!(ordered, vec!["a", "m", "z"]);
    }
}
