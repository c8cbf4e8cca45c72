//! Snapshot: a point-in-time fingerprint of a directory tree

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::collections::btree_map;

use serde::{Deserialize, Serialize};

use crate::archive::ArchiveEntryMap;
use crate::error::{Result, SyncError};
use crate::hash::ContentHash;

/// What a record fingerprints
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FileKind {
    Directory,
    /// Ordinary file, digested over its raw bytes
    Plain { digest: ContentHash },
    /// Archive, digested over its canonical entry table
    Archive {
        digest: ContentHash,
        entries: ArchiveEntryMap,
    },
}

impl FileKind {
    /// Fingerprint an archive through its entry table
    #[must_use]
    pub fn archive(entries: ArchiveEntryMap) -> Self {
        Self::Archive {
            digest: entries.digest(),
            entries,
        }
    }

    /// The digest reconciliation compares; `None` for directories
    #[must_use]
    pub fn comparable_digest(&self) -> Option<ContentHash> {
        match self {
            Self::Directory => None,
            Self::Plain { digest } | Self::Archive { digest, .. } => Some(*digest),
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        matches!(self, Self::Directory)
    }

    #[must_use]
    pub fn entries(&self) -> Option<&ArchiveEntryMap> {
        match self {
            Self::Archive { entries, .. } => Some(entries),
            _ => None,
        }
    }
}

/// One filesystem object relative to the synchronization root.
///
/// Equality and ordering look at `(path, is_directory, digest)` only;
/// `last_modified` is a cache hint and never participates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintRecord {
    /// Normalized, slash-separated, root-relative path
    pub path: String,
    pub kind: FileKind,
    /// Milliseconds since the UNIX epoch
    pub last_modified: i64,
}

impl FingerprintRecord {
    #[must_use]
    pub fn directory(path: impl Into<String>, last_modified: i64) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Directory,
            last_modified,
        }
    }

    #[must_use]
    pub fn plain(path: impl Into<String>, digest: ContentHash, last_modified: i64) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::Plain { digest },
            last_modified,
        }
    }

    #[must_use]
    pub fn archive(path: impl Into<String>, entries: ArchiveEntryMap, last_modified: i64) -> Self {
        Self {
            path: path.into(),
            kind: FileKind::archive(entries),
            last_modified,
        }
    }

    #[must_use]
    pub fn is_directory(&self) -> bool {
        self.kind.is_directory()
    }

    #[must_use]
    pub fn digest(&self) -> Option<ContentHash> {
        self.kind.comparable_digest()
    }

    fn key(&self) -> (&str, bool, Option<ContentHash>) {
        (&self.path, self.is_directory(), self.digest())
    }
}

impl PartialEq for FingerprintRecord {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for FingerprintRecord {}

impl PartialOrd for FingerprintRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FingerprintRecord {
    // `Option` orders `None` first, so directory digests sort before file digests.
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

/// Records keyed by relative path, iterated in path order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    records: BTreeMap<String, FingerprintRecord>,
}

impl Snapshot {
    /// Create an empty snapshot
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a snapshot from records, rejecting duplicate paths
    ///
    /// # Errors
    /// Returns [`SyncError::InvalidPath`] if two records share a path
    pub fn from_records(records: impl IntoIterator<Item = FingerprintRecord>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for record in records {
            match map.entry(record.path.clone()) {
                btree_map::Entry::Occupied(_) => {
                    return Err(SyncError::InvalidPath {
                        path: record.path,
                        reason: "duplicate path in snapshot",
                    });
                }
                btree_map::Entry::Vacant(slot) => {
                    slot.insert(record);
                }
            }
        }
        Ok(Self { records: map })
    }

    /// Adopt a map already keyed by each record's path
    pub(crate) fn from_keyed(records: BTreeMap<String, FingerprintRecord>) -> Self {
        debug_assert!(records.iter().all(|(path, record)| *path == record.path));
        Self { records }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[must_use]
    pub fn get(&self, path: &str) -> Option<&FingerprintRecord> {
        self.records.get(path)
    }

    #[must_use]
    pub fn contains(&self, path: &str) -> bool {
        self.records.contains_key(path)
    }

    /// Records in path order
    pub fn records(&self) -> impl Iterator<Item = &FingerprintRecord> {
        self.records.values()
    }

    /// Paths in sorted order
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    /// Number of non-directory records
    #[must_use]
    pub fn file_count(&self) -> usize {
        self.records().filter(|r| !r.is_directory()).count()
    }
}

/// Normalize a root-relative path to slash-separated form.
///
/// Accepts `./a//b`, `a\b`, `a/./b` and `a/x/../b`; rejects empty paths,
/// absolute paths and paths that climb above the root.
///
/// # Errors
/// Returns [`SyncError::InvalidPath`] with the reason for rejection
pub fn normalize_path(raw: &str) -> Result<String> {
    let invalid = |reason| SyncError::InvalidPath {
        path: raw.to_string(),
        reason,
    };

    let unified = raw.replace('\\', "/");
    if unified.starts_with('/') {
        return Err(invalid("absolute path"));
    }

    let mut parts: Vec<&str> = Vec::new();
    for part in unified.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                if parts.pop().is_none() {
                    return Err(invalid("escapes the synchronization root"));
                }
            }
            other => parts.push(other),
        }
    }

    if parts.is_empty() {
        return Err(invalid("empty path"));
    }
    Ok(parts.join("/"))
}

/// Every proper ancestor of a normalized path, shallowest first (`a/b/c` → `a`, `a/b`)
pub fn ancestors(path: &str) -> impl Iterator<Item = &str> {
    path.match_indices('/').map(move |(idx, _)| &path[..idx])
}
