//! Snapshot builder: tree walk via the `ignore` crate, fingerprinting on a rayon pool

use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::UNIX_EPOCH;

use ignore::WalkBuilder;
use ignore::overrides::{Override, OverrideBuilder};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::archive::{self, DEFAULT_ARCHIVE_EXTENSIONS};
use crate::config::{CONFIG_FILE, STATE_DIR, SyncConfig};
use crate::error::{Result, SyncError};
use crate::hash::ContentHash;
use crate::snapshot::{FileKind, FingerprintRecord, Snapshot, normalize_path};

/// Version-control ignore marker, never deployed
pub const VCS_IGNORE_FILE: &str = ".gitignore";

/// A filesystem object found by the walk, not yet fingerprinted
#[derive(Debug)]
struct Discovered {
    absolute: PathBuf,
    relative: String,
    last_modified: i64,
    is_dir: bool,
}

/// Read-only digest lookup built from the previous run's snapshot
pub struct DigestCache<'a> {
    previous: Option<&'a Snapshot>,
    hits: AtomicUsize,
}

impl<'a> DigestCache<'a> {
    #[must_use]
    pub fn new(previous: Option<&'a Snapshot>) -> Self {
        Self {
            previous,
            hits: AtomicUsize::new(0),
        }
    }

    /// Reusable fingerprint for a file whose mtime did not move since the previous run
    #[must_use]
    pub fn lookup(&self, path: &str, last_modified: i64, is_archive: bool) -> Option<&'a FileKind> {
        let record = self.previous?.get(path)?;
        let same_kind = match &record.kind {
            FileKind::Directory => return None,
            FileKind::Plain { .. } => !is_archive,
            FileKind::Archive { .. } => is_archive,
        };
        if !same_kind || record.last_modified != last_modified {
            return None;
        }
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(&record.kind)
    }

    /// Number of successful lookups so far
    #[must_use]
    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }
}

/// Builds snapshots of a synchronization root
#[derive(Debug, Clone)]
pub struct Scanner {
    root: PathBuf,
    archive_extensions: Vec<String>,
    excludes: Vec<String>,
    concurrency: usize,
}

impl Scanner {
    /// Create a scanner with default archive extensions and no extra excludes
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            archive_extensions: DEFAULT_ARCHIVE_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            excludes: Vec::new(),
            concurrency: std::thread::available_parallelism().map_or(4, NonZeroUsize::get),
        }
    }

    /// Create a scanner configured from `.shipsync.toml` settings
    #[must_use]
    pub fn from_config(root: impl Into<PathBuf>, config: &SyncConfig) -> Self {
        let mut scanner = Self::new(root).archive_extensions(config.archive_extensions.clone());
        for pattern in &config.exclude {
            scanner = scanner.exclude(pattern.clone());
        }
        if let Some(limit) = config.concurrency {
            scanner = scanner.concurrency(limit);
        }
        scanner
    }

    /// Replace the set of extensions treated as archives
    #[must_use]
    pub fn archive_extensions(mut self, extensions: Vec<String>) -> Self {
        self.archive_extensions = extensions;
        self
    }

    /// Leave paths matching a root-relative glob out of the snapshot
    #[must_use]
    pub fn exclude(mut self, pattern: impl Into<String>) -> Self {
        self.excludes.push(pattern.into());
        self
    }

    /// Bound the number of fingerprinting threads
    #[must_use]
    pub fn concurrency(mut self, limit: usize) -> Self {
        self.concurrency = limit.max(1);
        self
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Build a snapshot, reusing digests from `previous` for files whose mtime is unchanged.
    ///
    /// # Errors
    /// A root that is missing or not a directory fails with [`SyncError::WalkFailed`].
    /// Any unreadable file, malformed archive or walk failure aborts the build;
    /// symbolic-link cycles are skipped with a warning.
    pub fn build(&self, previous: Option<&Snapshot>) -> Result<Snapshot> {
        self.check_root()?;
        let discovered = self.discover()?;
        let total = discovered.len();
        let cache = DigestCache::new(previous);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.concurrency)
            .thread_name(|i| format!("shipsync-hash-{i}"))
            .build()
            .map_err(|e| SyncError::WalkFailed {
                root: self.root.clone(),
                details: format!("cannot start fingerprinting pool: {e}"),
            })?;

        let records = pool.install(|| {
            discovered
                .into_par_iter()
                .map(|item| self.fingerprint(item, &cache))
                .collect::<Result<Vec<_>>>()
        })?;

        let snapshot = Snapshot::from_records(records)?;
        debug!(
            "Digest cache: {} hits, {} misses",
            cache.hits(),
            snapshot.file_count() - cache.hits()
        );
        info!(
            "Fingerprinted {} entries under {} ({} digests reused)",
            total,
            self.root.display(),
            cache.hits()
        );
        Ok(snapshot)
    }

    /// An empty walk of a file or a missing path must not pass for an empty tree
    fn check_root(&self) -> Result<()> {
        let metadata = std::fs::metadata(&self.root).map_err(|e| SyncError::WalkFailed {
            root: self.root.clone(),
            details: format!("cannot read root: {e}"),
        })?;
        if !metadata.is_dir() {
            return Err(SyncError::WalkFailed {
                root: self.root.clone(),
                details: "root is not a directory".to_string(),
            });
        }
        Ok(())
    }

    /// Map a walk error to an I/O error on the offending path when there is one
    fn walk_error(&self, err: ignore::Error) -> SyncError {
        let path = error_path(&err).map(Path::to_path_buf);
        let details = err.to_string();
        match (path, err.into_io_error()) {
            (Some(path), Some(source)) => SyncError::Io { path, source },
            _ => SyncError::WalkFailed {
                root: self.root.clone(),
                details,
            },
        }
    }

    /// Create a configured walk builder
    fn walk_builder(&self) -> Result<WalkBuilder> {
        let mut builder = WalkBuilder::new(&self.root);
        builder
            .standard_filters(false)
            .follow_links(true)
            .filter_entry(|e| {
                let name = e.file_name();
                // Tool state only lives at the root; nested lookalikes are content.
                let tool_state = e.depth() == 1 && (name == STATE_DIR || name == CONFIG_FILE);
                name != VCS_IGNORE_FILE && !tool_state
            });

        if let Some(overrides) = self.exclude_matcher()? {
            builder.overrides(overrides);
        }
        Ok(builder)
    }

    /// Build an override matcher for excluded patterns
    fn exclude_matcher(&self) -> Result<Option<Override>> {
        if self.excludes.is_empty() {
            return Ok(None);
        }

        let config_error = |e: ignore::Error| SyncError::Config {
            path: self.root.join(CONFIG_FILE),
            details: format!("invalid exclude pattern: {e}"),
        };

        let mut overrides = OverrideBuilder::new(&self.root);
        for pattern in &self.excludes {
            overrides.add(&format!("!{pattern}")).map_err(config_error)?;
        }
        Ok(Some(overrides.build().map_err(config_error)?))
    }

    /// Walk the tree and collect every directory and regular file below the root
    fn discover(&self) -> Result<Vec<Discovered>> {
        let mut found = Vec::new();

        for result in self.walk_builder()?.build() {
            let entry = match result {
                Ok(entry) => entry,
                Err(err) if is_symlink_loop(&err) => {
                    warn!("Skipping symbolic link cycle: {err}");
                    continue;
                }
                Err(err) => return Err(self.walk_error(err)),
            };

            if entry.depth() == 0 {
                continue;
            }

            let path = entry.path();
            let metadata = std::fs::metadata(path).map_err(|e| SyncError::io(path, e))?;
            if !metadata.is_dir() && !metadata.is_file() {
                debug!("Skipping special file {}", path.display());
                continue;
            }

            found.push(Discovered {
                relative: self.relative_path(path)?,
                absolute: path.to_path_buf(),
                last_modified: mtime_millis(&metadata),
                is_dir: metadata.is_dir(),
            });
        }

        Ok(found)
    }

    fn relative_path(&self, path: &Path) -> Result<String> {
        let relative = path
            .strip_prefix(&self.root)
            .map_err(|_| SyncError::InvalidPath {
                path: path.display().to_string(),
                reason: "outside the synchronization root",
            })?;
        let relative = relative.to_str().ok_or_else(|| SyncError::InvalidPath {
            path: relative.display().to_string(),
            reason: "not valid UTF-8",
        })?;
        normalize_path(relative)
    }

    fn fingerprint(&self, item: Discovered, cache: &DigestCache<'_>) -> Result<FingerprintRecord> {
        if item.is_dir {
            return Ok(FingerprintRecord::directory(item.relative, item.last_modified));
        }

        let is_archive = archive::is_archive_path(&item.absolute, &self.archive_extensions);
        let kind = if let Some(kind) = cache.lookup(&item.relative, item.last_modified, is_archive)
        {
            kind.clone()
        } else if is_archive {
            FileKind::archive(archive::inspect(&item.absolute)?)
        } else {
            FileKind::Plain {
                digest: ContentHash::from_file(&item.absolute)?,
            }
        };

        Ok(FingerprintRecord {
            path: item.relative,
            kind,
            last_modified: item.last_modified,
        })
    }
}

fn error_path(err: &ignore::Error) -> Option<&Path> {
    match err {
        ignore::Error::WithPath { path, .. } => Some(path.as_path()),
        ignore::Error::WithDepth { err, .. } | ignore::Error::WithLineNumber { err, .. } => {
            error_path(err)
        }
        _ => None,
    }
}

fn is_symlink_loop(err: &ignore::Error) -> bool {
    match err {
        ignore::Error::Loop { .. } => true,
        ignore::Error::WithPath { err, .. }
        | ignore::Error::WithDepth { err, .. }
        | ignore::Error::WithLineNumber { err, .. } => is_symlink_loop(err),
        _ => false,
    }
}

/// Modification time in milliseconds since the UNIX epoch (0 when unavailable)
#[allow(clippy::cast_possible_truncation)]
fn mtime_millis(metadata: &std::fs::Metadata) -> i64 {
    let Ok(modified) = metadata.modified() else {
        return 0;
    };
    match modified.duration_since(UNIX_EPOCH) {
        Ok(after) => after.as_millis() as i64,
        Err(before) => -(before.duration().as_millis() as i64),
    }
}
