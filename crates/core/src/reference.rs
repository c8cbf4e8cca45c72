//! Where the destination's last known state comes from
//!
//! Reconciliation only ever sees a [`Snapshot`]; a [`ReferenceSource`] hides
//! whether that snapshot was decoded from a persisted baseline or parsed out of
//! remote command output.

use std::path::{Path, PathBuf};

use crate::codec::{Baseline, load_baseline};
use crate::error::{Result, SyncError};
use crate::listing;
use crate::snapshot::Snapshot;

/// Producer of the reference view for a run
pub trait ReferenceSource {
    /// Human-readable origin, for logs
    fn describe(&self) -> String;

    /// Produce the reference snapshot
    ///
    /// # Errors
    /// Implementations fail only for input that cannot be trusted as a reference.
    fn load(&self) -> Result<Snapshot>;
}

/// A baseline persisted by a previous successful run
#[derive(Debug, Clone)]
pub struct BaselineFile {
    path: PathBuf,
    baseline: Baseline,
}

impl BaselineFile {
    /// Read the baseline at `path` (once). Missing or corrupt files yield an empty reference.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let baseline = load_baseline(&path);
        Self { path, baseline }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn baseline(&self) -> &Baseline {
        &self.baseline
    }

    /// The decoded baseline, usable as the digest cache for the next scan
    #[must_use]
    pub fn cache(&self) -> Option<&Snapshot> {
        self.baseline.snapshot()
    }
}

impl ReferenceSource for BaselineFile {
    fn describe(&self) -> String {
        match &self.baseline {
            Baseline::Loaded(snapshot) => {
                format!("baseline {} ({} records)", self.path.display(), snapshot.len())
            }
            Baseline::Missing => format!("baseline {} (none yet)", self.path.display()),
            Baseline::Corrupt { .. } => format!("baseline {} (unusable)", self.path.display()),
        }
    }

    fn load(&self) -> Result<Snapshot> {
        Ok(self.baseline.clone().into_snapshot())
    }
}

/// Destination state captured as text from a digest-listing command and an
/// archive-listing command
#[derive(Debug, Clone)]
pub struct RemoteListing {
    origin: String,
    digest_text: String,
    archive_text: String,
}

impl RemoteListing {
    #[must_use]
    pub fn new(digest_text: impl Into<String>, archive_text: impl Into<String>) -> Self {
        Self {
            origin: "remote listing".to_string(),
            digest_text: digest_text.into(),
            archive_text: archive_text.into(),
        }
    }

    /// Read both transcripts from disk. Without an archive listing the
    /// destination is assumed to hold no archives.
    ///
    /// # Errors
    /// Returns [`SyncError::Io`] if a listing file cannot be read
    pub fn from_files(digest_path: &Path, archive_path: Option<&Path>) -> Result<Self> {
        let digest_text = std::fs::read_to_string(digest_path)
            .map_err(|e| SyncError::io(digest_path, e))?;
        let archive_text = match archive_path {
            Some(path) => std::fs::read_to_string(path).map_err(|e| SyncError::io(path, e))?,
            None => String::new(),
        };

        let origin = match archive_path {
            Some(path) => format!(
                "listings {} and {}",
                digest_path.display(),
                path.display()
            ),
            None => format!("listing {}", digest_path.display()),
        };

        Ok(Self {
            origin,
            digest_text,
            archive_text,
        })
    }

    /// Parse a pair of transcripts into a reference snapshot
    ///
    /// # Errors
    /// Returns the first malformed digest line or archive block
    pub fn parse(digest_text: &str, archive_text: &str) -> Result<Snapshot> {
        listing::parse(digest_text, archive_text)
    }
}

impl ReferenceSource for RemoteListing {
    fn describe(&self) -> String {
        self.origin.clone()
    }

    fn load(&self) -> Result<Snapshot> {
        Self::parse(&self.digest_text, &self.archive_text)
    }
}
