//! Planning: scan, load the reference, reconcile
//!
//! A [`Plan`] is everything a run knows before touching the destination. The
//! local snapshot it carries becomes the next baseline once the transfer
//! succeeds.

use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::Serialize;
use tracing::info;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::reconcile::{ReconciliationResult, reconcile};
use crate::reference::ReferenceSource;
use crate::scan::Scanner;
use crate::snapshot::Snapshot;

/// Outcome of the planning phase for one synchronization root
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    root: PathBuf,
    reference: String,
    #[serde(skip)]
    local: Snapshot,
    #[serde(flatten)]
    result: ReconciliationResult,
}

impl Plan {
    /// Fingerprint `root`, load the reference and reconcile the two.
    ///
    /// `previous` is only used as a digest cache; it never decides what is uploaded.
    ///
    /// # Errors
    /// Fails if the local scan fails or the reference cannot be produced.
    pub fn prepare(
        root: &Path,
        config: &SyncConfig,
        reference: &dyn ReferenceSource,
        previous: Option<&Snapshot>,
    ) -> Result<Self> {
        let started = Instant::now();

        info!("Scanning {}", root.display());
        let local = Scanner::from_config(root, config).build(previous)?;

        let description = reference.describe();
        info!("Loading reference from {description}");
        let reference_snapshot = reference.load()?;

        let result = reconcile(&reference_snapshot, &local);
        result.log_summary();
        info!(
            "Planned {} uploads and {} removals in {:.2?}",
            result.to_upload.len(),
            result.to_remove.len(),
            started.elapsed()
        );

        Ok(Self {
            root: root.to_path_buf(),
            reference: description,
            local,
            result,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Description of the reference this plan was computed against
    #[must_use]
    pub fn reference(&self) -> &str {
        &self.reference
    }

    /// The local snapshot, i.e. the pending baseline
    #[must_use]
    pub fn local(&self) -> &Snapshot {
        &self.local
    }

    #[must_use]
    pub fn result(&self) -> &ReconciliationResult {
        &self.result
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.result.is_empty()
    }

    #[must_use]
    pub fn into_parts(self) -> (Snapshot, ReconciliationResult) {
        (self.local, self.result)
    }
}
