//! shipsync-core: incremental fingerprinting and reconciliation
//!
//! Builds snapshots of a directory tree, reads the destination's last known
//! state (a persisted baseline or remote listing text) and computes the
//! minimal set of uploads and removals between them.

pub mod archive;
pub mod codec;
pub mod config;
pub mod error;
pub mod hash;
pub mod listing;
pub mod plan;
pub mod reconcile;
pub mod reference;
pub mod scan;
pub mod snapshot;

pub use archive::{ArchiveEntryDiff, ArchiveEntryMap};
pub use codec::{Baseline, load_baseline, persist_baseline};
pub use config::SyncConfig;
pub use error::{Result, SyncError};
pub use hash::ContentHash;
pub use plan::Plan;
pub use reconcile::{ReconciliationResult, reconcile};
pub use reference::{BaselineFile, ReferenceSource, RemoteListing};
pub use scan::Scanner;
pub use snapshot::{FileKind, FingerprintRecord, Snapshot};
