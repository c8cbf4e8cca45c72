//! shipsync-transport: applying a reconciliation to a destination
//!
//! The core crate decides *what* moves; this crate moves it. A [`Transport`]
//! applies a [`ReconciliationResult`] and [`deploy`] makes sure the baseline is
//! only advanced after that succeeded.

pub mod bundle;
pub mod deploy;
pub mod local;

use std::path::Path;

use async_trait::async_trait;
use color_eyre::Result;
use shipsync_core::ReconciliationResult;

pub use bundle::create_bundle;
pub use deploy::{commit_pending, deploy};
pub use local::LocalTransport;

/// What a transfer actually did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// Paths created or overwritten at the destination
    pub uploaded: usize,
    /// Paths deleted from the destination
    pub removed: usize,
    /// File bytes written
    pub bytes: u64,
}

/// Something that can make a destination match the local tree
#[async_trait]
pub trait Transport: Send + Sync {
    /// Human-readable destination, for logs
    fn describe(&self) -> String;

    /// Delete every `to_remove` path, then copy every `to_upload` path from `source_root`.
    ///
    /// Any error aborts the transfer; the caller must not commit a baseline.
    async fn apply(
        &self,
        source_root: &Path,
        result: &ReconciliationResult,
    ) -> Result<TransferReport>;
}
