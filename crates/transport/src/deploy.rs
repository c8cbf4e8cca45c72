//! Commit-ordered deploy
//!
//! The new baseline is written only after the transfer returned successfully.
//! A crash or error anywhere before that leaves the previous baseline in place,
//! so the next run recomputes at least the same work.

use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use shipsync_core::codec;
use shipsync_core::{Plan, persist_baseline};
use tracing::info;

use crate::{TransferReport, Transport};

/// Apply `plan` through `transport`, then advance the baseline at `baseline_path`.
///
/// An empty plan skips the transfer but still rewrites the baseline so the next
/// scan sees fresh modification times.
///
/// # Errors
/// Returns the transfer error (baseline untouched) or the persistence error.
pub async fn deploy(
    plan: &Plan,
    transport: &dyn Transport,
    baseline_path: &Path,
) -> Result<TransferReport> {
    let report = if plan.is_empty() {
        info!("Destination {} is up to date", transport.describe());
        TransferReport::default()
    } else {
        info!("Transferring {} changes to {}", plan.result().len(), transport.describe());
        transport
            .apply(plan.root(), plan.result())
            .await
            .wrap_err_with(|| {
                format!(
                    "Transfer to {} failed; baseline {} left unchanged",
                    transport.describe(),
                    baseline_path.display()
                )
            })?
    };

    persist_baseline(baseline_path, plan.local())
        .wrap_err_with(|| format!("Failed to persist baseline {}", baseline_path.display()))?;
    info!("Committed baseline {}", baseline_path.display());
    Ok(report)
}

/// Promote a pending snapshot (written at plan time) to baseline once an
/// external transfer has succeeded. The pending file is removed afterwards.
///
/// # Errors
/// Fails if the pending snapshot is missing or does not decode; a corrupt
/// pending file must never become a baseline.
pub fn commit_pending(pending_path: &Path, baseline_path: &Path) -> Result<usize> {
    let bytes = std::fs::read(pending_path)
        .wrap_err_with(|| format!("Failed to read pending snapshot {}", pending_path.display()))?;
    let snapshot = codec::decode(&bytes)
        .wrap_err_with(|| format!("Pending snapshot {} is unusable", pending_path.display()))?;

    persist_baseline(baseline_path, &snapshot)
        .wrap_err_with(|| format!("Failed to persist baseline {}", baseline_path.display()))?;
    std::fs::remove_file(pending_path)
        .wrap_err_with(|| format!("Failed to remove {}", pending_path.display()))?;

    info!(
        "Committed {} as baseline {} ({} records)",
        pending_path.display(),
        baseline_path.display(),
        snapshot.len()
    );
    Ok(snapshot.len())
}
