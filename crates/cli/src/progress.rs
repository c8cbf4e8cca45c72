//! Cargo-style status output for shipsync
//!
//! ```text
//!     Planned 3 uploads, 1 removal against baseline .shipsync/baseline.snap
//!      Synced 3 paths (12.40 KiB), removed 1 in 0.21s
//!     Bundled 2 files, 1 directory into deploy.zip
//! ```

use std::io::Write as _;
use std::path::Path;
use std::time::Instant;

use shipsync_core::{Plan, Snapshot};
use shipsync_transport::TransferReport;
use shipsync_transport::bundle::BundleSummary;

/// Status verbs (right-aligned to 12 chars)
struct Status;

impl Status {
    const SCANNED: &str = "Scanned";
    const PLANNED: &str = "Planned";
    const SYNCED: &str = "Synced";
    const FRESH: &str = "Fresh";
    const BUNDLED: &str = "Bundled";
    const PENDING: &str = "Pending";
    const COMMITTED: &str = "Committed";
}

/// Print a cargo-style status line
fn print_status(status: &str, message: &str) {
    let mut term = console::Term::stderr();
    let style = console::Style::new().green().bold();
    let _ = writeln!(term, "{:>12} {}", style.apply_to(status), message);
}

fn counted(count: usize, one: &str, many: &str) -> String {
    format!("{count} {}", if count == 1 { one } else { many })
}

/// Tracks elapsed time for one command and prints its milestones
pub struct SyncProgress {
    start: Instant,
}

impl SyncProgress {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    fn elapsed(&self) -> String {
        let elapsed = self.start.elapsed();
        if elapsed.as_secs() >= 1 {
            format!("{:.2}s", elapsed.as_secs_f64())
        } else {
            format!("{}ms", elapsed.as_millis())
        }
    }

    pub fn scanned(&self, snapshot: &Snapshot) {
        let files = snapshot.file_count();
        print_status(
            Status::SCANNED,
            &format!(
                "{}, {} in {}",
                counted(files, "file", "files"),
                counted(snapshot.len() - files, "directory", "directories"),
                self.elapsed()
            ),
        );
    }

    pub fn planned(&self, plan: &Plan) {
        let result = plan.result();
        if result.is_empty() {
            print_status(Status::FRESH, &format!("nothing to do against {}", plan.reference()));
            return;
        }
        print_status(
            Status::PLANNED,
            &format!(
                "{}, {} against {}",
                counted(result.to_upload.len(), "upload", "uploads"),
                counted(result.to_remove.len(), "removal", "removals"),
                plan.reference()
            ),
        );
    }

    pub fn finish(&self, report: &TransferReport) {
        print_status(
            Status::SYNCED,
            &format!(
                "{} ({}), removed {} in {}",
                counted(report.uploaded, "path", "paths"),
                humansize::format_size(report.bytes, humansize::BINARY),
                report.removed,
                self.elapsed()
            ),
        );
    }

    pub fn bundled(&self, summary: BundleSummary, out: &Path) {
        print_status(
            Status::BUNDLED,
            &format!(
                "{}, {} into {}",
                counted(summary.files, "file", "files"),
                counted(summary.directories, "directory", "directories"),
                out.display()
            ),
        );
    }

    pub fn pending(&self, path: &Path) {
        print_status(
            Status::PENDING,
            &format!("snapshot written to {}; run `shipsync commit` after the upload", path.display()),
        );
    }

    pub fn committed(&self, records: usize, baseline: &Path) {
        print_status(
            Status::COMMITTED,
            &format!("{} to {}", counted(records, "record", "records"), baseline.display()),
        );
    }
}

impl Default for SyncProgress {
    fn default() -> Self {
        Self::new()
    }
}
