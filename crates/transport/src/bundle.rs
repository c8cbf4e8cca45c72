//! Transfer bundle: the upload set packed into one zip for an external uploader

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, BufWriter, Write as _};
use std::path::Path;

use color_eyre::Result;
use color_eyre::eyre::{WrapErr as _, eyre};
use tracing::{debug, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Entry counts of a written bundle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BundleSummary {
    pub files: usize,
    pub directories: usize,
}

/// Pack exactly `paths` (root-relative, slash separated) from `root` into a
/// deflated zip at `out`. Directories become directory entries so empty ones
/// survive extraction.
///
/// # Errors
/// Fails if a listed path is missing under `root` or the archive cannot be written.
pub fn create_bundle(root: &Path, paths: &BTreeSet<String>, out: &Path) -> Result<BundleSummary> {
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("Failed to create {}", parent.display()))?;
    }
    let file =
        File::create(out).wrap_err_with(|| format!("Failed to create bundle {}", out.display()))?;
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut summary = BundleSummary::default();
    for path in paths {
        let source = root.join(path);
        let metadata = std::fs::metadata(&source)
            .wrap_err_with(|| format!("Failed to stat {}", source.display()))?;

        if metadata.is_dir() {
            zip.add_directory(format!("{path}/"), options)
                .wrap_err_with(|| format!("Failed to add directory {path} to bundle"))?;
            summary.directories += 1;
        } else if metadata.is_file() {
            let mut reader = File::open(&source)
                .wrap_err_with(|| format!("Failed to open {}", source.display()))?;
            zip.start_file(path.as_str(), options)
                .wrap_err_with(|| format!("Failed to add {path} to bundle"))?;
            io::copy(&mut reader, &mut zip)
                .wrap_err_with(|| format!("Failed to write {path} to bundle"))?;
            summary.files += 1;
        } else {
            return Err(eyre!("{} is neither a file nor a directory", source.display()));
        }
        debug!("Bundled {path}");
    }

    zip.finish()
        .and_then(|mut writer| writer.flush().map_err(Into::into))
        .wrap_err_with(|| format!("Failed to finalize bundle {}", out.display()))?;
    info!(
        "Wrote bundle {} ({} files, {} directories)",
        out.display(),
        summary.files,
        summary.directories
    );
    Ok(summary)
}
