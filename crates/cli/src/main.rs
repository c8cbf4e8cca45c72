//! shipsync: incremental deployment of a directory tree
//!
//! Fingerprints the local tree, compares it with what the destination last
//! received and transfers only the difference:
//! - MD5 digests, comparable with plain `md5sum` output
//! - Archives (`.jar` by default) compared entry by entry, not byte by byte
//! - Digest cache keyed on modification time
//! - Baseline only advanced after a successful transfer

mod debug_log;
mod progress;

use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, ValueEnum, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use tracing::{debug, info};

use shipsync_core::{
    BaselineFile, Plan, ReferenceSource, RemoteListing, Scanner, SyncConfig, persist_baseline,
};
use shipsync_transport::{LocalTransport, commit_pending, create_bundle, deploy};

use crate::progress::SyncProgress;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "shipsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Incremental deployment driven by content fingerprints")]
#[command(long_about = r#"
shipsync uploads only what changed since the last successful deployment.

Features:
  • Fingerprints    - MD5 per file, per-entry CRC-32 for archives
  • Fast rescans    - unchanged modification times reuse previous digests
  • Safe retries    - the baseline is committed only after the transfer
  • Remote listings - plan against `md5sum` and `unzip -v` output

Examples:
  shipsync sync ./build /srv/app                      Mirror into a directory
  shipsync plan ./build --bundle out.zip --pending p   Package changes for upload
  shipsync commit --pending p --baseline b             Record a finished upload
  shipsync scan ./build --format json                  Print the fingerprints
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    #[default]
    Summary,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Mirror a directory into another directory
    Sync {
        /// Directory to deploy
        source: PathBuf,

        /// Destination directory
        dest: PathBuf,

        /// Baseline file (default: <source>/.shipsync/baseline.snap)
        #[arg(long)]
        baseline: Option<PathBuf>,
    },

    /// Compute what a deployment would transfer
    Plan {
        /// Directory to deploy
        root: PathBuf,

        /// Baseline file (default: <root>/.shipsync/baseline.snap)
        #[arg(long, conflicts_with = "digest_listing")]
        baseline: Option<PathBuf>,

        /// `md5sum` output for every non-archive file at the destination
        #[arg(long)]
        digest_listing: Option<PathBuf>,

        /// `unzip -v` output for every archive at the destination
        #[arg(long, requires = "digest_listing")]
        archive_listing: Option<PathBuf>,

        /// Package the upload set into this zip file
        #[arg(long)]
        bundle: Option<PathBuf>,

        /// Write the local snapshot here, for `shipsync commit`
        #[arg(long)]
        pending: Option<PathBuf>,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Promote a pending snapshot to baseline after an upload succeeded
    Commit {
        /// Snapshot written by `shipsync plan --pending`
        #[arg(long)]
        pending: PathBuf,

        /// Baseline file to replace
        #[arg(long)]
        baseline: PathBuf,
    },

    /// Scan a directory and print its snapshot
    Scan {
        /// Directory to scan
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Show version and build info
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let session = debug_log::init(cli.verbose);
    debug!("Debug log: {}", session.log_path.display());

    match cli.command {
        Commands::Version => {
            eprintln!("shipsync {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Scan { path, format } => {
            scan_command(&path, format)?;
        }
        Commands::Sync {
            source,
            dest,
            baseline,
        } => {
            sync_command(&source, &dest, baseline).await?;
        }
        Commands::Plan {
            root,
            baseline,
            digest_listing,
            archive_listing,
            bundle,
            pending,
            format,
        } => {
            let listings = digest_listing.map(|digests| (digests, archive_listing));
            plan_command(&root, baseline, listings, bundle, pending, format)?;
        }
        Commands::Commit { pending, baseline } => {
            let progress = SyncProgress::new();
            let records = commit_pending(&pending, &baseline)?;
            progress.committed(records, &baseline);
        }
    }

    drop(session.guard);
    Ok(())
}

fn load_config(root: &Path) -> Result<SyncConfig> {
    SyncConfig::load(root).wrap_err_with(|| format!("Failed to load config for {}", root.display()))
}

fn scan_command(path: &Path, format: OutputFormat) -> Result<()> {
    let progress = SyncProgress::new();
    let config = load_config(path)?;
    let snapshot = Scanner::from_config(path, &config)
        .build(None)
        .wrap_err_with(|| format!("Failed to scan {}", path.display()))?;

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&snapshot)?);
        }
        OutputFormat::Summary => {
            if snapshot.len() <= 20 {
                for record in snapshot.records() {
                    match record.digest() {
                        Some(digest) => println!("{digest}  {}", record.path),
                        None => println!("{:32}  {}/", "", record.path),
                    }
                }
            }
            progress.scanned(&snapshot);
        }
    }

    Ok(())
}

async fn sync_command(source: &Path, dest: &Path, baseline: Option<PathBuf>) -> Result<()> {
    let progress = SyncProgress::new();
    let config = load_config(source)?;
    let baseline_path = baseline.unwrap_or_else(|| config.baseline_path(source));

    info!("Syncing {} -> {}", source.display(), dest.display());

    let reference = BaselineFile::open(&baseline_path);
    let plan = Plan::prepare(source, &config, &reference, reference.cache())?;
    progress.planned(&plan);

    let transport = LocalTransport::new(dest);
    let report = deploy(&plan, &transport, &baseline_path).await?;
    progress.finish(&report);
    Ok(())
}

fn plan_command(
    root: &Path,
    baseline: Option<PathBuf>,
    listings: Option<(PathBuf, Option<PathBuf>)>,
    bundle: Option<PathBuf>,
    pending: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let progress = SyncProgress::new();
    let config = load_config(root)?;
    let baseline_path = baseline.unwrap_or_else(|| config.baseline_path(root));

    // The baseline always serves as digest cache, even when a listing is the reference.
    let baseline = BaselineFile::open(&baseline_path);
    let listing = listings
        .map(|(digests, archives)| RemoteListing::from_files(&digests, archives.as_deref()))
        .transpose()?;
    let reference: &dyn ReferenceSource = match &listing {
        Some(listing) => listing,
        None => &baseline,
    };

    let plan = Plan::prepare(root, &config, reference, baseline.cache())?;

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Summary => progress.planned(&plan),
    }

    if let Some(out) = bundle {
        let summary = create_bundle(root, &plan.result().to_upload, &out)?;
        progress.bundled(summary, &out);
    }
    if let Some(path) = pending {
        persist_baseline(&path, plan.local())
            .wrap_err_with(|| format!("Failed to write pending snapshot {}", path.display()))?;
        progress.pending(&path);
    }
    Ok(())
}
