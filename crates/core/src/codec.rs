//! Snapshot codec: persisted baseline format
//!
//! Layout:
//! ```text
//! +-------+---------+------------------------------+
//! | magic | version | zstd(rkyv(StoredSnapshot))   |
//! | SHSN  | 1 byte  | variable                     |
//! +-------+---------+------------------------------+
//! ```
//!
//! Archive digests are not stored; they are recomputed from the entry tables on
//! decode so a baseline can never carry a digest that disagrees with its entries.

use std::io::ErrorKind;
use std::path::Path;

use rkyv::rancor::Error as RkyvError;
use rkyv::util::AlignedVec;
use rkyv::{Archive, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::archive::ArchiveEntryMap;
use crate::error::{Result, SyncError};
use crate::hash::ContentHash;
use crate::snapshot::{FileKind, FingerprintRecord, Snapshot, normalize_path};

/// Leading bytes of every encoded snapshot
pub const MAGIC: &[u8; 4] = b"SHSN";

/// Current format version
pub const FORMAT_VERSION: u8 = 1;

const HEADER_LEN: usize = MAGIC.len() + 1;
const ZSTD_LEVEL: i32 = 3;

#[derive(Archive, Serialize, Deserialize, Debug)]
struct StoredSnapshot {
    records: Vec<StoredRecord>,
}

#[derive(Archive, Serialize, Deserialize, Debug)]
struct StoredRecord {
    path: String,
    last_modified: i64,
    kind: StoredKind,
}

#[derive(Archive, Serialize, Deserialize, Debug)]
enum StoredKind {
    Directory,
    Plain { digest: [u8; 16] },
    Archive { entries: Vec<StoredEntry> },
}

#[derive(Archive, Serialize, Deserialize, Debug)]
struct StoredEntry {
    name: String,
    crc: u32,
}

impl From<&FingerprintRecord> for StoredRecord {
    fn from(record: &FingerprintRecord) -> Self {
        let kind = match &record.kind {
            FileKind::Directory => StoredKind::Directory,
            FileKind::Plain { digest } => StoredKind::Plain {
                digest: *digest.as_bytes(),
            },
            FileKind::Archive { entries, .. } => StoredKind::Archive {
                entries: entries
                    .iter()
                    .map(|(name, crc)| StoredEntry {
                        name: name.to_string(),
                        crc,
                    })
                    .collect(),
            },
        };

        Self {
            path: record.path.clone(),
            last_modified: record.last_modified,
            kind,
        }
    }
}

impl TryFrom<StoredRecord> for FingerprintRecord {
    type Error = SyncError;

    fn try_from(stored: StoredRecord) -> Result<Self> {
        if normalize_path(&stored.path).ok().as_deref() != Some(stored.path.as_str()) {
            return Err(codec_error(format!("record path {:?} is not normalized", stored.path)));
        }

        let kind = match stored.kind {
            StoredKind::Directory => FileKind::Directory,
            StoredKind::Plain { digest } => FileKind::Plain {
                digest: ContentHash::from_raw(digest),
            },
            StoredKind::Archive { entries } => FileKind::archive(
                ArchiveEntryMap::from_entries(
                    &stored.path,
                    entries.into_iter().map(|e| (e.name, e.crc)),
                )
                .map_err(|e| codec_error(e.to_string()))?,
            ),
        };

        Ok(Self {
            path: stored.path,
            kind,
            last_modified: stored.last_modified,
        })
    }
}

/// Serialize a snapshot to the baseline format
///
/// # Errors
/// Returns [`SyncError::Codec`] if serialization or compression fails
pub fn encode(snapshot: &Snapshot) -> Result<Vec<u8>> {
    let stored = StoredSnapshot {
        records: snapshot.records().map(StoredRecord::from).collect(),
    };

    let archived = rkyv::to_bytes::<RkyvError>(&stored)
        .map_err(|e| codec_error(format!("rkyv serialization failed: {e}")))?;
    let compressed = zstd::encode_all(archived.as_slice(), ZSTD_LEVEL)
        .map_err(|e| codec_error(format!("compression failed: {e}")))?;

    let mut out = Vec::with_capacity(HEADER_LEN + compressed.len());
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Deserialize a snapshot, validating every record
///
/// # Errors
/// Returns [`SyncError::Codec`] for a wrong header, truncated or corrupt payload,
/// unnormalized or duplicate paths and duplicate archive entries
pub fn decode(bytes: &[u8]) -> Result<Snapshot> {
    if bytes.len() < HEADER_LEN || &bytes[..MAGIC.len()] != MAGIC {
        return Err(codec_error("not a shipsync snapshot (bad magic)".to_string()));
    }
    let version = bytes[MAGIC.len()];
    if version != FORMAT_VERSION {
        return Err(codec_error(format!("unsupported format version {version}")));
    }

    let raw = zstd::decode_all(&bytes[HEADER_LEN..])
        .map_err(|e| codec_error(format!("decompression failed: {e}")))?;

    // rkyv validates in place and needs the root aligned.
    let mut aligned = AlignedVec::<16>::with_capacity(raw.len());
    aligned.extend_from_slice(&raw);
    let stored = rkyv::from_bytes::<StoredSnapshot, RkyvError>(&aligned)
        .map_err(|e| codec_error(format!("invalid snapshot payload: {e}")))?;

    let records = stored
        .records
        .into_iter()
        .map(FingerprintRecord::try_from)
        .collect::<Result<Vec<_>>>()?;
    Snapshot::from_records(records).map_err(|e| codec_error(e.to_string()))
}

fn codec_error(details: String) -> SyncError {
    SyncError::Codec { details }
}

/// Outcome of reading a persisted baseline
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Baseline {
    Loaded(Snapshot),
    /// No baseline yet: first run
    Missing,
    /// Unreadable or undecodable; treated as empty so the run resyncs everything
    Corrupt { reason: String },
}

impl Baseline {
    /// The reference to reconcile against; anything but a loaded baseline is empty
    #[must_use]
    pub fn into_snapshot(self) -> Snapshot {
        match self {
            Self::Loaded(snapshot) => snapshot,
            Self::Missing => Snapshot::empty(),
            Self::Corrupt { reason } => {
                warn!("Ignoring unusable baseline, every file will be uploaded: {reason}");
                Snapshot::empty()
            }
        }
    }

    /// The loaded snapshot, if any, for use as a digest cache
    #[must_use]
    pub fn snapshot(&self) -> Option<&Snapshot> {
        match self {
            Self::Loaded(snapshot) => Some(snapshot),
            Self::Missing | Self::Corrupt { .. } => None,
        }
    }
}

/// Read the baseline at `path`. Never fails: problems downgrade to an empty baseline.
#[must_use]
pub fn load_baseline(path: &Path) -> Baseline {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            debug!("No baseline at {}, starting from scratch", path.display());
            return Baseline::Missing;
        }
        Err(e) => {
            debug!("Unable to read baseline {}: {e}", path.display());
            return Baseline::Corrupt {
                reason: format!("{}: {e}", path.display()),
            };
        }
    };

    match decode(&bytes) {
        Ok(snapshot) => {
            debug!("Loaded baseline {} ({} records)", path.display(), snapshot.len());
            Baseline::Loaded(snapshot)
        }
        Err(e) => {
            debug!("Unable to decode baseline {}: {e}", path.display());
            Baseline::Corrupt {
                reason: format!("{}: {e}", path.display()),
            }
        }
    }
}

/// Write `snapshot` as the new baseline at `path`, replacing any previous one atomically
///
/// # Errors
/// Returns an error if encoding fails or the file cannot be written or renamed
pub fn persist_baseline(path: &Path, snapshot: &Snapshot) -> Result<()> {
    let bytes = encode(snapshot)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp_path, &bytes).map_err(|e| SyncError::io(&temp_path, e))?;
    std::fs::rename(&temp_path, path).map_err(|e| SyncError::io(path, e))?;
    debug!("Persisted baseline {} ({} records)", path.display(), snapshot.len());
    Ok(())
}
