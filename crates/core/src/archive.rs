//! Archive inspection: per-entry CRC tables read from a zip central directory
//!
//! Packaging tools rewrite archives on every build (timestamps, compression
//! levels), so the bytes of a jar change even when nothing inside it did.
//! The CRC-32 stored for each entry only depends on the uncompressed payload,
//! which makes the sorted `(name, crc)` table a stable fingerprint.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::hash::ContentHash;

/// Archive extensions recognised when no configuration overrides them
pub const DEFAULT_ARCHIVE_EXTENSIONS: &[&str] = &["jar"];

/// Sorted mapping from archive entry name to the stored CRC-32 of that entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArchiveEntryMap {
    entries: BTreeMap<String, u32>,
}

impl ArchiveEntryMap {
    /// Create an empty entry map
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a map from `(name, crc)` pairs, rejecting duplicate names
    ///
    /// # Errors
    /// Returns [`SyncError::DuplicateArchiveEntry`] if a name occurs twice
    pub fn from_entries<I, S>(archive: &str, entries: I) -> Result<Self>
    where
        I: IntoIterator<Item = (S, u32)>,
        S: Into<String>,
    {
        let mut map = Self::new();
        for (name, crc) in entries {
            map.insert(archive, name.into(), crc)?;
        }
        Ok(map)
    }

    /// Record one entry. `archive` is only used for the error message.
    ///
    /// # Errors
    /// Returns [`SyncError::DuplicateArchiveEntry`] if `name` is already present
    pub fn insert(&mut self, archive: &str, name: String, crc: u32) -> Result<()> {
        if self.entries.contains_key(&name) {
            return Err(SyncError::DuplicateArchiveEntry {
                archive: archive.to_string(),
                entry: name,
            });
        }
        self.entries.insert(name, crc);
        Ok(())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<u32> {
        self.entries.get(name).copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, u32)> {
        self.entries.iter().map(|(name, crc)| (name.as_str(), *crc))
    }

    /// Order-independent serialization: one `name\0crc\n` line per entry, sorted by name
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let mut out = String::new();
        for (name, crc) in &self.entries {
            let _ = writeln!(out, "{name}\0{crc:08x}");
        }
        out.into_bytes()
    }

    /// Digest of the canonical serialization
    #[must_use]
    pub fn digest(&self) -> ContentHash {
        ContentHash::from_bytes(&self.canonical_bytes())
    }

    /// Entry-level differences going from `self` (old) to `new`
    #[must_use]
    pub fn diff(&self, new: &Self) -> ArchiveEntryDiff {
        let mut diff = ArchiveEntryDiff::default();

        for (name, &new_crc) in &new.entries {
            match self.entries.get(name) {
                None => diff.added.push(name.clone()),
                Some(&old_crc) if old_crc != new_crc => diff.modified.push(ModifiedEntry {
                    name: name.clone(),
                    old_crc,
                    new_crc,
                }),
                Some(_) => {}
            }
        }
        for name in self.entries.keys() {
            if !new.entries.contains_key(name) {
                diff.removed.push(name.clone());
            }
        }

        diff
    }
}

/// An entry whose stored CRC changed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModifiedEntry {
    pub name: String,
    pub old_crc: u32,
    pub new_crc: u32,
}

/// Entry-level comparison of two versions of one archive, all lists sorted by name
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveEntryDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<ModifiedEntry>,
}

impl ArchiveEntryDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }
}

/// Whether `path` names an archive according to its (case-insensitive) extension
#[must_use]
pub fn is_archive_path<S: AsRef<str>>(path: &Path, extensions: &[S]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            extensions
                .iter()
                .any(|candidate| candidate.as_ref().eq_ignore_ascii_case(ext))
        })
}

/// Read the per-entry CRC table of a zip/jar file.
///
/// Uses the raw entry view so no payload is decompressed; directory entries
/// are skipped.
///
/// # Errors
/// Returns [`SyncError::Io`] if the file cannot be opened,
/// [`SyncError::MalformedArchive`] if the central directory cannot be read and
/// [`SyncError::DuplicateArchiveEntry`] if an entry name occurs twice in the
/// central directory.
pub fn inspect(path: &Path) -> Result<ArchiveEntryMap> {
    let file = std::fs::File::open(path).map_err(|e| SyncError::io(path, e))?;
    let mut reader = BufReader::new(file);
    let declared = locate_central_directory(&mut reader).map_err(|e| SyncError::io(path, e))?;
    let mut archive = zip::ZipArchive::new(reader).map_err(|e| malformed(path, &e))?;

    let label = path.display().to_string();
    let mut map = ArchiveEntryMap::new();

    for index in 0..archive.len() {
        let entry = archive.by_index_raw(index).map_err(|e| malformed(path, &e))?;
        if entry.is_dir() {
            continue;
        }
        map.insert(&label, entry.name().to_string(), entry.crc32())?;
    }

    // The zip reader keeps one entry per name; a repeated name only shows up as
    // a central directory holding more records than the reader exposes.
    let listed = archive.len();
    if let Some(directory) = declared.filter(|d| d.entries != listed as u64) {
        return Err(unlisted_records(path, label, archive.into_inner(), &directory, listed));
    }

    tracing::trace!(archive = %label, entries = map.len(), "inspected archive");
    Ok(map)
}

const EOCD_SIGNATURE: u32 = 0x0605_4b50;
const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
const ZIP64_EOCD_SIGNATURE: u32 = 0x0606_4b50;
const CENTRAL_HEADER_SIGNATURE: u32 = 0x0201_4b50;
const EOCD_LEN: usize = 22;
const ZIP64_LOCATOR_LEN: usize = 20;
const ZIP64_EOCD_LEN: usize = 56;
const CENTRAL_HEADER_LEN: usize = 46;
/// End record plus the longest possible archive comment
const MAX_TAIL: usize = EOCD_LEN + u16::MAX as usize;

/// Central directory as declared by the end-of-central-directory record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CentralDirectory {
    entries: u64,
    offset: u64,
    size: u64,
}

fn le_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn le_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn le_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

fn read_at<R: Read + Seek>(reader: &mut R, offset: u64, len: usize) -> io::Result<Vec<u8>> {
    reader.seek(SeekFrom::Start(offset))?;
    let mut buf = vec![0u8; len];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Find the (zip64-aware) end record. `None` when there is none to find; the
/// zip reader reports that case itself.
fn locate_central_directory<R: Read + Seek>(reader: &mut R) -> io::Result<Option<CentralDirectory>> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    let tail_len = usize::try_from(file_len).map_or(MAX_TAIL, |len| len.min(MAX_TAIL));
    if tail_len < EOCD_LEN {
        return Ok(None);
    }
    let tail_start = file_len - tail_len as u64;
    let tail = read_at(reader, tail_start, tail_len)?;

    let Some(pos) = (0..=tail.len() - EOCD_LEN)
        .rev()
        .find(|&i| le_u32(&tail, i) == EOCD_SIGNATURE)
    else {
        return Ok(None);
    };

    let eocd = &tail[pos..];
    let mut directory = CentralDirectory {
        entries: u64::from(le_u16(eocd, 10)),
        size: u64::from(le_u32(eocd, 12)),
        offset: u64::from(le_u32(eocd, 16)),
    };

    let saturated = le_u16(eocd, 10) == u16::MAX
        || le_u32(eocd, 12) == u32::MAX
        || le_u32(eocd, 16) == u32::MAX;
    let eocd_offset = tail_start + pos as u64;
    if saturated && eocd_offset >= ZIP64_LOCATOR_LEN as u64 {
        let locator = read_at(reader, eocd_offset - ZIP64_LOCATOR_LEN as u64, ZIP64_LOCATOR_LEN)?;
        if le_u32(&locator, 0) == ZIP64_LOCATOR_SIGNATURE {
            let record = read_at(reader, le_u64(&locator, 8), ZIP64_EOCD_LEN)?;
            if le_u32(&record, 0) == ZIP64_EOCD_SIGNATURE {
                directory = CentralDirectory {
                    entries: le_u64(&record, 32),
                    size: le_u64(&record, 40),
                    offset: le_u64(&record, 48),
                };
            }
        }
    }

    Ok(Some(directory))
}

/// Every entry name recorded in the central directory, repeats included
fn central_directory_names<R: Read + Seek>(
    reader: &mut R,
    directory: &CentralDirectory,
) -> io::Result<Vec<String>> {
    let file_len = reader.seek(SeekFrom::End(0))?;
    if directory.offset.saturating_add(directory.size) > file_len {
        return Ok(Vec::new());
    }
    let size = usize::try_from(directory.size).map_err(io::Error::other)?;
    let raw = read_at(reader, directory.offset, size)?;

    let mut names = Vec::new();
    let mut at = 0;
    while at + CENTRAL_HEADER_LEN <= raw.len() && le_u32(&raw, at) == CENTRAL_HEADER_SIGNATURE {
        let name_len = usize::from(le_u16(&raw, at + 28));
        let extra_len = usize::from(le_u16(&raw, at + 30));
        let comment_len = usize::from(le_u16(&raw, at + 32));
        let name_start = at + CENTRAL_HEADER_LEN;
        let Some(name) = raw.get(name_start..name_start + name_len) else {
            break;
        };
        names.push(String::from_utf8_lossy(name).into_owned());
        at = name_start + name_len + extra_len + comment_len;
    }
    Ok(names)
}

/// Explain why the central directory holds more records than the reader listed
fn unlisted_records<R: Read + Seek>(
    path: &Path,
    label: String,
    mut reader: R,
    directory: &CentralDirectory,
    listed: usize,
) -> SyncError {
    let names = match central_directory_names(&mut reader, directory) {
        Ok(names) => names,
        Err(e) => return SyncError::io(path, e),
    };

    let mut seen = BTreeSet::new();
    for name in names {
        if !seen.insert(name.clone()) {
            return SyncError::DuplicateArchiveEntry {
                archive: label,
                entry: name,
            };
        }
    }

    SyncError::MalformedArchive {
        path: path.to_path_buf(),
        details: format!(
            "central directory declares {} entries but {listed} are readable",
            directory.entries
        ),
    }
}

fn malformed(path: &Path, err: &zip::result::ZipError) -> SyncError {
    SyncError::MalformedArchive {
        path: path.to_path_buf(),
        details: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use zip::CompressionMethod;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, method: CompressionMethod, entries: &[(&str, &[u8])]) {
        let file = std::fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        let options = SimpleFileOptions::default().compression_method(method);
        zip.add_directory("META-INF/", options).unwrap();
        for (name, data) in entries {
            zip.start_file(*name, options).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn test_inspect_reads_stored_crcs_and_skips_directories() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("lib.jar");
        write_zip(
            &jar,
            CompressionMethod::Deflated,
            &[("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n"), ("a/B.class", b"cafebabe")],
        );

        let map = inspect(&jar).unwrap();
        assert_eq!(map.len(), 2);
        assert!(map.get("META-INF/").is_none());
        // CRC-32 of "cafebabe"
        assert_eq!(map.get("a/B.class"), Some(0x2bd1_2977));
    }

    #[test]
    fn test_digest_ignores_compression_method() {
        let dir = tempfile::tempdir().unwrap();
        let stored = dir.path().join("stored.jar");
        let deflated = dir.path().join("deflated.jar");
        let entries: &[(&str, &[u8])] = &[("x.txt", b"same content"), ("y.txt", b"other")];
        write_zip(&stored, CompressionMethod::Stored, entries);
        write_zip(&deflated, CompressionMethod::Deflated, entries);

        assert_ne!(std::fs::read(&stored).unwrap(), std::fs::read(&deflated).unwrap());
        assert_eq!(inspect(&stored).unwrap().digest(), inspect(&deflated).unwrap().digest());
    }

    #[test]
    fn test_inspect_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("broken.jar");
        std::fs::write(&jar, b"definitely not a zip").unwrap();

        let err = inspect(&jar).unwrap_err();
        assert!(matches!(err, SyncError::MalformedArchive { .. }));
    }

    #[test]
    fn test_inspect_rejects_repeated_entry_name() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("dup.jar");
        write_zip(
            &jar,
            CompressionMethod::Stored,
            &[("a.class", b"one"), ("b.class", b"two")],
        );

        // `ZipWriter` refuses repeated names, so rename the second entry in
        // place; both names have the same length and offsets stay valid.
        let mut bytes = std::fs::read(&jar).unwrap();
        let mut renamed = 0;
        for i in 0..=bytes.len() - b"b.class".len() {
            if &bytes[i..i + 7] == b"b.class" {
                bytes[i..i + 7].copy_from_slice(b"a.class");
                renamed += 1;
            }
        }
        assert_eq!(renamed, 2, "local and central headers");
        std::fs::write(&jar, &bytes).unwrap();

        let err = inspect(&jar).unwrap_err();
        assert!(
            matches!(&err, SyncError::DuplicateArchiveEntry { entry, .. } if entry == "a.class"),
            "{err:?}"
        );
    }

    #[test]
    fn test_central_directory_count_matches_reader() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("ok.jar");
        write_zip(&jar, CompressionMethod::Deflated, &[("x", b"1"), ("y", b"2")]);

        let mut file = std::fs::File::open(&jar).unwrap();
        let directory = locate_central_directory(&mut file).unwrap().unwrap();
        // Two files plus the META-INF/ directory entry.
        assert_eq!(directory.entries, 3);
        let names = central_directory_names(&mut file, &directory).unwrap();
        assert_eq!(names, vec!["META-INF/", "x", "y"]);
    }

    #[test]
    fn test_duplicate_entry_is_rejected() {
        let err = ArchiveEntryMap::from_entries("app.jar", [("a.class", 1), ("a.class", 2)])
            .unwrap_err();
        assert!(
            matches!(&err, SyncError::DuplicateArchiveEntry { archive, entry } if archive == "app.jar" && entry == "a.class")
        );
    }

    #[test]
    fn test_canonical_form_is_insertion_order_independent() {
        let a = ArchiveEntryMap::from_entries("a.jar", [("z", 1), ("a", 2)]).unwrap();
        let b = ArchiveEntryMap::from_entries("b.jar", [("a", 2), ("z", 1)]).unwrap();
        assert_eq!(a.canonical_bytes(), b.canonical_bytes());
        assert_eq!(a.digest(), b.digest());

        let c = ArchiveEntryMap::from_entries("c.jar", [("a", 2), ("z", 3)]).unwrap();
        assert_ne!(a.digest(), c.digest());
    }

    #[test]
    fn test_entry_diff() {
        let old = ArchiveEntryMap::from_entries("x.jar", [("keep", 1), ("gone", 2), ("edit", 3)])
            .unwrap();
        let new =
            ArchiveEntryMap::from_entries("x.jar", [("keep", 1), ("edit", 4), ("new", 5)]).unwrap();

        let diff = old.diff(&new);
        assert_eq!(diff.added, vec!["new".to_string()]);
        assert_eq!(diff.removed, vec!["gone".to_string()]);
        assert_eq!(
            diff.modified,
            vec![ModifiedEntry {
                name: "edit".to_string(),
                old_crc: 3,
                new_crc: 4
            }]
        );
        assert!(old.diff(&old).is_empty());
    }

    #[test]
    fn test_is_archive_path() {
        assert!(is_archive_path(Path::new("lib/app.jar"), DEFAULT_ARCHIVE_EXTENSIONS));
        assert!(is_archive_path(Path::new("lib/APP.JAR"), DEFAULT_ARCHIVE_EXTENSIONS));
        assert!(!is_archive_path(Path::new("lib/app.jar.txt"), DEFAULT_ARCHIVE_EXTENSIONS));
        assert!(!is_archive_path(Path::new("jar"), DEFAULT_ARCHIVE_EXTENSIONS));
        assert!(is_archive_path(Path::new("x.war"), &["jar", "war"]));
    }
}
