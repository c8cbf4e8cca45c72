//! Remote listing parser: rebuilds a reference snapshot from plain command output
//!
//! Used when the destination has no baseline file. Two transcripts are expected:
//!
//! - a digest listing, one `md5sum`-style line per non-archive file:
//!   ```text
//!   5eb63bbbe01eeed093cb22bb8f5acdc3  ./index.html
//!   ```
//! - an archive listing, the concatenated `unzip -v` output for every archive:
//!   ```text
//!   Archive:  ./WEB-INF/lib/app.jar
//!    Length   Method    Size  Cmpr    Date    Time   CRC-32   Name
//!   --------  ------  ------- ---- ---------- ----- --------  ----
//!          0  Stored        0   0% 06-25-2003 23:12 00000000  META-INF/
//!         25  Defl:N       27  -8% 06-25-2003 23:12 8f3e6a1c  META-INF/MANIFEST.MF
//!   --------          -------  ---                            -------
//!         25               27  -8%                            2 files
//!   ```

use std::collections::BTreeMap;
use std::collections::btree_map;

use tracing::debug;

use crate::archive::ArchiveEntryMap;
use crate::error::{Result, SyncError};
use crate::hash::ContentHash;
use crate::snapshot::{FingerprintRecord, Snapshot, ancestors, normalize_path};

/// Token that opens one archive block in the archive listing
pub const ARCHIVE_HEADER: &str = "Archive:";

/// Zero-based column holding the CRC-32 in an `unzip -v` row
const CRC_COLUMN: usize = 6;

/// Zero-based column where the entry name starts
const NAME_COLUMN: usize = 7;

/// Parse `<digest><whitespace><path>` lines into a path → digest table.
///
/// # Errors
/// Returns [`SyncError::MalformedDigestLine`] for a line without a delimiter,
/// with an invalid digest or an invalid path, or for a path listed twice.
pub fn parse_digest_listing(text: &str) -> Result<BTreeMap<String, ContentHash>> {
    let mut digests = BTreeMap::new();

    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let malformed = |reason| SyncError::MalformedDigestLine {
            line_no: idx + 1,
            line: line.to_string(),
            reason,
        };

        let line = line.trim_start();
        let split = line
            .find(char::is_whitespace)
            .ok_or_else(|| malformed("missing delimiter"))?;
        let (digest, rest) = line.split_at(split);

        // md5sum marks binary-mode reads with a `*` in front of the name.
        let rest = rest.trim();
        let raw_path = rest.strip_prefix('*').unwrap_or(rest);

        let digest = ContentHash::from_hex(digest).ok_or_else(|| malformed("invalid digest"))?;
        let path = normalize_path(raw_path).map_err(|_| malformed("invalid path"))?;

        if digests.insert(path, digest).is_some() {
            return Err(malformed("path listed twice"));
        }
    }

    Ok(digests)
}

enum BlockState {
    /// Between blocks: totals lines and blank lines are ignored
    Outside,
    /// Saw the header, looking for the opening separator row
    Header { archive: String, line_no: usize },
    /// Inside the table body
    Rows {
        archive: String,
        entries: ArchiveEntryMap,
    },
}

/// Parse concatenated `unzip -v` transcripts into archive path → entry table.
///
/// # Errors
/// Returns [`SyncError::MalformedArchiveListing`] if a block's table cannot be
/// located or a row cannot be read, and [`SyncError::DuplicateArchiveEntry`]
/// for a repeated entry name.
pub fn parse_archive_listing(text: &str) -> Result<BTreeMap<String, ArchiveEntryMap>> {
    let mut archives = BTreeMap::new();
    let mut state = BlockState::Outside;
    let mut last_line = 0;

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        last_line = line_no;
        let line = raw.trim_end_matches('\r');
        let header = line.trim_start().strip_prefix(ARCHIVE_HEADER);

        state = match state {
            BlockState::Outside => match header {
                Some(rest) => BlockState::Header {
                    archive: normalize_archive_path(rest, line_no)?,
                    line_no,
                },
                None => BlockState::Outside,
            },
            BlockState::Header { archive, .. } if header.is_some() => {
                return Err(listing_error(&archive, line_no, "table separator not found"));
            }
            BlockState::Header { archive, line_no: start } => {
                if is_separator(line) {
                    BlockState::Rows {
                        archive,
                        entries: ArchiveEntryMap::new(),
                    }
                } else {
                    BlockState::Header {
                        archive,
                        line_no: start,
                    }
                }
            }
            BlockState::Rows { archive, .. } if header.is_some() => {
                return Err(listing_error(&archive, line_no, "closing separator not found"));
            }
            BlockState::Rows { archive, entries } if is_separator(line) => {
                debug!("Parsed {} entries for remote archive {archive}", entries.len());
                match archives.entry(archive) {
                    btree_map::Entry::Occupied(slot) => {
                        return Err(listing_error(slot.key(), line_no, "archive listed twice"));
                    }
                    btree_map::Entry::Vacant(slot) => {
                        slot.insert(entries);
                    }
                }
                BlockState::Outside
            }
            BlockState::Rows {
                archive,
                mut entries,
            } => {
                parse_row(&archive, &mut entries, line, line_no)?;
                BlockState::Rows { archive, entries }
            }
        };
    }

    match state {
        BlockState::Outside => Ok(archives),
        BlockState::Header { archive, line_no } => Err(listing_error(
            &archive,
            line_no,
            "table separator not found",
        )),
        BlockState::Rows { archive, .. } => Err(listing_error(
            &archive,
            last_line,
            "closing separator not found",
        )),
    }
}

/// Combine both listings into a reference snapshot.
///
/// Archive paths resolve through their entry table; an archive that also shows
/// up in the digest listing is taken from the archive listing. Directories are
/// implied by the listed paths.
///
/// # Errors
/// Propagates any parse error from either listing.
pub fn parse(digest_text: &str, archive_text: &str) -> Result<Snapshot> {
    let digests = parse_digest_listing(digest_text)?;
    let archives = parse_archive_listing(archive_text)?;
    Ok(reference_view(digests, archives))
}

/// Assemble already-parsed listings into a snapshot
#[must_use]
pub fn reference_view(
    digests: BTreeMap<String, ContentHash>,
    archives: BTreeMap<String, ArchiveEntryMap>,
) -> Snapshot {
    let mut records: BTreeMap<String, FingerprintRecord> = BTreeMap::new();

    for (path, digest) in digests {
        if archives.contains_key(&path) {
            debug!("{path} is in both listings, using its archive entries");
            continue;
        }
        records.insert(path.clone(), FingerprintRecord::plain(path, digest, 0));
    }
    for (path, entries) in archives {
        records.insert(path.clone(), FingerprintRecord::archive(path, entries, 0));
    }

    let directories: Vec<String> = records
        .keys()
        .flat_map(|path| ancestors(path))
        .filter(|dir| !records.contains_key(*dir))
        .map(ToString::to_string)
        .collect();
    for dir in directories {
        records
            .entry(dir.clone())
            .or_insert_with(|| FingerprintRecord::directory(dir, 0));
    }

    Snapshot::from_keyed(records)
}

fn parse_row(
    archive: &str,
    entries: &mut ArchiveEntryMap,
    line: &str,
    line_no: usize,
) -> Result<()> {
    if line.trim().is_empty() {
        return Ok(());
    }

    let (columns, name) = split_columns(line, NAME_COLUMN)
        .ok_or_else(|| listing_error(archive, line_no, "row has too few columns"))?;

    // Directory entries carry no content.
    if name.ends_with('/') {
        return Ok(());
    }

    let crc = u32::from_str_radix(columns[CRC_COLUMN], 16)
        .map_err(|_| listing_error(archive, line_no, "invalid CRC-32 column"))?;
    entries.insert(archive, name.to_string(), crc)
}

/// Split off the first `count` whitespace-separated columns and return the remainder
/// with its internal spacing intact.
fn split_columns(line: &str, count: usize) -> Option<(Vec<&str>, &str)> {
    let mut columns = Vec::with_capacity(count);
    let mut rest = line.trim();

    while columns.len() < count {
        let end = rest.find(char::is_whitespace)?;
        columns.push(&rest[..end]);
        rest = rest[end..].trim_start();
    }

    (!rest.is_empty()).then_some((columns, rest))
}

fn is_separator(line: &str) -> bool {
    let trimmed = line.trim();
    !trimmed.is_empty() && trimmed.chars().all(|c| c == '-' || c.is_whitespace())
}

fn normalize_archive_path(raw: &str, line_no: usize) -> Result<String> {
    let raw = raw.trim();
    normalize_path(raw).map_err(|_| listing_error(raw, line_no, "invalid archive path"))
}

fn listing_error(archive: &str, line_no: usize, details: &str) -> SyncError {
    SyncError::MalformedArchiveListing {
        archive: archive.to_string(),
        line_no,
        details: details.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const UNZIP_OUTPUT: &str = "Archive:  ./WEB-INF/lib/commons-fileupload.jar\r
 Length   Method    Size  Cmpr    Date    Time   CRC-32   Name\r
--------  ------  ------- ---- ---------- ----- --------  ----\r
       0  Stored        0   0% 06-25-2003 23:12 00000000  META-INF/\r
     106  Defl:N      101   5% 06-25-2003 23:12 4c1f9b0e  META-INF/MANIFEST.MF\r
    2049  Defl:N      900  56% 06-25-2003 23:12 deadbeef  org/apache/Upload.class\r
--------          -------  ---                            -------\r
    2155             1001  54%                            3 files\r
Archive:  ./WEB-INF/lib/empty.jar
 Length   Method    Size  Cmpr    Date    Time   CRC-32   Name
--------  ------  ------- ---- ---------- ----- --------  ----
--------          -------  ---                            -------
       0                0   0%                            0 files
";

    #[test]
    fn test_parse_digest_listing() {
        let text = "5eb63bbbe01eeed093cb22bb8f5acdc3  ./index.html\r\n\
                    d41d8cd98f00b204e9800998ecf8427e *./css/site.css\n\
                    \n\
                    0cc175b9c0f1b6a831c399e269772661  ./docs/read me.txt\n";
        let digests = parse_digest_listing(text).unwrap();

        assert_eq!(digests.len(), 3);
        assert_eq!(
            digests["index.html"],
            ContentHash::from_bytes(b"hello world")
        );
        assert_eq!(digests["css/site.css"], ContentHash::from_bytes(b""));
        assert!(digests.contains_key("docs/read me.txt"));
    }

    #[test]
    fn test_digest_line_without_delimiter_is_fatal() {
        let err = parse_digest_listing("5eb63bbbe01eeed093cb22bb8f5acdc3  a.txt\nnodelimiter\n")
            .unwrap_err();
        assert!(matches!(
            err,
            SyncError::MalformedDigestLine { line_no: 2, reason: "missing delimiter", .. }
        ));
    }

    #[test]
    fn test_digest_line_with_bad_digest_is_fatal() {
        let err = parse_digest_listing("zzzz  a.txt\n").unwrap_err();
        assert!(matches!(
            err,
            SyncError::MalformedDigestLine { line_no: 1, reason: "invalid digest", .. }
        ));
    }

    #[test]
    fn test_parse_archive_listing() {
        let archives = parse_archive_listing(UNZIP_OUTPUT).unwrap();
        assert_eq!(archives.len(), 2);

        let upload = &archives["WEB-INF/lib/commons-fileupload.jar"];
        assert_eq!(upload.len(), 2);
        assert_eq!(upload.get("META-INF/MANIFEST.MF"), Some(0x4c1f_9b0e));
        assert_eq!(upload.get("org/apache/Upload.class"), Some(0xdead_beef));
        assert!(upload.get("META-INF/").is_none());

        assert!(archives["WEB-INF/lib/empty.jar"].is_empty());
    }

    #[test]
    fn test_entry_names_keep_embedded_spaces() {
        let text = "Archive: a.jar
--------
       5  Stored        5   0% 01-01-2020 00:00 0000000a  docs/read  me.txt
--------
";
        let archives = parse_archive_listing(text).unwrap();
        assert_eq!(archives["a.jar"].get("docs/read  me.txt"), Some(10));
    }

    #[test]
    fn test_missing_table_is_fatal() {
        let text = "Archive:  ./broken.jar\nunzip: cannot find zipfile directory\n";
        let err = parse_archive_listing(text).unwrap_err();
        assert!(
            matches!(&err, SyncError::MalformedArchiveListing { archive, .. } if archive == "broken.jar")
        );

        let text = "Archive:  ./a.jar\n--------\n   1 Stored 1 0% 01-01-2020 00:00 00000001 x\n";
        let err = parse_archive_listing(text).unwrap_err();
        assert!(matches!(err, SyncError::MalformedArchiveListing { line_no: 3, .. }));
    }

    #[test]
    fn test_short_row_and_bad_crc_are_fatal() {
        let short = "Archive: a.jar\n--------\n  1 Stored 1\n--------\n";
        assert!(matches!(
            parse_archive_listing(short),
            Err(SyncError::MalformedArchiveListing { line_no: 3, .. })
        ));

        let bad_crc = "Archive: a.jar\n--------\n 1 Stored 1 0% 01-01-2020 00:00 xyz x.txt\n--------\n";
        assert!(matches!(
            parse_archive_listing(bad_crc),
            Err(SyncError::MalformedArchiveListing { line_no: 3, .. })
        ));
    }

    #[test]
    fn test_duplicate_entry_in_listing_is_fatal() {
        let text = "Archive: a.jar
--------
 1 Stored 1 0% 01-01-2020 00:00 00000001 x.txt
 1 Stored 1 0% 01-01-2020 00:00 00000002 x.txt
--------
";
        assert!(matches!(
            parse_archive_listing(text),
            Err(SyncError::DuplicateArchiveEntry { .. })
        ));
    }

    #[test]
    fn test_reference_view_synthesizes_directories() {
        let digests = "5eb63bbbe01eeed093cb22bb8f5acdc3  ./css/site/main.css\n\
                       5eb63bbbe01eeed093cb22bb8f5acdc3  ./index.html\n";
        let view = parse(digests, UNZIP_OUTPUT).unwrap();

        let paths: Vec<_> = view.paths().collect();
        assert_eq!(
            paths,
            vec![
                "WEB-INF",
                "WEB-INF/lib",
                "WEB-INF/lib/commons-fileupload.jar",
                "WEB-INF/lib/empty.jar",
                "css",
                "css/site",
                "css/site/main.css",
                "index.html",
            ]
        );
        assert!(view.get("css/site").unwrap().is_directory());
        assert!(view.get("WEB-INF/lib/empty.jar").unwrap().kind.entries().is_some());
    }

    #[test]
    fn test_archive_listing_wins_over_digest_listing() {
        let digests = "5eb63bbbe01eeed093cb22bb8f5acdc3  ./WEB-INF/lib/empty.jar\n";
        let view = parse(digests, UNZIP_OUTPUT).unwrap();
        let record = view.get("WEB-INF/lib/empty.jar").unwrap();
        assert_eq!(record.digest(), Some(ArchiveEntryMap::new().digest()));
    }

    #[test]
    fn test_listed_file_is_not_replaced_by_implied_directory() {
        let digests = "5eb63bbbe01eeed093cb22bb8f5acdc3  ./app\n\
                       5eb63bbbe01eeed093cb22bb8f5acdc3  ./app/run.sh\n";
        let view = parse(digests, "").unwrap();

        assert_eq!(view.len(), 2);
        assert!(!view.get("app").unwrap().is_directory());
        assert!(view.contains("app/run.sh"));
    }

    #[test]
    fn test_empty_listings_give_empty_view() {
        assert!(parse("", "").unwrap().is_empty());
    }
}
