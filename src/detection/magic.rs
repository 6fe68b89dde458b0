//! Content signature (magic byte) inspection

use crate::types::ArchiveFormat;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes read for a header sniff (covers the tar `ustar` marker at offset 257)
const HEADER_LEN: usize = 512;

/// Window searched by [`deep_sniff`]
pub const DEEP_SCAN_LEN: usize = 1024 * 1024;

const TAR_MAGIC_OFFSET: usize = 257;

/// Signatures strong enough to be trusted at any offset
const EMBEDDABLE: &[(&[u8], ArchiveFormat)] = &[
    (b"Rar!\x1a\x07\x01\x00", ArchiveFormat::Rar),
    (b"Rar!\x1a\x07\x00", ArchiveFormat::Rar),
    (b"7z\xbc\xaf\x27\x1c", ArchiveFormat::SevenZip),
    (b"\xfd7zXZ\x00", ArchiveFormat::Xz),
    (b"PK\x03\x04", ArchiveFormat::Zip),
];

/// Signatures only trusted at offset zero
const HEADER_ONLY: &[(&[u8], ArchiveFormat)] = &[
    (b"PK\x05\x06", ArchiveFormat::Zip),
    (b"PK\x07\x08", ArchiveFormat::Zip),
    (b"\x1f\x8b", ArchiveFormat::Gzip),
    (b"BZh", ArchiveFormat::Bzip2),
];

/// Classify a buffer that starts at the beginning of a file
pub fn sniff(header: &[u8]) -> Option<ArchiveFormat> {
    for (sig, format) in EMBEDDABLE.iter().chain(HEADER_ONLY) {
        if header.starts_with(sig) {
            return Some(*format);
        }
    }
    if header.len() >= TAR_MAGIC_OFFSET + 5
        && &header[TAR_MAGIC_OFFSET..TAR_MAGIC_OFFSET + 5] == b"ustar"
    {
        return Some(ArchiveFormat::Tar);
    }
    None
}

/// Classify a file by its first bytes
pub fn sniff_file(path: &Path) -> std::io::Result<Option<ArchiveFormat>> {
    let header = read_prefix(path, HEADER_LEN)?;
    Ok(sniff(&header))
}

/// Search the first [`DEEP_SCAN_LEN`] bytes for an archive signature
///
/// Finds archives behind a junk prefix or a self-extractor stub. Returns the format and the
/// byte offset the signature was found at.
pub fn deep_sniff(path: &Path) -> std::io::Result<Option<(ArchiveFormat, usize)>> {
    let buf = read_prefix(path, DEEP_SCAN_LEN)?;
    if let Some(format) = sniff(&buf) {
        return Ok(Some((format, 0)));
    }

    let mut best: Option<(ArchiveFormat, usize)> = None;
    for (sig, format) in EMBEDDABLE {
        if let Some(pos) = find(&buf, sig)
            && best.is_none_or(|(_, b)| pos < b)
        {
            best = Some((*format, pos));
        }
    }
    Ok(best)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn read_prefix(path: &Path, limit: usize) -> std::io::Result<Vec<u8>> {
    let file = File::open(path)?;
    let mut buf = Vec::with_capacity(limit.min(64 * 1024));
    file.take(limit as u64).read_to_end(&mut buf)?;
    Ok(buf)
}
