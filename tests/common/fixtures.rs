//! Archive fixtures written on the fly

use std::io::Write;
use std::path::{Path, PathBuf};
use zip::write::FileOptions;

/// Write a ZIP archive at `path` holding `entries` (name, content)
///
/// Names ending in `/` become directory entries.
pub fn write_zip(path: &Path, entries: &[(&str, &[u8])]) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);
    for (name, content) in entries {
        if name.ends_with('/') {
            writer.add_directory(*name, options).unwrap();
        } else {
            writer.start_file(*name, options).unwrap();
            writer.write_all(content).unwrap();
        }
    }
    writer.finish().unwrap();
    path.to_path_buf()
}

/// ZIP archive bytes holding `entries`
pub fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let dir = tempfile::TempDir::new().unwrap();
    let path = write_zip(&dir.path().join("inner.zip"), entries);
    std::fs::read(path).unwrap()
}

/// Write an arbitrary file, creating parent directories
pub fn write_file(path: &Path, content: &[u8]) -> PathBuf {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, content).unwrap();
    path.to_path_buf()
}

/// Write RAR-looking volume files `<stem>.part<N>.rar` for each index
///
/// Only the signature is real; scripted backends never read the content.
pub fn write_rar_volumes(dir: &Path, stem: &str, indices: &[u32]) -> Vec<PathBuf> {
    indices
        .iter()
        .map(|i| {
            write_file(
                &dir.join(format!("{}.part{}.rar", stem, i)),
                b"Rar!\x1a\x07\x01\x00volume",
            )
        })
        .collect()
}
