//! Ledger and layout assertions for end-to-end tests

use extractall::config::DEFAULT_STATE_FILE;
use serde_json::Value;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Parsed ledger of the run rooted at `root`
pub fn read_ledger(root: &Path) -> Value {
    let bytes = std::fs::read(root.join(DEFAULT_STATE_FILE)).expect("ledger should exist");
    serde_json::from_slice(&bytes).expect("ledger should be valid JSON")
}

/// Raw ledger bytes, for byte-for-byte comparisons across runs
pub fn ledger_bytes(root: &Path) -> Vec<u8> {
    std::fs::read(root.join(DEFAULT_STATE_FILE)).expect("ledger should exist")
}

/// Ledger entries whose first part has the given file name
pub fn entries_for<'a>(ledger: &'a Value, file_name: &str) -> Vec<&'a Value> {
    ledger["jobs"]
        .as_object()
        .expect("ledger jobs should be an object")
        .values()
        .filter(|entry| {
            entry["partPaths"][0]
                .as_str()
                .and_then(|p| Path::new(p).file_name().map(|n| n.to_string_lossy() == file_name))
                .unwrap_or(false)
        })
        .collect()
}

/// Status recorded for the single job whose first part is `file_name`
pub fn status_of(ledger: &Value, file_name: &str) -> String {
    let entries = entries_for(ledger, file_name);
    assert_eq!(
        entries.len(),
        1,
        "expected exactly one ledger entry for {}",
        file_name
    );
    entries[0]["status"].as_str().unwrap().to_string()
}

/// Number of ledger entries
pub fn job_count(ledger: &Value) -> usize {
    ledger["jobs"].as_object().map(|jobs| jobs.len()).unwrap_or(0)
}

/// Every regular file under `dir`, relative to it and sorted
pub fn files_under(dir: &Path) -> Vec<PathBuf> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.path().strip_prefix(dir).unwrap().to_path_buf())
        .collect();
    files.sort();
    files
}

/// Assert `path` exists with exactly `content`
pub fn assert_file(path: &Path, content: &[u8]) {
    let actual = std::fs::read(path).unwrap_or_else(|e| panic!("{}: {}", path.display(), e));
    assert_eq!(actual, content, "unexpected content in {}", path.display());
}
