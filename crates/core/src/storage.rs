//! Local storage conventions for downloaded recordings.
//!
//! Files are stored flat, keyed by the camera path with separators replaced:
//! `Mp4Record/2024-08-12/RecM13_….mp4` → `Mp4Record_2024-08-12_RecM13_….mp4`.

use std::path::{Path, PathBuf};

/// Suffix of the file a transfer writes before it is renamed into place.
pub const PARTIAL_SUFFIX: &str = "part";

/// Flatten a camera path into a single file name.
pub fn sanitize_remote_path(remote_path: &str) -> String {
    remote_path
        .trim_start_matches(['/', '\\'])
        .replace(['/', '\\'], "_")
}

/// Destination for `remote_path` inside `dir`.
pub fn local_path_for(dir: &Path, remote_path: &str) -> PathBuf {
    dir.join(sanitize_remote_path(remote_path))
}

/// Size of the regular file at `path`, or `None` if nothing usable is there.
pub fn existing_size(path: &Path) -> Option<u64> {
    std::fs::metadata(path)
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}

/// True if `path` holds a complete copy: the file exists and, when the
/// expected size is known, its length matches.
pub fn is_complete(path: &Path, expected_size: Option<u64>) -> bool {
    match (existing_size(path), expected_size) {
        (Some(actual), Some(expected)) => actual == expected,
        (Some(_), None) => true,
        (None, _) => false,
    }
}

/// Sibling path used while a transfer is in progress.
pub fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}
