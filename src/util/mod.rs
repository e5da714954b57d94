//! Shared utilities for `specsync`.
//!
//! Common functionality used across modules:
//! - Content hashing (SHA256 over normalized text)
//! - Key normalization and cross-convention matching
//! - Atomic file writes
//! - Progress indicators (for long-running operations)

mod hash;
pub mod key;
pub mod progress;

pub use hash::{content_hash, is_valid_hash, normalize_content};

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Temp file path next to `target`, so the final rename stays on one filesystem.
#[must_use]
pub fn temp_path_for(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map_or_else(|| "artifact".into(), |n| n.to_string_lossy().into_owned());
    target.with_file_name(format!(".{name}.tmp"))
}

/// Write `content` to `path` atomically (temp file, fsync, rename).
///
/// Parent directories are created as needed. On failure the temp file is
/// removed and the previous content of `path` is untouched.
///
/// # Errors
///
/// Returns an I/O error if the directory, temp file, or rename fails.
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let temp_path = temp_path_for(path);
    let result = write_and_rename(&temp_path, path, content);

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
    }
    tracing::debug!(
        path = %path.display(),
        ok = result.is_ok(),
        "Atomic write"
    );
    result
}

fn write_and_rename(temp_path: &Path, path: &Path, content: &str) -> std::io::Result<()> {
    let file = File::create(temp_path)?;
    let mut writer = BufWriter::new(file);
    writer.write_all(content.as_bytes())?;
    writer.flush()?;
    writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
    fs::rename(temp_path, path)
}

/// Forward-slash relative path used as an artifact id.
#[must_use]
pub fn relative_id(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_creates_parents() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("a/b/c.md");

        write_atomic(&path, "# Title\n").expect("write");
        assert_eq!(fs::read_to_string(&path).expect("read"), "# Title\n");
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn test_write_atomic_replaces_content() {
        let temp = TempDir::new().expect("temp dir");
        let path = temp.path().join("plan.yaml");
        write_atomic(&path, "one").expect("first");
        write_atomic(&path, "two").expect("second");
        assert_eq!(fs::read_to_string(&path).expect("read"), "two");
    }

    #[test]
    fn test_write_atomic_failure_leaves_no_temp() {
        let temp = TempDir::new().expect("temp dir");
        // A directory where the file should go makes the rename fail.
        let path = temp.path().join("taken");
        fs::create_dir_all(path.join("inner")).expect("mkdir");

        assert!(write_atomic(&path, "x").is_err());
        assert!(!temp_path_for(&path).exists());
        assert!(path.is_dir());
    }

    #[test]
    fn test_relative_id_uses_forward_slashes() {
        let root = Path::new("/repo");
        let path = root.join("specs").join("001-auth").join("spec.md");
        assert_eq!(relative_id(root, &path), "specs/001-auth/spec.md");
    }
}
