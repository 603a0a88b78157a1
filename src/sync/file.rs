//! File operations for the shared volume.
//!
//! The shared volume is typically an SMB mount with no locking primitive, so
//! everything here is best effort:
//! - Writes go to a uniquely named temp file, are synced, then renamed over
//!   the target. On network filesystems rename may not be atomic; a reader can
//!   still observe a truncated file, which the integrity checks catch.
//! - Directory creation moves aside any plain file squatting on the path.
//!
//! No cross-client critical section spans a check-then-write sequence. Two
//! writers on different machines can interleave, and the later rename wins.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::sync::types::SyncResult;

/// Suffix used when moving a file out of the way of a directory.
const OLD_SUFFIX: &str = ".old";

/// Write content to a file by temp-file-and-rename.
///
/// The temp file sits next to the target with a unique suffix so concurrent
/// writers on other machines never share a temp path.
///
/// # Errors
///
/// Returns an error if any file operation fails. The temp file is removed on
/// a failed rename.
pub fn atomic_write(path: &Path, content: &[u8]) -> SyncResult<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_path = path.with_file_name(format!(
        ".{file_name}.{}.tmp",
        &uuid::Uuid::new_v4().simple().to_string()[..12]
    ));

    {
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(content)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(e.into());
    }

    Ok(())
}

/// Ensure a directory exists, moving aside any file occupying its path.
///
/// If a regular file sits where the directory should be (e.g. left over from
/// an older on-disk format), it is renamed to `<name>.old` first, replacing
/// any previous `.old` file. The file is never deleted outright.
///
/// # Errors
///
/// Returns an error if the rename or directory creation fails.
pub fn ensure_directory(path: &Path) -> SyncResult<()> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => return Ok(()),
        Ok(_) => {
            let backup = old_path(path);
            if fs::symlink_metadata(&backup).is_ok() {
                remove_any(&backup)?;
            }
            warn!(
                path = %path.display(),
                backup = %backup.display(),
                "File occupies directory path, moving it aside"
            );
            fs::rename(path, &backup)?;
        }
        Err(_) => {}
    }

    fs::create_dir_all(path)?;
    debug!(path = %path.display(), "Directory ready");
    Ok(())
}

/// Path used to hold a file moved out of a directory's way.
#[must_use]
pub fn old_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(OLD_SUFFIX);
    path.with_file_name(name)
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    if fs::symlink_metadata(path)?.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Filesystem modification time of a file.
///
/// # Errors
///
/// Returns an error if the metadata cannot be read or the platform does not
/// report modification times.
pub fn modified_at(path: &Path) -> SyncResult<DateTime<Utc>> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

/// Serialize a value as pretty JSON with a trailing newline.
///
/// Struct fields serialize in declaration order and `serde_json` maps are
/// sorted, so the output is stable across machines.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn to_stable_json<T: serde::Serialize>(value: &T) -> SyncResult<Vec<u8>> {
    let mut bytes = serde_json::to_vec_pretty(value)?;
    bytes.push(b'\n');
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("cache.json");

        atomic_write(&path, b"{}\n").unwrap();
        atomic_write(&path, b"{\"a\":1}\n").unwrap();

        assert_eq!(fs::read_to_string(&path).unwrap(), "{\"a\":1}\n");
        let leftovers: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_ensure_directory_creates_missing() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("user_settings");

        ensure_directory(&dir).unwrap();
        ensure_directory(&dir).unwrap();
        assert!(dir.is_dir());
    }

    #[test]
    fn test_ensure_directory_moves_file_aside() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("user_settings");
        fs::write(&dir, "legacy settings").unwrap();

        ensure_directory(&dir).unwrap();

        assert!(dir.is_dir());
        let backup = old_path(&dir);
        assert_eq!(fs::read_to_string(backup).unwrap(), "legacy settings");
    }

    #[test]
    fn test_ensure_directory_replaces_previous_backup() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path().join("user_settings");
        let backup = old_path(&dir);
        fs::write(&backup, "older").unwrap();
        fs::write(&dir, "newer").unwrap();

        ensure_directory(&dir).unwrap();

        assert!(dir.is_dir());
        assert_eq!(fs::read_to_string(backup).unwrap(), "newer");
    }

    #[test]
    fn test_old_path() {
        let path = Path::new("/mnt/share/user_settings");
        assert_eq!(old_path(path), PathBuf::from("/mnt/share/user_settings.old"));
    }

    #[test]
    fn test_stable_json_sorts_map_keys() {
        let value = serde_json::json!({"zeta": 1, "alpha": {"b": 2, "a": 1}});
        let text = String::from_utf8(to_stable_json(&value).unwrap()).unwrap();
        assert!(text.find("alpha").unwrap() < text.find("zeta").unwrap());
        assert!(text.ends_with('\n'));
    }
}
