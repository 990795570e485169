//! Atomic JSON persistence.
//!
//! Writers serialize to a sibling `*.tmp` file, fsync it, then rename
//! over the destination. A crash mid-write leaves either the previous
//! document or the new one on disk, never a torn file.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, io::Error> {
    let json = std::fs::read_to_string(path)?;
    serde_json::from_str(&json).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

pub fn read_json_if_exists<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, io::Error> {
    if !path.exists() {
        return Ok(None);
    }
    read_json(path).map(Some)
}

/// Temporary sibling used while replacing `path`.
pub fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub fn write_json_pretty<T: Serialize>(path: &Path, value: &T) -> Result<(), io::Error> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(path, &json)
}

/// Replace `path` with `bytes` via write-to-temp, fsync, rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), io::Error> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp = temp_path_for(path);
    let result = (|| {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        std::fs::rename(&tmp, path)
    })();

    if result.is_err() {
        let _ = std::fs::remove_file(&tmp);
    }
    result?;

    // Persist the rename itself where the platform allows opening directories.
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = std::fs::File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    tracing::trace!(path = %path.display(), bytes = bytes.len(), "Atomic write complete");
    Ok(())
}

/// Remove a leftover temporary file from an interrupted write.
///
/// Returns `true` if one was found. The destination is untouched.
pub fn discard_stale_temp(path: &Path) -> bool {
    let tmp = temp_path_for(path);
    if tmp.exists() {
        match std::fs::remove_file(&tmp) {
            Ok(()) => {
                tracing::warn!(path = %tmp.display(), "Discarded interrupted write");
                return true;
            }
            Err(e) => {
                tracing::warn!(path = %tmp.display(), error = %e, "Could not remove stale temp file");
            }
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_path(name: &str) -> std::path::PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        std::env::temp_dir().join(format!("receipt-persist-{name}-{nanos}"))
    }

    #[test]
    fn read_json_invalid_returns_invalid_data() {
        let dir = temp_path("invalid");
        let path = dir.join("bad.json");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "{broken json").unwrap();

        let err = read_json::<serde_json::Value>(&path).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn read_json_if_exists_missing_returns_none() {
        let path = temp_path("missing").join("missing.json");
        let value: Option<Vec<String>> = read_json_if_exists(&path).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn write_json_pretty_creates_parent_dir_and_leaves_no_temp() {
        let path = temp_path("write").join("nested").join("value.json");
        write_json_pretty(&path, &vec!["a", "b"]).unwrap();
        assert!(path.exists());
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn write_json_pretty_fails_on_directory_path() {
        let dir = temp_path("dir");
        std::fs::create_dir_all(&dir).unwrap();

        let result = write_json_pretty(&dir, &vec!["a"]);
        assert!(result.is_err());
        assert!(!temp_path_for(&dir).exists());
    }

    #[test]
    fn torn_temp_file_does_not_affect_destination() {
        let dir = temp_path("torn");
        let path = dir.join("doc.json");
        write_json_pretty(&path, &vec![1, 2, 3]).unwrap();

        // Simulate a crash halfway through the next write.
        std::fs::write(temp_path_for(&path), "[1, 2, 3, 4").unwrap();

        let value: Vec<u32> = read_json(&path).unwrap();
        assert_eq!(value, vec![1, 2, 3]);
        assert!(discard_stale_temp(&path));
        assert!(!discard_stale_temp(&path));
    }

    #[test]
    fn temp_path_is_a_sibling() {
        let path = Path::new("/data/ledger/certificates.json");
        assert_eq!(
            temp_path_for(path),
            Path::new("/data/ledger/certificates.json.tmp")
        );
    }
}
