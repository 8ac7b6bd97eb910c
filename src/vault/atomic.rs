//! Whole-file JSON documents written through a temp file and rename.

use crate::error::{DbError, DbResult};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Read a JSON document, `None` if the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> DbResult<Option<T>> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(DbError::internal(format!(
                "Failed to read {}: {}",
                path.display(),
                e
            )));
        }
    };
    let value = serde_json::from_str(&raw).map_err(|e| {
        DbError::internal(format!("Corrupt vault file {}: {}", path.display(), e))
    })?;
    Ok(Some(value))
}

/// Replace `path` with the pretty JSON encoding of `value`.
///
/// The document is written to a temp file in the same directory, synced,
/// then renamed over the target; readers see the old or the new document,
/// never a partial one.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> DbResult<()> {
    let fail = |message: String| DbError::persistence(path.display().to_string(), message);

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir).map_err(|e| fail(format!("create directory: {}", e)))?;

    let mut encoded =
        serde_json::to_vec_pretty(value).map_err(|e| fail(format!("encode: {}", e)))?;
    encoded.push(b'\n');

    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| fail(format!("temp file: {}", e)))?;
    tmp.write_all(&encoded)
        .map_err(|e| fail(format!("write: {}", e)))?;
    tmp.as_file()
        .sync_all()
        .map_err(|e| fail(format!("sync: {}", e)))?;
    tmp.persist(path)
        .map_err(|e| fail(format!("rename: {}", e.error)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_missing_file_reads_none() {
        let dir = tempfile::tempdir().unwrap();
        let value: Option<BTreeMap<String, u32>> =
            read_json(&dir.path().join("absent.json")).unwrap();
        assert!(value.is_none());
    }

    #[test]
    fn test_write_then_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let mut doc = BTreeMap::new();
        doc.insert("tables".to_string(), 3u32);

        write_json_atomic(&path, &doc).unwrap();
        let back: BTreeMap<String, u32> = read_json(&path).unwrap().unwrap();
        assert_eq!(back, doc);

        // No temp files left next to the target
        let entries = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, "{not json").unwrap();
        let result: DbResult<Option<BTreeMap<String, u32>>> = read_json(&path);
        assert!(result.is_err());
    }

    #[test]
    fn test_write_failure_is_persistence_error() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, "x").unwrap();
        let err = write_json_atomic(&blocker.join("doc.json"), &1u32).unwrap_err();
        assert!(matches!(err, DbError::StatePersistenceFailed { .. }));
        assert!(err.is_fatal());
    }
}
