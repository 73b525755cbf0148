//! Fetches daily input files from their storage backend.

use bytes::Bytes;
use tracing::debug;

use crate::{dates::FileRef, error::PipelineResult, storage::Storage};

/// Retrieves the raw bytes of one daily file.
pub async fn fetch(storage: &Storage, file: &FileRef) -> PipelineResult<Bytes> {
    let key = storage.key_for(&file.path)?;
    let bytes = storage.read(&key).await?;

    debug!(path = %file.path, size = bytes.len(), "Fetched input file");
    Ok(bytes)
}

/// Checks whether the daily file is present without downloading it.
pub async fn exists(storage: &Storage, file: &FileRef) -> PipelineResult<bool> {
    let key = storage.key_for(&file.path)?;
    storage.exists(&key).await
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use std::fs;

    use chrono::NaiveDate;
    use tempfile::TempDir;

    use super::*;

    fn file_ref(root: &str, rel: &str) -> FileRef {
        FileRef {
            path: format!("{}/{}", root, rel),
            date: NaiveDate::from_ymd_opt(2022, 1, 1).unwrap(),
        }
    }

    #[tokio::test]
    async fn should_fetch_local_file() {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("2022/01/01")).unwrap();
        fs::write(tmp.path().join("2022/01/01/tp.nc"), b"CDF\x01").unwrap();

        let root = tmp.path().to_str().unwrap();
        let storage = Storage::for_reading(root).unwrap();
        let file = file_ref(root, "2022/01/01/tp.nc");

        assert!(exists(&storage, &file).await.unwrap());
        assert_eq!(fetch(&storage, &file).await.unwrap(), Bytes::from_static(b"CDF\x01"));
    }

    #[tokio::test]
    async fn should_report_missing_local_file() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().to_str().unwrap();
        let storage = Storage::for_reading(root).unwrap();
        let file = file_ref(root, "2022/01/02/tp.nc");

        assert!(!exists(&storage, &file).await.unwrap());
        assert!(fetch(&storage, &file).await.unwrap_err().is_missing());
    }

    #[test]
    fn should_fail_on_missing_input_dir() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("does-not-exist");

        assert!(Storage::for_reading(missing.to_str().unwrap()).is_err());
    }
}
