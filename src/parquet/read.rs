//! Checks a committed output.
//!
//! Row counts come from the parquet footers, fetched with range reads, so
//! verifying a large dataset does not download it.

use parquet::file::footer::{decode_footer, decode_metadata};
use tracing::info;

use super::{writer::is_dataset_file, WriteReport, SUCCESS_MARKER};
use crate::{
    error::{PipelineError, PipelineResult},
    storage::Storage,
};

const FOOTER_SIZE: usize = 8;

/// Whether the output carries the commit marker.
pub async fn is_committed(storage: &Storage) -> PipelineResult<bool> {
    storage.exists(SUCCESS_MARKER).await
}

/// Committed parquet files, sorted.
async fn dataset_keys(storage: &Storage) -> PipelineResult<Vec<String>> {
    Ok(storage
        .list("")
        .await?
        .into_iter()
        .filter(|key| key != SUCCESS_MARKER && is_dataset_file(key))
        .collect())
}

async fn file_rows(storage: &Storage, key: &str) -> PipelineResult<usize> {
    let path = storage.display(key);
    let size = storage.size(key).await?;
    if size < FOOTER_SIZE {
        return Err(PipelineError::decode(&path, "file too small for a parquet footer"));
    }

    let tail = storage.read_range(key, size - FOOTER_SIZE..size).await?;
    let footer: [u8; FOOTER_SIZE] = tail
        .as_ref()
        .try_into()
        .map_err(|_| PipelineError::decode(&path, "short footer read"))?;
    let metadata_len = decode_footer(&footer).map_err(|e| PipelineError::decode(&path, e))?;

    let end = size - FOOTER_SIZE;
    let start = end
        .checked_sub(metadata_len)
        .ok_or_else(|| PipelineError::decode(&path, "metadata length exceeds file size"))?;
    let metadata = storage.read_range(key, start..end).await?;
    let metadata = decode_metadata(&metadata).map_err(|e| PipelineError::decode(&path, e))?;

    Ok(metadata.file_metadata().num_rows() as usize)
}

/// Total rows over all committed parquet files.
pub async fn count_rows(storage: &Storage) -> PipelineResult<usize> {
    let mut rows = 0;
    for key in dataset_keys(storage).await? {
        rows += file_rows(storage, &key).await?;
    }

    Ok(rows)
}

/// Checks that the output is committed and holds the rows and files `report`
/// says were written.
pub async fn verify(storage: &Storage, report: &WriteReport) -> PipelineResult<()> {
    if !is_committed(storage).await? {
        return Err(PipelineError::write(
            storage.display(SUCCESS_MARKER),
            "commit marker is missing",
        ));
    }

    let files = dataset_keys(storage).await?.len();
    if files != report.files {
        return Err(PipelineError::write(
            storage.root(),
            format!("expected {} files, found {}", report.files, files),
        ));
    }

    let rows = count_rows(storage).await?;
    if rows != report.rows {
        return Err(PipelineError::write(
            storage.root(),
            format!("expected {} rows, found {}", report.rows, rows),
        ));
    }

    info!(output = %storage.root(), rows, files, "Verified output");
    Ok(())
}

// -- Tests -------------------------------------------------------------------
