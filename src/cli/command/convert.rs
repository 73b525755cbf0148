use std::sync::Arc;

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use tokio::{sync::Semaphore, task::JoinSet};
use tracing::{info, warn};

use crate::{
    cli::create_progress_bar,
    config::PipelineConfig,
    dates::{self, FileRef},
    download,
    error::{PipelineError, PipelineResult},
    parquet::{self, DatasetWriter, WriteReport},
    reading::{decode, materialize, GridPoint},
    storage::Storage,
};

#[derive(Debug, Clone, PartialEq)]
pub struct ConvertSummary {
    pub output: String,
    pub files_processed: usize,
    pub files_skipped: usize,
    pub report: WriteReport,
    pub verified: bool,
}

#[derive(Debug, Default)]
struct Progress {
    processed: usize,
    skipped: usize,
}

impl Progress {
    fn record(&mut self, outcome: &Option<Vec<GridPoint>>) {
        match outcome {
            Some(_) => self.processed += 1,
            None => self.skipped += 1,
        }
    }
}

/// Runs the whole pipeline: expand dates, fetch and decode each file,
/// index its grid points and stream them into the parquet output.
pub async fn convert(config: PipelineConfig) -> Result<ConvertSummary> {
    let files: Vec<FileRef> = dates::expand(&config.range, &config.template)
        .take(config.file_count())
        .collect();

    info!(
        start = %config.range.start(),
        end = %config.range.end(),
        files = files.len(),
        parallel = config.parallel,
        "Converting ERA5 files"
    );

    let input = Arc::new(Storage::for_reading(&config.in_prefix)?);
    let output = Storage::for_writing(&config.output)?;
    let config = Arc::new(config);
    let mut writer = DatasetWriter::new(output.clone(), config.write);

    let pb = create_progress_bar(files.len() as u64, "Processing files".to_string());
    let staged = if config.parallel {
        process_parallel(files, &input, &config, &mut writer, &pb).await
    } else {
        process_sequential(files, &input, &config, &mut writer, &pb).await
    };

    let progress = match staged {
        Ok(progress) => progress,
        Err(e) => {
            pb.abandon_with_message("Processing failed");
            writer.abort().await;
            return Err(e.into());
        }
    };
    pb.finish_with_message("Processing complete");

    let report = writer
        .commit()
        .await
        .with_context(|| format!("writing output to {}", config.output))?;

    if config.verify {
        parquet::verify(&output, &report)
            .await
            .with_context(|| format!("verifying output in {}", config.output))?;
    }

    Ok(ConvertSummary {
        output: config.output.clone(),
        files_processed: progress.processed,
        files_skipped: progress.skipped,
        report,
        verified: config.verify,
    })
}

async fn process_sequential(
    files: Vec<FileRef>,
    input: &Arc<Storage>,
    config: &Arc<PipelineConfig>,
    writer: &mut DatasetWriter,
    pb: &ProgressBar,
) -> PipelineResult<Progress> {
    let mut progress = Progress::default();

    for (position, file) in files.into_iter().enumerate() {
        let outcome = process_file(Arc::clone(input), Arc::clone(config), file).await?;
        if let Some(points) = &outcome {
            writer.stage(position, points).await?;
        }
        progress.record(&outcome);
        pb.inc(1);
    }

    Ok(progress)
}

/// One task per file, at most `workers` running at once. Batches are staged
/// as they complete and dropped right after. The first failure aborts the
/// remaining tasks.
async fn process_parallel(
    files: Vec<FileRef>,
    input: &Arc<Storage>,
    config: &Arc<PipelineConfig>,
    writer: &mut DatasetWriter,
    pb: &ProgressBar,
) -> PipelineResult<Progress> {
    let semaphore = Arc::new(Semaphore::new(config.workers));
    let mut tasks = JoinSet::new();

    for (position, file) in files.into_iter().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let input = Arc::clone(input);
        let config = Arc::clone(config);
        let path = file.path.clone();

        tasks.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .map_err(|e| PipelineError::fetch(&path, e))?;
            let outcome = process_file(input, config, file).await?;
            Ok::<_, PipelineError>((position, outcome))
        });
    }

    let mut progress = Progress::default();
    while let Some(joined) = tasks.join_next().await {
        let (position, outcome) = joined
            .map_err(|e| PipelineError::fetch("worker task", e))??;
        if let Some(points) = &outcome {
            writer.stage(position, points).await?;
        }
        progress.record(&outcome);
        pb.inc(1);
    }

    Ok(progress)
}

/// Fetches, decodes and materializes one file. `None` means the file was
/// absent and skipped.
async fn process_file(
    input: Arc<Storage>,
    config: Arc<PipelineConfig>,
    file: FileRef,
) -> PipelineResult<Option<Vec<GridPoint>>> {
    if config.skip_missing && !download::exists(&input, &file).await? {
        warn!(path = %file.path, "Input not found, skipping");
        return Ok(None);
    }

    let bytes = match download::fetch(&input, &file).await {
        Ok(bytes) => bytes,
        // removed between the existence check and the read
        Err(e) if config.skip_missing && e.is_missing() => {
            warn!(path = %file.path, "Input vanished, skipping");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };
    let path = file.path.clone();

    let points = tokio::task::spawn_blocking(move || -> PipelineResult<Vec<GridPoint>> {
        let grid = decode(&bytes, &path, config.variable.as_deref())?;
        let points: Vec<GridPoint> = materialize(&grid, &config.indexer)?.collect();
        Ok(points)
    })
    .await
    .map_err(|e| PipelineError::decode(&file.path, e))??;

    info!(path = %file.path, date = %file.date, rows = points.len(), "Processed file");
    Ok(Some(points))
}

// -- Tests -------------------------------------------------------------------
