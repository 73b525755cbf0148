//! Writes grid points and commits them in two phases.
//!
//! Each input file's batch is streamed into its own `part-NNNNN.parquet`
//! (one per partition directory) under `_temporary/<run-id>/` as soon as it
//! is ready. On commit the previous dataset files are removed, the staged
//! files are renamed into place and `_SUCCESS` is written last. The rename
//! step is not atomic across objects, so readers should only trust an output
//! that carries the marker.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use clap::ValueEnum;
use parquet::basic::Compression;
use tracing::{debug, info, warn};

use super::{
    encode::{default_compression, write_points, DEFAULT_ROWS_PER_GROUP},
    PARTITION_COLUMNS, STAGING_PREFIX, SUCCESS_MARKER,
};
use crate::{
    cli::create_spinner,
    error::{PipelineError, PipelineResult},
    reading::GridPoint,
    storage::Storage,
};

/// Directory layout of the output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum PartitionBy {
    /// All parts directly under the output location.
    #[default]
    #[value(name = "none")]
    Single,
    /// `spatial_index=<cell>/`
    #[value(name = "spatial_index")]
    SpatialIndex,
    /// `timestamp=<YYYYMMDDTHHMMSSZ>/`
    #[value(name = "timestamp")]
    Timestamp,
    /// `date=<YYYY-MM-DD>/`, one directory per day.
    #[value(name = "date")]
    Date,
}

impl PartitionBy {
    pub fn column(&self) -> Option<&'static str> {
        match self {
            PartitionBy::Single => None,
            PartitionBy::SpatialIndex => Some(PARTITION_COLUMNS[0]),
            PartitionBy::Timestamp => Some(PARTITION_COLUMNS[1]),
            PartitionBy::Date => Some(PARTITION_COLUMNS[2]),
        }
    }

    fn directory(&self, point: &GridPoint) -> String {
        let value = match self {
            PartitionBy::Single => return String::new(),
            PartitionBy::SpatialIndex => point.spatial_index.to_string(),
            PartitionBy::Timestamp => point.timestamp.format("%Y%m%dT%H%M%SZ").to_string(),
            PartitionBy::Date => point.timestamp.format("%Y-%m-%d").to_string(),
        };

        format!("{}={}", self.column().unwrap_or_default(), value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteOptions {
    pub partition_by: PartitionBy,
    pub rows_per_group: usize,
    pub compression: Compression,
}

impl Default for WriteOptions {
    fn default() -> Self {
        WriteOptions {
            partition_by: PartitionBy::default(),
            rows_per_group: DEFAULT_ROWS_PER_GROUP,
            compression: default_compression(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub rows: usize,
    pub files: usize,
    pub partitions: usize,
}

pub struct DatasetWriter {
    storage: Storage,
    options: WriteOptions,
    run_id: String,
    staged: Vec<String>,
    partitions: BTreeSet<String>,
    rows: usize,
}

impl DatasetWriter {
    pub fn new(storage: Storage, options: WriteOptions) -> Self {
        let run_id = format!(
            "{}-{}",
            Utc::now().format("%Y%m%dT%H%M%S%3f"),
            std::process::id()
        );

        DatasetWriter {
            storage,
            options,
            run_id,
            staged: vec![],
            partitions: BTreeSet::new(),
            rows: 0,
        }
    }

    fn staging_dir(&self) -> String {
        format!("{}/{}", STAGING_PREFIX, self.run_id)
    }

    /// Streams the points of input file number `part` into the staging area.
    /// Parts may arrive in any order; their names depend only on `part`.
    pub async fn stage(&mut self, part: usize, points: &[GridPoint]) -> PipelineResult<()> {
        let mut groups: BTreeMap<String, Vec<&GridPoint>> = BTreeMap::new();
        if self.options.partition_by == PartitionBy::Single {
            groups.insert(String::new(), vec![]);
        }
        for point in points {
            groups
                .entry(self.options.partition_by.directory(point))
                .or_default()
                .push(point);
        }

        for (dir, points) in groups {
            let relative = part_key(&dir, part);
            let rows = self.upload(&relative, &points).await?;

            debug!(key = %relative, rows, "Staged part");
            if !dir.is_empty() {
                self.partitions.insert(dir);
            }
            self.staged.push(relative);
            self.rows += rows;
        }

        Ok(())
    }

    async fn upload(&self, relative: &str, points: &[&GridPoint]) -> PipelineResult<usize> {
        let key = format!("{}/{}", self.staging_dir(), relative);
        let (id, sink) = self.storage.upload(&key).await?;

        let written = write_points(
            sink,
            points.iter().copied(),
            self.options.rows_per_group,
            self.options.compression,
        )
        .await;

        match written {
            Ok(rows) => Ok(rows),
            Err(e) => {
                self.storage.abort_upload(&key, &id).await;
                Err(PipelineError::write(self.storage.display(&key), e))
            }
        }
    }

    /// Replaces the previous dataset with the staged parts and writes the
    /// `_SUCCESS` marker.
    pub async fn commit(mut self) -> PipelineResult<WriteReport> {
        if self.staged.is_empty() && self.options.partition_by == PartitionBy::Single {
            // keep the schema readable for an empty run
            self.stage(0, &[]).await?;
        }

        let report = WriteReport {
            rows: self.rows,
            files: self.staged.len(),
            partitions: self.partitions.len(),
        };
        let bar = create_spinner("Committing output...".to_string());

        let previous: Vec<String> = self
            .storage
            .list("")
            .await?
            .into_iter()
            .filter(|key| is_dataset_file(key))
            .collect();

        for key in &previous {
            debug!(key = %key, "Removing previous output");
            self.storage.delete(key).await?;
        }

        for relative in &self.staged {
            let from = format!("{}/{}", self.staging_dir(), relative);
            self.storage.rename(&from, relative).await?;
        }

        self.remove_local_staging().await?;
        self.prune_local_partitions().await;

        let marker = format!("rows={}\nfiles={}\n", report.rows, report.files);
        self.storage.write(SUCCESS_MARKER, marker.into()).await?;

        bar.finish_with_message("Output committed");
        info!(
            output = %self.storage.root(),
            rows = report.rows,
            files = report.files,
            "Committed output"
        );
        Ok(report)
    }

    /// Drops everything this run staged. The committed output is untouched.
    pub async fn abort(self) {
        let staged = match self.storage.list(&self.staging_dir()).await {
            Ok(keys) => keys,
            Err(e) => {
                warn!(error = %e, "Failed to list staged files");
                vec![]
            }
        };

        for key in staged {
            if let Err(e) = self.storage.delete(&key).await {
                warn!(error = %e, "Failed to remove staged file");
            }
        }

        if let Err(e) = self.remove_local_staging().await {
            warn!(error = %e, "Failed to remove staging directory");
        }
    }

    // Object stores have no directories; local outputs keep empty ones.
    async fn remove_local_staging(&self) -> PipelineResult<()> {
        let Some(dir) = self.storage.local_dir() else {
            return Ok(());
        };

        let staging = dir.join(STAGING_PREFIX);
        match tokio::fs::remove_dir_all(staging.join(&self.run_id)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(PipelineError::write(staging.display().to_string(), e)),
        }

        // Other runs may still be staging here.
        let _ = tokio::fs::remove_dir(&staging).await;
        Ok(())
    }

    async fn prune_local_partitions(&self) {
        let Some(dir) = self.storage.local_dir() else {
            return;
        };
        let Ok(mut entries) = tokio::fs::read_dir(dir).await else {
            return;
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name();
            if is_partition_dir(&name.to_string_lossy()) {
                // only succeeds when empty
                let _ = tokio::fs::remove_dir(entry.path()).await;
            }
        }
    }
}

fn part_key(dir: &str, part: usize) -> String {
    if dir.is_empty() {
        format!("part-{:05}.parquet", part)
    } else {
        format!("{}/part-{:05}.parquet", dir, part)
    }
}

fn is_partition_dir(name: &str) -> bool {
    name.split_once('=')
        .is_some_and(|(column, _)| PARTITION_COLUMNS.contains(&column))
}

/// Whether `key` belongs to a committed dataset: the marker, a root-level
/// part or a part one partition directory down.
pub(crate) fn is_dataset_file(key: &str) -> bool {
    if key == SUCCESS_MARKER {
        return true;
    }

    match key.split_once('/') {
        None => key.ends_with(".parquet"),
        Some((dir, file)) => {
            is_partition_dir(dir) && !file.contains('/') && file.ends_with(".parquet")
        }
    }
}

// -- Tests -------------------------------------------------------------------
