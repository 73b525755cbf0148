//! Validated pipeline settings built from the command line.

use std::thread;

use anyhow::{anyhow, ensure, Result};
use h3o::Resolution;

use crate::{
    cli::Cli,
    dates::{DateRange, PathTemplate},
    parquet::{PartitionBy, WriteOptions},
    spatial::SpatialIndexer,
};

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub in_prefix: String,
    pub output: String,
    pub template: PathTemplate,
    pub range: DateRange,
    /// Cap on files processed, not rows.
    pub limit: Option<usize>,
    pub parallel: bool,
    pub workers: usize,
    pub variable: Option<String>,
    pub indexer: SpatialIndexer,
    pub write: WriteOptions,
    pub skip_missing: bool,
    pub verify: bool,
}

impl PipelineConfig {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        ensure!(!cli.in_prefix.trim().is_empty(), "--in_prefix must not be empty");
        ensure!(!cli.in_suffix.trim().is_empty(), "--in_suffix must not be empty");
        ensure!(!cli.output.trim().is_empty(), "--output must not be empty");
        ensure!(cli.limit != Some(0), "--limit must be at least 1");
        ensure!(cli.workers != Some(0), "--workers must be at least 1");

        let range = DateRange::new(cli.start_date, cli.end_date)?;
        let template = PathTemplate::new(&cli.in_prefix, &cli.in_suffix)?;
        let resolution = Resolution::try_from(cli.resolution)
            .map_err(|e| anyhow!("--resolution {}: {}", cli.resolution, e))?;

        let workers = cli.workers.unwrap_or_else(|| {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        });

        let partition_by = if cli.partition_by_index {
            PartitionBy::SpatialIndex
        } else {
            cli.partition_by
        };

        Ok(PipelineConfig {
            in_prefix: cli.in_prefix.trim_end_matches('/').to_string(),
            output: cli.output.clone(),
            template,
            range,
            limit: cli.limit,
            parallel: cli.parallel,
            workers,
            variable: cli.variable.clone(),
            indexer: SpatialIndexer::new(resolution),
            write: WriteOptions {
                partition_by,
                ..WriteOptions::default()
            },
            skip_missing: cli.skip_missing,
            verify: cli.verify,
        })
    }

    /// Number of files the run will look at.
    pub fn file_count(&self) -> usize {
        match self.limit {
            Some(limit) => limit.min(self.range.len()),
            None => self.range.len(),
        }
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;
    use crate::error::PipelineError;

    fn cli(extra: &[&str]) -> Cli {
        let mut args = vec![
            "era5-parquet",
            "--in_prefix",
            "gs://bucket/raw/",
            "--in_suffix",
            "tp/surface.nc",
            "--output",
            "out",
            "--start_date",
            "2022-01-01",
            "--end_date",
            "2022-01-10",
        ];
        args.extend(extra);
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn should_build_config() {
        let config = PipelineConfig::from_cli(&cli(&["--limit", "3", "--workers", "2"])).unwrap();

        assert_eq!(config.in_prefix, "gs://bucket/raw");
        assert_eq!(config.range.len(), 10);
        assert_eq!(config.file_count(), 3);
        assert_eq!(config.workers, 2);
        assert_eq!(config.indexer.resolution(), Resolution::Nine);
        assert_eq!(config.write.partition_by, PartitionBy::Single);
    }

    #[test]
    fn should_cap_file_count_by_range() {
        let config = PipelineConfig::from_cli(&cli(&["--limit", "50"])).unwrap();

        assert_eq!(config.file_count(), 10);
        assert!(config.workers >= 1);
    }

    #[test]
    fn should_map_partition_flags() {
        let by_index = PipelineConfig::from_cli(&cli(&["--partition_by_index"])).unwrap();
        let by_date = PipelineConfig::from_cli(&cli(&["--partition_by", "date"])).unwrap();

        assert_eq!(by_index.write.partition_by, PartitionBy::SpatialIndex);
        assert_eq!(by_date.write.partition_by, PartitionBy::Date);
    }

    #[test]
    fn should_reject_zero_limit_and_workers() {
        assert!(PipelineConfig::from_cli(&cli(&["--limit", "0"])).is_err());
        assert!(PipelineConfig::from_cli(&cli(&["--workers", "0"])).is_err());
    }

    #[test]
    fn should_reject_reversed_dates() {
        let mut c = cli(&[]);
        std::mem::swap(&mut c.start_date, &mut c.end_date);

        let err = PipelineConfig::from_cli(&c).unwrap_err();

        assert!(matches!(
            err.downcast_ref::<PipelineError>(),
            Some(PipelineError::InvalidRange(_))
        ));
    }
}
