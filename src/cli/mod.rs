//! Command line interface.

pub mod command;

use std::time::Duration;

use chrono::NaiveDate;
use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};

use crate::{parquet::PartitionBy, spatial::DEFAULT_RESOLUTION};

#[derive(Parser, Debug, Clone)]
#[command(version, about = "Convert daily ERA5 NetCDF files to H3-indexed Parquet", long_about = None)]
/// Contains the conversion options
pub struct Cli {
    /// Input prefix (e.g. gs://gcp-public-data-arco-era5/raw/date-variable-single_level)
    #[arg(long = "in_prefix", env = "ERA5_IN_PREFIX")]
    pub in_prefix: String,

    /// Input suffix below each YYYY/MM/DD directory (e.g. total_precipitation/surface.nc)
    #[arg(long = "in_suffix", env = "ERA5_IN_SUFFIX")]
    pub in_suffix: String,

    /// Output location for the Parquet files (local path, gs:// or s3://)
    #[arg(long, env = "ERA5_OUTPUT")]
    pub output: String,

    /// Start date (YYYY-MM-DD)
    #[arg(long = "start_date", env = "ERA5_START_DATE")]
    pub start_date: NaiveDate,

    /// End date, inclusive (YYYY-MM-DD)
    #[arg(long = "end_date", env = "ERA5_END_DATE")]
    pub end_date: NaiveDate,

    /// Process at most this many files
    #[arg(long, env = "ERA5_LIMIT")]
    pub limit: Option<usize>,

    /// Fetch and decode files concurrently
    #[arg(long)]
    pub parallel: bool,

    /// Concurrent file tasks with --parallel (defaults to the number of CPUs)
    #[arg(long, env = "ERA5_WORKERS")]
    pub workers: Option<usize>,

    /// Data variable to extract (auto-detected when the file has only one)
    #[arg(long, env = "ERA5_VARIABLE")]
    pub variable: Option<String>,

    /// H3 resolution of the spatial index
    #[arg(
        long,
        env = "ERA5_RESOLUTION",
        default_value_t = DEFAULT_RESOLUTION,
        value_parser = clap::value_parser!(u8).range(0..=15)
    )]
    pub resolution: u8,

    /// Write one directory per spatial index cell (same as --partition_by spatial_index)
    #[arg(long = "partition_by_index", conflicts_with = "partition_by")]
    pub partition_by_index: bool,

    /// Directory layout of the output
    #[arg(long = "partition_by", env = "ERA5_PARTITION_BY", value_enum, default_value_t = PartitionBy::Single)]
    pub partition_by: PartitionBy,

    /// Re-read the committed output's footers and check the row count
    #[arg(long, env = "ERA5_VERIFY")]
    pub verify: bool,

    /// Skip days whose input file does not exist instead of failing
    #[arg(long = "skip_missing")]
    pub skip_missing: bool,

    /// Log filter (e.g. info, debug, era5_parquet=trace)
    #[arg(long = "log_level", env = "ERA5_LOG", default_value = "info")]
    pub log_level: String,
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    ProgressBar::new(size).with_message(message).with_style(
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    )
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const REQUIRED: [&str; 11] = [
        "era5-parquet",
        "--in_prefix",
        "gs://bucket/raw",
        "--in_suffix",
        "tp/surface.nc",
        "--output",
        "out",
        "--start_date",
        "2022-01-01",
        "--end_date",
        "2022-01-02",
    ];

    #[test]
    fn should_parse_required_flags() {
        let cli = Cli::try_parse_from(REQUIRED).unwrap();

        assert_eq!(cli.in_prefix, "gs://bucket/raw");
        assert_eq!(cli.start_date, NaiveDate::from_ymd_opt(2022, 1, 1).unwrap());
        assert_eq!(cli.limit, None);
        assert!(!cli.parallel);
        assert_eq!(cli.resolution, 9);
    }

    #[test]
    fn should_parse_optional_flags() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--limit", "2", "--parallel", "--resolution", "5", "--partition_by_index"]);
        let cli = Cli::try_parse_from(args).unwrap();

        assert_eq!(cli.limit, Some(2));
        assert!(cli.parallel);
        assert_eq!(cli.resolution, 5);
        assert!(cli.partition_by_index);
    }

    #[test]
    fn should_parse_partition_layout() {
        let mut args = REQUIRED.to_vec();
        args.extend(["--partition_by", "timestamp", "--verify"]);
        let cli = Cli::try_parse_from(args).unwrap();

        assert_eq!(cli.partition_by, PartitionBy::Timestamp);
        assert!(cli.verify);
        assert_eq!(Cli::try_parse_from(REQUIRED).unwrap().partition_by, PartitionBy::Single);

        let mut both = REQUIRED.to_vec();
        both.extend(["--partition_by", "date", "--partition_by_index"]);
        assert!(Cli::try_parse_from(both).is_err());
    }

    #[test]
    fn should_require_end_date() {
        let args = &REQUIRED[..9];

        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn should_reject_bad_date_and_resolution() {
        let mut bad_date = REQUIRED.to_vec();
        bad_date[10] = "2022-13-01";
        assert!(Cli::try_parse_from(bad_date).is_err());

        let mut bad_res = REQUIRED.to_vec();
        bad_res.extend(["--resolution", "16"]);
        assert!(Cli::try_parse_from(bad_res).is_err());
    }
}
