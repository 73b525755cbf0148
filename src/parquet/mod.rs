//! Handles serialising grid points to the _parquet_ file format.
//!
//! Output columns are `timestamp`, `latitude`, `longitude`, `value` and
//! `spatial_index` (the H3 cell as a hex string).

pub mod encode;
pub mod read;
pub mod writer;

pub use read::verify;
pub use writer::{DatasetWriter, PartitionBy, WriteOptions, WriteReport};

/// Marker written once all files of a run are in place.
pub const SUCCESS_MARKER: &str = "_SUCCESS";

/// Prefix under which a run's files are written before being committed.
pub const STAGING_PREFIX: &str = "_temporary";

/// Columns the output can be partitioned by, as used in `<column>=<value>`
/// directory names.
pub const PARTITION_COLUMNS: [&str; 3] = ["spatial_index", "timestamp", "date"];
