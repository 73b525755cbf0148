//! H3 cell assignment for grid coordinates.

use h3o::{CellIndex, LatLng, Resolution};

use crate::error::{PipelineError, PipelineResult};

/// Resolution used by the ERA5 Parquet datasets (~0.1 km² cells).
pub const DEFAULT_RESOLUTION: u8 = 9;

/// Maps a coordinate to its H3 cell at a fixed resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpatialIndexer {
    resolution: Resolution,
}

impl SpatialIndexer {
    pub fn new(resolution: Resolution) -> Self {
        SpatialIndexer { resolution }
    }

    pub fn resolution(&self) -> Resolution {
        self.resolution
    }

    /// ERA5 longitudes run from 0 to 360; they are folded into [-180, 180)
    /// before indexing so both conventions land in the same cell.
    pub fn index(&self, lat: f64, lon: f64) -> PipelineResult<CellIndex> {
        let coord = LatLng::new(lat, normalize_longitude(lon)).map_err(|e| {
            PipelineError::schema(format!("({}, {})", lat, lon), format!("invalid coordinate: {}", e))
        })?;

        Ok(coord.to_cell(self.resolution))
    }
}

impl Default for SpatialIndexer {
    fn default() -> Self {
        SpatialIndexer::new(Resolution::Nine)
    }
}

pub fn normalize_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}

// -- Tests -------------------------------------------------------------------
