//! Flattens a decoded grid into indexed records.

use h3o::CellIndex;

use super::{DecodedGrid, GridPoint};
use crate::{
    error::{PipelineError, PipelineResult},
    spatial::SpatialIndexer,
};

/// Lazy iterator over the present values of a grid, time-major.
#[derive(Debug, Clone)]
pub struct GridPoints<'a> {
    grid: &'a DecodedGrid,
    cells: Vec<CellIndex>,
    position: usize,
}

impl Iterator for GridPoints<'_> {
    type Item = GridPoint;

    fn next(&mut self) -> Option<GridPoint> {
        let (_, n_lat, n_lon) = self.grid.shape();
        let plane = n_lat * n_lon;

        while self.position < self.grid.values.len() {
            let flat = self.position;
            self.position += 1;

            let Some(value) = self.grid.values[flat] else {
                continue;
            };

            let t = flat / plane;
            let cell = flat % plane;
            let (i, j) = (cell / n_lon, cell % n_lon);

            return Some(GridPoint {
                timestamp: self.grid.times[t],
                latitude: self.grid.latitudes[i],
                longitude: self.grid.longitudes[j],
                value,
                spatial_index: self.cells[cell],
            });
        }

        None
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.grid.values.len() - self.position))
    }
}

/// Indexes every (lat, lon) pair of `grid` once and returns the records.
pub fn materialize<'a>(
    grid: &'a DecodedGrid,
    indexer: &SpatialIndexer,
) -> PipelineResult<GridPoints<'a>> {
    let cells = grid
        .latitudes
        .iter()
        .flat_map(|&lat| grid.longitudes.iter().map(move |&lon| (lat, lon)))
        .map(|(lat, lon)| indexer.index(lat, lon))
        .collect::<PipelineResult<Vec<_>>>()
        .map_err(|e| PipelineError::schema(&grid.source, e))?;

    Ok(GridPoints {
        grid,
        cells,
        position: 0,
    })
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use chrono::{Duration, TimeZone, Utc};

    use super::*;
    use crate::reading::{read_grid, test::FakeSource};

    fn grid_fixture(values: Vec<Option<f64>>) -> DecodedGrid {
        let t0 = Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap();
        DecodedGrid {
            source: "fixture".to_string(),
            variable: "tp".to_string(),
            times: vec![t0, t0 + Duration::hours(1)],
            latitudes: vec![10.0, 9.75],
            longitudes: vec![20.0, 20.25, 20.5],
            values,
        }
    }

    #[test]
    fn should_emit_one_record_per_cell_and_step() {
        let grid = grid_fixture((0..12).map(|v| Some(v as f64)).collect());
        let points: Vec<GridPoint> = materialize(&grid, &SpatialIndexer::default())
            .unwrap()
            .collect();

        assert_eq!(points.len(), 12);
        assert_eq!(points[0].latitude, 10.0);
        assert_eq!(points[0].longitude, 20.0);
        assert_eq!(points[5].latitude, 9.75);
        assert_eq!(points[5].longitude, 20.5);
        assert_eq!(points[5].timestamp, grid.times[0]);
        assert_eq!(points[6].timestamp, grid.times[1]);
        assert_eq!(points[11].value, 11.0);
    }

    #[test]
    fn should_skip_missing_values() {
        let mut values: Vec<Option<f64>> = (0..12).map(|v| Some(v as f64)).collect();
        values[1] = None;
        values[7] = None;
        let grid = grid_fixture(values);

        let points: Vec<GridPoint> = materialize(&grid, &SpatialIndexer::default())
            .unwrap()
            .collect();

        assert_eq!(points.len(), 10);
        assert!(points.iter().all(|p| p.value != 1.0 && p.value != 7.0));
    }

    #[test]
    fn should_skip_sentinel_values_from_source() {
        let source = FakeSource::era5(0.0, vec![0.5, -32767.0, -32767.0, 1.0]);
        let grid = read_grid(&source, "fake.nc", None).unwrap();
        let points: Vec<GridPoint> = materialize(&grid, &SpatialIndexer::default())
            .unwrap()
            .collect();

        assert_eq!(points.len(), 2);
        assert_eq!(points[0].value, 0.5);
        assert_eq!(points[1].value, 1.0);
    }

    #[test]
    fn should_index_same_coordinate_identically_in_any_order() {
        let grid = grid_fixture((0..12).map(|v| Some(v as f64)).collect());
        let indexer = SpatialIndexer::default();

        let forward: Vec<GridPoint> = materialize(&grid, &indexer).unwrap().collect();
        let mut reversed = grid.clone();
        reversed.latitudes.reverse();
        reversed.longitudes.reverse();
        let backward: Vec<GridPoint> = materialize(&reversed, &indexer).unwrap().collect();

        for p in &forward {
            let twin = backward
                .iter()
                .find(|q| q.latitude == p.latitude && q.longitude == p.longitude)
                .unwrap();
            assert_eq!(p.spatial_index, twin.spatial_index);
            assert_eq!(p.spatial_index, indexer.index(p.latitude, p.longitude).unwrap());
        }

        let cells: HashSet<CellIndex> = forward.iter().map(|p| p.spatial_index).collect();
        assert!(cells.len() > 1);
    }

    #[test]
    fn should_be_lazy() {
        let grid = grid_fixture((0..12).map(|v| Some(v as f64)).collect());
        let mut points = materialize(&grid, &SpatialIndexer::default()).unwrap();

        assert_eq!(points.next().unwrap().value, 0.0);
        assert_eq!(points.size_hint(), (0, Some(11)));
    }
}
