//! NetCDF decoding through libnetcdf.
//!
//! libnetcdf opens files by path, so fetched bytes are spilled to a temp
//! file for the duration of the read.

use std::io::Write;

use netcdf::{AttributeValue, Variable};
use tracing::debug;

use super::{read_grid, DecodedGrid, GridSource, RawVariable, VariableAttributes, VariableInfo};
use crate::error::{PipelineError, PipelineResult};

/// A [`GridSource`] backed by an open NetCDF file.
pub struct NetcdfSource {
    file: netcdf::File,
    path: String,
}

impl NetcdfSource {
    pub fn open(local_path: &std::path::Path, display: &str) -> PipelineResult<Self> {
        let file = netcdf::open(local_path).map_err(|e| PipelineError::decode(display, e))?;

        Ok(NetcdfSource {
            file,
            path: display.to_string(),
        })
    }
}

impl GridSource for NetcdfSource {
    fn dimension_len(&self, name: &str) -> Option<usize> {
        self.file.dimension(name).map(|d| d.len())
    }

    fn variables(&self) -> Vec<VariableInfo> {
        self.file
            .variables()
            .map(|v| VariableInfo {
                name: v.name(),
                dimensions: v.dimensions().iter().map(|d| d.name()).collect(),
            })
            .collect()
    }

    fn read(&self, name: &str) -> PipelineResult<RawVariable> {
        let var = self
            .file
            .variable(name)
            .ok_or_else(|| PipelineError::schema(&self.path, format!("no variable `{}`", name)))?;

        let values: Vec<f64> = var
            .get_values(..)
            .map_err(|e| PipelineError::decode(&self.path, format!("reading `{}`: {}", name, e)))?;

        let attributes = VariableAttributes {
            fill_value: get_f64_attr(&var, "_FillValue"),
            missing_value: get_f64_attr(&var, "missing_value"),
            scale_factor: get_f64_attr(&var, "scale_factor"),
            add_offset: get_f64_attr(&var, "add_offset"),
            units: get_str_attr(&var, "units"),
        };

        Ok(RawVariable { values, attributes })
    }
}

/// Decodes the bytes of one NetCDF file into a grid.
pub fn decode(bytes: &[u8], path: &str, variable: Option<&str>) -> PipelineResult<DecodedGrid> {
    let mut spill = tempfile::Builder::new()
        .prefix("era5-")
        .suffix(".nc")
        .tempfile()
        .map_err(|e| PipelineError::decode(path, e))?;
    spill
        .write_all(bytes)
        .and_then(|_| spill.flush())
        .map_err(|e| PipelineError::decode(path, e))?;

    let source = NetcdfSource::open(spill.path(), path)?;
    let grid = read_grid(&source, path, variable)?;

    debug!(
        path,
        variable = %grid.variable,
        times = grid.times.len(),
        lats = grid.latitudes.len(),
        lons = grid.longitudes.len(),
        present = grid.present_count(),
        "Decoded grid"
    );
    Ok(grid)
}

// Checking first avoids libnetcdf printing errors for absent attributes.
fn has_attr(var: &Variable, name: &str) -> bool {
    var.attributes().any(|attr| attr.name() == name)
}

fn get_f64_attr(var: &Variable, name: &str) -> Option<f64> {
    if !has_attr(var, name) {
        return None;
    }
    let value = var.attribute_value(name)?.ok()?;
    f64::try_from(value).ok()
}

fn get_str_attr(var: &Variable, name: &str) -> Option<String> {
    if !has_attr(var, name) {
        return None;
    }
    match var.attribute_value(name)?.ok()? {
        AttributeValue::Str(s) => Some(s),
        _ => None,
    }
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod test {
    use std::path::Path;

    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    use super::*;

    /// Writes a one-step ERA5-style file with a `tp` variable on `lats` x `lons`.
    pub(crate) fn write_era5_file(
        path: &Path,
        hours: i32,
        lats: &[f32],
        lons: &[f32],
        tp: &[f32],
    ) {
        let mut file = netcdf::create(path).unwrap();
        file.add_dimension("time", 1).unwrap();
        file.add_dimension("latitude", lats.len()).unwrap();
        file.add_dimension("longitude", lons.len()).unwrap();

        let mut time = file.add_variable::<i32>("time", &["time"]).unwrap();
        time.put_attribute("units", "hours since 1900-01-01 00:00:00.0")
            .unwrap();
        time.put_values(&[hours], ..).unwrap();

        let mut lat = file.add_variable::<f32>("latitude", &["latitude"]).unwrap();
        lat.put_values(lats, ..).unwrap();

        let mut lon = file.add_variable::<f32>("longitude", &["longitude"]).unwrap();
        lon.put_values(lons, ..).unwrap();

        let mut var = file
            .add_variable::<f32>("tp", &["time", "latitude", "longitude"])
            .unwrap();
        var.put_attribute("_FillValue", -32767.0f32).unwrap();
        var.put_attribute("units", "m").unwrap();
        var.put_values(tp, ..).unwrap();
    }

    #[test]
    fn should_decode_netcdf_bytes() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("surface.nc");
        write_era5_file(&path, 1_069_440, &[51.0, 50.75], &[0.0, 0.25], &[0.5, -32767.0, 1.5, 2.5]);

        let bytes = std::fs::read(&path).unwrap();
        let grid = decode(&bytes, "mem://surface.nc", None).unwrap();

        assert_eq!(grid.variable, "tp");
        assert_eq!(grid.shape(), (1, 2, 2));
        assert_eq!(grid.times[0], Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap());
        assert_eq!(grid.latitudes, vec![51.0, 50.75]);
        assert_eq!(grid.values, vec![Some(0.5), None, Some(1.5), Some(2.5)]);
    }

    #[test]
    fn should_fail_to_decode_garbage() {
        let err = decode(b"definitely not netcdf", "mem://junk.nc", None).unwrap_err();

        assert!(matches!(err, PipelineError::Decode { .. }));
    }

    #[test]
    fn should_fail_on_missing_dimension() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("no-time.nc");
        {
            let mut file = netcdf::create(&path).unwrap();
            file.add_dimension("latitude", 1).unwrap();
            file.add_dimension("longitude", 1).unwrap();
        }

        let bytes = std::fs::read(&path).unwrap();
        let err = decode(&bytes, "mem://no-time.nc", None).unwrap_err();

        assert!(matches!(err, PipelineError::Schema { .. }));
    }
}
