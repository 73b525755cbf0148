//! Decoding ERA5 grids and flattening them into records.

pub mod decode;
pub mod materialize;
pub mod time_units;

use chrono::{DateTime, Utc};
use h3o::CellIndex;

use crate::error::{PipelineError, PipelineResult};

pub use decode::decode;
pub use materialize::materialize;
use time_units::TimeAxis;

const TIME_NAMES: [&str; 2] = ["time", "valid_time"];
const LATITUDE_NAMES: [&str; 2] = ["latitude", "lat"];
const LONGITUDE_NAMES: [&str; 2] = ["longitude", "lon"];

/// One observation of the data variable at a grid cell.
#[derive(Debug, Clone, PartialEq)]
pub struct GridPoint {
    pub timestamp: DateTime<Utc>,
    pub latitude: f64,
    pub longitude: f64,
    pub value: f64,
    pub spatial_index: CellIndex,
}

/// A (time, latitude, longitude) cube of one variable with missing values
/// resolved and packing undone. `values` is row-major in that axis order.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedGrid {
    pub source: String,
    pub variable: String,
    pub times: Vec<DateTime<Utc>>,
    pub latitudes: Vec<f64>,
    pub longitudes: Vec<f64>,
    pub values: Vec<Option<f64>>,
}

impl DecodedGrid {
    pub fn shape(&self) -> (usize, usize, usize) {
        (self.times.len(), self.latitudes.len(), self.longitudes.len())
    }

    pub fn present_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

/// Name and dimension names of a variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableInfo {
    pub name: String,
    pub dimensions: Vec<String>,
}

/// Attributes that affect how raw values are interpreted.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariableAttributes {
    pub fill_value: Option<f64>,
    pub missing_value: Option<f64>,
    pub scale_factor: Option<f64>,
    pub add_offset: Option<f64>,
    pub units: Option<String>,
}

/// Raw values of a variable, flattened in storage order.
#[derive(Debug, Clone, PartialEq)]
pub struct RawVariable {
    pub values: Vec<f64>,
    pub attributes: VariableAttributes,
}

/// The read surface a decoded file must offer.
pub trait GridSource {
    fn dimension_len(&self, name: &str) -> Option<usize>;
    fn variables(&self) -> Vec<VariableInfo>;
    fn read(&self, name: &str) -> PipelineResult<RawVariable>;
}

/// Checks the layout of `source` and extracts the grid of `variable`, or of
/// the only (time, lat, lon) variable when no name is given.
pub fn read_grid<S: GridSource + ?Sized>(
    source: &S,
    path: &str,
    variable: Option<&str>,
) -> PipelineResult<DecodedGrid> {
    let time_dim = find_dimension(source, path, &TIME_NAMES)?;
    let lat_dim = find_dimension(source, path, &LATITUDE_NAMES)?;
    let lon_dim = find_dimension(source, path, &LONGITUDE_NAMES)?;

    let axes = [time_dim.as_str(), lat_dim.as_str(), lon_dim.as_str()];
    let variables = source.variables();
    let info = select_variable(source, &variables, path, &axes, variable)?;

    let raw_time = read_coordinate(source, path, &time_dim)?;
    let axis = match &raw_time.attributes.units {
        Some(units) => TimeAxis::parse(units).map_err(|e| PipelineError::decode(path, e))?,
        None => TimeAxis::default(),
    };
    let times = raw_time
        .values
        .iter()
        .map(|&v| {
            axis.to_datetime(v)
                .ok_or_else(|| PipelineError::decode(path, format!("time value {} is out of range", v)))
        })
        .collect::<PipelineResult<Vec<_>>>()?;

    let latitudes = read_coordinate(source, path, &lat_dim)?.values;
    let longitudes = read_coordinate(source, path, &lon_dim)?.values;

    let raw = source.read(&info.name)?;
    let expected = times.len() * latitudes.len() * longitudes.len();
    if raw.values.len() != expected {
        return Err(PipelineError::schema(
            path,
            format!(
                "`{}` has {} values, expected {} ({} x {} x {})",
                info.name,
                raw.values.len(),
                expected,
                times.len(),
                latitudes.len(),
                longitudes.len()
            ),
        ));
    }

    let values = unpack(&raw);

    Ok(DecodedGrid {
        source: path.to_string(),
        variable: info.name.clone(),
        times,
        latitudes,
        longitudes,
        values,
    })
}

fn find_dimension<S: GridSource + ?Sized>(
    source: &S,
    path: &str,
    names: &[&str],
) -> PipelineResult<String> {
    names
        .iter()
        .find(|name| source.dimension_len(name).is_some())
        .map(|name| name.to_string())
        .ok_or_else(|| PipelineError::schema(path, format!("no `{}` dimension", names[0])))
}

fn read_coordinate<S: GridSource + ?Sized>(
    source: &S,
    path: &str,
    name: &str,
) -> PipelineResult<RawVariable> {
    let raw = source.read(name).map_err(|_| {
        PipelineError::schema(path, format!("no coordinate variable for `{}`", name))
    })?;

    let len = source.dimension_len(name).unwrap_or_default();
    if raw.values.len() != len {
        return Err(PipelineError::schema(
            path,
            format!("coordinate `{}` has {} values for a dimension of {}", name, raw.values.len(), len),
        ));
    }

    Ok(raw)
}

// Dimensions of length one in front of the cube (e.g. `expver`) are ignored.
fn spans_axes<S: GridSource + ?Sized>(source: &S, info: &VariableInfo, axes: &[&str; 3]) -> bool {
    let Some(split) = info.dimensions.len().checked_sub(3) else {
        return false;
    };
    let (leading, cube) = info.dimensions.split_at(split);

    cube.iter().map(String::as_str).eq(axes.iter().copied())
        && leading.iter().all(|d| source.dimension_len(d) == Some(1))
}

fn select_variable<'v, S: GridSource + ?Sized>(
    source: &S,
    variables: &'v [VariableInfo],
    path: &str,
    axes: &[&str; 3],
    requested: Option<&str>,
) -> PipelineResult<&'v VariableInfo> {
    if let Some(name) = requested {
        let info = variables
            .iter()
            .find(|v| v.name == name)
            .ok_or_else(|| PipelineError::schema(path, format!("no variable `{}`", name)))?;

        if !spans_axes(source, info, axes) {
            return Err(PipelineError::schema(
                path,
                format!(
                    "`{}` has dimensions {:?}, expected {:?}",
                    name, info.dimensions, axes
                ),
            ));
        }
        return Ok(info);
    }

    let candidates: Vec<&VariableInfo> = variables
        .iter()
        .filter(|v| !axes.contains(&v.name.as_str()) && spans_axes(source, v, axes))
        .collect();

    match candidates.as_slice() {
        [only] => Ok(only),
        [] => Err(PipelineError::schema(
            path,
            format!("no variable spans {:?}", axes),
        )),
        many => Err(PipelineError::schema(
            path,
            format!(
                "several data variables ({}), choose one with --variable",
                many.iter().map(|v| v.name.as_str()).collect::<Vec<_>>().join(", ")
            ),
        )),
    }
}

fn unpack(raw: &RawVariable) -> Vec<Option<f64>> {
    let attrs = &raw.attributes;
    let scale = attrs.scale_factor.unwrap_or(1.0);
    let offset = attrs.add_offset.unwrap_or(0.0);

    raw.values
        .iter()
        .map(|&v| {
            let missing = v.is_nan()
                || attrs.fill_value == Some(v)
                || attrs.missing_value == Some(v);
            (!missing).then(|| v * scale + offset)
        })
        .collect()
}

// -- Tests -------------------------------------------------------------------
