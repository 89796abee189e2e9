use crate::types::{CoordArray, GenError, GenResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// GCP subsampling step as configured: one stride for both axes, or `[step_x, step_y]`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum XyGcpStep {
    Uniform(i64),
    PerAxis(i64, i64),
}

impl Default for XyGcpStep {
    fn default() -> Self {
        XyGcpStep::Uniform(1) // no subsampling
    }
}

impl XyGcpStep {
    /// Validate and return `(step_x, step_y)`
    pub fn resolve(self) -> GenResult<(usize, usize)> {
        let (step_x, step_y) = match self {
            XyGcpStep::Uniform(step) => (step, step),
            XyGcpStep::PerAxis(step_x, step_y) => (step_x, step_y),
        };
        if step_x <= 0 || step_y <= 0 {
            return Err(GenError::Configuration(format!(
                "xy_gcp_step must be greater than zero, got ({}, {})",
                step_x, step_y
            )));
        }
        Ok((step_x as usize, step_y as usize))
    }
}

/// Sparse grid of ground control points taken from 2D coordinate arrays
#[derive(Debug, Clone)]
pub struct GcpGrid {
    row_indices: Vec<usize>,
    col_indices: Vec<usize>,
    /// GCP longitudes, shape (row_indices.len(), col_indices.len())
    lon: CoordArray,
    /// GCP latitudes, same shape as `lon`
    lat: CoordArray,
    step_x: usize,
    step_y: usize,
}

impl GcpGrid {
    /// Assemble a grid from explicit parts.
    ///
    /// Index lists must be strictly increasing and match the coordinate array shape.
    pub fn from_parts(
        row_indices: Vec<usize>,
        col_indices: Vec<usize>,
        lon: CoordArray,
        lat: CoordArray,
        step_x: usize,
        step_y: usize,
    ) -> GenResult<Self> {
        let expected = vec![row_indices.len(), col_indices.len()];
        for (name, coords) in [("lon", &lon), ("lat", &lat)] {
            if coords.dim() != (row_indices.len(), col_indices.len()) {
                return Err(GenError::ShapeMismatch {
                    name: format!("gcp_{}", name),
                    expected: expected.clone(),
                    actual: vec![coords.nrows(), coords.ncols()],
                });
            }
        }
        let increasing = |v: &[usize]| v.windows(2).all(|w| w[0] < w[1]);
        if !increasing(&row_indices) || !increasing(&col_indices) {
            return Err(GenError::InvalidInput(
                "GCP indices must be strictly increasing".to_string(),
            ));
        }
        if step_x == 0 || step_y == 0 {
            return Err(GenError::Configuration(
                "GCP steps must be greater than zero".to_string(),
            ));
        }
        Ok(Self {
            row_indices,
            col_indices,
            lon,
            lat,
            step_x,
            step_y,
        })
    }

    pub fn row_indices(&self) -> &[usize] {
        &self.row_indices
    }

    pub fn col_indices(&self) -> &[usize] {
        &self.col_indices
    }

    pub fn lon(&self) -> &CoordArray {
        &self.lon
    }

    pub fn lat(&self) -> &CoordArray {
        &self.lat
    }

    pub fn step_x(&self) -> usize {
        self.step_x
    }

    pub fn step_y(&self) -> usize {
        self.step_y
    }

    /// Number of control points per axis (rows, cols)
    pub fn dim(&self) -> (usize, usize) {
        (self.row_indices.len(), self.col_indices.len())
    }

    /// Iterate over `(row, col, lon, lat)` for every control point
    pub fn points(&self) -> impl Iterator<Item = (usize, usize, f64, f64)> + '_ {
        self.row_indices.iter().enumerate().flat_map(move |(i, &row)| {
            self.col_indices
                .iter()
                .enumerate()
                .map(move |(j, &col)| (row, col, self.lon[[i, j]], self.lat[[i, j]]))
        })
    }
}

/// Builds GCP grids by striding over swath coordinate arrays
#[derive(Debug, Clone, Copy)]
pub struct GcpGridBuilder {
    step_x: usize,
    step_y: usize,
}

impl GcpGridBuilder {
    /// Create a builder, rejecting non-positive steps
    pub fn new(step: XyGcpStep) -> GenResult<Self> {
        let (step_x, step_y) = step.resolve()?;
        Ok(Self { step_x, step_y })
    }

    /// Select control points from `lon`/`lat` of shape (rows, cols)
    pub fn build(&self, lon: &CoordArray, lat: &CoordArray) -> GenResult<GcpGrid> {
        if lon.dim() != lat.dim() {
            return Err(GenError::ShapeMismatch {
                name: "lat".to_string(),
                expected: vec![lon.nrows(), lon.ncols()],
                actual: vec![lat.nrows(), lat.ncols()],
            });
        }
        let (rows, cols) = lon.dim();
        if rows < 2 || cols < 2 {
            return Err(GenError::GridTooSparse { rows, cols });
        }

        let row_indices = axis_indices(rows, self.step_y);
        let col_indices = axis_indices(cols, self.step_x);
        log::debug!(
            "GCP grid: {}x{} points from {}x{} swath (step_x={}, step_y={})",
            row_indices.len(),
            col_indices.len(),
            rows,
            cols,
            self.step_x,
            self.step_y
        );

        let shape = (row_indices.len(), col_indices.len());
        let gcp_lon = Array2::from_shape_fn(shape, |(i, j)| lon[[row_indices[i], col_indices[j]]]);
        let gcp_lat = Array2::from_shape_fn(shape, |(i, j)| lat[[row_indices[i], col_indices[j]]]);

        Ok(GcpGrid {
            row_indices,
            col_indices,
            lon: gcp_lon,
            lat: gcp_lat,
            step_x: self.step_x,
            step_y: self.step_y,
        })
    }
}

/// Strided indices over `0..size`, always ending with the last index
fn axis_indices(size: usize, step: usize) -> Vec<usize> {
    let last = size - 1;
    let mut indices: Vec<usize> = (0..size).step_by(step).collect();
    if indices.last() != Some(&last) {
        indices.push(last);
    }
    indices
}
