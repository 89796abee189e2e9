use crate::core::gcp_grid::GcpGrid;
use crate::types::{
    Band, BandRole, GenError, GenResult, GriddedDataset, MaskArray, Real, SourceDataset,
    CRS_WKT_EPSG_4326,
};
use ndarray::{s, Array1, Array2, Array3, ArrayView2, Axis, Ix2, Ix3, Zip};
use num_traits::Float;
use std::collections::BTreeMap;

/// Tolerance on barycentric weights when testing triangle membership
const BARYCENTRIC_EPS: f64 = 1e-9;

/// Reprojection parameters
#[derive(Debug, Clone)]
pub struct ReprojectionParams {
    /// Explicit target resolution (x, y) in degrees; derived from the GCPs when `None`
    pub resolution: Option<(f64, f64)>,
    /// Output rows per processing tile
    pub tile_rows: usize,
    /// Upper bound on output grid cells
    pub max_output_cells: usize,
}

impl Default for ReprojectionParams {
    fn default() -> Self {
        Self {
            resolution: None,
            tile_rows: 64,
            max_output_cells: 100_000_000,
        }
    }
}

/// Regular WGS84 target grid, cell centres from (lon_min, lat_max) outwards
#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectionGrid {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
    pub resolution_x: f64,
    pub resolution_y: f64,
    pub width: usize,
    pub height: usize,
}

impl ReprojectionGrid {
    /// Derive the target grid from the extent and spacing of the control points
    pub fn from_gcp_grid(
        gcp: &GcpGrid,
        resolution: Option<(f64, f64)>,
        max_output_cells: usize,
    ) -> GenResult<Self> {
        let (lon_min, lon_max) = finite_min_max(gcp.lon().iter().copied())
            .ok_or_else(|| GenError::DegenerateGeometry("no finite GCP longitudes".to_string()))?;
        let (lat_min, lat_max) = finite_min_max(gcp.lat().iter().copied())
            .ok_or_else(|| GenError::DegenerateGeometry("no finite GCP latitudes".to_string()))?;

        if !(lon_max > lon_min) || !(lat_max > lat_min) {
            return Err(GenError::DegenerateGeometry(format!(
                "GCP extent has zero area: lon [{}, {}], lat [{}, {}]",
                lon_min, lon_max, lat_min, lat_max
            )));
        }

        let (resolution_x, resolution_y) = match resolution {
            Some((rx, ry)) => {
                if !(rx.is_finite() && rx > 0.0 && ry.is_finite() && ry > 0.0) {
                    return Err(GenError::Configuration(format!(
                        "resolution must be positive, got ({}, {})",
                        rx, ry
                    )));
                }
                (rx, ry)
            }
            None => derive_resolution(gcp)?,
        };

        // Sized in f64 first: tiny resolutions overflow usize
        let width = ((lon_max - lon_min) / resolution_x).round() + 1.0;
        let height = ((lat_max - lat_min) / resolution_y).round() + 1.0;
        let cells = width * height;
        if !(cells.is_finite() && cells <= max_output_cells as f64) {
            return Err(GenError::Configuration(format!(
                "target grid {:.0}x{:.0} exceeds the limit of {} cells",
                width, height, max_output_cells
            )));
        }
        let (width, height) = (width as usize, height as usize);

        Ok(Self {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
            resolution_x,
            resolution_y,
            width,
            height,
        })
    }

    /// Cell-centre longitudes, ascending
    pub fn lon_axis(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.width, |j| self.lon_min + j as f64 * self.resolution_x)
    }

    /// Cell-centre latitudes, descending
    pub fn lat_axis(&self) -> Array1<f64> {
        Array1::from_shape_fn(self.height, |i| self.lat_max - i as f64 * self.resolution_y)
    }

    /// Fractional output (row, col) of a geographic position
    fn to_pixel(&self, lon: f64, lat: f64) -> (f64, f64) {
        (
            (self.lat_max - lat) / self.resolution_y,
            (lon - self.lon_min) / self.resolution_x,
        )
    }
}

/// Derive (res_x, res_y) as the median per-pixel spacing between adjacent GCPs
pub fn derive_resolution(gcp: &GcpGrid) -> GenResult<(f64, f64)> {
    let (lon, lat) = (gcp.lon(), gcp.lat());
    let (rows, cols) = gcp.dim();
    let rows_idx = gcp.row_indices();
    let cols_idx = gcp.col_indices();

    let spacing = |(i0, j0): (usize, usize), (i1, j1): (usize, usize), pixels: usize| {
        let d = (lon[[i1, j1]] - lon[[i0, j0]]).hypot(lat[[i1, j1]] - lat[[i0, j0]]);
        d / pixels as f64
    };

    let mut along_x = Vec::with_capacity(rows * cols);
    for i in 0..rows {
        for j in 0..cols.saturating_sub(1) {
            along_x.push(spacing((i, j), (i, j + 1), cols_idx[j + 1] - cols_idx[j]));
        }
    }
    let mut along_y = Vec::with_capacity(rows * cols);
    for i in 0..rows.saturating_sub(1) {
        for j in 0..cols {
            along_y.push(spacing((i, j), (i + 1, j), rows_idx[i + 1] - rows_idx[i]));
        }
    }

    match (median(along_x), median(along_y)) {
        (Some(rx), Some(ry)) if rx > 0.0 && ry > 0.0 => {
            log::debug!("Derived resolution: {:.6}° x {:.6}°", rx, ry);
            Ok((rx, ry))
        }
        (rx, ry) => Err(GenError::DegenerateGeometry(format!(
            "cannot derive resolution from GCP spacing (x: {:?}, y: {:?})",
            rx, ry
        ))),
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    values.retain(|v| v.is_finite());
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

fn finite_min_max(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Triangle vertex: output pixel position plus source pixel indices
#[derive(Debug, Clone, Copy)]
struct Vertex {
    /// Output row/col (fractional)
    y: f64,
    x: f64,
    /// Source row/col
    src_row: f64,
    src_col: f64,
}

/// One half of a GCP mesh quad in output pixel space
#[derive(Debug, Clone, Copy)]
struct Triangle {
    v: [Vertex; 3],
    y_min: f64,
    y_max: f64,
    x_min: f64,
    x_max: f64,
}

impl Triangle {
    fn new(v: [Vertex; 3]) -> Option<Self> {
        let area2 = (v[1].x - v[0].x) * (v[2].y - v[0].y) - (v[2].x - v[0].x) * (v[1].y - v[0].y);
        if !area2.is_finite() || area2.abs() < f64::EPSILON {
            return None;
        }
        let ys = [v[0].y, v[1].y, v[2].y];
        let xs = [v[0].x, v[1].x, v[2].x];
        Some(Self {
            v,
            y_min: ys.iter().copied().fold(f64::INFINITY, f64::min),
            y_max: ys.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            x_min: xs.iter().copied().fold(f64::INFINITY, f64::min),
            x_max: xs.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        })
    }

    /// Barycentric weights of (y, x), or `None` when outside
    fn weights(&self, y: f64, x: f64) -> Option<[f64; 3]> {
        let [a, b, c] = self.v;
        let den = (b.y - c.y) * (a.x - c.x) + (c.x - b.x) * (a.y - c.y);
        let w1 = ((b.y - c.y) * (x - c.x) + (c.x - b.x) * (y - c.y)) / den;
        let w2 = ((c.y - a.y) * (x - c.x) + (a.x - c.x) * (y - c.y)) / den;
        let w3 = 1.0 - w1 - w2;
        if w1 >= -BARYCENTRIC_EPS && w2 >= -BARYCENTRIC_EPS && w3 >= -BARYCENTRIC_EPS {
            Some([w1, w2, w3])
        } else {
            None
        }
    }
}

/// Split each GCP mesh quad into two triangles in output pixel space and file them
/// under every tile of `tile_rows` output rows they overlap.
///
/// Triangles entirely outside the target grid are dropped.
fn bucket_triangles(
    gcp: &GcpGrid,
    grid: &ReprojectionGrid,
    tile_rows: usize,
) -> Vec<Vec<Triangle>> {
    let (rows, cols) = gcp.dim();
    let vertex = |i: usize, j: usize| {
        let (y, x) = grid.to_pixel(gcp.lon()[[i, j]], gcp.lat()[[i, j]]);
        Vertex {
            y,
            x,
            src_row: gcp.row_indices()[i] as f64,
            src_col: gcp.col_indices()[j] as f64,
        }
    };

    let tile_rows = tile_rows.max(1);
    let n_tiles = (grid.height + tile_rows - 1) / tile_rows;
    let last_row = grid.height.saturating_sub(1) as f64;
    let last_col = grid.width.saturating_sub(1) as f64;
    let mut buckets: Vec<Vec<Triangle>> = vec![Vec::new(); n_tiles];
    if n_tiles == 0 {
        return buckets;
    }

    let mut file = |tri: Triangle| {
        if tri.y_max < -BARYCENTRIC_EPS
            || tri.y_min > last_row + BARYCENTRIC_EPS
            || tri.x_max < -BARYCENTRIC_EPS
            || tri.x_min > last_col + BARYCENTRIC_EPS
        {
            return;
        }
        let r0 = (tri.y_min - BARYCENTRIC_EPS).ceil().max(0.0) as usize;
        let r1 = (tri.y_max + BARYCENTRIC_EPS).floor().min(last_row) as usize;
        let (first, last) = (r0 / tile_rows, (r1 / tile_rows).min(n_tiles - 1));
        if first > last {
            return;
        }
        for bucket in &mut buckets[first..=last] {
            bucket.push(tri);
        }
    };

    for i in 0..rows.saturating_sub(1) {
        for j in 0..cols.saturating_sub(1) {
            let p00 = vertex(i, j);
            let p01 = vertex(i, j + 1);
            let p10 = vertex(i + 1, j);
            let p11 = vertex(i + 1, j + 1);
            if let Some(tri) = Triangle::new([p00, p01, p11]) {
                file(tri);
            }
            if let Some(tri) = Triangle::new([p00, p11, p10]) {
                file(tri);
            }
        }
    }
    buckets
}

/// Source (row, col) indices for one horizontal strip of output rows
struct IndexTile {
    start_row: usize,
    src_row: Array2<f64>,
    src_col: Array2<f64>,
}

fn rasterize_tile(
    triangles: &[Triangle],
    start_row: usize,
    end_row: usize,
    width: usize,
) -> IndexTile {
    let mut src_row = Array2::from_elem((end_row - start_row, width), f64::NAN);
    let mut src_col = Array2::from_elem((end_row - start_row, width), f64::NAN);

    for tri in triangles {
        if tri.y_max < start_row as f64 - BARYCENTRIC_EPS
            || tri.y_min > (end_row - 1) as f64 + BARYCENTRIC_EPS
        {
            continue;
        }
        let r0 = ((tri.y_min - BARYCENTRIC_EPS).ceil().max(start_row as f64)) as usize;
        let r1 = ((tri.y_max + BARYCENTRIC_EPS).floor().min((end_row - 1) as f64)) as usize;
        let c0 = (tri.x_min - BARYCENTRIC_EPS).ceil().max(0.0);
        let c1 = (tri.x_max + BARYCENTRIC_EPS).floor().min((width - 1) as f64);
        if c1 < c0 {
            continue;
        }
        let (c0, c1) = (c0 as usize, c1 as usize);

        for r in r0..=r1 {
            for c in c0..=c1 {
                if let Some(w) = tri.weights(r as f64, c as f64) {
                    let local = r - start_row;
                    let [a, b, d] = tri.v;
                    src_row[[local, c]] = w[0] * a.src_row + w[1] * b.src_row + w[2] * d.src_row;
                    src_col[[local, c]] = w[0] * a.src_col + w[1] * b.src_col + w[2] * d.src_col;
                }
            }
        }
    }

    IndexTile {
        start_row,
        src_row,
        src_col,
    }
}

/// Bilinear sample at fractional (row, col); NaN outside or when a contributing pixel is NaN
pub fn sample_bilinear<T: Float>(image: &ArrayView2<T>, row: f64, col: f64) -> T {
    let (height, width) = image.dim();
    if !row.is_finite() || !col.is_finite() || height == 0 || width == 0 {
        return T::nan();
    }
    let row = row.clamp(0.0, (height - 1) as f64);
    let col = col.clamp(0.0, (width - 1) as f64);
    let y1 = row.floor() as usize;
    let x1 = col.floor() as usize;
    let y2 = (y1 + 1).min(height - 1);
    let x2 = (x1 + 1).min(width - 1);
    let dy = row - y1 as f64;
    let dx = col - x1 as f64;

    let taps = [
        ((1.0 - dx) * (1.0 - dy), image[[y1, x1]]),
        (dx * (1.0 - dy), image[[y1, x2]]),
        ((1.0 - dx) * dy, image[[y2, x1]]),
        (dx * dy, image[[y2, x2]]),
    ];
    // Zero-weight taps are skipped so NaN neighbours don't leak into exact hits
    taps.iter()
        .filter(|(w, _)| *w > 0.0)
        .fold(T::zero(), |acc, &(w, v)| {
            acc + T::from(w).unwrap_or_else(T::nan) * v
        })
}

/// Nearest-neighbour sample at fractional (row, col)
pub fn sample_nearest<T: Float>(image: &ArrayView2<T>, row: f64, col: f64) -> T {
    let (height, width) = image.dim();
    if !row.is_finite() || !col.is_finite() || height == 0 || width == 0 {
        return T::nan();
    }
    let y = (row.round().max(0.0) as usize).min(height - 1);
    let x = (col.round().max(0.0) as usize).min(width - 1);
    image[[y, x]]
}

/// GCP based reprojector from swath geometry onto a regular WGS84 grid
pub struct GcpReprojector {
    params: ReprojectionParams,
}

impl GcpReprojector {
    /// Create a reprojector with default parameters
    pub fn new() -> Self {
        Self {
            params: ReprojectionParams::default(),
        }
    }

    /// Create a reprojector with custom parameters
    pub fn with_params(params: ReprojectionParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &ReprojectionParams {
        &self.params
    }

    /// Reproject every band of `dataset` onto the grid spanned by `gcp`
    pub fn reproject(&self, dataset: &SourceDataset, gcp: &GcpGrid) -> GenResult<GriddedDataset> {
        let (gcp_rows, gcp_cols) = gcp.dim();
        if gcp_rows < 2 || gcp_cols < 2 {
            return Err(GenError::GridTooSparse {
                rows: gcp_rows,
                cols: gcp_cols,
            });
        }
        dataset.validate()?;
        let (rows, cols) = dataset.spatial_shape();
        let last_row = gcp.row_indices().last().copied().unwrap_or(0);
        let last_col = gcp.col_indices().last().copied().unwrap_or(0);
        if last_row >= rows || last_col >= cols {
            return Err(GenError::ShapeMismatch {
                name: "gcp".to_string(),
                expected: vec![rows, cols],
                actual: vec![last_row + 1, last_col + 1],
            });
        }

        log::info!(
            "Starting GCP reprojection of {} bands ({}x{} swath, {}x{} GCPs)",
            dataset.bands.len(),
            rows,
            cols,
            gcp_rows,
            gcp_cols
        );

        let grid = ReprojectionGrid::from_gcp_grid(
            gcp,
            self.params.resolution,
            self.params.max_output_cells,
        )?;
        log::info!(
            "Target grid: {}x{} cells, lon [{:.5}, {:.5}], lat [{:.5}, {:.5}], res {:.6}° x {:.6}°",
            grid.width,
            grid.height,
            grid.lon_min,
            grid.lon_max,
            grid.lat_min,
            grid.lat_max,
            grid.resolution_x,
            grid.resolution_y
        );

        let (src_row, src_col) = self.source_index_map(&grid, gcp);

        let mut bands = BTreeMap::new();
        let mut masks = BTreeMap::new();
        for (name, band) in &dataset.bands {
            log::debug!("Resampling band '{}' ({:?})", name, band.role);
            let data = resample_band(band, &src_row, &src_col)
                .map_err(|e| e.for_band(name))?;
            let mask: MaskArray = data.mapv(|v| !v.is_nan());
            masks.insert(name.clone(), mask);
            bands.insert(
                name.clone(),
                Band {
                    data,
                    attrs: band.attrs.clone(),
                    role: band.role,
                },
            );
        }

        let covered = src_row.iter().filter(|v| v.is_finite()).count();
        let coverage = covered as f64 / (grid.width * grid.height) as f64 * 100.0;
        log::info!("✅ Reprojection completed: {:.1}% of target cells inside the swath", coverage);

        let mut attrs = dataset.attrs.clone();
        attrs.insert("crs_wkt".to_string(), CRS_WKT_EPSG_4326.into());
        attrs.insert("geospatial_lon_min".to_string(), grid.lon_min.into());
        attrs.insert("geospatial_lon_max".to_string(), grid.lon_max.into());
        attrs.insert("geospatial_lat_min".to_string(), grid.lat_min.into());
        attrs.insert("geospatial_lat_max".to_string(), grid.lat_max.into());
        attrs.insert("geospatial_lon_resolution".to_string(), grid.resolution_x.into());
        attrs.insert("geospatial_lat_resolution".to_string(), grid.resolution_y.into());

        Ok(GriddedDataset {
            lon: grid.lon_axis(),
            lat: grid.lat_axis(),
            bands,
            masks,
            attrs,
            time_range: None,
        })
    }

    /// Fractional source (row, col) for every target cell; NaN outside the GCP mesh
    pub fn source_index_map(
        &self,
        grid: &ReprojectionGrid,
        gcp: &GcpGrid,
    ) -> (Array2<f64>, Array2<f64>) {
        let tile_rows = self.params.tile_rows.max(1);
        let buckets = bucket_triangles(gcp, grid, tile_rows);
        log::debug!(
            "GCP mesh: {} triangle placements in {} tiles",
            buckets.iter().map(Vec::len).sum::<usize>(),
            buckets.len()
        );
        let tiles = compute_tiles(&buckets, tile_rows, grid.height, grid.width);

        let mut src_row = Array2::from_elem((grid.height, grid.width), f64::NAN);
        let mut src_col = Array2::from_elem((grid.height, grid.width), f64::NAN);
        for tile in tiles {
            let end = tile.start_row + tile.src_row.nrows();
            src_row.slice_mut(s![tile.start_row..end, ..]).assign(&tile.src_row);
            src_col.slice_mut(s![tile.start_row..end, ..]).assign(&tile.src_col);
        }
        (src_row, src_col)
    }
}

impl Default for GcpReprojector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "parallel")]
fn compute_tiles(
    buckets: &[Vec<Triangle>],
    tile_rows: usize,
    height: usize,
    width: usize,
) -> Vec<IndexTile> {
    use rayon::prelude::*;

    buckets
        .par_iter()
        .enumerate()
        .map(|(k, triangles)| {
            let start = k * tile_rows;
            rasterize_tile(triangles, start, (start + tile_rows).min(height), width)
        })
        .collect()
}

#[cfg(not(feature = "parallel"))]
fn compute_tiles(
    buckets: &[Vec<Triangle>],
    tile_rows: usize,
    height: usize,
    width: usize,
) -> Vec<IndexTile> {
    buckets
        .iter()
        .enumerate()
        .map(|(k, triangles)| {
            let start = k * tile_rows;
            rasterize_tile(triangles, start, (start + tile_rows).min(height), width)
        })
        .collect()
}

fn resample_plane(
    plane: &ArrayView2<Real>,
    src_row: &Array2<f64>,
    src_col: &Array2<f64>,
    role: BandRole,
) -> Array2<Real> {
    let sample: fn(&ArrayView2<Real>, f64, f64) -> Real = match role {
        BandRole::Continuous => sample_bilinear::<Real>,
        BandRole::Categorical => sample_nearest::<Real>,
    };
    map_indices(src_row, src_col, |r, c| sample(plane, r, c))
}

#[cfg(feature = "parallel")]
fn map_indices<F>(src_row: &Array2<f64>, src_col: &Array2<f64>, f: F) -> Array2<Real>
where
    F: Fn(f64, f64) -> Real + Sync + Send,
{
    Zip::from(src_row).and(src_col).par_map_collect(|&r, &c| f(r, c))
}

#[cfg(not(feature = "parallel"))]
fn map_indices<F>(src_row: &Array2<f64>, src_col: &Array2<f64>, f: F) -> Array2<Real>
where
    F: Fn(f64, f64) -> Real,
{
    Zip::from(src_row).and(src_col).map_collect(|&r, &c| f(r, c))
}

fn resample_band(
    band: &Band,
    src_row: &Array2<f64>,
    src_col: &Array2<f64>,
) -> GenResult<ndarray::ArrayD<Real>> {
    let shape_error = || GenError::ShapeMismatch {
        name: "band".to_string(),
        expected: vec![2, 3],
        actual: vec![band.data.ndim()],
    };
    match band.data.ndim() {
        2 => {
            let plane = band.data.view().into_dimensionality::<Ix2>().map_err(|_| shape_error())?;
            Ok(resample_plane(&plane, src_row, src_col, band.role).into_dyn())
        }
        3 => {
            let cube = band.data.view().into_dimensionality::<Ix3>().map_err(|_| shape_error())?;
            let (height, width) = src_row.dim();
            let mut out = Array3::from_elem((cube.len_of(Axis(0)), height, width), Real::NAN);
            for (k, plane) in cube.axis_iter(Axis(0)).enumerate() {
                out.index_axis_mut(Axis(0), k)
                    .assign(&resample_plane(&plane, src_row, src_col, band.role));
            }
            Ok(out.into_dyn())
        }
        _ => Err(shape_error()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::gcp_grid::{GcpGridBuilder, XyGcpStep};
    use approx::assert_abs_diff_eq;
    use ndarray::{array, ArrayD, IxDyn};

    fn regular_swath(rows: usize, cols: usize) -> SourceDataset {
        let lon = Array2::from_shape_fn((rows, cols), |(_, c)| 5.0 + c as f64 * 0.25);
        let lat = Array2::from_shape_fn((rows, cols), |(r, _)| 52.0 - r as f64 * 0.25);
        SourceDataset::new(lon, lat).unwrap()
    }

    #[test]
    fn test_median() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(vec![f64::NAN, 1.0]), Some(1.0));
        assert_eq!(median(vec![]), None);
    }

    #[test]
    fn test_bilinear_interpolation() {
        let image = array![[0.0, 1.0], [2.0, 3.0]];
        let view = image.view();
        assert_abs_diff_eq!(sample_bilinear(&view, 0.5, 0.5), 1.5, epsilon = 1e-12);
        assert_abs_diff_eq!(sample_bilinear(&view, 1.0, 0.0), 2.0, epsilon = 1e-12);
        assert!(sample_bilinear(&view, f64::NAN, 0.0).is_nan());
    }

    #[test]
    fn test_bilinear_ignores_zero_weight_nan() {
        let image = array![[1.0, f64::NAN], [2.0, 3.0]];
        let view = image.view();
        assert_abs_diff_eq!(sample_bilinear(&view, 0.0, 0.0), 1.0, epsilon = 1e-12);
        assert!(sample_bilinear(&view, 0.0, 0.5).is_nan());
    }

    #[test]
    fn test_nearest_sampling() {
        let image = array![[1.0f32, 2.0], [3.0, 4.0]];
        let view = image.view();
        assert_eq!(sample_nearest(&view, 0.4, 0.6), 2.0);
        assert_eq!(sample_nearest(&view, 0.6, 0.4), 3.0);
        assert_eq!(sample_nearest(&view, 5.0, -3.0), 3.0);
    }

    #[test]
    fn test_grid_from_regular_gcps() {
        let ds = regular_swath(9, 13);
        let gcp = GcpGridBuilder::new(XyGcpStep::PerAxis(4, 3))
            .unwrap()
            .build(&ds.lon, &ds.lat)
            .unwrap();
        let grid = ReprojectionGrid::from_gcp_grid(&gcp, None, usize::MAX).unwrap();

        assert_abs_diff_eq!(grid.resolution_x, 0.25, epsilon = 1e-12);
        assert_abs_diff_eq!(grid.resolution_y, 0.25, epsilon = 1e-12);
        assert_eq!((grid.width, grid.height), (13, 9));
        assert_abs_diff_eq!(grid.lon_axis()[12], 8.0, epsilon = 1e-9);
        assert_abs_diff_eq!(grid.lat_axis()[8], 50.0, epsilon = 1e-9);
    }

    #[test]
    fn test_invalid_explicit_resolution() {
        let ds = regular_swath(4, 4);
        let gcp = GcpGridBuilder::new(XyGcpStep::Uniform(1))
            .unwrap()
            .build(&ds.lon, &ds.lat)
            .unwrap();
        for res in [(0.0, 0.1), (0.1, -1.0), (f64::NAN, 0.1)] {
            assert!(matches!(
                ReprojectionGrid::from_gcp_grid(&gcp, Some(res), usize::MAX),
                Err(GenError::Configuration(_))
            ));
        }
        assert!(matches!(
            ReprojectionGrid::from_gcp_grid(&gcp, Some((1e-6, 1e-6)), 1_000),
            Err(GenError::Configuration(_))
        ));
    }

    #[test]
    fn test_tiny_resolution_rejected_without_overflow() {
        let ds = regular_swath(4, 4);
        let gcp = GcpGridBuilder::new(XyGcpStep::Uniform(1))
            .unwrap()
            .build(&ds.lon, &ds.lat)
            .unwrap();
        for limit in [1_000, usize::MAX] {
            assert!(matches!(
                ReprojectionGrid::from_gcp_grid(&gcp, Some((1e-300, 1e-300)), limit),
                Err(GenError::Configuration(_))
            ));
        }
        let reprojector = GcpReprojector::with_params(ReprojectionParams {
            resolution: Some((1e-300, 1e-300)),
            ..Default::default()
        });
        assert!(matches!(
            reprojector.reproject(&ds, &gcp),
            Err(GenError::Configuration(_))
        ));
    }

    #[test]
    fn test_band_inserted_with_wrong_shape() {
        let mut ds = regular_swath(4, 5);
        ds.bands.insert(
            "chl".to_string(),
            Band::continuous(ArrayD::zeros(IxDyn(&[5, 4]))),
        );
        let gcp = GcpGridBuilder::new(XyGcpStep::Uniform(1))
            .unwrap()
            .build(&ds.lon, &ds.lat)
            .unwrap();
        assert!(matches!(
            GcpReprojector::new().reproject(&ds, &gcp),
            Err(GenError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_gcp_grid_larger_than_dataset() {
        let big = regular_swath(6, 6);
        let gcp = GcpGridBuilder::new(XyGcpStep::Uniform(2))
            .unwrap()
            .build(&big.lon, &big.lat)
            .unwrap();
        let small = regular_swath(4, 4);
        assert!(matches!(
            GcpReprojector::new().reproject(&small, &gcp),
            Err(GenError::ShapeMismatch { actual, .. }) if actual == vec![6, 6]
        ));
    }

    #[test]
    fn test_triangles_bucketed_by_tile() {
        let ds = regular_swath(10, 4);
        let gcp = GcpGridBuilder::new(XyGcpStep::Uniform(1))
            .unwrap()
            .build(&ds.lon, &ds.lat)
            .unwrap();
        let grid = ReprojectionGrid::from_gcp_grid(&gcp, None, usize::MAX).unwrap();
        let buckets = bucket_triangles(&gcp, &grid, 3);
        assert_eq!(buckets.len(), 4);
        // 9 quad rows x 3 quad cols x 2; quads on a tile boundary land in both tiles
        let total: usize = buckets.iter().map(Vec::len).sum();
        assert!(total >= 54 && total <= 54 + 3 * 6);
        for (k, bucket) in buckets.iter().enumerate() {
            let (lo, hi) = ((3 * k) as f64, (3 * k + 2).min(9) as f64);
            assert!(bucket
                .iter()
                .all(|t| t.y_max >= lo - BARYCENTRIC_EPS && t.y_min <= hi + BARYCENTRIC_EPS));
        }

        // tiled result matches a single-tile rasterization
        let tiled = GcpReprojector::with_params(ReprojectionParams {
            tile_rows: 3,
            ..Default::default()
        });
        let single = GcpReprojector::with_params(ReprojectionParams {
            tile_rows: 64,
            ..Default::default()
        });
        let (r3, c3) = tiled.source_index_map(&grid, &gcp);
        let (r64, c64) = single.source_index_map(&grid, &gcp);
        for (a, b) in r3.iter().zip(r64.iter()).chain(c3.iter().zip(c64.iter())) {
            assert!(a == b || (a.is_nan() && b.is_nan()));
        }
        assert!(r3.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_too_sparse_gcp_grid() {
        let ds = regular_swath(4, 4);
        let gcp = GcpGrid::from_parts(
            vec![0],
            vec![0, 3],
            Array2::from_elem((1, 2), 5.0),
            Array2::from_elem((1, 2), 52.0),
            1,
            1,
        )
        .unwrap();
        let result = GcpReprojector::new().reproject(&ds, &gcp);
        assert!(matches!(result, Err(GenError::GridTooSparse { rows: 1, cols: 2 })));
    }

    #[test]
    fn test_categorical_band_uses_nearest() {
        let mut ds = regular_swath(5, 5);
        let classes = ArrayD::from_shape_fn(IxDyn(&[5, 5]), |idx| ((idx[0] + idx[1]) % 3) as f64);
        ds.add_band("classes", Band::categorical(classes)).unwrap();
        let gcp = GcpGridBuilder::new(XyGcpStep::Uniform(2))
            .unwrap()
            .build(&ds.lon, &ds.lat)
            .unwrap();
        let params = ReprojectionParams {
            resolution: Some((0.1, 0.1)),
            ..Default::default()
        };
        let out = GcpReprojector::with_params(params).reproject(&ds, &gcp).unwrap();
        let values = &out.bands["classes"].data;
        assert!(values
            .iter()
            .filter(|v| v.is_finite())
            .all(|&v| v == 0.0 || v == 1.0 || v == 2.0));
    }

    #[test]
    fn test_three_dimensional_band() {
        let mut ds = regular_swath(4, 6);
        let cube = ArrayD::from_shape_fn(IxDyn(&[3, 4, 6]), |idx| idx[0] as f64 * 100.0 + idx[2] as f64);
        ds.add_band("rrs", Band::continuous(cube)).unwrap();
        let gcp = GcpGridBuilder::new(XyGcpStep::Uniform(1))
            .unwrap()
            .build(&ds.lon, &ds.lat)
            .unwrap();
        let out = GcpReprojector::new().reproject(&ds, &gcp).unwrap();
        let rrs = &out.bands["rrs"].data;
        assert_eq!(rrs.shape(), &[3, 4, 6]);
        assert_abs_diff_eq!(rrs[[2, 1, 5]], 205.0, epsilon = 1e-6);
        assert!(out.masks["rrs"].iter().all(|&v| v));
    }
}
