//! Input processors: product-family specific preparation around the core reprojection

pub mod cmems;
pub mod default;
pub mod registry;
pub mod snap;

pub use cmems::CmemsInputProcessor;
pub use default::DefaultInputProcessor;
pub use registry::{registry, ProcessorFactory, ProcessorRegistry};
pub use snap::{SnapNetcdfInputProcessor, SnapProduct};

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use ndarray::{s, Axis, Slice};
use std::collections::{BTreeMap, HashMap};

use crate::config::GenConfig;
use crate::core::gcp_grid::{GcpGridBuilder, XyGcpStep};
use crate::core::reproject::GcpReprojector;
use crate::core::transexpr::{translate_snap_expr, TranspiledExpression};
use crate::core::valid_mask::ValidPixelMaskEvaluator;
use crate::types::{
    AttrValue, Band, BandArray, GenError, GenResult, GriddedDataset, MaskArray, Real, Region,
    SourceDataset, CRS_WKT_EPSG_4326, VALID_PIXEL_EXPRESSION,
};

/// Parameters accepted by [`InputProcessor::configure`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessorParams {
    pub xy_gcp_step: Option<XyGcpStep>,
}

/// Options passed to the NetCDF reader that loads inputs for a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputReaderParams {
    pub decode_cf: bool,
    pub decode_coords: bool,
    pub decode_times: bool,
}

impl Default for InputReaderParams {
    fn default() -> Self {
        Self {
            decode_cf: true,
            decode_coords: true,
            decode_times: false,
        }
    }
}

/// How a processor's inputs are geolocated
#[derive(Debug, Clone, PartialEq)]
pub struct ReprojectionInfo {
    /// Names of the 2D longitude/latitude variables
    pub xy_var_names: (String, String),
    /// Names of tie-point coordinate variables, for products that carry them
    pub xy_tp_var_names: Option<(String, String)>,
    pub xy_crs: String,
    pub xy_gcp_step: XyGcpStep,
}

impl ReprojectionInfo {
    /// Geographic lon/lat geolocation with the given GCP stride
    pub fn lon_lat(xy_gcp_step: XyGcpStep) -> Self {
        Self {
            xy_var_names: ("lon".to_string(), "lat".to_string()),
            xy_tp_var_names: None,
            xy_crs: CRS_WKT_EPSG_4326.to_string(),
            xy_gcp_step,
        }
    }
}

/// A product family's preparation steps around GCP reprojection
pub trait InputProcessor: Send + Sync {
    /// Unique registry name
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// Reader used to open inputs
    fn input_reader(&self) -> &'static str {
        "netcdf4"
    }

    fn input_reader_params(&self) -> InputReaderParams {
        InputReaderParams::default()
    }

    /// Apply processor parameters, rejecting invalid values
    fn configure(&mut self, params: &ProcessorParams) -> GenResult<()>;

    fn reprojection_info(&self, dataset: &SourceDataset) -> ReprojectionInfo;

    /// Observation time range in days since 1970-01-01
    fn time_range(&self, dataset: &SourceDataset) -> GenResult<(f64, f64)> {
        time_range_from_attrs(dataset)
    }

    /// Prepare a dataset for reprojection
    fn pre_process(
        &self,
        dataset: SourceDataset,
        output_region: Option<&Region>,
    ) -> GenResult<SourceDataset>;

    fn post_process(&self, dataset: GriddedDataset) -> GenResult<GriddedDataset> {
        Ok(dataset)
    }

    /// Run the full pipeline: pre-process, reproject, mask, post-process.
    ///
    /// A GCP step in `config` takes precedence over the processor's configured step.
    fn process(&self, dataset: SourceDataset, config: &GenConfig) -> GenResult<GriddedDataset> {
        let config_step = match config.xy_gcp_step {
            Some(step) => {
                step.resolve()?;
                Some(step)
            }
            None => None,
        };
        let time_range = self.time_range(&dataset)?;

        let mut dataset = dataset;
        for (band_name, expr) in &config.valid_pixel_expression {
            match dataset.bands.get_mut(band_name) {
                Some(band) => {
                    band.attrs
                        .insert(VALID_PIXEL_EXPRESSION.to_string(), expr.as_str().into());
                }
                None => log::warn!(
                    "⚠️  valid_pixel_expression given for unknown band '{}', ignored",
                    band_name
                ),
            }
        }

        let dataset = self.pre_process(dataset, config.region().as_ref())?;
        let xy_gcp_step = config_step.unwrap_or(self.reprojection_info(&dataset).xy_gcp_step);
        log::debug!("Using GCP step {:?}", xy_gcp_step);
        let gcp = GcpGridBuilder::new(xy_gcp_step)?.build(&dataset.lon, &dataset.lat)?;
        let reprojector = GcpReprojector::with_params(config.reprojection_params());
        let mut gridded = reprojector.reproject(&dataset, &gcp)?;

        apply_valid_pixel_masks(&mut gridded)?;
        gridded.time_range = Some(time_range);
        self.post_process(gridded)
    }
}

/// Validate a configured GCP step; `None` leaves the processor default in place
pub(crate) fn configured_gcp_step(params: &ProcessorParams) -> GenResult<Option<XyGcpStep>> {
    if let Some(step) = params.xy_gcp_step {
        step.resolve()?;
    }
    Ok(params.xy_gcp_step)
}

/// Evaluate each band's valid-pixel expression on the gridded bands and merge it into
/// the band mask; masked cells are set to NaN.
pub fn apply_valid_pixel_masks(dataset: &mut GriddedDataset) -> GenResult<()> {
    let mut expr_masks: HashMap<String, MaskArray> = HashMap::new();
    for (name, band) in &dataset.bands {
        let Some(text) = band.valid_pixel_expression() else {
            continue;
        };
        let expr = TranspiledExpression::parse(text).map_err(|e| e.for_band(name))?;
        let shape = band.data.shape();
        let flags = resolve_flag_references(&dataset.bands, &expr, shape);
        let mut evaluator = ValidPixelMaskEvaluator::new();
        for (other_name, other) in &dataset.bands {
            if other.data.shape() == shape {
                evaluator.add_band(other_name, other.data.view())?;
            }
        }
        for (flag_name, flag) in &flags {
            evaluator.add_band(flag_name, flag.view())?;
        }
        let mask = evaluator.evaluate(&expr).map_err(|e| e.for_band(name))?;
        expr_masks.insert(name.clone(), mask);
    }

    for (name, expr_mask) in expr_masks {
        if let Some(mask) = dataset.masks.get_mut(&name) {
            mask.zip_mut_with(&expr_mask, |valid, &ok| *valid = *valid && ok);
        }
        if let Some(band) = dataset.bands.get_mut(&name) {
            band.data.zip_mut_with(&expr_mask, |v, &ok| {
                if !ok {
                    *v = Real::NAN;
                }
            });
        }
    }
    Ok(())
}

/// Arrays for `band.FLAG` references in `expr`, taken from flag bands of the given shape
fn resolve_flag_references(
    bands: &BTreeMap<String, Band>,
    expr: &TranspiledExpression,
    shape: &[usize],
) -> HashMap<String, BandArray> {
    let mut flags = HashMap::new();
    for ident in expr.ast().identifiers() {
        if bands.contains_key(ident) {
            continue;
        }
        let Some((band_name, meaning)) = ident.split_once('.') else {
            continue;
        };
        match bands.get(band_name) {
            Some(band) if band.data.shape() == shape => {
                if let Some(flag) = band.flag_array(meaning) {
                    flags.insert(ident.to_string(), flag);
                }
            }
            _ => {}
        }
    }
    flags
}

/// Rewrite every band's SNAP valid-pixel expression into the evaluation vocabulary
pub fn translate_expression_attributes(mut dataset: SourceDataset) -> GenResult<SourceDataset> {
    for (name, band) in dataset.bands.iter_mut() {
        let Some(expr) = band.valid_pixel_expression() else {
            continue;
        };
        let translated = translate_snap_expr(expr).map_err(|e| e.for_band(name))?;
        log::debug!("Band '{}': valid_pixel_expression '{}'", name, translated);
        band.attrs
            .insert(VALID_PIXEL_EXPRESSION.to_string(), AttrValue::Text(translated));
    }
    Ok(dataset)
}

/// Subset a dataset to the rows/columns covering `region`.
///
/// Columns span the first to last column with any longitude inside the region, rows
/// the first to last row with any latitude inside it. A dataset already inside the
/// region is returned unchanged.
pub fn subset_to_region(dataset: SourceDataset, region: &Region) -> GenResult<SourceDataset> {
    let bounds = |values: &ndarray::Array2<Real>| {
        values
            .iter()
            .filter(|v| v.is_finite())
            .fold(None, |acc: Option<(Real, Real)>, &v| match acc {
                None => Some((v, v)),
                Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            })
    };
    let (Some((lon_min, lon_max)), Some((lat_min, lat_max))) =
        (bounds(&dataset.lon), bounds(&dataset.lat))
    else {
        return Err(GenError::InvalidInput(
            "dataset has no finite coordinates".to_string(),
        ));
    };

    if lon_max < region.lon_min
        || lon_min > region.lon_max
        || lat_max < region.lat_min
        || lat_min > region.lat_max
    {
        return Err(GenError::InvalidInput(format!(
            "output region {:?} does not intersect dataset bounds [{}, {}, {}, {}]",
            region, lon_min, lat_min, lon_max, lat_max
        )));
    }
    if lon_min >= region.lon_min
        && lon_max <= region.lon_max
        && lat_min >= region.lat_min
        && lat_max <= region.lat_max
    {
        return Ok(dataset);
    }

    let inside_lon = |v: &Real| *v >= region.lon_min && *v <= region.lon_max;
    let inside_lat = |v: &Real| *v >= region.lat_min && *v <= region.lat_max;
    let cols: Vec<usize> = dataset
        .lon
        .axis_iter(Axis(1))
        .enumerate()
        .filter(|(_, column)| column.iter().any(inside_lon))
        .map(|(j, _)| j)
        .collect();
    let rows: Vec<usize> = dataset
        .lat
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(inside_lat))
        .map(|(i, _)| i)
        .collect();

    let (Some(&x1), Some(&x2), Some(&y1), Some(&y2)) =
        (cols.first(), cols.last(), rows.first(), rows.last())
    else {
        return Err(GenError::InvalidInput(format!(
            "no dataset pixels inside output region {:?}",
            region
        )));
    };
    log::info!(
        "Subsetting {}x{} swath to rows {}..={}, cols {}..={}",
        dataset.lon.nrows(),
        dataset.lon.ncols(),
        y1,
        y2,
        x1,
        x2
    );

    let mut subset = SourceDataset::new(
        dataset.lon.slice(s![y1..=y2, x1..=x2]).to_owned(),
        dataset.lat.slice(s![y1..=y2, x1..=x2]).to_owned(),
    )?;
    subset.attrs = dataset.attrs;
    for (name, band) in dataset.bands {
        let ndim = band.data.ndim();
        let data = band
            .data
            .slice_axis(Axis(ndim - 2), Slice::from(y1..y2 + 1))
            .slice_axis(Axis(ndim - 1), Slice::from(x1..x2 + 1))
            .to_owned();
        subset.add_band(
            &name,
            Band {
                data,
                attrs: band.attrs,
                role: band.role,
            },
        )?;
    }
    Ok(subset)
}

/// Time range from `time_coverage_start`/`time_coverage_end`, falling back to
/// `start_date`/`stop_date`; a missing end defaults to the start.
pub fn time_range_from_attrs(dataset: &SourceDataset) -> GenResult<(f64, f64)> {
    let attr = |name: &str| dataset.attrs.get(name).map(|v| v.to_string());
    let (start, end) = if let Some(start) = attr("time_coverage_start") {
        let end = attr("time_coverage_end");
        (start, end)
    } else {
        let Some(start) = attr("start_date") else {
            return Err(GenError::InvalidInput(
                "illegal L2 input: missing start/stop time".to_string(),
            ));
        };
        (start, attr("stop_date"))
    };
    let t1 = parse_time_days(&start)?;
    let t2 = match end {
        Some(end) => parse_time_days(&end)?,
        None => t1,
    };
    Ok((t1, t2))
}

/// Timestamp formats seen in CF and SNAP metadata
const TIME_FORMATS: [&str; 5] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y%m%dT%H%M%S%.f",
    "%d-%b-%Y %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
];

/// Parse a timestamp into fractional days since 1970-01-01 (UTC)
pub fn parse_time_days(text: &str) -> GenResult<f64> {
    let text = text.trim();
    let datetime = DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| {
            let naive = text.trim_end_matches('Z');
            TIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(naive, fmt).ok())
        })
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| GenError::InvalidInput(format!("unrecognized time format '{}'", text)))?;

    let millis = datetime.and_utc().timestamp_millis();
    Ok(millis as f64 / 86_400_000.0)
}

/// Outcome of processing several datasets
#[derive(Debug, Default)]
pub struct BatchReport {
    pub processed: usize,
    pub errors: usize,
    pub outputs: Vec<GriddedDataset>,
    /// (input index, error) for every skipped dataset
    pub failures: Vec<(usize, GenError)>,
}

/// Process `datasets` one after another.
///
/// Configuration errors abort immediately. Other errors skip the dataset when
/// `continue_on_error` is set and abort otherwise.
pub fn process_batch<I>(
    processor: &dyn InputProcessor,
    datasets: I,
    config: &GenConfig,
    continue_on_error: bool,
) -> GenResult<BatchReport>
where
    I: IntoIterator<Item = SourceDataset>,
{
    config.validate()?;
    let mut report = BatchReport::default();
    for (index, dataset) in datasets.into_iter().enumerate() {
        log::info!("Processing input #{} with '{}'", index, processor.name());
        match processor.process(dataset, config) {
            Ok(output) => {
                report.processed += 1;
                report.outputs.push(output);
            }
            Err(e) if e.is_fatal_for_batch() || !continue_on_error => {
                log::error!("❌ Input #{} failed, aborting: {}", index, e);
                return Err(e);
            }
            Err(e) => {
                log::warn!("⚠️  Input #{} skipped: {}", index, e);
                report.errors += 1;
                report.failures.push((index, e));
            }
        }
    }
    log::info!(
        "✅ Batch finished: {} processed, {} skipped",
        report.processed,
        report.errors
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array2, ArrayD, IxDyn};

    fn swath(rows: usize, cols: usize) -> SourceDataset {
        let lon = Array2::from_shape_fn((rows, cols), |(_, c)| c as f64);
        let lat = Array2::from_shape_fn((rows, cols), |(r, _)| 10.0 - r as f64);
        let data = ArrayD::from_shape_fn(IxDyn(&[rows, cols]), |ix| (ix[0] * 100 + ix[1]) as f64);
        SourceDataset::new(lon, lat)
            .unwrap()
            .with_band("chl", Band::continuous(data))
            .unwrap()
    }

    #[test]
    fn test_apply_valid_pixel_masks_with_flags() {
        let chl = Band::continuous(ndarray::array![[1.0, 2.0], [3.0, f64::NAN]].into_dyn())
            .with_attr(VALID_PIXEL_EXPRESSION, "flags.Valid_PE and chl < 3");
        let flags = Band::new(ndarray::array![[1.0, 1.0], [1.0, 0.0]].into_dyn(), Default::default())
            .with_attr("flag_meanings", "Valid_PE Cloud")
            .with_attr("flag_masks", vec![1_i64, 2]);
        let mut masks = BTreeMap::new();
        masks.insert("chl".to_string(), chl.data.mapv(|v| !v.is_nan()));
        masks.insert("flags".to_string(), flags.data.mapv(|v| !v.is_nan()));
        let mut bands = BTreeMap::new();
        bands.insert("chl".to_string(), chl);
        bands.insert("flags".to_string(), flags);
        let mut gridded = GriddedDataset {
            lon: ndarray::array![0.0, 1.0],
            lat: ndarray::array![1.0, 0.0],
            bands,
            masks,
            attrs: Default::default(),
            time_range: None,
        };

        apply_valid_pixel_masks(&mut gridded).unwrap();
        let mask: Vec<bool> = gridded.masks["chl"].iter().copied().collect();
        assert_eq!(mask, vec![true, true, false, false]);
        assert!(gridded.bands["chl"].data[[1, 0]].is_nan());
        assert_eq!(gridded.bands["chl"].data[[0, 1]], 2.0);
        assert!(gridded.masks["flags"].iter().all(|&v| v));
    }

    #[test]
    fn test_unbound_identifier_names_band() {
        let chl = Band::continuous(ndarray::array![[1.0]].into_dyn())
            .with_attr(VALID_PIXEL_EXPRESSION, "kd489 > 0");
        let mut bands = BTreeMap::new();
        bands.insert("chl".to_string(), chl);
        let mut gridded = GriddedDataset {
            lon: ndarray::array![0.0],
            lat: ndarray::array![0.0],
            bands,
            masks: BTreeMap::new(),
            attrs: Default::default(),
            time_range: None,
        };
        let err = apply_valid_pixel_masks(&mut gridded).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Band 'chl': Unbound identifier 'kd489' in expression"
        );
    }

    #[test]
    fn test_parse_time_formats() {
        assert_abs_diff_eq!(parse_time_days("1970-01-02T00:00:00Z").unwrap(), 1.0);
        assert_abs_diff_eq!(parse_time_days("1970-01-01T12:00:00").unwrap(), 0.5);
        assert_abs_diff_eq!(parse_time_days("1970-01-03").unwrap(), 2.0);
        assert_abs_diff_eq!(
            parse_time_days("2017-04-15T10:01:39.123456Z").unwrap(),
            parse_time_days("15-APR-2017 10:01:39.123456").unwrap(),
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(
            parse_time_days("01-Jan-1970 06:00:00.000000").unwrap(),
            0.25,
            epsilon = 1e-12
        );
        assert!(matches!(
            parse_time_days("yesterday"),
            Err(GenError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_time_range_fallbacks() {
        let ds = swath(3, 3)
            .with_attr("time_coverage_start", "1970-01-02T00:00:00Z")
            .with_attr("time_coverage_end", "1970-01-03T00:00:00Z");
        assert_eq!(time_range_from_attrs(&ds).unwrap(), (1.0, 2.0));

        let ds = swath(3, 3).with_attr("start_date", "02-JAN-1970 00:00:00.000000");
        assert_eq!(time_range_from_attrs(&ds).unwrap(), (1.0, 1.0));

        assert!(matches!(
            time_range_from_attrs(&swath(3, 3)),
            Err(GenError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_subset_keeps_intersecting_rows_and_cols() {
        // lon = col (0..10), lat = 10 - row (10..1)
        let ds = swath(10, 10);
        let region = Region::new(2.5, 4.5, 6.0, 7.0);
        let subset = subset_to_region(ds, &region).unwrap();

        // cols 3..=6, rows with lat in [4.5, 7] -> lat 7,6,5 -> rows 3..=5
        assert_eq!(subset.spatial_shape(), (3, 4));
        assert_eq!(subset.lon[[0, 0]], 3.0);
        assert_eq!(subset.lat[[0, 0]], 7.0);
        assert_eq!(subset.bands["chl"].data[[0, 0]], 303.0);
        assert_eq!(subset.bands["chl"].data.shape(), &[3, 4]);
    }

    #[test]
    fn test_subset_inside_and_outside() {
        let ds = swath(4, 4);
        let unchanged = subset_to_region(ds.clone(), &Region::new(-1.0, 0.0, 10.0, 20.0)).unwrap();
        assert_eq!(unchanged.spatial_shape(), (4, 4));

        let result = subset_to_region(ds, &Region::new(50.0, 50.0, 60.0, 60.0));
        assert!(matches!(result, Err(GenError::InvalidInput(_))));
    }

    #[test]
    fn test_translate_expression_attributes() {
        let ds = swath(3, 3);
        let mut band = ds.bands["chl"].clone();
        band = band.with_attr(VALID_PIXEL_EXPRESSION, "!nan(chl) && chl^2 < 10");
        let ds = ds.with_band("chl", band).unwrap();

        let translated = translate_expression_attributes(ds).unwrap();
        assert_eq!(
            translated.bands["chl"].valid_pixel_expression(),
            Some("not isnan(chl) and chl**2 < 10")
        );
    }

    #[test]
    fn test_translation_error_names_band() {
        let ds = swath(3, 3);
        let band = ds.bands["chl"].clone().with_attr(VALID_PIXEL_EXPRESSION, "chl # 2");
        let ds = ds.with_band("chl", band).unwrap();
        match translate_expression_attributes(ds) {
            Err(GenError::Band { band, source }) => {
                assert_eq!(band, "chl");
                assert!(matches!(*source, GenError::UnsupportedExpression { .. }));
            }
            other => panic!("unexpected result: {:?}", other.map(|_| ())),
        }
    }
}
