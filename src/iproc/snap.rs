use crate::core::gcp_grid::XyGcpStep;
use crate::iproc::{
    configured_gcp_step, subset_to_region, translate_expression_attributes, InputProcessor,
    ProcessorParams, ReprojectionInfo,
};
use crate::types::{GenResult, Region, SourceDataset};

/// GCP stride used for SNAP products when none is configured
const SNAP_DEFAULT_GCP_STEP: i64 = 5;

/// SNAP Level-2 product families sharing one processing chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapProduct {
    OlciHighrocL2,
    OlciCyanoAlertL2,
}

impl SnapProduct {
    fn name(self) -> &'static str {
        match self {
            SnapProduct::OlciHighrocL2 => "snap-olci-highroc-l2",
            SnapProduct::OlciCyanoAlertL2 => "snap-olci-cyanoalert-l2",
        }
    }

    fn description(self) -> &'static str {
        match self {
            SnapProduct::OlciHighrocL2 => "SNAP Sentinel-3 OLCI HIGHROC Level-2 NetCDF inputs",
            SnapProduct::OlciCyanoAlertL2 => {
                "SNAP Sentinel-3 OLCI CyanoAlert Level-2 NetCDF inputs"
            }
        }
    }
}

/// Processor for SNAP Level-2 NetCDF products.
///
/// SNAP writes valid-pixel expressions in its own band-maths vocabulary; they are
/// transpiled during pre-processing.
#[derive(Debug, Clone)]
pub struct SnapNetcdfInputProcessor {
    product: SnapProduct,
    xy_gcp_step: Option<XyGcpStep>,
}

impl SnapNetcdfInputProcessor {
    pub fn new(product: SnapProduct) -> Self {
        Self {
            product,
            xy_gcp_step: None,
        }
    }

    pub fn highroc() -> Self {
        Self::new(SnapProduct::OlciHighrocL2)
    }

    pub fn cyanoalert() -> Self {
        Self::new(SnapProduct::OlciCyanoAlertL2)
    }

    pub fn product(&self) -> SnapProduct {
        self.product
    }

    /// Configured GCP step, `None` when the processor default applies
    pub fn xy_gcp_step(&self) -> Option<XyGcpStep> {
        self.xy_gcp_step
    }
}

impl InputProcessor for SnapNetcdfInputProcessor {
    fn name(&self) -> &'static str {
        self.product.name()
    }

    fn description(&self) -> &'static str {
        self.product.description()
    }

    fn configure(&mut self, params: &ProcessorParams) -> GenResult<()> {
        self.xy_gcp_step = configured_gcp_step(params)?;
        Ok(())
    }

    fn reprojection_info(&self, _dataset: &SourceDataset) -> ReprojectionInfo {
        let step = self
            .xy_gcp_step
            .unwrap_or(XyGcpStep::Uniform(SNAP_DEFAULT_GCP_STEP));
        ReprojectionInfo {
            xy_tp_var_names: Some(("TP_longitude".to_string(), "TP_latitude".to_string())),
            ..ReprojectionInfo::lon_lat(step)
        }
    }

    fn pre_process(
        &self,
        dataset: SourceDataset,
        output_region: Option<&Region>,
    ) -> GenResult<SourceDataset> {
        let dataset = match output_region {
            Some(region) => subset_to_region(dataset, region)?,
            None => dataset,
        };
        translate_expression_attributes(dataset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, GenError, CRS_WKT_EPSG_4326, VALID_PIXEL_EXPRESSION};
    use ndarray::{Array2, ArrayD, IxDyn};

    fn highroc_dataset() -> SourceDataset {
        let lon = Array2::from_shape_fn((6, 8), |(r, c)| 4.0 + c as f64 * 0.01 + r as f64 * 0.002);
        let lat = Array2::from_shape_fn((6, 8), |(r, c)| 52.0 - r as f64 * 0.01 + c as f64 * 0.001);
        let conc_chl = Band::continuous(ArrayD::from_elem(IxDyn(&[6, 8]), 1.5))
            .with_attr(VALID_PIXEL_EXPRESSION, "c2rcc_flags.Valid_PE && !nan(conc_chl)");
        SourceDataset::new(lon, lat)
            .unwrap()
            .with_band("conc_chl", conc_chl)
            .unwrap()
            .with_attr("start_date", "15-APR-2017 10:01:39.123456")
            .with_attr("stop_date", "15-APR-2017 10:04:39.123456")
    }

    #[test]
    fn test_props() {
        let processor = SnapNetcdfInputProcessor::highroc();
        assert_eq!(processor.name(), "snap-olci-highroc-l2");
        assert_eq!(
            processor.description(),
            "SNAP Sentinel-3 OLCI HIGHROC Level-2 NetCDF inputs"
        );
        assert_eq!(processor.input_reader(), "netcdf4");

        let processor = SnapNetcdfInputProcessor::cyanoalert();
        assert_eq!(processor.name(), "snap-olci-cyanoalert-l2");
        assert_eq!(
            processor.description(),
            "SNAP Sentinel-3 OLCI CyanoAlert Level-2 NetCDF inputs"
        );
    }

    #[test]
    fn test_reprojection_info() {
        let mut processor = SnapNetcdfInputProcessor::highroc();
        let info = processor.reprojection_info(&highroc_dataset());
        assert_eq!(info.xy_var_names, ("lon".to_string(), "lat".to_string()));
        assert_eq!(info.xy_crs, CRS_WKT_EPSG_4326);
        assert_eq!(info.xy_gcp_step, XyGcpStep::Uniform(5));
        assert_eq!(processor.xy_gcp_step(), None);

        processor
            .configure(&ProcessorParams {
                xy_gcp_step: Some(XyGcpStep::Uniform(2)),
            })
            .unwrap();
        let info = processor.reprojection_info(&highroc_dataset());
        assert_eq!(info.xy_gcp_step, XyGcpStep::Uniform(2));
    }

    #[test]
    fn test_configure_rejects_negative_step() {
        let mut processor = SnapNetcdfInputProcessor::cyanoalert();
        let result = processor.configure(&ProcessorParams {
            xy_gcp_step: Some(XyGcpStep::Uniform(-5)),
        });
        assert!(matches!(result, Err(GenError::Configuration(_))));
    }

    #[test]
    fn test_time_range_from_snap_dates() {
        let processor = SnapNetcdfInputProcessor::highroc();
        let (t1, t2) = processor.time_range(&highroc_dataset()).unwrap();
        assert!(t1 > 17_000.0 && t1 < 17_300.0);
        approx::assert_abs_diff_eq!(t2 - t1, 180.0 / 86_400.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pre_process_translates_expressions() {
        let processor = SnapNetcdfInputProcessor::highroc();
        let ds = processor.pre_process(highroc_dataset(), None).unwrap();
        assert_eq!(
            ds.bands["conc_chl"].valid_pixel_expression(),
            Some("c2rcc_flags.Valid_PE and not isnan(conc_chl)")
        );
    }
}
