use crate::core::gcp_grid::XyGcpStep;
use crate::iproc::{
    configured_gcp_step, subset_to_region, InputProcessor, ProcessorParams, ReprojectionInfo,
};
use crate::types::{GenResult, Region, SourceDataset};

/// Generic single-scene swath processor.
///
/// Valid-pixel expressions are expected in the evaluation vocabulary already and are
/// passed through untouched.
#[derive(Debug, Clone, Default)]
pub struct DefaultInputProcessor {
    xy_gcp_step: Option<XyGcpStep>,
}

impl DefaultInputProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputProcessor for DefaultInputProcessor {
    fn name(&self) -> &'static str {
        "default"
    }

    fn description(&self) -> &'static str {
        "Single-scene swath NetCDF/CF inputs in target expression vocabulary"
    }

    fn configure(&mut self, params: &ProcessorParams) -> GenResult<()> {
        self.xy_gcp_step = configured_gcp_step(params)?;
        Ok(())
    }

    fn reprojection_info(&self, _dataset: &SourceDataset) -> ReprojectionInfo {
        ReprojectionInfo::lon_lat(self.xy_gcp_step.unwrap_or_default())
    }

    fn pre_process(
        &self,
        dataset: SourceDataset,
        output_region: Option<&Region>,
    ) -> GenResult<SourceDataset> {
        match output_region {
            Some(region) => subset_to_region(dataset, region),
            None => Ok(dataset),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Band, VALID_PIXEL_EXPRESSION};
    use ndarray::{Array2, ArrayD, IxDyn};

    #[test]
    fn test_props() {
        let processor = DefaultInputProcessor::new();
        assert_eq!(processor.name(), "default");
        assert_eq!(processor.input_reader(), "netcdf4");
        assert!(!processor.input_reader_params().decode_times);
    }

    #[test]
    fn test_expressions_passed_through() {
        let lon = Array2::from_shape_fn((3, 3), |(_, c)| c as f64);
        let lat = Array2::from_shape_fn((3, 3), |(r, _)| r as f64);
        let band = Band::continuous(ArrayD::zeros(IxDyn(&[3, 3])))
            .with_attr(VALID_PIXEL_EXPRESSION, "a**2 > 1");
        let ds = SourceDataset::new(lon, lat)
            .unwrap()
            .with_band("a", band)
            .unwrap();

        let out = DefaultInputProcessor::new().pre_process(ds, None).unwrap();
        assert_eq!(out.bands["a"].valid_pixel_expression(), Some("a**2 > 1"));
    }

    #[test]
    fn test_default_step_is_one() {
        let mut processor = DefaultInputProcessor::new();
        let ds = SourceDataset::new(Array2::zeros((2, 2)), Array2::zeros((2, 2))).unwrap();
        assert_eq!(
            processor.reprojection_info(&ds).xy_gcp_step,
            XyGcpStep::Uniform(1)
        );

        processor
            .configure(&ProcessorParams {
                xy_gcp_step: Some(XyGcpStep::PerAxis(4, 2)),
            })
            .unwrap();
        assert_eq!(
            processor.reprojection_info(&ds).xy_gcp_step,
            XyGcpStep::PerAxis(4, 2)
        );
    }
}
