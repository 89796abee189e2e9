use crate::core::gcp_grid::XyGcpStep;
use crate::iproc::{
    configured_gcp_step, subset_to_region, translate_expression_attributes, InputProcessor,
    ProcessorParams, ReprojectionInfo,
};
use crate::types::{GenResult, Region, SourceDataset};

/// Processor for CMEMS ocean colour scenes with SNAP-style valid-pixel expressions
#[derive(Debug, Clone, Default)]
pub struct CmemsInputProcessor {
    xy_gcp_step: Option<XyGcpStep>,
}

impl CmemsInputProcessor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl InputProcessor for CmemsInputProcessor {
    fn name(&self) -> &'static str {
        "cmems"
    }

    fn description(&self) -> &'static str {
        "Single-scene daily or hourly CMEMS NetCDF/CF inputs"
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
    use crate::types::GenError;

    #[test]
    fn test_props() {
        let processor = CmemsInputProcessor::new();
        assert_eq!(processor.name(), "cmems");
        assert_eq!(
            processor.description(),
            "Single-scene daily or hourly CMEMS NetCDF/CF inputs"
        );
        assert_eq!(processor.input_reader(), "netcdf4");
    }

    #[test]
    fn test_configure_rejects_zero_step() {
        let mut processor = CmemsInputProcessor::new();
        let result = processor.configure(&ProcessorParams {
            xy_gcp_step: Some(XyGcpStep::Uniform(0)),
        });
        assert!(matches!(result, Err(GenError::Configuration(_))));
    }
}
