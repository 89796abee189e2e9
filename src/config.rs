//! Generator configuration loaded from YAML.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::gcp_grid::XyGcpStep;
use crate::core::reproject::ReprojectionParams;
use crate::iproc::{registry, InputProcessor, ProcessorParams};
use crate::types::{GenError, GenResult, Region};

/// Cube generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenConfig {
    /// Registered input processor name
    #[serde(default = "default_input_processor")]
    pub input_processor: String,
    /// GCP stride, either one integer or `[step_x, step_y]`
    #[serde(default)]
    pub xy_gcp_step: Option<XyGcpStep>,
    /// Target resolution `[res_x, res_y]` in degrees
    #[serde(default)]
    pub resolution: Option<(f64, f64)>,
    /// `[lon_min, lat_min, lon_max, lat_max]`
    #[serde(default)]
    pub output_region: Option<[f64; 4]>,
    /// Band name -> valid-pixel expression, replacing the band's own attribute
    #[serde(default)]
    pub valid_pixel_expression: BTreeMap<String, String>,
    #[serde(default = "default_max_output_cells")]
    pub max_output_cells: usize,
}

fn default_input_processor() -> String {
    "default".to_string()
}

fn default_max_output_cells() -> usize {
    100_000_000
}

impl Default for GenConfig {
    fn default() -> Self {
        Self {
            input_processor: default_input_processor(),
            xy_gcp_step: None,
            resolution: None,
            output_region: None,
            valid_pixel_expression: BTreeMap::new(),
            max_output_cells: default_max_output_cells(),
        }
    }
}

impl GenConfig {
    /// Parse and validate a YAML document
    pub fn from_yaml_str(yaml: &str) -> GenResult<Self> {
        let config: GenConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn from_file<P: AsRef<Path>>(path: P) -> GenResult<Self> {
        log::info!("Loading configuration from {}", path.as_ref().display());
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml_str(&content)
    }

    /// Check every setting; all failures are configuration errors
    pub fn validate(&self) -> GenResult<()> {
        if !registry().contains(&self.input_processor) {
            return Err(GenError::UnknownProcessor(self.input_processor.clone()));
        }
        if let Some(step) = self.xy_gcp_step {
            step.resolve()?;
        }
        if let Some((res_x, res_y)) = self.resolution {
            if !(res_x.is_finite() && res_y.is_finite() && res_x > 0.0 && res_y > 0.0) {
                return Err(GenError::Configuration(format!(
                    "resolution must be positive and finite, got [{}, {}]",
                    res_x, res_y
                )));
            }
        }
        if let Some([lon_min, lat_min, lon_max, lat_max]) = self.output_region {
            let finite = [lon_min, lat_min, lon_max, lat_max]
                .iter()
                .all(|v| v.is_finite());
            if !finite || lon_min >= lon_max || lat_min >= lat_max {
                return Err(GenError::Configuration(format!(
                    "invalid output_region [{}, {}, {}, {}]",
                    lon_min, lat_min, lon_max, lat_max
                )));
            }
        }
        if self.max_output_cells == 0 {
            return Err(GenError::Configuration(
                "max_output_cells must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn region(&self) -> Option<Region> {
        self.output_region
            .map(|[lon_min, lat_min, lon_max, lat_max]| Region::new(lon_min, lat_min, lon_max, lat_max))
    }

    pub fn processor_params(&self) -> ProcessorParams {
        ProcessorParams {
            xy_gcp_step: self.xy_gcp_step,
        }
    }

    pub fn reprojection_params(&self) -> ReprojectionParams {
        ReprojectionParams {
            resolution: self.resolution,
            max_output_cells: self.max_output_cells,
            ..Default::default()
        }
    }

    /// Instantiate and configure the selected input processor
    pub fn create_processor(&self) -> GenResult<Box<dyn InputProcessor>> {
        let mut processor = registry().create(&self.input_processor)?;
        processor.configure(&self.processor_params())?;
        Ok(processor)
    }
}
