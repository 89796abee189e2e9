//! swathcube: Swath-to-grid cube generation for Level-2 ocean colour products
//!
//! This library converts satellite swath products with irregular per-pixel geolocation
//! into bands on a regular WGS84 grid. Reprojection is driven by a sparse grid of ground
//! control points, and invalid pixels are masked with per-band valid-pixel expressions,
//! which are transpiled from the SNAP band-maths vocabulary when needed.

pub mod config;
pub mod core;
pub mod iproc;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{
    AttrValue, Attrs, Band, BandArray, BandRole, GenError, GenResult, GriddedDataset, MaskArray,
    Region, SourceDataset,
};

pub use config::GenConfig;
pub use core::{
    GcpGrid, GcpGridBuilder, GcpReprojector, ReprojectionGrid, ReprojectionParams,
    TranspiledExpression, ValidPixelMaskEvaluator, XyGcpStep,
};
pub use iproc::{process_batch, registry, BatchReport, InputProcessor};
