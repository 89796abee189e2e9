//! Core swath-to-grid processing modules

pub mod gcp_grid;
pub mod reproject;
pub mod transexpr;
pub mod valid_mask;

// Re-export main types
pub use gcp_grid::{GcpGrid, GcpGridBuilder, XyGcpStep};
pub use reproject::{
    derive_resolution, sample_bilinear, sample_nearest, GcpReprojector, ReprojectionGrid,
    ReprojectionParams,
};
pub use transexpr::{transpile, translate_snap_expr, Dialect, Expr, TranspiledExpression};
pub use valid_mask::{evaluate_valid_mask, ValidPixelMaskEvaluator};
