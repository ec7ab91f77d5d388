//! gfv2-params: hydrologic response unit parameters from national rasters
//!
//! Raster tiles are mosaicked per drainage basin (VPU), terrain derivatives
//! are computed from the merged DEM, raster and polygon sources are
//! aggregated onto HRU polygons, and the per-basin tables are stitched into
//! one national table.

pub mod core;
pub mod io;
pub mod pipeline;
pub mod types;

// Re-export main types and functions for easier access
pub use types::{Crs, GeoTransform, ParamError, ParamResult, Raster, Vpu};

pub use crate::core::{
    ExecutionMode, FluxSynthesizer, LayerType, MosaicEngine, TerrainDeriver, WeightEngine,
    ZonalEngine,
};
pub use io::{RasterIo, Table};
