//! Core parameter derivation modules

pub mod geometry;
pub mod layer;
pub mod mosaic;
pub mod soils;
pub mod ssflux;
pub mod stitch;
pub mod terrain;
pub mod weights;
pub mod zonal;

// Re-export main types
pub use layer::{LayerPolicy, LayerType, MergeMethod, RasterDtype};
pub use mosaic::{MosaicEngine, MosaicOutcome};
pub use ssflux::{FluxBounds, FluxSynthesizer, FluxTable};
pub use stitch::{PartitionFile, StitchSummary};
pub use terrain::{TerrainDeriver, TerrainParams};
pub use weights::{WeightEngine, WeightRow};
pub use zonal::{ExecutionMode, ZonalEngine, ZonalRow};
