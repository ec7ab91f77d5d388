//! I/O modules for rasters, polygon layers, parameter tables and configuration

pub mod config;
pub mod raster;
pub mod table;
pub mod vector;

pub use raster::{RasterIo, RasterWriteOptions};
pub use table::Table;
pub use vector::{PolygonFeature, VectorReader, VectorRequest};
