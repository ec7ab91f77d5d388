use crate::core::layer::LayerType;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Continuous raster grid held in memory; `NaN` marks a missing cell
pub type Grid = Array2<f64>;

/// Nodata sentinel used for continuous layers and repaired DEMs
pub const DEFAULT_NODATA: f64 = -9999.0;

/// Every basin partition code the pipeline knows about
pub const VPU_CODES: [&str; 22] = [
    "01", "02", "03N", "03S", "03W", "04", "05", "06", "07", "08", "09", "10L", "10U", "11",
    "12", "13", "14", "15", "16", "17", "18", "20",
];

/// Drainage-basin partition identifier (e.g. "01", "03N", "10U")
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Vpu(String);

impl Vpu {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Partition code whose raster mosaic this VPU reads.
    ///
    /// The compound Southeast (03N/03S/03W) and Missouri (10U/10L) codes
    /// share the mosaic of their parent basin.
    pub fn raster_code(&self) -> &str {
        match self.0.as_str() {
            "03N" | "03S" | "03W" => "03",
            "10U" | "10L" => "10",
            other => other,
        }
    }
}

impl FromStr for Vpu {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if VPU_CODES.contains(&s) {
            Ok(Vpu(s.to_string()))
        } else {
            Err(ParamError::InvalidConfig(format!(
                "unknown VPU code '{}', expected one of {:?}",
                s, VPU_CODES
            )))
        }
    }
}

impl std::fmt::Display for Vpu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Geospatial transformation parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform with square-or-rectangular cells
    pub fn north_up(top_left_x: f64, top_left_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            top_left_x,
            pixel_width,
            rotation_x: 0.0,
            top_left_y,
            rotation_y: 0.0,
            pixel_height: -pixel_height.abs(),
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    pub fn is_north_up(&self) -> bool {
        self.rotation_x == 0.0 && self.rotation_y == 0.0 && self.pixel_height < 0.0
    }

    /// Planar area of one cell in CRS units squared
    pub fn cell_area(&self) -> f64 {
        (self.pixel_width * self.pixel_height).abs()
    }

    /// Map coordinate of a cell centre
    pub fn cell_center(&self, row: usize, col: usize) -> (f64, f64) {
        (
            self.top_left_x + (col as f64 + 0.5) * self.pixel_width,
            self.top_left_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Axis-aligned extent of a single cell as (min_x, min_y, max_x, max_y)
    pub fn cell_bounds(&self, row: usize, col: usize) -> (f64, f64, f64, f64) {
        let x0 = self.top_left_x + col as f64 * self.pixel_width;
        let y0 = self.top_left_y + row as f64 * self.pixel_height;
        let x1 = x0 + self.pixel_width;
        let y1 = y0 + self.pixel_height;
        (x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    /// Fractional (row, col) of a map coordinate; may fall outside the grid
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (y - self.top_left_y) / self.pixel_height,
            (x - self.top_left_x) / self.pixel_width,
        )
    }
}

/// Geospatial bounding box in map units
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BoundingBox {
    pub fn union(&self, other: &BoundingBox) -> BoundingBox {
        BoundingBox {
            min_x: self.min_x.min(other.min_x),
            min_y: self.min_y.min(other.min_y),
            max_x: self.max_x.max(other.max_x),
            max_y: self.max_y.max(other.max_y),
        }
    }
}

/// Coordinate reference system as read from a dataset
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Crs {
    pub epsg: Option<u32>,
    pub wkt: String,
}

impl Crs {
    pub fn from_epsg(code: u32) -> Self {
        Self {
            epsg: Some(code),
            wkt: String::new(),
        }
    }

    /// Short label used in diagnostics and CRS comparison
    pub fn label(&self) -> String {
        match self.epsg {
            Some(code) => format!("EPSG:{}", code),
            None => self.wkt.clone(),
        }
    }
}

impl PartialEq for Crs {
    fn eq(&self, other: &Self) -> bool {
        match (self.epsg, other.epsg) {
            (Some(a), Some(b)) => a == b,
            _ => self.wkt == other.wkt,
        }
    }
}

/// Single-band georeferenced raster held as f64 cells.
///
/// Cells equal to the source nodata are loaded as `NaN` so that missing data
/// is never confused with a valid zero. `nodata` is the sentinel written back
/// on persist.
#[derive(Debug, Clone)]
pub struct Raster {
    pub data: Grid,
    pub transform: GeoTransform,
    pub crs: Option<Crs>,
    pub nodata: Option<f64>,
}

impl Raster {
    pub fn new(data: Grid, transform: GeoTransform, crs: Option<Crs>, nodata: Option<f64>) -> Self {
        Self {
            data,
            transform,
            crs,
            nodata,
        }
    }

    /// (rows, cols)
    pub fn shape(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn bounds(&self) -> BoundingBox {
        let (rows, cols) = self.shape();
        let gt = &self.transform;
        let x0 = gt.top_left_x;
        let x1 = gt.top_left_x + cols as f64 * gt.pixel_width;
        let y0 = gt.top_left_y;
        let y1 = gt.top_left_y + rows as f64 * gt.pixel_height;
        BoundingBox {
            min_x: x0.min(x1),
            min_y: y0.min(y1),
            max_x: x0.max(x1),
            max_y: y0.max(y1),
        }
    }

    /// Number of cells holding a value
    pub fn valid_count(&self) -> usize {
        self.data.iter().filter(|v| !v.is_nan()).count()
    }

    /// Value at a cell, `None` when missing or out of range
    pub fn value(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get((row, col)).copied().filter(|v| !v.is_nan())
    }

    pub fn crs_label(&self) -> String {
        self.crs
            .as_ref()
            .map(|c| c.label())
            .unwrap_or_else(|| "<undefined>".to_string())
    }
}

/// Error types for parameter processing
#[derive(Debug, thiserror::Error)]
pub enum ParamError {
    #[error("Missing input: {}", .path.display())]
    MissingInput { path: PathBuf },

    #[error("Invalid format: {} ({reason})", .path.display())]
    InvalidFormat { path: PathBuf, reason: String },

    #[error("Inconsistent CRS among inputs: {found:?}")]
    InconsistentCrs { found: Vec<String> },

    #[error("Unknown layer type: {0}")]
    UnknownLayerType(String),

    #[error("Layer type {0:?} has no merge policy")]
    NotMergeable(LayerType),

    #[error("Column '{column}' not found in {}", .path.display())]
    MissingColumn { column: String, path: PathBuf },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Processing error: {0}")]
    Processing(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Result type for parameter processing
pub type ParamResult<T> = Result<T, ParamError>;
