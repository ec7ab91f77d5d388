//! Per-layer raster policy.
//!
//! Each [`LayerType`] resolves once to a [`LayerPolicy`] record holding its
//! merge method, output dtype, nodata sentinel, unit scale and compression
//! predictor. The mosaic engine and raster writer consult the record instead
//! of branching on the layer name.

use crate::types::{ParamError, ParamResult, Raster, DEFAULT_NODATA};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Raster data layers handled by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LayerType {
    Elevation,
    Slope,
    Aspect,
    FlowDirection,
    FlowAccumulation,
    Hydrodem,
    Soils,
    SoilMoistureMax,
}

/// How overlapping tiles resolve a shared cell
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeMethod {
    /// Earlier tiles keep their valid cells; later tiles only fill gaps
    First,
    /// The lowest valid value across overlapping tiles wins
    Min,
}

/// Storage type of a persisted raster
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RasterDtype {
    Float32,
    UInt8,
    Int32,
}

impl RasterDtype {
    pub fn is_float(&self) -> bool {
        matches!(self, RasterDtype::Float32)
    }
}

/// Policy record for one layer type
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LayerPolicy {
    pub merge_method: Option<MergeMethod>,
    pub dtype: RasterDtype,
    pub nodata: f64,
    /// Divisor applied to valid cells after merging (cm -> m is 100)
    pub unit_scale: Option<f64>,
    /// Enable the GTiff predictor on write
    pub predictor: bool,
}

impl LayerType {
    pub fn policy(&self) -> LayerPolicy {
        match self {
            LayerType::Elevation | LayerType::Hydrodem => LayerPolicy {
                merge_method: Some(MergeMethod::Min),
                dtype: RasterDtype::Float32,
                nodata: DEFAULT_NODATA,
                unit_scale: Some(100.0),
                predictor: true,
            },
            LayerType::FlowDirection => LayerPolicy {
                merge_method: Some(MergeMethod::First),
                dtype: RasterDtype::UInt8,
                nodata: 255.0,
                unit_scale: None,
                predictor: false,
            },
            LayerType::FlowAccumulation => LayerPolicy {
                merge_method: Some(MergeMethod::First),
                dtype: RasterDtype::Int32,
                nodata: DEFAULT_NODATA,
                unit_scale: None,
                predictor: false,
            },
            LayerType::Slope | LayerType::Aspect | LayerType::SoilMoistureMax => LayerPolicy {
                merge_method: None,
                dtype: RasterDtype::Float32,
                nodata: DEFAULT_NODATA,
                unit_scale: None,
                predictor: true,
            },
            LayerType::Soils => LayerPolicy {
                merge_method: None,
                dtype: RasterDtype::Int32,
                nodata: DEFAULT_NODATA,
                unit_scale: None,
                predictor: false,
            },
        }
    }

    /// NHDPlus dataset name used in the merge configuration
    pub fn dataset_name(&self) -> &'static str {
        match self {
            LayerType::Elevation => "NEDSnapshot",
            LayerType::Hydrodem => "Hydrodem",
            LayerType::FlowDirection => "FdrFac_Fdr",
            LayerType::FlowAccumulation => "FdrFac_Fac",
            LayerType::Slope => "slope",
            LayerType::Aspect => "aspect",
            LayerType::Soils => "soils",
            LayerType::SoilMoistureMax => "soil_moist_max",
        }
    }
}

impl FromStr for LayerType {
    type Err = ParamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEDSnapshot" | "elevation" => Ok(LayerType::Elevation),
            "Hydrodem" => Ok(LayerType::Hydrodem),
            "FdrFac_Fdr" => Ok(LayerType::FlowDirection),
            "FdrFac_Fac" => Ok(LayerType::FlowAccumulation),
            "slope" => Ok(LayerType::Slope),
            "aspect" => Ok(LayerType::Aspect),
            "soils" => Ok(LayerType::Soils),
            "soil_moist_max" => Ok(LayerType::SoilMoistureMax),
            other => Err(ParamError::UnknownLayerType(other.to_string())),
        }
    }
}

impl std::fmt::Display for LayerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dataset_name())
    }
}

impl LayerPolicy {
    pub fn require_merge_method(&self, layer: LayerType) -> ParamResult<MergeMethod> {
        self.merge_method.ok_or(ParamError::NotMergeable(layer))
    }

    /// Apply the unit conversion and stamp the layer nodata.
    ///
    /// Missing cells stay `NaN` through the division, so the set of nodata
    /// cells is unchanged; the writer fills them with `nodata` before casting.
    pub fn finalize(&self, mut raster: Raster) -> Raster {
        if let Some(scale) = self.unit_scale {
            raster.data.mapv_inplace(|v| v / scale);
        }
        raster.nodata = Some(self.nodata);
        raster
    }
}
