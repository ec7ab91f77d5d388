//! Subsurface-flux parameter synthesis.
//!
//! Lithology log-permeability is apportioned onto HRUs through areal
//! weights, combined with HRU slope and area into seven raw flux quantities,
//! and each quantity is min-max rescaled into its calibration range.

use crate::core::weights::WeightRow;
use crate::io::table::{format_value, Table};
use crate::types::{ParamError, ParamResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Replacement for an exact-zero log-permeability
pub const K_PERM_FLOOR: f64 = -16.48;

/// Output parameters, in emission order
pub const FLUX_PARAMS: [&str; 7] = [
    "soil2gw_max",
    "ssr2gw_rate",
    "fastcoef_lin",
    "slowcoef_lin",
    "gwflow_coef",
    "dprst_seep_rate_open",
    "dprst_flow_coef",
];

/// Calibration range a raw quantity is rescaled into
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FluxBounds {
    pub min: f64,
    pub max: f64,
}

impl FluxBounds {
    pub const fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }
}

/// Default calibration range of a flux parameter
pub fn default_bounds(param: &str) -> Option<FluxBounds> {
    let bounds = match param {
        "soil2gw_max" => FluxBounds::new(0.1, 0.3),
        "ssr2gw_rate" => FluxBounds::new(0.3, 0.7),
        "fastcoef_lin" => FluxBounds::new(0.01, 0.6),
        "slowcoef_lin" => FluxBounds::new(0.005, 0.3),
        "gwflow_coef" => FluxBounds::new(0.005, 0.3),
        "dprst_seep_rate_open" => FluxBounds::new(0.005, 0.2),
        "dprst_flow_coef" => FluxBounds::new(0.005, 0.5),
        _ => return None,
    };
    Some(bounds)
}

/// Slope in degrees as rise over run
pub fn deg_to_fraction(degrees: f64) -> f64 {
    degrees.to_radians().tan()
}

/// Linear permeability from log10 permeability, flooring exact zeros
pub fn linear_permeability(k_perm: f64) -> f64 {
    let k = if k_perm == 0.0 { K_PERM_FLOOR } else { k_perm };
    10f64.powf(k)
}

/// Area-prorated permeability sum per HRU.
///
/// Each weight row contributes `10^k_perm * area_weight / source_area`.
/// Rows whose source polygon has no permeability (unknown id or NaN) add
/// nothing, so an HRU covered only by such polygons sums to zero. Output is
/// keyed by HRU id in ascending order and holds every HRU in `weights`.
pub fn weighted_permeability(
    weights: &[WeightRow],
    k_perm: &HashMap<i64, f64>,
) -> BTreeMap<i64, f64> {
    let mut sums = BTreeMap::new();
    let mut unmatched = 0usize;
    for row in weights {
        let sum = sums.entry(row.target_id).or_insert(0.0);
        let k = match k_perm.get(&row.source_id) {
            Some(&k) if !k.is_nan() => k,
            _ => {
                unmatched += 1;
                continue;
            }
        };
        *sum += linear_permeability(k) * (row.area_weight / row.source_area);
    }
    if unmatched > 0 {
        log::warn!(
            "{} weight rows reference lithology polygons without k_perm",
            unmatched
        );
    }
    sums
}

/// Inputs and raw flux quantities for one HRU
#[derive(Debug, Clone, PartialEq)]
pub struct FluxRecord {
    pub hru_id: i64,
    pub k_perm_wtd: f64,
    pub mean_slope_fraction: f64,
    pub hru_area: f64,
    /// Un-normalised quantities in [`FLUX_PARAMS`] order
    pub raw: [f64; 7],
}

impl FluxRecord {
    pub fn new(hru_id: i64, k_perm_wtd: f64, mean_slope_fraction: f64, hru_area: f64) -> Self {
        let k = k_perm_wtd;
        let s = mean_slope_fraction;
        let soil2gw_max = k.powi(3);
        let ssr2gw_rate = k * (1.0 - s);
        let slowcoef_lin = (k * s) / hru_area;
        let fastcoef_lin = 2.0 * slowcoef_lin;
        let gwflow_coef = slowcoef_lin;
        let dprst_seep_rate_open = ssr2gw_rate;
        let dprst_flow_coef = fastcoef_lin;
        Self {
            hru_id,
            k_perm_wtd,
            mean_slope_fraction,
            hru_area,
            raw: [
                soil2gw_max,
                ssr2gw_rate,
                fastcoef_lin,
                slowcoef_lin,
                gwflow_coef,
                dprst_seep_rate_open,
                dprst_flow_coef,
            ],
        }
    }
}

/// Min and max ignoring `NaN`; `None` when nothing is finite
pub fn observed_range(values: &[f64]) -> Option<(f64, f64)> {
    values
        .iter()
        .copied()
        .filter(|v| !v.is_nan())
        .fold(None, |acc, v| match acc {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Rescale `values` linearly from their observed range onto `bounds`.
///
/// `NaN` inputs stay `NaN`. A column with zero observed range maps every
/// value to `bounds.min`.
pub fn normalize(values: &[f64], bounds: FluxBounds) -> Vec<f64> {
    let (lo, hi) = match observed_range(values) {
        Some(range) => range,
        None => return vec![f64::NAN; values.len()],
    };
    let range_in = hi - lo;
    let range_out = bounds.max - bounds.min;

    if range_in == 0.0 {
        log::warn!("Constant column; emitting the calibration minimum {}", bounds.min);
    }

    values
        .iter()
        .map(|&v| {
            if v.is_nan() {
                f64::NAN
            } else if range_in == 0.0 {
                bounds.min
            } else if v == hi {
                bounds.max
            } else {
                (v - lo) / range_in * range_out + bounds.min
            }
        })
        .collect()
}

/// Normalised parameters per HRU
#[derive(Debug, Clone)]
pub struct FluxTable {
    pub records: Vec<FluxRecord>,
    /// One normalised column per entry of [`FLUX_PARAMS`]
    pub params: Vec<Vec<f64>>,
}

impl FluxTable {
    pub fn to_table(&self) -> Table {
        let mut table = Table::new(
            ["hru_id", "k_perm_wtd", "mean_slope_fraction", "hru_area"]
                .into_iter()
                .chain(FLUX_PARAMS),
        );
        for (i, record) in self.records.iter().enumerate() {
            let mut row = vec![
                record.hru_id.to_string(),
                format_value(record.k_perm_wtd),
                format_value(record.mean_slope_fraction),
                format_value(record.hru_area),
            ];
            row.extend(self.params.iter().map(|column| format_value(column[i])));
            table.push_row(row);
        }
        table
    }

    /// Normalised value of `param` for the record at `index`
    pub fn value(&self, index: usize, param: &str) -> Option<f64> {
        let column = FLUX_PARAMS.iter().position(|p| *p == param)?;
        self.params.get(column).and_then(|c| c.get(index)).copied()
    }
}

/// Subsurface-flux synthesiser with configurable calibration bounds
#[derive(Debug, Clone)]
pub struct FluxSynthesizer {
    bounds: [FluxBounds; 7],
}

impl Default for FluxSynthesizer {
    fn default() -> Self {
        Self {
            bounds: FLUX_PARAMS.map(|p| default_bounds(p).unwrap_or(FluxBounds::new(0.0, 1.0))),
        }
    }
}

impl FluxSynthesizer {
    /// Override defaults with configured bounds
    pub fn with_bounds(overrides: &BTreeMap<String, FluxBounds>) -> ParamResult<Self> {
        let mut synth = Self::default();
        for (name, bounds) in overrides {
            let idx = FLUX_PARAMS
                .iter()
                .position(|p| p == name)
                .ok_or_else(|| ParamError::InvalidConfig(format!("unknown flux parameter '{}'", name)))?;
            synth.bounds[idx] = *bounds;
        }
        Ok(synth)
    }

    pub fn bounds(&self, param: &str) -> Option<FluxBounds> {
        FLUX_PARAMS
            .iter()
            .position(|p| *p == param)
            .map(|i| self.bounds[i])
    }

    /// Build the parameter table.
    ///
    /// Rows are the HRUs present in `weights`, ascending by id. HRUs missing
    /// from `slope_fraction` or `hru_area` carry `NaN` through every derived
    /// quantity.
    pub fn synthesize(
        &self,
        weights: &[WeightRow],
        k_perm: &HashMap<i64, f64>,
        slope_fraction: &HashMap<i64, f64>,
        hru_area: &HashMap<i64, f64>,
    ) -> FluxTable {
        let k_wtd = weighted_permeability(weights, k_perm);
        log::info!("Aggregated permeability for {} HRUs", k_wtd.len());

        let zeros = k_wtd.values().filter(|&&k| k == 0.0).count();
        if zeros > 0 {
            log::warn!("{} HRUs have zero weighted permeability", zeros);
        }

        let records: Vec<FluxRecord> = k_wtd
            .into_iter()
            .map(|(id, k)| {
                let slope = slope_fraction.get(&id).copied().unwrap_or(f64::NAN);
                let area = hru_area.get(&id).copied().unwrap_or(f64::NAN);
                FluxRecord::new(id, k, slope, area)
            })
            .collect();

        let params = (0..FLUX_PARAMS.len())
            .map(|p| {
                let raw: Vec<f64> = records.iter().map(|r| r.raw[p]).collect();
                normalize(&raw, self.bounds[p])
            })
            .collect();

        FluxTable { records, params }
    }
}
