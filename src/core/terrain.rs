use crate::io::raster::{RasterIo, RasterWriteOptions};
use crate::types::{Grid, ParamError, ParamResult, Raster, DEFAULT_NODATA};
use std::path::Path;

/// Aspect value written for cells with no gradient
pub const FLAT_ASPECT: f64 = -1.0;

/// Parameters for slope/aspect derivation
#[derive(Debug, Clone)]
pub struct TerrainParams {
    /// Nodata sentinel the DEM is repaired to and the outputs carry
    pub nodata: f64,
    /// Vertical exaggeration applied to elevations
    pub z_factor: f64,
}

impl Default for TerrainParams {
    fn default() -> Self {
        Self {
            nodata: DEFAULT_NODATA,
            z_factor: 1.0,
        }
    }
}

/// Derives slope and aspect rasters from an elevation raster
pub struct TerrainDeriver {
    params: TerrainParams,
}

impl TerrainDeriver {
    pub fn new(params: TerrainParams) -> Self {
        Self { params }
    }

    pub fn standard() -> Self {
        Self::new(TerrainParams::default())
    }

    /// Load a DEM, failing before any work if it is absent
    pub fn load_dem<P: AsRef<Path>>(&self, dem_path: P) -> ParamResult<Raster> {
        let dem_path = dem_path.as_ref();
        if !dem_path.exists() {
            return Err(ParamError::MissingInput {
                path: dem_path.to_path_buf(),
            });
        }
        log::info!("Loading DEM: {}", dem_path.display());
        RasterIo::read(dem_path)
    }

    /// Give the DEM a clean nodata sentinel.
    ///
    /// Missing cells stay masked in memory and are written as the sentinel.
    pub fn repair_nodata(&self, mut dem: Raster) -> Raster {
        if dem.nodata != Some(self.params.nodata) {
            log::info!(
                "Repairing DEM nodata: {:?} -> {}",
                dem.nodata,
                self.params.nodata
            );
        }
        dem.data.mapv_inplace(|v| if v == self.params.nodata { f64::NAN } else { v });
        dem.nodata = Some(self.params.nodata);
        dem
    }

    /// Persist a repaired DEM as float32 with the sentinel nodata
    pub fn write_repaired<P: AsRef<Path>>(&self, dem: &Raster, output_path: P) -> ParamResult<()> {
        RasterIo::write(dem, output_path, &self.write_options())
    }

    /// Compute (slope_degrees, aspect_degrees) on the DEM grid.
    ///
    /// Horn's 3x3 finite differences. A missing centre cell is missing in both
    /// outputs; missing or off-grid neighbours take the centre elevation.
    /// Aspect is measured clockwise from north; flat cells get [`FLAT_ASPECT`].
    pub fn slope_aspect(&self, dem: &Raster) -> ParamResult<(Raster, Raster)> {
        let (rows, cols) = dem.shape();
        if rows == 0 || cols == 0 {
            return Err(ParamError::Processing("DEM has no cells".to_string()));
        }

        log::debug!("Calculating slope and aspect on {}x{} DEM", cols, rows);

        let cell_x = dem.transform.pixel_width.abs();
        let cell_y = dem.transform.pixel_height.abs();
        let z = self.params.z_factor;

        let derive_row = |row: usize| -> Vec<(f64, f64)> {
            (0..cols)
                .map(|col| horn_cell(&dem.data, row, col, cell_x, cell_y, z))
                .collect()
        };

        #[cfg(feature = "parallel")]
        let derived: Vec<(f64, f64)> = {
            use rayon::prelude::*;
            (0..rows).into_par_iter().flat_map_iter(derive_row).collect()
        };
        #[cfg(not(feature = "parallel"))]
        let derived: Vec<(f64, f64)> = (0..rows).flat_map(derive_row).collect();

        let (slope_values, aspect_values): (Vec<f64>, Vec<f64>) = derived.into_iter().unzip();

        let to_raster = |values: Vec<f64>| -> ParamResult<Raster> {
            let data = Grid::from_shape_vec((rows, cols), values)
                .map_err(|e| ParamError::Processing(format!("Shape error: {}", e)))?;
            Ok(Raster::new(
                data,
                dem.transform,
                dem.crs.clone(),
                Some(self.params.nodata),
            ))
        };

        Ok((to_raster(slope_values)?, to_raster(aspect_values)?))
    }

    pub fn write_options(&self) -> RasterWriteOptions {
        RasterWriteOptions {
            nodata: self.params.nodata,
            ..RasterWriteOptions::default()
        }
    }
}

fn horn_cell(dem: &Grid, row: usize, col: usize, cell_x: f64, cell_y: f64, z: f64) -> (f64, f64) {
    let e = dem[[row, col]];
    if e.is_nan() {
        return (f64::NAN, f64::NAN);
    }

    let (rows, cols) = dem.dim();
    let at = |dr: isize, dc: isize| -> f64 {
        let r = row as isize + dr;
        let c = col as isize + dc;
        if r < 0 || c < 0 || r >= rows as isize || c >= cols as isize {
            return e;
        }
        let v = dem[[r as usize, c as usize]];
        if v.is_nan() {
            e
        } else {
            v
        }
    };

    // a b c
    // d e f
    // g h i
    let (a, b, c) = (at(-1, -1), at(-1, 0), at(-1, 1));
    let (d, f) = (at(0, -1), at(0, 1));
    let (g, h, i) = (at(1, -1), at(1, 0), at(1, 1));

    let dz_dx = z * ((c + 2.0 * f + i) - (a + 2.0 * d + g)) / (8.0 * cell_x);
    // Positive when elevation rises toward the south (increasing row)
    let dz_dy = z * ((g + 2.0 * h + i) - (a + 2.0 * b + c)) / (8.0 * cell_y);

    let slope = (dz_dx * dz_dx + dz_dy * dz_dy).sqrt().atan().to_degrees();

    let aspect = if dz_dx == 0.0 && dz_dy == 0.0 {
        FLAT_ASPECT
    } else {
        let bearing = (-dz_dx).atan2(dz_dy).to_degrees();
        if bearing < 0.0 {
            bearing + 360.0
        } else {
            bearing
        }
    };

    (slope, aspect)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};
    use approx::assert_relative_eq;

    fn dem_from(f: impl Fn(usize, usize) -> f64) -> Raster {
        let data = Grid::from_shape_fn((5, 5), |(r, c)| f(r, c));
        Raster::new(
            data,
            GeoTransform::north_up(0.0, 50.0, 10.0, 10.0),
            Some(Crs::from_epsg(5070)),
            Some(-9999.0),
        )
    }

    #[test]
    fn test_flat_surface() {
        let dem = dem_from(|_, _| 100.0);
        let (slope, aspect) = TerrainDeriver::standard().slope_aspect(&dem).unwrap();
        assert!(slope.data.iter().all(|&s| s == 0.0));
        assert!(aspect.data.iter().all(|&a| a == FLAT_ASPECT));
    }

    #[test]
    fn test_east_rising_plane_faces_west() {
        // z rises 10 m per 10 m cell eastward: 45 degree slope, downhill west
        let dem = dem_from(|_, c| 10.0 * c as f64);
        let (slope, aspect) = TerrainDeriver::standard().slope_aspect(&dem).unwrap();
        assert_relative_eq!(slope.data[[2, 2]], 45.0, epsilon = 1e-9);
        assert_relative_eq!(aspect.data[[2, 2]], 270.0, epsilon = 1e-9);
    }

    #[test]
    fn test_north_facing_slope() {
        // Elevation rises with row (southward), so the surface faces north
        let dem = dem_from(|r, _| 5.0 * r as f64);
        let (_, aspect) = TerrainDeriver::standard().slope_aspect(&dem).unwrap();
        assert_relative_eq!(aspect.data[[2, 2]], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_nodata_centre_is_not_computed() {
        let mut dem = dem_from(|_, c| c as f64);
        dem.data[[2, 2]] = f64::NAN;
        let (slope, aspect) = TerrainDeriver::standard().slope_aspect(&dem).unwrap();
        assert!(slope.data[[2, 2]].is_nan());
        assert!(aspect.data[[2, 2]].is_nan());
        assert!(!slope.data[[2, 1]].is_nan());
        assert_eq!(slope.nodata, Some(-9999.0));
    }

    #[test]
    fn test_repair_sets_sentinel() {
        let mut dem = dem_from(|_, _| 1.0);
        dem.nodata = None;
        dem.data[[0, 0]] = -9999.0;
        let repaired = TerrainDeriver::standard().repair_nodata(dem);
        assert_eq!(repaired.nodata, Some(-9999.0));
        assert!(repaired.data[[0, 0]].is_nan());
    }
}
