use crate::core::layer::LayerType;
use crate::io::raster::{RasterIo, RasterWriteOptions};
use crate::types::{Grid, ParamError, ParamResult, Raster};
use ndarray::Zip;
use std::path::{Path, PathBuf};

/// Resample `source` onto the grid of `template` by nearest neighbour.
///
/// Each template cell takes the source cell containing its centre; cells
/// outside the source are missing. Both rasters must share a CRS.
pub fn resample_nearest(source: &Raster, template: &Raster) -> ParamResult<Raster> {
    ensure_same_crs(template, source)?;

    let (rows, cols) = template.shape();
    log::debug!("Resampling {:?} onto {}x{} grid", source.shape(), cols, rows);

    let data = Grid::from_shape_fn((rows, cols), |(r, c)| {
        let (x, y) = template.transform.cell_center(r, c);
        let (sr, sc) = source.transform.to_pixel(x, y);
        if sr < 0.0 || sc < 0.0 {
            return f64::NAN;
        }
        source
            .value(sr.floor() as usize, sc.floor() as usize)
            .unwrap_or(f64::NAN)
    });

    Ok(Raster::new(
        data,
        template.transform,
        template.crs.clone(),
        source.nodata,
    ))
}

/// Cell-wise product of two rasters on the same grid; missing propagates
pub fn multiply(a: &Raster, b: &Raster) -> ParamResult<Raster> {
    if a.shape() != b.shape() || a.transform != b.transform {
        return Err(ParamError::Processing(format!(
            "cannot multiply rasters on different grids: {:?} vs {:?}",
            a.shape(),
            b.shape()
        )));
    }
    ensure_same_crs(a, b)?;

    let data = Zip::from(&a.data).and(&b.data).map_collect(|&x, &y| x * y);
    Ok(Raster::new(data, a.transform, a.crs.clone(), a.nodata.or(b.nodata)))
}

/// Source rasters of the soil-moisture-capacity product
#[derive(Debug, Clone)]
pub struct SoilMoisturePaths {
    pub root_depth: PathBuf,
    pub available_water: PathBuf,
    /// Root depth resampled onto the available-water grid
    pub resampled_root_depth: PathBuf,
    pub output: PathBuf,
}

impl SoilMoisturePaths {
    /// Standard layout under the source data directory
    pub fn under<P: AsRef<Path>>(base_source_dir: P) -> Self {
        let base = base_source_dir.as_ref();
        Self {
            root_depth: base.join("lulc_veg/RootDepth.tif"),
            available_water: base.join("soils_litho/AWC.tif"),
            resampled_root_depth: base.join("lulc_veg/rd_250.tif"),
            output: base.join("soils_litho/soil_moist_max.tif"),
        }
    }
}

/// Build the soil_moist_max raster (root depth x available water capacity)
/// unless it already exists, and return its path.
pub fn build_soil_moist_max(paths: &SoilMoisturePaths) -> ParamResult<PathBuf> {
    for input in [&paths.root_depth, &paths.available_water] {
        if !input.exists() {
            return Err(ParamError::MissingInput { path: input.clone() });
        }
    }

    if paths.output.exists() {
        log::info!("Using existing soil_moist_max raster: {}", paths.output.display());
        return Ok(paths.output.clone());
    }

    let awc = RasterIo::read(&paths.available_water)?;
    let options = RasterWriteOptions::for_layer(LayerType::SoilMoistureMax);

    let root_depth = if paths.resampled_root_depth.exists() {
        RasterIo::read(&paths.resampled_root_depth)?
    } else {
        let resampled = resample_nearest(&RasterIo::read(&paths.root_depth)?, &awc)?;
        RasterIo::write(&resampled, &paths.resampled_root_depth, &options)?;
        resampled
    };

    let product = multiply(&root_depth, &awc)?;
    RasterIo::write(&product, &paths.output, &options)?;
    log::info!("Built soil_moist_max raster: {}", paths.output.display());
    Ok(paths.output.clone())
}

fn ensure_same_crs(a: &Raster, b: &Raster) -> ParamResult<()> {
    if a.crs != b.crs {
        return Err(ParamError::InconsistentCrs {
            found: vec![a.crs_label(), b.crs_label()],
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Crs, GeoTransform};
    use ndarray::array;

    fn grid(data: Grid, cell: f64) -> Raster {
        Raster::new(
            data,
            GeoTransform::north_up(0.0, 20.0, cell, cell),
            Some(Crs::from_epsg(5070)),
            Some(-9999.0),
        )
    }

    #[test]
    fn test_nearest_resample_to_finer_grid() {
        let coarse = grid(array![[1.0, 2.0], [3.0, f64::NAN]], 10.0);
        let fine = grid(Grid::zeros((4, 4)), 5.0);
        let out = resample_nearest(&coarse, &fine).unwrap();
        assert_eq!(out.shape(), (4, 4));
        assert_eq!(out.data[[0, 0]], 1.0);
        assert_eq!(out.data[[1, 3]], 2.0);
        assert_eq!(out.data[[3, 0]], 3.0);
        assert!(out.data[[3, 3]].is_nan());
    }

    #[test]
    fn test_multiply_propagates_missing() {
        let a = grid(array![[2.0, f64::NAN]], 10.0);
        let b = grid(array![[0.5, 4.0]], 10.0);
        let out = multiply(&a, &b).unwrap();
        assert_eq!(out.data[[0, 0]], 1.0);
        assert!(out.data[[0, 1]].is_nan());
    }

    #[test]
    fn test_multiply_rejects_mismatched_grids() {
        let a = grid(array![[2.0]], 10.0);
        let b = grid(array![[2.0]], 5.0);
        assert!(multiply(&a, &b).is_err());
    }

    #[test]
    fn test_missing_root_depth_is_fatal() {
        let paths = SoilMoisturePaths::under("/nonexistent/source");
        assert!(matches!(
            build_soil_moist_max(&paths),
            Err(ParamError::MissingInput { .. })
        ));
    }
}
