use crate::core::layer::{LayerType, MergeMethod};
use crate::io::raster::{RasterIo, RasterWriteOptions};
use crate::types::{GeoTransform, Grid, ParamError, ParamResult, Raster};
use ndarray::Zip;
use std::path::{Path, PathBuf};

/// Header file that marks an ESRI Grid folder
pub const GRID_HEADER_MARKER: &str = "hdr.adf";

/// Outcome of a mosaic request against an output path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MosaicOutcome {
    Written(PathBuf),
    /// Output already present; nothing was read or validated
    Skipped(PathBuf),
}

/// Merges RPU raster tiles into one VPU-wide raster
pub struct MosaicEngine {
    layer: LayerType,
    parallel: bool,
}

impl MosaicEngine {
    pub fn new(layer: LayerType) -> Self {
        Self {
            layer,
            parallel: cfg!(feature = "parallel"),
        }
    }

    /// Force single-threaded cell resolution
    pub fn serial(mut self) -> Self {
        self.parallel = false;
        self
    }

    /// Validate, load, merge, convert and persist a list of tiles.
    ///
    /// Returns early with [`MosaicOutcome::Skipped`] when `output_path`
    /// already exists.
    pub fn mosaic_to_file<P: AsRef<Path>>(
        &self,
        tile_paths: &[PathBuf],
        output_path: P,
    ) -> ParamResult<MosaicOutcome> {
        let output_path = output_path.as_ref();
        if output_path.exists() {
            log::info!("Output already exists, skipping: {}", output_path.display());
            return Ok(MosaicOutcome::Skipped(output_path.to_path_buf()));
        }

        let merged = self.mosaic_paths(tile_paths)?;
        RasterIo::write(&merged, output_path, &RasterWriteOptions::for_layer(self.layer))?;
        log::info!("Wrote {} mosaic: {}", self.layer, output_path.display());

        Ok(MosaicOutcome::Written(output_path.to_path_buf()))
    }

    /// Validate and load every tile, then merge and finalize them
    pub fn mosaic_paths(&self, tile_paths: &[PathBuf]) -> ParamResult<Raster> {
        if tile_paths.is_empty() {
            return Err(ParamError::Processing(format!(
                "no raster tiles given for {}",
                self.layer
            )));
        }

        let mut tiles = Vec::with_capacity(tile_paths.len());
        for path in tile_paths {
            validate_tile_path(path)?;
            log::info!("Reading raster from: {}", path.display());
            tiles.push(RasterIo::read(path)?);
        }

        self.mosaic(tiles)
    }

    /// Merge in-memory tiles and apply the layer's post-merge transform
    pub fn mosaic(&self, tiles: Vec<Raster>) -> ParamResult<Raster> {
        let policy = self.layer.policy();
        let method = policy.require_merge_method(self.layer)?;

        log::info!("Merging {} tiles for {} ({:?})", tiles.len(), self.layer, method);
        let merged = merge_tiles(tiles, method, self.parallel)?;

        Ok(policy.finalize(merged))
    }
}

/// Existence and format checks for a single tile path
pub fn validate_tile_path(path: &Path) -> ParamResult<()> {
    if !path.exists() {
        return Err(ParamError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    if path.is_dir() && !path.join(GRID_HEADER_MARKER).exists() {
        return Err(ParamError::InvalidFormat {
            path: path.to_path_buf(),
            reason: format!("folder has no {}; not an ESRI Grid raster", GRID_HEADER_MARKER),
        });
    }
    Ok(())
}

/// All tiles must carry the same CRS
pub fn check_crs_consistency(tiles: &[Raster]) -> ParamResult<()> {
    let mut labels: Vec<String> = Vec::new();
    for tile in tiles {
        let label = tile.crs_label();
        if !labels.contains(&label) {
            labels.push(label);
        }
    }

    let first = tiles.first().and_then(|t| t.crs.as_ref());
    let consistent = tiles.iter().all(|t| t.crs.as_ref() == first);
    if !consistent {
        return Err(ParamError::InconsistentCrs { found: labels });
    }
    Ok(())
}

/// Merge tiles onto the union of their extents.
///
/// The output grid uses the first tile's cell size and is anchored at the
/// union's top-left corner. Each output cell samples every tile covering its
/// centre, in list order, and resolves overlaps with `method`. A single tile
/// is returned unchanged.
pub fn merge_tiles(mut tiles: Vec<Raster>, method: MergeMethod, parallel: bool) -> ParamResult<Raster> {
    check_crs_consistency(&tiles)?;

    if tiles.len() == 1 {
        return tiles.pop().ok_or_else(|| ParamError::Processing("empty tile list".to_string()));
    }
    let first = tiles
        .first()
        .ok_or_else(|| ParamError::Processing("empty tile list".to_string()))?;

    let pixel_width = first.transform.pixel_width;
    let pixel_height = first.transform.pixel_height;
    let extent = tiles
        .iter()
        .skip(1)
        .fold(first.bounds(), |acc, t| acc.union(&t.bounds()));

    let cols = ((extent.max_x - extent.min_x) / pixel_width.abs() - 1e-6).ceil().max(1.0) as usize;
    let rows = ((extent.max_y - extent.min_y) / pixel_height.abs() - 1e-6).ceil().max(1.0) as usize;
    let transform = GeoTransform::north_up(extent.min_x, extent.max_y, pixel_width.abs(), pixel_height.abs());

    log::debug!(
        "Mosaic grid {}x{} at ({}, {}), cell {}x{}",
        cols,
        rows,
        extent.min_x,
        extent.max_y,
        pixel_width,
        pixel_height
    );

    let resolve = |row: usize, col: usize| -> f64 {
        let (x, y) = transform.cell_center(row, col);
        let mut merged = f64::NAN;
        for tile in &tiles {
            let value = match sample(tile, x, y) {
                Some(v) => v,
                None => continue,
            };
            match method {
                MergeMethod::First => {
                    if merged.is_nan() {
                        merged = value;
                        break;
                    }
                }
                MergeMethod::Min => {
                    if merged.is_nan() || value < merged {
                        merged = value;
                    }
                }
            }
        }
        merged
    };

    let mut data = Grid::from_elem((rows, cols), f64::NAN);
    fill_cells(&mut data, parallel, resolve);

    let crs = first.crs.clone();
    let nodata = first.nodata;
    Ok(Raster::new(data, transform, crs, nodata))
}

#[cfg(feature = "parallel")]
fn fill_cells<F>(data: &mut Grid, parallel: bool, resolve: F)
where
    F: Fn(usize, usize) -> f64 + Sync,
{
    if parallel {
        Zip::indexed(data).par_for_each(|(r, c), cell| *cell = resolve(r, c));
    } else {
        Zip::indexed(data).for_each(|(r, c), cell| *cell = resolve(r, c));
    }
}

#[cfg(not(feature = "parallel"))]
fn fill_cells<F>(data: &mut Grid, _parallel: bool, resolve: F)
where
    F: Fn(usize, usize) -> f64,
{
    Zip::indexed(data).for_each(|(r, c), cell| *cell = resolve(r, c));
}

/// Valid value of the tile cell containing (x, y)
fn sample(tile: &Raster, x: f64, y: f64) -> Option<f64> {
    let (row, col) = tile.transform.to_pixel(x, y);
    if row < 0.0 || col < 0.0 {
        return None;
    }
    tile.value(row.floor() as usize, col.floor() as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Crs;
    use ndarray::array;

    fn tile(data: Grid, left: f64, top: f64) -> Raster {
        Raster::new(
            data,
            GeoTransform::north_up(left, top, 10.0, 10.0),
            Some(Crs::from_epsg(5070)),
            Some(-9999.0),
        )
    }

    #[test]
    fn test_single_tile_is_unchanged() {
        let only = tile(array![[1.0, f64::NAN], [3.0, 4.0]], 0.0, 20.0);
        let merged = merge_tiles(vec![only.clone()], MergeMethod::Min, false).unwrap();
        assert_eq!(merged.transform, only.transform);
        assert_eq!(merged.data[[0, 0]], 1.0);
        assert!(merged.data[[0, 1]].is_nan());
        assert_eq!(merged.data[[1, 1]], 4.0);
    }

    #[test]
    fn test_union_extent_and_min_overlap() {
        // A covers x 0..20, B covers x 10..30; one overlapping column
        let a = tile(array![[100.0, 200.0]], 0.0, 10.0);
        let b = tile(array![[150.0, 50.0]], 10.0, 10.0);
        let merged = merge_tiles(vec![a, b], MergeMethod::Min, false).unwrap();

        assert_eq!(merged.shape(), (1, 3));
        assert_eq!(merged.data[[0, 0]], 100.0);
        assert_eq!(merged.data[[0, 1]], 150.0);
        assert_eq!(merged.data[[0, 2]], 50.0);
    }

    #[test]
    fn test_first_wins_keeps_earlier_valid_cells() {
        let a = tile(array![[1.0, f64::NAN]], 0.0, 10.0);
        let b = tile(array![[9.0, 9.0]], 0.0, 10.0);
        let merged = merge_tiles(vec![a, b], MergeMethod::First, false).unwrap();
        assert_eq!(merged.data[[0, 0]], 1.0);
        assert_eq!(merged.data[[0, 1]], 9.0);
    }

    #[test]
    fn test_crs_mismatch_is_fatal() {
        let a = tile(array![[1.0]], 0.0, 10.0);
        let mut b = tile(array![[2.0]], 10.0, 10.0);
        b.crs = Some(Crs::from_epsg(4269));
        match merge_tiles(vec![a, b], MergeMethod::First, false) {
            Err(ParamError::InconsistentCrs { found }) => {
                assert_eq!(found, vec!["EPSG:5070".to_string(), "EPSG:4269".to_string()]);
            }
            other => panic!("expected InconsistentCrs, got {:?}", other.map(|r| r.shape())),
        }
    }

    #[test]
    fn test_flow_direction_not_scaled() {
        let engine = MosaicEngine::new(LayerType::FlowDirection).serial();
        let merged = engine
            .mosaic(vec![tile(array![[4.0, 8.0]], 0.0, 10.0), tile(array![[16.0]], 20.0, 10.0)])
            .unwrap();
        assert_eq!(merged.nodata, Some(255.0));
        assert_eq!(merged.data.iter().cloned().collect::<Vec<_>>(), vec![4.0, 8.0, 16.0]);
    }

    #[test]
    fn test_mosaic_rejects_layer_without_merge_policy() {
        let engine = MosaicEngine::new(LayerType::Slope);
        assert!(matches!(
            engine.mosaic(vec![tile(array![[1.0]], 0.0, 10.0)]),
            Err(ParamError::NotMergeable(LayerType::Slope))
        ));
    }
}
