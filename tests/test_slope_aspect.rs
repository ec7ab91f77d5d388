use approx::assert_relative_eq;
use gfv2_params::core::layer::LayerType;
use gfv2_params::io::config::TerrainConfig;
use gfv2_params::io::raster::{RasterIo, RasterWriteOptions};
use gfv2_params::pipeline;
use gfv2_params::types::{Crs, GeoTransform, Grid, ParamError, Raster};
use gfv2_params::Vpu;
use tempfile::TempDir;

fn config(root: &std::path::Path) -> TerrainConfig {
    TerrainConfig {
        input_dir: root.join("merged"),
        output_dir: root.join("terrain"),
    }
}

#[test]
fn test_slope_aspect_stage() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());

    // Rises 10 m per 10 m cell toward the east; one hole in the middle row
    let mut data = Grid::from_shape_fn((5, 6), |(_, c)| 10.0 * c as f64);
    data[[2, 0]] = -9999.0;
    let dem = Raster::new(
        data,
        GeoTransform::north_up(0.0, 50.0, 10.0, 10.0),
        Some(Crs::from_epsg(5070)),
        Some(-9999.0),
    );
    RasterIo::write(
        &dem,
        dir.path().join("merged/10/NEDSnapshot_merged_10.tif"),
        &RasterWriteOptions::for_layer(LayerType::Elevation),
    )
    .unwrap();

    let vpu: Vpu = "10U".parse().unwrap();
    let outputs = pipeline::slope_aspect(&config, &vpu).expect("slope/aspect failed");
    assert!(outputs.repaired_dem.ends_with("merged/10/NEDSnapshot_merged_fixed_10.tif"));
    assert!(outputs.repaired_dem.exists());

    let slope = RasterIo::read(&outputs.slope).unwrap();
    let aspect = RasterIo::read(&outputs.aspect).unwrap();
    assert_eq!(slope.shape(), (5, 6));
    assert_eq!(slope.nodata, Some(-9999.0));
    assert_eq!(slope.crs.as_ref().and_then(|c| c.epsg), Some(5070));

    assert_relative_eq!(slope.data[[1, 2]], 45.0, epsilon = 1e-4);
    assert_relative_eq!(aspect.data[[1, 2]], 270.0, epsilon = 1e-4);
    assert!(slope.data[[2, 0]].is_nan());
    assert!(aspect.data[[2, 0]].is_nan());
}

#[test]
fn test_existing_outputs_are_kept() {
    let dir = TempDir::new().unwrap();
    let config = config(dir.path());
    let out = dir.path().join("terrain/01");
    std::fs::create_dir_all(&out).unwrap();
    std::fs::write(out.join("NEDSnapshot_merged_slope_01.tif"), b"x").unwrap();
    std::fs::write(out.join("NEDSnapshot_merged_aspect_01.tif"), b"x").unwrap();

    // No DEM on disk: nothing may be read
    pipeline::slope_aspect(&config, &"01".parse().unwrap()).unwrap();
}

#[test]
fn test_missing_dem() {
    let dir = TempDir::new().unwrap();
    match pipeline::slope_aspect(&config(dir.path()), &"05".parse().unwrap()) {
        Err(ParamError::MissingInput { path }) => {
            assert!(path.ends_with("merged/05/NEDSnapshot_merged_05.tif"))
        }
        other => panic!("expected MissingInput, got {:?}", other.map(|o| o.slope)),
    }
}
