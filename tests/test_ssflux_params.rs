use approx::assert_relative_eq;
use gdal::spatial_ref::SpatialRef;
use gdal::vector::{FieldValue, Geometry, LayerAccess, OGRFieldType};
use gdal::{DriverManager, LayerOptions};
use gfv2_params::core::ssflux::{FluxBounds, FLUX_PARAMS};
use gfv2_params::io::config::{SsfluxConfig, ZonalConfig};
use gfv2_params::io::table::Table;
use gfv2_params::pipeline;
use gfv2_params::types::ParamError;
use gfv2_params::Vpu;
use std::collections::BTreeMap;
use std::path::Path;
use tempfile::TempDir;

fn square_wkt(x0: f64, y0: f64, x1: f64, y1: f64) -> String {
    format!(
        "POLYGON (({x0} {y0},{x1} {y0},{x1} {y1},{x0} {y1},{x0} {y0}))",
        x0 = x0,
        y0 = y0,
        x1 = x1,
        y1 = y1
    )
}

fn write_polygons(
    path: &Path,
    driver_name: &str,
    layer_name: &str,
    field: (&str, u32),
    features: &[(FieldValue, String)],
) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    let driver = DriverManager::get_driver_by_name(driver_name).unwrap();
    let mut dataset = driver.create_vector_only(path).unwrap();
    let srs = SpatialRef::from_epsg(5070).unwrap();
    let mut layer = dataset
        .create_layer(LayerOptions {
            name: layer_name,
            srs: Some(&srs),
            ty: gdal_sys::OGRwkbGeometryType::wkbPolygon,
            options: None,
        })
        .unwrap();
    layer.create_defn_fields(&[field]).unwrap();
    for (value, wkt) in features {
        layer
            .create_feature_fields(Geometry::from_wkt(wkt).unwrap(), &[field.0], &[value.clone()])
            .unwrap();
    }
}

fn setup(root: &Path) -> SsfluxConfig {
    // HRU 1 and 2 each sit on one lithology unit; HRU 3 straddles both
    write_polygons(
        &root.join("gpkg/NHM_01_draft.gpkg"),
        "GPKG",
        "nhru",
        ("hru_id", OGRFieldType::OFTInteger64),
        &[
            (FieldValue::Integer64Value(1), square_wkt(0.0, 20.0, 20.0, 40.0)),
            (FieldValue::Integer64Value(2), square_wkt(20.0, 0.0, 40.0, 20.0)),
            (FieldValue::Integer64Value(3), square_wkt(10.0, 0.0, 30.0, 20.0)),
        ],
    );
    write_polygons(
        &root.join("source/data_layers/soils_litho/Lithology_exp_Konly_Project.shp"),
        "ESRI Shapefile",
        "Lithology_exp_Konly_Project",
        ("k_perm", OGRFieldType::OFTReal),
        &[
            (FieldValue::RealValue(-12.0), square_wkt(0.0, 0.0, 20.0, 40.0)),
            (FieldValue::RealValue(0.0), square_wkt(20.0, 0.0, 40.0, 40.0)),
        ],
    );

    let mut slope = Table::new(["hru_id", "mean", "count"]);
    slope.push_row(vec!["1".into(), "10".into(), "4".into()]);
    slope.push_row(vec!["2".into(), "20".into(), "4".into()]);
    slope.push_row(vec!["3".into(), "30".into(), "4".into()]);
    slope
        .write(root.join("params/slope/base_nhm_slope_01_param.csv"))
        .unwrap();

    SsfluxConfig {
        zonal: ZonalConfig {
            base_source_dir: root.join("source"),
            target_source_dir: root.join("gpkg"),
            output_dir: root.join("params"),
            source_type: "ssflux".to_string(),
            categorical: false,
            jobs: 1,
            id_feature: "hru_id".to_string(),
            layer: "nhru".to_string(),
        },
        weight_dir: root.join("weights"),
        weight_crs: "5070".to_string(),
        lithology_file: "data_layers/soils_litho/Lithology_exp_Konly_Project.shp".into(),
        flux_params: BTreeMap::new(),
    }
}

#[test]
fn test_ssflux_end_to_end() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path());
    let vpu: Vpu = "01".parse().unwrap();

    let output = pipeline::ssflux_params(&config, &vpu).expect("ssflux failed");
    assert_eq!(output, dir.path().join("params/ssflux/base_nhm_ssflux_01_param.csv"));
    assert!(config.weight_file(&vpu).exists());

    let table = Table::read(&output).unwrap();
    let mut expected = vec!["hru_id", "k_perm_wtd", "mean_slope_fraction", "hru_area"];
    expected.extend(FLUX_PARAMS);
    assert_eq!(table.headers, expected);
    assert_eq!(table.int_column("hru_id").unwrap(), vec![1, 2, 3]);

    let k = table.float_column("k_perm_wtd").unwrap();
    assert_relative_eq!(k[0], 1e-12 * 400.0 / 800.0, max_relative = 1e-9);
    assert_relative_eq!(k[1], 10f64.powf(-16.48) * 400.0 / 800.0, max_relative = 1e-9);

    let slope = table.float_column("mean_slope_fraction").unwrap();
    assert_relative_eq!(slope[1], 20f64.to_radians().tan(), epsilon = 1e-12);
    for area in table.float_column("hru_area").unwrap() {
        assert_relative_eq!(area, 400.0, max_relative = 1e-9);
    }

    // Highest permeability maps to the calibration max, lowest to the min
    let soil2gw = table.float_column("soil2gw_max").unwrap();
    assert_relative_eq!(soil2gw[0], 0.3, epsilon = 1e-12);
    assert_relative_eq!(soil2gw[1], 0.1, epsilon = 1e-12);
    for (name, column) in FLUX_PARAMS.iter().map(|p| (p, table.float_column(p).unwrap())) {
        assert!(column.iter().all(|v| v.is_finite()), "{} has missing values", name);
    }
}

#[test]
fn test_configured_bounds_override_defaults() {
    let dir = TempDir::new().unwrap();
    let mut config = setup(dir.path());
    config
        .flux_params
        .insert("soil2gw_max".to_string(), FluxBounds::new(1.0, 2.0));

    let output = pipeline::ssflux_params(&config, &"01".parse().unwrap()).unwrap();
    let soil2gw = Table::read(&output).unwrap().float_column("soil2gw_max").unwrap();
    assert_relative_eq!(soil2gw[0], 2.0, epsilon = 1e-12);
    assert_relative_eq!(soil2gw[1], 1.0, epsilon = 1e-12);
}

#[test]
fn test_cached_weights_are_reused() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path());
    let vpu: Vpu = "01".parse().unwrap();

    // Every HRU fully inside lithology unit 0
    let mut cached = Table::new(["hru_id", "flux_id", "area_weight", "flux_id_area", "hru_id_area"]);
    for id in 1..=3 {
        cached.push_row(vec![id.to_string(), "0".into(), "400".into(), "800".into(), "400".into()]);
    }
    cached.write(config.weight_file(&vpu)).unwrap();

    let output = pipeline::ssflux_params(&config, &vpu).unwrap();
    let k = Table::read(&output).unwrap().float_column("k_perm_wtd").unwrap();
    assert!(k.iter().all(|&v| (v - 0.5e-12).abs() < 1e-24));
}

#[test]
fn test_missing_slope_table() {
    let dir = TempDir::new().unwrap();
    let config = setup(dir.path());
    std::fs::remove_file(dir.path().join("params/slope/base_nhm_slope_01_param.csv")).unwrap();
    match pipeline::ssflux_params(&config, &"01".parse().unwrap()) {
        Err(ParamError::MissingInput { path }) => {
            assert!(path.ends_with("slope/base_nhm_slope_01_param.csv"))
        }
        other => panic!("expected MissingInput, got {:?}", other),
    }
}
