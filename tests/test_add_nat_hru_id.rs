use gfv2_params::io::config::{self, StitchConfig};
use gfv2_params::io::table::Table;
use gfv2_params::pipeline;
use gfv2_params::types::ParamError;
use std::path::Path;
use tempfile::TempDir;

fn write_partition(dir: &Path, vpu: &str, ids: &[i64]) {
    let mut table = Table::new(["hru_id", "mean", "count"]);
    for id in ids {
        table.push_row(vec![id.to_string(), "1.5".to_string(), "3".to_string()]);
    }
    table
        .write(dir.join(format!("base_nhm_elevation_{}_param.csv", vpu)))
        .unwrap();
}

fn write_config(root: &Path) -> std::path::PathBuf {
    let path = root.join("config_add_nat_hru_id.yml");
    std::fs::write(
        &path,
        format!(
            "output_dir: {}\nsource_type: elevation\nmerged_file: nhm_elevation_params.csv\n",
            root.display()
        ),
    )
    .unwrap();
    path
}

#[test]
fn test_stitch_three_partitions() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("elevation");

    // Written out of order; sorting is by VPU token
    write_partition(&input, "03N", &(1..=5).collect::<Vec<_>>());
    write_partition(&input, "01", &(1..=10).collect::<Vec<_>>());
    write_partition(&input, "02", &(1..=7).collect::<Vec<_>>());

    let config: StitchConfig = config::load(write_config(dir.path())).expect("Failed to load config");
    let summary = pipeline::add_nat_hru_id(&config).expect("Stitching failed");
    assert_eq!(summary.total_rows, 22);

    let merged = Table::read(dir.path().join("nhm_elevation_params.csv")).unwrap();
    assert_eq!(merged.headers, vec!["hru_id", "mean", "count", "nat_hru_id", "vpu"]);
    assert_eq!(merged.len(), 22);

    let nat = merged.int_column("nat_hru_id").unwrap();
    assert_eq!(nat, (1..=22).collect::<Vec<i64>>());

    let third = Table::read(input.join("base_nhm_elevation_03N_param.csv")).unwrap();
    let local = third.int_column("hru_id").unwrap();
    let national = third.int_column("nat_hru_id").unwrap();
    assert!(local.iter().zip(&national).all(|(l, n)| *n == l + 17));

    let vpu_col = merged.require_column("vpu").unwrap();
    assert_eq!(merged.rows[0][vpu_col], "01");
    assert_eq!(merged.rows[21][vpu_col], "03N");
}

#[test]
fn test_config_paths_expand_environment() {
    let dir = TempDir::new().unwrap();
    std::env::set_var("GFV2_STITCH_TEST_ROOT", dir.path());
    let path = dir.path().join("config.yml");
    std::fs::write(
        &path,
        "output_dir: ${GFV2_STITCH_TEST_ROOT}/out\nsource_type: slope\nmerged_file: merged.csv\n",
    )
    .unwrap();

    let config: StitchConfig = config::load(&path).unwrap();
    assert_eq!(config.input_dir(), dir.path().join("out/slope"));
}

#[test]
fn test_missing_input_directory() {
    let dir = TempDir::new().unwrap();
    let config: StitchConfig = config::load(write_config(dir.path())).unwrap();
    match pipeline::add_nat_hru_id(&config) {
        Err(ParamError::MissingInput { path }) => assert_eq!(path, dir.path().join("elevation")),
        other => panic!("expected MissingInput, got {:?}", other.map(|s| s.total_rows)),
    }
}
