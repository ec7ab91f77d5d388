//! Stage drivers.
//!
//! Each function runs one pipeline stage for one VPU: it resolves the stage's
//! file layout from its configuration, checks inputs, runs the engines and
//! persists the result. Stages communicate only through files.

use crate::core::layer::LayerType;
use crate::core::mosaic::{MosaicEngine, MosaicOutcome};
use crate::core::soils::{build_soil_moist_max, SoilMoisturePaths};
use crate::core::ssflux::{deg_to_fraction, FluxSynthesizer};
use crate::core::stitch::{self, StitchSummary};
use crate::core::terrain::TerrainDeriver;
use crate::core::weights::{WeightColumns, WeightEngine};
use crate::core::zonal::{zonal_table, ExecutionMode, ZonalEngine, ZonalRow};
use crate::io::config::{MergeConfig, SsfluxConfig, StitchConfig, TerrainConfig, ZonalConfig};
use crate::io::raster::{spatial_ref, spatial_ref_from_config, RasterIo};
use crate::io::table::{format_value, Table};
use crate::io::vector::{PolygonFeature, VectorReader, VectorRequest};
use crate::types::{ParamError, ParamResult, Raster, Vpu};
use gdal::spatial_ref::SpatialRef;
use geo::Area;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Source id column of the lithology polygons
pub const FLUX_ID_COLUMN: &str = "flux_id";
/// Log-permeability attribute of the lithology polygons
pub const K_PERM_ATTRIBUTE: &str = "k_perm";

fn require_file(path: &Path) -> ParamResult<()> {
    if !path.exists() {
        return Err(ParamError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    Ok(())
}

/// Mosaic every dataset configured for `vpu`, in configuration order
pub fn merge_rpus(config: &MergeConfig, vpu: &Vpu) -> ParamResult<Vec<MosaicOutcome>> {
    let datasets = config.datasets(vpu)?;
    log::info!("Merging {} datasets for VPU {}", datasets.len(), vpu);

    let mut outcomes = Vec::with_capacity(datasets.len());
    for dataset in datasets {
        let output = config.resolve(&dataset.output);
        if dataset.rpus.is_empty() {
            return Err(ParamError::MissingInput { path: output });
        }
        let tiles: Vec<PathBuf> = dataset.rpus.iter().map(|p| config.resolve(p)).collect();

        log::info!("Processing dataset: {} -> {}", dataset.name, output.display());
        let outcome = MosaicEngine::new(dataset.layer).mosaic_to_file(&tiles, &output)?;
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

/// Files produced by the slope/aspect stage
#[derive(Debug, Clone)]
pub struct TerrainOutputs {
    pub repaired_dem: PathBuf,
    pub slope: PathBuf,
    pub aspect: PathBuf,
}

impl TerrainOutputs {
    pub fn for_vpu(config: &TerrainConfig, code: &str) -> Self {
        let out = config.output_dir.join(code);
        Self {
            repaired_dem: config
                .input_dir
                .join(code)
                .join(format!("NEDSnapshot_merged_fixed_{}.tif", code)),
            slope: out.join(format!("NEDSnapshot_merged_slope_{}.tif", code)),
            aspect: out.join(format!("NEDSnapshot_merged_aspect_{}.tif", code)),
        }
    }
}

/// Merged DEM of a raster partition
pub fn merged_dem_path(input_dir: &Path, code: &str) -> PathBuf {
    input_dir.join(code).join(format!("NEDSnapshot_merged_{}.tif", code))
}

/// Repair the merged DEM and derive slope and aspect rasters
pub fn slope_aspect(config: &TerrainConfig, vpu: &Vpu) -> ParamResult<TerrainOutputs> {
    let code = vpu.raster_code();
    let dem_path = merged_dem_path(&config.input_dir, code);
    let outputs = TerrainOutputs::for_vpu(config, code);

    if outputs.slope.exists() && outputs.aspect.exists() {
        log::info!("Slope and aspect already exist for {}, skipping", code);
        return Ok(outputs);
    }

    let deriver = TerrainDeriver::standard();
    let dem = deriver.repair_nodata(deriver.load_dem(&dem_path)?);
    if !outputs.repaired_dem.exists() {
        deriver.write_repaired(&dem, &outputs.repaired_dem)?;
    }

    let (slope, aspect) = deriver.slope_aspect(&dem)?;
    let options = deriver.write_options();
    for (raster, path) in [(&slope, &outputs.slope), (&aspect, &outputs.aspect)] {
        if path.exists() {
            log::info!("Output already exists, skipping: {}", path.display());
            continue;
        }
        RasterIo::write(raster, path, &options)?;
    }
    Ok(outputs)
}

/// Load the HRU polygons of `vpu`, optionally reprojected
pub fn load_hrus(config: &ZonalConfig, vpu: &Vpu, target_srs: Option<&SpatialRef>) -> ParamResult<Vec<PolygonFeature>> {
    let gpkg = config.target_gpkg(vpu);
    require_file(&gpkg)?;
    VectorReader::read_polygons(
        &gpkg,
        &VectorRequest {
            layer: Some(config.layer.as_str()),
            id_field: Some(config.id_feature.as_str()),
            attributes: &[],
            target_srs,
        },
    )
}

/// Zonal statistics of `raster` over the VPU's HRUs, sorted by HRU id.
///
/// The engine's scratch table is removed once the rows are in memory.
pub fn zonal_over_hrus(config: &ZonalConfig, vpu: &Vpu, raster: &Raster) -> ParamResult<Vec<ZonalRow>> {
    let srs = raster.crs.as_ref().map(spatial_ref).transpose()?;
    let hrus = load_hrus(config, vpu, srs.as_ref())?;

    let scratch = config.scratch_file(vpu);
    let engine = ZonalEngine::new(ExecutionMode::from_jobs(config.jobs));
    let mut rows = engine.calculate_to_file(raster, &hrus, config.categorical, &config.id_feature, &scratch)?;
    if scratch.exists() {
        std::fs::remove_file(&scratch)?;
    }

    rows.sort_by_key(|r| r.id);
    Ok(rows)
}

/// Raster feeding a DEM-derived parameter
pub fn dem_source_raster(config: &ZonalConfig, vpu: &Vpu) -> ParamResult<PathBuf> {
    let code = vpu.raster_code();
    let stem = match config.source_type.parse::<LayerType>()? {
        LayerType::Elevation => "fixed",
        LayerType::Slope => "slope",
        LayerType::Aspect => "aspect",
        _ => return Err(ParamError::UnknownLayerType(config.source_type.clone())),
    };
    Ok(config
        .base_source_dir
        .join(code)
        .join(format!("NEDSnapshot_merged_{}_{}.tif", stem, code)))
}

/// Mean elevation, slope or aspect per HRU
pub fn dem_params(config: &ZonalConfig, vpu: &Vpu) -> ParamResult<PathBuf> {
    let raster_path = dem_source_raster(config, vpu)?;
    require_file(&raster_path)?;
    let raster = RasterIo::read(&raster_path)?;

    let mut continuous = config.clone();
    if continuous.categorical {
        log::warn!("{} is continuous, ignoring 'categorical: true'", config.source_type);
        continuous.categorical = false;
    }
    let rows = zonal_over_hrus(&continuous, vpu, &raster)?;
    let output = config.param_file(vpu);
    zonal_table(&rows, false, &config.id_feature).write(&output)?;
    Ok(output)
}

/// Dominant soil texture or mean soil moisture capacity per HRU
pub fn soils_params(config: &ZonalConfig, vpu: &Vpu) -> ParamResult<PathBuf> {
    let layer = config.source_type.parse::<LayerType>()?;
    let output = config.param_file(vpu);

    let mut table = Table::new([config.id_feature.as_str(), config.source_type.as_str()]);
    match layer {
        LayerType::Soils => {
            let raster_path = config.base_source_dir.join("soils_litho/TEXT_PRMS.tif");
            require_file(&raster_path)?;
            let raster = RasterIo::read(&raster_path)?;
            let mut categorical = config.clone();
            categorical.categorical = true;
            for row in zonal_over_hrus(&categorical, vpu, &raster)? {
                let dominant = row.dominant().map(|c| c.to_string()).unwrap_or_default();
                table.push_row(vec![row.id.to_string(), dominant]);
            }
        }
        LayerType::SoilMoistureMax => {
            let raster_path = build_soil_moist_max(&SoilMoisturePaths::under(&config.base_source_dir))?;
            let raster = RasterIo::read(&raster_path)?;
            let mut continuous = config.clone();
            continuous.categorical = false;
            for row in zonal_over_hrus(&continuous, vpu, &raster)? {
                table.push_row(vec![row.id.to_string(), format_value(row.mean)]);
            }
        }
        _ => return Err(ParamError::UnknownLayerType(config.source_type.clone())),
    }

    table.write(&output)?;
    Ok(output)
}

/// Slope fraction per HRU from the slope parameter table
pub fn slope_fractions(path: &Path, id_column: &str) -> ParamResult<HashMap<i64, f64>> {
    let table = Table::read(path)?;
    let ids = table.int_column(id_column)?;
    let means = table.float_column("mean")?;
    Ok(ids
        .into_iter()
        .zip(means.into_iter().map(deg_to_fraction))
        .collect())
}

/// Subsurface-flux parameters per HRU
pub fn ssflux_params(config: &SsfluxConfig, vpu: &Vpu) -> ParamResult<PathBuf> {
    let lithology_path = config.lithology_path();
    let slope_path = config.slope_file(vpu);
    require_file(&config.zonal.target_gpkg(vpu))?;
    require_file(&lithology_path)?;
    require_file(&slope_path)?;

    let weight_srs = spatial_ref_from_config(&config.weight_crs)?;
    let hrus = load_hrus(&config.zonal, vpu, Some(&weight_srs))?;
    let lithology = VectorReader::read_polygons(
        &lithology_path,
        &VectorRequest {
            layer: None,
            id_field: None,
            attributes: &[K_PERM_ATTRIBUTE],
            target_srs: Some(&weight_srs),
        },
    )?;

    let columns = WeightColumns::new(&config.zonal.id_feature, FLUX_ID_COLUMN);
    std::fs::create_dir_all(&config.weight_dir)?;
    let weights = WeightEngine::new(ExecutionMode::Serial).weights_cached(
        &hrus,
        &lithology,
        &columns,
        config.weight_file(vpu),
    )?;

    let k_perm: HashMap<i64, f64> = lithology
        .iter()
        .map(|f| (f.id, f.attribute(K_PERM_ATTRIBUTE).unwrap_or(f64::NAN)))
        .collect();
    let zero_count = k_perm.values().filter(|&&k| k == 0.0).count();
    log::info!("{} lithology polygons have zero k_perm", zero_count);

    let slope = slope_fractions(&slope_path, &config.zonal.id_feature)?;
    let area: HashMap<i64, f64> = hrus.iter().map(|h| (h.id, h.geometry.unsigned_area())).collect();

    let synth = FluxSynthesizer::with_bounds(&config.flux_params)?;
    let mut table = synth.synthesize(&weights, &k_perm, &slope, &area).to_table();
    table.headers[0] = config.zonal.id_feature.clone();

    let output = config.output_file(vpu);
    table.write(&output)?;
    Ok(output)
}

/// Assign national HRU ids across all VPU tables of a source type
pub fn add_nat_hru_id(config: &StitchConfig) -> ParamResult<StitchSummary> {
    let files = stitch::discover(config.input_dir(), &config.source_type)?;
    let summary = stitch::stitch(&files)?;
    summary.merged.write(config.merged_path())?;
    log::info!(
        "Merged {} rows from {} files into {}",
        summary.total_rows,
        summary.files.len(),
        config.merged_path().display()
    );
    Ok(summary)
}
