//! YAML stage configuration.
//!
//! Every stage reads one YAML file. `$VAR` and `${VAR}` references are
//! expanded from the environment before parsing; references to unset
//! variables are left as written. Each stage gets its own typed structure and
//! is validated as soon as it is loaded.

use crate::core::layer::LayerType;
use crate::core::ssflux::FluxBounds;
use crate::types::{ParamError, ParamResult, Vpu};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Expand `$NAME` / `${NAME}` using `lookup`; unresolved references stay verbatim
pub fn expand_vars_with<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let pattern = match Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))") {
        Ok(re) => re,
        Err(_) => return text.to_string(),
    };
    pattern
        .replace_all(text, |caps: &Captures| {
            let name = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            lookup(name).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Expand against the process environment
pub fn expand_env_vars(text: &str) -> String {
    expand_vars_with(text, |name| std::env::var(name).ok())
}

/// Read a config file with environment expansion applied
pub fn read_expanded<P: AsRef<Path>>(path: P) -> ParamResult<String> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ParamError::MissingInput {
            path: path.to_path_buf(),
        });
    }
    let raw = std::fs::read_to_string(path)?;
    Ok(expand_env_vars(&raw))
}

/// Load and validate any stage configuration
pub fn load<T, P>(path: P) -> ParamResult<T>
where
    T: DeserializeOwned + Validate,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    log::info!("Loading configuration: {}", path.display());
    let config: T = serde_yaml::from_str(&read_expanded(path)?)?;
    config.validate()?;
    Ok(config)
}

/// Eager checks run right after deserialisation
pub trait Validate {
    fn validate(&self) -> ParamResult<()>;
}

fn require_path(name: &str, value: &Path) -> ParamResult<()> {
    if value.as_os_str().is_empty() {
        return Err(ParamError::InvalidConfig(format!("'{}' must not be empty", name)));
    }
    Ok(())
}

fn require_text(name: &str, value: &str) -> ParamResult<()> {
    if value.trim().is_empty() {
        return Err(ParamError::InvalidConfig(format!("'{}' must not be empty", name)));
    }
    Ok(())
}

/// One dataset to mosaic for a VPU
#[derive(Debug, Clone, PartialEq)]
pub struct MergeDataset {
    pub name: String,
    pub layer: LayerType,
    pub rpus: Vec<PathBuf>,
    pub output: PathBuf,
}

/// RPU-to-VPU merge configuration.
///
/// Top-level keys are VPU codes mapping dataset names to `{rpus, output}`,
/// plus an optional `base_dir` that relative and absolute-looking paths are
/// joined onto. Without a `base_dir` paths are used as written.
#[derive(Debug, Clone, Default)]
pub struct MergeConfig {
    pub base_dir: PathBuf,
    /// Datasets per VPU code, in file order
    pub vpus: BTreeMap<String, Vec<MergeDataset>>,
}

impl MergeConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> ParamResult<Self> {
        let path = path.as_ref();
        log::info!("Loading merge configuration: {}", path.display());
        Self::from_yaml_str(&read_expanded(path)?)
    }

    pub fn from_yaml_str(text: &str) -> ParamResult<Self> {
        let root: Value = serde_yaml::from_str(text)?;
        let mapping = root
            .as_mapping()
            .ok_or_else(|| ParamError::InvalidConfig("merge config must be a mapping".to_string()))?;

        let mut config = MergeConfig::default();
        for (key, value) in mapping {
            let key = yaml_key(key)?;
            if key == "base_dir" {
                config.base_dir = value
                    .as_str()
                    .map(PathBuf::from)
                    .ok_or_else(|| ParamError::InvalidConfig("'base_dir' must be a string".to_string()))?;
                continue;
            }

            let datasets = value.as_mapping().ok_or_else(|| {
                ParamError::InvalidConfig(format!("VPU '{}' must map dataset names to settings", key))
            })?;

            let mut parsed = Vec::with_capacity(datasets.len());
            for (name, settings) in datasets {
                let name = yaml_key(name)?;
                let entry: DatasetEntry = serde_yaml::from_value(settings.clone())?;
                parsed.push(MergeDataset {
                    layer: name.parse()?,
                    name,
                    rpus: entry.rpus.into_iter().map(PathBuf::from).collect(),
                    output: PathBuf::from(entry.output),
                });
            }
            config.vpus.insert(key, parsed);
        }

        Ok(config)
    }

    /// Datasets configured for a VPU
    pub fn datasets(&self, vpu: &Vpu) -> ParamResult<&[MergeDataset]> {
        self.vpus
            .get(vpu.as_str())
            .map(Vec::as_slice)
            .ok_or_else(|| ParamError::InvalidConfig(format!("VPU {} not found in config", vpu)))
    }

    /// Resolve a configured path under `base_dir`
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if self.base_dir.as_os_str().is_empty() {
            return path.to_path_buf();
        }
        let relative = path.strip_prefix("/").unwrap_or(path);
        self.base_dir.join(relative)
    }
}

#[derive(Debug, Deserialize)]
struct DatasetEntry {
    #[serde(default)]
    rpus: Vec<String>,
    output: String,
}

/// Mapping key as text; numeric keys such as `01` are restored to two digits
fn yaml_key(key: &Value) -> ParamResult<String> {
    match key {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => match n.as_u64() {
            Some(v) => Ok(format!("{:02}", v)),
            None => Ok(n.to_string()),
        },
        other => Err(ParamError::InvalidConfig(format!(
            "unsupported mapping key {:?}",
            other
        ))),
    }
}

/// Slope/aspect derivation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerrainConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Validate for TerrainConfig {
    fn validate(&self) -> ParamResult<()> {
        require_path("input_dir", &self.input_dir)?;
        require_path("output_dir", &self.output_dir)
    }
}

fn default_jobs() -> usize {
    4
}

fn default_id_feature() -> String {
    "hru_id".to_string()
}

fn default_layer() -> String {
    "nhru".to_string()
}

/// Zonal-statistics stage configuration (DEM and soils parameters)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZonalConfig {
    pub base_source_dir: PathBuf,
    pub target_source_dir: PathBuf,
    pub output_dir: PathBuf,
    pub source_type: String,
    #[serde(default)]
    pub categorical: bool,
    #[serde(default = "default_jobs")]
    pub jobs: usize,
    #[serde(default = "default_id_feature")]
    pub id_feature: String,
    #[serde(default = "default_layer")]
    pub layer: String,
}

impl ZonalConfig {
    /// HRU geopackage for a VPU
    pub fn target_gpkg(&self, vpu: &Vpu) -> PathBuf {
        self.target_source_dir.join(format!("NHM_{}_draft.gpkg", vpu))
    }

    /// Output directory of this source type
    pub fn source_output_dir(&self) -> PathBuf {
        self.output_dir.join(&self.source_type)
    }

    /// Per-VPU parameter table
    pub fn param_file(&self, vpu: &Vpu) -> PathBuf {
        self.source_output_dir()
            .join(format!("base_nhm_{}_{}_param.csv", self.source_type, vpu))
    }

    /// Scratch file written by the zonal engine
    pub fn scratch_file(&self, vpu: &Vpu) -> PathBuf {
        self.source_output_dir()
            .join(format!("base_nhm_{}_{}_param_temp.csv", self.source_type, vpu))
    }
}

impl Validate for ZonalConfig {
    fn validate(&self) -> ParamResult<()> {
        require_path("base_source_dir", &self.base_source_dir)?;
        require_path("target_source_dir", &self.target_source_dir)?;
        require_path("output_dir", &self.output_dir)?;
        require_text("source_type", &self.source_type)?;
        require_text("id_feature", &self.id_feature)?;
        if self.jobs == 0 {
            return Err(ParamError::InvalidConfig("'jobs' must be at least 1".to_string()));
        }
        Ok(())
    }
}

fn default_weight_crs() -> String {
    "5070".to_string()
}

fn default_lithology_file() -> PathBuf {
    PathBuf::from("data_layers/soils_litho/Lithology_exp_Konly_Project.shp")
}

/// Subsurface-flux parameter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SsfluxConfig {
    #[serde(flatten)]
    pub zonal: ZonalConfig,
    pub weight_dir: PathBuf,
    #[serde(default = "default_weight_crs")]
    pub weight_crs: String,
    /// Lithology polygons, relative to `base_source_dir`
    #[serde(default = "default_lithology_file")]
    pub lithology_file: PathBuf,
    /// Calibration bounds keyed by parameter name; missing names use defaults
    #[serde(default)]
    pub flux_params: BTreeMap<String, FluxBounds>,
}

impl SsfluxConfig {
    pub fn weight_file(&self, vpu: &Vpu) -> PathBuf {
        self.weight_dir.join(format!("lith_weights_vpu_{}.csv", vpu))
    }

    pub fn lithology_path(&self) -> PathBuf {
        self.zonal.base_source_dir.join(&self.lithology_file)
    }

    /// Slope parameters written by the DEM stage
    pub fn slope_file(&self, vpu: &Vpu) -> PathBuf {
        self.zonal
            .output_dir
            .join("slope")
            .join(format!("base_nhm_slope_{}_param.csv", vpu))
    }

    pub fn output_file(&self, vpu: &Vpu) -> PathBuf {
        self.zonal
            .output_dir
            .join("ssflux")
            .join(format!("base_nhm_{}_{}_param.csv", self.zonal.source_type, vpu))
    }
}

impl Validate for SsfluxConfig {
    fn validate(&self) -> ParamResult<()> {
        self.zonal.validate()?;
        require_path("weight_dir", &self.weight_dir)?;
        require_text("weight_crs", &self.weight_crs)?;
        for (name, bounds) in &self.flux_params {
            if !crate::core::ssflux::FLUX_PARAMS.contains(&name.as_str()) {
                return Err(ParamError::InvalidConfig(format!("unknown flux parameter '{}'", name)));
            }
            if !(bounds.min <= bounds.max) {
                return Err(ParamError::InvalidConfig(format!(
                    "flux parameter '{}' has min {} above max {}",
                    name, bounds.min, bounds.max
                )));
            }
        }
        Ok(())
    }
}

/// National id stitching configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StitchConfig {
    pub output_dir: PathBuf,
    pub source_type: String,
    pub merged_file: PathBuf,
}

impl StitchConfig {
    pub fn input_dir(&self) -> PathBuf {
        self.output_dir.join(&self.source_type)
    }

    pub fn merged_path(&self) -> PathBuf {
        self.output_dir.join(&self.merged_file)
    }
}

impl Validate for StitchConfig {
    fn validate(&self) -> ParamResult<()> {
        require_path("output_dir", &self.output_dir)?;
        require_text("source_type", &self.source_type)?;
        require_path("merged_file", &self.merged_file)
    }
}
