use anyhow::{Context, Result};
use clap::Parser;
use gfv2_params::io::config::{self, TerrainConfig};
use gfv2_params::pipeline;
use gfv2_params::Vpu;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "slope_aspect", about = "Derive slope and aspect rasters from a VPU's merged DEM")]
struct Args {
    /// Path to the stage configuration YAML
    #[arg(long)]
    config: PathBuf,

    /// VPU code, e.g. 01, 03N, 10U
    #[arg(long)]
    vpu: Vpu,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = config::load::<TerrainConfig, _>(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let vpu = args.vpu;
    log::info!("Running slope_aspect for VPU {}", vpu);

    let outputs = pipeline::slope_aspect(&config, &vpu)?;
    log::info!("Slope: {}", outputs.slope.display());
    log::info!("Aspect: {}", outputs.aspect.display());
    Ok(())
}
