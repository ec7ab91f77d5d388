use anyhow::{Context, Result};
use clap::Parser;
use gfv2_params::io::config::{self, SsfluxConfig};
use gfv2_params::pipeline;
use gfv2_params::Vpu;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ssflux_params", about = "Subsurface flux parameters per HRU from lithology permeability and slope")]
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

    let config = config::load::<SsfluxConfig, _>(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let vpu = args.vpu;
    log::info!("Running ssflux_params for VPU {}", vpu);

    let output = pipeline::ssflux_params(&config, &vpu)?;
    log::info!("Wrote {}", output.display());
    Ok(())
}
