use anyhow::{Context, Result};
use clap::Parser;
use gfv2_params::io::config::{self, ZonalConfig};
use gfv2_params::pipeline;
use gfv2_params::Vpu;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "soils_params", about = "Soil texture and soil moisture capacity parameters per HRU")]
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

    let config = config::load::<ZonalConfig, _>(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let vpu = args.vpu;
    log::info!("Running soils_params for VPU {}", vpu);

    let output = pipeline::soils_params(&config, &vpu)?;
    log::info!("Wrote {}", output.display());
    Ok(())
}
