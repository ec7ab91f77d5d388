use anyhow::{Context, Result};
use clap::Parser;
use gfv2_params::io::config::{self, StitchConfig};
use gfv2_params::pipeline;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "add_nat_hru_id",
    about = "Add nat_hru_id and vpu columns to per-VPU parameter files and merge them"
)]
struct Args {
    /// Path to the stage configuration YAML
    #[arg(long)]
    config: PathBuf,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let config = config::load::<StitchConfig, _>(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let summary = pipeline::add_nat_hru_id(&config)?;
    for file in &summary.files {
        log::info!("Updated file saved: {}", file.path.display());
    }
    log::info!("Merged file saved to: {}", config.merged_path().display());
    Ok(())
}
