use anyhow::{Context, Result};
use clap::Parser;
use gfv2_params::core::MosaicOutcome;
use gfv2_params::io::config::MergeConfig;
use gfv2_params::pipeline;
use gfv2_params::Vpu;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "merge_rpu_by_vpu", about = "Merge NHDPlus RPU rasters into one raster per VPU and dataset")]
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

    let config = MergeConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let vpu = args.vpu;
    log::info!("Running merge_rpu_by_vpu for VPU {}", vpu);

    for outcome in pipeline::merge_rpus(&config, &vpu)? {
        match outcome {
            MosaicOutcome::Written(path) => log::info!("Wrote {}", path.display()),
            MosaicOutcome::Skipped(path) => log::info!("Kept existing {}", path.display()),
        }
    }
    Ok(())
}
