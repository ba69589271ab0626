use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use minesight_preprocessing::{run, PipelineConfig};

#[derive(Parser, Debug)]
#[command(name = "minesight-preprocess", version = "0.1.0")]
struct Args {
    /// Directory containing the raw multi-band GeoTIFFs
    #[arg(long, default_value = "./Minesight_5k")]
    input_dir: PathBuf,

    /// Output directory for patch files, metadata and band statistics
    #[arg(long, default_value = "./MineSight_Dataset")]
    output_dir: PathBuf,

    /// Raster file extension to pick up
    #[arg(long, default_value = "tif")]
    extension: String,

    /// Patch side length in pixels
    #[arg(long, default_value = "320")]
    patch_size: usize,

    /// Step between window origins (160 => 50% overlap at patch_size=320)
    #[arg(long, default_value = "160")]
    stride: usize,

    /// Number of leading feature bands
    #[arg(long, default_value = "16")]
    feature_bands: usize,

    /// 1-based index of the coal mask band
    #[arg(long, default_value = "17")]
    mask_band: usize,

    /// Minimum positive mask pixels for a coal patch
    #[arg(long, default_value = "50")]
    min_coal_pixels: usize,

    /// Probability of keeping a non-coal window
    #[arg(long, default_value = "0.12")]
    noncoal_sample_rate: f64,

    #[arg(long, default_value = "2500")]
    max_coal_patches: usize,

    #[arg(long, default_value = "2500")]
    max_noncoal_patches: usize,

    /// Target dataset size, reported only
    #[arg(long, default_value = "5000")]
    total_target_patches: usize,

    /// Parallel extraction workers
    #[arg(long, default_value = "8")]
    workers: usize,

    /// Patches sampled for band statistics
    #[arg(long, default_value = "500")]
    stats_sample: usize,

    /// Keep input_dir; by default it is deleted once the dataset is written
    #[arg(long)]
    keep_raw: bool,

    /// Seed for reproducible sampling
    #[arg(long)]
    seed: Option<u64>,
}

impl From<Args> for PipelineConfig {
    fn from(args: Args) -> Self {
        PipelineConfig {
            input_dir: args.input_dir,
            output_dir: args.output_dir,
            extension: args.extension,
            patch_size: args.patch_size,
            stride: args.stride,
            feature_bands: args.feature_bands,
            mask_band: args.mask_band,
            min_coal_pixels: args.min_coal_pixels,
            noncoal_sample_rate: args.noncoal_sample_rate,
            max_coal_patches: args.max_coal_patches,
            max_noncoal_patches: args.max_noncoal_patches,
            total_target_patches: args.total_target_patches,
            workers: args.workers,
            stats_sample: args.stats_sample,
            delete_raw: !args.keep_raw,
            seed: args.seed,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();
    info!("=== minesight-preprocess start ===");

    let args = Args::parse();
    info!("Parsed command-line args: {:?}", args);

    let cfg = PipelineConfig::from(args);
    let summary = run(&cfg)?;

    info!(
        "=== Done. {} patches ({} coal, {} non-coal) in {:?} ===",
        summary.patches_written, summary.coal_kept, summary.noncoal_kept, cfg.output_dir
    );
    Ok(())
}
