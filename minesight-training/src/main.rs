use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use log::info;

use minesight_preprocessing::seeded_rng;
use minesight_training::{
    run_stages, BurnSegmenter, SegNetConfig, StageConfig, TrainingConfig, TrainingData,
};

#[derive(Parser, Debug)]
#[command(name = "minesight-train", version = "0.1.0")]
struct Args {
    /// Directory produced by minesight-preprocess
    #[arg(long, default_value = "./MineSight_Dataset")]
    dataset_dir: PathBuf,

    /// Checkpoint directory (defaults to <dataset_dir>/models)
    #[arg(long)]
    model_dir: Option<PathBuf>,

    #[arg(long, default_value = "16")]
    feature_bands: usize,

    #[arg(long, default_value = "20")]
    stage1_batch: usize,

    #[arg(long, default_value = "15")]
    stage1_epochs: usize,

    #[arg(long, default_value = "0.003")]
    stage1_lr: f64,

    #[arg(long, default_value = "10")]
    stage2_batch: usize,

    #[arg(long, default_value = "25")]
    stage2_epochs: usize,

    #[arg(long, default_value = "0.0001")]
    stage2_lr: f64,

    /// Share of patches used for training, the rest validates
    #[arg(long, default_value = "0.85")]
    train_fraction: f64,

    /// Validate every n epochs
    #[arg(long, default_value = "3")]
    eval_every: usize,

    #[arg(long, default_value = "0.5")]
    threshold: f32,

    #[arg(long, default_value = "0.0001")]
    weight_decay: f64,

    /// Channels of the network's full-resolution layers
    #[arg(long, default_value = "16")]
    base_channels: usize,

    /// Disable flips, rotations and brightness jitter
    #[arg(long)]
    no_augment: bool,

    #[arg(long)]
    seed: Option<u64>,
}

impl From<&Args> for TrainingConfig {
    fn from(args: &Args) -> Self {
        let model_dir = args
            .model_dir
            .clone()
            .unwrap_or_else(|| args.dataset_dir.join("models"));
        TrainingConfig {
            dataset_dir: args.dataset_dir.clone(),
            model_dir,
            feature_bands: args.feature_bands,
            train_fraction: args.train_fraction,
            eval_every: args.eval_every,
            threshold: args.threshold,
            weight_decay: args.weight_decay,
            augment: !args.no_augment,
            stages: vec![
                StageConfig::new("stage1", args.stage1_batch, args.stage1_epochs, args.stage1_lr),
                StageConfig::new("stage2", args.stage2_batch, args.stage2_epochs, args.stage2_lr),
            ],
            seed: args.seed,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();
    info!("=== minesight-train start ===");

    let args = Args::parse();
    info!("Parsed command-line args: {:?}", args);

    let cfg = TrainingConfig::from(&args);
    cfg.validate()?;
    let data = TrainingData::load(&cfg.dataset_dir, cfg.feature_bands)?;

    let mut rng = seeded_rng(cfg.seed, 0);
    let net = SegNetConfig::new(cfg.feature_bands).with_base_channels(args.base_channels);
    let mut model = BurnSegmenter::new(&net, cfg.weight_decay);
    let outcomes = run_stages(&mut model, &data, &cfg, &mut rng)?;

    for o in &outcomes {
        info!(
            "stage={}, best IoU={:.4}, checkpoint={:?}",
            o.name, o.best_iou, o.checkpoint
        );
    }
    info!("=== Done. Models saved in {:?} ===", cfg.model_dir);
    Ok(())
}
