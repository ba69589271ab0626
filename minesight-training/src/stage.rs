//! The training loop shared by every stage, and the stage sequence driver.

use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rand::seq::SliceRandom;
use rand::Rng;

use crate::checkpoint::{BestTracker, Checkpoint};
use crate::config::{StageConfig, TrainingConfig};
use crate::dataset::{split_files, PatchDataset, TrainingData};
use crate::metrics::{batch_iou, mean_score};
use crate::model::SegmentationModel;
use crate::schedule::OneCycle;

/// Result of one stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub name: String,
    pub best_iou: f64,
    pub checkpoint: Option<PathBuf>,
    /// `(epoch, mean training loss, validation IoU if evaluated)`, epochs 1-based
    pub history: Vec<(usize, f32, Option<f64>)>,
}

/// Validation runs every `every` epochs and on the final one (0-based `epoch`).
pub fn should_validate(epoch: usize, epochs: usize, every: usize) -> bool {
    (every > 0 && (epoch + 1) % every == 0) || epoch + 1 == epochs
}

/// Mean per-batch IoU over the whole dataset, no augmentation.
pub fn evaluate<M: SegmentationModel, R: Rng>(
    model: &M,
    dataset: &PatchDataset,
    batch_size: usize,
    threshold: f32,
    rng: &mut R,
) -> Result<f64> {
    let order: Vec<usize> = (0..dataset.len()).collect();
    let mut scores = Vec::new();
    for chunk in order.chunks(batch_size) {
        let batch = dataset.batch(chunk, rng)?;
        let probs = model.predict(&batch)?;
        let masks: Vec<_> = batch.into_iter().map(|s| s.mask).collect();
        scores.push(batch_iou(&probs, &masks, threshold));
    }
    Ok(mean_score(&scores))
}

/// Train `model` for one stage: fresh 85/15 split, one-cycle schedule,
/// periodic validation, checkpoint on strict IoU improvement. Always runs the
/// full epoch count.
pub fn run_stage<M: SegmentationModel, R: Rng>(
    model: &mut M,
    data: &TrainingData,
    cfg: &TrainingConfig,
    stage: &StageConfig,
    rng: &mut R,
) -> Result<StageOutcome> {
    cfg.validate()?;
    stage.validate()?;
    info!("==== TRAINING: {} ====", stage.name.to_uppercase());
    let (train_files, val_files) = split_files(&data.files, cfg.train_fraction, rng);
    let train = PatchDataset::new(train_files, &data.stats, cfg.augment);
    let val = PatchDataset::new(val_files, &data.stats, false);
    info!(
        "stage={}, train={} val={} batch={} epochs={} lr={}",
        stage.name,
        train.len(),
        val.len(),
        stage.batch_size,
        stage.epochs,
        stage.learning_rate
    );
    if val.is_empty() {
        warn!("stage={} has an empty validation split, IoU will read 0", stage.name);
    }

    model.reset_optimizer();
    let steps_per_epoch = train.len().div_ceil(stage.batch_size);
    let schedule = OneCycle::new(stage.learning_rate, stage.epochs * steps_per_epoch);
    let mut tracker = BestTracker::new(&cfg.model_dir, &stage.name);
    let mut history = Vec::with_capacity(stage.epochs);
    let mut step = 0;

    for epoch in 0..stage.epochs {
        let mut order: Vec<usize> = (0..train.len()).collect();
        order.shuffle(rng);

        let pb = ProgressBar::new(steps_per_epoch as u64);
        pb.set_style(
            ProgressStyle::with_template("{msg} [{elapsed_precise}] {bar:30.cyan/blue} {pos}/{len}")
                .context("progress bar template")?
                .progress_chars("##-"),
        );
        pb.set_message(format!("{} E{}/{}", stage.name, epoch + 1, stage.epochs));

        let mut loss_sum = 0.0f32;
        for chunk in order.chunks(stage.batch_size) {
            let batch = train.batch(chunk, rng)?;
            loss_sum += model.train_step(&batch, schedule.lr_at(step))?;
            step += 1;
            pb.inc(1);
        }
        pb.finish_and_clear();
        let mean_loss = if steps_per_epoch == 0 {
            0.0
        } else {
            loss_sum / steps_per_epoch as f32
        };

        let mut iou = None;
        if should_validate(epoch, stage.epochs, cfg.eval_every) {
            let score = evaluate(&*model, &val, stage.batch_size, cfg.threshold, rng)?;
            info!(
                "Epoch {}: Loss={:.4}, IoU={:.4}",
                epoch + 1,
                mean_loss,
                score
            );
            tracker.observe(score, &*model)?;
            iou = Some(score);
        }
        history.push((epoch + 1, mean_loss, iou));
    }

    Ok(StageOutcome {
        name: stage.name.clone(),
        best_iou: tracker.best(),
        checkpoint: tracker.checkpoint().map(|p| p.to_path_buf()),
        history,
    })
}

/// Run every configured stage in order. Each later stage starts from the
/// previous stage's best checkpoint when one was written.
pub fn run_stages<M: SegmentationModel, R: Rng>(
    model: &mut M,
    data: &TrainingData,
    cfg: &TrainingConfig,
    rng: &mut R,
) -> Result<Vec<StageOutcome>> {
    cfg.validate()?;
    let mut outcomes: Vec<StageOutcome> = Vec::with_capacity(cfg.stages.len());

    for stage in &cfg.stages {
        if let Some(prev) = outcomes.last() {
            match &prev.checkpoint {
                Some(path) => {
                    let ckpt = Checkpoint::load(path)?;
                    let weights = ckpt.weights_path(path);
                    model.load_weights(&weights)?;
                    info!(
                        "stage={} resumes from {:?} (IoU={:.4})",
                        stage.name, weights, ckpt.iou
                    );
                }
                None => warn!(
                    "stage={} found no checkpoint from {}, continuing with current weights",
                    stage.name, prev.name
                ),
            }
        }
        outcomes.push(run_stage(model, data, cfg, stage, rng)?);
    }

    let summary: Vec<String> = outcomes
        .iter()
        .map(|o| format!("{} IoU={:.4}", o.name, o.best_iou))
        .collect();
    info!("Training complete | {}", summary.join(" | "));
    Ok(outcomes)
}
