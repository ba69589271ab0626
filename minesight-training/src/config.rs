use std::path::PathBuf;

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Hyperparameters of one training stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    pub name: String,
    pub batch_size: usize,
    pub epochs: usize,
    pub learning_rate: f64,
}

impl StageConfig {
    pub fn new(name: &str, batch_size: usize, epochs: usize, learning_rate: f64) -> Self {
        Self {
            name: name.to_string(),
            batch_size,
            epochs,
            learning_rate,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            bail!("stage {} has batch_size 0", self.name);
        }
        if !(self.learning_rate > 0.0) {
            bail!("stage {} needs a positive learning rate", self.name);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Directory written by the preprocessing step
    pub dataset_dir: PathBuf,
    /// Where `<stage>_best.json` and `<stage>_best.bin` checkpoints go
    pub model_dir: PathBuf,
    pub feature_bands: usize,
    /// Share of the shuffled file list used for training; the rest validates
    pub train_fraction: f64,
    /// Validate every n-th epoch (and always on the last one)
    pub eval_every: usize,
    /// Probability above which a pixel counts as coal
    pub threshold: f32,
    pub weight_decay: f64,
    /// Random flips/rotations/brightness on the training split
    pub augment: bool,
    /// Consumed in order; each stage resumes from the previous best checkpoint
    pub stages: Vec<StageConfig>,
    pub seed: Option<u64>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("./MineSight_Dataset"),
            model_dir: PathBuf::from("./MineSight_Dataset/models"),
            feature_bands: 16,
            train_fraction: 0.85,
            eval_every: 3,
            threshold: 0.5,
            weight_decay: 1e-4,
            augment: true,
            stages: vec![
                StageConfig::new("stage1", 20, 15, 3e-3),
                StageConfig::new("stage2", 10, 25, 1e-4),
            ],
            seed: None,
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.feature_bands == 0 {
            bail!("feature_bands must be positive");
        }
        if !(0.0..=1.0).contains(&self.train_fraction) {
            bail!("train_fraction={} must lie in [0, 1]", self.train_fraction);
        }
        if self.eval_every == 0 {
            bail!("eval_every must be positive");
        }
        for stage in &self.stages {
            stage.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_two_stages() {
        let cfg = TrainingConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.stages.len(), 2);
        assert_eq!(cfg.stages[0], StageConfig::new("stage1", 20, 15, 3e-3));
        assert_eq!(cfg.stages[1].epochs, 25);
    }

    #[test]
    fn rejects_zero_batch() {
        let cfg = TrainingConfig {
            stages: vec![StageConfig::new("s", 0, 1, 0.1)],
            ..TrainingConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn stage_needs_positive_learning_rate() {
        assert!(StageConfig::new("s", 4, 1, 0.0).validate().is_err());
        assert!(StageConfig::new("s", 4, 1, f64::NAN).validate().is_err());
        StageConfig::new("s", 4, 1, 1e-3).validate().unwrap();
    }
}
