use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

use crate::model::SegmentationModel;

/// `<stage>_best.json`: the validation IoU of a stage's best weights and the
/// recorder file, next to it, that holds them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub weights: String,
    pub iou: f64,
}

impl Checkpoint {
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating checkpoint dir {:?}", parent))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing checkpoint {:?}", path))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).with_context(|| format!("reading checkpoint {:?}", path))?;
        let ckpt = serde_json::from_str(&text)
            .with_context(|| format!("parsing checkpoint {:?}", path))?;
        Ok(ckpt)
    }

    /// Weights file of the checkpoint stored at `path`.
    pub fn weights_path(&self, path: &Path) -> PathBuf {
        path.with_file_name(&self.weights)
    }
}

pub fn checkpoint_path(model_dir: &Path, stage: &str) -> PathBuf {
    model_dir.join(format!("{}_best.json", stage))
}

pub fn weights_path(model_dir: &Path, stage: &str) -> PathBuf {
    model_dir.join(format!("{}_best.bin", stage))
}

/// Best-so-far score of one stage. Starts at 0; only a strictly higher score
/// replaces it.
#[derive(Debug, Clone)]
pub struct BestTracker {
    path: PathBuf,
    weights: PathBuf,
    best: f64,
    saved: bool,
}

impl BestTracker {
    pub fn new(model_dir: &Path, stage: &str) -> Self {
        Self {
            path: checkpoint_path(model_dir, stage),
            weights: weights_path(model_dir, stage),
            best: 0.0,
            saved: false,
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }

    /// Path of the stored checkpoint, if any score ever improved.
    pub fn checkpoint(&self) -> Option<&Path> {
        self.saved.then_some(self.path.as_path())
    }

    /// Persist `model` when `score` beats the best so far. Returns whether it did.
    pub fn observe<M: SegmentationModel>(&mut self, score: f64, model: &M) -> Result<bool> {
        if score <= self.best {
            return Ok(false);
        }
        if let Some(parent) = self.weights.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating checkpoint dir {:?}", parent))?;
        }
        model.save_weights(&self.weights)?;
        let weights = self
            .weights
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Checkpoint { weights, iou: score }.save(&self.path)?;
        info!("New best model (IoU={:.4}) => {:?}", score, self.weights);
        self.best = score;
        self.saved = true;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::tests::ScriptedModel;

    #[test]
    fn only_strict_improvements_are_saved() {
        let dir = tempfile::tempdir().unwrap();
        let model_dir = dir.path().join("models");
        let path = checkpoint_path(&model_dir, "stage1");
        let mut tracker = BestTracker::new(&model_dir, "stage1");
        let mut model = ScriptedModel::default();

        assert!(!tracker.observe(0.0, &model).unwrap());
        assert!(tracker.checkpoint().is_none());
        assert!(!path.exists());

        model.steps = 1;
        assert!(tracker.observe(0.5, &model).unwrap());
        model.steps = 2;
        assert!(!tracker.observe(0.5, &model).unwrap());
        model.steps = 3;
        assert!(!tracker.observe(0.4, &model).unwrap());
        let ckpt = Checkpoint::load(&path).unwrap();
        assert_eq!(ckpt.weights, "stage1_best.bin");
        assert_eq!(ckpt.iou, 0.5);
        let weights = ckpt.weights_path(&path);
        assert_eq!(weights, weights_path(&model_dir, "stage1"));
        assert_eq!(fs::read_to_string(&weights).unwrap(), "1");

        model.steps = 4;
        assert!(tracker.observe(0.75, &model).unwrap());
        assert_eq!(tracker.best(), 0.75);
        assert_eq!(tracker.checkpoint(), Some(path.as_path()));
        assert_eq!(fs::read_to_string(&weights).unwrap(), "4");
    }

    #[test]
    fn checkpoint_names_follow_stage() {
        let p = checkpoint_path(Path::new("/tmp/models"), "stage2");
        assert_eq!(p, PathBuf::from("/tmp/models/stage2_best.json"));
        let w = weights_path(Path::new("/tmp/models"), "stage2");
        assert_eq!(w, PathBuf::from("/tmp/models/stage2_best.bin"));
    }
}
