//! The model boundary used by the stage runner.

use std::path::Path;

use anyhow::Result;
use ndarray::Array2;

use crate::dataset::Sample;

/// A binary segmentation model: logits per pixel, one optimizer step per batch.
pub trait SegmentationModel {
    /// `(rows, cols)` logits for every sample of `batch`, in order.
    fn logits(&self, batch: &[Sample]) -> Result<Vec<Array2<f32>>>;

    /// One step on `batch` at learning rate `lr`; returns the mean loss.
    fn train_step(&mut self, batch: &[Sample], lr: f64) -> Result<f32>;

    /// Forget optimizer moments; called when a new stage starts.
    fn reset_optimizer(&mut self);

    /// Write the current weights to `path`.
    fn save_weights(&self, path: &Path) -> Result<()>;

    /// Replace the current weights with the ones stored at `path`.
    fn load_weights(&mut self, path: &Path) -> Result<()>;

    /// Per-pixel probabilities.
    fn predict(&self, batch: &[Sample]) -> Result<Vec<Array2<f32>>> {
        Ok(self
            .logits(batch)?
            .into_iter()
            .map(|z| z.mapv(sigmoid))
            .collect())
    }
}

pub fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}
