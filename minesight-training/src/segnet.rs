//! Convolutional encoder/decoder for per-pixel coal segmentation, trained with
//! burn on the CPU ndarray backend.
//!
//! Shapes:
//! - Input features: `[B, bands, H, W]`, `H` and `W` even
//! - Logits: `[B, 1, H, W]`

use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use burn::backend::{Autodiff, NdArray};
use burn::config::Config;
use burn::module::{AutodiffModule, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::loss::{BinaryCrossEntropyLoss, BinaryCrossEntropyLossConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{PaddingConfig2d, Relu};
use burn::optim::{AdamWConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{Tensor, TensorData};
use log::debug;
use ndarray::Array2;

use crate::dataset::Sample;
use crate::model::SegmentationModel;

pub type TrainBackend = Autodiff<NdArray<f32>>;
type InferBackend = <TrainBackend as AutodiffBackend>::InnerBackend;
type Device = <TrainBackend as Backend>::Device;

#[derive(Config, Debug)]
pub struct SegNetConfig {
    /// Feature bands per pixel
    pub in_channels: usize,
    /// Channels of the full-resolution stage; the bottleneck has twice as many
    #[config(default = 16)]
    pub base_channels: usize,
}

impl SegNetConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> SegNet<B> {
        let c = self.base_channels;
        let conv3 = |channels: [usize; 2]| {
            Conv2dConfig::new(channels, [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .init(device)
        };
        SegNet {
            enc1: conv3([self.in_channels, c]),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            enc2: conv3([c, 2 * c]),
            up: ConvTranspose2dConfig::new([2 * c, c], [2, 2])
                .with_stride([2, 2])
                .init(device),
            dec: conv3([2 * c, c]),
            head: Conv2dConfig::new([c, 1], [1, 1])
                .with_padding(PaddingConfig2d::Valid)
                .init(device),
            activation: Relu::new(),
        }
    }
}

/// One down/up level with a skip connection:
/// - conv 3x3 + ReLU at full resolution
/// - 2x2 max pool, conv 3x3 + ReLU at half resolution
/// - 2x2 transposed conv back up, concatenated with the skip
/// - conv 3x3 + ReLU, then a 1x1 head to one logit per pixel
#[derive(Module, Debug)]
pub struct SegNet<B: Backend> {
    enc1: Conv2d<B>,
    pool: MaxPool2d,
    enc2: Conv2d<B>,
    up: ConvTranspose2d<B>,
    dec: Conv2d<B>,
    head: Conv2d<B>,
    activation: Relu,
}

impl<B: Backend> SegNet<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let skip = self.activation.forward(self.enc1.forward(input));
        let x = self.pool.forward(skip.clone());
        let x = self.activation.forward(self.enc2.forward(x));
        let x = self.activation.forward(self.up.forward(x));
        let x = Tensor::cat(vec![skip, x], 1);
        let x = self.activation.forward(self.dec.forward(x));
        self.head.forward(x)
    }
}

/// Optimizer bound to `SegNet` on the training backend.
trait NetOptimizer: Send {
    fn step(&mut self, lr: f64, model: SegNet<TrainBackend>, grads: GradientsParams)
        -> SegNet<TrainBackend>;
}

impl<O: Optimizer<SegNet<TrainBackend>, TrainBackend>> NetOptimizer for O {
    fn step(
        &mut self,
        lr: f64,
        model: SegNet<TrainBackend>,
        grads: GradientsParams,
    ) -> SegNet<TrainBackend> {
        Optimizer::step(self, lr, model, grads)
    }
}

fn adamw(config: &AdamWConfig) -> Box<dyn NetOptimizer> {
    fn boxed<O: Optimizer<SegNet<TrainBackend>, TrainBackend> + 'static>(
        optim: O,
    ) -> Box<dyn NetOptimizer> {
        Box::new(optim)
    }
    boxed(config.init())
}

/// `SegNet` with its AdamW state and BCE-with-logits loss.
pub struct BurnSegmenter {
    model: SegNet<TrainBackend>,
    optim: Box<dyn NetOptimizer>,
    optim_config: AdamWConfig,
    loss: BinaryCrossEntropyLoss<TrainBackend>,
    device: Device,
    bands: usize,
}

impl BurnSegmenter {
    pub fn new(net: &SegNetConfig, weight_decay: f64) -> Self {
        let device = Device::default();
        let optim_config = AdamWConfig::new().with_weight_decay(weight_decay as f32);
        debug!(
            "SegNet: bands={}, base_channels={}, weight_decay={}",
            net.in_channels, net.base_channels, weight_decay
        );
        Self {
            model: net.init(&device),
            optim: adamw(&optim_config),
            optim_config,
            loss: BinaryCrossEntropyLossConfig::new()
                .with_logits(true)
                .init(&device),
            device,
            bands: net.in_channels,
        }
    }

    pub fn bands(&self) -> usize {
        self.bands
    }

    /// `(rows, cols)` shared by the batch; every sample must match the model's
    /// band count, and the pooling level needs even sizes.
    fn batch_grid(&self, batch: &[Sample]) -> Result<(usize, usize)> {
        let Some(first) = batch.first() else {
            bail!("empty batch");
        };
        let (_, rows, cols) = first.features.dim();
        if rows == 0 || cols == 0 || rows % 2 != 0 || cols % 2 != 0 {
            bail!("patch size {}x{} must be even and nonzero", rows, cols);
        }
        for sample in batch {
            if sample.features.dim() != (self.bands, rows, cols) {
                bail!(
                    "sample features {:?} do not match ({}, {}, {})",
                    sample.features.dim(),
                    self.bands,
                    rows,
                    cols
                );
            }
            if sample.mask.dim() != (rows, cols) {
                bail!("sample mask {:?} does not match {}x{}", sample.mask.dim(), rows, cols);
            }
        }
        Ok((rows, cols))
    }
}

/// `[B, bands, rows, cols]` input tensor, samples in batch order.
fn stack_features<B: Backend>(
    batch: &[Sample],
    bands: usize,
    (rows, cols): (usize, usize),
    device: &B::Device,
) -> Tensor<B, 4> {
    let mut values = Vec::with_capacity(batch.len() * bands * rows * cols);
    for sample in batch {
        values.extend(sample.features.iter().copied());
    }
    Tensor::from_data(TensorData::new(values, [batch.len(), bands, rows, cols]), device)
}

impl SegmentationModel for BurnSegmenter {
    fn logits(&self, batch: &[Sample]) -> Result<Vec<Array2<f32>>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let (rows, cols) = self.batch_grid(batch)?;
        let input = stack_features::<InferBackend>(batch, self.bands, (rows, cols), &self.device);
        let output = self.model.valid().forward(input);
        let values = output
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("reading logits: {:?}", e))?;
        values
            .chunks(rows * cols)
            .map(|chunk| Array2::from_shape_vec((rows, cols), chunk.to_vec()).context("logit plane"))
            .collect()
    }

    fn train_step(&mut self, batch: &[Sample], lr: f64) -> Result<f32> {
        if batch.is_empty() {
            return Ok(0.0);
        }
        let (rows, cols) = self.batch_grid(batch)?;
        let n = batch.len();
        let input = stack_features::<TrainBackend>(batch, self.bands, (rows, cols), &self.device);

        let mut targets = Vec::with_capacity(n * rows * cols);
        for sample in batch {
            targets.extend(sample.mask.iter().copied());
        }
        let targets =
            Tensor::<TrainBackend, 2>::from_data(TensorData::new(targets, [n, rows * cols]), &self.device)
                .int();

        let logits = self.model.forward(input).reshape([n, rows * cols]);
        let loss = self.loss.forward(logits, targets);
        let value = loss
            .clone()
            .detach()
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| anyhow!("reading loss: {:?}", e))?
            .first()
            .copied()
            .unwrap_or(0.0);

        let grads = GradientsParams::from_grads(loss.backward(), &self.model);
        self.model = self.optim.step(lr, self.model.clone(), grads);
        Ok(value)
    }

    fn reset_optimizer(&mut self) {
        self.optim = adamw(&self.optim_config);
    }

    fn save_weights(&self, path: &Path) -> Result<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model
            .clone()
            .save_file(path.to_path_buf(), &recorder)
            .map_err(|e| anyhow!("saving weights {:?}: {}", path, e))
    }

    fn load_weights(&mut self, path: &Path) -> Result<()> {
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        self.model = self
            .model
            .clone()
            .load_file(path.to_path_buf(), &recorder, &self.device)
            .map_err(|e| anyhow!("loading weights {:?}: {}", path, e))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    /// Band 0 is +1 on the left half (coal) and -1 on the right; band 1 is flat.
    fn separable_sample(size: usize) -> Sample {
        let half = size / 2;
        let features = Array3::from_shape_fn((2, size, size), |(b, _, x)| match b {
            0 => {
                if x < half {
                    1.0
                } else {
                    -1.0
                }
            }
            _ => 0.3,
        });
        let mask = Array2::from_shape_fn((size, size), |(_, x)| if x < half { 1.0 } else { 0.0 });
        Sample { features, mask }
    }

    fn small_net() -> SegNetConfig {
        SegNetConfig::new(2).with_base_channels(4)
    }

    #[test]
    fn forward_keeps_spatial_size() {
        let device = Device::default();
        let net = small_net().init::<InferBackend>(&device);
        let input = Tensor::<InferBackend, 4>::zeros([3, 2, 8, 8], &device);
        assert_eq!(net.forward(input).dims(), [3, 1, 8, 8]);
    }

    #[test]
    fn logits_match_batch_layout() {
        let model = BurnSegmenter::new(&small_net(), 1e-4);
        let batch = vec![separable_sample(8), separable_sample(8)];
        let logits = model.logits(&batch).unwrap();
        assert_eq!(logits.len(), 2);
        assert_eq!(logits[0].dim(), (8, 8));
        assert!(logits.iter().all(|z| z.iter().all(|v| v.is_finite())));
        assert!(model.logits(&[]).unwrap().is_empty());
    }

    #[test]
    fn training_reduces_loss_on_separable_data() {
        let mut model = BurnSegmenter::new(&small_net(), 1e-4);
        let batch = vec![separable_sample(8), separable_sample(8)];
        let first = model.train_step(&batch, 1e-2).unwrap();
        let mut last = first;
        for _ in 0..150 {
            last = model.train_step(&batch, 1e-2).unwrap();
        }
        assert!(last < first * 0.5, "first={} last={}", first, last);

        let probs = model.predict(&batch[..1]).unwrap();
        let correct = probs[0]
            .iter()
            .zip(batch[0].mask.iter())
            .filter(|(p, m)| (**p > 0.5) == (**m > 0.5))
            .count();
        assert!(correct >= 56, "correct={}", correct);
    }

    #[test]
    fn weights_reload_from_recorder_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stage1_best.bin");
        let batch = vec![separable_sample(8)];

        let mut trained = BurnSegmenter::new(&small_net(), 1e-4);
        for _ in 0..5 {
            trained.train_step(&batch, 1e-2).unwrap();
        }
        trained.save_weights(&path).unwrap();
        assert!(path.exists());

        let mut restored = BurnSegmenter::new(&small_net(), 1e-4);
        restored.load_weights(&path).unwrap();
        let a = trained.logits(&batch).unwrap();
        let b = restored.logits(&batch).unwrap();
        for (x, y) in a[0].iter().zip(b[0].iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn rejects_odd_sizes_and_band_mismatch() {
        let mut model = BurnSegmenter::new(&small_net(), 1e-4);
        let odd = Sample {
            features: Array3::zeros((2, 7, 7)),
            mask: Array2::zeros((7, 7)),
        };
        assert!(model.train_step(&[odd], 1e-2).is_err());

        let wide = Sample {
            features: Array3::zeros((3, 8, 8)),
            mask: Array2::zeros((8, 8)),
        };
        assert!(model.logits(&[wide]).is_err());
        assert!(model.load_weights(Path::new("/nonexistent/weights.bin")).is_err());
    }
}
