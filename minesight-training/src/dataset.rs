//! Loading persisted patches as normalized model inputs.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use log::info;
use ndarray::{s, Array2, Array3, Axis};
use rand::seq::SliceRandom;
use rand::Rng;

use minesight_preprocessing::{
    BandStatistics, MetadataIndex, Raster, RasterSource, METADATA_FILE, STATISTICS_FILE,
};

/// One model input with its binary target.
#[derive(Debug, Clone)]
pub struct Sample {
    /// `(bands, S, S)`, standardized
    pub features: Array3<f32>,
    /// `(S, S)`, 0.0 or 1.0
    pub mask: Array2<f32>,
}

/// Patch file list plus the statistics needed to read it.
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub files: Vec<PathBuf>,
    pub stats: BandStatistics,
}

impl TrainingData {
    /// Read the metadata index and band statistics of a dataset directory.
    /// Either file missing or malformed is fatal.
    pub fn load(dataset_dir: &Path, feature_bands: usize) -> Result<Self> {
        let index = MetadataIndex::load(&dataset_dir.join(METADATA_FILE))?;
        let stats = BandStatistics::load(&dataset_dir.join(STATISTICS_FILE))?;
        if stats.bands() != feature_bands {
            bail!(
                "band statistics cover {} bands, training expects {}",
                stats.bands(),
                feature_bands
            );
        }
        let files: Vec<PathBuf> = index
            .patches
            .iter()
            .map(|p| dataset_dir.join(&p.filename))
            .collect();
        info!(
            "Loaded dataset {:?}: {} patches ({} with coal)",
            dataset_dir,
            files.len(),
            index.patches.iter().filter(|p| p.has_coal).count()
        );
        Ok(Self { files, stats })
    }
}

/// Shuffle and cut at `floor(train_fraction * n)`: `(train, validation)`.
pub fn split_files<R: Rng>(
    files: &[PathBuf],
    train_fraction: f64,
    rng: &mut R,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut shuffled = files.to_vec();
    shuffled.shuffle(rng);
    let cut = ((train_fraction * shuffled.len() as f64) as usize).min(shuffled.len());
    let val = shuffled.split_off(cut);
    (shuffled, val)
}

/// Read one patch file: leading bands become standardized features, the band
/// after them the binarized mask.
pub fn load_sample(path: &Path, stats: &BandStatistics) -> Result<Sample> {
    let raster = Raster::open(path)?;
    let bands = stats.bands();
    if raster.band_count() < bands + 1 {
        bail!(
            "{:?} has {} bands, expected {} features plus mask",
            path,
            raster.band_count(),
            bands
        );
    }
    let data = raster.data();
    let mut features = data.slice(s![..bands, .., ..]).to_owned();
    stats
        .normalize(&mut features)
        .with_context(|| format!("normalizing {:?}", path))?;
    let mask = data
        .index_axis(Axis(0), bands)
        .mapv(|v| if v > 0.0 { 1.0 } else { 0.0 });
    Ok(Sample { features, mask })
}

/// Rotate the spatial axes a quarter turn counter-clockwise.
fn rot90_cube(a: &Array3<f32>) -> Array3<f32> {
    a.view()
        .permuted_axes([0, 2, 1])
        .slice(s![.., ..;-1, ..])
        .to_owned()
}

fn rot90_plane(a: &Array2<f32>) -> Array2<f32> {
    a.t().slice(s![..;-1, ..]).to_owned()
}

/// Random 90° rotation, horizontal and vertical flips (p=0.5 each) applied to
/// features and mask alike, then brightness/contrast jitter of ±0.15 (p=0.3)
/// on the features only.
pub fn augment<R: Rng>(sample: Sample, rng: &mut R) -> Sample {
    let Sample {
        mut features,
        mut mask,
    } = sample;

    if rng.gen_bool(0.5) {
        for _ in 0..rng.gen_range(0..4) {
            features = rot90_cube(&features);
            mask = rot90_plane(&mask);
        }
    }
    if rng.gen_bool(0.5) {
        features = features.slice(s![.., .., ..;-1]).to_owned();
        mask = mask.slice(s![.., ..;-1]).to_owned();
    }
    if rng.gen_bool(0.5) {
        features = features.slice(s![.., ..;-1, ..]).to_owned();
        mask = mask.slice(s![..;-1, ..]).to_owned();
    }
    if rng.gen_bool(0.3) {
        let contrast = 1.0 + rng.gen_range(-0.15f32..=0.15);
        let brightness = rng.gen_range(-0.15f32..=0.15);
        features.mapv_inplace(|v| v * contrast + brightness);
    }
    Sample { features, mask }
}

/// Patch files served as samples, with optional augmentation.
#[derive(Debug, Clone)]
pub struct PatchDataset<'a> {
    files: Vec<PathBuf>,
    stats: &'a BandStatistics,
    augment: bool,
}

impl<'a> PatchDataset<'a> {
    pub fn new(files: Vec<PathBuf>, stats: &'a BandStatistics, augment: bool) -> Self {
        Self {
            files,
            stats,
            augment,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get<R: Rng>(&self, idx: usize, rng: &mut R) -> Result<Sample> {
        let path = self
            .files
            .get(idx)
            .with_context(|| format!("sample index {} out of range", idx))?;
        let sample = load_sample(path, self.stats)?;
        Ok(if self.augment {
            augment(sample, rng)
        } else {
            sample
        })
    }

    /// Samples for the given positions, in that order.
    pub fn batch<R: Rng>(&self, indices: &[usize], rng: &mut R) -> Result<Vec<Sample>> {
        indices.iter().map(|&i| self.get(i, rng)).collect()
    }
}
