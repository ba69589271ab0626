use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

/// Everything the preprocessing stages need, passed explicitly to each stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Directory holding the raw multi-band rasters
    pub input_dir: PathBuf,
    /// Directory receiving patch files, metadata and band statistics
    pub output_dir: PathBuf,
    /// File extension used to discover rasters (no dot)
    pub extension: String,
    /// Side length S of every square patch
    pub patch_size: usize,
    /// Step T between window origins on both axes
    pub stride: usize,
    /// Number F of feature bands (bands 1..=F)
    pub feature_bands: usize,
    /// 1-based index of the coal mask band
    pub mask_band: usize,
    /// Minimum positive mask pixels for a window to count as coal
    pub min_coal_pixels: usize,
    /// Probability of keeping a non-coal window at extraction time
    pub noncoal_sample_rate: f64,
    pub max_coal_patches: usize,
    pub max_noncoal_patches: usize,
    /// Informational only, the balancer never pads up to it
    pub total_target_patches: usize,
    /// Size of the extraction thread pool
    pub workers: usize,
    /// How many patches feed the band statistics
    pub stats_sample: usize,
    /// Delete `input_dir` once the dataset is written; on unless kept explicitly
    pub delete_raw: bool,
    /// Fixed seed for reproducible sampling; entropy when absent
    pub seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("./Minesight_5k"),
            output_dir: PathBuf::from("./MineSight_Dataset"),
            extension: "tif".to_string(),
            patch_size: 320,
            stride: 160,
            feature_bands: 16,
            mask_band: 17,
            min_coal_pixels: 50,
            noncoal_sample_rate: 0.12,
            max_coal_patches: 2500,
            max_noncoal_patches: 2500,
            total_target_patches: 5000,
            workers: 8,
            stats_sample: 500,
            delete_raw: true,
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<()> {
        if self.patch_size == 0 {
            bail!("patch_size must be positive");
        }
        if self.stride == 0 {
            bail!("stride must be positive");
        }
        if self.feature_bands == 0 {
            bail!("feature_bands must be positive");
        }
        if self.mask_band == 0 || self.mask_band <= self.feature_bands {
            bail!(
                "mask_band={} must be a 1-based band index after the {} feature bands",
                self.mask_band,
                self.feature_bands
            );
        }
        if !(0.0..=1.0).contains(&self.noncoal_sample_rate) {
            bail!(
                "noncoal_sample_rate={} must lie in [0, 1]",
                self.noncoal_sample_rate
            );
        }
        if self.workers == 0 {
            bail!("workers must be positive");
        }
        if self.delete_raw && resolve(&self.output_dir).starts_with(resolve(&self.input_dir)) {
            bail!(
                "output_dir {:?} lies inside input_dir {:?}, which is deleted after the run",
                self.output_dir,
                self.input_dir
            );
        }
        Ok(())
    }

    /// Bands every source must provide: features plus the mask.
    pub fn required_bands(&self) -> usize {
        self.mask_band.max(self.feature_bands + 1)
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.output_dir.join(crate::METADATA_FILE)
    }

    pub fn statistics_path(&self) -> PathBuf {
        self.output_dir.join(crate::STATISTICS_FILE)
    }
}

/// Absolute form of `path` with symlinks resolved as far as it exists.
fn resolve(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut existing = absolute.as_path();
    let mut missing = Vec::new();
    while !existing.exists() {
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                missing.push(name.to_os_string());
                existing = parent;
            }
            _ => break,
        }
    }
    let mut resolved = fs::canonicalize(existing).unwrap_or_else(|_| existing.to_path_buf());
    resolved.extend(missing.iter().rev());
    resolved
}
