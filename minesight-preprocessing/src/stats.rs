//! Per-band mean / standard deviation used to standardize model inputs.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;
use ndarray::{Array3, Axis};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::patch::PatchRecord;

/// Added to the std before dividing so flat bands stay finite.
pub const NORMALIZATION_EPSILON: f64 = 1e-8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandStatistics {
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl BandStatistics {
    pub fn bands(&self) -> usize {
        self.means.len()
    }

    /// Mean and population std of every band over all pixels of all patches.
    /// Two passes, accumulated in f64.
    pub fn from_cubes(cubes: &[&Array3<f32>], bands: usize) -> Self {
        let mut sums = vec![0.0f64; bands];
        let mut counts = vec![0usize; bands];
        for cube in cubes {
            for (b, plane) in cube.axis_iter(Axis(0)).enumerate().take(bands) {
                sums[b] += plane.iter().map(|&v| f64::from(v)).sum::<f64>();
                counts[b] += plane.len();
            }
        }
        let means: Vec<f64> = sums
            .iter()
            .zip(&counts)
            .map(|(&s, &n)| if n == 0 { 0.0 } else { s / n as f64 })
            .collect();

        let mut squares = vec![0.0f64; bands];
        for cube in cubes {
            for (b, plane) in cube.axis_iter(Axis(0)).enumerate().take(bands) {
                let m = means[b];
                squares[b] += plane
                    .iter()
                    .map(|&v| {
                        let d = f64::from(v) - m;
                        d * d
                    })
                    .sum::<f64>();
            }
        }
        let stds = squares
            .iter()
            .zip(&counts)
            .map(|(&s, &n)| if n == 0 { 0.0 } else { (s / n as f64).sqrt() })
            .collect();

        Self { means, stds }
    }

    /// Statistics over a uniform random sample of at most `sample_size`
    /// patches of the corpus.
    pub fn estimate<R: Rng>(
        corpus: &[PatchRecord],
        bands: usize,
        sample_size: usize,
        rng: &mut R,
    ) -> Self {
        let amount = sample_size.min(corpus.len());
        let picked = rand::seq::index::sample(rng, corpus.len(), amount);
        let cubes: Vec<&Array3<f32>> = picked.iter().map(|i| &corpus[i].features).collect();
        let stats = Self::from_cubes(&cubes, bands);
        info!(
            "Band statistics from {} of {} patches: means={:?}, stds={:?}",
            amount,
            corpus.len(),
            stats.means,
            stats.stds
        );
        stats
    }

    /// `(value - mean) / (std + eps)` on every band of a `(bands, rows, cols)` cube.
    pub fn normalize(&self, features: &mut Array3<f32>) -> Result<()> {
        if features.len_of(Axis(0)) != self.bands() {
            bail!(
                "cube has {} bands, statistics cover {}",
                features.len_of(Axis(0)),
                self.bands()
            );
        }
        for (b, mut plane) in features.axis_iter_mut(Axis(0)).enumerate() {
            let mean = self.means[b];
            let denom = self.stds[b] + NORMALIZATION_EPSILON;
            plane.mapv_inplace(|v| ((f64::from(v) - mean) / denom) as f32);
        }
        Ok(())
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing band statistics {:?}", path))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading band statistics {:?}", path))?;
        let stats: Self = serde_json::from_str(&text)
            .with_context(|| format!("parsing band statistics {:?}", path))?;
        if stats.means.len() != stats.stds.len() {
            bail!(
                "band statistics {:?} have {} means but {} stds",
                path,
                stats.means.len(),
                stats.stds.len()
            );
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array2, Array3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn record(features: Array3<f32>) -> PatchRecord {
        let side = features.len_of(Axis(1));
        PatchRecord {
            features,
            mask: Array2::zeros((side, side)),
            has_coal: false,
            coal_pixel_count: 0,
            source_id: "s.tif".into(),
            origin_x: 0,
            origin_y: 0,
        }
    }

    #[test]
    fn all_zero_patches_give_zero_stats_and_finite_normalization() {
        let corpus: Vec<_> = (0..5).map(|_| record(Array3::zeros((3, 4, 4)))).collect();
        let stats = BandStatistics::estimate(&corpus, 3, 500, &mut StdRng::seed_from_u64(1));
        assert_eq!(stats.means, vec![0.0; 3]);
        assert_eq!(stats.stds, vec![0.0; 3]);

        let mut cube = Array3::<f32>::zeros((3, 4, 4));
        stats.normalize(&mut cube).unwrap();
        assert!(cube.iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn known_values() {
        // band 0: 1,3 ; band 1: 10,10
        let a = Array3::from_shape_vec((2, 1, 1), vec![1.0, 10.0]).unwrap();
        let b = Array3::from_shape_vec((2, 1, 1), vec![3.0, 10.0]).unwrap();
        let stats = BandStatistics::from_cubes(&[&a, &b], 2);
        assert_eq!(stats.means, vec![2.0, 10.0]);
        assert_eq!(stats.stds, vec![1.0, 0.0]);

        let mut c = a.clone();
        stats.normalize(&mut c).unwrap();
        assert!((c[(0, 0, 0)] + 1.0).abs() < 1e-6);
        assert_eq!(c[(1, 0, 0)], 0.0);
    }

    #[test]
    fn sample_is_capped_by_corpus_size() {
        let corpus: Vec<_> = (0..3)
            .map(|i| record(Array3::from_elem((1, 2, 2), i as f32)))
            .collect();
        let stats = BandStatistics::estimate(&corpus, 1, 500, &mut StdRng::seed_from_u64(4));
        assert!((stats.means[0] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn empty_corpus_gives_zeros() {
        let stats = BandStatistics::estimate(&[], 2, 500, &mut StdRng::seed_from_u64(4));
        assert_eq!(stats.means, vec![0.0, 0.0]);
        assert_eq!(stats.stds, vec![0.0, 0.0]);
    }

    #[test]
    fn normalize_rejects_band_mismatch() {
        let stats = BandStatistics {
            means: vec![0.0],
            stds: vec![1.0],
        };
        assert!(stats.normalize(&mut Array3::zeros((2, 2, 2))).is_err());
    }

    #[test]
    fn save_load_and_malformed_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("band_statistics.json");
        let stats = BandStatistics {
            means: vec![1.5, 2.5],
            stds: vec![0.5, 0.25],
        };
        stats.save(&path).unwrap();
        assert_eq!(BandStatistics::load(&path).unwrap(), stats);

        std::fs::write(&path, "{\"means\": [1.0]}").unwrap();
        assert!(BandStatistics::load(&path).is_err());
    }
}
