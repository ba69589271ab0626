//! Sliding-window patch extraction from a single raster.

use std::path::Path;

use anyhow::{bail, Result};
use log::{debug, info, warn};
use rand::Rng;

use crate::config::PipelineConfig;
use crate::patch::PatchRecord;
use crate::raster::{Raster, RasterSource, Window};

/// Patches collected from one source. `error` is set when the source was
/// abandoned part-way; the patches gathered before that point are kept.
#[derive(Debug, Default)]
pub struct Extraction {
    pub source_id: String,
    pub coal: Vec<PatchRecord>,
    pub noncoal: Vec<PatchRecord>,
    pub windows_scanned: usize,
    pub error: Option<String>,
}

impl Extraction {
    pub(crate) fn failed(source_id: &str, error: String) -> Self {
        Self {
            source_id: source_id.to_string(),
            error: Some(error),
            ..Self::default()
        }
    }
}

/// Origins of every full window along one axis: `floor((len - size) / stride) + 1`
/// positions, none when the window does not fit at all.
pub fn window_origins(length: usize, size: usize, stride: usize) -> Vec<usize> {
    if size == 0 || stride == 0 || length < size {
        return Vec::new();
    }
    (0..=length - size).step_by(stride).collect()
}

/// Name recorded in the metadata for a source file.
pub fn source_id(path: &Path) -> String {
    path.file_name()
        .map(|os| os.to_string_lossy().to_string())
        .unwrap_or_else(|| "UnknownSource".to_string())
}

/// Open a raster and extract from it. An unreadable file yields an empty,
/// failed extraction rather than an error.
pub fn extract_from_path<R: Rng>(path: &Path, cfg: &PipelineConfig, rng: &mut R) -> Extraction {
    let id = source_id(path);
    match Raster::open(path) {
        Ok(raster) => extract_patches(&raster, &id, cfg, rng),
        Err(e) => {
            warn!("source={} could not be opened: {:#}", id, e);
            Extraction::failed(&id, format!("{:#}", e))
        }
    }
}

fn check_bands<S: RasterSource>(source: &S, cfg: &PipelineConfig) -> Result<()> {
    if source.band_count() < cfg.required_bands() {
        bail!(
            "has {} bands, need {} feature bands plus mask band {}",
            source.band_count(),
            cfg.feature_bands,
            cfg.mask_band
        );
    }
    Ok(())
}

/// Slide an `S×S` window in steps of `T` from (0,0), classify each window by
/// its positive mask pixels, keep every coal window and a `p`-sample of the
/// rest.
pub fn extract_patches<S: RasterSource, R: Rng>(
    source: &S,
    source_id: &str,
    cfg: &PipelineConfig,
    rng: &mut R,
) -> Extraction {
    if let Err(e) = check_bands(source, cfg) {
        warn!("source={} skipped: {:#}", source_id, e);
        return Extraction::failed(source_id, format!("{:#}", e));
    }

    let size = cfg.patch_size;
    let rows = window_origins(source.height(), size, cfg.stride);
    let cols = window_origins(source.width(), size, cfg.stride);
    debug!(
        "source={}, {}x{} raster => {}x{} window origins",
        source_id,
        source.height(),
        source.width(),
        rows.len(),
        cols.len()
    );

    let mut out = Extraction {
        source_id: source_id.to_string(),
        ..Extraction::default()
    };

    'scan: for &y in &rows {
        for &x in &cols {
            let window = Window::square(x, y, size);
            out.windows_scanned += 1;

            let mask = match source.read_band(cfg.mask_band, window) {
                Ok(m) => m,
                Err(e) => {
                    warn!(
                        "source={}, mask read failed at ({}, {}): {:#}",
                        source_id, x, y, e
                    );
                    out.error = Some(format!("{:#}", e));
                    break 'scan;
                }
            };
            let coal_pixels = mask.iter().filter(|&&v| v > 0.0).count();
            let has_coal = coal_pixels >= cfg.min_coal_pixels;

            if !has_coal && rng.gen::<f64>() >= cfg.noncoal_sample_rate {
                continue;
            }

            let features = match source.read_bands(1..=cfg.feature_bands, window) {
                Ok(f) => f,
                Err(e) => {
                    warn!(
                        "source={}, feature read failed at ({}, {}): {:#}",
                        source_id, x, y, e
                    );
                    out.error = Some(format!("{:#}", e));
                    break 'scan;
                }
            };

            let record = PatchRecord {
                features,
                mask,
                has_coal,
                coal_pixel_count: coal_pixels,
                source_id: source_id.to_string(),
                origin_x: x,
                origin_y: y,
            };
            if has_coal {
                out.coal.push(record);
            } else {
                out.noncoal.push(record);
            }
        }
    }

    info!(
        "source={} => scanned {} windows, kept {} coal / {} non-coal",
        source_id,
        out.windows_scanned,
        out.coal.len(),
        out.noncoal.len()
    );
    out
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::anyhow;
    use ndarray::{Array2, Array3};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    pub(crate) fn small_config() -> PipelineConfig {
        PipelineConfig {
            patch_size: 4,
            stride: 2,
            feature_bands: 2,
            mask_band: 3,
            min_coal_pixels: 3,
            noncoal_sample_rate: 1.0,
            ..PipelineConfig::default()
        }
    }

    /// Features are constant per band; the mask has a coal block in the
    /// top-left corner.
    pub(crate) fn raster_with_block(side: usize, block: usize) -> Raster {
        let data = Array3::from_shape_fn((3, side, side), |(b, y, x)| match b {
            2 => {
                if y < block && x < block {
                    1.0
                } else {
                    0.0
                }
            }
            _ => (b + 1) as f32,
        });
        Raster::from_array(data)
    }

    /// Fails every read after `ok_reads` successful ones.
    struct FlakySource {
        inner: Raster,
        ok_reads: std::cell::Cell<usize>,
    }

    impl RasterSource for FlakySource {
        fn width(&self) -> usize {
            self.inner.width()
        }
        fn height(&self) -> usize {
            self.inner.height()
        }
        fn band_count(&self) -> usize {
            self.inner.band_count()
        }
        fn read_band(&self, band: usize, window: Window) -> Result<Array2<f32>> {
            let left = self.ok_reads.get();
            if left == 0 {
                return Err(anyhow!("simulated decode failure"));
            }
            self.ok_reads.set(left - 1);
            self.inner.read_band(band, window)
        }
    }

    #[test]
    fn origin_count_matches_formula() {
        for (len, size, stride) in [(640, 320, 160), (1000, 320, 160), (320, 320, 7), (17, 5, 3)] {
            let origins = window_origins(len, size, stride);
            assert_eq!(origins.len(), (len - size) / stride + 1);
            assert!(origins.iter().all(|&o| o + size <= len));
            assert_eq!(origins[0], 0);
        }
        assert!(window_origins(100, 320, 160).is_empty());
    }

    #[test]
    fn coal_iff_count_reaches_threshold() {
        let cfg = small_config();
        let raster = raster_with_block(8, 2);
        let mut rng = StdRng::seed_from_u64(1);
        let out = extract_patches(&raster, "a.tif", &cfg, &mut rng);

        assert_eq!(out.windows_scanned, 9);
        assert!(out.error.is_none());
        // Only the (0,0) window sees the full 2x2 block (4 >= 3).
        assert_eq!(out.coal.len(), 1);
        assert_eq!(out.noncoal.len(), 8);
        let coal = &out.coal[0];
        assert_eq!((coal.origin_x, coal.origin_y), (0, 0));
        assert_eq!(coal.coal_pixel_count, 4);
        assert_eq!(coal.features.dim(), (2, 4, 4));
        assert_eq!(coal.mask.dim(), (4, 4));
        assert!(out.noncoal.iter().all(|p| p.coal_pixel_count < 3 && !p.has_coal));
    }

    #[test]
    fn zero_rate_drops_all_background() {
        let cfg = PipelineConfig {
            noncoal_sample_rate: 0.0,
            ..small_config()
        };
        let raster = raster_with_block(8, 2);
        let out = extract_patches(&raster, "a.tif", &cfg, &mut StdRng::seed_from_u64(3));
        assert_eq!(out.coal.len(), 1);
        assert!(out.noncoal.is_empty());
    }

    #[test]
    fn background_inclusion_rate_tracks_p() {
        let cfg = PipelineConfig {
            patch_size: 2,
            stride: 1,
            noncoal_sample_rate: 0.12,
            ..small_config()
        };
        // 101x101 raster, no coal => 100*100 candidate windows
        let raster = raster_with_block(101, 0);
        let out = extract_patches(&raster, "bg.tif", &cfg, &mut StdRng::seed_from_u64(42));
        let rate = out.noncoal.len() as f64 / out.windows_scanned as f64;
        assert_eq!(out.windows_scanned, 10_000);
        assert!((rate - 0.12).abs() < 0.02, "rate={}", rate);
    }

    #[test]
    fn failing_source_keeps_partial_results() {
        let cfg = small_config();
        // First window: mask + 2 features = 3 reads, then the next mask read fails.
        let source = FlakySource {
            inner: raster_with_block(8, 2),
            ok_reads: std::cell::Cell::new(3),
        };
        let out = extract_patches(&source, "flaky.tif", &cfg, &mut StdRng::seed_from_u64(5));
        assert_eq!(out.coal.len(), 1);
        assert!(out.noncoal.is_empty());
        assert_eq!(out.windows_scanned, 2);
        assert!(out.error.as_deref().unwrap().contains("simulated"));
    }

    #[test]
    fn too_few_bands_is_a_failed_source() {
        let cfg = PipelineConfig {
            feature_bands: 3,
            mask_band: 4,
            ..small_config()
        };
        let out = extract_patches(
            &raster_with_block(8, 2),
            "thin.tif",
            &cfg,
            &mut StdRng::seed_from_u64(0),
        );
        assert!(out.error.is_some());
        assert_eq!(out.windows_scanned, 0);
    }

    #[test]
    fn unreadable_path_is_a_failed_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.tif");
        let out = extract_from_path(&path, &small_config(), &mut StdRng::seed_from_u64(0));
        assert_eq!(out.source_id, "missing.tif");
        assert!(out.error.is_some());
        assert!(out.coal.is_empty() && out.noncoal.is_empty());
    }
}
