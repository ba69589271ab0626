//! Patch dataset preparation for coal-mine segmentation.
//!
//! Raw multi-band rasters are cut into fixed-size windows, classified by
//! their coal mask, balanced per class, written back as small rasters with a
//! JSON metadata index, and summarized by per-band statistics.

pub mod balance;
pub mod config;
pub mod extract;
pub mod patch;
pub mod pool;
pub mod raster;
pub mod sources;
pub mod stats;
pub mod writer;

use anyhow::{bail, Context, Result};
use log::{info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;

pub use config::PipelineConfig;
pub use patch::{MetadataIndex, PatchMetadata, PatchRecord};
pub use raster::{GeoProfile, Raster, RasterSource, Window};
pub use stats::BandStatistics;

pub const METADATA_FILE: &str = "patches_metadata.json";
pub const STATISTICS_FILE: &str = "band_statistics.json";

/// Independent RNG stream `stream` of a run: derived from `seed` when one is
/// configured, from entropy otherwise.
pub fn seeded_rng(seed: Option<u64>, stream: u64) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s.wrapping_add(stream.wrapping_mul(0x9E37_79B9_7F4A_7C15))),
        None => StdRng::from_entropy(),
    }
}

/// What a preprocessing run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub sources: usize,
    pub failed_sources: usize,
    pub coal_extracted: usize,
    pub noncoal_extracted: usize,
    pub coal_kept: usize,
    pub noncoal_kept: usize,
    pub patches_written: usize,
    pub raw_deleted: bool,
}

/// Discover -> extract -> balance -> statistics -> write -> raw cleanup
/// (skipped when `delete_raw` is off).
pub fn run(cfg: &PipelineConfig) -> Result<PipelineSummary> {
    cfg.validate()?;

    let paths = sources::discover_rasters(&cfg.input_dir, &cfg.extension)?;
    if paths.is_empty() {
        bail!("No .{} rasters found in {:?}", cfg.extension, cfg.input_dir);
    }

    // Any source will do; the first one lends its georeferencing to every patch.
    let profile = match GeoProfile::read(&paths[0]) {
        Ok(p) => p,
        Err(e) => {
            warn!(
                "Reference raster {:?} unreadable ({:#}), patches get no geo tags",
                paths[0], e
            );
            GeoProfile::default()
        }
    };

    let harvest = pool::extract_all(&paths, cfg)?;
    let mut summary = PipelineSummary {
        sources: paths.len(),
        failed_sources: harvest.failures.len(),
        coal_extracted: harvest.coal.len(),
        noncoal_extracted: harvest.noncoal.len(),
        ..PipelineSummary::default()
    };

    let mut rng = seeded_rng(cfg.seed, u64::MAX);
    let corpus = balance::balance(
        harvest.coal,
        harvest.noncoal,
        cfg.max_coal_patches,
        cfg.max_noncoal_patches,
        &mut rng,
    );
    summary.coal_kept = corpus.iter().filter(|p| p.has_coal).count();
    summary.noncoal_kept = corpus.len() - summary.coal_kept;
    if corpus.len() < cfg.total_target_patches {
        info!(
            "Final dataset has {} patches, below the target of {}",
            corpus.len(),
            cfg.total_target_patches
        );
    }

    // Before writing: the writer releases pixel data as it goes.
    std::fs::create_dir_all(&cfg.output_dir)
        .with_context(|| format!("Failed to create output directory {:?}", cfg.output_dir))?;
    let stats = BandStatistics::estimate(&corpus, cfg.feature_bands, cfg.stats_sample, &mut rng);
    stats.save(&cfg.statistics_path())?;

    let index = writer::write_dataset(corpus, &cfg.output_dir, &cfg.metadata_path(), &profile)?;
    summary.patches_written = index.len();

    if cfg.delete_raw {
        summary.raw_deleted = sources::remove_raw_inputs(&cfg.input_dir);
    }

    info!("Preprocessing finished: {:?}", summary);
    Ok(summary)
}
