//! Bounded fan-out of per-source extraction, fan-in by concatenation.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};
use rayon::prelude::*;
use rayon::ThreadPoolBuilder;

use crate::config::PipelineConfig;
use crate::extract::{extract_from_path, source_id, Extraction};
use crate::patch::PatchRecord;
use crate::seeded_rng;

/// Merged output of every extraction task.
#[derive(Debug, Default)]
pub struct Harvest {
    pub coal: Vec<PatchRecord>,
    pub noncoal: Vec<PatchRecord>,
    /// `(source_id, reason)` for every source abandoned early
    pub failures: Vec<(String, String)>,
}

impl Harvest {
    fn absorb(&mut self, extraction: Extraction) {
        let Extraction {
            source_id,
            mut coal,
            mut noncoal,
            error,
            ..
        } = extraction;
        self.coal.append(&mut coal);
        self.noncoal.append(&mut noncoal);
        if let Some(reason) = error {
            self.failures.push((source_id, reason));
        }
    }
}

/// Run one extraction task per source on a pool of `cfg.workers` threads.
/// A source that fails or panics only loses its own remaining windows.
pub fn extract_all(paths: &[PathBuf], cfg: &PipelineConfig) -> Result<Harvest> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(cfg.workers)
        .build()
        .context("building extraction thread pool")?;
    info!(
        "Extracting from {} sources with {} workers",
        paths.len(),
        cfg.workers
    );

    let pb = ProgressBar::new(paths.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}/{len:3} {msg}")
            .context("progress bar template")?
            .progress_chars("##-"),
    );
    pb.set_message("extracting");

    let results: Vec<Extraction> = pool.install(|| {
        paths
            .par_iter()
            .enumerate()
            .map(|(idx, path)| {
                let mut rng = seeded_rng(cfg.seed, idx as u64);
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    extract_from_path(path, cfg, &mut rng)
                }));
                pb.inc(1);
                match outcome {
                    Ok(extraction) => extraction,
                    Err(_) => {
                        error!("Extraction task panicked for {:?}", path);
                        Extraction::failed(&source_id(path), "extraction task panicked".into())
                    }
                }
            })
            .collect()
    });
    pb.finish_with_message("extraction done");

    let mut harvest = Harvest::default();
    for extraction in results {
        harvest.absorb(extraction);
    }
    for (source, reason) in &harvest.failures {
        warn!("source={} ended early: {}", source, reason);
    }
    info!(
        "Extracted {} coal and {} non-coal patches ({} sources with errors)",
        harvest.coal.len(),
        harvest.noncoal.len(),
        harvest.failures.len()
    );
    Ok(harvest)
}
