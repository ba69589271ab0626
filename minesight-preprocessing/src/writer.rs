use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use ndarray::{concatenate, Axis};

use crate::patch::{MetadataIndex, PatchRecord};
use crate::raster::{write_raster, GeoProfile};

/// Zero-padded name of the `index`-th patch file.
pub fn patch_filename(index: usize) -> String {
    format!("patch_{:05}.tif", index)
}

/// Persist every patch as an `F+1`-band raster (features then mask) under
/// `out_dir`, then write the metadata index to `metadata_path`.
///
/// The corpus is consumed: each record's pixels are released right after its
/// file is written.
pub fn write_dataset(
    corpus: Vec<PatchRecord>,
    out_dir: &Path,
    metadata_path: &Path,
    profile: &GeoProfile,
) -> Result<MetadataIndex> {
    fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create output directory {:?}", out_dir))?;

    let pb = ProgressBar::new(corpus.len() as u64);
    pb.set_style(
        ProgressStyle::with_template("[{elapsed_precise}] {bar:40.green/blue} {pos:>5}/{len:5} {msg}")
            .context("progress bar template")?
            .progress_chars("##-"),
    );
    pb.set_message("writing patches");

    let mut index = MetadataIndex::default();
    let mut expected: Option<(usize, usize)> = None;

    for (i, record) in corpus.into_iter().enumerate() {
        let (bands, rows, cols) = record.features.dim();
        if record.mask.dim() != (rows, cols) || rows != cols {
            bail!(
                "patch #{} from {} has features {}x{} and mask {:?}",
                i,
                record.source_id,
                rows,
                cols,
                record.mask.dim()
            );
        }
        match expected {
            None => expected = Some((bands, rows)),
            Some(shape) if shape != (bands, rows) => bail!(
                "patch #{} has shape ({}, {}), dataset uses {:?}",
                i,
                bands,
                rows,
                shape
            ),
            Some(_) => {}
        }

        let name = patch_filename(i);
        let stacked = concatenate(
            Axis(0),
            &[record.features.view(), record.mask.view().insert_axis(Axis(0))],
        )
        .context("stacking features and mask")?;
        write_raster(&out_dir.join(&name), stacked.view(), profile)?;
        index.patches.push(record.metadata(name));
        pb.inc(1);
    }
    pb.finish_with_message("patches written");

    index.save(metadata_path)?;
    info!(
        "Wrote {} patch files and metadata index {:?}",
        index.len(),
        metadata_path
    );
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::raster::{Raster, RasterSource};
    use ndarray::{Array2, Array3};
    use std::collections::HashSet;

    fn record(i: usize, has_coal: bool) -> PatchRecord {
        PatchRecord {
            features: Array3::from_elem((2, 4, 4), i as f32),
            mask: Array2::from_elem((4, 4), if has_coal { 1.0 } else { 0.0 }),
            has_coal,
            coal_pixel_count: if has_coal { 16 } else { 0 },
            source_id: format!("scene_{}.tif", i % 2),
            origin_x: i * 2,
            origin_y: i,
        }
    }

    #[test]
    fn filenames_are_zero_padded() {
        assert_eq!(patch_filename(0), "patch_00000.tif");
        assert_eq!(patch_filename(42), "patch_00042.tif");
        assert_eq!(patch_filename(123_456), "patch_123456.tif");
    }

    #[test]
    fn writes_one_file_and_entry_per_patch() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("patches_metadata.json");
        let corpus: Vec<_> = (0..5).map(|i| record(i, i % 2 == 0)).collect();
        let profile = GeoProfile {
            pixel_scale: Some(vec![30.0, 30.0, 0.0]),
            ..GeoProfile::default()
        };

        let index = write_dataset(corpus, dir.path(), &meta, &profile).unwrap();
        assert_eq!(index.len(), 5);
        let names: Vec<_> = index.patches.iter().map(|p| p.filename.clone()).collect();
        let expected: Vec<_> = (0..5).map(patch_filename).collect();
        assert_eq!(names, expected);
        assert_eq!(names.iter().collect::<HashSet<_>>().len(), 5);
        assert_eq!(index.patches[3].origin_x, 6);
        assert!(!index.patches[3].has_coal);

        assert_eq!(MetadataIndex::load(&meta).unwrap(), index);

        let third = Raster::open(&dir.path().join("patch_00002.tif")).unwrap();
        assert_eq!(third.band_count(), 3);
        assert_eq!((third.height(), third.width()), (4, 4));
        assert_eq!(third.data()[(0, 1, 1)], 2.0);
        assert_eq!(third.data()[(2, 0, 0)], 1.0);
        assert_eq!(third.profile(), &profile);
    }

    #[test]
    fn rewriting_same_corpus_is_stable() {
        let dir = tempfile::tempdir().unwrap();
        let meta = dir.path().join("m.json");
        let a = write_dataset(
            (0..3).map(|i| record(i, true)).collect(),
            dir.path(),
            &meta,
            &GeoProfile::default(),
        )
        .unwrap();
        let first = fs::read_to_string(&meta).unwrap();
        let b = write_dataset(
            (0..3).map(|i| record(i, true)).collect(),
            dir.path(),
            &meta,
            &GeoProfile::default(),
        )
        .unwrap();
        assert_eq!(a, b);
        assert_eq!(first, fs::read_to_string(&meta).unwrap());
    }

    #[test]
    fn rejects_mixed_patch_sizes() {
        let dir = tempfile::tempdir().unwrap();
        let mut odd = record(1, false);
        odd.features = Array3::zeros((2, 3, 3));
        odd.mask = Array2::zeros((3, 3));
        let result = write_dataset(
            vec![record(0, true), odd],
            dir.path(),
            &dir.path().join("m.json"),
            &GeoProfile::default(),
        );
        assert!(result.is_err());
    }
}
