use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{debug, error, info, warn};

/// Raster files directly under `dir` whose extension matches (case-insensitive),
/// in lexicographic path order.
pub fn discover_rasters(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    info!("Scanning rasters under {:?}", dir);
    let rd = fs::read_dir(dir).with_context(|| format!("Cannot read input dir {:?}", dir))?;

    let mut paths = Vec::new();
    for entry_r in rd {
        let entry = match entry_r {
            Ok(en) => en,
            Err(e) => {
                warn!("Skipping an entry due to read_dir error: {:?}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) {
            debug!("Skipping non-file entry={:?}", path);
            continue;
        }
        let matches = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case(extension))
            .unwrap_or(false);
        if matches {
            paths.push(path);
        } else {
            debug!("Skipping file={:?}, extension is not .{}", path, extension);
        }
    }
    paths.sort();
    info!("Found {} rasters in {:?}", paths.len(), dir);
    Ok(paths)
}

/// Delete the raw input directory in one go. Failure is logged, never fatal:
/// the dataset is already complete when this runs.
pub fn remove_raw_inputs(dir: &Path) -> bool {
    info!("Cleaning raw dataset {:?} to save space", dir);
    match fs::remove_dir_all(dir) {
        Ok(()) => {
            info!("Deleted raw dataset: {:?}", dir);
            true
        }
        Err(e) => {
            error!("Could not delete raw dataset {:?}: {}", dir, e);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovers_matching_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.tif", "a.TIF", "c.tif", "notes.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("nested.tif")).unwrap();

        let found = discover_rasters(dir.path(), "tif").unwrap();
        let names: Vec<_> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["a.TIF", "b.tif", "c.tif"]);
    }

    #[test]
    fn missing_input_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(discover_rasters(&dir.path().join("absent"), "tif").is_err());
    }

    #[test]
    fn cleanup_reports_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let raw = dir.path().join("raw");
        fs::create_dir(&raw).unwrap();
        fs::write(raw.join("scene.tif"), b"x").unwrap();

        assert!(remove_raw_inputs(&raw));
        assert!(!raw.exists());
        assert!(!remove_raw_inputs(&raw));
    }
}
