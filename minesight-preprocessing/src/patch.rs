use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};

/// One extracted window, kept in memory until the writer persists it.
#[derive(Debug, Clone)]
pub struct PatchRecord {
    /// `(feature_bands, S, S)`
    pub features: Array3<f32>,
    /// `(S, S)`
    pub mask: Array2<f32>,
    pub has_coal: bool,
    pub coal_pixel_count: usize,
    pub source_id: String,
    pub origin_x: usize,
    pub origin_y: usize,
}

impl PatchRecord {
    pub fn metadata(&self, filename: String) -> PatchMetadata {
        PatchMetadata {
            filename,
            has_coal: self.has_coal,
            coal_pixel_count: self.coal_pixel_count,
            source_id: self.source_id.clone(),
            origin_x: self.origin_x,
            origin_y: self.origin_y,
        }
    }
}

/// Serializable projection of a persisted patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchMetadata {
    pub filename: String,
    pub has_coal: bool,
    #[serde(rename = "coal_pixels")]
    pub coal_pixel_count: usize,
    #[serde(rename = "source")]
    pub source_id: String,
    #[serde(rename = "x")]
    pub origin_x: usize,
    #[serde(rename = "y")]
    pub origin_y: usize,
}

/// `patches_metadata.json`: one entry per patch file, in write order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataIndex {
    pub patches: Vec<PatchMetadata>,
}

impl MetadataIndex {
    pub fn len(&self) -> usize {
        self.patches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patches.is_empty()
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).with_context(|| format!("writing metadata index {:?}", path))?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("reading metadata index {:?}", path))?;
        let index = serde_json::from_str(&text)
            .with_context(|| format!("parsing metadata index {:?}", path))?;
        Ok(index)
    }
}
