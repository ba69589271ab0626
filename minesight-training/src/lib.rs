//! Two-stage training of a coal segmentation model on a prepared patch
//! dataset.

pub mod checkpoint;
pub mod config;
pub mod dataset;
pub mod metrics;
pub mod model;
pub mod schedule;
pub mod segnet;
pub mod stage;

pub use checkpoint::{checkpoint_path, weights_path, BestTracker, Checkpoint};
pub use config::{StageConfig, TrainingConfig};
pub use dataset::{PatchDataset, Sample, TrainingData};
pub use model::SegmentationModel;
pub use segnet::{BurnSegmenter, SegNet, SegNetConfig};
pub use stage::{run_stage, run_stages, StageOutcome};
