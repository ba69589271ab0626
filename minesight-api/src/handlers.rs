//! Axum handlers for the MineSight API.

use axum::{extract::State, http::StatusCode, Json};
use log::info;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::INDIAN_STATES;
use crate::predict::{generate_predictions, Feature};
use crate::AppState;

pub const MODEL_NAME: &str = "MineSight-AI";
pub const MODEL_VERSION: &str = "v1.0.0";

/// Local wall-clock time with microseconds, no offset.
pub fn timestamp() -> String {
    chrono::Local::now()
        .naive_local()
        .format("%Y-%m-%dT%H:%M:%S%.6f")
        .to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub model: String,
    pub version: String,
    pub timestamp: String,
}

pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    let health = HealthResponse {
        status: "healthy".to_string(),
        model: MODEL_NAME.to_string(),
        version: "1.0.0".to_string(),
        timestamp: timestamp(),
    };
    (StatusCode::OK, Json(health))
}

fn default_confidence() -> f64 {
    0.5
}

fn default_num_predictions() -> usize {
    50
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictRequest {
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default = "default_num_predictions")]
    pub num_predictions: usize,
}

impl Default for PredictRequest {
    fn default() -> Self {
        Self {
            confidence: default_confidence(),
            num_predictions: default_num_predictions(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredictionMetadata {
    pub total_predictions: usize,
    pub confidence_threshold: f64,
    pub model_version: String,
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
    pub metadata: PredictionMetadata,
}

pub async fn predict(
    State(state): State<AppState>,
    Json(req): Json<PredictRequest>,
) -> (StatusCode, Json<FeatureCollection>) {
    info!(
        "Running prediction with confidence threshold: {}, limit: {}",
        req.confidence, req.num_predictions
    );
    let features = state.with_rng(|rng| generate_predictions(rng, req.confidence, req.num_predictions));

    let body = FeatureCollection {
        kind: "FeatureCollection".to_string(),
        metadata: PredictionMetadata {
            total_predictions: features.len(),
            confidence_threshold: req.confidence,
            model_version: MODEL_VERSION.to_string(),
            timestamp: timestamp(),
        },
        features,
    };
    (StatusCode::OK, Json(body))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlapStatistics {
    pub zones_with_known_mines: u32,
    pub percentage_overlap: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceBucket {
    pub confidence: f64,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateCounts {
    pub state: String,
    pub known: u32,
    pub predicted: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Analytics {
    pub total_known_mines: u32,
    pub total_predicted_zones: u32,
    pub overlap_statistics: OverlapStatistics,
    pub avg_thermal_anomaly: f64,
    pub confidence_histogram: Vec<ConfidenceBucket>,
    pub state_distribution: Vec<StateCounts>,
}

/// `(bucket, min count, max count)` of the confidence histogram.
const HISTOGRAM: [(f64, u32, u32); 5] = [
    (0.6, 5, 15),
    (0.7, 10, 25),
    (0.8, 15, 35),
    (0.9, 8, 20),
    (0.95, 3, 10),
];

pub async fn analytics(State(state): State<AppState>) -> (StatusCode, Json<Analytics>) {
    let body = state.with_rng(|rng| Analytics {
        total_known_mines: 245,
        total_predicted_zones: 178,
        overlap_statistics: OverlapStatistics {
            zones_with_known_mines: 42,
            percentage_overlap: 23.6,
        },
        avg_thermal_anomaly: 28.7,
        confidence_histogram: HISTOGRAM
            .iter()
            .map(|&(confidence, lo, hi)| ConfidenceBucket {
                confidence,
                count: rng.gen_range(lo..=hi),
            })
            .collect(),
        state_distribution: INDIAN_STATES
            .iter()
            .map(|s| StateCounts {
                state: s.to_string(),
                known: rng.gen_range(10..=50),
                predicted: rng.gen_range(15..=60),
            })
            .collect(),
    });
    (StatusCode::OK, Json(body))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub model_name: String,
    pub architecture: String,
    pub input_bands: usize,
    pub patch_size: usize,
    pub device: String,
    pub trained_on: String,
    pub accuracy: String,
    pub status: String,
}

pub async fn model_info() -> (StatusCode, Json<ModelInfo>) {
    let info = ModelInfo {
        model_name: MODEL_NAME.to_string(),
        architecture: "U-Net with EfficientNet encoder".to_string(),
        input_bands: 16,
        patch_size: 320,
        device: "cuda".to_string(),
        trained_on: "18-band satellite imagery".to_string(),
        accuracy: "94.2%".to_string(),
        status: "ready".to_string(),
    };
    (StatusCode::OK, Json(info))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatesResponse {
    pub states: Vec<String>,
}

pub async fn states() -> (StatusCode, Json<StatesResponse>) {
    let states = INDIAN_STATES.iter().map(|s| s.to_string()).collect();
    (StatusCode::OK, Json(StatesResponse { states }))
}
