//! Synthetic prediction zones in GeoJSON form.
//!
//! This generator stands where model inference would run: it takes the
//! request parameters and an RNG and returns features in the shape the
//! frontend renders.

use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::catalog::{districts, ANCHORS};

pub fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    #[serde(rename = "type")]
    pub kind: String,
    /// One closed ring of `[lon, lat]` pairs
    pub coordinates: Vec<Vec<[f64; 2]>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneProperties {
    pub id: String,
    /// `surface` or `underground`
    #[serde(rename = "type")]
    pub kind: String,
    pub confidence: f64,
    pub state: String,
    pub district: String,
    pub area_sqkm: f64,
    pub avg_thermal_anomaly: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometry: Polygon,
    pub properties: ZoneProperties,
}

/// One zone near `(lat, lon)`: five jittered vertices, ring closed on the
/// first.
pub fn generate_zone<R: Rng>(rng: &mut R, state: &str, lat: f64, lon: f64) -> Feature {
    let district = districts(state)
        .choose(rng)
        .copied()
        .unwrap_or("Unknown")
        .to_string();

    let mut ring: Vec<[f64; 2]> = (0..5)
        .map(|_| {
            let radius = rng.gen_range(0.05..0.15);
            let vlat = lat + radius * rng.gen_range(-1.0..1.0);
            let vlon = lon + radius * rng.gen_range(-1.0..1.0);
            [vlon, vlat]
        })
        .collect();
    ring.push(ring[0]);

    let kind = if rng.gen_bool(0.5) { "surface" } else { "underground" };
    Feature {
        kind: "Feature".to_string(),
        geometry: Polygon {
            kind: "Polygon".to_string(),
            coordinates: vec![ring],
        },
        properties: ZoneProperties {
            id: format!("pred_{}", rng.gen_range(1000..=9999)),
            kind: kind.to_string(),
            confidence: round2(rng.gen_range(0.6..0.98)),
            state: state.to_string(),
            district,
            area_sqkm: round2(rng.gen_range(2.0..50.0)),
            avg_thermal_anomaly: round2(rng.gen_range(15.0..45.0)),
        },
    }
}

/// 3..=8 zones around every anchor; zones below `threshold` are dropped and
/// the rest cut to `limit`, in generation order.
pub fn generate_predictions<R: Rng>(rng: &mut R, threshold: f64, limit: usize) -> Vec<Feature> {
    let mut out = Vec::new();
    for (state, anchors) in ANCHORS {
        for &(lat, lon) in anchors {
            for _ in 0..rng.gen_range(3..=8) {
                let zone = generate_zone(rng, state, lat, lon);
                if zone.properties.confidence >= threshold {
                    out.push(zone);
                }
            }
        }
    }
    out.truncate(limit);
    out
}
