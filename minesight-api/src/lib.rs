//! HTTP API serving synthetic coal-zone predictions and dashboard analytics
//! to the MineSight frontend.

pub mod catalog;
pub mod handlers;
pub mod predict;

use std::sync::{Arc, Mutex, PoisonError};

use axum::{
    routing::{get, post},
    Router,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tower_http::cors::CorsLayer;

/// Shared by every request. The RNG feeds the prediction generator.
#[derive(Clone)]
pub struct AppState {
    rng: Arc<Mutex<StdRng>>,
}

impl AppState {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Reproducible responses for a given seed.
    pub fn seeded(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            rng: Arc::new(Mutex::new(rng)),
        }
    }

    /// Run `f` with exclusive access to the RNG. A poisoned lock is taken
    /// over, since the generator holds no invariant a panic could break.
    pub fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut guard = self.rng.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(handlers::health_check))
        .route("/api/predict", post(handlers::predict))
        .route("/api/analytics", get(handlers::analytics))
        .route("/api/model/info", get(handlers::model_info))
        .route("/api/states", get(handlers::states))
        .layer(CorsLayer::permissive())
        .with_state(state)
}
