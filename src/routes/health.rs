use axum::extract::State;
use axum::Json;
use serde::Serialize;

use crate::state::SharedState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub breakpoints: Vec<u32>,
    pub sample_size: usize,
    pub current_etag: String,
    pub extensions: Vec<String>,
    pub started_at: String,
}

pub async fn health(State(state): State<SharedState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        breakpoints: state.config.breakpoints.clone(),
        sample_size: state.config.limits.sample_size,
        current_etag: state.current_etag(),
        extensions: state.extensions.ids().into_iter().map(String::from).collect(),
        started_at: state.started_at.to_rfc3339(),
    })
}
