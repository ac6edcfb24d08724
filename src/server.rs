use axum::routing::{get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::STORE_ENDPOINT_PATH;
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(crate::routes::health::health))
        // Output buffer optimization
        .route("/optimize", post(crate::routes::optimize::optimize))
        // URL Metric submissions from the detection script
        .route(
            STORE_ENDPOINT_PATH,
            post(crate::routes::url_metrics::store_url_metric),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .with_state(state)
}
