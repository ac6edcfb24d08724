use axum::extract::{ConnectInfo, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::{Extension, Json};
use serde_json::{json, Value};
use std::net::SocketAddr;
use tracing::{debug, info};

use crate::config::{MAX_VIEWPORT_ASPECT_RATIO, MIN_VIEWPORT_ASPECT_RATIO};
use crate::error::DetectiveError;
use crate::state::SharedState;
use crate::store::{normalize_url, url_metrics_slug, StoreOutcome};
use crate::url_metric::{current_timestamp, UrlMetric};

/// Identifies the submitting client for the storage lock.
fn client_id(connect_info: Option<&ConnectInfo<SocketAddr>>, headers: &HeaderMap) -> String {
    if let Some(ConnectInfo(addr)) = connect_info {
        return addr.ip().to_string();
    }
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

fn take_string(body: &mut serde_json::Map<String, Value>, key: &str) -> Result<String, DetectiveError> {
    match body.remove(key) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(DetectiveError::InvalidRequest(format!(
            "Missing or invalid parameter: {}",
            key
        ))),
    }
}

fn viewport_aspect_ratio(body: &serde_json::Map<String, Value>) -> Option<f64> {
    let viewport = body.get("viewport")?;
    let width = viewport.get("width")?.as_f64()?;
    let height = viewport.get("height")?.as_f64()?;
    if width <= 0.0 || height <= 0.0 {
        return None;
    }
    Some(width / height)
}

/// Accepts a URL Metric from the detection script.
pub async fn store_url_metric(
    State(state): State<SharedState>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<impl IntoResponse, DetectiveError> {
    let Value::Object(mut body) = body else {
        return Err(DetectiveError::InvalidRequest(
            "Request body must be a JSON object".to_string(),
        ));
    };

    let client = client_id(connect_info.as_ref().map(|Extension(info)| info), &headers);
    if state.storage_lock.is_locked(&client).await {
        return Err(DetectiveError::StorageLocked);
    }

    let slug = take_string(&mut body, "slug")?;
    let current_etag = take_string(&mut body, "current_etag")?;
    let etag = state.current_etag();
    if current_etag != etag {
        debug!(client = %client, "Rejecting URL Metric with stale ETag");
        return Err(DetectiveError::StaleEtag);
    }

    let url = body
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    let expected_slug = normalize_url(&url).ok().map(|u| url_metrics_slug(&u));
    if expected_slug.as_deref() != Some(slug.as_str()) {
        return Err(DetectiveError::SlugMismatch);
    }

    if let Some(ratio) = viewport_aspect_ratio(&body) {
        if !(MIN_VIEWPORT_ASPECT_RATIO..=MAX_VIEWPORT_ASPECT_RATIO).contains(&ratio) {
            return Err(DetectiveError::ViewportAspectRatio(ratio));
        }
    }

    body.insert("uuid".to_string(), json!(uuid::Uuid::new_v4().to_string()));
    body.insert("etag".to_string(), json!(etag));
    body.insert("timestamp".to_string(), json!(current_timestamp()));

    let schema = state.extensions.schema();
    let metric = UrlMetric::new(&Value::Object(body), &schema)?;

    let store = state.store.clone();
    let group_complete = {
        let (url, etag, schema) = (url.clone(), etag.clone(), schema.clone());
        let width = metric.viewport_width();
        tokio::task::spawn_blocking(move || -> Result<bool, DetectiveError> {
            let groups = store.get(&url, &etag, &schema)?;
            Ok(groups.group_for_viewport_width(width).is_complete())
        })
        .await??
    };
    if group_complete {
        return Err(DetectiveError::GroupComplete);
    }

    // Only a submission that is about to be stored locks the client.
    state.storage_lock.lock(&client).await;

    let store = state.store.clone();
    let outcome = tokio::task::spawn_blocking(move || store.store(&url, &etag, metric, &schema))
        .await??;

    if outcome == StoreOutcome::Dropped {
        return Err(DetectiveError::SampleDropped);
    }

    info!(client = %client, slug = %slug, ?outcome, "Stored URL Metric");
    Ok(Json(json!({
        "success": true,
        "outcome": outcome,
    })))
}
