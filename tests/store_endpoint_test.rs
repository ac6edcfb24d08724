use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use optimization_detective::config::{DetectiveConfig, GroupLimits, STORE_ENDPOINT_PATH};
use optimization_detective::server::build_router;
use optimization_detective::state::AppState;
use optimization_detective::store::{normalize_url, url_metrics_slug, SqliteStorage};

const PAGE_URL: &str = "https://example.com/blog/";

fn test_state() -> Arc<AppState> {
    let config = DetectiveConfig {
        breakpoints: vec![480, 600, 782],
        limits: GroupLimits {
            sample_size: 1,
            capacity: 1,
            freshness_ttl_secs: 3_600,
        },
        gc_interval_secs: 0,
        ..DetectiveConfig::default()
    };
    Arc::new(AppState::new(
        config,
        Arc::new(SqliteStorage::in_memory().unwrap()),
    ))
}

fn rect() -> Value {
    json!({
        "width": 400.0, "height": 300.0, "x": 0.0, "y": 10.0,
        "top": 10.0, "right": 400.0, "bottom": 310.0, "left": 0.0
    })
}

fn submission(state: &AppState, width: u32, height: u32) -> Value {
    let slug = url_metrics_slug(&normalize_url(PAGE_URL).unwrap());
    json!({
        "slug": slug,
        "current_etag": state.current_etag(),
        "url": PAGE_URL,
        "viewport": {"width": width, "height": height},
        "elements": [{
            "isLCP": true,
            "isLCPCandidate": true,
            "xpath": "/*[1][self::HTML]/*[2][self::BODY]/*[1][self::IMG]",
            "intersectionRatio": 1.0,
            "intersectionRect": rect(),
            "boundingClientRect": rect(),
        }],
    })
}

async fn post(router: &Router, client: &str, body: &Value) -> (StatusCode, Value) {
    let request = Request::builder()
        .method("POST")
        .uri(STORE_ENDPOINT_PATH)
        .header("content-type", "application/json")
        .header("x-forwarded-for", client)
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_store_valid_submission() {
    let state = test_state();
    let router = build_router(state.clone());

    let (status, body) = post(&router, "10.0.0.1", &submission(&state, 400, 700)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["outcome"], "created");

    // A different viewport group on the same URL is appended.
    let (status, body) = post(&router, "10.0.0.2", &submission(&state, 700, 700)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "appended");

    let groups = state
        .store
        .get(PAGE_URL, &state.current_etag(), &state.extensions.schema())
        .unwrap();
    assert_eq!(groups.len(), 2);
}

#[tokio::test]
async fn test_stale_etag_rejected() {
    let state = test_state();
    let router = build_router(state.clone());

    let mut body = submission(&state, 400, 700);
    body["current_etag"] = json!("0".repeat(64));
    let (status, body) = post(&router, "10.0.0.1", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "stale_etag");
}

#[tokio::test]
async fn test_slug_mismatch_rejected() {
    let state = test_state();
    let router = build_router(state.clone());

    let mut body = submission(&state, 400, 700);
    body["url"] = json!("https://example.com/other/");
    let (status, body) = post(&router, "10.0.0.1", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "slug_mismatch");
}

#[tokio::test]
async fn test_missing_slug_rejected() {
    let state = test_state();
    let router = build_router(state.clone());

    let mut body = submission(&state, 400, 700);
    body.as_object_mut().unwrap().remove("slug");
    let (status, body) = post(&router, "10.0.0.1", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_request");
}

#[tokio::test]
async fn test_extreme_aspect_ratio_rejected() {
    let state = test_state();
    let router = build_router(state.clone());

    // 400 / 100 = 4.0, wider than any real browser window.
    let (status, body) = post(&router, "10.0.0.1", &submission(&state, 400, 100)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "viewport_aspect_ratio");

    // The rejection did not lock the client.
    let (status, _) = post(&router, "10.0.0.1", &submission(&state, 400, 700)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_invalid_metric_reports_field() {
    let state = test_state();
    let router = build_router(state.clone());

    let mut body = submission(&state, 400, 700);
    body["elements"] = json!([{ "isLCP": "yes" }]);
    let (status, body) = post(&router, "10.0.0.1", &body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "invalid_url_metric");
    assert!(body["field"]
        .as_str()
        .unwrap()
        .starts_with("UrlMetric[elements]"));
}

#[tokio::test]
async fn test_storage_lock_blocks_repeat_client() {
    let state = test_state();
    let router = build_router(state.clone());

    let (status, _) = post(&router, "10.0.0.1", &submission(&state, 400, 700)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&router, "10.0.0.1", &submission(&state, 700, 700)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["code"], "url_metric_storage_locked");

    // Other clients are unaffected.
    let (status, _) = post(&router, "10.0.0.2", &submission(&state, 700, 700)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_complete_group_rejected() {
    let state = test_state();
    let router = build_router(state.clone());

    let (status, _) = post(&router, "10.0.0.1", &submission(&state, 400, 700)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = post(&router, "10.0.0.2", &submission(&state, 420, 700)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "url_metric_group_complete");
}

#[tokio::test]
async fn test_complete_group_rejection_does_not_lock_client() {
    let state = test_state();
    let router = build_router(state.clone());

    let (status, _) = post(&router, "10.0.0.1", &submission(&state, 400, 700)).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&router, "10.0.0.2", &submission(&state, 420, 700)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // The refused client can still fill a group that needs metrics.
    let (status, body) = post(&router, "10.0.0.2", &submission(&state, 700, 700)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["outcome"], "appended");
}
