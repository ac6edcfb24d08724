use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::response::Response;
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use optimization_detective::config::{DetectiveConfig, GroupLimits, STORE_ENDPOINT_PATH};
use optimization_detective::routes::optimize::OPTIMIZED_HEADER;
use optimization_detective::server::build_router;
use optimization_detective::state::AppState;
use optimization_detective::store::{normalize_url, url_metrics_slug, SqliteStorage};

const PAGE_URL: &str = "https://example.com/";
const PAGE: &str = "<!DOCTYPE html><html><head><title>Hi</title></head><body><img src=\"https://example.com/hero.jpg\" alt=\"\"></body></html>";

fn test_state() -> Arc<AppState> {
    let config = DetectiveConfig {
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

async fn optimize(router: &Router, content_type: &str, body: &str) -> Response {
    let request = Request::builder()
        .method("POST")
        .uri(format!("/optimize?url={}", PAGE_URL))
        .header("content-type", content_type)
        .body(Body::from(body.to_string()))
        .unwrap();
    router.clone().oneshot(request).await.unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

fn marker(response: &Response) -> &str {
    response
        .headers()
        .get(OPTIMIZED_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

#[tokio::test]
async fn test_health() {
    let state = test_state();
    let router = build_router(state.clone());

    let request = Request::builder()
        .uri("/health")
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body: Value = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["breakpoints"], json!([480, 600, 782]));
    assert_eq!(body["sample_size"], 1);
    assert_eq!(body["current_etag"], state.current_etag());
    assert_eq!(body["extensions"], json!(["image"]));
}

#[tokio::test]
async fn test_non_html_passes_through() {
    let router = build_router(test_state());

    let response = optimize(&router, "application/json", r#"{"html":"<html></html>"}"#).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(marker(&response), "skipped");
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(body_text(response).await, r#"{"html":"<html></html>"}"#);
}

#[tokio::test]
async fn test_fragment_is_unmodified() {
    let router = build_router(test_state());

    let response = optimize(&router, "text/html; charset=utf-8", "<p>partial</p>").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(marker(&response), "unmodified");
    assert_eq!(body_text(response).await, "<p>partial</p>");
}

#[tokio::test]
async fn test_detection_injected_without_metrics() {
    let router = build_router(test_state());

    let response = optimize(&router, "text/html", PAGE).await;
    assert_eq!(marker(&response), "modified");
    let html = body_text(response).await;

    assert!(html.contains(r#"data-od-xpath="/*[1][self::HTML]/*[2][self::BODY]/*[1][self::IMG]""#));
    assert!(html.contains(r#"id="optimization-detective-detect""#));
    assert!(html.contains(STORE_ENDPOINT_PATH));
    assert!(!html.contains("data-od-added-tag"));
    assert!(html.ends_with("</script></body></html>"));
}

#[tokio::test]
async fn test_stored_lcp_image_is_preloaded() {
    let state = test_state();
    let router = build_router(state.clone());

    let rect = json!({
        "width": 400.0, "height": 300.0, "x": 0.0, "y": 0.0,
        "top": 0.0, "right": 400.0, "bottom": 300.0, "left": 0.0
    });
    let submission = json!({
        "slug": url_metrics_slug(&normalize_url(PAGE_URL).unwrap()),
        "current_etag": state.current_etag(),
        "url": PAGE_URL,
        "viewport": {"width": 400, "height": 700},
        "elements": [{
            "isLCP": true,
            "isLCPCandidate": true,
            "xpath": "/*[1][self::HTML]/*[2][self::BODY]/*[1][self::IMG]",
            "intersectionRatio": 1.0,
            "intersectionRect": rect,
            "boundingClientRect": rect,
        }],
    });
    let request = Request::builder()
        .method("POST")
        .uri(STORE_ENDPOINT_PATH)
        .header("content-type", "application/json")
        .header("x-forwarded-for", "10.0.0.9")
        .body(Body::from(submission.to_string()))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = optimize(&router, "text/html", PAGE).await;
    assert_eq!(marker(&response), "modified");
    let html = body_text(response).await;

    let head_end = html.find("</head>").unwrap();
    let link = html.find("<link data-od-added-tag").unwrap();
    assert!(link < head_end);
    assert!(html.contains(r#"rel="preload""#));
    assert!(html.contains(r#"href="https://example.com/hero.jpg""#));

    // Three viewport groups are still empty, so detection keeps running.
    assert!(html.contains(r#"id="optimization-detective-detect""#));
}
