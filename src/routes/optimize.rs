use axum::extract::{Query, State};
use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde::Deserialize;
use tracing::debug;

use crate::error::DetectiveError;
use crate::state::SharedState;

pub const OPTIMIZED_HEADER: &str = "x-optimization-detective";

#[derive(Deserialize)]
pub struct OptimizeQuery {
    pub url: String,
}

fn is_html(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .is_some_and(|mime| mime.trim().eq_ignore_ascii_case("text/html"))
}

fn passthrough(headers: &HeaderMap, body: Bytes) -> Response {
    let content_type = headers
        .get(CONTENT_TYPE)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("application/octet-stream"));
    (
        [
            (CONTENT_TYPE, content_type),
            (
                axum::http::HeaderName::from_static(OPTIMIZED_HEADER),
                HeaderValue::from_static("skipped"),
            ),
        ],
        body,
    )
        .into_response()
}

/// Rewrites an outgoing HTML page. Anything that is not UTF-8 HTML is echoed
/// back untouched.
pub async fn optimize(
    State(state): State<SharedState>,
    Query(query): Query<OptimizeQuery>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, DetectiveError> {
    if !is_html(&headers) {
        debug!(url = %query.url, "Not an HTML response, passing through");
        return Ok(passthrough(&headers, body));
    }
    let html = match String::from_utf8(body.to_vec()) {
        Ok(html) => html,
        Err(_) => {
            debug!(url = %query.url, "Body is not UTF-8, passing through");
            return Ok(passthrough(&headers, body));
        }
    };

    let url = query.url;
    let (output, modified) = tokio::task::spawn_blocking(move || {
        let emission = state.optimizer().optimize(&url, &html);
        let modified = emission.is_modified();
        (emission.into_string(), modified)
    })
    .await?;

    let marker = if modified { "modified" } else { "unmodified" };
    Ok((
        [
            (
                CONTENT_TYPE,
                HeaderValue::from_static("text/html; charset=utf-8"),
            ),
            (
                axum::http::HeaderName::from_static(OPTIMIZED_HEADER),
                HeaderValue::from_static(marker),
            ),
        ],
        output,
    )
        .into_response())
}
