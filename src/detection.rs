use serde::Serialize;

use crate::group::GroupStatus;

pub const DETECTION_SCRIPT_ID: &str = "optimization-detective-detect";

/// Arguments handed to the client-side `detect()` call.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionArgs {
    /// Milliseconds since the Unix epoch.
    pub serve_time: f64,
    pub detection_time_window: u64,
    pub min_viewport_aspect_ratio: f64,
    pub max_viewport_aspect_ratio: f64,
    pub is_debug: bool,
    pub rest_api_endpoint: String,
    pub current_url: String,
    pub url_metric_slug: String,
    #[serde(rename = "currentETag")]
    pub current_etag: String,
    pub url_metric_group_statuses: Vec<GroupStatus>,
    #[serde(rename = "storageLockTTL")]
    pub storage_lock_ttl: i64,
}

/// JSON that is safe to embed inside a `<script>` element.
fn script_json<T: Serialize + ?Sized>(value: &T) -> Result<String, serde_json::Error> {
    Ok(serde_json::to_string(value)?.replace("</", "<\\/"))
}

pub fn detection_script(module_url: &str, args: &DetectionArgs) -> Result<String, serde_json::Error> {
    Ok(format!(
        "<script type=\"module\" id=\"{}\">import detect from {}; detect({});</script>",
        DETECTION_SCRIPT_ID,
        script_json(module_url)?,
        script_json(args)?,
    ))
}
