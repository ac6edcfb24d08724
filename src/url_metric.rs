//! A single observation of one page view: URL, viewport and the layout of the
//! elements the detection script tracked.

use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::LazyLock;
use tracing::warn;

use crate::schema::{DataValidationError, Format, Pattern, Schema};

pub const RECORD_NAME: &str = "UrlMetric";
pub const URL_MAX_LENGTH: usize = 500;

static XPATH_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(/\*\[\d+\]\[self::[a-zA-Z0-9\-]+\])+$").expect("xpath pattern is valid")
});
static ETAG_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9a-f]{64}$").expect("etag pattern is valid"));
static HTTP_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://").expect("url pattern is valid"));

const CORE_ROOT_PROPERTIES: &[&str] = &["uuid", "etag", "url", "viewport", "timestamp", "elements"];
const CORE_ELEMENT_PROPERTIES: &[&str] = &[
    "isLCP",
    "isLCPCandidate",
    "xpath",
    "intersectionRatio",
    "intersectionRect",
    "boundingClientRect",
];

/// Seconds since the Unix epoch, microsecond precision.
pub fn current_timestamp() -> f64 {
    Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct DomRect {
    pub width: f64,
    pub height: f64,
    pub x: f64,
    pub y: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementData {
    #[serde(rename = "isLCP")]
    pub is_lcp: bool,
    #[serde(rename = "isLCPCandidate")]
    pub is_lcp_candidate: bool,
    pub xpath: String,
    pub intersection_ratio: f64,
    pub intersection_rect: DomRect,
    pub bounding_client_rect: DomRect,
    /// Properties contributed by extensions.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct UrlMetricData {
    uuid: String,
    etag: String,
    url: String,
    viewport: Viewport,
    timestamp: f64,
    elements: Vec<ElementData>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// Validated, immutable URL Metric.
#[derive(Debug, Clone, PartialEq)]
pub struct UrlMetric {
    data: UrlMetricData,
}

impl UrlMetric {
    /// Validates and sanitizes `raw` against `schema`.
    pub fn new(raw: &Value, schema: &UrlMetricSchema) -> Result<Self, DataValidationError> {
        let sanitized = schema.root().validate(raw, RECORD_NAME)?;

        let data: UrlMetricData = serde_json::from_value(sanitized).map_err(|e| {
            DataValidationError::new(RECORD_NAME, format!("{} is malformed: {}", RECORD_NAME, e))
        })?;

        let lcp_count = data.elements.iter().filter(|e| e.is_lcp).count();
        if lcp_count > 1 {
            let path = format!("{}[elements]", RECORD_NAME);
            return Err(DataValidationError::new(
                path.clone(),
                format!("{} must not contain more than one LCP element.", path),
            ));
        }

        Ok(Self { data })
    }

    pub fn uuid(&self) -> &str {
        &self.data.uuid
    }

    pub fn etag(&self) -> &str {
        &self.data.etag
    }

    pub fn url(&self) -> &str {
        &self.data.url
    }

    pub fn viewport(&self) -> Viewport {
        self.data.viewport
    }

    pub fn viewport_width(&self) -> u32 {
        self.data.viewport.width
    }

    pub fn viewport_height(&self) -> u32 {
        self.data.viewport.height
    }

    pub fn timestamp(&self) -> f64 {
        self.data.timestamp
    }

    pub fn elements(&self) -> &[ElementData] {
        &self.data.elements
    }

    pub fn lcp_element(&self) -> Option<&ElementData> {
        self.data.elements.iter().find(|e| e.is_lcp)
    }

    pub fn extension_property(&self, name: &str) -> Option<&Value> {
        self.data.extra.get(name)
    }

    /// Serializes back to the sanitized mapping the metric was built from.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.data).unwrap_or(Value::Null)
    }
}

/// The assembled URL Metric schema: core properties plus whatever the
/// registered extensions contributed.
#[derive(Debug, Clone)]
pub struct UrlMetricSchema {
    root: Schema,
}

impl UrlMetricSchema {
    pub fn builder() -> UrlMetricSchemaBuilder {
        UrlMetricSchemaBuilder::default()
    }

    pub fn root(&self) -> &Schema {
        &self.root
    }
}

#[derive(Debug, Default)]
pub struct UrlMetricSchemaBuilder {
    root_properties: Vec<(String, Schema)>,
    element_properties: Vec<(String, Schema)>,
}

impl UrlMetricSchemaBuilder {
    pub fn add_root_property(&mut self, name: &str, schema: Schema) -> &mut Self {
        if CORE_ROOT_PROPERTIES.contains(&name) {
            warn!("Ignoring extension schema for core URL Metric property {}", name);
        } else {
            self.root_properties.push((name.to_string(), schema.optional()));
        }
        self
    }

    pub fn add_element_property(&mut self, name: &str, schema: Schema) -> &mut Self {
        if CORE_ELEMENT_PROPERTIES.contains(&name) {
            warn!("Ignoring extension schema for core element property {}", name);
        } else {
            self.element_properties.push((name.to_string(), schema.optional()));
        }
        self
    }

    pub fn build(&self) -> UrlMetricSchema {
        let mut element = element_schema();
        for (name, schema) in &self.element_properties {
            element.insert_property(name, schema.clone());
        }

        let mut root = root_schema(element);
        for (name, schema) in &self.root_properties {
            root.insert_property(name, schema.clone());
        }
        UrlMetricSchema { root }
    }
}

fn dom_rect_schema() -> Schema {
    ["width", "height", "x", "y", "top", "right", "bottom", "left"]
        .iter()
        .fold(Schema::object().additional_properties(false), |schema, name| {
            schema.property(name, Schema::number().minimum(0.0).required())
        })
}

fn element_schema() -> Schema {
    Schema::object()
        .property("isLCP", Schema::boolean().required())
        .property("isLCPCandidate", Schema::boolean().required())
        .property(
            "xpath",
            Schema::string()
                .pattern(Pattern::from_regex(&XPATH_PATTERN))
                .required(),
        )
        .property(
            "intersectionRatio",
            Schema::number().minimum(0.0).maximum(1.0).required(),
        )
        .property("intersectionRect", dom_rect_schema().required())
        .property("boundingClientRect", dom_rect_schema().required())
        .additional_properties(false)
}

fn root_schema(element: Schema) -> Schema {
    Schema::object()
        .property("uuid", Schema::string().format(Format::Uuid).required())
        .property(
            "etag",
            Schema::string()
                .pattern(Pattern::from_regex(&ETAG_PATTERN))
                .required(),
        )
        .property(
            "url",
            Schema::string()
                .max_length(URL_MAX_LENGTH)
                .pattern(Pattern::from_regex(&HTTP_URL_PATTERN))
                .format(Format::Uri)
                .required(),
        )
        .property(
            "viewport",
            Schema::object()
                .property("width", Schema::integer().minimum(1.0).required())
                .property("height", Schema::integer().minimum(1.0).required())
                .additional_properties(false)
                .required(),
        )
        .property("timestamp", Schema::number().minimum(0.0).required())
        .property("elements", Schema::array(element).required())
        .additional_properties(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub const SAMPLE_ETAG: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    pub fn sample_rect() -> Value {
        json!({
            "width": 500.1, "height": 100.2, "x": 100.3, "y": 100.4,
            "top": 0.1, "right": 0.2, "bottom": 0.3, "left": 0.4
        })
    }

    pub fn sample_element(xpath: &str, is_lcp: bool, ratio: f64) -> Value {
        json!({
            "isLCP": is_lcp,
            "isLCPCandidate": is_lcp,
            "xpath": xpath,
            "intersectionRatio": ratio,
            "intersectionRect": sample_rect(),
            "boundingClientRect": sample_rect(),
        })
    }

    pub fn sample_payload(width: u32, elements: Vec<Value>) -> Value {
        json!({
            "uuid": "a2b6a1a4-3b0a-4e4f-9f5c-1f2e3d4c5b6a",
            "etag": SAMPLE_ETAG,
            "url": "https://example.com/",
            "viewport": {"width": width, "height": 800},
            "timestamp": 1_700_000_000.5,
            "elements": elements,
        })
    }

    fn schema() -> UrlMetricSchema {
        UrlMetricSchema::builder().build()
    }

    #[test]
    fn test_valid_payload_round_trips() {
        let payload = sample_payload(
            400,
            vec![sample_element("/*[1][self::HTML]/*[2][self::BODY]/*[1][self::IMG]", true, 1.0)],
        );
        let metric = UrlMetric::new(&payload, &schema()).unwrap();
        assert_eq!(metric.to_value(), payload);
        assert_eq!(metric.viewport_width(), 400);
        assert!(metric.lcp_element().is_some());
    }

    #[test]
    fn test_integer_ratios_are_normalized() {
        let mut payload = sample_payload(
            400,
            vec![sample_element("/*[1][self::HTML]", false, 0.0)],
        );
        payload["elements"][0]["intersectionRatio"] = json!(1);
        let metric = UrlMetric::new(&payload, &schema()).unwrap();
        assert_eq!(metric.to_value()["elements"][0]["intersectionRatio"], json!(1.0));
    }

    #[test]
    fn test_multiple_lcp_elements_rejected() {
        let payload = sample_payload(
            400,
            vec![
                sample_element("/*[1][self::HTML]/*[2][self::BODY]/*[1][self::IMG]", true, 1.0),
                sample_element("/*[1][self::HTML]/*[2][self::BODY]/*[2][self::IMG]", true, 1.0),
            ],
        );
        let err = UrlMetric::new(&payload, &schema()).unwrap_err();
        assert_eq!(
            err.message(),
            "UrlMetric[elements] must not contain more than one LCP element."
        );
    }

    #[test]
    fn test_missing_viewport_rejected() {
        let mut payload = sample_payload(400, vec![]);
        payload.as_object_mut().unwrap().remove("viewport");
        let err = UrlMetric::new(&payload, &schema()).unwrap_err();
        assert_eq!(err.message(), "viewport is a required property of UrlMetric.");
    }

    #[test]
    fn test_bad_xpath_reports_element_path() {
        let payload = sample_payload(400, vec![sample_element("//img", false, 0.0)]);
        let err = UrlMetric::new(&payload, &schema()).unwrap_err();
        assert_eq!(err.field_path(), "UrlMetric[elements][0][xpath]");
        assert!(err.message().contains("does not match pattern"));
    }

    #[test]
    fn test_ratio_out_of_range_rejected() {
        let payload = sample_payload(400, vec![sample_element("/*[1][self::HTML]", false, 1.5)]);
        let err = UrlMetric::new(&payload, &schema()).unwrap_err();
        assert_eq!(
            err.message(),
            "UrlMetric[elements][0][intersectionRatio] must be less than or equal to 1."
        );
    }

    #[test]
    fn test_negative_rect_component_rejected() {
        let mut element = sample_element("/*[1][self::HTML]", false, 0.0);
        element["boundingClientRect"]["top"] = json!(-3.0);
        let payload = sample_payload(400, vec![element]);
        let err = UrlMetric::new(&payload, &schema()).unwrap_err();
        assert_eq!(err.field_path(), "UrlMetric[elements][0][boundingClientRect][top]");
    }

    #[test]
    fn test_unknown_root_property_rejected() {
        let mut payload = sample_payload(400, vec![]);
        payload["foo"] = json!("bar");
        let err = UrlMetric::new(&payload, &schema()).unwrap_err();
        assert_eq!(err.message(), "foo is not a valid property of Object.");
    }

    #[test]
    fn test_url_too_long_rejected() {
        let mut payload = sample_payload(400, vec![]);
        payload["url"] = json!(format!("https://example.com/{}", "a".repeat(500)));
        let err = UrlMetric::new(&payload, &schema()).unwrap_err();
        assert_eq!(err.message(), "UrlMetric[url] must be at most 500 characters long.");
    }

    #[test]
    fn test_extension_element_property_is_optional_and_kept() {
        let mut builder = UrlMetricSchema::builder();
        builder.add_element_property("resizedBoundingClientRect", dom_rect_schema().required());
        let schema = builder.build();

        let bare = sample_payload(400, vec![sample_element("/*[1][self::HTML]", false, 0.0)]);
        assert!(UrlMetric::new(&bare, &schema).is_ok());

        let mut extended = bare.clone();
        extended["elements"][0]["resizedBoundingClientRect"] = sample_rect();
        let metric = UrlMetric::new(&extended, &schema).unwrap();
        assert_eq!(metric.elements()[0].extra["resizedBoundingClientRect"], sample_rect());
        assert_eq!(metric.to_value(), extended);
    }

    #[test]
    fn test_core_properties_cannot_be_overridden() {
        let mut builder = UrlMetricSchema::builder();
        builder.add_root_property("url", Schema::string());
        let schema = builder.build();
        let mut payload = sample_payload(400, vec![]);
        payload["url"] = json!("ftp://example.com/");
        assert!(UrlMetric::new(&payload, &schema).is_err());
    }
}
