//! Rewrites outgoing HTML based on the URL Metrics gathered for its URL.
//!
//! Every failure along the way leaves the page exactly as it was produced.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::{
    DetectiveConfig, DETECTION_TIME_WINDOW_MS, MAX_VIEWPORT_ASPECT_RATIO,
    MIN_VIEWPORT_ASPECT_RATIO, SCHEMA_VERSION,
};
use crate::detection::{detection_script, DetectionArgs, DETECTION_SCRIPT_ID};
use crate::extensions::Extensions;
use crate::group::UrlMetricGroupCollection;
use crate::html::Document;
use crate::store::{normalize_url, url_metrics_slug, UrlMetricsStore};
use crate::url_metric::current_timestamp;
use crate::visitor::{TagVisitContext, TagVisitor, TagVisitorRegistry, VisitCollector};

#[derive(Debug, Clone, PartialEq)]
pub enum Emission<'a> {
    Unmodified(&'a str),
    Modified(String),
}

impl Emission<'_> {
    pub fn as_str(&self) -> &str {
        match self {
            Emission::Unmodified(html) => html,
            Emission::Modified(html) => html,
        }
    }

    pub fn is_modified(&self) -> bool {
        matches!(self, Emission::Modified(_))
    }

    pub fn into_string(self) -> String {
        match self {
            Emission::Unmodified(html) => html.to_string(),
            Emission::Modified(html) => html,
        }
    }
}

/// Fingerprint of everything that decides how metrics are interpreted.
/// Metrics gathered under another fingerprint are not reused.
pub fn compute_etag(visitor_ids: &[&str], breakpoints: &[u32], schema_version: u32) -> String {
    let mut ids = visitor_ids.to_vec();
    ids.sort_unstable();
    let data = json!({
        "tagVisitors": ids,
        "breakpoints": breakpoints,
        "schemaVersion": schema_version,
    });
    hex::encode(Sha256::digest(data.to_string().as_bytes()))
}

/// Advertises the optimizer and its version in the page head.
pub fn generator_meta_tag() -> String {
    format!(
        "<meta name=\"generator\" content=\"{} {}\">\n",
        GENERATOR_NAME,
        env!("CARGO_PKG_VERSION")
    )
}

const GENERATOR_NAME: &str = "optimization-detective";

fn has_generator_meta_tag(doc: &Document<'_>) -> bool {
    doc.tags().iter().any(|t| {
        t.name() == "META"
            && t.get_attribute("name") == Some("generator")
            && t
                .get_attribute("content")
                .is_some_and(|c| c.starts_with(GENERATOR_NAME))
    })
}

pub struct Optimizer<'s> {
    config: &'s DetectiveConfig,
    store: &'s UrlMetricsStore,
    extensions: &'s Extensions,
}

impl<'s> Optimizer<'s> {
    pub fn new(
        config: &'s DetectiveConfig,
        store: &'s UrlMetricsStore,
        extensions: &'s Extensions,
    ) -> Self {
        Self {
            config,
            store,
            extensions,
        }
    }

    pub fn current_etag(&self) -> String {
        let registry = self.extensions.tag_visitors();
        compute_etag(&registry.ids(), &self.config.breakpoints, SCHEMA_VERSION)
    }

    pub fn optimize<'h>(&self, url: &str, html: &'h str) -> Emission<'h> {
        let mut doc = match Document::parse(html) {
            Ok(doc) => doc,
            Err(e) => {
                warn!(url = %url, "Leaving page unoptimized, HTML could not be scanned: {}", e);
                return Emission::Unmodified(html);
            }
        };
        if !doc.has_element("HTML") {
            debug!(url = %url, "No <html> start tag, leaving buffer alone");
            return Emission::Unmodified(html);
        }

        let slug = match normalize_url(url) {
            Ok(normalized) => url_metrics_slug(&normalized),
            Err(e) => {
                warn!(url = %url, "Leaving page unoptimized, bad URL: {}", e);
                return Emission::Unmodified(html);
            }
        };

        let registry = self.extensions.tag_visitors();
        let schema = self.extensions.schema();
        let etag = compute_etag(&registry.ids(), &self.config.breakpoints, SCHEMA_VERSION);

        let groups = match self.store.get(url, &etag, &schema) {
            Ok(groups) => groups,
            Err(e) => {
                warn!(url = %url, "Leaving page unoptimized, URL Metrics unavailable: {}", e);
                return Emission::Unmodified(html);
            }
        };
        let needs_detection = !groups.is_every_group_complete();

        let mut collector = VisitCollector::new();
        let handled = walk(&mut doc, &registry, &groups, &mut collector, needs_detection);
        debug!(
            url = %url,
            handled,
            metrics = groups.len(),
            needs_detection,
            "Visited tags"
        );

        let mut head_markup = String::new();
        if !has_generator_meta_tag(&doc) {
            head_markup.push_str(&generator_meta_tag());
        }
        head_markup.push_str(&collector.links.to_html());
        if !head_markup.is_empty() {
            match doc.head_end() {
                Some(offset) => doc.insert_html(offset, head_markup),
                None => debug!(url = %url, "No </head>, skipping head markup"),
            }
        }

        let already_detecting = doc
            .tags()
            .iter()
            .any(|t| t.name() == "SCRIPT" && t.get_attribute("id") == Some(DETECTION_SCRIPT_ID));
        if (needs_detection || collector.is_detection_required()) && !already_detecting {
            let args = DetectionArgs {
                serve_time: current_timestamp() * 1000.0,
                detection_time_window: DETECTION_TIME_WINDOW_MS,
                min_viewport_aspect_ratio: MIN_VIEWPORT_ASPECT_RATIO,
                max_viewport_aspect_ratio: MAX_VIEWPORT_ASPECT_RATIO,
                is_debug: self.config.debug,
                rest_api_endpoint: self.config.rest_api_endpoint.clone(),
                current_url: url.to_string(),
                url_metric_slug: slug,
                current_etag: etag,
                url_metric_group_statuses: groups.group_statuses(),
                storage_lock_ttl: self.config.storage_lock_ttl_secs,
            };
            match detection_script(&self.config.detect_module_url, &args) {
                Ok(script) => {
                    let offset = doc.body_end().unwrap_or(html.len());
                    doc.insert_html(offset, script);
                }
                Err(e) => warn!(url = %url, "Failed to encode detection script: {}", e),
            }
        }

        if !doc.is_modified() {
            return Emission::Unmodified(html);
        }
        match doc.render() {
            Ok(rendered) => Emission::Modified(rendered),
            Err(e) => {
                warn!(url = %url, "Leaving page unoptimized, edits could not be applied: {}", e);
                Emission::Unmodified(html)
            }
        }
    }
}

/// Offers each tag to the registered visitors in order until one handles
/// it. Returns the number of handled tags.
pub(crate) fn walk(
    doc: &mut Document<'_>,
    registry: &TagVisitorRegistry,
    groups: &UrlMetricGroupCollection,
    collector: &mut VisitCollector,
    track_xpaths: bool,
) -> usize {
    let mut handled = 0;
    for index in 0..doc.tags().len() {
        let candidates: Vec<Arc<dyn TagVisitor>> = registry
            .iter()
            .filter(|(_, visitor)| visitor.matches(&doc.tags()[index]))
            .map(|(_, visitor)| Arc::clone(visitor))
            .collect();

        for visitor in candidates {
            let Some(tag) = doc.tag_mut(index) else {
                break;
            };
            let mut ctx = TagVisitContext::new(tag, groups, collector);
            if !visitor.visit(&mut ctx) {
                continue;
            }

            handled += 1;
            if track_xpaths {
                let xpath = ctx.xpath().to_string();
                ctx.tag.set_attribute("data-od-xpath", &xpath);
            }
            break;
        }
    }
    handled
}
