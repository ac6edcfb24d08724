//! Built-in image prioritization: eager/lazy loading, fetch priority and
//! preload links for LCP images.

use regex::Regex;
use serde::Deserialize;
use std::sync::{Arc, LazyLock};
use tracing::debug;

use super::Extension;
use crate::group::UrlMetricGroup;
use crate::html::Tag;
use crate::schema::{Format, Pattern, Schema};
use crate::url_metric::{UrlMetricSchemaBuilder, URL_MAX_LENGTH};
use crate::visitor::{TagVisitContext, TagVisitor, TagVisitorRegistry};

pub const EXTERNAL_BACKGROUND_IMAGE_PROPERTY: &str = "lcpElementExternalBackgroundImage";

static HTTP_URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://").expect("valid http url regex"));

static TAG_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9\-]+\z").expect("valid tag name regex"));

static BACKGROUND_IMAGE_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)background(?:-image)?\s*:[^;]*?url\(\s*['"]?([^'")]+?)['"]?\s*\)"#)
        .expect("valid background-image regex")
});

static LEADING_AUTO_SIZES: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^\s*auto\s*,?\s*").expect("valid sizes regex"));

pub struct ImageExtension;

impl Extension for ImageExtension {
    fn id(&self) -> &str {
        "image"
    }

    fn register_tag_visitors(&self, registry: &mut TagVisitorRegistry) {
        registry.register("image/img", Arc::new(ImgTagVisitor));
        registry.register("image/background-image", Arc::new(BackgroundImageTagVisitor));
    }

    fn extend_schema(&self, builder: &mut UrlMetricSchemaBuilder) {
        builder.add_root_property(
            EXTERNAL_BACKGROUND_IMAGE_PROPERTY,
            external_background_image_schema(),
        );
    }
}

/// Shape of an LCP background image loaded from a stylesheet rather than an
/// inline style.
pub fn external_background_image_schema() -> Schema {
    Schema::object()
        .property(
            "url",
            Schema::string()
                .max_length(URL_MAX_LENGTH)
                .pattern(Pattern::from_regex(&HTTP_URL_PATTERN))
                .format(Format::Uri)
                .required(),
        )
        .property(
            "tag",
            Schema::string()
                .max_length(100)
                .pattern(Pattern::from_regex(&TAG_NAME_PATTERN))
                .required(),
        )
        .property("id", Schema::string().nullable().max_length(100).required())
        .property("class", Schema::string().nullable().max_length(500).required())
        .additional_properties(false)
}

fn is_data_url(url: &str) -> bool {
    url.trim_start()
        .get(..5)
        .is_some_and(|scheme| scheme.eq_ignore_ascii_case("data:"))
}

/// Groups whose LCP element is the tag at `xpath`.
fn groups_with_lcp_at<'g>(
    groups: &'g [UrlMetricGroup],
    xpath: &'g str,
) -> impl Iterator<Item = &'g UrlMetricGroup> + 'g {
    groups
        .iter()
        .filter(move |g| g.lcp_element().is_some_and(|e| e.xpath == xpath))
}

struct ImgTagVisitor;

impl TagVisitor for ImgTagVisitor {
    fn matches(&self, tag: &Tag) -> bool {
        tag.name() == "IMG"
            && tag
                .get_attribute("src")
                .is_some_and(|src| !src.trim().is_empty() && !is_data_url(src))
    }

    fn visit(&self, ctx: &mut TagVisitContext<'_>) -> bool {
        let xpath = ctx.xpath().to_string();
        let groups = ctx.groups;

        let is_common_lcp = groups
            .common_lcp_element()
            .is_some_and(|lcp| lcp.xpath == xpath);
        let fetchpriority = ctx.tag.get_attribute("fetchpriority").map(str::to_string);
        if is_common_lcp {
            if fetchpriority.as_deref() == Some("high") {
                ctx.tag
                    .set_boolean_attribute("data-od-fetchpriority-already-added");
            } else {
                ctx.tag.set_attribute("fetchpriority", "high");
                ctx.tag.set_boolean_attribute("data-od-added-fetchpriority");
            }
        } else if let Some(previous) = fetchpriority {
            if groups.is_every_group_populated() {
                ctx.tag.remove_attribute("fetchpriority");
                ctx.tag
                    .set_attribute("data-od-removed-fetchpriority", &previous);
            }
        }

        let is_lazy = ctx.tag.get_attribute("loading") == Some("lazy");
        let mut removed_lazy = false;
        match groups.element_max_intersection_ratio(&xpath) {
            Some(ratio) if ratio > 0.0 && is_lazy => {
                ctx.tag.remove_attribute("loading");
                ctx.tag.set_attribute("data-od-removed-loading", "lazy");
                removed_lazy = true;
            }
            Some(ratio) if ratio == 0.0 && !is_lazy && groups.is_every_group_populated() => {
                ctx.tag.set_attribute("loading", "lazy");
                ctx.tag.set_boolean_attribute("data-od-added-loading");
            }
            _ => {}
        }

        if removed_lazy {
            if let Some(sizes) = ctx.tag.get_attribute("sizes").map(str::to_string) {
                if LEADING_AUTO_SIZES.is_match(&sizes) {
                    let replaced = LEADING_AUTO_SIZES.replace(&sizes, "").into_owned();
                    ctx.tag.set_attribute("sizes", &replaced);
                    ctx.tag.set_attribute("data-od-replaced-sizes", &sizes);
                }
            }
        }

        let mut link = vec![
            ("rel".to_string(), "preload".to_string()),
            ("fetchpriority".to_string(), "high".to_string()),
            ("as".to_string(), "image".to_string()),
        ];
        for (source, target) in [
            ("src", "href"),
            ("srcset", "imagesrcset"),
            ("sizes", "imagesizes"),
            ("crossorigin", "crossorigin"),
        ] {
            if let Some(value) = ctx.tag.get_attribute(source) {
                if !value.trim().is_empty() {
                    link.push((target.to_string(), value.to_string()));
                }
            }
        }

        let lcp_groups: Vec<(u32, Option<u32>)> = groups_with_lcp_at(groups.groups(), &xpath)
            .map(|g| (g.minimum_viewport_width(), g.maximum_viewport_width()))
            .collect();
        for (minimum, maximum) in lcp_groups {
            ctx.links().add_link(link.clone(), minimum, maximum);
        }

        debug!(xpath = %xpath, removed_lazy, is_common_lcp, "Visited IMG");
        true
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
struct ExternalBackgroundImage {
    url: String,
    tag: String,
    id: Option<String>,
    class: Option<String>,
}

/// The external background image every metric in `group` agrees on.
fn common_external_background_image(group: &UrlMetricGroup) -> Option<ExternalBackgroundImage> {
    let mut common: Option<ExternalBackgroundImage> = None;
    for metric in group.metrics() {
        let value = metric.extension_property(EXTERNAL_BACKGROUND_IMAGE_PROPERTY)?;
        let image: ExternalBackgroundImage = serde_json::from_value(value.clone()).ok()?;
        match &common {
            Some(existing) if *existing != image => return None,
            Some(_) => {}
            None => common = Some(image),
        }
    }
    common
}

fn preload_link(href: &str) -> Vec<(String, String)> {
    vec![
        ("rel".to_string(), "preload".to_string()),
        ("fetchpriority".to_string(), "high".to_string()),
        ("as".to_string(), "image".to_string()),
        ("href".to_string(), href.to_string()),
    ]
}

struct BackgroundImageTagVisitor;

impl BackgroundImageTagVisitor {
    /// Preloads a stylesheet background image for groups whose recorded
    /// element identity matches this tag.
    fn preload_external(&self, ctx: &mut TagVisitContext<'_>) {
        let groups = ctx.groups;
        let mut matched = Vec::new();
        for group in groups.groups() {
            let Some(image) = common_external_background_image(group) else {
                continue;
            };
            let same_tag = image.tag.eq_ignore_ascii_case(ctx.tag.name());
            let same_id = image.id.as_deref() == ctx.tag.get_attribute("id");
            let same_class = image.class.as_deref() == ctx.tag.get_attribute("class");
            if same_tag && same_id && same_class {
                matched.push((
                    image.url,
                    group.minimum_viewport_width(),
                    group.maximum_viewport_width(),
                ));
            }
        }
        for (url, minimum, maximum) in matched {
            ctx.links().add_link(preload_link(&url), minimum, maximum);
        }
    }
}

impl TagVisitor for BackgroundImageTagVisitor {
    /// External background images can sit on any tag, so every tag is
    /// offered; only inline background styles count as handled.
    fn matches(&self, tag: &Tag) -> bool {
        tag.name() != "IMG"
    }

    fn visit(&self, ctx: &mut TagVisitContext<'_>) -> bool {
        self.preload_external(ctx);

        let url = ctx
            .tag
            .get_attribute("style")
            .and_then(|style| BACKGROUND_IMAGE_URL.captures(style))
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().trim().to_string());
        let Some(url) = url.filter(|u| !is_data_url(u)) else {
            return false;
        };

        let xpath = ctx.xpath().to_string();
        let lcp_groups: Vec<(u32, Option<u32>)> = groups_with_lcp_at(ctx.groups.groups(), &xpath)
            .map(|g| (g.minimum_viewport_width(), g.maximum_viewport_width()))
            .collect();
        for (minimum, maximum) in lcp_groups {
            ctx.links().add_link(preload_link(&url), minimum, maximum);
        }
        true
    }
}
