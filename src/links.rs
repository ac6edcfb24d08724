//! Preload links gathered while visiting tags.

use crate::html::tag::escape_attribute;

#[derive(Debug, Clone, PartialEq)]
struct Link {
    attributes: Vec<(String, String)>,
    minimum_viewport_width: u32,
    /// Exclusive; `None` for the widest group.
    maximum_viewport_width: Option<u32>,
}

#[derive(Debug, Clone, Default)]
pub struct LinkCollection {
    links: Vec<Link>,
}

impl LinkCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_link(
        &mut self,
        attributes: Vec<(String, String)>,
        minimum_viewport_width: u32,
        maximum_viewport_width: Option<u32>,
    ) {
        self.links.push(Link {
            attributes,
            minimum_viewport_width,
            maximum_viewport_width,
        });
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Links with identical attributes whose viewport ranges touch are
    /// folded into one link spanning both ranges.
    fn merged(&self) -> Vec<Link> {
        let mut sorted = self.links.clone();
        sorted.sort_by_key(|l| l.minimum_viewport_width);

        let mut merged: Vec<Link> = Vec::new();
        for link in sorted {
            let duplicate = merged.contains(&link);
            let adjacent = merged.iter_mut().find(|m| {
                m.attributes == link.attributes
                    && m.maximum_viewport_width == Some(link.minimum_viewport_width)
            });
            match adjacent {
                Some(existing) => existing.maximum_viewport_width = link.maximum_viewport_width,
                None if duplicate => {}
                None => merged.push(link),
            }
        }
        merged
    }

    pub fn to_html(&self) -> String {
        let mut html = String::new();
        for link in self.merged() {
            html.push_str("<link data-od-added-tag");
            for (name, value) in &link.attributes {
                html.push_str(&format!(" {}=\"{}\"", name, escape_attribute(value)));
            }
            if let Some(media) = media_query(link.minimum_viewport_width, link.maximum_viewport_width) {
                html.push_str(&format!(" media=\"{}\"", media));
            }
            html.push_str(">\n");
        }
        html
    }
}

fn media_query(minimum: u32, maximum: Option<u32>) -> Option<String> {
    let mut parts = Vec::new();
    if minimum > 0 {
        parts.push(format!("(min-width: {}px)", minimum));
    }
    if let Some(maximum) = maximum {
        parts.push(format!("(max-width: {}px)", maximum.saturating_sub(1)));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" and "))
    }
}
