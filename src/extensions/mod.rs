//! Extension hooks: extensions contribute tag visitors and URL Metric
//! schema properties.

pub mod images;

use std::sync::Arc;

use crate::url_metric::{UrlMetricSchema, UrlMetricSchemaBuilder};
use crate::visitor::TagVisitorRegistry;

pub use images::ImageExtension;

pub trait Extension: Send + Sync {
    fn id(&self) -> &str;

    fn register_tag_visitors(&self, registry: &mut TagVisitorRegistry);

    /// Adds root or element properties to the URL Metric schema.
    fn extend_schema(&self, _builder: &mut UrlMetricSchemaBuilder) {}
}

/// The extensions active in this process, in load order.
#[derive(Clone, Default)]
pub struct Extensions {
    extensions: Vec<Arc<dyn Extension>>,
}

impl Extensions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The extensions shipped with the crate.
    pub fn builtin() -> Self {
        let mut extensions = Self::new();
        extensions.push(Arc::new(ImageExtension));
        extensions
    }

    pub fn push(&mut self, extension: Arc<dyn Extension>) {
        self.extensions.push(extension);
    }

    pub fn ids(&self) -> Vec<&str> {
        self.extensions.iter().map(|e| e.id()).collect()
    }

    /// A fresh registry populated by every extension.
    pub fn tag_visitors(&self) -> TagVisitorRegistry {
        let mut registry = TagVisitorRegistry::new();
        for extension in &self.extensions {
            extension.register_tag_visitors(&mut registry);
        }
        registry
    }

    /// The URL Metric schema with every extension's properties added.
    pub fn schema(&self) -> UrlMetricSchema {
        let mut builder = UrlMetricSchema::builder();
        for extension in &self.extensions {
            extension.extend_schema(&mut builder);
        }
        builder.build()
    }
}

impl std::fmt::Debug for Extensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.ids()).finish()
    }
}
