//! Tag visitors and the registry that dispatches tags to them.

use std::collections::HashMap;
use std::sync::Arc;

use crate::group::UrlMetricGroupCollection;
use crate::html::{Tag, TagMut};
use crate::links::LinkCollection;

/// Output accumulated across the whole walk.
#[derive(Debug, Default)]
pub struct VisitCollector {
    pub links: LinkCollection,
    detection_required: bool,
}

impl VisitCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_detection_required(&self) -> bool {
        self.detection_required
    }
}

/// What a visitor can see and change while handling one tag.
pub struct TagVisitContext<'a> {
    pub tag: TagMut<'a>,
    pub groups: &'a UrlMetricGroupCollection,
    collector: &'a mut VisitCollector,
}

impl<'a> TagVisitContext<'a> {
    pub fn new(
        tag: TagMut<'a>,
        groups: &'a UrlMetricGroupCollection,
        collector: &'a mut VisitCollector,
    ) -> Self {
        Self {
            tag,
            groups,
            collector,
        }
    }

    pub fn xpath(&self) -> &str {
        self.tag.xpath()
    }

    pub fn links(&mut self) -> &mut LinkCollection {
        &mut self.collector.links
    }

    /// Forces the detection script onto the page even if every group is
    /// complete.
    pub fn require_detection(&mut self) {
        self.collector.detection_required = true;
    }
}

pub trait TagVisitor: Send + Sync {
    fn matches(&self, tag: &Tag) -> bool;

    /// Returns `true` when the tag was handled and later visitors should
    /// not see it.
    fn visit(&self, ctx: &mut TagVisitContext<'_>) -> bool;
}

/// Visitors in registration order, addressable by id.
#[derive(Default, Clone)]
pub struct TagVisitorRegistry {
    visitors: Vec<(String, Arc<dyn TagVisitor>)>,
    index: HashMap<String, usize>,
}

impl TagVisitorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `visitor` under `id`. An existing id keeps its position
    /// and gets the new visitor.
    pub fn register(&mut self, id: &str, visitor: Arc<dyn TagVisitor>) {
        match self.index.get(id) {
            Some(&position) => self.visitors[position].1 = visitor,
            None => {
                self.index.insert(id.to_string(), self.visitors.len());
                self.visitors.push((id.to_string(), visitor));
            }
        }
    }

    pub fn unregister(&mut self, id: &str) -> bool {
        let Some(position) = self.index.remove(id) else {
            return false;
        };
        self.visitors.remove(position);
        for slot in self.index.values_mut() {
            if *slot > position {
                *slot -= 1;
            }
        }
        true
    }

    pub fn is_registered(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn TagVisitor>> {
        self.index.get(id).map(|&i| Arc::clone(&self.visitors[i].1))
    }

    pub fn len(&self) -> usize {
        self.visitors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visitors.is_empty()
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.visitors.iter().map(|(id, _)| id.as_str()).collect();
        ids.sort_unstable();
        ids
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Arc<dyn TagVisitor>)> {
        self.visitors.iter().map(|(id, v)| (id.as_str(), v))
    }
}

impl std::fmt::Debug for TagVisitorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TagVisitorRegistry")
            .field("ids", &self.ids())
            .finish()
    }
}
