//! URL Metrics partitioned into viewport-width groups.

use serde::Serialize;

use crate::config::GroupLimits;
use crate::url_metric::{ElementData, UrlMetric};

/// Bucket of URL Metrics for viewports in `[minimum, maximum)`.
#[derive(Debug, Clone)]
pub struct UrlMetricGroup {
    minimum_viewport_width: u32,
    maximum_viewport_width: Option<u32>,
    limits: GroupLimits,
    now: f64,
    metrics: Vec<UrlMetric>,
}

impl UrlMetricGroup {
    fn new(minimum: u32, maximum: Option<u32>, limits: GroupLimits, now: f64) -> Self {
        Self {
            minimum_viewport_width: minimum,
            maximum_viewport_width: maximum,
            limits,
            now,
            metrics: Vec::new(),
        }
    }

    pub fn minimum_viewport_width(&self) -> u32 {
        self.minimum_viewport_width
    }

    /// Exclusive upper bound; `None` for the widest group.
    pub fn maximum_viewport_width(&self) -> Option<u32> {
        self.maximum_viewport_width
    }

    pub fn is_viewport_width_within(&self, width: u32) -> bool {
        width >= self.minimum_viewport_width
            && self.maximum_viewport_width.map_or(true, |max| width < max)
    }

    pub fn metrics(&self) -> &[UrlMetric] {
        &self.metrics
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Appends in arrival order, dropping the oldest past capacity.
    fn push(&mut self, metric: UrlMetric) {
        self.metrics.push(metric);
        if self.metrics.len() > self.limits.capacity {
            let excess = self.metrics.len() - self.limits.capacity;
            self.metrics.drain(..excess);
        }
    }

    fn is_fresh(&self, metric: &UrlMetric) -> bool {
        self.now - metric.timestamp() < self.limits.freshness_ttl_secs as f64
    }

    /// Enough fresh samples to trust this group without more measurement.
    pub fn is_complete(&self) -> bool {
        let fresh = self.metrics.iter().filter(|m| self.is_fresh(m)).count();
        fresh >= self.limits.sample_size
    }

    /// The element most often reported as LCP across this group's metrics.
    pub fn lcp_element(&self) -> Option<&ElementData> {
        let mut counts: Vec<(&ElementData, usize)> = Vec::new();
        for lcp in self.metrics.iter().filter_map(UrlMetric::lcp_element) {
            match counts.iter_mut().find(|(e, _)| e.xpath == lcp.xpath) {
                Some((_, count)) => *count += 1,
                None => counts.push((lcp, 1)),
            }
        }

        let mut best: Option<(&ElementData, usize)> = None;
        for (element, count) in counts {
            if best.map_or(true, |(_, best_count)| count > best_count) {
                best = Some((element, count));
            }
        }
        best.map(|(element, _)| element)
    }

    fn prune_older_than(&mut self, cutoff: f64) -> usize {
        let before = self.metrics.len();
        self.metrics.retain(|m| m.timestamp() >= cutoff);
        before - self.metrics.len()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupStatus {
    pub minimum_viewport_width: u32,
    pub maximum_viewport_width: Option<u32>,
    pub complete: bool,
}

/// Every group for one URL, derived from the configured breakpoints.
#[derive(Debug, Clone)]
pub struct UrlMetricGroupCollection {
    breakpoints: Vec<u32>,
    groups: Vec<UrlMetricGroup>,
}

impl UrlMetricGroupCollection {
    /// `breakpoints` must be strictly increasing; see
    /// [`crate::config::validate_breakpoints`].
    pub fn new(breakpoints: &[u32], limits: &GroupLimits, now: f64) -> Self {
        let mut groups = Vec::with_capacity(breakpoints.len() + 1);
        let mut minimum = 0;
        for &breakpoint in breakpoints {
            groups.push(UrlMetricGroup::new(minimum, Some(breakpoint), limits.clone(), now));
            minimum = breakpoint;
        }
        groups.push(UrlMetricGroup::new(minimum, None, limits.clone(), now));

        Self {
            breakpoints: breakpoints.to_vec(),
            groups,
        }
    }

    pub fn with_metrics(
        breakpoints: &[u32],
        limits: &GroupLimits,
        now: f64,
        metrics: impl IntoIterator<Item = UrlMetric>,
    ) -> Self {
        let mut collection = Self::new(breakpoints, limits, now);
        for metric in metrics {
            collection.add(metric);
        }
        collection
    }

    pub fn breakpoints(&self) -> &[u32] {
        &self.breakpoints
    }

    pub fn groups(&self) -> &[UrlMetricGroup] {
        &self.groups
    }

    /// Index of the group a viewport width falls into: the number of
    /// breakpoints at or below it.
    pub fn group_index_for_width(&self, width: u32) -> usize {
        self.breakpoints.partition_point(|&b| b <= width)
    }

    pub fn group_for_viewport_width(&self, width: u32) -> &UrlMetricGroup {
        &self.groups[self.group_index_for_width(width)]
    }

    pub fn add(&mut self, metric: UrlMetric) {
        let index = self.group_index_for_width(metric.viewport_width());
        self.groups[index].push(metric);
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(UrlMetricGroup::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.iter().all(UrlMetricGroup::is_empty)
    }

    pub fn groups_needing_measurement(&self) -> Vec<&UrlMetricGroup> {
        self.groups.iter().filter(|g| !g.is_complete()).collect()
    }

    pub fn is_every_group_complete(&self) -> bool {
        self.groups.iter().all(UrlMetricGroup::is_complete)
    }

    pub fn is_every_group_populated(&self) -> bool {
        self.groups.iter().all(|g| !g.is_empty())
    }

    pub fn is_any_group_populated(&self) -> bool {
        self.groups.iter().any(|g| !g.is_empty())
    }

    /// The LCP element shared by every group, if all groups agree.
    pub fn common_lcp_element(&self) -> Option<&ElementData> {
        if !self.is_every_group_populated() {
            return None;
        }
        let mut common: Option<&ElementData> = None;
        for group in &self.groups {
            let lcp = group.lcp_element()?;
            match common {
                Some(existing) if existing.xpath != lcp.xpath => return None,
                Some(_) => {}
                None => common = Some(lcp),
            }
        }
        common
    }

    /// Largest intersection ratio observed for `xpath` in any metric.
    pub fn element_max_intersection_ratio(&self, xpath: &str) -> Option<f64> {
        self.flatten_elements()
            .filter(|element| element.xpath == xpath)
            .map(|element| element.intersection_ratio)
            .reduce(f64::max)
    }

    fn flatten_elements(&self) -> impl Iterator<Item = &ElementData> {
        self.groups
            .iter()
            .flat_map(|g| g.metrics.iter())
            .flat_map(|m| m.elements().iter())
    }

    pub fn group_statuses(&self) -> Vec<GroupStatus> {
        self.groups
            .iter()
            .map(|g| GroupStatus {
                minimum_viewport_width: g.minimum_viewport_width,
                maximum_viewport_width: g.maximum_viewport_width,
                complete: g.is_complete(),
            })
            .collect()
    }

    /// Drops metrics created before `cutoff`; returns how many went.
    pub fn prune_older_than(&mut self, cutoff: f64) -> usize {
        self.groups
            .iter_mut()
            .map(|g| g.prune_older_than(cutoff))
            .sum()
    }

    pub fn latest_timestamp(&self) -> Option<f64> {
        self.groups
            .iter()
            .flat_map(|g| g.metrics.iter())
            .map(UrlMetric::timestamp)
            .reduce(f64::max)
    }

    /// All metrics, group order then arrival order.
    pub fn flatten(&self) -> Vec<&UrlMetric> {
        self.groups.iter().flat_map(|g| g.metrics.iter()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::url_metric::tests::{sample_element, sample_payload};
    use crate::url_metric::UrlMetricSchema;
    use serde_json::json;

    const IMG: &str = "/*[1][self::HTML]/*[2][self::BODY]/*[1][self::IMG]";
    const DIV: &str = "/*[1][self::HTML]/*[2][self::BODY]/*[2][self::DIV]";
    const NOW: f64 = 1_700_000_100.0;

    fn metric(width: u32, timestamp: f64, elements: Vec<serde_json::Value>) -> UrlMetric {
        let mut payload = sample_payload(width, elements);
        payload["timestamp"] = json!(timestamp);
        UrlMetric::new(&payload, &UrlMetricSchema::builder().build()).unwrap()
    }

    fn limits() -> GroupLimits {
        GroupLimits {
            sample_size: 2,
            capacity: 2,
            freshness_ttl_secs: 60,
        }
    }

    fn collection() -> UrlMetricGroupCollection {
        UrlMetricGroupCollection::new(&[480, 600, 782], &limits(), NOW)
    }

    #[test]
    fn test_groups_partition_width_range() {
        let c = collection();
        assert_eq!(c.groups().len(), 4);
        assert_eq!(c.groups()[0].minimum_viewport_width(), 0);
        for pair in c.groups().windows(2) {
            assert_eq!(pair[0].maximum_viewport_width(), Some(pair[1].minimum_viewport_width()));
        }
        assert_eq!(c.groups()[3].maximum_viewport_width(), None);

        for width in [0, 1, 479, 480, 481, 599, 600, 781, 782, 783, 5000, u32::MAX] {
            let owning: Vec<_> = c
                .groups()
                .iter()
                .filter(|g| g.is_viewport_width_within(width))
                .collect();
            assert_eq!(owning.len(), 1, "width {} must map to exactly one group", width);
            assert!(c.group_for_viewport_width(width).is_viewport_width_within(width));
        }
    }

    #[test]
    fn test_breakpoint_width_belongs_to_upper_group() {
        let c = collection();
        assert_eq!(c.group_index_for_width(479), 0);
        assert_eq!(c.group_index_for_width(480), 1);
        assert_eq!(c.group_index_for_width(782), 3);
    }

    #[test]
    fn test_capacity_drops_oldest_and_keeps_order() {
        let mut c = collection();
        for ts in [NOW - 3.0, NOW - 2.0, NOW - 1.0] {
            c.add(metric(400, ts, vec![]));
        }
        let group = c.group_for_viewport_width(400);
        assert_eq!(group.len(), 2);
        let stamps: Vec<f64> = group.metrics().iter().map(UrlMetric::timestamp).collect();
        assert_eq!(stamps, vec![NOW - 2.0, NOW - 1.0]);
    }

    #[test]
    fn test_completeness_requires_fresh_samples() {
        let mut c = collection();
        c.add(metric(400, NOW - 10.0, vec![]));
        assert!(!c.group_for_viewport_width(400).is_complete());
        c.add(metric(400, NOW - 5.0, vec![]));
        assert!(c.group_for_viewport_width(400).is_complete());

        let mut stale = collection();
        stale.add(metric(400, NOW - 120.0, vec![]));
        stale.add(metric(400, NOW - 90.0, vec![]));
        assert!(!stale.group_for_viewport_width(400).is_complete());
        assert_eq!(stale.group_for_viewport_width(400).len(), 2);
    }

    #[test]
    fn test_groups_needing_measurement() {
        let mut c = collection();
        assert_eq!(c.groups_needing_measurement().len(), 4);
        c.add(metric(400, NOW, vec![]));
        c.add(metric(400, NOW, vec![]));
        let needing = c.groups_needing_measurement();
        assert_eq!(needing.len(), 3);
        assert!(needing.iter().all(|g| g.minimum_viewport_width() != 0));
        assert!(!c.is_every_group_complete());
    }

    #[test]
    fn test_group_lcp_element_majority() {
        let mut c = UrlMetricGroupCollection::new(
            &[480],
            &GroupLimits {
                sample_size: 3,
                capacity: 3,
                freshness_ttl_secs: 60,
            },
            NOW,
        );
        c.add(metric(400, NOW, vec![sample_element(DIV, true, 1.0)]));
        c.add(metric(400, NOW, vec![sample_element(IMG, true, 1.0)]));
        c.add(metric(400, NOW, vec![sample_element(IMG, true, 1.0)]));
        assert_eq!(c.groups()[0].lcp_element().unwrap().xpath, IMG);
        assert!(c.groups()[1].lcp_element().is_none());
    }

    #[test]
    fn test_common_lcp_element_requires_agreement() {
        let mut c = UrlMetricGroupCollection::new(&[480], &limits(), NOW);
        c.add(metric(400, NOW, vec![sample_element(IMG, true, 1.0)]));
        assert!(c.common_lcp_element().is_none());
        c.add(metric(800, NOW, vec![sample_element(IMG, true, 1.0)]));
        assert_eq!(c.common_lcp_element().unwrap().xpath, IMG);
        c.add(metric(800, NOW, vec![sample_element(DIV, true, 1.0)]));
        c.add(metric(800, NOW, vec![sample_element(DIV, true, 1.0)]));
        assert!(c.common_lcp_element().is_none());
    }

    #[test]
    fn test_element_max_intersection_ratio() {
        let mut c = collection();
        c.add(metric(400, NOW, vec![sample_element(IMG, false, 0.0)]));
        c.add(metric(700, NOW, vec![sample_element(IMG, false, 0.25)]));
        assert_eq!(c.element_max_intersection_ratio(IMG), Some(0.25));
        assert_eq!(c.element_max_intersection_ratio(DIV), None);
    }

    #[test]
    fn test_prune_and_latest_timestamp() {
        let mut c = collection();
        c.add(metric(400, NOW - 100.0, vec![]));
        c.add(metric(900, NOW - 1.0, vec![]));
        assert_eq!(c.latest_timestamp(), Some(NOW - 1.0));
        assert_eq!(c.prune_older_than(NOW - 50.0), 1);
        assert_eq!(c.len(), 1);
        assert_eq!(c.flatten()[0].viewport_width(), 900);
    }

    #[test]
    fn test_group_statuses_serialize_camel_case() {
        let statuses = collection().group_statuses();
        let json = serde_json::to_string(&statuses[0]).unwrap();
        assert!(json.contains("\"minimumViewportWidth\":0"));
        assert!(json.contains("\"maximumViewportWidth\":480"));
        assert!(json.contains("\"complete\":false"));
    }
}
