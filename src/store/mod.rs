//! Persistence of URL Metrics per normalized URL.
//!
//! Writers never hold a lock across read-modify-write: each append reads the
//! record's revision, rebuilds the group collection, and writes back only if
//! the revision is unchanged. Conflicts are retried a bounded number of times
//! and the sample is dropped after that.

pub mod db;

use serde::Serialize;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{
    DetectiveConfig, GroupLimits, MAX_STORE_ATTEMPTS, MAX_STORE_RETRY_BACKOFF_MS,
};
use crate::group::UrlMetricGroupCollection;
use crate::url_metric::{current_timestamp, UrlMetric, UrlMetricSchema};

pub use db::{NewRecord, RecordStorage, SqliteStorage, StoredRecord};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreOutcome {
    /// First URL Metric for this URL.
    Created,
    /// Added to the existing record.
    Appended,
    /// The stored record had a different ETag and was started afresh.
    Replaced,
    /// Every write attempt conflicted; the sample was discarded.
    Dropped,
}

/// Canonical form of a page URL used for lookups: parsed, fragment removed.
pub fn normalize_url(raw: &str) -> Result<String, StoreError> {
    let mut url = Url::parse(raw)?;
    url.set_fragment(None);
    Ok(url.into())
}

/// Storage key for a normalized URL.
pub fn url_metrics_slug(normalized_url: &str) -> String {
    hex::encode(Sha256::digest(normalized_url.as_bytes()))
}

pub struct UrlMetricsStore {
    storage: Arc<dyn RecordStorage>,
    breakpoints: Vec<u32>,
    limits: GroupLimits,
    stale_record_horizon_secs: i64,
    max_attempts: u32,
    retry_backoff: Duration,
}

impl UrlMetricsStore {
    pub fn new(storage: Arc<dyn RecordStorage>, config: &DetectiveConfig) -> Self {
        Self {
            storage,
            breakpoints: config.breakpoints.clone(),
            limits: config.limits.clone(),
            stale_record_horizon_secs: config.stale_record_horizon_secs,
            max_attempts: config.store_max_attempts.clamp(1, MAX_STORE_ATTEMPTS),
            retry_backoff: Duration::from_millis(config.store_retry_backoff_ms),
        }
    }

    pub fn breakpoints(&self) -> &[u32] {
        &self.breakpoints
    }

    pub fn limits(&self) -> &GroupLimits {
        &self.limits
    }

    fn stale_cutoff(&self, now: f64) -> f64 {
        now - self.stale_record_horizon_secs as f64
    }

    /// Exponential backoff before retry `attempt + 1`, capped.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.retry_backoff
            .saturating_mul(factor)
            .min(Duration::from_millis(MAX_STORE_RETRY_BACKOFF_MS))
    }

    /// Group collection for `url` collected under `etag`. A missing record
    /// or one stored under another ETag yields an empty collection.
    pub fn get(
        &self,
        url: &str,
        etag: &str,
        schema: &UrlMetricSchema,
    ) -> Result<UrlMetricGroupCollection, StoreError> {
        let now = current_timestamp();
        let slug = url_metrics_slug(&normalize_url(url)?);

        let metrics = match self.storage.get(&slug)? {
            Some(record) if record.etag == etag => decode_metrics(&record, schema),
            Some(record) => {
                debug!(slug = %slug, stored_etag = %record.etag, "Stored URL Metrics ETag is stale");
                Vec::new()
            }
            None => Vec::new(),
        };

        Ok(UrlMetricGroupCollection::with_metrics(
            &self.breakpoints,
            &self.limits,
            now,
            metrics,
        ))
    }

    /// Appends `metric` to the record for `url`.
    pub fn store(
        &self,
        url: &str,
        etag: &str,
        metric: UrlMetric,
        schema: &UrlMetricSchema,
    ) -> Result<StoreOutcome, StoreError> {
        let url = normalize_url(url)?;
        let slug = url_metrics_slug(&url);

        for attempt in 1..=self.max_attempts {
            let now = current_timestamp();
            let (expected_revision, prior, outcome) = match self.storage.get(&slug)? {
                None => (None, Vec::new(), StoreOutcome::Created),
                Some(record) if record.etag != etag => {
                    (Some(record.revision), Vec::new(), StoreOutcome::Replaced)
                }
                Some(record) => (
                    Some(record.revision),
                    decode_metrics(&record, schema),
                    StoreOutcome::Appended,
                ),
            };

            let mut collection =
                UrlMetricGroupCollection::with_metrics(&self.breakpoints, &self.limits, now, prior);
            collection.add(metric.clone());
            let pruned = collection.prune_older_than(self.stale_cutoff(now));
            if pruned > 0 {
                debug!(slug = %slug, pruned, "Pruned stale URL Metrics");
            }

            let record = NewRecord {
                slug: slug.clone(),
                url: url.clone(),
                etag: etag.to_string(),
                latest_timestamp: collection.latest_timestamp().unwrap_or(now),
                url_metrics: collection.flatten().iter().map(|m| m.to_value()).collect(),
            };

            if self.storage.compare_and_set(expected_revision, &record)? {
                debug!(slug = %slug, ?outcome, attempt, "Stored URL Metric");
                return Ok(outcome);
            }

            debug!(slug = %slug, attempt, "URL Metrics write conflict");
            if attempt < self.max_attempts {
                std::thread::sleep(self.retry_delay(attempt));
            }
        }

        warn!(
            slug = %slug,
            attempts = self.max_attempts,
            "Dropping URL Metric after repeated write conflicts"
        );
        Ok(StoreOutcome::Dropped)
    }

    /// Slugs of records whose newest metric is past the stale horizon.
    pub fn stale_slugs(&self, now: f64) -> Result<Vec<String>, StoreError> {
        self.storage.stale_slugs(self.stale_cutoff(now))
    }

    /// Deletes records past the stale horizon. Each delete re-checks the
    /// record's age, so one refreshed by a concurrent writer is kept.
    pub fn delete_stale(&self, now: f64) -> Result<usize, StoreError> {
        let cutoff = self.stale_cutoff(now);
        let mut deleted = 0;
        for slug in self.storage.stale_slugs(cutoff)? {
            if self.storage.delete_if_stale(&slug, cutoff)? {
                deleted += 1;
            } else {
                debug!(slug = %slug, "Record refreshed before deletion, keeping it");
            }
        }
        if deleted > 0 {
            info!("Deleted {} stale URL Metrics records", deleted);
        }
        Ok(deleted)
    }
}

fn decode_metrics(record: &StoredRecord, schema: &UrlMetricSchema) -> Vec<UrlMetric> {
    record
        .url_metrics
        .iter()
        .filter_map(|value| match UrlMetric::new(value, schema) {
            Ok(metric) => Some(metric),
            Err(e) => {
                warn!(slug = %record.slug, "Skipping invalid stored URL Metric: {}", e);
                None
            }
        })
        .collect()
}
