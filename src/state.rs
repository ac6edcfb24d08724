use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::{DetectiveConfig, SCHEMA_VERSION};
use crate::extensions::Extensions;
use crate::optimizer::{compute_etag, Optimizer};
use crate::storage_lock::StorageLock;
use crate::store::db::RecordStorage;
use crate::store::UrlMetricsStore;

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: DetectiveConfig,
    pub store: Arc<UrlMetricsStore>,
    pub extensions: Extensions,
    pub storage_lock: StorageLock,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(config: DetectiveConfig, storage: Arc<dyn RecordStorage>) -> Self {
        Self::with_extensions(config, storage, Extensions::builtin())
    }

    pub fn with_extensions(
        config: DetectiveConfig,
        storage: Arc<dyn RecordStorage>,
        extensions: Extensions,
    ) -> Self {
        let store = Arc::new(UrlMetricsStore::new(storage, &config));
        let storage_lock = StorageLock::new(config.storage_lock_ttl_secs);
        Self {
            config,
            store,
            extensions,
            storage_lock,
            started_at: Utc::now(),
        }
    }

    pub fn optimizer(&self) -> Optimizer<'_> {
        Optimizer::new(&self.config, &self.store, &self.extensions)
    }

    /// ETag pages are currently served under.
    pub fn current_etag(&self) -> String {
        let registry = self.extensions.tag_visitors();
        compute_etag(&registry.ids(), &self.config.breakpoints, SCHEMA_VERSION)
    }
}
