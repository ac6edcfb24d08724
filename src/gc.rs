use chrono::Utc;
use tokio::time::{interval, Duration};
use tracing::{debug, warn};

use crate::state::SharedState;
use crate::url_metric::current_timestamp;

/// Sweeps stale URL Metrics records and expired storage locks.
pub fn spawn_stale_record_sweeper(state: SharedState) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(Duration::from_secs(state.config.gc_interval_secs.max(1)));
        loop {
            ticker.tick().await;
            sweep(&state).await;
        }
    })
}

/// One sweep; returns the number of deleted records.
pub async fn sweep(state: &SharedState) -> usize {
    let store = state.store.clone();
    let deleted = match tokio::task::spawn_blocking(move || store.delete_stale(current_timestamp())).await {
        Ok(Ok(deleted)) => deleted,
        Ok(Err(e)) => {
            warn!("Stale URL Metrics sweep failed: {}", e);
            0
        }
        Err(e) => {
            warn!("Stale URL Metrics sweep panicked: {}", e);
            0
        }
    };

    let purged = state.storage_lock.purge_expired(Utc::now()).await;
    debug!(deleted, purged, "Stale record sweep finished");
    deleted
}
