use std::sync::Arc;

use optimization_detective::config::{DetectiveConfig, GroupLimits, SCHEMA_VERSION};
use optimization_detective::extensions::Extensions;
use optimization_detective::optimizer::{compute_etag, generator_meta_tag};
use optimization_detective::state::AppState;
use optimization_detective::store::SqliteStorage;

fn test_config() -> DetectiveConfig {
    DetectiveConfig {
        breakpoints: vec![480, 782],
        limits: GroupLimits {
            sample_size: 2,
            capacity: 2,
            freshness_ttl_secs: 3_600,
        },
        gc_interval_secs: 0,
        ..DetectiveConfig::default()
    }
}

fn test_state(extensions: Extensions) -> AppState {
    let storage = Arc::new(SqliteStorage::in_memory().unwrap());
    AppState::with_extensions(test_config(), storage, extensions)
}

#[test]
fn test_state_creation() {
    let state = AppState::new(test_config(), Arc::new(SqliteStorage::in_memory().unwrap()));

    assert_eq!(state.store.breakpoints(), &[480, 782]);
    assert_eq!(state.store.limits().sample_size, 2);
    assert_eq!(state.storage_lock.ttl_secs(), state.config.storage_lock_ttl_secs);
    assert_eq!(state.extensions.ids(), vec!["image"]);
}

#[test]
fn test_current_etag_tracks_registered_visitors() {
    let builtin = test_state(Extensions::builtin());
    let bare = test_state(Extensions::new());

    let etag = builtin.current_etag();
    assert_eq!(etag.len(), 64);
    assert!(etag.chars().all(|c| c.is_ascii_hexdigit()));
    assert_eq!(
        etag,
        compute_etag(
            &["image/background-image", "image/img"],
            &[480, 782],
            SCHEMA_VERSION
        )
    );

    assert_ne!(etag, bare.current_etag());
    assert_eq!(bare.current_etag(), compute_etag(&[], &[480, 782], SCHEMA_VERSION));
}

#[test]
fn test_optimizer_shares_current_etag() {
    let state = test_state(Extensions::builtin());
    assert_eq!(state.optimizer().current_etag(), state.current_etag());
}

#[test]
fn test_optimizer_injects_detection_for_empty_store() {
    let state = test_state(Extensions::builtin());
    let html = "<html><head></head><body><p>Hi</p></body></html>";

    let emission = state.optimizer().optimize("https://example.com/", html);
    assert!(emission.is_modified());
    let output = emission.into_string();
    assert!(output.contains(r#"id="optimization-detective-detect""#));
    assert!(output.starts_with(&format!(
        "<html><head>{}</head><body><p>Hi</p>",
        generator_meta_tag()
    )));
    assert!(output.ends_with("</body></html>"));
}

#[test]
fn test_optimizer_leaves_fragments_alone() {
    let state = test_state(Extensions::builtin());
    let html = "<div>not a full document</div>";
    let emission = state.optimizer().optimize("https://example.com/", html);
    assert!(!emission.is_modified());
    assert_eq!(emission.as_str(), html);
}
