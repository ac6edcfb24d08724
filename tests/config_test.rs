use clap::Parser;
use optimization_detective::config::*;

#[test]
fn test_default_constants() {
    assert_eq!(DEFAULT_PORT, 9890);
    assert_eq!(DEFAULT_BREAKPOINTS, &[480, 600, 782]);
    assert_eq!(DEFAULT_SAMPLE_SIZE, 3);
    assert_eq!(STORE_ENDPOINT_PATH, "/optimization-detective/v1/url-metrics:store");
}

#[test]
fn test_cli_defaults() {
    let args = CliArgs::parse_from(["optimization-detective"]);
    assert_eq!(args.port, DEFAULT_PORT);
    assert_eq!(args.breakpoints, vec![480, 600, 782]);
    assert_eq!(args.sample_size, 3);
    assert!(args.db_path.is_none());
    assert!(!args.debug);

    let config = DetectiveConfig::from_args(args).unwrap();
    assert_eq!(config.limits, GroupLimits::default());
    assert_eq!(config.rest_api_endpoint, STORE_ENDPOINT_PATH);
    assert!(config.db_path.ends_with(DB_FILENAME));
}

#[test]
fn test_cli_overrides() {
    let args = CliArgs::parse_from([
        "optimization-detective",
        "--port",
        "8080",
        "--breakpoints",
        "320,768,1024",
        "--sample-size",
        "5",
        "--db-path",
        "/tmp/od/metrics.db",
        "--debug",
    ]);
    let config = DetectiveConfig::from_args(args).unwrap();
    assert_eq!(config.port, 8080);
    assert_eq!(config.breakpoints, vec![320, 768, 1024]);
    assert_eq!(config.limits.sample_size, 5);
    assert_eq!(config.limits.capacity, 5);
    assert_eq!(config.db_path, std::path::PathBuf::from("/tmp/od/metrics.db"));
    assert!(config.debug);
}

#[test]
fn test_unsorted_breakpoints_rejected() {
    let args = CliArgs::parse_from(["optimization-detective", "--breakpoints", "600,480"]);
    assert_eq!(
        DetectiveConfig::from_args(args).unwrap_err(),
        ConfigError::UnsortedBreakpoints(vec![600, 480])
    );

    assert_eq!(
        validate_breakpoints(&[480, 480]),
        Err(ConfigError::UnsortedBreakpoints(vec![480, 480]))
    );
    assert_eq!(
        validate_breakpoints(&[0, 480]),
        Err(ConfigError::UnsortedBreakpoints(vec![0, 480]))
    );
    assert_eq!(validate_breakpoints(&[]), Err(ConfigError::NoBreakpoints));
    assert!(validate_breakpoints(&[1]).is_ok());
}

#[test]
fn test_zero_sample_size_rejected() {
    let args = CliArgs::parse_from(["optimization-detective", "--sample-size", "0"]);
    assert_eq!(
        DetectiveConfig::from_args(args).unwrap_err(),
        ConfigError::ZeroSampleSize
    );
}

#[test]
fn test_limits_validation() {
    let limits = GroupLimits {
        sample_size: 3,
        capacity: 2,
        freshness_ttl_secs: 10,
    };
    assert_eq!(
        validate_limits(&limits),
        Err(ConfigError::CapacityBelowSampleSize {
            capacity: 2,
            sample_size: 3
        })
    );

    let limits = GroupLimits {
        freshness_ttl_secs: -1,
        ..GroupLimits::default()
    };
    assert_eq!(validate_limits(&limits), Err(ConfigError::NegativeFreshnessTtl));
}

#[test]
fn test_storage_lock_ttl_bounded() {
    let args = CliArgs::parse_from([
        "optimization-detective",
        "--storage-lock-ttl-secs",
        "9223372036854775807",
    ]);
    assert_eq!(
        DetectiveConfig::from_args(args).unwrap_err(),
        ConfigError::StorageLockTtlTooLarge(i64::MAX)
    );
    assert!(validate_storage_lock_ttl(MAX_STORAGE_LOCK_TTL_SECS).is_ok());
    assert!(validate_storage_lock_ttl(0).is_ok());
}

#[test]
fn test_store_attempts_bounded() {
    assert!(validate_store_attempts(STORE_MAX_ATTEMPTS).is_ok());
    assert_eq!(
        validate_store_attempts(0),
        Err(ConfigError::StoreAttemptsOutOfRange(0))
    );
    assert_eq!(
        validate_store_attempts(33),
        Err(ConfigError::StoreAttemptsOutOfRange(33))
    );
}
