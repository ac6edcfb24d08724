use clap::Parser;
use std::path::PathBuf;

/// Optimization Detective: collects URL Metrics and optimizes served HTML.
#[derive(Parser, Debug, Clone)]
#[command(name = "optimization-detective")]
pub struct CliArgs {
    /// HTTP port
    #[arg(long = "port", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// SQLite database holding URL Metrics records
    #[arg(long = "db-path")]
    pub db_path: Option<PathBuf>,

    /// Viewport breakpoint widths, comma separated (e.g. 480,600,782)
    #[arg(long = "breakpoints", value_delimiter = ',', default_values_t = DEFAULT_BREAKPOINTS.to_vec())]
    pub breakpoints: Vec<u32>,

    /// URL Metrics needed per viewport group before it counts as complete
    #[arg(long = "sample-size", default_value_t = DEFAULT_SAMPLE_SIZE)]
    pub sample_size: usize,

    /// Seconds a URL Metric stays fresh
    #[arg(long = "freshness-ttl-secs", default_value_t = DEFAULT_FRESHNESS_TTL_SECS)]
    pub freshness_ttl_secs: i64,

    /// Module URL the detection script imports
    #[arg(long = "detect-module-url", default_value = DEFAULT_DETECT_MODULE_URL)]
    pub detect_module_url: String,

    /// Seconds a client must wait between URL Metric submissions (0 disables)
    #[arg(long = "storage-lock-ttl-secs", default_value_t = DEFAULT_STORAGE_LOCK_TTL_SECS)]
    pub storage_lock_ttl_secs: i64,

    /// Seconds between stale record sweeps (0 disables)
    #[arg(long = "gc-interval-secs", default_value_t = DEFAULT_GC_INTERVAL_SECS)]
    pub gc_interval_secs: u64,

    /// Pass the debug flag to the detection script
    #[arg(long = "debug")]
    pub debug: bool,

    /// Directory for daily-rolling log files
    #[arg(long = "log-dir")]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("At least one breakpoint is required")]
    NoBreakpoints,

    #[error("Breakpoints must be positive and strictly increasing: {0:?}")]
    UnsortedBreakpoints(Vec<u32>),

    #[error("Sample size must be at least 1")]
    ZeroSampleSize,

    #[error("Group capacity {capacity} is smaller than the sample size {sample_size}")]
    CapacityBelowSampleSize { capacity: usize, sample_size: usize },

    #[error("Freshness TTL must not be negative")]
    NegativeFreshnessTtl,

    #[error("Storage lock TTL {0}s exceeds the maximum of {max}s", max = MAX_STORAGE_LOCK_TTL_SECS)]
    StorageLockTtlTooLarge(i64),

    #[error("Store attempts must be between 1 and {max}, got {0}", max = MAX_STORE_ATTEMPTS)]
    StoreAttemptsOutOfRange(u32),
}

/// Limits applied to every URL Metrics group.
#[derive(Debug, Clone, PartialEq)]
pub struct GroupLimits {
    pub sample_size: usize,
    pub capacity: usize,
    pub freshness_ttl_secs: i64,
}

impl Default for GroupLimits {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            capacity: DEFAULT_SAMPLE_SIZE,
            freshness_ttl_secs: DEFAULT_FRESHNESS_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone)]
pub struct DetectiveConfig {
    pub port: u16,
    pub db_path: PathBuf,
    pub breakpoints: Vec<u32>,
    pub limits: GroupLimits,
    pub detect_module_url: String,
    pub rest_api_endpoint: String,
    pub storage_lock_ttl_secs: i64,
    pub stale_record_horizon_secs: i64,
    pub gc_interval_secs: u64,
    pub store_max_attempts: u32,
    pub store_retry_backoff_ms: u64,
    pub debug: bool,
    pub log_dir: Option<PathBuf>,
}

// Server constants
pub const DEFAULT_PORT: u16 = 9890;
pub const DB_FILENAME: &str = "url-metrics.db";
pub const STORE_ENDPOINT_PATH: &str = "/optimization-detective/v1/url-metrics:store";

// URL Metrics grouping constants
pub const DEFAULT_BREAKPOINTS: &[u32] = &[480, 600, 782];
pub const DEFAULT_SAMPLE_SIZE: usize = 3;
pub const DEFAULT_FRESHNESS_TTL_SECS: i64 = 86_400; // 1 day

// Store constants
pub const STALE_RECORD_HORIZON_SECS: i64 = 30 * 86_400; // 1 month
pub const DEFAULT_GC_INTERVAL_SECS: u64 = 3_600;
pub const STORE_MAX_ATTEMPTS: u32 = 3;
pub const STORE_RETRY_BACKOFF_MS: u64 = 10;
pub const MAX_STORE_ATTEMPTS: u32 = 10;
pub const MAX_STORE_RETRY_BACKOFF_MS: u64 = 1_000;

// Submission constants
pub const DEFAULT_STORAGE_LOCK_TTL_SECS: i64 = 60;
pub const MAX_STORAGE_LOCK_TTL_SECS: i64 = 86_400;
pub const MIN_VIEWPORT_ASPECT_RATIO: f64 = 0.4;
pub const MAX_VIEWPORT_ASPECT_RATIO: f64 = 2.5;

// Detection constants
pub const DEFAULT_DETECT_MODULE_URL: &str = "/optimization-detective/detect.js";
pub const DETECTION_TIME_WINDOW_MS: u64 = 5_000;

/// Bumped whenever the stored URL Metric shape changes so old records miss.
pub const SCHEMA_VERSION: u32 = 1;

impl DetectiveConfig {
    pub fn from_args(args: CliArgs) -> Result<Self, ConfigError> {
        validate_breakpoints(&args.breakpoints)?;
        let limits = GroupLimits {
            sample_size: args.sample_size,
            capacity: args.sample_size,
            freshness_ttl_secs: args.freshness_ttl_secs,
        };
        validate_limits(&limits)?;
        validate_storage_lock_ttl(args.storage_lock_ttl_secs)?;
        validate_store_attempts(STORE_MAX_ATTEMPTS)?;

        let db_path = args.db_path.unwrap_or_else(default_db_path);

        Ok(DetectiveConfig {
            port: args.port,
            db_path,
            breakpoints: args.breakpoints,
            limits,
            detect_module_url: args.detect_module_url,
            rest_api_endpoint: STORE_ENDPOINT_PATH.to_string(),
            storage_lock_ttl_secs: args.storage_lock_ttl_secs,
            stale_record_horizon_secs: STALE_RECORD_HORIZON_SECS,
            gc_interval_secs: args.gc_interval_secs,
            store_max_attempts: STORE_MAX_ATTEMPTS,
            store_retry_backoff_ms: STORE_RETRY_BACKOFF_MS,
            debug: args.debug,
            log_dir: args.log_dir,
        })
    }
}

impl Default for DetectiveConfig {
    fn default() -> Self {
        DetectiveConfig {
            port: DEFAULT_PORT,
            db_path: default_db_path(),
            breakpoints: DEFAULT_BREAKPOINTS.to_vec(),
            limits: GroupLimits::default(),
            detect_module_url: DEFAULT_DETECT_MODULE_URL.to_string(),
            rest_api_endpoint: STORE_ENDPOINT_PATH.to_string(),
            storage_lock_ttl_secs: DEFAULT_STORAGE_LOCK_TTL_SECS,
            stale_record_horizon_secs: STALE_RECORD_HORIZON_SECS,
            gc_interval_secs: DEFAULT_GC_INTERVAL_SECS,
            store_max_attempts: STORE_MAX_ATTEMPTS,
            store_retry_backoff_ms: STORE_RETRY_BACKOFF_MS,
            debug: false,
            log_dir: None,
        }
    }
}

/// Default database location under the platform data dir.
pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("optimization-detective")
        .join(DB_FILENAME)
}

pub fn validate_breakpoints(breakpoints: &[u32]) -> Result<(), ConfigError> {
    if breakpoints.is_empty() {
        return Err(ConfigError::NoBreakpoints);
    }
    let increasing = breakpoints[0] > 0 && breakpoints.windows(2).all(|w| w[0] < w[1]);
    if !increasing {
        return Err(ConfigError::UnsortedBreakpoints(breakpoints.to_vec()));
    }
    Ok(())
}

pub fn validate_limits(limits: &GroupLimits) -> Result<(), ConfigError> {
    if limits.sample_size == 0 {
        return Err(ConfigError::ZeroSampleSize);
    }
    if limits.capacity < limits.sample_size {
        return Err(ConfigError::CapacityBelowSampleSize {
            capacity: limits.capacity,
            sample_size: limits.sample_size,
        });
    }
    if limits.freshness_ttl_secs < 0 {
        return Err(ConfigError::NegativeFreshnessTtl);
    }
    Ok(())
}

pub fn validate_storage_lock_ttl(ttl_secs: i64) -> Result<(), ConfigError> {
    if ttl_secs > MAX_STORAGE_LOCK_TTL_SECS {
        return Err(ConfigError::StorageLockTtlTooLarge(ttl_secs));
    }
    Ok(())
}

pub fn validate_store_attempts(attempts: u32) -> Result<(), ConfigError> {
    if !(1..=MAX_STORE_ATTEMPTS).contains(&attempts) {
        return Err(ConfigError::StoreAttemptsOutOfRange(attempts));
    }
    Ok(())
}
