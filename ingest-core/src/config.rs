//! Process-wide configuration for the ingestion core.
//!
//! Loaded once at startup and passed as an explicit collaborator into the
//! Job Store, worker pool, Dispatcher, and Rate Limiter rather than read
//! from ambient globals (spec §9).

use std::path::PathBuf;
use std::time::Duration;

/// Per-tier request/upload quotas (spec §4.6).
#[derive(Debug, Clone, Copy)]
pub struct TierQuota {
    pub api_quota: u32,
    pub api_window: Duration,
    pub files_quota: u32,
    pub files_window: Duration,
}

impl TierQuota {
    pub const FREE: Self = Self {
        api_quota: 100,
        api_window: Duration::from_secs(15 * 60),
        files_quota: 10,
        files_window: Duration::from_secs(24 * 60 * 60),
    };

    pub const PRO: Self = Self {
        api_quota: 1_000,
        api_window: Duration::from_secs(15 * 60),
        files_quota: 100,
        files_window: Duration::from_secs(24 * 60 * 60),
    };

    pub const ENTERPRISE: Self = Self {
        api_quota: 10_000,
        api_window: Duration::from_secs(15 * 60),
        files_quota: 1_000,
        files_window: Duration::from_secs(24 * 60 * 60),
    };
}

/// Fixed-across-tiers buckets (spec §4.6).
pub const WEBHOOK_QUOTA: u32 = 100;
pub const WEBHOOK_WINDOW: Duration = Duration::from_secs(60 * 60);
pub const ADMIN_QUOTA: u32 = 1_000;
pub const ADMIN_WINDOW: Duration = Duration::from_secs(15 * 60);

/// Retry back-off schedule, in seconds, indexed by `min(attempt - 1, len - 1)`.
pub const JOB_BACKOFF_SECONDS: [u64; 5] = [1, 5, 15, 60, 300];
pub const WEBHOOK_BACKOFF_SECONDS: [u64; 5] = [1, 5, 15, 60, 300];

#[derive(Debug, Clone)]
pub struct Config {
    /// Number of concurrent worker tasks in the pool (C4).
    pub worker_pool_size: usize,
    /// Default job lease / visibility timeout.
    pub lease_timeout: Duration,
    /// Default job max attempts before routing to `dead`.
    pub default_max_attempts: u32,
    /// Concurrency of the webhook dispatcher's worker pool (C5).
    pub dispatcher_concurrency: usize,
    /// Maximum webhook delivery attempts before the delivery is dropped.
    pub webhook_max_attempts: u32,
    /// Per-delivery HTTP timeout.
    pub webhook_timeout: Duration,
    /// If the rate-limiter backend is unavailable, admit anyway (§4.6, §9).
    pub rate_limiter_fail_open: bool,
    /// Root directory blobs are content-addressed under.
    pub blob_root: PathBuf,
    /// Per-stage timeouts (§5).
    pub parse_timeout: Duration,
    pub field_extract_timeout: Duration,
    pub persist_timeout: Duration,
    /// Minimum heartbeat interval published as `processing.progress` (§4.4).
    pub progress_heartbeat_interval: Duration,
}

impl Config {
    /// Load configuration from the environment, falling back to documented
    /// defaults for anything unset — mirrors the teacher's
    /// `Config::load_or_default` / `Settings::load` pattern.
    pub fn load_or_default() -> Self {
        let worker_pool_size = std::env::var("INGEST_WORKER_POOL_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_else(|| {
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(4)
            });

        let blob_root = std::env::var("INGEST_BLOB_ROOT")
            .ok()
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                dirs::data_dir()
                    .unwrap_or_else(std::env::temp_dir)
                    .join("ingest-core")
                    .join("blobs")
            });

        Self {
            worker_pool_size,
            lease_timeout: Duration::from_secs(5 * 60),
            default_max_attempts: 3,
            dispatcher_concurrency: 8,
            webhook_max_attempts: 5,
            webhook_timeout: Duration::from_secs(30),
            rate_limiter_fail_open: std::env::var("INGEST_RATE_LIMITER_FAIL_CLOSED").is_err(),
            blob_root,
            parse_timeout: Duration::from_secs(5 * 60),
            field_extract_timeout: Duration::from_secs(60),
            persist_timeout: Duration::from_secs(30),
            progress_heartbeat_interval: Duration::from_millis(500),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::load_or_default()
    }
}
