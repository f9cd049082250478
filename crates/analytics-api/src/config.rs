//! Server configuration from environment variables.
//!
//! ## Environment Variables
//!
//! - `STACKPULSE_DB_PATH`: SQLite database file (default: stackpulse.db)
//! - `PORT`: Listen port (default: 8080)
//! - `STACKPULSE_STAT_FETCH_LIMIT`: Max usage rows per fetch (default: 10000)
//! - `STACKPULSE_EVENT_BUFFER_SIZE`: Event queue capacity (default: 1000)
//! - `STACKPULSE_EVENT_FLUSH_INTERVAL_MS`: Event flush interval (default: 1000)
//! - `STACKPULSE_EXPORT_RATE_LIMIT` / `STACKPULSE_EXPORT_WINDOW_SECS`: Export quota (default: 10 per 3600s)
//! - `STACKPULSE_BULK_EXPORT_RATE_LIMIT` / `STACKPULSE_BULK_EXPORT_WINDOW_SECS`: Bulk export quota (default: 3 per 3600s)
//! - `STACKPULSE_RATE_LIMIT_MAX_BUCKETS`: Bucket cap per limiter (default: 10000)
//! - `STACKPULSE_RATE_LIMIT_BUCKET_TTL_SECS`: Idle bucket TTL (default: 7200)

use crate::events::EventQueueConfig;
use crate::rate_limiting::RateLimitConfig;

pub const DEFAULT_DB_PATH: &str = "stackpulse.db";
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_STAT_FETCH_LIMIT: usize = 10_000;

const DEFAULT_EXPORT_LIMIT: u32 = 10;
const DEFAULT_BULK_EXPORT_LIMIT: u32 = 3;
const DEFAULT_EXPORT_WINDOW_SECS: u64 = 3600;

/// Top-level server configuration
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub db_path: String,
    pub port: u16,
    /// Row cap applied to every usage stat fetch
    pub stat_fetch_limit: usize,
    pub events: EventQueueConfig,
    pub export_rate_limit: RateLimitConfig,
    pub bulk_export_rate_limit: RateLimitConfig,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            port: DEFAULT_PORT,
            stat_fetch_limit: DEFAULT_STAT_FETCH_LIMIT,
            events: EventQueueConfig::default(),
            export_rate_limit: RateLimitConfig::new(DEFAULT_EXPORT_LIMIT, DEFAULT_EXPORT_WINDOW_SECS),
            bulk_export_rate_limit: RateLimitConfig::new(
                DEFAULT_BULK_EXPORT_LIMIT,
                DEFAULT_EXPORT_WINDOW_SECS,
            ),
        }
    }
}

impl ApiConfig {
    /// Create configuration from environment variables.
    ///
    /// Falls back to defaults for any unset or unparsable variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_buckets = env_parse(
            "STACKPULSE_RATE_LIMIT_MAX_BUCKETS",
            defaults.export_rate_limit.max_buckets,
        );
        let bucket_ttl_secs = env_parse(
            "STACKPULSE_RATE_LIMIT_BUCKET_TTL_SECS",
            defaults.export_rate_limit.bucket_ttl_secs,
        );

        Self {
            db_path: std::env::var("STACKPULSE_DB_PATH").unwrap_or(defaults.db_path),
            port: env_parse("PORT", defaults.port),
            stat_fetch_limit: env_parse("STACKPULSE_STAT_FETCH_LIMIT", defaults.stat_fetch_limit),
            events: EventQueueConfig {
                buffer_size: env_parse("STACKPULSE_EVENT_BUFFER_SIZE", defaults.events.buffer_size),
                flush_interval_ms: env_parse(
                    "STACKPULSE_EVENT_FLUSH_INTERVAL_MS",
                    defaults.events.flush_interval_ms,
                ),
            },
            export_rate_limit: RateLimitConfig {
                max_requests: env_parse("STACKPULSE_EXPORT_RATE_LIMIT", DEFAULT_EXPORT_LIMIT),
                window_secs: env_parse("STACKPULSE_EXPORT_WINDOW_SECS", DEFAULT_EXPORT_WINDOW_SECS),
                max_buckets,
                bucket_ttl_secs,
            },
            bulk_export_rate_limit: RateLimitConfig {
                max_requests: env_parse(
                    "STACKPULSE_BULK_EXPORT_RATE_LIMIT",
                    DEFAULT_BULK_EXPORT_LIMIT,
                ),
                window_secs: env_parse(
                    "STACKPULSE_BULK_EXPORT_WINDOW_SECS",
                    DEFAULT_EXPORT_WINDOW_SECS,
                ),
                max_buckets,
                bucket_ttl_secs,
            },
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.db_path.trim().is_empty() {
            return Err("db_path must not be empty".to_string());
        }
        if self.stat_fetch_limit == 0 {
            return Err("stat_fetch_limit must be > 0".to_string());
        }
        self.events.validate()?;
        self.export_rate_limit
            .validate()
            .map_err(|e| format!("export_rate_limit: {}", e))?;
        self.bulk_export_rate_limit
            .validate()
            .map_err(|e| format!("bulk_export_rate_limit: {}", e))?;
        Ok(())
    }
}

/// Parse an environment variable, falling back to `default`
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
