// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - ShieldEye Configuration
 * Environment-driven configuration for all subsystems
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::time::Duration;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// HTTP server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub cors_origin: String,
    pub rate_limit_window_ms: u64,
    pub rate_limit_max: u32,
    /// Maximum accepted request body in bytes.
    pub max_request_size: usize,
}

/// PostgreSQL configuration
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub database_url: String,
    pub max_connections: usize,
    pub min_connections: usize,
    pub connect_timeout: Duration,
    pub query_timeout: Duration,
}

/// Redis queue-backend configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
}

/// MinIO object-store configuration
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub endpoint: String,
    pub access_key: String,
    pub secret_key: String,
    pub bucket: String,
    pub region: String,
}

/// Queue behavior configuration
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub max_attempts: u32,
    pub job_timeout: Duration,
    pub retry_delay: Duration,
    pub stalled_interval: Duration,
    pub max_stalled_count: u32,
    pub render_concurrency: usize,
    pub analyze_concurrency: usize,
}

/// Advisory feed configuration
#[derive(Debug, Clone)]
pub struct FeedConfig {
    pub osv_api_url: String,
    pub timeout: Duration,
    pub cache_ttl_seconds: i64,
    /// TTL for cached empty results, so advisory-free libraries do not cost
    /// one feed round-trip per scan.
    pub negative_cache_ttl_seconds: i64,
}

/// Scan-pipeline limits
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub scan_url_cooldown: Duration,
    pub max_external_scripts: usize,
    pub max_pages: usize,
    pub script_fetch_timeout: Duration,
    pub max_script_body_bytes: usize,
    pub insight_endpoint: Option<String>,
    pub insight_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub redis: RedisConfig,
    pub storage: StorageConfig,
    pub queue: QueueConfig,
    pub feed: FeedConfig,
    pub limits: LimitsConfig,
}

impl Config {
    /// Load configuration from the environment, applying documented defaults.
    pub fn from_env() -> Self {
        let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| {
            format!(
                "postgresql://{}:{}@{}:{}/{}",
                env_string("DB_USER", "shieldeye"),
                env_string("DB_PASSWORD", "shieldeye"),
                env_string("DB_HOST", "localhost"),
                env_or::<u16>("DB_PORT", 5432),
                env_string("DB_NAME", "shieldeye"),
            )
        });

        let redis_url = std::env::var("REDIS_URL").unwrap_or_else(|_| {
            let host = env_string("REDIS_HOST", "localhost");
            let port = env_or::<u16>("REDIS_PORT", 6379);
            match std::env::var("REDIS_PASSWORD") {
                Ok(password) if !password.is_empty() => {
                    format!("redis://:{}@{}:{}", password, host, port)
                }
                _ => format!("redis://{}:{}", host, port),
            }
        });

        Self {
            server: ServerConfig {
                port: env_or("PORT", 3000),
                cors_origin: env_string("CORS_ORIGIN", "*"),
                rate_limit_window_ms: env_or("RATE_LIMIT_WINDOW_MS", 60_000),
                rate_limit_max: env_or("RATE_LIMIT_MAX", 120),
                max_request_size: env_or("MAX_REQUEST_SIZE", 10 * 1024 * 1024),
            },
            database: DatabaseConfig {
                database_url,
                max_connections: env_or("DB_MAX_CONNECTIONS", 30),
                min_connections: env_or("DB_MIN_CONNECTIONS", 2),
                connect_timeout: Duration::from_secs(env_or("DB_CONNECT_TIMEOUT", 10)),
                query_timeout: Duration::from_secs(env_or("DB_QUERY_TIMEOUT", 30)),
            },
            redis: RedisConfig { url: redis_url },
            storage: StorageConfig {
                endpoint: env_string("MINIO_ENDPOINT", "http://localhost:9000"),
                access_key: env_string("MINIO_ACCESS_KEY", "minioadmin"),
                secret_key: env_string("MINIO_SECRET_KEY", "minioadmin"),
                bucket: env_string("MINIO_BUCKET", "shieldeye-artifacts"),
                region: env_string("MINIO_REGION", "us-east-1"),
            },
            queue: QueueConfig {
                max_attempts: env_or("QUEUE_MAX_ATTEMPTS", 5),
                job_timeout: Duration::from_millis(env_or("QUEUE_JOB_TIMEOUT", 600_000)),
                retry_delay: Duration::from_millis(env_or("QUEUE_RETRY_DELAY", 2_000)),
                stalled_interval: Duration::from_millis(env_or("QUEUE_STALLED_INTERVAL", 30_000)),
                max_stalled_count: env_or("QUEUE_MAX_STALLED_COUNT", 2),
                render_concurrency: env_or("RENDER_CONCURRENCY", 1),
                analyze_concurrency: env_or("ANALYZE_CONCURRENCY", 3),
            },
            feed: FeedConfig {
                osv_api_url: env_string("OSV_API_URL", "https://api.osv.dev/v1/query"),
                timeout: Duration::from_secs(env_or("OSV_TIMEOUT", 20)),
                cache_ttl_seconds: env_or("VULN_CACHE_TTL", 86_400),
                negative_cache_ttl_seconds: env_or("VULN_NEGATIVE_CACHE_TTL", 3_600),
            },
            limits: LimitsConfig {
                scan_url_cooldown: Duration::from_secs(env_or("SCAN_URL_COOLDOWN_SECONDS", 30)),
                max_external_scripts: env_or("RENDERER_MAX_EXTERNAL_SCRIPTS", 30),
                max_pages: env_or("RENDERER_MAX_PAGES", 100),
                script_fetch_timeout: Duration::from_secs(env_or("SCRIPT_FETCH_TIMEOUT", 15)),
                max_script_body_bytes: env_or("MAX_SCRIPT_BODY_BYTES", 5 * 1024 * 1024),
                insight_endpoint: std::env::var("INSIGHT_ENDPOINT").ok().filter(|s| !s.is_empty()),
                insight_timeout: Duration::from_secs(env_or("INSIGHT_TIMEOUT", 60)),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_env() {
        // Defaults apply when the variables are unset in the test environment.
        let config = Config::from_env();
        assert!(config.queue.max_attempts >= 1);
        assert!(config.limits.max_pages <= 1000);
        assert_eq!(config.feed.cache_ttl_seconds, 86_400);
        assert!(config.limits.max_external_scripts > 0);
    }

    #[test]
    fn test_env_or_parses() {
        assert_eq!(env_or("SHIELDEYE_DOES_NOT_EXIST", 42u32), 42);
    }
}
