// Copyright (c) 2026 Bountyy Oy. All rights reserved.
// This software is proprietary and confidential.

/**
 * Bountyy Oy - ShieldEye Error Types
 * Production-ready error handling with thiserror
 *
 * @copyright 2026 Bountyy Oy
 * @license Proprietary - Enterprise Edition
 */

use std::time::Duration;
use thiserror::Error;

/// Main scanner error type with comprehensive error variants
#[derive(Error, Debug)]
pub enum ScannerError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// HTTP-related errors
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),

    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Queue-backend errors
    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    /// Object-store errors
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Target rejected by the SSRF policy
    #[error("Policy violation for {url}: {reason}")]
    PolicyViolation { url: String, reason: String },

    /// Per-URL scan cooldown still active
    #[error("Cooldown active for {url}: retry after {retry_after_seconds}s")]
    CooldownActive {
        url: String,
        retry_after_seconds: i64,
    },

    /// Request/input validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Requested entity does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Render/browser errors
    #[error("Render error: {0}")]
    Render(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout errors
    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    /// General errors
    #[error("Scanner error: {0}")]
    General(String),
}

/// Network-specific errors with detailed classification
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection timeout after {timeout:?} to {url}")]
    ConnectionTimeout { url: String, timeout: Duration },

    #[error("Failed to resolve target host: {host}")]
    DnsResolutionFailed { host: String },

    #[error("Connection reset by peer for {url}")]
    ConnectionReset { url: String },

    #[error("Connection refused for {url}")]
    ConnectionRefused { url: String },

    #[error("Too many redirects (>{max_redirects}) for {url}")]
    TooManyRedirects { url: String, max_redirects: usize },

    #[error("Invalid URL: {url}")]
    InvalidUrl { url: String },

    #[error("Network error: {0}")]
    Other(String),
}

/// HTTP-specific errors with status code classification
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("HTTP {status_code} Client Error for {url}")]
    ClientError { status_code: u16, url: String },

    #[error("HTTP {status_code} Server Error for {url}")]
    ServerError { status_code: u16, url: String },

    #[error("Response body too large ({size} bytes) from {url}, max: {max_size}")]
    BodyTooLarge {
        url: String,
        size: usize,
        max_size: usize,
    },

    #[error("HTTP error: {0}")]
    Other(String),
}

/// Database-specific errors
#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Database connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Connection pool exhausted")]
    PoolExhausted,

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Constraint violation: {constraint}")]
    ConstraintViolation { constraint: String },

    #[error("Query timeout after {timeout:?}")]
    QueryTimeout { timeout: Duration },

    #[error("Database error: {0}")]
    Other(String),
}

/// Queue-backend errors
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue backend connection failed: {reason}")]
    ConnectionFailed { reason: String },

    #[error("Queue operation timed out after {timeout:?}")]
    OperationTimeout { timeout: Duration },

    #[error("Job {job_id} not found in queue {queue}")]
    JobNotFound { queue: String, job_id: String },

    #[error("Malformed job payload for {job_id}: {reason}")]
    MalformedPayload { job_id: String, reason: String },

    #[error("Queue error: {0}")]
    Other(String),
}

/// Object-store errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Object store request failed for {key}: {reason}")]
    RequestFailed { key: String, reason: String },

    #[error("Object not found: {key}")]
    ObjectNotFound { key: String },

    #[error("Object store returned HTTP {status} for {key}")]
    UnexpectedStatus { status: u16, key: String },

    #[error("Storage error: {0}")]
    Other(String),
}

impl NetworkError {
    pub fn is_retryable(&self) -> bool {
        match self {
            NetworkError::ConnectionTimeout { .. } => true,
            NetworkError::ConnectionReset { .. } => true,
            NetworkError::ConnectionRefused { .. } => true,
            NetworkError::DnsResolutionFailed { .. } => false,
            NetworkError::TooManyRedirects { .. } => false,
            NetworkError::InvalidUrl { .. } => false,
            NetworkError::Other(_) => false,
        }
    }
}

impl HttpError {
    pub fn is_retryable(&self) -> bool {
        match self {
            HttpError::ServerError { status_code, .. } => {
                matches!(status_code, 500 | 502 | 503 | 504)
            }
            HttpError::ClientError { status_code, .. } => {
                matches!(status_code, 408 | 429)
            }
            _ => false,
        }
    }
}

impl DatabaseError {
    pub fn is_retryable(&self) -> bool {
        match self {
            DatabaseError::ConnectionFailed { .. } => true,
            DatabaseError::PoolExhausted => true,
            DatabaseError::QueryTimeout { .. } => true,
            DatabaseError::TransactionFailed { .. } => false,
            DatabaseError::ConstraintViolation { .. } => false,
            DatabaseError::Other(_) => false,
        }
    }
}

impl QueueError {
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::ConnectionFailed { .. } => true,
            QueueError::OperationTimeout { .. } => true,
            QueueError::JobNotFound { .. } => false,
            QueueError::MalformedPayload { .. } => false,
            QueueError::Other(_) => false,
        }
    }
}

impl StorageError {
    pub fn is_retryable(&self) -> bool {
        match self {
            StorageError::RequestFailed { .. } => true,
            StorageError::UnexpectedStatus { status, .. } => {
                matches!(status, 500 | 502 | 503 | 504)
            }
            StorageError::ObjectNotFound { .. } => false,
            StorageError::Other(_) => false,
        }
    }
}

impl ScannerError {
    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            ScannerError::Network(e) => e.is_retryable(),
            ScannerError::Http(e) => e.is_retryable(),
            ScannerError::Database(e) => e.is_retryable(),
            ScannerError::Queue(e) => e.is_retryable(),
            ScannerError::Storage(e) => e.is_retryable(),
            ScannerError::Timeout { .. } => true,
            _ => false,
        }
    }
}

/// Convert reqwest errors to our error types
impl From<reqwest::Error> for ScannerError {
    fn from(err: reqwest::Error) -> Self {
        let url = err.url().map(|u| u.to_string()).unwrap_or_default();
        if err.is_timeout() {
            ScannerError::Network(NetworkError::ConnectionTimeout {
                url,
                timeout: Duration::from_secs(30),
            })
        } else if err.is_connect() {
            ScannerError::Network(NetworkError::ConnectionRefused { url })
        } else if err.is_status() {
            let status = err.status().map(|s| s.as_u16()).unwrap_or(0);
            if (400..500).contains(&status) {
                ScannerError::Http(HttpError::ClientError {
                    status_code: status,
                    url,
                })
            } else {
                ScannerError::Http(HttpError::ServerError {
                    status_code: status,
                    url,
                })
            }
        } else if err.is_redirect() {
            ScannerError::Network(NetworkError::TooManyRedirects {
                url,
                max_redirects: 5,
            })
        } else {
            ScannerError::General(err.to_string())
        }
    }
}

impl From<tokio_postgres::Error> for ScannerError {
    fn from(err: tokio_postgres::Error) -> Self {
        ScannerError::Database(DatabaseError::Other(err.to_string()))
    }
}

impl From<deadpool_postgres::PoolError> for ScannerError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        ScannerError::Database(DatabaseError::ConnectionFailed {
            reason: err.to_string(),
        })
    }
}

impl From<deadpool_redis::PoolError> for ScannerError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        ScannerError::Queue(QueueError::ConnectionFailed {
            reason: err.to_string(),
        })
    }
}

impl From<deadpool_redis::redis::RedisError> for ScannerError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        if err.is_timeout() {
            ScannerError::Queue(QueueError::OperationTimeout {
                timeout: Duration::from_secs(5),
            })
        } else if err.is_connection_refusal() || err.is_connection_dropped() {
            ScannerError::Queue(QueueError::ConnectionFailed {
                reason: err.to_string(),
            })
        } else {
            ScannerError::Queue(QueueError::Other(err.to_string()))
        }
    }
}

impl From<serde_json::Error> for ScannerError {
    fn from(err: serde_json::Error) -> Self {
        ScannerError::General(format!("Serialization error: {}", err))
    }
}

/// Result type for scanner operations
pub type ScannerResult<T> = Result<T, ScannerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_retryability() {
        assert!(NetworkError::ConnectionTimeout {
            url: "http://x".into(),
            timeout: Duration::from_secs(1)
        }
        .is_retryable());
        assert!(!NetworkError::DnsResolutionFailed {
            host: "x".into()
        }
        .is_retryable());
        assert!(!NetworkError::InvalidUrl { url: "x".into() }.is_retryable());
    }

    #[test]
    fn test_http_retryability() {
        assert!(HttpError::ServerError {
            status_code: 503,
            url: "http://x".into()
        }
        .is_retryable());
        assert!(HttpError::ClientError {
            status_code: 429,
            url: "http://x".into()
        }
        .is_retryable());
        assert!(!HttpError::ClientError {
            status_code: 404,
            url: "http://x".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_top_level_retryability() {
        let err = ScannerError::Timeout {
            duration: Duration::from_secs(5),
        };
        assert!(err.is_retryable());

        let err = ScannerError::Validation("bad".into());
        assert!(!err.is_retryable());

        let err = ScannerError::PolicyViolation {
            url: "http://127.0.0.1".into(),
            reason: "loopback".into(),
        };
        assert!(!err.is_retryable());
    }
}
