//! Error handling for the execution engine.
//!
//! Two kinds of failure flow through this type. Setup failures (bad
//! configuration, unreadable config files) propagate to the caller before any
//! worker starts. Job-level failures (connection refused, non-success status,
//! timeouts) never propagate: workers convert them into a failed
//! [`JobResult`](crate::JobResult) carrying the error's message.

use std::fmt;
use std::time::Duration;

/// Main error type for engine operations.
///
/// This enum covers configuration problems as well as the ways a single
/// job's action can fail.
#[derive(Debug, Clone)]
pub enum PoolError {
    /// Invalid engine configuration (zero workers, zero queue capacity, ...)
    InvalidConfig {
        field: String,
        message: String,
    },

    /// Configuration file errors (invalid TOML, conflicting settings)
    ConfigError {
        message: String,
    },

    /// File I/O errors when reading config or target lists
    FileError {
        path: String,
        message: String,
    },

    /// Target that cannot be turned into a request
    InvalidTarget {
        target: String,
        reason: String,
    },

    /// Network-related errors (connection, DNS, TLS, ...)
    NetworkError {
        message: String,
        source: Option<String>,
    },

    /// The target answered with a non-success status code
    HttpStatus {
        target: String,
        status_code: u16,
    },

    /// Timeout errors when a job's action takes too long
    Timeout {
        operation: String,
        duration: Duration,
    },

    /// An in-flight action was abandoned because a stop was requested
    Aborted {
        target: String,
    },

    /// Generic internal errors that don't fit other categories
    Internal {
        message: String,
    },
}

impl PoolError {
    /// Create a new invalid configuration error.
    pub fn invalid_config<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new configuration file error.
    pub fn config<M: Into<String>>(message: M) -> Self {
        Self::ConfigError {
            message: message.into(),
        }
    }

    /// Create a new file error.
    pub fn file_error<P: Into<String>, M: Into<String>>(path: P, message: M) -> Self {
        Self::FileError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a new invalid target error.
    pub fn invalid_target<T: Into<String>, R: Into<String>>(target: T, reason: R) -> Self {
        Self::InvalidTarget {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a new network error.
    pub fn network<M: Into<String>>(message: M) -> Self {
        Self::NetworkError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a new network error with source information.
    pub fn network_with_source<M: Into<String>, S: Into<String>>(message: M, source: S) -> Self {
        Self::NetworkError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a new non-success status error.
    pub fn http_status<T: Into<String>>(target: T, status_code: u16) -> Self {
        Self::HttpStatus {
            target: target.into(),
            status_code,
        }
    }

    /// Create a new timeout error.
    pub fn timeout<O: Into<String>>(operation: O, duration: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration,
        }
    }

    /// Create a new aborted error.
    pub fn aborted<T: Into<String>>(target: T) -> Self {
        Self::Aborted {
            target: target.into(),
        }
    }

    /// Create a new internal error.
    pub fn internal<M: Into<String>>(message: M) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Map a reqwest failure for `target` into the matching variant.
    ///
    /// reqwest does not report which timeout fired, so the caller passes the
    /// one it configured.
    pub fn from_reqwest(err: reqwest::Error, target: &str, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::timeout(format!("request to {}", target), timeout)
        } else if let Some(status) = err.status() {
            Self::http_status(target, status.as_u16())
        } else if err.is_connect() {
            Self::network_with_source("Connection failed", err.to_string())
        } else if err.is_builder() {
            Self::invalid_target(target, err.to_string())
        } else {
            Self::network_with_source("HTTP request failed", err.to_string())
        }
    }

    /// Status code carried by this error, if the target answered at all.
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status_code, .. } => Some(*status_code),
            _ => None,
        }
    }

    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Check if this error suggests the job could succeed when resubmitted.
    ///
    /// The engine never retries on its own. Results carry this flag and the
    /// report counts such failures.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NetworkError { .. }
                | Self::Timeout { .. }
                | Self::HttpStatus {
                    status_code: 429 | 500..=599,
                    ..
                }
        )
    }

    /// Short category label used to group failures in reports.
    pub fn category(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } | Self::ConfigError { .. } => "config",
            Self::FileError { .. } => "file",
            Self::InvalidTarget { .. } => "invalid target",
            Self::NetworkError { .. } => "network",
            Self::HttpStatus { .. } => "status",
            Self::Timeout { .. } => "timeout",
            Self::Aborted { .. } => "aborted",
            Self::Internal { .. } => "internal",
        }
    }
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig { field, message } => {
                write!(f, "Invalid configuration for '{}': {}", field, message)
            }
            Self::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
            Self::FileError { path, message } => {
                write!(f, "File error at '{}': {}", path, message)
            }
            Self::InvalidTarget { target, reason } => {
                write!(f, "Invalid target '{}': {}", target, reason)
            }
            Self::NetworkError { message, source } => {
                if let Some(source) = source {
                    write!(f, "Network error: {} (source: {})", message, source)
                } else {
                    write!(f, "Network error: {}", message)
                }
            }
            Self::HttpStatus {
                target,
                status_code,
            } => {
                write!(f, "HTTP {} from '{}'", status_code, target)
            }
            Self::Timeout {
                operation,
                duration,
            } => {
                write!(f, "Timeout after {:?} during: {}", duration, operation)
            }
            Self::Aborted { target } => {
                write!(f, "Request to '{}' aborted by stop request", target)
            }
            Self::Internal { message } => {
                write!(f, "Internal error: {}", message)
            }
        }
    }
}

impl std::error::Error for PoolError {}

impl From<std::io::Error> for PoolError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal {
            message: format!("I/O error: {}", err),
        }
    }
}

impl From<reqwest::Error> for PoolError {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            let target = err.url().map(|u| u.to_string()).unwrap_or_default();
            Self::http_status(target, status.as_u16())
        } else if err.is_builder() {
            Self::invalid_target(
                err.url().map(|u| u.to_string()).unwrap_or_default(),
                err.to_string(),
            )
        } else {
            Self::network_with_source("HTTP request failed", err.to_string())
        }
    }
}

impl From<toml::de::Error> for PoolError {
    fn from(err: toml::de::Error) -> Self {
        Self::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", err),
        }
    }
}
