//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and `RP_*`
//! environment variables, and merging them with proper precedence rules:
//! command line > environment > local file > global file > XDG file >
//! built-in defaults.

use crate::error::PoolError;
use crate::types::{EngineConfig, InFlightPolicy, LimiterScope, MAX_WORKERS};
use crate::utils::parse_duration_string;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Configuration loaded from TOML files.
///
/// ```toml
/// [defaults]
/// workers = 8
/// qps = 50
/// limiter = "per-worker"
/// duration = "30s"
///
/// [request]
/// body = '{"ping": true}'
///
/// [request.headers]
/// Content-Type = "application/json"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Default values for run options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Request shape for the HTTP action
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request: Option<RequestConfig>,
}

/// Default configuration values that map to CLI options.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultsConfig {
    /// Number of concurrent workers
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workers: Option<usize>,

    /// Total number of jobs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<usize>,

    /// Run duration (as string, e.g. "10s", "3m")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,

    /// Rate limit in queries per second
    #[serde(skip_serializing_if = "Option::is_none")]
    pub qps: Option<f64>,

    /// Limiter scope: "global" or "per-worker"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limiter: Option<String>,

    /// Job queue capacity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_capacity: Option<usize>,

    /// Per-request timeout (as string, e.g. "5s")
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// HTTP method
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// In-flight policy: "finish" or "abort"
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<String>,
}

/// Request settings for the HTTP action.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RequestConfig {
    /// Headers sent with every request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,

    /// Request body
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

impl DefaultsConfig {
    /// Overlay these values on `config`.
    ///
    /// `method` is not part of the engine configuration and is left to the
    /// caller.
    pub fn apply_to(&self, mut config: EngineConfig) -> Result<EngineConfig, PoolError> {
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if let Some(requests) = self.requests {
            config.requests = requests;
        }
        if let Some(duration) = &self.duration {
            config.duration = Some(parse_duration_field("duration", duration)?);
        }
        if let Some(qps) = self.qps {
            config.qps = qps;
        }
        if let Some(limiter) = &self.limiter {
            config.limiter_scope = limiter.parse()?;
        }
        if let Some(capacity) = self.queue_capacity {
            config.queue_capacity = capacity;
        }
        if let Some(timeout) = &self.timeout {
            config.timeout = parse_duration_field("timeout", timeout)?;
        }
        if let Some(in_flight) = &self.in_flight {
            config.in_flight = in_flight.parse()?;
        }
        Ok(config)
    }
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to log which files were picked up
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error if reading, parsing or
    /// validation fails.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, PoolError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(PoolError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            PoolError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content)?;
        self.validate_config(&config)?;

        debug!(path = %path.display(), "loaded configuration file");
        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// Looks for configuration files in the XDG config directory, the home
    /// directory and the current directory, later files overriding earlier
    /// ones. Files that fail to load are skipped with a warning.
    pub fn discover_and_load(&self) -> Result<FileConfig, PoolError> {
        let mut merged_config = FileConfig::default();
        let mut loaded_files = Vec::new();

        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    merged_config = self.merge_configs(merged_config, config);
                    loaded_files.push(path);
                }
                Err(e) => warn!(path = %path.display(), "ignoring configuration file: {}", e),
            }
        }

        if self.verbose && loaded_files.len() > 1 {
            let order: Vec<String> = loaded_files
                .iter()
                .map(|p| p.display().to_string())
                .collect();
            debug!(files = ?order, "multiple config files merged, last wins");
        }

        Ok(merged_config)
    }

    /// Get the local configuration file path.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        ["./ratepool.toml", "./.ratepool.toml"]
            .iter()
            .map(|candidate| PathBuf::from(*candidate))
            .find(|path| path.exists())
    }

    /// Get the global configuration file path.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".ratepool.toml", "ratepool.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Get the XDG configuration file path.
    ///
    /// Follows the XDG Base Directory Specification.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("ratepool").join("config.toml");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Merge two configurations with proper precedence.
    ///
    /// Values from `higher` take precedence over values from `lower`.
    pub fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            defaults: match (lower.defaults, higher.defaults) {
                (Some(lower_defaults), Some(higher_defaults)) => Some(DefaultsConfig {
                    workers: higher_defaults.workers.or(lower_defaults.workers),
                    requests: higher_defaults.requests.or(lower_defaults.requests),
                    duration: higher_defaults.duration.or(lower_defaults.duration),
                    qps: higher_defaults.qps.or(lower_defaults.qps),
                    limiter: higher_defaults.limiter.or(lower_defaults.limiter),
                    queue_capacity: higher_defaults
                        .queue_capacity
                        .or(lower_defaults.queue_capacity),
                    timeout: higher_defaults.timeout.or(lower_defaults.timeout),
                    method: higher_defaults.method.or(lower_defaults.method),
                    in_flight: higher_defaults.in_flight.or(lower_defaults.in_flight),
                }),
                (lower_defaults, higher_defaults) => higher_defaults.or(lower_defaults),
            },
            request: match (lower.request, higher.request) {
                (Some(lower_request), Some(higher_request)) => {
                    // Headers merge key by key; the higher file wins conflicts.
                    let headers = match (lower_request.headers, higher_request.headers) {
                        (Some(mut lower_headers), Some(higher_headers)) => {
                            lower_headers.extend(higher_headers);
                            Some(lower_headers)
                        }
                        (lower_headers, higher_headers) => higher_headers.or(lower_headers),
                    };
                    Some(RequestConfig {
                        headers,
                        body: higher_request.body.or(lower_request.body),
                    })
                }
                (lower_request, higher_request) => higher_request.or(lower_request),
            },
        }
    }

    /// Validate a configuration for common issues.
    pub fn validate_config(&self, config: &FileConfig) -> Result<(), PoolError> {
        if let Some(defaults) = &config.defaults {
            if let Some(workers) = defaults.workers {
                if workers == 0 || workers > MAX_WORKERS {
                    return Err(PoolError::config(format!(
                        "workers must be between 1 and {}",
                        MAX_WORKERS
                    )));
                }
            }

            if defaults.queue_capacity == Some(0) {
                return Err(PoolError::config("queue_capacity must be at least 1"));
            }

            if let Some(qps) = defaults.qps {
                if !qps.is_finite() {
                    return Err(PoolError::config("qps must be a finite number"));
                }
            }

            for (field, value) in [("duration", &defaults.duration), ("timeout", &defaults.timeout)]
            {
                if let Some(value) = value {
                    parse_duration_field(field, value)
                        .map_err(|_| PoolError::config(duration_format_message(field, value)))?;
                }
            }

            if let Some(limiter) = &defaults.limiter {
                limiter
                    .parse::<LimiterScope>()
                    .map_err(|e| PoolError::config(e.to_string()))?;
            }

            if let Some(in_flight) = &defaults.in_flight {
                in_flight
                    .parse::<InFlightPolicy>()
                    .map_err(|e| PoolError::config(e.to_string()))?;
            }

            if let Some(method) = &defaults.method {
                if method.trim().is_empty() {
                    return Err(PoolError::config("method cannot be empty"));
                }
            }
        }

        if let Some(headers) = config.request.as_ref().and_then(|r| r.headers.as_ref()) {
            if headers.keys().any(|name| name.trim().is_empty()) {
                return Err(PoolError::config("header names cannot be empty"));
            }
        }

        Ok(())
    }
}

/// Environment variable configuration that mirrors CLI options.
///
/// This represents configuration values that can be set via `RP_*`
/// environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub workers: Option<usize>,
    pub requests: Option<usize>,
    pub duration: Option<String>,
    pub qps: Option<f64>,
    pub limiter: Option<String>,
    pub queue_capacity: Option<usize>,
    pub timeout: Option<String>,
    pub method: Option<String>,
    pub in_flight: Option<String>,
    pub json: Option<bool>,
    pub csv: Option<bool>,
    pub file: Option<String>,
    pub config: Option<String>,
}

impl EnvConfig {
    /// Overlay these values on `config`.
    pub fn apply_to(&self, config: EngineConfig) -> Result<EngineConfig, PoolError> {
        DefaultsConfig {
            workers: self.workers,
            requests: self.requests,
            duration: self.duration.clone(),
            qps: self.qps,
            limiter: self.limiter.clone(),
            queue_capacity: self.queue_capacity,
            timeout: self.timeout.clone(),
            method: None,
            in_flight: self.in_flight.clone(),
        }
        .apply_to(config)
    }

    /// Check if output format conflicts exist (JSON and CSV both set).
    pub fn has_output_format_conflict(&self) -> bool {
        matches!((self.json, self.csv), (Some(true), Some(true)))
    }
}

/// Load configuration from environment variables.
///
/// Parses all `RP_*` environment variables and returns a structured
/// configuration. Invalid values are logged as warnings and ignored.
pub fn load_env_config() -> EnvConfig {
    load_env_config_from(|key| env::var(key).ok())
}

/// Same as [`load_env_config`], reading variables through `lookup`.
pub fn load_env_config_from<F>(lookup: F) -> EnvConfig
where
    F: Fn(&str) -> Option<String>,
{
    EnvConfig {
        workers: env_parsed(&lookup, "RP_WORKERS", |v| {
            v.parse::<usize>()
                .ok()
                .filter(|n| (1..=MAX_WORKERS).contains(n))
        }),
        requests: env_parsed(&lookup, "RP_REQUESTS", |v| v.parse::<usize>().ok()),
        duration: env_parsed(&lookup, "RP_DURATION", valid_duration),
        qps: env_parsed(&lookup, "RP_QPS", |v| {
            v.parse::<f64>().ok().filter(|q| q.is_finite())
        }),
        limiter: env_parsed(&lookup, "RP_LIMITER", |v| {
            v.parse::<LimiterScope>().ok().map(|_| v.to_string())
        }),
        queue_capacity: env_parsed(&lookup, "RP_QUEUE_CAPACITY", |v| {
            v.parse::<usize>().ok().filter(|n| *n > 0)
        }),
        timeout: env_parsed(&lookup, "RP_TIMEOUT", valid_duration),
        method: env_parsed(&lookup, "RP_METHOD", non_empty),
        in_flight: env_parsed(&lookup, "RP_IN_FLIGHT", |v| {
            v.parse::<InFlightPolicy>().ok().map(|_| v.to_string())
        }),
        json: env_parsed(&lookup, "RP_JSON", parse_bool),
        csv: env_parsed(&lookup, "RP_CSV", parse_bool),
        file: env_parsed(&lookup, "RP_FILE", non_empty),
        config: env_parsed(&lookup, "RP_CONFIG", non_empty),
    }
}

fn env_parsed<T, L, P>(lookup: &L, key: &str, parse: P) -> Option<T>
where
    L: Fn(&str) -> Option<String>,
    P: FnOnce(&str) -> Option<T>,
{
    let raw = lookup(key)?;
    match parse(raw.trim()) {
        Some(value) => {
            debug!("using {}={}", key, raw);
            Some(value)
        }
        None => {
            warn!("ignoring invalid {}='{}'", key, raw);
            None
        }
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn non_empty(value: &str) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn valid_duration(value: &str) -> Option<String> {
    parse_duration_string(value)
        .filter(|d| !d.is_zero())
        .map(|_| value.to_string())
}

fn parse_duration_field(field: &str, value: &str) -> Result<std::time::Duration, PoolError> {
    parse_duration_string(value)
        .filter(|d| !d.is_zero())
        .ok_or_else(|| PoolError::invalid_config(field, duration_format_message(field, value)))
}

fn duration_format_message(field: &str, value: &str) -> String {
    format!(
        "Invalid {} '{}'. Use a positive duration like '500ms', '10s', '2m'",
        field, value
    )
}
