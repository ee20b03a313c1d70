//! Utility functions for targets, durations and headers.
//!
//! These helpers are shared by the config loader and the CLI; the engine
//! itself only needs [`default_workers`].

use crate::error::PoolError;
use std::time::Duration;

/// Default worker count: the available hardware parallelism, or 1 when it
/// cannot be determined.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Parse a duration string like "500ms", "5s", "2m" or "1h".
///
/// A bare number is read as seconds. Returns `None` for anything else.
pub fn parse_duration_string(input: &str) -> Option<Duration> {
    let input = input.trim().to_lowercase();

    if let Some(ms) = input.strip_suffix("ms") {
        ms.trim().parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = input.strip_suffix('s') {
        parse_seconds(secs)
    } else if let Some(mins) = input.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .ok()
            .map(|m| Duration::from_secs(m * 60))
    } else if let Some(hours) = input.strip_suffix('h') {
        hours
            .trim()
            .parse::<u64>()
            .ok()
            .map(|h| Duration::from_secs(h * 3600))
    } else {
        parse_seconds(&input)
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    let secs = value.trim().parse::<f64>().ok()?;
    if secs.is_finite() && secs >= 0.0 {
        Some(Duration::from_secs_f64(secs))
    } else {
        None
    }
}

/// Validate a job target.
///
/// Targets must be absolute `http` or `https` URLs with a host.
pub fn validate_target(target: &str) -> Result<(), PoolError> {
    let target = target.trim();

    if target.is_empty() {
        return Err(PoolError::invalid_target(target, "Target cannot be empty"));
    }

    let url = reqwest::Url::parse(target)
        .map_err(|e| PoolError::invalid_target(target, e.to_string()))?;

    match url.scheme() {
        "http" | "https" => {}
        other => {
            return Err(PoolError::invalid_target(
                target,
                format!("Unsupported scheme '{}'", other),
            ))
        }
    }

    if url.host_str().map_or(true, str::is_empty) {
        return Err(PoolError::invalid_target(target, "Missing host"));
    }

    Ok(())
}

/// Extract targets from the contents of a target list.
///
/// One target per line. Empty lines and anything after a `#` are ignored.
pub fn parse_targets(content: &str) -> Vec<String> {
    content
        .lines()
        .filter_map(|line| {
            let target = line.split('#').next().unwrap_or("").trim();
            if target.is_empty() {
                None
            } else {
                Some(target.to_string())
            }
        })
        .collect()
}

/// Split a `Name: value` header line.
pub fn parse_header(line: &str) -> Result<(String, String), PoolError> {
    let (name, value) = line.split_once(':').ok_or_else(|| {
        PoolError::invalid_config("header", format!("'{}' is not in 'Name: value' form", line))
    })?;

    let name = name.trim();
    if name.is_empty() {
        return Err(PoolError::invalid_config(
            "header",
            format!("'{}' has an empty header name", line),
        ));
    }

    Ok((name.to_string(), value.trim().to_string()))
}
