//! Job actions.
//!
//! A [`JobAction`] is the unit of work a worker performs for each job. The
//! engine only cares whether it succeeded; what it does is up to the
//! implementation. [`HttpAction`] is the bundled implementation and issues
//! one HTTP request per job.

use crate::error::PoolError;
use crate::types::{ActionOutput, Job};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::future::Future;
use std::time::Duration;

/// Work performed for a single job.
///
/// Implementations must be shareable between workers. A returned error is
/// recorded as a failed result and never stops the run.
#[async_trait]
pub trait JobAction: Send + Sync {
    /// Execute the action for `job`.
    async fn execute(&self, job: &Job) -> Result<ActionOutput, PoolError>;
}

/// Adapter turning an async closure into a [`JobAction`].
///
/// Built with [`action_fn`].
pub struct FnAction<F> {
    f: F,
}

/// Wrap an async closure as a [`JobAction`].
///
/// The closure receives an owned copy of the job.
///
/// # Example
///
/// ```rust
/// use ratepool_lib::{action_fn, ActionOutput, Job, JobAction, PoolError};
///
/// let action = action_fn(|job: Job| async move {
///     Ok::<_, PoolError>(ActionOutput::status(if job.id.0 % 2 == 0 { 200 } else { 204 }))
/// });
/// # let _ = &action as &dyn JobAction;
/// ```
pub fn action_fn<F, Fut>(f: F) -> FnAction<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ActionOutput, PoolError>> + Send,
{
    FnAction { f }
}

#[async_trait]
impl<F, Fut> JobAction for FnAction<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ActionOutput, PoolError>> + Send,
{
    async fn execute(&self, job: &Job) -> Result<ActionOutput, PoolError> {
        (self.f)(job.clone()).await
    }
}

/// Performs one HTTP request against each job's target.
///
/// Any 2xx or 3xx status counts as success. Other statuses, connection
/// errors and timeouts are failures.
#[derive(Debug, Clone)]
pub struct HttpAction {
    /// Shared HTTP client, pooled across workers
    client: reqwest::Client,
    /// Request method
    method: Method,
    /// Headers added to every request
    headers: HeaderMap,
    /// Request body, if any
    body: Option<String>,
    /// Per-request timeout
    timeout: Duration,
}

impl HttpAction {
    /// Create a GET action with the given per-request timeout.
    ///
    /// # Errors
    ///
    /// Returns `PoolError` if the HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self, PoolError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("ratepool/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| {
                PoolError::network_with_source("Failed to create HTTP client", e.to_string())
            })?;

        Ok(Self {
            client,
            method: Method::GET,
            headers: HeaderMap::new(),
            body: None,
            timeout,
        })
    }

    /// Set the request method (case-insensitive, e.g. "post").
    pub fn with_method(mut self, method: &str) -> Result<Self, PoolError> {
        self.method = Method::from_bytes(method.trim().to_uppercase().as_bytes()).map_err(|_| {
            PoolError::invalid_config("method", format!("'{}' is not an HTTP method", method))
        })?;
        Ok(self)
    }

    /// Add a header sent with every request.
    pub fn with_header(mut self, name: &str, value: &str) -> Result<Self, PoolError> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| PoolError::invalid_config("header", format!("'{}': {}", name, e)))?;
        let value = HeaderValue::from_str(value).map_err(|e| {
            PoolError::invalid_config("header", format!("'{}': {}", name.as_str(), e))
        })?;
        self.headers.append(name, value);
        Ok(self)
    }

    /// Set the request body.
    pub fn with_body<B: Into<String>>(mut self, body: B) -> Self {
        self.body = Some(body.into());
        self
    }

    /// The configured method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The configured per-request timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

#[async_trait]
impl JobAction for HttpAction {
    async fn execute(&self, job: &Job) -> Result<ActionOutput, PoolError> {
        let mut request = self
            .client
            .request(self.method.clone(), job.target.as_str())
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            request = request.body(body.clone());
        }

        let response = request
            .send()
            .await
            .map_err(|e| PoolError::from_reqwest(e, &job.target, self.timeout))?;

        let status = response.status();
        // Read the whole body so the timing covers the full exchange.
        let body = response
            .bytes()
            .await
            .map_err(|e| PoolError::from_reqwest(e, &job.target, self.timeout))?;

        if status.is_success() || status.is_redirection() {
            Ok(ActionOutput {
                status_code: Some(status.as_u16()),
                content_length: Some(body.len() as u64),
            })
        } else {
            Err(PoolError::http_status(&job.target, status.as_u16()))
        }
    }
}
