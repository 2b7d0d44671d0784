//! Outbound HTTP execution with per-attempt timeouts and linear backoff.
//!
//! Each attempt covers sending the request and reading the whole response
//! body. Only transport failures (timeouts, refused or reset connections,
//! bodies cut short) are retried. Any HTTP status, including 5xx, is handed back to the
//! caller, which decides how to map it.
//!
//! The delay before attempt `n + 1` is `base_delay * n`. A cancellation token
//! is checked before every retry and raced against the backoff sleep, so a
//! cancelled caller stops waiting immediately.

use crate::config::ManagerConfig;
use crate::error::{ClientError, Operation, Result};
use crate::headers;
use reqwest::{Request, StatusCode};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Timeout and retry settings for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Per-attempt timeout covering connect, send and the full response body
    pub timeout: Duration,
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Linear backoff base
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(timeout: Duration, max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Delay to wait after the given (1-based) failed attempt.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

/// A fully read response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

/// Shared HTTP client plus the retry loop around it.
///
/// Cheap to clone; clones share one connection pool.
#[derive(Debug, Clone)]
pub struct HttpExecutor {
    http: reqwest::Client,
}

impl HttpExecutor {
    /// Build the pooled client used by every session of a manager.
    pub fn new(config: &ManagerConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(headers::default_headers())
            .connect_timeout(config.connect_timeout)
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .build()
            .map_err(|e| ClientError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// The underlying client, for building requests.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Execute `request`, retrying transport failures according to `policy`.
    ///
    /// Returns the first response whose body was read completely, whatever its
    /// status.
    pub async fn execute(
        &self,
        operation: Operation,
        request: Request,
        policy: &RetryPolicy,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse> {
        let mut request = request;
        request
            .headers_mut()
            .extend(headers::operation_headers(operation));
        *request.timeout_mut() = Some(policy.timeout);

        let method = request.method().clone();
        let path = request.url().path().to_string();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            attempt += 1;
            let attempt_request = request.try_clone().ok_or_else(|| {
                ClientError::Config(format!(
                    "{} request to {} has a body that cannot be replayed",
                    operation, path
                ))
            })?;

            let start = Instant::now();
            tracing::debug!(
                operation = %operation,
                method = %method,
                path = %path,
                attempt,
                "Sending request"
            );

            let outcome = match self.http.execute(attempt_request).await {
                Ok(response) => {
                    let status = response.status();
                    response.bytes().await.map(|body| HttpResponse {
                        status,
                        body: body.to_vec(),
                    })
                }
                Err(e) => Err(e),
            };

            let error = match outcome {
                Ok(response) => {
                    tracing::debug!(
                        operation = %operation,
                        method = %method,
                        path = %path,
                        status = response.status.as_u16(),
                        bytes = response.body.len(),
                        duration_ms = start.elapsed().as_millis() as u64,
                        "Received response"
                    );
                    return Ok(response);
                }
                Err(e) if e.is_builder() => {
                    return Err(ClientError::Config(format!(
                        "Invalid {} request: {}",
                        operation, e
                    )));
                }
                Err(e) => e,
            };

            tracing::warn!(
                operation = %operation,
                path = %path,
                attempt,
                max_attempts,
                timeout = error.is_timeout(),
                error = %error,
                "Request attempt failed"
            );

            if attempt >= max_attempts {
                return Err(ClientError::TransientNetwork {
                    operation,
                    attempts: attempt,
                    source: error,
                });
            }

            let delay = policy.delay_after(attempt);
            match cancel {
                Some(token) => {
                    if token.is_cancelled() {
                        return Err(ClientError::Cancelled {
                            operation,
                            attempts: attempt,
                        });
                    }
                    tokio::select! {
                        _ = token.cancelled() => {
                            return Err(ClientError::Cancelled {
                                operation,
                                attempts: attempt,
                            });
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                None => tokio::time::sleep(delay).await,
            }
            tracing::debug!(
                operation = %operation,
                next_attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying after backoff"
            );
        }
    }
}
