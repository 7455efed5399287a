//! Timeout and retry wrapper around an [`HttpClient`] transport.
//!
//! The guarded client knows nothing about circuits or inbound rate limits.
//! Every attempt is bounded by a hard timeout; any failure (timeout, transport
//! error or non-2xx status) is retried with a linearly growing delay until the
//! attempt budget is spent, then the last error is returned.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::http_client::{HttpClient, HttpError, HttpRequest, HttpResponse};
use crate::retry::RetryConfig;
use crate::throttling::OutboundBudget;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout and retry settings for one guarded client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardedClientConfig {
    pub timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for GuardedClientConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            retry: RetryConfig::default(),
        }
    }
}

/// Outbound client applying a hard timeout and bounded linear retry.
#[derive(Clone)]
pub struct GuardedClient {
    transport: Arc<dyn HttpClient>,
    config: GuardedClientConfig,
    budget: Option<OutboundBudget>,
    weight: u32,
}

impl GuardedClient {
    pub fn new(transport: Arc<dyn HttpClient>, config: GuardedClientConfig) -> Self {
        Self {
            transport,
            config,
            budget: None,
            weight: 1,
        }
    }

    /// Charges `weight` against a shared outbound budget before every attempt.
    /// The wait for budget is bounded by the attempt timeout.
    pub fn with_budget(mut self, budget: OutboundBudget, weight: u32) -> Self {
        self.budget = Some(budget);
        self.weight = weight;
        self
    }

    pub fn config(&self) -> GuardedClientConfig {
        self.config
    }

    /// Sends `request`, retrying failures per the configured schedule.
    ///
    /// # Errors
    ///
    /// Returns the error of the final attempt:
    /// - [`HttpError::Timeout`] if the attempt exceeded the timeout
    /// - [`HttpError::Transport`] for connection or body read failures
    /// - [`HttpError::Status`] for a non-2xx response
    pub async fn request(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let attempts = self.config.retry.max_attempts();
        let mut attempt = 1;

        loop {
            match self.attempt(request.clone()).await {
                Ok(response) => {
                    if attempt > 1 {
                        debug!(target_url = %request.url, attempt, "request succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(error) if attempt < attempts => {
                    let delay = self.config.retry.delay_after_attempt(attempt);
                    warn!(
                        target_url = %request.url,
                        attempt,
                        attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "request attempt failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// One attempt. Waiting for outbound budget counts against the timeout.
    async fn attempt(&self, request: HttpRequest) -> Result<HttpResponse, HttpError> {
        let timeout = self.config.timeout;
        let exchange = async {
            if let Some(budget) = &self.budget {
                budget.acquire(self.weight).await;
            }
            self.transport.execute(request.clone()).await
        };
        let response = match tokio::time::timeout(timeout, exchange).await {
            Ok(result) => result?,
            Err(_) => return Err(HttpError::timeout(&request, timeout)),
        };

        if !response.is_success() {
            return Err(HttpError::status(&request, &response));
        }
        Ok(response)
    }
}

impl std::fmt::Debug for GuardedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GuardedClient")
            .field("config", &self.config)
            .field("budget", &self.budget)
            .field("weight", &self.weight)
            .finish()
    }
}
