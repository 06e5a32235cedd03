//! Retrying HTTP client used for every remote generation call.
//!
//! A single POST is classified as success (2xx), retryable (429, 5xx or a
//! transport error) or rejected (any other status). Retryable outcomes are
//! re-attempted after `base * 2^i + jitter`, up to `max_attempts` calls and
//! an optional cap on the cumulative wait.

use crate::core::config::RetryConfig;
use crate::core::error::{GenerationError, GenerationResult};
use anyhow::Result;
use async_trait::async_trait;
use log::{debug, error, warn};
use rand::Rng;
use serde_json::Value;
use std::time::Duration;
use tokio::time::Instant;

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// One POST of a JSON body. `Err` stands for a transport-level failure
/// (DNS, connect, timeout, broken stream), never for an HTTP status.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn post_json(&self, url: &str, body: &Value) -> Result<RawResponse>;
}

pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn post_json(&self, url: &str, body: &Value) -> Result<RawResponse> {
        let resp = self.client.post(url).json(body).send().await?;
        let status = resp.status().as_u16();
        let body = resp.text().await?;
        Ok(RawResponse { status, body })
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub jitter_max: Duration,
    /// Upper bound on time spent across all attempts and delays.
    pub total_budget: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(cfg: &RetryConfig) -> Self {
        Self {
            max_attempts: cfg.max_attempts,
            base_delay: Duration::from_millis(cfg.base_delay_ms),
            jitter_max: Duration::from_millis(cfg.jitter_max_ms),
            total_budget: cfg.total_budget(),
        }
    }
}

impl RetryPolicy {
    /// No delays at all; used where the remote side is simulated.
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            base_delay: Duration::ZERO,
            jitter_max: Duration::ZERO,
            total_budget: None,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Deterministic part of the wait after failed attempt `attempt` (0-indexed).
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.base_delay.saturating_mul(factor)
    }

    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let jitter_ms = self.jitter_max.as_millis() as u64;
        let jitter = if jitter_ms == 0 {
            0
        } else {
            rand::rng().random_range(0..=jitter_ms)
        };
        self.base_backoff(attempt) + Duration::from_millis(jitter)
    }
}

pub fn is_retryable_status(status: u16) -> bool {
    status == 429 || status >= 500
}

fn is_success(status: u16) -> bool {
    (200..300).contains(&status)
}

/// Drops the query string, which carries the API key.
fn redact(url: &str) -> &str {
    url.split('?').next().unwrap_or(url)
}

pub struct RequestClient<T: Transport> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> RequestClient<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends `body` to `url` and returns the parsed JSON of the first 2xx
    /// response.
    pub async fn send(&self, url: &str, body: &Value) -> GenerationResult<Value> {
        let attempts = self.policy.attempts();
        let started = Instant::now();
        let endpoint = redact(url);
        let mut last_failure = String::new();

        for attempt in 0..attempts {
            debug!("POST {} (attempt {}/{})", endpoint, attempt + 1, attempts);

            match self.transport.post_json(url, body).await {
                Ok(resp) if is_success(resp.status) => {
                    return serde_json::from_str(&resp.body).map_err(|e| {
                        GenerationError::malformed(format!(
                            "{} returned a non-JSON body: {}",
                            endpoint, e
                        ))
                    });
                }
                Ok(resp) if is_retryable_status(resp.status) => {
                    last_failure = format!("HTTP {}", resp.status);
                }
                Ok(resp) => {
                    error!("{} rejected the request with HTTP {}", endpoint, resp.status);
                    return Err(GenerationError::RejectedRequest {
                        status: resp.status,
                        body: resp.body,
                    });
                }
                Err(e) => {
                    last_failure = format!("transport error: {:#}", e);
                }
            }

            if attempt + 1 == attempts {
                break;
            }

            let delay = self.policy.backoff_delay(attempt);
            if let Some(budget) = self.policy.total_budget {
                if started.elapsed() + delay > budget {
                    error!(
                        "{} still failing after {} attempt(s), retry budget of {:?} exhausted",
                        endpoint,
                        attempt + 1,
                        budget
                    );
                    return Err(GenerationError::TransientServiceFailure {
                        attempts: attempt + 1,
                        reason: format!("{} (retry budget exhausted)", last_failure),
                    });
                }
            }

            warn!(
                "{} failed ({}), retrying in {} ms (attempt {}/{})",
                endpoint,
                last_failure,
                delay.as_millis(),
                attempt + 2,
                attempts
            );
            tokio::time::sleep(delay).await;
        }

        error!("{} failed after {} attempt(s): {}", endpoint, attempts, last_failure);
        Err(GenerationError::TransientServiceFailure {
            attempts,
            reason: last_failure,
        })
    }
}
