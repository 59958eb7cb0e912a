//! Invisible retries of transient transport failures.
//!
//! [`Retrying`] wraps any [`Provider`] and re-opens the stream when the
//! backend reports a retryable error (rate limit, overload, dropped
//! connection) before any data arrived. Once a chunk has been delivered
//! the request is not replayed, since the caller may already have acted
//! on it; later errors pass through unchanged.

use std::time::Duration;

use futures::StreamExt;
use rand::Rng;
use tracing::warn;

use crate::error::LlmError;
use crate::provider::{Provider, ProviderMetadata, ProviderRequest};
use crate::stream::ChunkStream;

/// Backoff policy for [`Retrying`].
///
/// ```rust
/// use std::time::Duration;
/// use llm_typed::transport::TransportRetryConfig;
///
/// let config = TransportRetryConfig {
///     max_retries: 5,
///     initial_backoff: Duration::from_millis(250),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRetryConfig {
    /// Retries after the first attempt. Default: 3.
    pub max_retries: u32,
    /// Delay before the first retry. Default: 200ms.
    pub initial_backoff: Duration,
    /// Upper bound on any single delay. Default: 10s.
    pub max_backoff: Duration,
    /// Growth factor between retries. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Fraction of the delay that is randomized, 0.0 to 1.0. Default: 0.5.
    pub jitter: f64,
}

impl Default for TransportRetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(10),
            backoff_multiplier: 2.0,
            jitter: 0.5,
        }
    }
}

/// Formula: `min(initial * multiplier^attempt, max) * random(1-jitter, 1)`
pub(crate) fn compute_backoff(config: &TransportRetryConfig, attempt: u32) -> Duration {
    let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
    let base = config.initial_backoff.as_secs_f64() * config.backoff_multiplier.powi(exponent);
    let capped = base.min(config.max_backoff.as_secs_f64()).max(0.0);

    let jitter = config.jitter.clamp(0.0, 1.0);
    let factor = if jitter > 0.0 {
        rand::rng().random_range(1.0 - jitter..=1.0)
    } else {
        1.0
    };

    Duration::from_secs_f64(capped * factor)
}

/// A provider that retries retryable failures with exponential backoff.
///
/// Retried:
/// - a retryable error from opening the stream
/// - a stream whose first item is a retryable error
///
/// When the budget runs out the last error is returned inside
/// [`LlmError::RetryExhausted`].
#[derive(Debug, Clone)]
pub struct Retrying<P> {
    inner: P,
    config: TransportRetryConfig,
}

impl<P> Retrying<P> {
    /// Wraps `inner`.
    pub fn new(inner: P, config: TransportRetryConfig) -> Self {
        Self { inner, config }
    }

    /// The wrapped provider.
    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// The backoff policy.
    pub fn config(&self) -> &TransportRetryConfig {
        &self.config
    }
}

impl<P: Provider> Provider for Retrying<P> {
    async fn stream(&self, request: &ProviderRequest) -> Result<ChunkStream, LlmError> {
        let mut attempt = 0;
        loop {
            let error = match self.inner.stream(request).await {
                Ok(mut stream) => match stream.next().await {
                    Some(Err(e)) if e.is_retryable() => e,
                    Some(first) => {
                        let replay = futures::stream::iter(std::iter::once(first));
                        return Ok(Box::pin(replay.chain(stream)));
                    }
                    None => return Ok(stream),
                },
                Err(e) if e.is_retryable() => e,
                Err(e) => return Err(e),
            };

            if attempt >= self.config.max_retries {
                return Err(LlmError::RetryExhausted {
                    attempts: attempt + 1,
                    last_error: Box::new(error),
                });
            }
            let backoff = compute_backoff(&self.config, attempt);
            attempt += 1;
            warn!(
                attempt,
                backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
                error = %error,
                "retrying transport failure"
            );
            tokio::time::sleep(backoff).await;
        }
    }

    fn metadata(&self) -> ProviderMetadata {
        self.inner.metadata()
    }
}
