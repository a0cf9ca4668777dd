use crate::error::AppError;
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio::time::timeout;

/// Bounded backoff between the first attempt and its single retry
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn from_config(config: &crate::config::RetryConfig) -> Self {
        Self {
            backoff: Duration::from_millis(config.backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Base backoff plus up to 50% jitter, capped at `max_backoff`
    pub fn delay(&self) -> Duration {
        let base = self.backoff.as_millis() as u64;
        let jitter = if base > 1 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base + jitter).min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&crate::config::RetryConfig::default())
    }
}

/// Run a call against an external collaborator, retrying exactly once on a
/// transient failure.
///
/// Each attempt is bounded by `call_timeout`. A transient failure that
/// survives the retry is reported as [`AppError::BackendUnavailable`];
/// anything else is returned untouched for the caller to classify.
pub async fn with_single_retry<F, Fut, T>(
    policy: &RetryPolicy,
    backend: &str,
    call_timeout: Duration,
    request_fn: F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let first = attempt(backend, call_timeout, &request_fn).await;
    let first_error = match first {
        Ok(value) => return Ok(value),
        Err(e) if is_transient_failure(&e) => e,
        Err(e) => return Err(e),
    };

    let delay = policy.delay();
    tracing::warn!(
        backend = backend,
        error = %first_error,
        delay_ms = delay.as_millis() as u64,
        "Transient failure, retrying once"
    );
    crate::metrics::record_retry(backend);
    tokio::time::sleep(delay).await;

    match attempt(backend, call_timeout, &request_fn).await {
        Ok(value) => Ok(value),
        Err(e) if is_transient_failure(&e) => Err(AppError::BackendUnavailable {
            backend: backend.to_string(),
            detail: unavailable_detail(&e),
        }),
        Err(e) => Err(e),
    }
}

fn unavailable_detail(error: &AppError) -> String {
    match error {
        AppError::Upstream {
            status, message, ..
        } => format!("HTTP {}: {}", status, message),
        other => other.detail().unwrap_or_default().to_string(),
    }
}

async fn attempt<F, Fut, T>(
    backend: &str,
    call_timeout: Duration,
    request_fn: &F,
) -> Result<T, AppError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    match timeout(call_timeout, request_fn()).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Transport {
            backend: backend.to_string(),
            detail: format!("Request timed out after {} ms", call_timeout.as_millis()),
            timed_out: true,
        }),
    }
}

/// Determine if an error is worth one more attempt
///
/// ## Transient (returns true):
/// - Connection failures and timeouts
/// - HTTP 5xx from the collaborator
///
/// ## NOT transient (returns false):
/// - HTTP 4xx (the request itself is wrong)
/// - Schema violations and other logical failures
pub fn is_transient_failure(error: &AppError) -> bool {
    match error {
        AppError::Transport { .. } => true,
        AppError::Upstream { status, .. } => (500..=599).contains(status),

        AppError::InvalidRequest(_)
        | AppError::Unauthorized(_)
        | AppError::AmbiguousOrUnresolvable(_)
        | AppError::QuerySynthesisFailed(_)
        | AppError::SchemaViolation { .. }
        | AppError::BackendUnavailable { .. }
        | AppError::BackendQueryError { .. }
        | AppError::ConfigError(_)
        | AppError::InternalError(_) => false,
    }
}
