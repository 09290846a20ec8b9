//! Retry policy of the HTTP client: which failures are retried, and how long
//! to wait before retrying.

use std::time::Duration;

use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

use crate::error::{FeedError, classify_status, quota_exhausted, rate_limit_reset};

/// Default number of retries for transient (5xx, transport) failures.
pub const MAX_RETRIES: usize = 5;

/// Default number of waits on a rate-limit signal before giving up.
pub const MAX_RATE_LIMIT_RETRIES: usize = 1;

/// Delay between retries of transient failures in milliseconds.
pub const RETRY_DELAY_MS: u64 = 1000;

/// Default wait on a rate-limit signal without a `retry-after` header.
pub const RETRY_AFTER_SECS: u64 = 15;

/// Default per-request timeout in milliseconds.
pub const TIMEOUT_MS: u64 = 60_000;

/// Rate-limit waits longer than this fail immediately instead of sleeping.
pub const MAX_RATE_LIMIT_WAIT_SECS: u64 = 60;

/// Statuses that are never retried.
pub const DO_NOT_RETRY: [u16; 5] = [400, 401, 403, 404, 422];

/// Tunables of the upstream client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClientOptions {
    pub retries: usize,
    pub rate_limit_retries: usize,
    pub retry_after_secs: u64,
    pub max_rate_limit_wait_secs: u64,
    pub retry_delay_ms: u64,
    pub timeout_ms: u64,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            retries: MAX_RETRIES,
            rate_limit_retries: MAX_RATE_LIMIT_RETRIES,
            retry_after_secs: RETRY_AFTER_SECS,
            max_rate_limit_wait_secs: MAX_RATE_LIMIT_WAIT_SECS,
            retry_delay_ms: RETRY_DELAY_MS,
            timeout_ms: TIMEOUT_MS,
        }
    }
}

impl ClientOptions {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

/// What the client should do with a failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure {
    /// Wait for the given duration, then retry against the rate-limit budget.
    RateLimited { wait: Duration, error: FeedError },
    /// Retry against the transient-failure budget.
    Retryable(FeedError),
    /// Give up immediately.
    Terminal(FeedError),
}

/// Decides how to handle a non-success response.
pub fn classify_response(
    status: StatusCode,
    headers: &HeaderMap,
    body: &str,
    options: &ClientOptions,
) -> Failure {
    let error = classify_status(status, headers, body);

    if let FeedError::RateLimited { .. } = error {
        return match rate_limit_wait(headers, options) {
            Some(wait) => Failure::RateLimited { wait, error },
            None => Failure::Terminal(error),
        };
    }

    if DO_NOT_RETRY.contains(&status.as_u16()) {
        return Failure::Terminal(error);
    }

    if status.is_server_error() {
        return Failure::Retryable(error);
    }

    Failure::Terminal(error)
}

/// Decides how to handle a transport failure.
pub fn classify_transport_failure(error: FeedError) -> Failure {
    match error {
        FeedError::Timeout(_) | FeedError::Network(_) | FeedError::UpstreamUnavailable(_) => {
            Failure::Retryable(error)
        }
        other => Failure::Terminal(other),
    }
}

/// How long to wait on a rate-limit signal, or `None` when the wait exceeds
/// the configured ceiling.
fn rate_limit_wait(headers: &HeaderMap, options: &ClientOptions) -> Option<Duration> {
    let secs = if let Some(after) = headers
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
    {
        after
    } else if quota_exhausted(headers) {
        match rate_limit_reset(headers) {
            Some(reset) => (reset - Utc::now()).num_seconds().max(0) as u64,
            None => options.retry_after_secs,
        }
    } else {
        options.retry_after_secs
    };

    if secs > options.max_rate_limit_wait_secs {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    fn headers(pairs: &[(&'static str, &str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (k, v) in pairs {
            map.insert(*k, HeaderValue::from_str(v).unwrap());
        }
        map
    }

    #[test]
    fn test_do_not_retry_statuses_are_terminal() {
        let options = ClientOptions::default();
        for code in DO_NOT_RETRY {
            let status = StatusCode::from_u16(code).unwrap();
            let failure = classify_response(status, &HeaderMap::new(), "", &options);
            assert!(
                matches!(failure, Failure::Terminal(_)),
                "expected {} to be terminal",
                code
            );
        }
    }

    #[test]
    fn test_server_errors_are_retryable() {
        let options = ClientOptions::default();
        for code in [500u16, 502, 503, 504] {
            let status = StatusCode::from_u16(code).unwrap();
            let failure = classify_response(status, &HeaderMap::new(), "", &options);
            assert!(matches!(
                failure,
                Failure::Retryable(FeedError::UpstreamUnavailable(_))
            ));
        }
    }

    #[test]
    fn test_secondary_rate_limit_uses_retry_after() {
        let options = ClientOptions::default();
        let failure = classify_response(
            StatusCode::FORBIDDEN,
            &headers(&[("retry-after", "7")]),
            r#"{"message": "You have exceeded a secondary rate limit"}"#,
            &options,
        );
        match failure {
            Failure::RateLimited { wait, .. } => assert_eq!(wait, Duration::from_secs(7)),
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[test]
    fn test_rate_limit_without_header_uses_default_wait() {
        let options = ClientOptions {
            retry_after_secs: 3,
            ..Default::default()
        };
        let failure = classify_response(StatusCode::TOO_MANY_REQUESTS, &HeaderMap::new(), "", &options);
        assert!(matches!(
            failure,
            Failure::RateLimited { wait, .. } if wait == Duration::from_secs(3)
        ));
    }

    #[test]
    fn test_rate_limit_wait_beyond_ceiling_is_terminal() {
        let options = ClientOptions::default();
        let failure = classify_response(
            StatusCode::FORBIDDEN,
            &headers(&[("retry-after", "3600")]),
            "API rate limit exceeded",
            &options,
        );
        assert!(matches!(
            failure,
            Failure::Terminal(FeedError::RateLimited { .. })
        ));
    }

    #[test]
    fn test_transport_failures() {
        assert!(matches!(
            classify_transport_failure(FeedError::Timeout("t".into())),
            Failure::Retryable(_)
        ));
        assert!(matches!(
            classify_transport_failure(FeedError::InvalidResponseShape("x".into())),
            Failure::Terminal(_)
        ));
    }
}
