//! Error taxonomy for upstream failures and the classification rules that map
//! raw HTTP, transport and GraphQL failures onto it.

use chrono::{DateTime, Local, TimeZone, Utc};
use reqwest::StatusCode;
use reqwest::header::HeaderMap;

/// Classified failure of an upstream call or a fan-out run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FeedError {
    /// HTTP 401 or a "bad credentials" message. Terminal; the session must be refreshed.
    #[error("Authentication failed: {0}. Sign in again or check GITHUB_TOKEN.")]
    Unauthorized(String),

    /// Primary or secondary rate limit exhausted. Terminal for the current run.
    #[error("{message}")]
    RateLimited {
        message: String,
        reset_at: Option<DateTime<Utc>>,
    },

    /// The request exceeded its timeout.
    #[error("Request timeout contacting GitHub: {0}")]
    Timeout(String),

    /// Connection reset, DNS failure and similar transport errors.
    #[error("Network error contacting GitHub: {0}")]
    Network(String),

    /// 5xx that survived the client's own retry budget.
    #[error("GitHub API temporarily unavailable: {0}")]
    UpstreamUnavailable(String),

    /// Client errors that will not succeed on retry (400, 403, 404, 422).
    #[error("Request rejected by GitHub (HTTP {status}): {message}")]
    Rejected { status: u16, message: String },

    /// The payload did not have the expected shape.
    #[error("Invalid response from GitHub API: {0}")]
    InvalidResponseShape(String),
}

impl FeedError {
    /// Whether the caller may retry this failure with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FeedError::Timeout(_) | FeedError::Network(_))
    }

    /// Whether this failure must stop the current fan-out run.
    pub fn halts_run(&self) -> bool {
        matches!(
            self,
            FeedError::Unauthorized(_) | FeedError::RateLimited { .. }
        )
    }

    /// Builds a rate-limit error whose message carries the reset time.
    pub fn rate_limited(reset_at: Option<DateTime<Utc>>) -> Self {
        let mut message = "GitHub API rate limit exceeded.".to_string();
        if let Some(reset) = reset_at {
            message.push_str(&format!(" Resets at {}.", format_reset_time(reset)));
        }
        FeedError::RateLimited { message, reset_at }
    }
}

/// Formats a reset instant as local wall-clock time.
pub fn format_reset_time(reset_at: DateTime<Utc>) -> String {
    reset_at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

/// Human-readable message for a run halted by `remaining <= 0`.
pub fn rate_limit_reached_message(
    used: u32,
    limit: u32,
    total_cost: u32,
    reset_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> String {
    let seconds = (reset_at - now).num_seconds().max(0);
    let minutes = (seconds + 59) / 60;
    format!(
        "GitHub API rate limit reached ({}/{}, Cost: {}). Resets in {} minutes at {}",
        used,
        limit,
        total_cost,
        minutes,
        format_reset_time(reset_at)
    )
}

fn mentions_rate_limit(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("rate limit") || lower.contains("secondary rate")
}

fn mentions_bad_credentials(text: &str) -> bool {
    text.to_lowercase().contains("bad credentials")
}

/// Reads `x-ratelimit-reset` (epoch seconds).
pub fn rate_limit_reset(headers: &HeaderMap) -> Option<DateTime<Utc>> {
    headers
        .get("x-ratelimit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
}

/// Whether the headers report an exhausted primary quota.
pub fn quota_exhausted(headers: &HeaderMap) -> bool {
    headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false)
}

/// Classifies a non-success HTTP response.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, body: &str) -> FeedError {
    let message = summarize_body(body);

    if status == StatusCode::UNAUTHORIZED || mentions_bad_credentials(body) {
        return FeedError::Unauthorized("Bad credentials".to_string());
    }

    match status {
        StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS
            if status == StatusCode::TOO_MANY_REQUESTS
                || mentions_rate_limit(body)
                || quota_exhausted(headers) =>
        {
            FeedError::rate_limited(rate_limit_reset(headers))
        }
        s if s.is_server_error() => {
            FeedError::UpstreamUnavailable(format!("HTTP {} {}", s.as_u16(), message))
        }
        s => FeedError::Rejected {
            status: s.as_u16(),
            message,
        },
    }
}

/// Classifies a transport-level reqwest failure.
pub fn classify_transport(error: &reqwest::Error) -> FeedError {
    if error.is_timeout() {
        return FeedError::Timeout(error.to_string());
    }
    if error.is_decode() {
        return FeedError::InvalidResponseShape(error.to_string());
    }
    if let Some(status) = error.status() {
        return classify_status(status, &HeaderMap::new(), &error.to_string());
    }
    FeedError::Network(error.to_string())
}

/// Classifies an error entry of a GraphQL response body.
///
/// GraphQL rate limits arrive with status 200; `reset_at` comes from the
/// headers of that response.
pub fn classify_graphql(
    kind: Option<&str>,
    message: &str,
    reset_at: Option<DateTime<Utc>>,
) -> FeedError {
    if mentions_bad_credentials(message) {
        return FeedError::Unauthorized("Bad credentials".to_string());
    }
    if kind == Some("RATE_LIMITED") || mentions_rate_limit(message) {
        return FeedError::rate_limited(reset_at);
    }
    FeedError::InvalidResponseShape(message.to_string())
}

fn summarize_body(body: &str) -> String {
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(body)
        && let Some(msg) = value.get("message").and_then(|m| m.as_str())
    {
        return msg.to_string();
    }
    body.chars().take(200).collect()
}
