//! HTTP client module with retry logic and error handling.

mod client;
mod retry;

pub use client::{HttpClient, USER_AGENT};
pub use retry::{
    ClientOptions, DO_NOT_RETRY, Failure, MAX_RATE_LIMIT_RETRIES, MAX_RETRIES, RETRY_AFTER_SECS,
    RETRY_DELAY_MS, TIMEOUT_MS, classify_response, classify_transport_failure,
};
