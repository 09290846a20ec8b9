//! HTTP client with built-in throttling, retry and error classification.

use log::{debug, warn};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{FeedError, classify_transport};

use super::retry::{ClientOptions, Failure, classify_response, classify_transport_failure};

/// User agent sent with every upstream request.
pub const USER_AGENT: &str = "starfeed";

/// HTTP client with built-in retry logic for upstream operations.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    options: ClientOptions,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client, options: ClientOptions) -> Self {
        Self { client, options }
    }

    /// Builds a client that authenticates with `token` when present.
    pub fn build(token: Option<&str>, options: ClientOptions) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();

        if let Some(token) = token {
            let mut auth_value = HeaderValue::from_str(&format!("Bearer {}", token))?;
            auth_value.set_sensitive(true);
            headers.insert(AUTHORIZATION, auth_value);
            debug!("HTTP client configured with authentication");
        }

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(options.timeout())
            .build()?;

        Ok(Self::new(client, options))
    }

    /// Returns a reference to the underlying reqwest Client.
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// POSTs a JSON body and deserializes the JSON response.
    pub async fn post_json<B, T>(&self, url: &str, body: &B) -> Result<T, FeedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        self.post_json_with_headers(url, body)
            .await
            .map(|(value, _)| value)
    }

    /// Like [`post_json`](Self::post_json), also returning the response
    /// headers of the successful attempt.
    #[tracing::instrument(skip(self, body))]
    pub async fn post_json_with_headers<B, T>(
        &self,
        url: &str,
        body: &B,
    ) -> Result<(T, HeaderMap), FeedError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        debug!("POST JSON to {}...", url);

        let (headers, text) = self
            .send_with_retry("POST JSON", || self.client.post(url).json(body))
            .await?;

        let value = serde_json::from_str(&text).map_err(|e| {
            FeedError::InvalidResponseShape(format!("Failed to parse JSON: {}", e))
        })?;
        Ok((value, headers))
    }

    /// GETs a text document (e.g. an Atom feed).
    #[tracing::instrument(skip(self, token))]
    pub async fn get_text(
        &self,
        url: &str,
        accept: &str,
        token: Option<&str>,
    ) -> Result<String, FeedError> {
        debug!("GET text from {}...", url);

        self.send_with_retry("GET text", || {
            let mut request = self.client.get(url).header(ACCEPT, accept);
            if let Some(token) = token {
                request = request.header(AUTHORIZATION, format!("token {}", token));
            }
            request
        })
        .await
        .map(|(_, text)| text)
    }

    /// Sends the request built by `build`, retrying transient failures and
    /// waiting out rate-limit signals within the configured budgets.
    async fn send_with_retry<F>(
        &self,
        operation_name: &str,
        build: F,
    ) -> Result<(HeaderMap, String), FeedError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut retries = 0;
        let mut rate_limit_retries = 0;

        loop {
            let failure = match build().send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        let headers = response.headers().clone();
                        match response.text().await {
                            Ok(text) => return Ok((headers, text)),
                            Err(e) => classify_transport_failure(classify_transport(&e)),
                        }
                    } else {
                        let headers = response.headers().clone();
                        let body = response.text().await.unwrap_or_default();
                        classify_response(status, &headers, &body, &self.options)
                    }
                }
                Err(e) => classify_transport_failure(classify_transport(&e)),
            };

            match failure {
                Failure::RateLimited { wait, error } => {
                    if rate_limit_retries >= self.options.rate_limit_retries {
                        debug!("{}: rate limit retries exhausted", operation_name);
                        return Err(error);
                    }
                    rate_limit_retries += 1;
                    warn!(
                        "{}: rate limited (retry {}/{}), waiting {}s...",
                        operation_name,
                        rate_limit_retries,
                        self.options.rate_limit_retries,
                        wait.as_secs()
                    );
                    tokio::time::sleep(wait).await;
                }
                Failure::Retryable(error) => {
                    if retries >= self.options.retries {
                        debug!("{}: retries exhausted: {}", operation_name, error);
                        return Err(error);
                    }
                    retries += 1;
                    warn!(
                        "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                        operation_name,
                        retries,
                        self.options.retries + 1,
                        error,
                        self.options.retry_delay_ms
                    );
                    tokio::time::sleep(self.options.retry_delay()).await;
                }
                Failure::Terminal(error) => {
                    debug!("{}: non-retryable error: {}", operation_name, error);
                    return Err(error);
                }
            }
        }
    }
}
