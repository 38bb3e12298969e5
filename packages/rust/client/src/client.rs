//! The shared query client.

use std::future::Future;
use std::time::Duration;

use reqwest::header::{ACCEPT, RETRY_AFTER};
use reqwest::{Client, Method, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, error, warn};

use conceptlink_shared::{ConceptLinkError, Result, RetryConfig};

use crate::policy::RetryPolicy;

/// User-Agent string for every outbound request.
const USER_AGENT: &str = concat!("ConceptLink/", env!("CARGO_PKG_VERSION"));

/// Default per-request timeout.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// HTTP client with a bounded retry policy. Cheap to clone; clones share the
/// connection pool.
#[derive(Debug, Clone)]
pub struct QueryClient {
    client: Client,
    policy: RetryPolicy,
    request_interval: Duration,
}

impl QueryClient {
    /// Build a client applying `policy` with the given per-request timeout.
    pub fn new(policy: RetryPolicy, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .timeout(timeout)
            .build()
            .map_err(|e| ConceptLinkError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            policy,
            request_interval: Duration::ZERO,
        })
    }

    /// Build a client from the `[retry]` config section.
    pub fn from_config(config: &RetryConfig) -> Result<Self> {
        Ok(Self::new(RetryPolicy::from(config), config.timeout())?
            .with_request_interval(config.request_interval()))
    }

    /// Build a client with the default policy.
    pub fn with_defaults() -> Result<Self> {
        Self::new(
            RetryPolicy::default(),
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        )
    }

    /// Sleep this long before every request, to pace calls to rate-limited services.
    pub fn with_request_interval(mut self, interval: Duration) -> Self {
        self.request_interval = interval;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// `GET url?params`, retried per policy. Only 2xx responses are returned.
    pub async fn get(&self, url: &str, params: &[(&str, &str)]) -> Result<Response> {
        self.send(Method::GET, url, params).await
    }

    /// `GET` and decode the JSON body.
    ///
    /// The body is read inside the retry loop, so a connection dropped
    /// mid-body is retried like any other transport failure. Only a body
    /// that arrives whole but does not decode is a parse error.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let body = self
            .with_retries(Method::GET, url, params, Response::bytes)
            .await?;
        serde_json::from_slice(&body)
            .map_err(|e| ConceptLinkError::parse(format!("{url}: invalid JSON body: {e}")))
    }

    /// Issue a request, retrying transient failures when `method` is retryable.
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<Response> {
        self.with_retries(method, url, params, |response| async move {
            Ok::<_, reqwest::Error>(response)
        })
        .await
    }

    /// The retry loop. `read` turns a 2xx response into the result; an error
    /// from it counts as a transient transport failure.
    async fn with_retries<T, F, Fut>(
        &self,
        method: Method,
        url: &str,
        params: &[(&str, &str)],
        read: F,
    ) -> Result<T>
    where
        F: Fn(Response) -> Fut,
        Fut: Future<Output = reqwest::Result<T>>,
    {
        let retryable_method = self.policy.is_retryable_method(&method);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            if !self.request_interval.is_zero() {
                tokio::time::sleep(self.request_interval).await;
            }

            debug!(%method, url, attempt, "sending request");
            let outcome = self
                .client
                .request(method.clone(), url)
                .query(params)
                .header(ACCEPT, "application/json")
                .send()
                .await;

            let (reason, retry_after) = match outcome {
                Ok(response) if response.status().is_success() => match read(response).await {
                    Ok(value) => return Ok(value),
                    Err(e) => {
                        if !retryable_method {
                            return Err(ConceptLinkError::Network(format!("{url}: {e}")));
                        }
                        (format!("body: {e}"), None)
                    }
                },
                Ok(response) => {
                    let status = response.status().as_u16();
                    if !retryable_method || !self.policy.is_retryable_status(status) {
                        debug!(url, status, attempt, "non-retryable status");
                        return Err(ConceptLinkError::Http {
                            url: url.to_string(),
                            status,
                        });
                    }
                    (format!("HTTP {status}"), retry_after(&response))
                }
                Err(e) => {
                    if !retryable_method || !is_transient(&e) {
                        return Err(ConceptLinkError::Network(format!("{url}: {e}")));
                    }
                    (e.to_string(), None)
                }
            };

            if attempt >= self.policy.max_attempts {
                error!(url, attempts = attempt, reason = %reason, "retries exhausted");
                return Err(ConceptLinkError::RetriesExhausted {
                    url: url.to_string(),
                    attempts: attempt,
                    last: reason,
                });
            }

            let delay = self.policy.delay_for(attempt, retry_after);
            warn!(
                url,
                attempt,
                max_attempts = self.policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                reason = %reason,
                "transient failure, backing off"
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Timeouts and connection failures are worth retrying; malformed requests are not.
fn is_transient(err: &reqwest::Error) -> bool {
    err.is_timeout() || err.is_connect() || err.is_request()
}

/// `Retry-After` in its delta-seconds form.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}
