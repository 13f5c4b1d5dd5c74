//! Generic REST call layer for the Falcon API
//!
//! Every endpoint is reached through `RestClient::call` with a method, a target
//! (path relative to the base URL, or an absolute URL handed back by the API),
//! an optional bearer token, and a flat parameter map. GET parameters become a
//! query string; every other method sends them as a JSON body.
//!
//! 429 responses and transport failures (connect, reset, timeout) are retried
//! after a fixed backoff up to the attempt bound. All other non-2xx responses
//! are surfaced as `Error::Api` without retry so the caller decides whether
//! they are fatal.

use std::time::Duration;

use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Flat request parameters. Array values are sent as repeated query keys.
pub type Params = serde_json::Map<String, Value>;

/// Retry policy for rate limits and transport failures.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts per call, including the first.
    pub max_attempts: u32,
    /// Fixed wait between attempts.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_secs(3),
        }
    }
}

/// Status code and decoded body of a successful call.
///
/// `body` is `Value::Null` for an empty body and `Value::String` when the
/// upstream returned something that isn't JSON.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Value,
}

impl ApiResponse {
    /// Deserialize the body into a typed response struct.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        T::deserialize(&self.body).map_err(|e| Error::Decode(e.to_string()))
    }
}

/// Stateless HTTP caller bound to one API base URL.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

impl RestClient {
    pub fn new(http: reqwest::Client, base_url: impl Into<String>, retry: RetryPolicy) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            retry,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// The underlying reqwest client, shared with the feed reader.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Resolve a target to a full URL. Absolute URLs pass through unchanged.
    pub fn url_for(&self, target: &str) -> String {
        if target.starts_with("http://") || target.starts_with("https://") {
            target.to_string()
        } else {
            format!("{}/{}", self.base_url, target.trim_start_matches('/'))
        }
    }

    /// Perform one API call, retrying on 429 and transport failures.
    pub async fn call(
        &self,
        method: Method,
        target: &str,
        token: Option<&str>,
        params: &Params,
    ) -> Result<ApiResponse> {
        let url = self.url_for(target);
        let query = query_pairs(params);
        debug!(%method, url = %url, params = params.len(), "api call");

        self.send_with_retry(&method, &url, || {
            let mut request = self.http.request(method.clone(), &url);
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            if method == Method::GET {
                request.query(&query)
            } else {
                request.json(params)
            }
        })
        .await
    }

    /// Form-encoded POST without bearer auth (token endpoint).
    ///
    /// Form values are never logged since they carry the client secret.
    pub async fn post_form(&self, target: &str, form: &[(&str, &str)]) -> Result<ApiResponse> {
        let url = self.url_for(target);
        debug!(url = %url, "form post");
        self.send_with_retry(&Method::POST, &url, || self.http.post(&url).form(form))
            .await
    }

    async fn send_with_retry<F>(&self, method: &Method, url: &str, build: F) -> Result<ApiResponse>
    where
        F: Fn() -> RequestBuilder,
    {
        let max_attempts = self.retry.max_attempts.max(1);
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            let response = match build().send().await {
                Ok(response) => response,
                Err(e) if attempt >= max_attempts => {
                    warn!(
                        %method,
                        url,
                        attempts = attempt,
                        error = %e,
                        "request retries exhausted"
                    );
                    return Err(Error::Http(format!("{method} {url}: {e}")));
                }
                Err(e) => {
                    warn!(
                        %method,
                        url,
                        attempt,
                        error = %e,
                        retry_in_ms = self.retry.backoff.as_millis() as u64,
                        "request failed, retrying"
                    );
                    tokio::time::sleep(self.retry.backoff).await;
                    continue;
                }
            };
            let status = response.status();
            debug!(%method, url, status = status.as_u16(), attempt, "api response");

            if status == StatusCode::TOO_MANY_REQUESTS {
                if attempt >= max_attempts {
                    warn!(%method, url, attempts = attempt, "rate limit retries exhausted");
                    return Err(Error::RateLimited { attempts: attempt });
                }
                warn!(
                    %method,
                    url,
                    attempt,
                    retry_in_ms = self.retry.backoff.as_millis() as u64,
                    "rate limit exceeded, retrying"
                );
                tokio::time::sleep(self.retry.backoff).await;
                continue;
            }

            let text = response
                .text()
                .await
                .map_err(|e| Error::Http(format!("reading body of {method} {url}: {e}")))?;
            let body = parse_body(&text);

            if !status.is_success() {
                return Err(Error::Api {
                    status: status.as_u16(),
                    message: error_message(&body, &text),
                });
            }

            return Ok(ApiResponse {
                status: status.as_u16(),
                body,
            });
        }
    }
}

/// Flatten params into query pairs, repeating the key for array values.
fn query_pairs(params: &Params) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (key, value) in params {
        match value {
            Value::Array(items) => {
                pairs.extend(items.iter().map(|item| (key.clone(), scalar(item))));
            }
            other => pairs.push((key.clone(), scalar(other))),
        }
    }
    pairs
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

/// Upstream error message: `errors[0].message` when present, else the raw body.
fn error_message(body: &Value, text: &str) -> String {
    body.get("errors")
        .and_then(|errors| errors.get(0))
        .and_then(|first| first.get("message"))
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                String::from("<no body>")
            } else {
                trimmed.to_string()
            }
        })
}
