//! Webhook handler: posts each event's raw JSON to a configured URL.
//!
//! The event is sent unchanged (envelope and payload) so the receiving side
//! decides how to render it. Extra static headers (e.g. a shared-secret header
//! expected by the receiver) come from config.

use crate::{EventHandler, HandlerError, Result};
use falcon_stream::Event;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use tracing::{debug, warn};

/// Header injection rule (name + value pair from config).
#[derive(Debug, Clone)]
pub struct HeaderInjection {
    pub name: String,
    pub value: String,
}

pub struct WebhookHandler {
    http: reqwest::Client,
    url: String,
    headers: HeaderMap,
}

impl WebhookHandler {
    /// Invalid header names or values are skipped with a warning.
    pub fn new(http: reqwest::Client, url: impl Into<String>, headers: &[HeaderInjection]) -> Self {
        let mut map = HeaderMap::new();
        for injection in headers {
            let name = match HeaderName::from_str(&injection.name) {
                Ok(n) => n,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header name");
                    continue;
                }
            };
            let value = match HeaderValue::from_str(&injection.value) {
                Ok(v) => v,
                Err(e) => {
                    warn!(header = %injection.name, error = %e, "skipping invalid header value");
                    continue;
                }
            };
            map.insert(name, value);
        }
        Self {
            http,
            url: url.into(),
            headers: map,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl EventHandler for WebhookHandler {
    fn id(&self) -> &str {
        "webhook"
    }

    fn handle<'a>(
        &'a self,
        event: &'a Event,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>> {
        Box::pin(async move {
            let body =
                serde_json::to_vec(event).map_err(|e| HandlerError::Encode(e.to_string()))?;

            let response = self
                .http
                .post(&self.url)
                .headers(self.headers.clone())
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body)
                .send()
                .await
                .map_err(|e| HandlerError::Delivery(e.to_string()))?;

            let status = response.status();
            if !status.is_success() {
                let message = response.text().await.unwrap_or_default();
                return Err(HandlerError::Rejected {
                    status: status.as_u16(),
                    message,
                });
            }

            debug!(offset = event.offset(), status = status.as_u16(), "event delivered to webhook");
            Ok(())
        })
    }
}
