//! Token-carrying API caller
//!
//! `ApiClient` is what gets registered with the `CredentialBroker`. The broker
//! pushes each new token into the client's slot; calls read the slot at call
//! time, so a client never holds on to a stale token across a refresh.

use std::sync::RwLock;

use reqwest::Method;

use crate::broker::TokenSink;
use crate::error::{Error, Result};
use crate::rest::{ApiResponse, Params, RestClient};
use crate::token::AccessToken;

pub struct ApiClient {
    rest: RestClient,
    token: RwLock<Option<AccessToken>>,
}

impl ApiClient {
    pub fn new(rest: RestClient) -> Self {
        Self {
            rest,
            token: RwLock::new(None),
        }
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    /// Whether the broker has delivered a token yet.
    pub fn has_token(&self) -> bool {
        self.token.read().map(|slot| slot.is_some()).unwrap_or(false)
    }

    /// Call the API with the current bearer token.
    ///
    /// Fails with `AuthenticationFailed` if the client was never registered.
    pub async fn call(&self, method: Method, target: &str, params: &Params) -> Result<ApiResponse> {
        let bearer = self.current_bearer()?;
        self.rest.call(method, target, Some(&bearer), params).await
    }

    pub async fn get(&self, target: &str, params: &Params) -> Result<ApiResponse> {
        self.call(Method::GET, target, params).await
    }

    pub async fn post(&self, target: &str, params: &Params) -> Result<ApiResponse> {
        self.call(Method::POST, target, params).await
    }

    pub async fn put(&self, target: &str, params: &Params) -> Result<ApiResponse> {
        self.call(Method::PUT, target, params).await
    }

    pub async fn patch(&self, target: &str, params: &Params) -> Result<ApiResponse> {
        self.call(Method::PATCH, target, params).await
    }

    pub async fn delete(&self, target: &str, params: &Params) -> Result<ApiResponse> {
        self.call(Method::DELETE, target, params).await
    }

    fn current_bearer(&self) -> Result<String> {
        let slot = self
            .token
            .read()
            .map_err(|_| Error::AuthenticationFailed("token slot poisoned".into()))?;
        slot.as_ref()
            .map(|token| token.bearer().to_string())
            .ok_or_else(|| {
                Error::AuthenticationFailed("client has not been registered with a broker".into())
            })
    }
}

impl TokenSink for ApiClient {
    fn set_token(&self, token: &AccessToken) {
        if let Ok(mut slot) = self.token.write() {
            *slot = Some(token.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rest::RetryPolicy;
    use axum::Json;
    use axum::http::HeaderMap;
    use axum::routing::get;
    use serde_json::json;
    use tokio::time::Instant;

    fn client(base: &str) -> ApiClient {
        ApiClient::new(RestClient::new(
            reqwest::Client::new(),
            base,
            RetryPolicy::default(),
        ))
    }

    #[tokio::test]
    async fn unregistered_client_refuses_to_call() {
        let api = client("http://127.0.0.1:1");
        assert!(!api.has_token());
        let err = api.get("/anything", &Params::new()).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(_)), "got: {err:?}");
    }

    #[tokio::test]
    async fn calls_use_latest_pushed_token() {
        let app = axum::Router::new().route(
            "/whoami",
            get(|headers: HeaderMap| async move {
                Json(json!({
                    "auth": headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .unwrap_or(""),
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let api = client(&format!("http://{addr}"));

        api.set_token(&AccessToken::new("first", Instant::now()));
        let response = api.get("/whoami", &Params::new()).await.unwrap();
        assert_eq!(response.body["auth"], "Bearer first");

        api.set_token(&AccessToken::new("second", Instant::now()));
        let response = api.get("/whoami", &Params::new()).await.unwrap();
        assert_eq!(response.body["auth"], "Bearer second");
    }
}
