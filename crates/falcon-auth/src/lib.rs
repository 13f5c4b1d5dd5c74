//! Falcon API authentication library
//!
//! Provides the generic REST call layer, OAuth2 client-credentials token
//! acquisition, and the `CredentialBroker` that keeps one bearer token fresh
//! for every API caller in the process.
//!
//! Token flow:
//! 1. Caller builds an `ApiClient` and calls `CredentialBroker::register()`
//! 2. The broker fetches a token if none is valid and hands it to the caller
//! 3. `refresh::spawn_refresh_task()` re-fetches before expiry
//! 4. Each refresh is pushed to every registered caller under the broker lock

pub mod broker;
pub mod client;
pub mod constants;
pub mod error;
pub mod refresh;
pub mod rest;
pub mod secret;
pub mod token;

pub use broker::{CredentialBroker, RefreshPolicy, TokenSink};
pub use client::ApiClient;
pub use constants::*;
pub use error::{Error, Result};
pub use refresh::spawn_refresh_task;
pub use rest::{ApiResponse, Params, RestClient, RetryPolicy};
pub use secret::Secret;
pub use token::{AccessToken, ClientCredential, TokenResponse};
