//! Credential strings: the client secret, bearer tokens and stream session tokens

use std::fmt;

use reqwest::header::HeaderValue;
use zeroize::Zeroizing;

use crate::error::{Error, Result};

/// Credential string, redacted in Debug/Display and wiped from memory on drop.
#[derive(Clone)]
pub struct Secret(Zeroizing<String>);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(Zeroizing::new(value.into()))
    }

    /// Borrow the raw credential. Keep the borrow out of log fields.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }

    /// `Authorization` value `"<scheme> <credential>"`, flagged sensitive so
    /// the HTTP stack never prints it.
    pub fn authorization(&self, scheme: &str) -> Result<HeaderValue> {
        let value = Zeroizing::new(format!("{scheme} {}", self.expose()));
        let mut header = HeaderValue::from_str(&value).map_err(|_| {
            Error::AuthenticationFailed(format!(
                "{scheme} credential contains bytes not allowed in a header"
            ))
        })?;
        header.set_sensitive(true);
        Ok(header)
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret([REDACTED])")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
