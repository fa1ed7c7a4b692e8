//! JSON fetch capability.
//!
//! The collector only needs "fetch JSON given an endpoint, method, headers
//! and body". [`HttpFetcher`] provides it over reqwest, including the
//! authentication handshakes job definitions can ask for.

mod auth;
mod client;

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use client::HttpFetcher;

/// Errors raised while fetching.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, TLS or timeout failure.
    #[error("request failed: {url} - {source}")]
    Transport {
        /// Requested URL.
        url: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },

    /// The server answered with status >= 400.
    #[error("HTTP {status} calling {url}: {body}")]
    Status {
        /// Requested URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Truncated response body.
        body: String,
    },

    /// The body is not JSON.
    #[error("non-JSON response calling {url}: {body}")]
    Decode {
        /// Requested URL.
        url: String,
        /// Truncated response body.
        body: String,
    },

    /// Credentials missing or login rejected.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The request cannot be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

/// HTTP method for requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl std::str::FromStr for HttpMethod {
    type Err = FetchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(FetchError::InvalidRequest(format!(
                "unsupported HTTP method '{other}'"
            ))),
        }
    }
}

impl HttpMethod {
    /// Get the method name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// Parse an optional configured method, defaulting to GET.
    ///
    /// # Errors
    /// Returns [`FetchError::InvalidRequest`] for unsupported methods.
    pub fn parse_or_get(method: Option<&str>) -> Result<Self, FetchError> {
        match method.map(str::trim).filter(|m| !m.is_empty()) {
            Some(m) => m.parse(),
            None => Ok(Self::Get),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<HttpMethod> for reqwest::Method {
    fn from(method: HttpMethod) -> Self {
        match method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Patch => reqwest::Method::PATCH,
            HttpMethod::Delete => reqwest::Method::DELETE,
        }
    }
}

/// One fetch.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Absolute URL, or a path joined onto the fetcher's base URL.
    pub endpoint: String,
    pub method: HttpMethod,
    pub headers: BTreeMap<String, String>,
    /// JSON request body.
    pub body: Option<serde_json::Value>,
    /// Overrides the fetcher's default timeout.
    pub timeout: Option<Duration>,
}

impl FetchRequest {
    /// Create a request.
    pub fn new(method: HttpMethod, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            method,
            headers: BTreeMap::new(),
            body: None,
            timeout: None,
        }
    }

    /// Create a GET request.
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, endpoint)
    }

    /// Set the JSON body.
    pub fn with_body(mut self, body: Option<serde_json::Value>) -> Self {
        self.body = body;
        self
    }

    /// Add a single request header.
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Set the request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Fetch JSON documents.
#[async_trait::async_trait]
pub trait Fetcher: Send + Sync {
    /// Perform `request` and decode the body as JSON.
    async fn fetch(&self, request: &FetchRequest) -> Result<serde_json::Value, FetchError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parsing() {
        assert_eq!("post".parse::<HttpMethod>().unwrap(), HttpMethod::Post);
        assert_eq!(HttpMethod::parse_or_get(None).unwrap(), HttpMethod::Get);
        assert_eq!(HttpMethod::parse_or_get(Some(" ")).unwrap(), HttpMethod::Get);
        assert!(matches!(
            "TRACE".parse::<HttpMethod>(),
            Err(FetchError::InvalidRequest(msg)) if msg.contains("TRACE")
        ));
    }

    #[test]
    fn test_request_builder() {
        let request = FetchRequest::new(HttpMethod::Post, "/api/stat")
            .with_body(Some(serde_json::json!({"limit": 10})))
            .with_header("X-Trace", "1")
            .with_timeout(Duration::from_secs(3));

        assert_eq!(request.method.to_string(), "POST");
        assert_eq!(request.headers.get("X-Trace").map(String::as_str), Some("1"));
        assert_eq!(request.timeout, Some(Duration::from_secs(3)));
    }
}
