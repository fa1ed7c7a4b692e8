//! reqwest-backed fetcher.

use reqwest::Client;
use reqwest::header::{ACCEPT, HeaderMap};

use crate::config::{AuthConfig, HttpSettings};
use crate::remote::snippet;

use super::{FetchError, FetchRequest, Fetcher, auth};

/// Fetches JSON from one API, authenticated once at construction.
pub struct HttpFetcher {
    client: Client,
    base_url: String,
    auth_headers: HeaderMap,
}

impl HttpFetcher {
    /// Build the client and run the configured authentication handshake.
    ///
    /// # Errors
    /// Returns [`FetchError::InvalidRequest`] if the client cannot be built,
    /// or [`FetchError::Auth`] if credentials are missing or rejected.
    pub async fn connect(settings: &HttpSettings, auth: &AuthConfig) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(settings.timeout())
            .danger_accept_invalid_certs(!settings.verify_tls)
            .cookie_store(true)
            .build()
            .map_err(|e| FetchError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;

        let base_url = settings.base_url.trim_end_matches('/').to_string();
        let auth_headers = auth::authenticate(&client, &base_url, auth).await?;

        Ok(Self {
            client,
            base_url,
            auth_headers,
        })
    }

    /// Base URL relative endpoints are joined onto.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Full URL for `endpoint`.
    pub fn resolve_url(&self, endpoint: &str) -> String {
        if endpoint.starts_with("http://") || endpoint.starts_with("https://") {
            return endpoint.to_string();
        }
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }
}

impl std::fmt::Debug for HttpFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFetcher")
            .field("base_url", &self.base_url)
            .field("auth_headers", &self.auth_headers.len())
            .finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, request: &FetchRequest) -> Result<serde_json::Value, FetchError> {
        let url = self.resolve_url(&request.endpoint);

        let mut builder = self
            .client
            .request(request.method.into(), &url)
            .header(ACCEPT, "application/json")
            .headers(self.auth_headers.clone());
        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }
        if let Some(timeout) = request.timeout {
            builder = builder.timeout(timeout);
        }

        tracing::debug!(method = %request.method, url = %url, "Fetching");
        let response = builder.send().await.map_err(|source| FetchError::Transport {
            url: url.clone(),
            source,
        })?;

        let status = response.status();
        let text = response.text().await.map_err(|source| FetchError::Transport {
            url: url.clone(),
            source,
        })?;

        if status.as_u16() >= 400 {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
                body: snippet(&text),
            });
        }

        serde_json::from_str(&text).map_err(|_| FetchError::Decode {
            url,
            body: snippet(&text),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::HttpMethod;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn fetcher(base_url: &str) -> HttpFetcher {
        let settings = HttpSettings {
            base_url: base_url.to_string(),
            ..HttpSettings::default()
        };
        HttpFetcher::connect(&settings, &AuthConfig::None).await.unwrap()
    }

    #[tokio::test]
    async fn test_resolve_url() {
        let fetcher = fetcher("https://pve.lan:8006/").await;
        assert_eq!(fetcher.base_url(), "https://pve.lan:8006");
        assert_eq!(
            fetcher.resolve_url("/api2/json/nodes"),
            "https://pve.lan:8006/api2/json/nodes"
        );
        assert_eq!(
            fetcher.resolve_url("api2/json/nodes"),
            "https://pve.lan:8006/api2/json/nodes"
        );
        assert_eq!(
            fetcher.resolve_url("http://other.lan/x"),
            "http://other.lan/x"
        );
    }

    #[tokio::test]
    async fn test_get_json() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api2/json/nodes/hl2/status"))
            .and(header("accept", "application/json"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"data": {"uptime": 42}})))
            .expect(1)
            .mount(&server)
            .await;

        let value = fetcher(&server.uri())
            .await
            .fetch(&FetchRequest::get("/api2/json/nodes/hl2/status"))
            .await
            .unwrap();
        assert_eq!(value["data"]["uptime"], 42);
    }

    #[tokio::test]
    async fn test_post_with_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/stat"))
            .and(body_json(serde_json::json!({"type": "by_app"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1, 2])))
            .expect(1)
            .mount(&server)
            .await;

        let request = FetchRequest::new(HttpMethod::Post, "/api/stat")
            .with_body(Some(serde_json::json!({"type": "by_app"})));
        let value = fetcher(&server.uri()).await.fetch(&request).await.unwrap();
        assert_eq!(value, serde_json::json!([1, 2]));
    }

    #[tokio::test]
    async fn test_error_status_carries_snippet() {
        let server = MockServer::start().await;
        Mock::given(path("/missing"))
            .respond_with(ResponseTemplate::new(404).set_body_string("x".repeat(300)))
            .mount(&server)
            .await;

        let err = fetcher(&server.uri())
            .await
            .fetch(&FetchRequest::get("/missing"))
            .await
            .unwrap_err();
        match err {
            FetchError::Status { status, body, .. } => {
                assert_eq!(status, 404);
                assert_eq!(body.len(), 203);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_non_json_body() {
        let server = MockServer::start().await;
        Mock::given(path("/html"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let err = fetcher(&server.uri())
            .await
            .fetch(&FetchRequest::get("/html"))
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::Decode { .. }));
    }
}
